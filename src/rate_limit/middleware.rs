//! Tower middleware that charges each request to a client bucket before the handler runs.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use tower_layer::Layer;
use tower_service::Service;
use tracing::debug;

use crate::error::AdmissionError;
use crate::rate_limit::{ClientRegistry, Decision, TrafficClass};
use crate::telemetry::{emit_best_effort, AdmissionEvent, GuardEvent, NullSink, TelemetrySink};

/// Requests that can be run through an admission check.
///
/// The routing layer decides identity (typically the remote address) and, for
/// per-request classification, the traffic class.
pub trait Admissible {
    /// Client identity the budget is charged to.
    fn client_identity(&self) -> &str;

    /// Traffic class for this request. Unrecognized routes fall back to global.
    fn traffic_class(&self) -> TrafficClass {
        TrafficClass::Global
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClassSelector {
    Fixed(TrafficClass),
    PerRequest,
}

/// A layer that runs every request through a [`ClientRegistry`] check before the
/// inner service sees it.
#[derive(Clone, Debug)]
pub struct AdmissionLayer<T = NullSink> {
    registry: Arc<ClientRegistry>,
    selector: ClassSelector,
    sink: T,
}

impl AdmissionLayer<NullSink> {
    /// Charge every request to one fixed class.
    pub fn new(registry: Arc<ClientRegistry>, class: TrafficClass) -> Self {
        Self { registry, selector: ClassSelector::Fixed(class), sink: NullSink }
    }

    /// Charge each request to the class it reports through [`Admissible::traffic_class`].
    pub fn per_request(registry: Arc<ClientRegistry>) -> Self {
        Self { registry, selector: ClassSelector::PerRequest, sink: NullSink }
    }
}

impl<T> AdmissionLayer<T> {
    /// Report rejections to a telemetry sink.
    pub fn with_sink<U: TelemetrySink>(self, sink: U) -> AdmissionLayer<U> {
        AdmissionLayer { registry: self.registry, selector: self.selector, sink }
    }
}

impl<S, T: Clone> Layer<S> for AdmissionLayer<T> {
    type Service = AdmissionService<S, T>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            registry: self.registry.clone(),
            selector: self.selector,
            sink: self.sink.clone(),
        }
    }
}

/// Middleware service that enforces per-client admission.
#[derive(Clone, Debug)]
pub struct AdmissionService<S, T = NullSink> {
    inner: S,
    registry: Arc<ClientRegistry>,
    selector: ClassSelector,
    sink: T,
}

impl<S, T> AdmissionService<S, T> {
    /// The registry this service charges.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }
}

impl<S, T, Req> Service<Req> for AdmissionService<S, T>
where
    S: Service<Req>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    T: TelemetrySink,
    T::Future: Send + 'static,
    Req: Admissible,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let class = match self.selector {
            ClassSelector::Fixed(class) => class,
            ClassSelector::PerRequest => req.traffic_class(),
        };

        // Decided here, before the inner service is touched.
        match self.registry.check(req.client_identity(), class) {
            Decision::Admitted { .. } => {
                let fut = self.inner.call(req);
                async move { fut.await.map_err(AdmissionError::Inner) }.boxed()
            }
            Decision::Rejected { class, retry_after } => {
                let identity = req.client_identity().to_owned();
                debug!(target: "kanbin_guard::admission", identity = %identity, class = %class, "request refused");
                let sink = self.sink.clone();
                async move {
                    emit_best_effort(
                        sink,
                        GuardEvent::Admission(AdmissionEvent::Rejected { identity, class }),
                    )
                    .await;
                    Err(AdmissionError::RateLimited { class, retry_after })
                }
                .boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{BucketConfig, ClassLimits};
    use crate::telemetry::MemorySink;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    struct Req {
        ip: &'static str,
        class: TrafficClass,
    }

    impl Admissible for Req {
        fn client_identity(&self) -> &str {
            self.ip
        }

        fn traffic_class(&self) -> TrafficClass {
            self.class
        }
    }

    fn registry() -> Arc<ClientRegistry> {
        let limits = ClassLimits::default()
            .with_class(TrafficClass::BoardWrite, BucketConfig::new(2, Duration::from_secs(6)));
        Arc::new(ClientRegistry::new(limits, ManualClock::default()))
    }

    #[tokio::test]
    async fn rejected_requests_never_reach_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sink = MemorySink::new();
        let mut svc = ServiceBuilder::new()
            .layer(AdmissionLayer::per_request(registry()).with_sink(sink.clone()))
            .service(service_fn(move |_req: Req| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Infallible>("ok") }
            }));

        for _ in 0..2 {
            let req = Req { ip: "198.51.100.4", class: TrafficClass::BoardWrite };
            assert_eq!(svc.ready().await.unwrap().call(req).await.unwrap(), "ok");
        }
        let req = Req { ip: "198.51.100.4", class: TrafficClass::BoardWrite };
        let err = svc.ready().await.unwrap().call(req).await.unwrap_err();

        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            sink.events(),
            vec![GuardEvent::Admission(AdmissionEvent::Rejected {
                identity: "198.51.100.4".into(),
                class: TrafficClass::BoardWrite,
            })]
        );
    }

    #[tokio::test]
    async fn fixed_class_ignores_request_classification() {
        let reg = registry();
        let svc = AdmissionLayer::new(reg.clone(), TrafficClass::Global)
            .layer(service_fn(|_req: Req| async { Ok::<_, Infallible>(()) }));

        let req = Req { ip: "a", class: TrafficClass::BoardWrite };
        svc.oneshot(req).await.unwrap();

        reg.for_each(|_, entry| {
            assert!(entry.bucket(TrafficClass::Global).is_some());
            assert!(entry.bucket(TrafficClass::BoardWrite).is_none());
        });
    }

    #[tokio::test]
    async fn inner_errors_are_wrapped() {
        let svc = AdmissionLayer::per_request(registry()).layer(service_fn(|_req: Req| async {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "handler failed"))
        }));
        let err = svc.oneshot(Req { ip: "a", class: TrafficClass::Global }).await.unwrap_err();
        assert!(!err.is_rate_limited());
        assert_eq!(err.to_string(), "handler failed");
    }
}
