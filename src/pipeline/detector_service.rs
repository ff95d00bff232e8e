use crate::error::DetectorError;
use crate::pipeline::context::{DetectedState, FrameContext, IngestedState};
use crate::tracking::Detector;
use futures::task::{Context, Poll};
use futures::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::error::Elapsed;
use tower::timeout::TimeoutLayer;
use tower::util::BoxService;
use tower::{BoxError, Service, ServiceBuilder, ServiceExt};

/// Adapts a [`Detector`] to a tower service over frame contexts. Errors are
/// boxed so the service composes with [`TimeoutLayer`].
#[derive(Clone)]
pub struct DetectorService {
    inner: Arc<dyn Detector>,
}

impl DetectorService {
    pub fn new(inner: Arc<dyn Detector>) -> Self {
        Self { inner }
    }
}

impl Service<FrameContext<IngestedState>> for DetectorService {
    type Response = FrameContext<DetectedState>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: FrameContext<IngestedState>) -> Self::Future {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let detections = inner.detect(req.frame()).await.map_err(BoxError::from)?;
            Ok(req.into_detected(detections))
        })
    }
}

/// The detector with its optional deadline applied.
pub struct DetectionStage {
    service: BoxService<FrameContext<IngestedState>, FrameContext<DetectedState>, BoxError>,
}

impl DetectionStage {
    pub fn new(detector: Arc<dyn Detector>, timeout: Option<Duration>) -> Self {
        let service = ServiceBuilder::new()
            .option_layer(timeout.map(TimeoutLayer::new))
            .service(DetectorService::new(detector));
        Self {
            service: BoxService::new(service),
        }
    }

    pub async fn run(
        &mut self,
        ctx: FrameContext<IngestedState>,
    ) -> Result<FrameContext<DetectedState>, DetectorError> {
        let service = self.service.ready().await.map_err(classify)?;
        service.call(ctx).await.map_err(classify)
    }
}

fn classify(error: BoxError) -> DetectorError {
    if error.is::<Elapsed>() {
        return DetectorError::Timeout;
    }
    match error.downcast::<DetectorError>() {
        Ok(error) => *error,
        Err(other) => DetectorError::Failed(other.to_string()),
    }
}
