//! gRPC health-check service.
//!
//! `Check` always answers `SERVING`. It logs any `timestamp` metadata the
//! caller sent and answers with `location` and `timestamp` headers. A
//! `timestamp` trailer is added by [`TimestampTrailerLayer`] as the response
//! body finishes.

use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use http_body::{Body, Frame, SizeHint};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codegen::http;
use tonic::metadata::MetadataValue;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tower::{Layer, Service};

use crate::proto::marquee::health::v1::health_check_response::ServingStatus;
use crate::proto::marquee::health::v1::health_server::{Health, HealthServer};
use crate::proto::marquee::health::v1::{HealthCheckRequest, HealthCheckResponse};

pub const TIMESTAMP_KEY: &str = "timestamp";
pub const LOCATION_KEY: &str = "location";

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Health service implementation.
#[derive(Debug, Clone)]
pub struct HealthService {
    location: String,
}

impl HealthService {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

#[tonic::async_trait]
impl Health for HealthService {
    async fn check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        for (idx, value) in request.metadata().get_all(TIMESTAMP_KEY).iter().enumerate() {
            match value.to_str() {
                Ok(timestamp) => tracing::info!(idx, timestamp, "Timestamp from metadata"),
                Err(_) => tracing::warn!(idx, "Timestamp metadata is not ASCII"),
            }
        }

        let service = request.into_inner().service;
        tracing::info!(service = %service, "Health check received");

        let mut response = Response::new(HealthCheckResponse {
            status: ServingStatus::Serving.into(),
        });
        let metadata = response.metadata_mut();
        let location = MetadataValue::try_from(self.location.as_str())
            .map_err(|_| Status::internal("location is not a valid header value"))?;
        metadata.insert(LOCATION_KEY, location);
        if let Ok(timestamp) = MetadataValue::try_from(now_rfc3339().as_str()) {
            metadata.insert(TIMESTAMP_KEY, timestamp);
        }
        Ok(response)
    }
}

/// Adds a `timestamp` trailer to every response.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampTrailerLayer;

impl<S> Layer<S> for TimestampTrailerLayer {
    type Service = TimestampTrailer<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimestampTrailer { inner }
    }
}

#[derive(Debug, Clone)]
pub struct TimestampTrailer<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for TimestampTrailer<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = http::Response<TrailerBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let response = self.inner.call(request);
        Box::pin(async move {
            let response = response.await?;
            Ok(response.map(|inner| TrailerBody { inner }))
        })
    }
}

/// Response body that stamps the trailers frame on its way out.
#[derive(Debug)]
pub struct TrailerBody<B> {
    inner: B,
}

impl<B> Body for TrailerBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut frame = ready!(Pin::new(&mut self.inner).poll_frame(cx));
        if let Some(trailers) = frame
            .as_mut()
            .and_then(|f| f.as_mut().ok())
            .and_then(Frame::trailers_mut)
        {
            if let Ok(value) = http::HeaderValue::from_str(&now_rfc3339()) {
                trailers.insert(TIMESTAMP_KEY, value);
            }
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Serve the health service on an already-bound listener until `shutdown_rx`
/// changes.
pub async fn serve_health(
    listener: TcpListener,
    service: HealthService,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    Server::builder()
        .layer(TimestampTrailerLayer)
        .add_service(HealthServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Shutdown signal received, stopping health server");
        })
        .await?;

    tracing::info!("Health server stopped");
    Ok(())
}

/// Bind `addr` and serve the health service.
pub async fn run_health_server(
    addr: SocketAddr,
    service: HealthService,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Starting health gRPC server");
    serve_health(listener, service, shutdown_rx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::ServiceExt;

    /// A body made of a single trailers frame.
    struct TrailersOnly {
        done: bool,
    }

    impl Body for TrailersOnly {
        type Data = &'static [u8];
        type Error = Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            if self.done {
                return Poll::Ready(None);
            }
            self.done = true;
            let mut trailers = http::HeaderMap::new();
            trailers.insert("grpc-status", http::HeaderValue::from_static("0"));
            Poll::Ready(Some(Ok(Frame::trailers(trailers))))
        }
    }

    #[tokio::test]
    async fn test_layer_stamps_trailers() {
        let inner = tower::service_fn(|_request: http::Request<()>| async {
            Ok::<_, Infallible>(http::Response::new(TrailersOnly { done: false }))
        });
        let response = TimestampTrailerLayer
            .layer(inner)
            .oneshot(http::Request::new(()))
            .await
            .unwrap();

        let mut body = response.into_body();
        let frame = std::future::poll_fn(|cx| Pin::new(&mut body).poll_frame(cx))
            .await
            .unwrap()
            .unwrap();
        let trailers = frame.into_trailers().unwrap();

        assert_eq!(trailers.get("grpc-status").unwrap(), "0");
        assert!(trailers.get(TIMESTAMP_KEY).is_some());
    }

    #[tokio::test]
    async fn test_check_reports_serving_with_headers() {
        let service = HealthService::new("MTV");
        let mut request = Request::new(HealthCheckRequest {
            service: "marquee".into(),
        });
        request
            .metadata_mut()
            .insert(TIMESTAMP_KEY, MetadataValue::from_static("client-time"));

        let response = service.check(request).await.unwrap();

        assert_eq!(response.metadata().get(LOCATION_KEY).unwrap(), "MTV");
        assert!(response.metadata().get(TIMESTAMP_KEY).is_some());
        assert_eq!(response.into_inner().status(), ServingStatus::Serving);
    }

    #[tokio::test]
    async fn test_invalid_location_is_internal_error() {
        let service = HealthService::new("line\nbreak");
        let status = service
            .check(Request::new(HealthCheckRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }
}
