use crate::middleware::metrics::normalize_endpoint;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{debug, error, info, warn};

/// Responses slower than this get a warning even when they succeed.
/// Covers synchronous model switches and large uploads; job execution
/// itself never blocks a request.
const SLOW_REQUEST_MS: u128 = 5_000;

/// Structured request/response logging. Clients poll job and batch status
/// every second or two, so successful polls log at debug; everything else
/// logs at info with the normalized endpoint attached.
pub struct RequestLogging;

/// Successful hits on these endpoints are routine polling noise.
fn is_poll_endpoint(endpoint: &str) -> bool {
    matches!(
        endpoint,
        "GET /health"
            | "GET /api/v1/health"
            | "GET /api/v1/jobs"
            | "GET /api/v1/jobs/{id}"
            | "GET /api/v1/batches/{id}"
    )
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let uri = req.uri().to_string();
        let endpoint = normalize_endpoint(req.method().as_str(), req.uri().path());
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis();

            match &result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if duration_ms > SLOW_REQUEST_MS {
                        warn!(
                            endpoint = %endpoint,
                            uri = %uri,
                            remote_addr = %remote_addr,
                            status = %status,
                            duration_ms = %duration_ms,
                            "slow request"
                        );
                    } else if response.status().is_success() && is_poll_endpoint(&endpoint) {
                        debug!(
                            endpoint = %endpoint,
                            status = %status,
                            duration_ms = %duration_ms,
                            "poll completed"
                        );
                    } else {
                        info!(
                            endpoint = %endpoint,
                            uri = %uri,
                            remote_addr = %remote_addr,
                            status = %status,
                            duration_ms = %duration_ms,
                            "request completed"
                        );
                    }
                }
                Err(err) => {
                    error!(
                        endpoint = %endpoint,
                        uri = %uri,
                        remote_addr = %remote_addr,
                        duration_ms = %duration_ms,
                        error = %err,
                        "request failed"
                    );
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::is_poll_endpoint;

    #[test]
    fn test_poll_endpoints_are_demoted() {
        assert!(is_poll_endpoint("GET /api/v1/jobs/{id}"));
        assert!(is_poll_endpoint("GET /api/v1/batches/{id}"));
        assert!(is_poll_endpoint("GET /health"));
        assert!(!is_poll_endpoint("POST /api/v1/jobs"));
        assert!(!is_poll_endpoint("GET /api/v1/download/result.txt"));
    }
}
