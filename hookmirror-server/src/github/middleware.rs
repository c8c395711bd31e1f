use std::future::Future;

use axum::http;
use reqwest::header::HeaderValue;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use tracing::{debug, warn};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Correlation ID of the inbound delivery being handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

tokio::task_local! {
    static DELIVERY: CorrelationId;
}

impl CorrelationId {
    /// Run `work` with this ID tagged onto every GitHub request it makes.
    pub fn scope<F: Future>(self, work: F) -> impl Future<Output = F::Output> {
        DELIVERY.scope(self, work)
    }

    /// The ID of the delivery the current task is handling, if any.
    pub fn current() -> Option<Self> {
        DELIVERY.try_with(Clone::clone).ok()
    }
}

/// Tags every outbound GitHub request with a correlation ID and logs the exchange.
pub struct CorrelationMiddleware;

#[async_trait::async_trait]
impl Middleware for CorrelationMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let correlation_id = match req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            Some(existing) => existing.to_string(),
            None => CorrelationId::current()
                .map(|id| id.0)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        };

        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            if let Ok(value) = HeaderValue::from_str(&correlation_id) {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }

        let method = req.method().clone();
        let path = extract_path(req.url().as_str());
        debug!(%correlation_id, "GitHub request: {} {}", method, path);

        let response = next.run(req, extensions).await;

        match &response {
            Ok(resp) => debug!(
                %correlation_id,
                "GitHub response: {} {} -> {}",
                method,
                path,
                resp.status()
            ),
            Err(err) => warn!(
                %correlation_id,
                "GitHub request failed: {} {}: {}",
                method,
                path,
                err
            ),
        }

        response
    }
}

fn extract_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}
