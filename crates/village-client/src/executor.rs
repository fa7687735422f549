//! Single-attempt request execution
//!
//! Sends one descriptor with whatever access token it is handed and decodes
//! the result. It knows nothing about refresh or retry; `ApiClient::execute`
//! decides what to do with a 401.

use std::time::Instant;

use common::Secret;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use village_auth::endpoint_url;

use crate::classify::{parse_response, transport_error};
use crate::error::{Error, Result};
use crate::metrics;
use crate::request::{ApiResponse, RequestDescriptor};

/// Correlation header sent on every attempt.
pub(crate) const REQUEST_ID_HEADER: &str = "x-request-id";

pub(crate) struct Executor {
    http: reqwest::Client,
    base_url: String,
}

impl Executor {
    pub(crate) fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    /// Send `descriptor` once, attaching `access` as the bearer token.
    #[instrument(
        skip_all,
        fields(method = %descriptor.method(), endpoint = %descriptor.endpoint())
    )]
    pub(crate) async fn attempt(
        &self,
        descriptor: &RequestDescriptor,
        access: Option<&Secret<String>>,
    ) -> Result<ApiResponse<Value>> {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());

        let mut headers = descriptor.headers().clone();
        headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderValue::from_str(&request_id)
                .map_err(|e| Error::InvalidRequest(format!("invalid request id: {e}")))?,
        );
        if let Some(token) = access {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
                .map_err(|e| Error::InvalidRequest(format!("invalid access token header: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut request = self
            .http
            .request(
                descriptor.method().clone(),
                endpoint_url(&self.base_url, descriptor.endpoint()),
            )
            .headers(headers);
        if !descriptor.query().is_empty() {
            request = request.query(descriptor.query());
        }
        if let Some(body) = descriptor.body() {
            request = request.json(body);
        }

        let method = descriptor.method().as_str();
        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let err = transport_error(&e);
                metrics::record_request(method, 0, start.elapsed().as_secs_f64());
                warn!(request_id = %request_id, error = %err, "request failed without response");
                return Err(err);
            }
        };

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            warn!(request_id = %request_id, status, error = %e, "failed reading response body");
            transport_error(&e)
        });
        metrics::record_request(method, status, start.elapsed().as_secs_f64());
        let body = body?;

        debug!(request_id = %request_id, status, bytes = body.len(), "response received");
        parse_response(status, &body)
    }
}
