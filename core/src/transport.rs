//! Blocking HTTP transport.
//!
//! # Design
//! The client pipeline runs on a blocking worker, so the transport is a
//! plain synchronous call. `Transport` is the seam tests use to replace the
//! network; `UreqTransport` is the production implementation. Status codes
//! are returned as data, never as errors: classifying them is the
//! pipeline's job.

use std::fmt;

use crate::error::HttpError;
use crate::http::{Method, Request, Response};

pub trait Transport: Send + Sync + fmt::Debug {
    /// Execute a built request. `Err` only for failures where no response
    /// arrived (connection, timeout).
    fn execute(&self, request: &Request) -> Result<Response, HttpError>;
}

/// Transport backed by `ureq`. A fresh agent per call carries the request's
/// own timeouts. Gzip bodies are decoded transparently.
#[derive(Debug, Clone, Default)]
pub struct UreqTransport;

impl UreqTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &Request) -> Result<Response, HttpError> {
        let url = request
            .url
            .as_deref()
            .ok_or_else(|| HttpError::InvalidRequest("Request.url cannot be null".to_string()))?;

        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(request.connect_timeout))
            .timeout_recv_response(Some(request.read_timeout))
            .timeout_recv_body(Some(request.read_timeout))
            .build()
            .new_agent();

        let body = match &request.body {
            Some(value) => {
                serde_json::to_vec(value).map_err(|e| HttpError::Serialization(e.to_string()))?
            }
            None => Vec::new(),
        };

        let result = match request.wire_method() {
            Method::Get => with_headers(agent.get(url), &request.headers).call(),
            Method::Delete => with_headers(agent.delete(url), &request.headers).call(),
            Method::Post | Method::Patch => {
                with_headers(agent.post(url), &request.headers).send(&body[..])
            }
            Method::Put => with_headers(agent.put(url), &request.headers).send(&body[..]),
        };
        let mut response = result?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(key, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (key.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .with_config()
            .limit(request.max_body_bytes)
            .read_to_vec()?;

        Ok(Response {
            url: url.to_string(),
            status,
            headers,
            body,
        })
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (key, value) in headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
}

impl From<ureq::Error> for HttpError {
    fn from(err: ureq::Error) -> Self {
        match &err {
            ureq::Error::Timeout(_) => HttpError::Timeout,
            ureq::Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::TimedOut => {
                HttpError::Timeout
            }
            ureq::Error::Io(io_err) => HttpError::Connection(io_err.to_string()),
            ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => {
                HttpError::Connection(err.to_string())
            }
            ureq::Error::BodyExceedsLimit(limit) => {
                HttpError::Other(format!("response body exceeds {limit} bytes"))
            }
            _ => HttpError::Other(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::ClientSettings;
    use crate::http::DataType;

    #[test]
    fn missing_url_is_rejected_before_io() {
        let req = Request::new(&ClientSettings::default());
        let err = UreqTransport::new().execute(&req).unwrap_err();
        assert!(matches!(err, HttpError::InvalidRequest(_)));
    }

    #[test]
    fn refused_connection_maps_to_connection_error() {
        // Bind then drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let mut req = Request::new(&ClientSettings::default());
        req.url_root = format!("http://127.0.0.1:{port}");
        req.timeouts(Duration::from_secs(2), Duration::from_secs(2))
            .data_type(DataType::Unit);
        req.build().unwrap();

        let err = UreqTransport::new().execute(&req).unwrap_err();
        assert!(
            matches!(err, HttpError::Connection(_) | HttpError::Timeout),
            "unexpected error: {err:?}"
        );
    }
}
