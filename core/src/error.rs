//! Error types for the API client.
//!
//! # Design
//! `HttpError` classifies what went wrong. `ApiError` is what a failed call
//! settles with: the cause plus the request summary, the response when one
//! arrived, and a `handled` flag. It is a cheap `Arc` handle so every
//! observer of one failure sees and mutates the same flag.
//!
//! A failure observer that deals with the error calls `set_handled(true)`.
//! When the promise chain settles, the global `ApiErrorHandler` receives
//! the error only if nobody handled it, and at most once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::http::{Method, Request, Response};
use crate::types::{ErrorBody, ErrorEnvelope};

/// Cause of a failed call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    /// The request could not be built (missing url, missing data type).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),
    /// Request timeout
    #[error("Request timeout")]
    Timeout,
    /// Response with status >= 400
    #[error("HTTP error ({status}): {message}")]
    Status { status: u16, message: String },
    /// A successful response whose body did not match the target type.
    #[error("Decode error: {0}")]
    Decode(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Client build error
    #[error("Client build error: {0}")]
    Build(String),
    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Method and URL of the call that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSummary {
    pub method: Method,
    pub url: String,
}

/// A failed call.
#[derive(Clone)]
pub struct ApiError {
    inner: Arc<Inner>,
}

struct Inner {
    request: RequestSummary,
    response: Option<Response>,
    cause: HttpError,
    handled: AtomicBool,
    reported: AtomicBool,
}

impl ApiError {
    pub fn new(request: RequestSummary, response: Option<Response>, cause: HttpError) -> Self {
        Self {
            inner: Arc::new(Inner {
                request,
                response,
                cause,
                handled: AtomicBool::new(false),
                reported: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_request(request: &Request, response: Option<Response>, cause: HttpError) -> Self {
        Self::new(request.summary(), response, cause)
    }

    /// Build the error for a response with status >= 400. The message comes
    /// from a Fulton error body when there is one, the raw body otherwise.
    pub fn from_response(request: &Request, response: Response) -> Self {
        let message = parse_error_body(&response)
            .and_then(|body| body.message)
            .unwrap_or_else(|| response.text());
        let cause = HttpError::Status {
            status: response.status,
            message,
        };
        Self::new(request.summary(), Some(response), cause)
    }

    /// An error that is not tied to a particular response.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(RequestSummary::default(), None, HttpError::Other(message.into()))
    }

    pub fn request(&self) -> &RequestSummary {
        &self.inner.request
    }

    pub fn response(&self) -> Option<&Response> {
        self.inner.response.as_ref()
    }

    pub fn cause(&self) -> &HttpError {
        &self.inner.cause
    }

    pub fn status(&self) -> Option<u16> {
        self.inner.response.as_ref().map(|r| r.status)
    }

    /// Human readable message: the server's message for status errors, the
    /// cause description otherwise.
    pub fn message(&self) -> String {
        match &self.inner.cause {
            HttpError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Fulton error payload, when the response carried one.
    pub fn error_body(&self) -> Option<ErrorBody> {
        self.inner.response.as_ref().and_then(parse_error_body)
    }

    pub fn is_handled(&self) -> bool {
        self.inner.handled.load(Ordering::Acquire)
    }

    pub fn set_handled(&self, handled: bool) {
        self.inner.handled.store(handled, Ordering::Release);
    }

    /// Hand the error to `handler` unless it was handled or already
    /// reported. Returns whether the handler was called.
    pub(crate) fn report(&self, handler: &dyn ApiErrorHandler) -> bool {
        if self.is_handled() {
            return false;
        }
        if self.inner.reported.swap(true, Ordering::AcqRel) {
            return false;
        }
        handler.on_error(self);
        true
    }
}

fn parse_error_body(response: &Response) -> Option<ErrorBody> {
    if !response.is_json() {
        return None;
    }
    serde_json::from_slice::<ErrorEnvelope>(&response.body)
        .ok()
        .map(|envelope| envelope.error)
}

impl fmt::Debug for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiError")
            .field("request", &self.inner.request)
            .field("status", &self.status())
            .field("cause", &self.inner.cause)
            .field("handled", &self.is_handled())
            .finish()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inner.request.url.is_empty() {
            write!(f, "{}", self.inner.cause)
        } else {
            write!(
                f,
                "{} {}: {}",
                self.inner.request.method, self.inner.request.url, self.inner.cause
            )
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner.cause)
    }
}

/// Receives every failed call nobody marked as handled.
pub trait ApiErrorHandler: Send + Sync {
    fn on_error(&self, error: &ApiError);
}

impl<F> ApiErrorHandler for F
where
    F: Fn(&ApiError) + Send + Sync,
{
    fn on_error(&self, error: &ApiError) {
        self(error)
    }
}

/// Default handler: logs unhandled failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorHandler;

impl ApiErrorHandler for LoggingErrorHandler {
    fn on_error(&self, error: &ApiError) {
        tracing::error!(
            method = %error.request().method,
            url = %error.request().url,
            status = ?error.status(),
            "Unhandled api error: {}",
            error.cause()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::context::ClientSettings;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl ApiErrorHandler for Counter {
        fn on_error(&self, _error: &ApiError) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request() -> Request {
        let mut req = Request::new(&ClientSettings::default());
        req.url_root = "http://api.fulton.com".to_string();
        req.paths(["news"]);
        req.build_url();
        req
    }

    #[test]
    fn status_display() {
        let error = HttpError::Status {
            status: 404,
            message: "Not Found".to_string(),
        };
        assert_eq!(error.to_string(), "HTTP error (404): Not Found");
    }

    #[test]
    fn timeout_display() {
        assert_eq!(HttpError::Timeout.to_string(), "Request timeout");
    }

    #[test]
    fn plain_text_error_uses_body_as_message() {
        let res = Response::new("http://api.fulton.com/news", 400).with_body("TEST");
        let err = ApiError::from_response(&request(), res);
        assert_eq!(err.message(), "TEST");
        assert_eq!(err.status(), Some(400));
        assert!(err.error_body().is_none());
    }

    #[test]
    fn json_error_uses_fulton_message() {
        let res = Response::new("http://api.fulton.com/news", 404)
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"error":{"code":"not_found","message":"news not found"}}"#);
        let err = ApiError::from_response(&request(), res);
        assert_eq!(err.message(), "news not found");
        assert_eq!(err.error_body().unwrap().code.as_deref(), Some("not_found"));
        assert_eq!(
            err.to_string(),
            "GET http://api.fulton.com/news: HTTP error (404): news not found"
        );
    }

    #[test]
    fn handled_flag_is_shared_between_clones() {
        let err = ApiError::other("boom");
        let observer = err.clone();
        observer.set_handled(true);
        assert!(err.is_handled());
    }

    #[test]
    fn report_skips_handled_errors() {
        let counter = Counter::default();
        let err = ApiError::other("boom");
        err.set_handled(true);
        assert!(!err.report(&counter));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn report_happens_once() {
        let counter = Counter::default();
        let err = ApiError::other("boom");
        assert!(err.report(&counter));
        assert!(!err.clone().report(&counter));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn source_is_the_cause() {
        use std::error::Error;
        let err = ApiError::other("boom");
        assert_eq!(err.source().unwrap().to_string(), "boom");
    }
}
