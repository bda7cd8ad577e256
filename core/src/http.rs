//! Request and response descriptors.
//!
//! # Design
//! `Request` is the mutable builder a caller configures inside the closure
//! passed to `ApiClient::request`. It lives for a single call and is dropped
//! once the promise settles. `Response` is plain data produced by a
//! `Transport` (or a mock) and never mutated afterwards.
//!
//! Setters are additive: `paths`, `query` and `headers` append to what is
//! already there instead of replacing the whole collection.

use std::any::TypeId;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::context::ClientSettings;
use crate::error::{HttpError, RequestSummary};
use crate::query::QueryParams;
use crate::url;

/// Header used to tunnel `PATCH` through `POST` for servers and proxies
/// that reject the verb.
pub const METHOD_OVERRIDE_HEADER: &str = "X-HTTP-Method-Override";

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape the response body is decoded into.
///
/// Resolved from the call's result type with [`DataType::of`] unless the
/// caller sets one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// No payload. Always yields `()` and is never cached.
    Unit,
    /// Raw body text.
    Text,
    /// JSON decoded into the result type.
    Json,
}

impl DataType {
    pub fn of<T: 'static>() -> Self {
        let id = TypeId::of::<T>();
        if id == TypeId::of::<()>() {
            DataType::Unit
        } else if id == TypeId::of::<String>() {
            DataType::Text
        } else {
            DataType::Json
        }
    }
}

/// A single HTTP call being configured.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url_root: String,
    pub paths: Vec<String>,
    pub query: Vec<(String, String)>,
    pub query_params: Option<QueryParams>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub data_type: Option<DataType>,
    pub cache_duration: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub use_gzip: bool,
    pub max_body_bytes: u64,
    /// Set by [`Request::build_url`].
    pub url: Option<String>,
    pub started_at: Instant,
    /// When present the transport is skipped and this response is used.
    pub mock_response: Option<Response>,
    body_error: Option<String>,
}

impl Request {
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            method: Method::Get,
            url_root: String::new(),
            paths: Vec::new(),
            query: Vec::new(),
            query_params: None,
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Accept".to_string(), "application/json".to_string()),
            ],
            body: None,
            data_type: None,
            cache_duration: settings.default_cache_duration(),
            connect_timeout: settings.connect_timeout(),
            read_timeout: settings.read_timeout(),
            use_gzip: settings.use_gzip,
            max_body_bytes: settings.max_body_bytes,
            url: None,
            started_at: Instant::now(),
            mock_response: None,
            body_error: None,
        }
    }

    pub fn method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    /// Append path segments after the url root.
    pub fn paths<I, S>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths.extend(values.into_iter().map(Into::into));
        self
    }

    /// Add a query entry. A repeated key keeps its position and takes the
    /// new value.
    pub fn query(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        upsert(&mut self.query, key.into(), value.to_string(), false);
        self
    }

    /// Configure the structured Fulton query (filter, sort, pagination...).
    pub fn query_params(&mut self, configure: impl FnOnce(&mut QueryParams)) -> &mut Self {
        configure(self.query_params.get_or_insert_with(QueryParams::default));
        self
    }

    /// Add a header. Keys compare case-insensitively.
    pub fn headers(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        upsert(&mut self.headers, key.into(), value.into(), true);
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize `body` as the JSON payload. A serialization failure is
    /// reported when the request is built.
    pub fn body<B: Serialize + ?Sized>(&mut self, body: &B) -> &mut Self {
        match serde_json::to_value(body) {
            Ok(value) => {
                self.body = Some(value);
                self.body_error = None;
            }
            Err(err) => {
                self.body = None;
                self.body_error = Some(err.to_string());
            }
        }
        self
    }

    pub fn data_type(&mut self, data_type: DataType) -> &mut Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn cache(&mut self, duration: Duration) -> &mut Self {
        self.cache_duration = duration;
        self
    }

    pub fn no_cache(&mut self) -> &mut Self {
        self.cache(Duration::ZERO)
    }

    pub fn timeouts(&mut self, connect: Duration, read: Duration) -> &mut Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    pub fn gzip(&mut self, enabled: bool) -> &mut Self {
        self.use_gzip = enabled;
        self
    }

    /// Fail the call when the (decoded) response body grows past `bytes`.
    pub fn max_body(&mut self, bytes: u64) -> &mut Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn mock_response(&mut self, response: Response) -> &mut Self {
        self.mock_response = Some(response);
        self
    }

    /// Compose `url` from the root, path segments and both query sources.
    /// An empty root leaves `url` unset.
    pub fn build_url(&mut self) {
        if self.url_root.trim().is_empty() {
            self.url = None;
            return;
        }
        self.url = Some(url::build(
            &self.url_root,
            &self.paths,
            self.query_params.as_ref(),
            &self.query,
        ));
    }

    /// Resolve the body shape from the result type unless one was set.
    pub fn build_data_type<T: 'static>(&mut self) {
        self.data_type.get_or_insert_with(DataType::of::<T>);
    }

    /// Finalize the request for dispatch.
    pub fn build(&mut self) -> Result<(), HttpError> {
        if let Some(err) = self.body_error.take() {
            return Err(HttpError::Serialization(err));
        }
        self.build_url();
        if self.method == Method::Patch {
            self.headers(METHOD_OVERRIDE_HEADER, Method::Patch.as_str());
        }
        if self.header("Accept-Encoding").is_none() {
            let encoding = if self.use_gzip { "gzip" } else { "identity" };
            self.headers("Accept-Encoding", encoding);
        }
        self.verify()
    }

    pub fn verify(&self) -> Result<(), HttpError> {
        match &self.url {
            None => Err(HttpError::InvalidRequest(
                "Request.url cannot be null, set a url root".to_string(),
            )),
            Some(_) if self.data_type.is_none() => Err(HttpError::InvalidRequest(
                "Request.dataType cannot be null".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }

    /// Method actually sent on the wire. `PATCH` travels as `POST`.
    pub fn wire_method(&self) -> Method {
        match self.method {
            Method::Patch => Method::Post,
            other => other,
        }
    }

    pub fn is_cacheable(&self) -> bool {
        self.method == Method::Get && !self.cache_duration.is_zero()
    }

    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            method: self.method,
            url: self
                .url
                .clone()
                .unwrap_or_else(|| self.url_root.clone()),
        }
    }
}

fn upsert(entries: &mut Vec<(String, String)>, key: String, value: String, ignore_case: bool) {
    let existing = entries.iter_mut().find(|(k, _)| {
        if ignore_case {
            k.eq_ignore_ascii_case(&key)
        } else {
            *k == key
        }
    });
    match existing {
        Some((_, v)) => *v = value,
        None => entries.push((key, value)),
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_json(&self) -> bool {
        self.header("Content-Type")
            .is_some_and(|v| v.to_ascii_lowercase().contains("json"))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
