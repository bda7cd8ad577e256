//! Base API client: request pipeline with caching and error routing.
//!
//! # Design
//! `ApiClient` holds the url root, a cache namespace and the shared
//! `FultonContext`. Every call goes through the same steps:
//!
//! 1. a fresh `Request` is initialized, configured by the caller and built
//!    on the calling thread. Construction errors reject right away.
//! 2. the rest runs on a blocking worker: cache lookup for cacheable calls,
//!    the transport round trip, classification and decoding, and the cache
//!    write on success.
//!
//! Nothing here retries. A call either resolves with a typed value or
//! rejects with exactly one `ApiError`.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::FultonContext;
use crate::error::{ApiError, HttpError};
use crate::http::{DataType, Request};
use crate::promise::ApiPromise;

/// Hook applied to every request of a client before the caller's
/// configuration, e.g. to attach credentials.
pub trait RequestInitializer: Send + Sync + fmt::Debug {
    fn init_request(&self, context: &FultonContext, request: &mut Request);
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    namespace: String,
    url_root: String,
    context: FultonContext,
    initializer: Option<Arc<dyn RequestInitializer>>,
}

impl ApiClient {
    /// `namespace` scopes this client's cache entries; use one per client
    /// type.
    pub fn new(
        context: FultonContext,
        namespace: impl Into<String>,
        url_root: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            url_root: url_root.into(),
            context,
            initializer: None,
        }
    }

    pub fn with_initializer(mut self, initializer: Arc<dyn RequestInitializer>) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn url_root(&self) -> &str {
        &self.url_root
    }

    pub fn context(&self) -> &FultonContext {
        &self.context
    }

    /// A request with this client's root, the context defaults and the
    /// initializer applied.
    pub fn new_request(&self) -> Request {
        let mut request = Request::new(self.context.settings());
        request.url_root = self.url_root.clone();
        if let Some(initializer) = &self.initializer {
            initializer.init_request(&self.context, &mut request);
        }
        request
    }

    /// Issue a call whose result decodes into `T`.
    ///
    /// `configure` runs synchronously on the calling thread; everything
    /// after runs in the background.
    pub fn request<T, F>(&self, configure: F) -> ApiPromise<T>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(&mut Request),
    {
        let mut request = self.new_request();
        configure(&mut request);
        self.execute(request)
    }

    /// Issue an already configured request.
    pub fn execute<T>(&self, mut request: Request) -> ApiPromise<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        request.build_data_type::<T>();
        if let Err(cause) = request.build() {
            tracing::warn!(namespace = %self.namespace, "Rejecting request before dispatch: {}", cause);
            let error = ApiError::from_request(&request, None, cause);
            return ApiPromise::rejected(self.context.clone(), error);
        }

        let summary = request.summary();
        let call = Call {
            namespace: self.namespace.clone(),
            context: self.context.clone(),
            request,
        };
        let handle = self.context.runtime().spawn_blocking(move || call.run::<T>());
        ApiPromise::from_join_handle(self.context.clone(), summary, handle)
    }

    /// Drop every cache entry of this client.
    pub fn clean_cache(&self) {
        self.context.cache_manager().clean(Some(&self.namespace));
    }
}

struct Call {
    namespace: String,
    context: FultonContext,
    request: Request,
}

impl Call {
    fn run<T: DeserializeOwned>(mut self) -> Result<T, ApiError> {
        let url = self.request.url.clone().unwrap_or_default();
        let data_type = self.request.data_type.unwrap_or(DataType::Json);
        let cacheable = self.request.is_cacheable();

        if cacheable {
            if let Some(bytes) = self.context.cache_manager().get(&self.namespace, &url) {
                match decode::<T>(data_type, &bytes) {
                    Ok(value) => {
                        tracing::debug!(namespace = %self.namespace, "Cache hit for {}", url);
                        return Ok(value);
                    }
                    Err(err) => {
                        tracing::warn!("Ignoring undecodable cache entry for {}: {}", url, err);
                    }
                }
            }
        }

        tracing::debug!("--> {} ({})", self.request.method, url);
        let outcome = match self.request.mock_response.take() {
            Some(response) => Ok(response),
            None => self.context.transport().execute(&self.request),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(cause) => {
                tracing::warn!("Request to {} failed: {}", url, cause);
                return Err(ApiError::from_request(&self.request, None, cause));
            }
        };

        tracing::debug!(
            elapsed_ms = self.request.started_at.elapsed().as_millis() as u64,
            length = response.body.len(),
            "<-- {} ({})",
            response.status,
            url
        );

        if !response.is_success() {
            return Err(ApiError::from_response(&self.request, response));
        }

        let value = match decode::<T>(data_type, &response.body) {
            Ok(value) => value,
            Err(cause) => {
                tracing::warn!("Failed to decode response of {}: {}", url, cause);
                return Err(ApiError::from_request(&self.request, Some(response), cause));
            }
        };

        if cacheable && data_type != DataType::Unit {
            self.context.cache_manager().add(
                &self.namespace,
                &url,
                self.request.cache_duration,
                response.body,
            );
        }

        Ok(value)
    }
}

/// Decode a response body according to `data_type`.
pub fn decode<T: DeserializeOwned>(data_type: DataType, bytes: &[u8]) -> Result<T, HttpError> {
    let result = match data_type {
        DataType::Unit => serde_json::from_value(Value::Null),
        DataType::Text => {
            serde_json::from_value(Value::String(String::from_utf8_lossy(bytes).into_owned()))
        }
        DataType::Json => serde_json::from_slice(bytes),
    };
    result.map_err(|e| HttpError::Decode(e.to_string()))
}
