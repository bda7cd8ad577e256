//! Client configuration and shared collaborators.
//!
//! # Design
//! Instead of a process-wide mutable singleton, every client is constructed
//! with a `FultonContext`. The context is a cheap `Arc` handle, so the
//! hosting application builds one at start-up and hands clones to its
//! clients. The cache manager, error handler and identity manager can be
//! swapped on a live context; clients pick up the new value on their next
//! call.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::cache::{CacheManager, MemoryCacheManager};
use crate::error::{ApiErrorHandler, HttpError, LoggingErrorHandler};
use crate::identity::{IdentityManager, MemoryIdentityManager};
use crate::transport::{Transport, UreqTransport};

/// Defaults applied to every new request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// `0` disables caching.
    pub default_cache_duration_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub use_gzip: bool,
    /// Largest response body read before the call fails.
    pub max_body_bytes: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            default_cache_duration_ms: 0,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 10_000,
            use_gzip: true,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ClientSettings {
    /// Defaults overridden by `FULTON_CACHE_MS`, `FULTON_CONNECT_TIMEOUT_MS`,
    /// `FULTON_READ_TIMEOUT_MS`, `FULTON_GZIP` and `FULTON_MAX_BODY_BYTES`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(ms) = env_parse("FULTON_CACHE_MS") {
            settings.default_cache_duration_ms = ms;
        }
        if let Some(ms) = env_parse("FULTON_CONNECT_TIMEOUT_MS") {
            settings.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("FULTON_READ_TIMEOUT_MS") {
            settings.read_timeout_ms = ms;
        }
        if let Some(gzip) = env_parse("FULTON_GZIP") {
            settings.use_gzip = gzip;
        }
        if let Some(bytes) = env_parse("FULTON_MAX_BODY_BYTES") {
            settings.max_body_bytes = bytes;
        }
        settings
    }

    pub fn default_cache_duration(&self) -> Duration {
        Duration::from_millis(self.default_cache_duration_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={}", key, raw);
            None
        }
    }
}

/// Shared configuration and collaborators for API clients.
#[derive(Clone)]
pub struct FultonContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    settings: ClientSettings,
    cache_manager: RwLock<Arc<dyn CacheManager>>,
    error_handler: RwLock<Arc<dyn ApiErrorHandler>>,
    identity_manager: RwLock<Arc<dyn IdentityManager>>,
    transport: Arc<dyn Transport>,
    runtime: Handle,
}

impl FultonContext {
    pub fn builder() -> FultonContextBuilder {
        FultonContextBuilder::default()
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    pub fn cache_manager(&self) -> Arc<dyn CacheManager> {
        read(&self.inner.cache_manager)
    }

    pub fn set_cache_manager(&self, cache_manager: Arc<dyn CacheManager>) {
        write(&self.inner.cache_manager, cache_manager);
    }

    pub fn error_handler(&self) -> Arc<dyn ApiErrorHandler> {
        read(&self.inner.error_handler)
    }

    pub fn set_error_handler(&self, error_handler: Arc<dyn ApiErrorHandler>) {
        write(&self.inner.error_handler, error_handler);
    }

    pub fn identity_manager(&self) -> Arc<dyn IdentityManager> {
        read(&self.inner.identity_manager)
    }

    pub fn set_identity_manager(&self, identity_manager: Arc<dyn IdentityManager>) {
        write(&self.inner.identity_manager, identity_manager);
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Runtime that runs request pipelines and promise continuations.
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }
}

fn read<T: ?Sized>(lock: &RwLock<Arc<T>>) -> Arc<T> {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write<T: ?Sized>(lock: &RwLock<Arc<T>>, value: Arc<T>) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = value;
}

impl fmt::Debug for FultonContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FultonContext")
            .field("settings", &self.inner.settings)
            .field("cache_manager", &self.cache_manager())
            .field("identity_manager", &self.identity_manager())
            .field("transport", &self.inner.transport)
            .finish_non_exhaustive()
    }
}

/// Builder for [`FultonContext`]. Anything left unset gets the default
/// implementation.
#[derive(Default)]
pub struct FultonContextBuilder {
    settings: Option<ClientSettings>,
    cache_manager: Option<Arc<dyn CacheManager>>,
    error_handler: Option<Arc<dyn ApiErrorHandler>>,
    identity_manager: Option<Arc<dyn IdentityManager>>,
    transport: Option<Arc<dyn Transport>>,
    runtime: Option<Handle>,
}

impl FultonContextBuilder {
    pub fn settings(mut self, settings: ClientSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn cache_manager(mut self, cache_manager: Arc<dyn CacheManager>) -> Self {
        self.cache_manager = Some(cache_manager);
        self
    }

    pub fn error_handler(mut self, error_handler: Arc<dyn ApiErrorHandler>) -> Self {
        self.error_handler = Some(error_handler);
        self
    }

    pub fn identity_manager(mut self, identity_manager: Arc<dyn IdentityManager>) -> Self {
        self.identity_manager = Some(identity_manager);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Fails when no runtime was given and the caller is not inside one.
    pub fn build(self) -> Result<FultonContext, HttpError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|e| HttpError::Build(format!("no tokio runtime available: {e}")))?,
        };

        Ok(FultonContext {
            inner: Arc::new(ContextInner {
                settings: self.settings.unwrap_or_default(),
                cache_manager: RwLock::new(
                    self.cache_manager
                        .unwrap_or_else(|| Arc::new(MemoryCacheManager::new())),
                ),
                error_handler: RwLock::new(
                    self.error_handler
                        .unwrap_or_else(|| Arc::new(LoggingErrorHandler)),
                ),
                identity_manager: RwLock::new(
                    self.identity_manager
                        .unwrap_or_else(|| Arc::new(MemoryIdentityManager::new())),
                ),
                transport: self
                    .transport
                    .unwrap_or_else(|| Arc::new(UreqTransport::new())),
                runtime,
            }),
        })
    }
}
