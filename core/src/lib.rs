//! Client-side request layer for Fulton style REST APIs.
//!
//! # Overview
//! A caller describes a call by configuring a [`Request`] inside a closure,
//! gets back an [`ApiPromise`] immediately, and receives either a typed value
//! or a single [`ApiError`]. Between the two sit a response cache keyed by
//! `(namespace, url)`, a pluggable [`Transport`] and a global
//! [`ApiErrorHandler`] for failures nobody handled.
//!
//! # Design
//! - Shared collaborators live in an explicit [`FultonContext`] handed to
//!   every client, not in process-wide statics.
//! - The network round trip runs on a tokio blocking worker; promise
//!   continuations run on the context runtime, never on the caller's thread.
//! - `FultonApiClient` and `IdentityApiClient` add the Fulton conventions
//!   (query params, `{data}` envelopes, bearer tokens) on top of `ApiClient`.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod cache;
pub mod client;
pub mod context;
pub mod error;
pub mod fulton;
pub mod http;
pub mod identity;
pub mod promise;
pub mod query;
pub mod transport;
pub mod types;
pub mod url;

pub use cache::{CacheManager, DiskCacheManager, MemoryCacheManager, VoidCacheManager};
pub use client::{ApiClient, RequestInitializer};
pub use context::{ClientSettings, FultonContext, FultonContextBuilder};
pub use error::{ApiError, ApiErrorHandler, HttpError, LoggingErrorHandler, RequestSummary};
pub use fulton::{BearerTokenInitializer, FultonApiClient};
pub use http::{DataType, Method, Request, Response};
pub use identity::{
    AccessToken, ForgotPasswordResult, IdentityApiClient, IdentityManager, MemoryIdentityManager,
};
pub use promise::ApiPromise;
pub use query::{PageRequest, QueryParams, SortOrder};
pub use transport::{Transport, UreqTransport};
pub use types::{ApiManyResult, ApiOneResult, ErrorBody, ErrorEnvelope, Pagination};
