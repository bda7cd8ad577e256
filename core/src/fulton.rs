//! REST client for Fulton style APIs.
//!
//! Wraps `ApiClient` with bearer authentication taken from the context's
//! identity manager, and the list/detail/create/update/delete conventions:
//!
//! | call            | method | path         | result                  |
//! |-----------------|--------|--------------|-------------------------|
//! | `list`          | GET    | `/`          | `ApiManyResult<T>`      |
//! | `detail`        | GET    | `/{id}`      | `T` (from `{data: T}`)  |
//! | `create`        | POST   | `/`          | `T` (from `{data: T}`)  |
//! | `update`        | PUT    | `/{id}`      | `()`                    |
//! | `update_partial`| PUT    | `/{id}`      | `()`                    |
//! | `delete`        | DELETE | `/{id}`      | `()`                    |

use std::fmt::Display;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::client::{ApiClient, RequestInitializer};
use crate::context::FultonContext;
use crate::http::{Method, Request};
use crate::promise::ApiPromise;
use crate::query::QueryParams;
use crate::types::{ApiManyResult, ApiOneResult};

/// Adds `Authorization: <type> <token>` when the identity manager holds a
/// valid bearer token.
#[derive(Debug, Default, Clone, Copy)]
pub struct BearerTokenInitializer;

impl RequestInitializer for BearerTokenInitializer {
    fn init_request(&self, context: &FultonContext, request: &mut Request) {
        let identity = context.identity_manager();
        if !identity.is_valid() {
            return;
        }
        if let Some(token) = identity.token().filter(|t| t.is_bearer()) {
            request.headers("Authorization", token.authorization());
        }
    }
}

#[derive(Debug, Clone)]
pub struct FultonApiClient {
    api: ApiClient,
}

impl FultonApiClient {
    pub fn new(
        context: FultonContext,
        namespace: impl Into<String>,
        url_root: impl Into<String>,
    ) -> Self {
        let api = ApiClient::new(context, namespace, url_root)
            .with_initializer(Arc::new(BearerTokenInitializer));
        Self { api }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn context(&self) -> &FultonContext {
        self.api.context()
    }

    pub fn clean_cache(&self) {
        self.api.clean_cache();
    }

    /// Custom call with the client's root and credentials.
    pub fn request<T, F>(&self, configure: F) -> ApiPromise<T>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(&mut Request),
    {
        self.api.request(configure)
    }

    pub fn list<T, F>(
        &self,
        query_params: Option<QueryParams>,
        configure: F,
    ) -> ApiPromise<ApiManyResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(&mut Request),
    {
        self.api.request(move |req| {
            req.query_params = query_params;
            configure(req);
        })
    }

    /// Fetch one entity, unwrapping the `{data: T}` envelope.
    pub fn detail<T, F>(
        &self,
        id: impl Display,
        query_params: Option<QueryParams>,
        configure: F,
    ) -> ApiPromise<T>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(&mut Request),
    {
        let id = id.to_string();
        self.api
            .request::<ApiOneResult<T>, _>(move |req| {
                req.query_params = query_params;
                configure(req);
                req.paths([id]);
            })
            .map(|envelope| envelope.data)
    }

    /// Create an entity, unwrapping the `{data: T}` envelope of the reply.
    pub fn create<T, F>(&self, entity: &T, configure: F) -> ApiPromise<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(&mut Request),
    {
        self.api
            .request::<ApiOneResult<T>, _>(|req| {
                req.method(Method::Post).body(entity);
                configure(req);
            })
            .map(|envelope| envelope.data)
    }

    /// Replace an entity.
    pub fn update<T, F>(&self, id: impl Display, entity: &T, configure: F) -> ApiPromise<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce(&mut Request),
    {
        let id = id.to_string();
        self.api.request(|req| {
            req.method(Method::Put).body(entity);
            configure(req);
            req.paths([id]);
        })
    }

    /// Update only the given fields.
    pub fn update_partial<F>(
        &self,
        id: impl Display,
        fields: &Map<String, Value>,
        configure: F,
    ) -> ApiPromise<()>
    where
        F: FnOnce(&mut Request),
    {
        self.update(id, fields, configure)
    }

    pub fn delete<F>(&self, id: impl Display, configure: F) -> ApiPromise<()>
    where
        F: FnOnce(&mut Request),
    {
        let id = id.to_string();
        self.api.request(|req| {
            req.method(Method::Delete);
            configure(req);
            req.paths([id]);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AccessToken;

    fn context(rt: &tokio::runtime::Runtime) -> FultonContext {
        FultonContext::builder()
            .runtime(rt.handle().clone())
            .build()
            .unwrap()
    }

    #[test]
    fn no_token_no_authorization_header() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let client = FultonApiClient::new(context(&rt), "News", "http://api.fulton.com/news");
        let req = client.api().new_request();
        assert!(req.header("Authorization").is_none());
    }

    #[test]
    fn bearer_token_is_attached() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let ctx = context(&rt);
        ctx.identity_manager().set_token(AccessToken::bearer("abc"));
        let client = FultonApiClient::new(ctx, "News", "http://api.fulton.com/news");
        let req = client.api().new_request();
        assert_eq!(req.header("Authorization"), Some("bearer abc"));
    }

    #[test]
    fn non_bearer_token_is_ignored() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let ctx = context(&rt);
        ctx.identity_manager().set_token(AccessToken {
            access_token: "abc".to_string(),
            token_type: "mac".to_string(),
            expires_in: None,
        });
        let client = FultonApiClient::new(ctx, "News", "http://api.fulton.com/news");
        assert!(client.api().new_request().header("Authorization").is_none());
    }
}
