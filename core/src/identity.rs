//! Identity: access tokens, the token store and the account endpoints.
//!
//! # Design
//! `IdentityManager` is the opaque token provider the REST client reads
//! before every call. The in-memory implementation tracks when a token was
//! stored so `expires_in` can be honored. `IdentityApiClient` talks to the
//! Fulton identity endpoints and keeps the manager in sync: a successful
//! sign-in or sign-up stores the returned token, sign-out clears it.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::FultonContext;
use crate::fulton::FultonApiClient;
use crate::http::Method;
use crate::promise::ApiPromise;
use crate::types::ApiOneResult;

/// OAuth style token returned by sign-in endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl AccessToken {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in: None,
        }
    }

    pub fn is_bearer(&self) -> bool {
        self.token_type.eq_ignore_ascii_case("bearer")
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

pub trait IdentityManager: Send + Sync + fmt::Debug {
    fn token(&self) -> Option<AccessToken>;

    fn set_token(&self, token: AccessToken);

    fn clear(&self);

    fn is_valid(&self) -> bool {
        self.token().is_some()
    }
}

#[derive(Debug)]
struct StoredToken {
    token: AccessToken,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct MemoryIdentityManager {
    state: RwLock<Option<StoredToken>>,
}

impl MemoryIdentityManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityManager for MemoryIdentityManager {
    fn token(&self) -> Option<AccessToken> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.as_ref().map(|stored| stored.token.clone())
    }

    fn set_token(&self, token: AccessToken) {
        let expires_at = token
            .expires_in
            .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs)));
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = Some(StoredToken { token, expires_at });
    }

    fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = None;
    }

    fn is_valid(&self) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match state.as_ref() {
            Some(stored) => stored
                .expires_at
                .is_none_or(|expires_at| Instant::now() < expires_at),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgotPasswordResult {
    pub token: String,
}

/// Client for the account endpoints (`login`, `register`, `profile`...).
/// `U` is the application's user type.
#[derive(Debug, Clone)]
pub struct IdentityApiClient<U> {
    client: FultonApiClient,
    _user: PhantomData<fn() -> U>,
}

impl<U> IdentityApiClient<U>
where
    U: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(context: FultonContext, url_root: impl Into<String>) -> Self {
        Self {
            client: FultonApiClient::new(context, "IdentityApiClient", url_root),
            _user: PhantomData,
        }
    }

    pub fn client(&self) -> &FultonApiClient {
        &self.client
    }

    fn remember_token(&self, promise: ApiPromise<AccessToken>) -> ApiPromise<AccessToken> {
        let identity = self.client.context().identity_manager();
        promise.success(move |token| identity.set_token(token.clone()))
    }

    pub fn sign_in(&self, username: &str, password: &str) -> ApiPromise<AccessToken> {
        let promise = self.client.request(|req| {
            req.method(Method::Post)
                .paths(["login"])
                .body(&json!({ "username": username, "password": password }));
        });
        self.remember_token(promise)
    }

    pub fn sign_up(&self, username: &str, email: &str, password: &str) -> ApiPromise<AccessToken> {
        let promise = self.client.request(|req| {
            req.method(Method::Post).paths(["register"]).body(&json!({
                "username": username,
                "email": email,
                "password": password,
            }));
        });
        self.remember_token(promise)
    }

    pub fn google_sign_in(&self, code: &str) -> ApiPromise<AccessToken> {
        let promise = self.client.request(|req| {
            req.paths(["google/callback"])
                .query("code", code)
                .query("noRedirectUrl", true);
        });
        self.remember_token(promise)
    }

    pub fn facebook_sign_in(&self, access_token: &str) -> ApiPromise<AccessToken> {
        let promise = self.client.request(|req| {
            req.paths(["facebook/callback"])
                .query("access_token", access_token);
        });
        self.remember_token(promise)
    }

    /// Sign in through any OAuth provider callback, e.g. `github`.
    pub fn oauth_sign_in(&self, provider: &str, params: &[(&str, &str)]) -> ApiPromise<AccessToken> {
        let promise = self.client.request(|req| {
            req.paths([format!("{provider}/callback")]);
            for (key, value) in params {
                req.query(*key, value);
            }
        });
        self.remember_token(promise)
    }

    pub fn profile(&self) -> ApiPromise<U> {
        self.client.request(|req| {
            req.paths(["profile"]);
        })
    }

    pub fn update_profile(&self, user: &U) -> ApiPromise<()> {
        self.client.request(|req| {
            req.method(Method::Post)
                .paths(["profile"])
                .body(&ApiOneResult { data: user });
        })
    }

    pub fn forgot_password(&self, email: &str) -> ApiPromise<ForgotPasswordResult> {
        self.client
            .request::<ApiOneResult<ForgotPasswordResult>, _>(|req| {
                req.method(Method::Post)
                    .paths(["forgot-password"])
                    .body(&json!({ "email": email }));
            })
            .map(|envelope| envelope.data)
    }

    pub fn verify_reset_password_code(&self, token: &str, code: &str) -> ApiPromise<()> {
        self.client.request(|req| {
            req.method(Method::Post)
                .paths(["verify-reset-password"])
                .body(&json!({ "token": token, "code": code }));
        })
    }

    pub fn reset_password(&self, token: &str, code: &str, password: &str) -> ApiPromise<()> {
        self.client.request(|req| {
            req.method(Method::Post)
                .paths(["reset-password"])
                .body(&json!({ "token": token, "code": code, "password": password }));
        })
    }

    pub fn change_password(&self, old_password: &str, new_password: &str) -> ApiPromise<()> {
        self.client.request(|req| {
            req.method(Method::Post)
                .paths(["change-password"])
                .body(&json!({ "oldPassword": old_password, "newPassword": new_password }));
        })
    }

    /// Sign out on the server. The local token is dropped whatever the
    /// outcome.
    pub fn sign_out(&self) -> ApiPromise<()> {
        let identity = self.client.context().identity_manager();
        self.client
            .request(|req| {
                req.paths(["logout"]);
            })
            .always(move || identity.clear())
    }
}
