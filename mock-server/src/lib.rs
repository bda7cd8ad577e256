//! In-memory Fulton style API used by the client's integration tests.
//!
//! # Design
//! One `AppState` holds every collection behind `tokio::sync::RwLock`s.
//! Payloads follow the Fulton conventions: entities wrapped in `{data}`,
//! lists with a `pagination` block, errors as `{error: {code, message}}`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use uuid::Uuid;

pub const TOKEN_TTL_SECS: u64 = 3600;

/// Code every password reset is confirmed with.
pub const RESET_CODE: &str = "424242";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct News {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Deserialize)]
pub struct CreateNews {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Body of `PUT` and overridden `PATCH`. Absent fields keep their value.
#[derive(Deserialize)]
pub struct NewsChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Serialize, Deserialize)]
pub struct One<T> {
    pub data: T,
}

#[derive(Serialize, Deserialize)]
pub struct Many<T> {
    pub data: Vec<T>,
    pub pagination: Page,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Page {
    pub total: usize,
    pub index: usize,
    pub size: usize,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "pagination[index]")]
    pub index: Option<usize>,
    #[serde(rename = "pagination[size]")]
    pub size: Option<usize>,
}

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct Registration {
    username: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct ForgotPassword {
    email: String,
}

#[derive(Deserialize)]
struct ResetCode {
    token: String,
    code: String,
}

#[derive(Deserialize)]
struct ResetPassword {
    token: String,
    code: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePassword {
    old_password: String,
    new_password: String,
}

struct Account {
    profile: Profile,
    password: String,
}

#[derive(Clone, Default)]
pub struct AppState {
    news: Arc<RwLock<Vec<News>>>,
    accounts: Arc<RwLock<HashMap<String, Account>>>,
    tokens: Arc<RwLock<HashMap<String, String>>>,
    // reset token -> username
    resets: Arc<RwLock<HashMap<String, String>>>,
    hits: Arc<AtomicU64>,
}

/// Fulton error payload with its status code.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "invalid or missing token")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

pub fn app() -> Router {
    Router::new()
        .route("/api/news", get(list_news).post(create_news))
        .route(
            "/api/news/{id}",
            get(get_news)
                .put(update_news)
                .post(patch_news)
                .delete(delete_news),
        )
        .route("/api/hits", get(hits))
        .route("/api/gzip", get(gzip_news).layer(CompressionLayer::new()))
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/profile", get(profile).post(update_profile))
        .route("/auth/logout", get(logout))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/verify-reset-password", post(verify_reset_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/{provider}/callback", get(oauth_callback))
        .route("/auth/change-password", post(change_password))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::default())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_news(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Json<Many<News>> {
    let news = state.news.read().await;
    let total = news.len();
    let size = query.size.unwrap_or(total.max(1));
    let index = query.index.unwrap_or(0);
    let data = news.iter().skip(index.saturating_mul(size)).take(size).cloned().collect();
    Json(Many {
        data,
        pagination: Page { total, index, size },
    })
}

async fn create_news(
    State(state): State<AppState>,
    Json(input): Json<CreateNews>,
) -> (StatusCode, Json<One<News>>) {
    let news = News {
        id: Uuid::new_v4(),
        title: input.title,
        content: input.content,
        tags: input.tags,
    };
    state.news.write().await.push(news.clone());
    (StatusCode::CREATED, Json(One { data: news }))
}

async fn get_news(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<One<News>>, AppError> {
    let news = state.news.read().await;
    news.iter()
        .find(|n| n.id == id)
        .cloned()
        .map(|data| Json(One { data }))
        .ok_or_else(|| AppError::not_found("news"))
}

async fn apply_changes(state: &AppState, id: Uuid, changes: NewsChanges) -> Result<News, AppError> {
    let mut news = state.news.write().await;
    let entry = news
        .iter_mut()
        .find(|n| n.id == id)
        .ok_or_else(|| AppError::not_found("news"))?;
    if let Some(title) = changes.title {
        entry.title = title;
    }
    if let Some(content) = changes.content {
        entry.content = content;
    }
    if let Some(tags) = changes.tags {
        entry.tags = tags;
    }
    Ok(entry.clone())
}

async fn update_news(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<NewsChanges>,
) -> Result<Json<One<News>>, AppError> {
    let data = apply_changes(&state, id, changes).await?;
    Ok(Json(One { data }))
}

/// `POST /api/news/{id}` is only accepted as a tunneled `PATCH`.
async fn patch_news(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(changes): Json<NewsChanges>,
) -> Result<Json<One<News>>, AppError> {
    let is_patch = headers
        .get("x-http-method-override")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("PATCH"));
    if !is_patch {
        return Err(AppError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "POST on an entity requires X-HTTP-Method-Override: PATCH",
        ));
    }
    let data = apply_changes(&state, id, changes).await?;
    Ok(Json(One { data }))
}

async fn delete_news(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let mut news = state.news.write().await;
    let before = news.len();
    news.retain(|n| n.id != id);
    if news.len() == before {
        return Err(AppError::not_found("news"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Counts its own requests; lets clients observe whether a call reached
/// the server.
async fn hits(State(state): State<AppState>) -> String {
    (state.hits.fetch_add(1, Ordering::SeqCst) + 1).to_string()
}

async fn gzip_news() -> Json<Many<News>> {
    let data: Vec<News> = (0..20)
        .map(|i| News {
            id: Uuid::nil(),
            title: format!("compressed {i}"),
            content: "the same sentence repeated compresses well. ".repeat(4),
            tags: vec!["gzip".to_string()],
        })
        .collect();
    let total = data.len();
    Json(Many {
        data,
        pagination: Page {
            total,
            index: 0,
            size: total,
        },
    })
}

async fn issue_token(state: &AppState, username: &str) -> Token {
    let access_token = Uuid::new_v4().simple().to_string();
    state
        .tokens
        .write()
        .await
        .insert(access_token.clone(), username.to_string());
    Token {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: TOKEN_TTL_SECS,
    }
}

async fn login(
    State(state): State<AppState>,
    Json(input): Json<Credentials>,
) -> Result<Json<Token>, AppError> {
    let valid = state
        .accounts
        .read()
        .await
        .get(&input.username)
        .is_some_and(|account| account.password == input.password);
    if !valid {
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "username or password isn't correct",
        ));
    }
    Ok(Json(issue_token(&state, &input.username).await))
}

async fn register(
    State(state): State<AppState>,
    Json(input): Json<Registration>,
) -> Result<(StatusCode, Json<Token>), AppError> {
    {
        let mut accounts = state.accounts.write().await;
        if accounts.contains_key(&input.username) {
            return Err(AppError::new(
                StatusCode::BAD_REQUEST,
                "existing_user",
                "the username is taken",
            ));
        }
        accounts.insert(
            input.username.clone(),
            Account {
                profile: Profile {
                    username: input.username.clone(),
                    email: input.email,
                    display_name: None,
                },
                password: input.password,
            },
        );
    }
    let token = issue_token(&state, &input.username).await;
    Ok((StatusCode::CREATED, Json(token)))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim().to_string())
}

/// Username owning the request's bearer token.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    let token = bearer_token(headers).ok_or_else(AppError::unauthorized)?;
    state
        .tokens
        .read()
        .await
        .get(&token)
        .cloned()
        .ok_or_else(AppError::unauthorized)
}

async fn profile(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Profile>, AppError> {
    let username = authenticate(&state, &headers).await?;
    state
        .accounts
        .read()
        .await
        .get(&username)
        .map(|account| Json(account.profile.clone()))
        .ok_or_else(|| AppError::not_found("user"))
}

async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<One<Profile>>,
) -> Result<StatusCode, AppError> {
    let username = authenticate(&state, &headers).await?;
    let mut accounts = state.accounts.write().await;
    let account = accounts
        .get_mut(&username)
        .ok_or_else(|| AppError::not_found("user"))?;
    account.profile.email = input.data.email;
    account.profile.display_name = input.data.display_name;
    Ok(StatusCode::NO_CONTENT)
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, AppError> {
    let token = bearer_token(&headers).ok_or_else(AppError::unauthorized)?;
    match state.tokens.write().await.remove(&token) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(AppError::unauthorized()),
    }
}

async fn forgot_password(
    State(state): State<AppState>,
    Json(input): Json<ForgotPassword>,
) -> Result<Json<One<serde_json::Value>>, AppError> {
    let username = state
        .accounts
        .read()
        .await
        .values()
        .find(|account| account.profile.email == input.email)
        .map(|account| account.profile.username.clone())
        .ok_or_else(|| AppError::not_found("email"))?;
    let token = Uuid::new_v4().simple().to_string();
    state.resets.write().await.insert(token.clone(), username);
    Ok(Json(One {
        data: serde_json::json!({ "token": token }),
    }))
}

/// Username behind a reset token, provided `code` matches.
async fn check_reset(state: &AppState, token: &str, code: &str) -> Result<String, AppError> {
    let username = state.resets.read().await.get(token).cloned();
    match username {
        Some(username) if code == RESET_CODE => Ok(username),
        _ => Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid_reset_code",
            "reset code isn't valid",
        )),
    }
}

async fn verify_reset_password(
    State(state): State<AppState>,
    Json(input): Json<ResetCode>,
) -> Result<StatusCode, AppError> {
    check_reset(&state, &input.token, &input.code).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_password(
    State(state): State<AppState>,
    Json(input): Json<ResetPassword>,
) -> Result<StatusCode, AppError> {
    let username = check_reset(&state, &input.token, &input.code).await?;
    state.resets.write().await.remove(&input.token);
    let mut accounts = state.accounts.write().await;
    let account = accounts
        .get_mut(&username)
        .ok_or_else(|| AppError::not_found("user"))?;
    account.password = input.password;
    Ok(StatusCode::NO_CONTENT)
}

/// OAuth callback. Facebook sends `access_token`, every other provider a
/// `code`; Google must also ask for `noRedirectUrl=true`. The account
/// `{provider}:{credential}` is created on first sign-in.
async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Token>, AppError> {
    let key = if provider == "facebook" { "access_token" } else { "code" };
    let credential = params.get(key).ok_or_else(|| {
        AppError::new(StatusCode::BAD_REQUEST, "invalid_request", format!("missing {key}"))
    })?;
    if provider == "google" && params.get("noRedirectUrl").map(String::as_str) != Some("true") {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "noRedirectUrl must be true",
        ));
    }

    let username = format!("{provider}:{credential}");
    state
        .accounts
        .write()
        .await
        .entry(username.clone())
        .or_insert_with(|| Account {
            profile: Profile {
                username: username.clone(),
                email: format!("{credential}@{provider}.example"),
                display_name: None,
            },
            password: String::new(),
        });
    Ok(Json(issue_token(&state, &username).await))
}

async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<ChangePassword>,
) -> Result<StatusCode, AppError> {
    let username = authenticate(&state, &headers).await?;
    let mut accounts = state.accounts.write().await;
    let account = accounts
        .get_mut(&username)
        .ok_or_else(|| AppError::not_found("user"))?;
    if account.password != input.old_password {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid_password",
            "old password isn't correct",
        ));
    }
    account.password = input.new_password;
    Ok(StatusCode::NO_CONTENT)
}
