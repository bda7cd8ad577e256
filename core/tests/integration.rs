//! End-to-end calls against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives the clients over
//! real HTTP through `UreqTransport`. Validates URL building, envelopes,
//! caching, gzip decoding and the identity flow against the actual server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fulton_core::{
    ApiClient, FultonApiClient, FultonContext, HttpError, IdentityApiClient, Method, QueryParams,
    VoidCacheManager,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct News {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

impl News {
    fn new(title: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            content: String::new(),
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    username: String,
    email: String,
    #[serde(default)]
    display_name: Option<String>,
}

fn start_server() -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    addr
}

fn client_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn context(rt: &tokio::runtime::Runtime) -> FultonContext {
    FultonContext::builder()
        .runtime(rt.handle().clone())
        .build()
        .unwrap()
}

#[test]
fn news_crud_lifecycle() {
    let addr = start_server();
    let rt = client_runtime();
    let client = FultonApiClient::new(context(&rt), "NewsClient", format!("http://{addr}/api/news"));

    // list: empty
    let page = client.list::<News, _>(None, |_| {}).wait().unwrap();
    assert!(page.data.is_empty());
    assert_eq!(page.pagination.unwrap().total, Some(0));

    // create
    let created = client.create(&News::new("Integration test"), |_| {}).wait().unwrap();
    assert_eq!(created.title, "Integration test");
    let id = created.id.clone().unwrap();

    // detail
    let fetched: News = client.detail(&id, None, |_| {}).wait().unwrap();
    assert_eq!(fetched, created);

    // full update
    let mut replacement = created.clone();
    replacement.content = "body".to_string();
    replacement.tags = vec!["rust".to_string()];
    client.update(&id, &replacement, |_| {}).wait().unwrap();

    // partial update
    let mut fields = Map::new();
    fields.insert("title".to_string(), Value::from("Updated title"));
    client.update_partial(&id, &fields, |_| {}).wait().unwrap();

    let fetched: News = client.detail(&id, None, |_| {}).wait().unwrap();
    assert_eq!(fetched.title, "Updated title");
    assert_eq!(fetched.content, "body");
    assert_eq!(fetched.tags, vec!["rust"]);

    // tunneled PATCH
    client
        .request::<(), _>(|req| {
            req.method(Method::Patch)
                .paths([id.as_str()])
                .body(&json!({"content": "patched"}));
        })
        .wait()
        .unwrap();
    let fetched: News = client.detail(&id, None, |_| {}).wait().unwrap();
    assert_eq!(fetched.content, "patched");

    // delete
    client.delete(&id, |_| {}).wait().unwrap();

    // detail after delete: Fulton error, handled locally
    let err = client
        .detail::<News, _>(&id, None, |_| {})
        .fail(|e| e.set_handled(true))
        .wait()
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.message(), "news not found");
    assert!(err.is_handled());
}

#[test]
fn list_paginates_through_query_params() {
    let addr = start_server();
    let rt = client_runtime();
    let client = FultonApiClient::new(context(&rt), "NewsClient", format!("http://{addr}/api/news"));

    for i in 0..5 {
        client
            .create(&News::new(&format!("n{i}")), |_| {})
            .wait()
            .unwrap();
    }

    let mut params = QueryParams::default();
    params.page(1, 2);
    let page = client.list::<News, _>(Some(params), |_| {}).wait().unwrap();

    let titles: Vec<_> = page.data.iter().map(|n| n.title.as_str()).collect();
    assert_eq!(titles, vec!["n2", "n3"]);
    let pagination = page.pagination.unwrap();
    assert_eq!(pagination.total, Some(5));
    assert_eq!(pagination.index, Some(1));
    assert_eq!(pagination.size, Some(2));
}

#[test]
fn cached_get_does_not_reach_server() {
    let addr = start_server();
    let rt = client_runtime();
    let client = ApiClient::new(context(&rt), "HitsClient", format!("http://{addr}/api"));

    let cached = || {
        client
            .request::<String, _>(|req| {
                req.paths(["hits"]).cache(Duration::from_secs(60));
            })
            .wait()
            .unwrap()
    };
    assert_eq!(cached(), "1");
    assert_eq!(cached(), "1");

    let fresh = client
        .request::<String, _>(|req| {
            req.paths(["hits"]);
        })
        .wait()
        .unwrap();
    assert_eq!(fresh, "2");

    client.clean_cache();
    assert_eq!(cached(), "3");
}

#[test]
fn void_cache_always_reaches_server() {
    let addr = start_server();
    let rt = client_runtime();
    let ctx = context(&rt);
    ctx.set_cache_manager(Arc::new(VoidCacheManager));
    let client = ApiClient::new(ctx, "HitsClient", format!("http://{addr}/api"));

    for expected in ["1", "2"] {
        let hits = client
            .request::<String, _>(|req| {
                req.paths(["hits"]).cache(Duration::from_secs(60));
            })
            .wait()
            .unwrap();
        assert_eq!(hits, expected);
    }
}

#[test]
fn gzip_response_is_decoded() {
    let addr = start_server();
    let rt = client_runtime();
    let client = FultonApiClient::new(context(&rt), "GzipClient", format!("http://{addr}/api/gzip"));

    let page = client.list::<News, _>(None, |_| {}).wait().unwrap();
    assert_eq!(page.data.len(), 20);
    assert_eq!(page.data[0].title, "compressed 0");

    let page = client
        .list::<News, _>(None, |req| {
            req.gzip(false);
        })
        .wait()
        .unwrap();
    assert_eq!(page.data.len(), 20);
}

#[test]
fn identity_flow() {
    let addr = start_server();
    let rt = client_runtime();
    let ctx = context(&rt);
    let identity = IdentityApiClient::<User>::new(ctx.clone(), format!("http://{addr}/auth"));

    // anonymous profile is rejected
    let err = identity
        .profile()
        .fail(|e| e.set_handled(true))
        .wait()
        .unwrap_err();
    assert_eq!(err.status(), Some(401));

    // sign up stores the token
    let token = identity.sign_up("ada", "ada@example.com", "pw").wait().unwrap();
    assert!(token.is_bearer());
    assert_eq!(ctx.identity_manager().token(), Some(token.clone()));
    assert!(ctx.identity_manager().is_valid());

    let user = identity.profile().wait().unwrap();
    assert_eq!(user.username, "ada");

    let mut changed = user.clone();
    changed.display_name = Some("Ada L.".to_string());
    identity.update_profile(&changed).wait().unwrap();
    assert_eq!(identity.profile().wait().unwrap(), changed);

    identity.change_password("pw", "pw2").wait().unwrap();

    let reset = identity.forgot_password("ada@example.com").wait().unwrap();
    assert!(!reset.token.is_empty());

    // sign out clears the local token
    identity.sign_out().wait().unwrap();
    assert!(ctx.identity_manager().token().is_none());

    // the old password no longer works, the new one does
    let err = identity
        .sign_in("ada", "pw")
        .fail(|e| e.set_handled(true))
        .wait()
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(ctx.identity_manager().token().is_none());

    identity.sign_in("ada", "pw2").wait().unwrap();
    assert!(ctx.identity_manager().is_valid());
    assert_eq!(identity.profile().wait().unwrap().display_name.as_deref(), Some("Ada L."));
}

#[test]
fn refused_connection_rejects_with_connection_error() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let rt = client_runtime();
    let client = ApiClient::new(context(&rt), "Offline", format!("http://127.0.0.1:{port}"));

    let err = client
        .request::<(), _>(|req| {
            req.paths(["anything"])
                .timeouts(Duration::from_secs(2), Duration::from_secs(2));
        })
        .fail(|e| e.set_handled(true))
        .wait()
        .unwrap_err();

    assert!(
        matches!(err.cause(), HttpError::Connection(_) | HttpError::Timeout),
        "unexpected error: {err:?}"
    );
    assert!(err.response().is_none());
}

#[test]
fn oauth_sign_in_stores_provider_token() {
    let addr = start_server();
    let rt = client_runtime();
    let ctx = context(&rt);
    let identity = IdentityApiClient::<User>::new(ctx.clone(), format!("http://{addr}/auth"));

    let google = identity.google_sign_in("g-code").wait().unwrap();
    assert_eq!(ctx.identity_manager().token(), Some(google));
    assert_eq!(identity.profile().wait().unwrap().username, "google:g-code");

    let facebook = identity.facebook_sign_in("fb token").wait().unwrap();
    assert_eq!(ctx.identity_manager().token(), Some(facebook));
    assert_eq!(identity.profile().wait().unwrap().username, "facebook:fb token");

    identity
        .oauth_sign_in("github", &[("code", "gh&1")])
        .wait()
        .unwrap();
    assert_eq!(identity.profile().wait().unwrap().username, "github:gh&1");

    // a rejected callback leaves the previous token in place
    let before = ctx.identity_manager().token();
    let err = identity
        .oauth_sign_in("github", &[("state", "x")])
        .fail(|e| e.set_handled(true))
        .wait()
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.message(), "missing code");
    assert_eq!(ctx.identity_manager().token(), before);
}

#[test]
fn password_reset_flow() {
    let addr = start_server();
    let rt = client_runtime();
    let ctx = context(&rt);
    let identity = IdentityApiClient::<User>::new(ctx.clone(), format!("http://{addr}/auth"));

    identity.sign_up("grace", "grace@example.com", "old").wait().unwrap();
    identity.sign_out().wait().unwrap();

    let reset = identity.forgot_password("grace@example.com").wait().unwrap();

    let err = identity
        .verify_reset_password_code(&reset.token, "000000")
        .fail(|e| e.set_handled(true))
        .wait()
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.message(), "reset code isn't valid");

    identity
        .verify_reset_password_code(&reset.token, mock_server::RESET_CODE)
        .wait()
        .unwrap();
    identity
        .reset_password(&reset.token, mock_server::RESET_CODE, "new")
        .wait()
        .unwrap();

    assert!(ctx.identity_manager().token().is_none());
    identity.sign_in("grace", "new").wait().unwrap();
    assert!(ctx.identity_manager().is_valid());
}

#[test]
fn oversized_body_fails_the_call() {
    let addr = start_server();
    let rt = client_runtime();
    let client = FultonApiClient::new(context(&rt), "GzipClient", format!("http://{addr}/api/gzip"));

    let err = client
        .list::<News, _>(None, |req| {
            req.max_body(64);
        })
        .fail(|e| e.set_handled(true))
        .wait()
        .unwrap_err();

    assert!(matches!(err.cause(), HttpError::Other(_)), "unexpected error: {err:?}");
    assert_eq!(err.message(), "response body exceeds 64 bytes");
}
