//! C-ABI wrapper around `fulton-core`.
//!
//! # Overview
//! Exposes `FultonApiClient` through `extern "C"` functions so any language
//! with a C FFI can issue calls, manage the bearer token and the cache
//! without linking to Rust's async runtime or serde directly.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Each client handle owns a multi-threaded tokio runtime; calls run
//!   there and callbacks fire on one of its threads.
//! - Results come back as text in one `FfiApiResult` envelope. Decoding the
//!   JSON is left to the caller. Errors delivered this way are marked
//!   handled, so the core's global error handler never sees them.
//! - The C caller owns all returned pointers and must call the matching
//!   `fulton_free_*` function to release them.

pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use fulton_core::{AccessToken, ApiPromise, ClientSettings, FultonApiClient, FultonContext};

use types::*;

const DEFAULT_NAMESPACE: &str = "FultonFfi";

/// Read a C string argument. `None` for null or invalid UTF-8.
fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client rooted at `url_root`. `namespace` scopes its cache
/// entries and may be null.
///
/// Settings come from the `FULTON_*` environment variables.
/// Returns null if `url_root` is null, the runtime cannot start, or an
/// internal panic occurs. Free with `fulton_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn fulton_client_new(
    url_root: *const c_char,
    namespace: *const c_char,
) -> *mut FfiFultonClient {
    catch_unwind(|| {
        let Some(url_root) = read_str(url_root) else {
            return std::ptr::null_mut();
        };
        let namespace = read_str(namespace).unwrap_or(DEFAULT_NAMESPACE);

        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .thread_name("fulton-ffi")
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!("Failed to start runtime: {}", err);
                return std::ptr::null_mut();
            }
        };
        let context = match FultonContext::builder()
            .settings(ClientSettings::from_env())
            .runtime(runtime.handle().clone())
            .build()
        {
            Ok(context) => context,
            Err(err) => {
                tracing::error!("Failed to build context: {}", err);
                return std::ptr::null_mut();
            }
        };

        let client = FultonApiClient::new(context, namespace, url_root);
        Box::into_raw(Box::new(FfiFultonClient { runtime, client }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client created by `fulton_client_new`. Safe to call with null.
/// Calls still in flight are cancelled; their callbacks never fire.
#[unsafe(no_mangle)]
pub extern "C" fn fulton_client_free(client: *mut FfiFultonClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let FfiFultonClient { runtime, client } = *unsafe { Box::from_raw(client) };
            drop(client);
            runtime.shutdown_background();
        }));
    }
}

/// Store a token used as `Authorization` on subsequent calls. A null
/// `token_type` means `bearer`. Returns false on a null argument.
#[unsafe(no_mangle)]
pub extern "C" fn fulton_client_set_token(
    client: *const FfiFultonClient,
    access_token: *const c_char,
    token_type: *const c_char,
) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return false;
        }
        let Some(access_token) = read_str(access_token) else {
            return false;
        };
        let client = unsafe { &*client };
        let mut token = AccessToken::bearer(access_token);
        if let Some(token_type) = read_str(token_type) {
            token.token_type = token_type.to_string();
        }
        client.client.context().identity_manager().set_token(token);
        true
    }))
    .unwrap_or(false)
}

/// Forget the stored token. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn fulton_client_clear_token(client: *const FfiFultonClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let client = unsafe { &*client };
            client.client.context().identity_manager().clear();
        }));
    }
}

/// Drop every cached response of this client. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn fulton_client_clean_cache(client: *const FfiFultonClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let client = unsafe { &*client };
            client.client.clean_cache();
        }));
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// Configure and issue a call. `Err` carries a ready-made failure result.
fn start(
    client: &FfiFultonClient,
    method: FfiHttpMethod,
    path: *const c_char,
    body: *const c_char,
    cache_ms: u64,
) -> Result<ApiPromise<String>, *mut FfiApiResult> {
    let path = read_str(path);
    let body = match read_str(body) {
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                return Err(FfiApiResult::failure(
                    FfiErrorCode::Serialization,
                    &format!("body is not valid JSON: {err}"),
                ));
            }
        },
        None => None,
    };

    let promise = client.client.request::<String, _>(|req| {
        req.method(method.into())
            .cache(Duration::from_millis(cache_ms));
        if let Some(path) = path {
            req.paths([path]);
        }
        if let Some(body) = &body {
            req.body(body);
        }
    });
    Ok(promise.fail(|err| err.set_handled(true)))
}

/// Issue a call without blocking. `path` (relative to the client's root)
/// and `body` (a JSON document) may be null; `cache_ms` of 0 disables
/// caching.
///
/// `callback` receives `user_data` and the result on a runtime thread and
/// owns the result. Returns `Ok` when the call was dispatched, `NullArg`
/// when `client` or `callback` is null (the callback is then never called),
/// and `Serialization` for a malformed body (the callback still receives
/// the failure).
#[unsafe(no_mangle)]
pub extern "C" fn fulton_request(
    client: *const FfiFultonClient,
    method: FfiHttpMethod,
    path: *const c_char,
    body: *const c_char,
    cache_ms: u64,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
) -> FfiErrorCode {
    let user_data = UserData::new(user_data);
    catch_unwind(AssertUnwindSafe(|| {
        let Some(callback) = callback else {
            return FfiErrorCode::NullArg;
        };
        if client.is_null() {
            return FfiErrorCode::NullArg;
        }
        let client = unsafe { &*client };

        match start(client, method, path, body, cache_ms) {
            Ok(promise) => {
                client.runtime.spawn(async move {
                    let result = FfiApiResult::from_result(promise.await);
                    callback(user_data.into_inner(), result);
                });
                FfiErrorCode::Ok
            }
            Err(failure) => {
                callback(user_data.into_inner(), failure);
                FfiErrorCode::Serialization
            }
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Issue a call and block until it settles. Same arguments as
/// `fulton_request`. Must not be called from a callback.
///
/// Never returns null. Free with `fulton_free_result`.
#[unsafe(no_mangle)]
pub extern "C" fn fulton_request_blocking(
    client: *const FfiFultonClient,
    method: FfiHttpMethod,
    path: *const c_char,
    body: *const c_char,
    cache_ms: u64,
) -> *mut FfiApiResult {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiApiResult::null_arg("client");
        }
        let client = unsafe { &*client };
        match start(client, method, path, body, cache_ms) {
            Ok(promise) => FfiApiResult::from_result(promise.wait()),
            Err(failure) => failure,
        }
    }))
    .unwrap_or_else(|_| FfiApiResult::panic("panic in fulton_request_blocking"))
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiApiResult`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn fulton_free_result(result: *mut FfiApiResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let result = unsafe { Box::from_raw(result) };
        if !result.error_message.is_null() {
            drop(unsafe { CString::from_raw(result.error_message) });
        }
        if !result.body.is_null() {
            drop(unsafe { CString::from_raw(result.body) });
        }
    });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn fulton_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
