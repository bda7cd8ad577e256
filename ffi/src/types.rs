//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! The client handle is opaque. Everything a C caller reads is plain data:
//! `*mut c_char` instead of `String`, explicit enum discriminants, and one
//! `FfiApiResult` envelope for every call outcome. Conversion functions
//! live here to keep `lib.rs` focused on the `extern "C"` surface.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;

use fulton_core::{ApiError, FultonApiClient, HttpError, Method};
use tokio::runtime::Runtime;

/// Opaque handle to a `FultonApiClient` together with the runtime its
/// calls run on. C callers receive a pointer to this and pass it back into
/// every FFI function.
pub struct FfiFultonClient {
    pub(crate) runtime: Runtime,
    pub(crate) client: FultonApiClient,
}

/// HTTP method as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Patch = 3,
    Delete = 4,
}

impl From<FfiHttpMethod> for Method {
    fn from(m: FfiHttpMethod) -> Self {
        match m {
            FfiHttpMethod::Get => Method::Get,
            FfiHttpMethod::Post => Method::Post,
            FfiHttpMethod::Put => Method::Put,
            FfiHttpMethod::Patch => Method::Patch,
            FfiHttpMethod::Delete => Method::Delete,
        }
    }
}

/// Error codes returned in `FfiApiResult`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    InvalidRequest = 1,
    Connection = 2,
    Timeout = 3,
    Http = 4,
    Decode = 5,
    Serialization = 6,
    Other = 7,
    Panic = 8,
    NullArg = 9,
}

impl From<&HttpError> for FfiErrorCode {
    fn from(err: &HttpError) -> Self {
        match err {
            HttpError::InvalidRequest(_) => FfiErrorCode::InvalidRequest,
            HttpError::Connection(_) => FfiErrorCode::Connection,
            HttpError::Timeout => FfiErrorCode::Timeout,
            HttpError::Status { .. } => FfiErrorCode::Http,
            HttpError::Decode(_) => FfiErrorCode::Decode,
            HttpError::Serialization(_) => FfiErrorCode::Serialization,
            HttpError::Build(_) | HttpError::Other(_) => FfiErrorCode::Other,
        }
    }
}

/// Outcome of a call.
///
/// On success `error_code` is `Ok`, `error_message` is null and `body`
/// holds the response text (null when the response had none).
/// On failure `error_code` describes the category, `error_message` is a
/// human-readable C string, `http_status` is set when a response arrived,
/// and `body` holds the raw error body if there was one.
#[repr(C)]
pub struct FfiApiResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub http_status: u16,
    pub body: *mut c_char,
}

/// Callback receiving the result of `fulton_request`. Ownership of the
/// result passes to the callee, which frees it with `fulton_free_result`.
pub type FfiCallback = extern "C" fn(user_data: *mut c_void, result: *mut FfiApiResult);

/// Caller context handed back to the callback on a runtime thread.
pub(crate) struct UserData(*mut c_void);

// The pointer is only handed back to the caller, never dereferenced here.
unsafe impl Send for UserData {}

impl UserData {
    pub(crate) fn new(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub(crate) fn into_inner(self) -> *mut c_void {
        self.0
    }
}

/// Copy `s` into a C string owned by the caller. Interior NULs are dropped.
pub(crate) fn to_c_string(s: &str) -> *mut c_char {
    CString::new(s.replace('\0', ""))
        .unwrap_or_default()
        .into_raw()
}

fn optional_c_string(s: &str) -> *mut c_char {
    if s.is_empty() {
        std::ptr::null_mut()
    } else {
        to_c_string(s)
    }
}

impl FfiApiResult {
    fn boxed(self) -> *mut Self {
        Box::into_raw(Box::new(self))
    }

    pub(crate) fn ok(body: &str) -> *mut Self {
        FfiApiResult {
            error_code: FfiErrorCode::Ok,
            error_message: std::ptr::null_mut(),
            http_status: 0,
            body: optional_c_string(body),
        }
        .boxed()
    }

    pub(crate) fn from_error(err: &ApiError) -> *mut Self {
        let body = err
            .response()
            .map(|response| optional_c_string(&response.text()))
            .unwrap_or(std::ptr::null_mut());
        FfiApiResult {
            error_code: err.cause().into(),
            error_message: to_c_string(&err.message()),
            http_status: err.status().unwrap_or(0),
            body,
        }
        .boxed()
    }

    pub(crate) fn from_result(result: Result<String, ApiError>) -> *mut Self {
        match result {
            Ok(body) => Self::ok(&body),
            Err(err) => Self::from_error(&err),
        }
    }

    pub(crate) fn failure(code: FfiErrorCode, msg: &str) -> *mut Self {
        FfiApiResult {
            error_code: code,
            error_message: to_c_string(msg),
            http_status: 0,
            body: std::ptr::null_mut(),
        }
        .boxed()
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::failure(FfiErrorCode::NullArg, &format!("null argument: {name}"))
    }

    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::failure(FfiErrorCode::Panic, msg)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CStr;

    use super::*;

    fn free(result: *mut FfiApiResult) {
        crate::fulton_free_result(result);
    }

    #[test]
    fn method_maps_to_core() {
        assert_eq!(Method::from(FfiHttpMethod::Patch), Method::Patch);
        assert_eq!(Method::from(FfiHttpMethod::Delete), Method::Delete);
    }

    #[test]
    fn error_codes_follow_cause() {
        assert_eq!(FfiErrorCode::from(&HttpError::Timeout), FfiErrorCode::Timeout);
        let status = HttpError::Status {
            status: 404,
            message: "missing".to_string(),
        };
        assert_eq!(FfiErrorCode::from(&status), FfiErrorCode::Http);
    }

    #[test]
    fn interior_nul_is_dropped() {
        let ptr = to_c_string("a\0b");
        let s = unsafe { CString::from_raw(ptr) };
        assert_eq!(s.to_str().unwrap(), "ab");
    }

    #[test]
    fn ok_result_with_empty_body_has_null_body() {
        let result = FfiApiResult::ok("");
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::Ok);
        assert!(r.body.is_null());
        assert!(r.error_message.is_null());
        free(result);
    }

    #[test]
    fn error_result_carries_message() {
        let result = FfiApiResult::from_error(&ApiError::other("boom"));
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::Other);
        assert_eq!(r.http_status, 0);
        let msg = unsafe { CStr::from_ptr(r.error_message) }.to_str().unwrap();
        assert_eq!(msg, "boom");
        free(result);
    }
}
