//! Envelope DTOs used by Fulton REST endpoints.
//!
//! # Design
//! Single-entity endpoints wrap their payload in `{ "data": T }`; list
//! endpoints add a `pagination` block next to `data`. Errors come back as
//! `{ "error": { "code": ..., "message": ... } }`. The generic wrappers
//! below replace runtime type composition: `ApiManyResult<T>` is the "list
//! of T" target type.

use serde::{Deserialize, Serialize};

/// `{ "data": T }` envelope returned by detail and create endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiOneResult<T> {
    pub data: T,
}

/// Page of entities returned by list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiManyResult<T> {
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub size: Option<u32>,
}

/// Error payload carried by Fulton error responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Tag {
        name: String,
    }

    #[test]
    fn many_result_without_pagination() {
        let page: ApiManyResult<Tag> =
            serde_json::from_str(r#"{"data":[{"name":"a"},{"name":"b"}]}"#).unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[1].name, "b");
        assert!(page.pagination.is_none());
    }

    #[test]
    fn many_result_with_partial_pagination() {
        let page: ApiManyResult<Tag> = serde_json::from_str(
            r#"{"data":[],"pagination":{"total":42,"index":0}}"#,
        )
        .unwrap();
        let pagination = page.pagination.unwrap();
        assert_eq!(pagination.total, Some(42));
        assert_eq!(pagination.index, Some(0));
        assert_eq!(pagination.size, None);
    }

    #[test]
    fn error_envelope_tolerates_missing_fields() {
        let env: ErrorEnvelope =
            serde_json::from_str(r#"{"error":{"message":"boom"}}"#).unwrap();
        assert_eq!(env.error.message.as_deref(), Some("boom"));
        assert!(env.error.code.is_none());
    }
}
