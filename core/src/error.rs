use serde::Serialize;
use utoipa::ToSchema;

/// JSON envelope for every non-2xx response.
///
/// `error` is one of [`codes`]; the optional fields point at the offending
/// input so a client can correct a single set or query parameter.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Stable code from [`codes`], e.g. "validation_failed" or "store_unavailable"
    pub error: String,
    pub message: String,
    /// Offending input path, e.g. "sets[2].set_number"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The rejected value, echoed back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Correlates the response with server logs
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const UNAUTHENTICATED: &str = "unauthenticated";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not_found";
    /// A concurrent write won and retries were exhausted
    pub const CONFLICT: &str = "conflict";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const STORE_UNAVAILABLE: &str = "store_unavailable";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn absent_context_fields_are_omitted() {
        let err = ApiError {
            error: codes::FORBIDDEN.to_string(),
            message: "no access".to_string(),
            field: None,
            received: None,
            request_id: "req-1".to_string(),
            docs_hint: None,
        };
        assert_eq!(
            serde_json::to_value(&err).expect("serialize"),
            json!({"error": "forbidden", "message": "no access", "request_id": "req-1"})
        );
    }
}
