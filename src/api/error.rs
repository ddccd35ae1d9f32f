use serde::Serialize;

/// Standard error body shared by every failing endpoint.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub fields: serde_json::Value,
}
