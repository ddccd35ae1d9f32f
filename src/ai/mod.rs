//! Analysis backend abstraction: given statement text or raw file
//! bytes, return a structured analysis payload.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("AI returned empty response")]
    EmptyResponse,

    #[error("Failed to parse AI response as JSON")]
    MalformedResponse,

    #[error("Analysis request failed: {0}")]
    Request(String),

    #[error("Analysis API error: {0}")]
    Api(String),
}

/// Optional structured fields the backend may report about the
/// statement itself. All individually optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_bank: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
}

/// Opaque structured result returned by the analysis backend.
#[derive(Debug, Clone)]
pub struct StructuredAnalysis(serde_json::Value);

impl StructuredAnalysis {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Pull the optional `analysis_metadata` block out of the payload.
    /// Absent or unusable blocks yield `None`; unknown extra fields
    /// inside the block are ignored.
    pub fn metadata(&self) -> Option<AnalysisMetadata> {
        let block = self.0.get("analysis_metadata")?;
        serde_json::from_value(block.clone()).ok()
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Analyze extracted statement text.
    async fn analyze_text(&self, text: &str) -> Result<StructuredAnalysis, BackendError>;

    /// Analyze the raw uploaded file directly.
    async fn analyze_file(
        &self,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<StructuredAnalysis, BackendError>;
}
