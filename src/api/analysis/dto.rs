use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::{FileType, JobRecord, JobStatus};

/// Response for a submitted analysis; the caller polls by code.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub message: String,
    pub code: String,
    pub status: JobStatus,
}

/// One row of the list view. Carries everything the caller is
/// entitled to except the full result payload and error detail.
#[derive(Debug, Serialize)]
pub struct AnalysisSummary {
    pub code: String,
    pub status: JobStatus,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: FileType,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl From<JobRecord> for AnalysisSummary {
    fn from(job: JobRecord) -> Self {
        Self {
            code: job.code,
            status: job.status,
            file_name: job.file_name,
            file_size: job.file_size,
            file_type: job.file_type,
            uploaded_at: job.uploaded_at,
            completed_at: job.completed_at,
            metadata: job.metadata,
        }
    }
}

/// Detail view: the summary fields plus the result payload and any
/// failure reason.
#[derive(Debug, Serialize)]
pub struct AnalysisDetail {
    pub code: String,
    pub status: JobStatus,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: FileType,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<JobRecord> for AnalysisDetail {
    fn from(job: JobRecord) -> Self {
        Self {
            code: job.code,
            status: job.status,
            file_name: job.file_name,
            file_size: job.file_size,
            file_type: job.file_type,
            uploaded_at: job.uploaded_at,
            completed_at: job.completed_at,
            metadata: job.metadata,
            analysis_result: job.analysis_result,
            error_message: job.error_message,
        }
    }
}
