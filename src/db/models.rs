use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, FromRow, Postgres, Type};

/// Maps an enum onto the plain TEXT columns the schema uses. The
/// derived `sqlx::Type` would expect a named Postgres enum type
/// instead, and every bind would fail at prepare time.
macro_rules! text_column {
    ($ty:ty) => {
        impl Type<Postgres> for $ty {
            fn type_info() -> PgTypeInfo {
                <&str as Type<Postgres>>::type_info()
            }
        }

        impl Encode<'_, Postgres> for $ty {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
                <&str as Encode<'_, Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }

        impl<'r> Decode<'r, Postgres> for $ty {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let text = <&str as Decode<'r, Postgres>>::decode(value)?;
                text.parse().map_err(Into::into)
            }
        }
    };
}

/// Lifecycle state of an analysis job.
///
/// `Pending` has exactly two outgoing transitions, both terminal:
/// `Success` (analysis produced a result) or `Failed` (any failure,
/// including timeout and the startup recovery sweep).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

text_column!(JobStatus);

/// Supported upload formats. Derived from the file extension;
/// anything unrecognized is treated as PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    Txt,
    Pdf,
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(FileType::Csv),
            "txt" => Ok(FileType::Txt),
            "pdf" => Ok(FileType::Pdf),
            other => Err(format!("unknown file type: {other}")),
        }
    }
}

text_column!(FileType);

impl FileType {
    pub fn from_file_name(file_name: &str) -> Self {
        let extension = file_name
            .rsplit('.')
            .next()
            .map(str::to_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => FileType::Csv,
            "txt" => FileType::Txt,
            _ => FileType::Pdf,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Txt => "txt",
            FileType::Pdf => "pdf",
        }
    }
}

/// Billing tiers and the analysis limits they grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    /// Analyses included in the tier; -1 means unlimited.
    pub fn analysis_limit(&self) -> i32 {
        match self {
            Tier::Free => 2,
            Tier::Pro => 50,
            Tier::Enterprise => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

/// Database representation of a user, quota fields included.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub tier: String,
    /// Total analyses allowed by the tier; -1 = unlimited.
    pub quota_limit: i32,
    /// Extra analyses granted out-of-band, never negative.
    pub quota_bonus: i32,
    /// Analyses consumed so far.
    pub quota_used: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database representation of an analysis job with all fields.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobRecord {
    pub id: String,
    /// User-facing 8-character uppercase alphanumeric identifier.
    pub code: String,
    pub user_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: FileType,
    pub status: JobStatus,
    pub uploaded_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Structured sub-fields pulled out of the analysis result; success only.
    pub metadata: Option<serde_json::Value>,
    /// Full structured payload from the analysis backend; success only.
    pub analysis_result: Option<serde_json::Value>,
    /// Human-readable failure reason; failed only.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields captured at submission time for a new job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub code: String,
    pub user_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: FileType,
    pub uploaded_at: DateTime<Utc>,
}
