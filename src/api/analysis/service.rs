use std::sync::Arc;
use std::time::Duration;

use actix_web::{HttpResponse, ResponseError};
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ai::AnalysisBackend;
use crate::api::analysis::code::{generate_job_id, unique_code};
use crate::api::analysis::dto::{AnalysisDetail, AnalysisSummary, SubmitResponse};
use crate::api::error::ErrorResponse;
use crate::db::job_repository::JobStore;
use crate::db::models::{FileType, JobStatus, NewJob};
use crate::db::user_repository::UserStore;
use crate::extract::ContentExtractor;
use crate::quota::{QuotaError, QuotaLedger};

/// Failure reason recorded when the process died while jobs were
/// still in flight. Background state lives only in memory, so such
/// jobs can never complete and are force-failed at the next boot.
const RESTART_MESSAGE: &str = "Server restarted during processing";

/// Failure reason when the backend outlives the analysis deadline.
const TIMEOUT_MESSAGE: &str = "Analysis timed out after 10 minutes";

/// Failure reason when local text extraction fails.
const EXTRACTION_MESSAGE: &str = "Failed to extract file content";

/// Service-level errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("User not found")]
    UserNotFound,

    #[error("Analysis quota exceeded. You have used {used} of {allowed} analyses.")]
    QuotaExceeded { used: i32, allowed: i32 },

    #[error("Analysis not found")]
    AnalysisNotFound,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<QuotaError> for ServiceError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::UserNotFound => ServiceError::UserNotFound,
            QuotaError::Exceeded { used, allowed } => ServiceError::QuotaExceeded { used, allowed },
            QuotaError::Database(e) => ServiceError::Database(e),
        }
    }
}

impl ResponseError for ServiceError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ServiceError::UserNotFound | ServiceError::AnalysisNotFound => {
                warn!("{}", self);
                HttpResponse::NotFound().json(ErrorResponse {
                    error: "Not found".to_string(),
                    fields: serde_json::json!({ "message": self.to_string() }),
                })
            }
            ServiceError::QuotaExceeded { .. } => {
                warn!("{}", self);
                HttpResponse::BadRequest().json(ErrorResponse {
                    error: "Quota exceeded".to_string(),
                    fields: serde_json::json!({ "message": self.to_string() }),
                })
            }
            ServiceError::InvalidRequest(msg) => {
                warn!("Invalid request: {}", msg);
                HttpResponse::BadRequest().json(ErrorResponse {
                    error: "Invalid request".to_string(),
                    fields: serde_json::json!({ "message": msg }),
                })
            }
            ServiceError::Database(e) => {
                error!("Database error: {}", e);
                HttpResponse::InternalServerError().json(ErrorResponse {
                    error: "Failed to process request".to_string(),
                    fields: serde_json::json!({ "message": "Database error occurred" }),
                })
            }
        }
    }
}

/// Orchestrates the analysis job lifecycle: quota charge, job
/// creation, detached background execution, terminal transitions and
/// the startup recovery sweep. One instance per process, shared via
/// `web::Data`.
pub struct AnalysisService {
    ledger: QuotaLedger,
    jobs: Arc<dyn JobStore>,
    extractor: Arc<dyn ContentExtractor>,
    backend: Arc<dyn AnalysisBackend>,
    analysis_timeout: Duration,
    use_file_upload: bool,
}

impl AnalysisService {
    pub fn new(
        users: Arc<dyn UserStore>,
        jobs: Arc<dyn JobStore>,
        extractor: Arc<dyn ContentExtractor>,
        backend: Arc<dyn AnalysisBackend>,
        analysis_timeout: Duration,
        use_file_upload: bool,
    ) -> Self {
        Self {
            ledger: QuotaLedger::new(users),
            jobs,
            extractor,
            backend,
            analysis_timeout,
            use_file_upload,
        }
    }

    /// Accept an uploaded statement for analysis.
    ///
    /// Charges one unit of quota, persists a `pending` job and returns
    /// immediately; the analysis itself runs as a detached task whose
    /// failures never reach this caller.
    pub async fn submit(
        &self,
        file_name: String,
        bytes: Vec<u8>,
        user_id: &str,
    ) -> Result<SubmitResponse, ServiceError> {
        self.ledger.check_and_charge(user_id).await?;

        // The charge is already recorded; from here on, any failure to
        // create the job must hand the unit back.
        let created = self.create_job(&file_name, bytes.len() as i64, user_id).await;
        let job = match created {
            Ok(job) => job,
            Err(e) => {
                self.ledger.refund(user_id).await;
                return Err(e);
            }
        };

        info!("Analysis job created: {} for user {}", job.code, user_id);

        let execution = JobExecution {
            ledger: self.ledger.clone(),
            jobs: self.jobs.clone(),
            extractor: self.extractor.clone(),
            backend: self.backend.clone(),
            analysis_timeout: self.analysis_timeout,
            use_file_upload: self.use_file_upload,
            job_id: job.id,
            user_id: user_id.to_string(),
            file_name,
            file_type: job.file_type,
            bytes,
        };
        tokio::spawn(execution.run());

        Ok(SubmitResponse {
            message: "Analysis job created successfully".to_string(),
            code: job.code,
            status: JobStatus::Pending,
        })
    }

    async fn create_job(
        &self,
        file_name: &str,
        file_size: i64,
        user_id: &str,
    ) -> Result<NewJob, ServiceError> {
        let code = unique_code(self.jobs.as_ref()).await?;
        let job = NewJob {
            id: generate_job_id(),
            code,
            user_id: user_id.to_string(),
            file_name: file_name.to_string(),
            file_size,
            file_type: FileType::from_file_name(file_name),
            uploaded_at: Utc::now(),
        };
        self.jobs.insert(&job).await?;
        Ok(job)
    }

    /// All jobs owned by the user, newest upload first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<AnalysisSummary>, ServiceError> {
        let jobs = self.jobs.find_by_user(user_id).await?;
        Ok(jobs.into_iter().map(AnalysisSummary::from).collect())
    }

    /// Full job detail. The lookup is scoped to the owner, so a code
    /// belonging to someone else reads as nonexistent.
    pub async fn get_detail(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<AnalysisDetail, ServiceError> {
        self.jobs
            .find_by_code_for_user(code, user_id)
            .await?
            .map(AnalysisDetail::from)
            .ok_or(ServiceError::AnalysisNotFound)
    }

    /// Startup sweep: force every job left `pending` by an unclean
    /// shutdown to `failed`. Runs before the server starts accepting
    /// traffic. Quota charged for swept jobs stays consumed.
    pub async fn recover_on_startup(&self) -> Result<u64, ServiceError> {
        let count = self.jobs.fail_all_pending(RESTART_MESSAGE).await?;
        if count > 0 {
            info!("Marked {} pending jobs as failed on server restart", count);
        }
        Ok(count)
    }
}

/// Everything one background analysis run owns. Spawned detached from
/// the submission path; its only contract is to eventually write a
/// terminal state for its job.
struct JobExecution {
    ledger: QuotaLedger,
    jobs: Arc<dyn JobStore>,
    extractor: Arc<dyn ContentExtractor>,
    backend: Arc<dyn AnalysisBackend>,
    analysis_timeout: Duration,
    use_file_upload: bool,
    job_id: String,
    user_id: String,
    file_name: String,
    file_type: FileType,
    bytes: Vec<u8>,
}

impl JobExecution {
    async fn run(self) {
        info!("Starting background analysis for job {}", self.job_id);

        match self.analyze().await {
            Ok(analysis) => {
                let metadata = analysis
                    .metadata()
                    .and_then(|m| serde_json::to_value(m).ok());

                if let Err(e) = self
                    .jobs
                    .mark_success(&self.job_id, analysis.into_value(), metadata)
                    .await
                {
                    error!("Failed to record success for job {}: {:?}", self.job_id, e);
                } else {
                    info!("Analysis completed successfully for job {}", self.job_id);
                }
            }
            Err(reason) => {
                warn!("Analysis failed for job {}: {}", self.job_id, reason);
                self.ledger.refund(&self.user_id).await;

                if let Err(e) = self.jobs.mark_failed(&self.job_id, &reason).await {
                    error!("Failed to record failure for job {}: {:?}", self.job_id, e);
                }
            }
        }
    }

    /// Race the chosen analysis strategy against the deadline. The
    /// losing side is abandoned, not cancelled; its eventual result is
    /// ignored.
    async fn analyze(&self) -> Result<crate::ai::StructuredAnalysis, String> {
        let analysis = async {
            if self.use_file_upload {
                info!("Using raw file upload for analysis (job {})", self.job_id);
                self.backend
                    .analyze_file(&self.bytes, &self.file_name)
                    .await
                    .map_err(|e| e.to_string())
            } else {
                info!("Using text extraction for analysis (job {})", self.job_id);
                let text = self
                    .extractor
                    .extract(&self.bytes, self.file_type)
                    .await
                    .map_err(|e| {
                        warn!("Extraction failed for job {}: {}", self.job_id, e);
                        EXTRACTION_MESSAGE.to_string()
                    })?;
                self.backend
                    .analyze_text(&text)
                    .await
                    .map_err(|e| e.to_string())
            }
        };

        match tokio::time::timeout(self.analysis_timeout, analysis).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TIMEOUT_MESSAGE.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{BackendError, StructuredAnalysis};
    use crate::db::memory::{MemoryJobStore, MemoryUserStore};
    use crate::db::models::JobRecord;
    use crate::extract::ExtractError;
    use async_trait::async_trait;
    use serde_json::json;

    struct StubBackend {
        delay: Option<Duration>,
        failure: Option<String>,
        payload: serde_json::Value,
    }

    impl StubBackend {
        fn succeeding(payload: serde_json::Value) -> Self {
            Self {
                delay: None,
                failure: None,
                payload,
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                delay: None,
                failure: Some(message.to_string()),
                payload: json!({}),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                failure: None,
                payload: json!({}),
            }
        }

        async fn respond(&self) -> Result<StructuredAnalysis, BackendError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.failure {
                Some(message) => Err(BackendError::Api(message.clone())),
                None => Ok(StructuredAnalysis::new(self.payload.clone())),
            }
        }
    }

    #[async_trait]
    impl AnalysisBackend for StubBackend {
        async fn analyze_text(&self, _text: &str) -> Result<StructuredAnalysis, BackendError> {
            self.respond().await
        }

        async fn analyze_file(
            &self,
            _bytes: &[u8],
            _file_name: &str,
        ) -> Result<StructuredAnalysis, BackendError> {
            self.respond().await
        }
    }

    struct StubExtractor {
        fail: bool,
    }

    #[async_trait]
    impl ContentExtractor for StubExtractor {
        async fn extract(
            &self,
            bytes: &[u8],
            _file_type: FileType,
        ) -> Result<String, ExtractError> {
            if self.fail {
                Err(ExtractError::EmptyPdf)
            } else {
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }

    struct Harness {
        users: Arc<MemoryUserStore>,
        jobs: Arc<MemoryJobStore>,
        service: AnalysisService,
    }

    fn harness_with(
        users: MemoryUserStore,
        backend: StubBackend,
        extractor_fails: bool,
        timeout: Duration,
    ) -> Harness {
        let users = Arc::new(users);
        let jobs = Arc::new(MemoryJobStore::new());
        let service = AnalysisService::new(
            users.clone(),
            jobs.clone(),
            Arc::new(StubExtractor {
                fail: extractor_fails,
            }),
            Arc::new(backend),
            timeout,
            false,
        );
        Harness {
            users,
            jobs,
            service,
        }
    }

    fn harness(users: MemoryUserStore, backend: StubBackend) -> Harness {
        harness_with(users, backend, false, Duration::from_secs(5))
    }

    async fn wait_terminal(jobs: &MemoryJobStore, user_id: &str, code: &str) -> JobRecord {
        for _ in 0..400 {
            if let Some(job) = jobs
                .find_by_code_for_user(code, user_id)
                .await
                .unwrap()
            {
                if job.status != JobStatus::Pending {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {code} never reached a terminal state");
    }

    #[tokio::test]
    async fn submit_returns_pending_and_charges_immediately() {
        let h = harness(
            MemoryUserStore::new().with_user("u1", 5, 0, 0),
            StubBackend::succeeding(json!({})),
        );

        let ack = h
            .service
            .submit("statement.csv".into(), b"a,b\n1,2".to_vec(), "u1")
            .await
            .unwrap();

        assert_eq!(ack.status, JobStatus::Pending);
        assert_eq!(ack.code.len(), 8);
        // Charged at submission time, regardless of eventual outcome.
        assert_eq!(h.users.quota_used("u1"), 1);
    }

    #[tokio::test]
    async fn successful_analysis_records_result_and_keeps_charge() {
        let payload = json!({
            "analysis_metadata": {
                "statement_bank": "First National",
                "account_type": "checking"
            },
            "summary": { "inflow": 2500 }
        });
        let h = harness(
            MemoryUserStore::new().with_user("u1", 5, 0, 0),
            StubBackend::succeeding(payload.clone()),
        );

        let ack = h
            .service
            .submit("statement.txt".into(), b"txn data".to_vec(), "u1")
            .await
            .unwrap();
        let job = wait_terminal(&h.jobs, "u1", &ack.code).await;

        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.analysis_result, Some(payload));
        assert!(job.completed_at.is_some());
        assert!(job.error_message.is_none());
        let metadata = job.metadata.unwrap();
        assert_eq!(metadata["statement_bank"], "First National");
        assert_eq!(metadata["account_type"], "checking");
        // Success never refunds.
        assert_eq!(h.users.quota_used("u1"), 1);
    }

    #[tokio::test]
    async fn backend_failure_marks_failed_and_refunds() {
        let h = harness(
            MemoryUserStore::new().with_user("u1", 5, 0, 2),
            StubBackend::failing("model exploded"),
        );

        let ack = h
            .service
            .submit("statement.txt".into(), b"txn data".to_vec(), "u1")
            .await
            .unwrap();
        let job = wait_terminal(&h.jobs, "u1", &ack.code).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("Analysis API error: model exploded")
        );
        assert!(job.completed_at.is_some());
        // Net quota effect of a failed job is zero.
        assert_eq!(h.users.quota_used("u1"), 2);
    }

    #[tokio::test]
    async fn extraction_failure_marks_failed_and_refunds() {
        let h = harness_with(
            MemoryUserStore::new().with_user("u1", 5, 0, 0),
            StubBackend::succeeding(json!({})),
            true,
            Duration::from_secs(5),
        );

        let ack = h
            .service
            .submit("statement.pdf".into(), b"%PDF".to_vec(), "u1")
            .await
            .unwrap();
        let job = wait_terminal(&h.jobs, "u1", &ack.code).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("Failed to extract file content")
        );
        assert_eq!(h.users.quota_used("u1"), 0);
    }

    #[tokio::test]
    async fn timeout_marks_failed_and_refunds() {
        let h = harness_with(
            MemoryUserStore::new().with_user("u1", 5, 0, 0),
            StubBackend::slow(Duration::from_secs(600)),
            false,
            Duration::from_millis(30),
        );

        let ack = h
            .service
            .submit("statement.txt".into(), b"txn data".to_vec(), "u1")
            .await
            .unwrap();
        let job = wait_terminal(&h.jobs, "u1", &ack.code).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("timed out"));
        assert_eq!(h.users.quota_used("u1"), 0);
    }

    #[tokio::test]
    async fn failed_refund_still_records_terminal_state() {
        let users = MemoryUserStore::new().with_user("u1", 5, 0, 0);
        users.break_refunds();
        let h = harness(users, StubBackend::failing("boom"));

        let ack = h
            .service
            .submit("statement.txt".into(), b"data".to_vec(), "u1")
            .await
            .unwrap();
        let job = wait_terminal(&h.jobs, "u1", &ack.code).await;

        assert_eq!(job.status, JobStatus::Failed);
        // Known inconsistency window: the charge sticks.
        assert_eq!(h.users.quota_used("u1"), 1);
    }

    #[tokio::test]
    async fn file_upload_strategy_bypasses_extraction() {
        let users = Arc::new(MemoryUserStore::new().with_user("u1", 5, 0, 0));
        let jobs = Arc::new(MemoryJobStore::new());
        let service = AnalysisService::new(
            users.clone(),
            jobs.clone(),
            // An extractor that always fails must not matter here.
            Arc::new(StubExtractor { fail: true }),
            Arc::new(StubBackend::succeeding(json!({ "ok": true }))),
            Duration::from_secs(5),
            true,
        );

        let ack = service
            .submit("statement.pdf".into(), b"%PDF raw".to_vec(), "u1")
            .await
            .unwrap();
        let job = wait_terminal(&jobs, "u1", &ack.code).await;

        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(users.quota_used("u1"), 1);
    }

    #[tokio::test]
    async fn over_quota_submission_creates_nothing() {
        let h = harness(
            MemoryUserStore::new().with_user("u1", 2, 0, 2),
            StubBackend::succeeding(json!({})),
        );

        let err = h
            .service
            .submit("statement.txt".into(), b"data".to_vec(), "u1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::QuotaExceeded { used: 2, allowed: 2 }
        ));
        assert_eq!(h.jobs.len(), 0);
        assert_eq!(h.users.quota_used("u1"), 2);
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let h = harness(MemoryUserStore::new(), StubBackend::succeeding(json!({})));

        let err = h
            .service
            .submit("statement.txt".into(), b"data".to_vec(), "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UserNotFound));
        assert_eq!(h.jobs.len(), 0);
    }

    #[tokio::test]
    async fn free_tier_scenario_two_accepts_then_reject() {
        let h = harness(
            MemoryUserStore::new().with_user("u1", 2, 0, 0),
            StubBackend::succeeding(json!({})),
        );

        for _ in 0..2 {
            h.service
                .submit("statement.txt".into(), b"data".to_vec(), "u1")
                .await
                .unwrap();
        }
        assert_eq!(h.users.quota_used("u1"), 2);

        let err = h
            .service
            .submit("statement.txt".into(), b"data".to_vec(), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn concurrent_submissions_race_for_last_slot() {
        let h = harness(
            MemoryUserStore::new().with_user("u1", 3, 0, 2),
            StubBackend::succeeding(json!({})),
        );

        let (a, b) = tokio::join!(
            h.service
                .submit("one.txt".into(), b"data".to_vec(), "u1"),
            h.service
                .submit("two.txt".into(), b"data".to_vec(), "u1"),
        );

        let wins = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(wins, 1);
        assert_eq!(h.jobs.len(), 1);
    }

    #[tokio::test]
    async fn recovery_sweep_fails_pending_jobs_without_refund() {
        let h = harness(
            MemoryUserStore::new().with_user("u1", 5, 0, 1),
            StubBackend::slow(Duration::from_secs(600)),
        );

        // A job mid-flight when the previous process died.
        h.jobs.seed(JobRecord {
            id: "ANAORPHAN000000000".to_string(),
            code: "ORPHAN01".to_string(),
            user_id: "u1".to_string(),
            file_name: "old.pdf".to_string(),
            file_size: 10,
            file_type: FileType::Pdf,
            status: JobStatus::Pending,
            uploaded_at: Utc::now(),
            completed_at: None,
            metadata: None,
            analysis_result: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        let count = h.service.recover_on_startup().await.unwrap();
        assert_eq!(count, 1);

        let job = h.jobs.get("ANAORPHAN000000000").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("Server restarted during processing")
        );
        assert!(job.completed_at.is_some());
        // Recovery deliberately never refunds.
        assert_eq!(h.users.quota_used("u1"), 1);

        // Idempotent: a second sweep finds nothing.
        assert_eq!(h.service.recover_on_startup().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn detail_is_owner_scoped() {
        let h = harness(
            MemoryUserStore::new()
                .with_user("owner", 5, 0, 0)
                .with_user("other", 5, 0, 0),
            StubBackend::succeeding(json!({})),
        );

        let ack = h
            .service
            .submit("statement.txt".into(), b"data".to_vec(), "owner")
            .await
            .unwrap();
        wait_terminal(&h.jobs, "owner", &ack.code).await;

        assert!(h.service.get_detail(&ack.code, "owner").await.is_ok());
        // Another user's code must look exactly like a missing one.
        let err = h.service.get_detail(&ack.code, "other").await.unwrap_err();
        assert!(matches!(err, ServiceError::AnalysisNotFound));
        let err = h.service.get_detail("NOPE0000", "owner").await.unwrap_err();
        assert!(matches!(err, ServiceError::AnalysisNotFound));
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_omits_result_payload() {
        let h = harness(
            MemoryUserStore::new().with_user("u1", 5, 0, 0),
            StubBackend::succeeding(json!({})),
        );

        let base = Utc::now();
        for (i, code) in ["OLDEST00", "MIDDLE00", "NEWEST00"].iter().enumerate() {
            h.jobs.seed(JobRecord {
                id: format!("ANA{code}00000000"),
                code: code.to_string(),
                user_id: "u1".to_string(),
                file_name: "s.csv".to_string(),
                file_size: 1,
                file_type: FileType::Csv,
                status: JobStatus::Success,
                uploaded_at: base + chrono::Duration::seconds(i as i64),
                completed_at: Some(base),
                metadata: None,
                analysis_result: Some(json!({ "secret": true })),
                error_message: None,
                created_at: base,
                updated_at: base,
            });
        }

        let listed = h.service.list_for_user("u1").await.unwrap();
        let codes: Vec<&str> = listed.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, ["NEWEST00", "MIDDLE00", "OLDEST00"]);

        let serialized = serde_json::to_value(&listed).unwrap();
        assert!(serialized[0].get("analysis_result").is_none());
    }
}
