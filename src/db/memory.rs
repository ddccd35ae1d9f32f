//! In-memory store fakes for exercising the orchestrator without a
//! database. Test-only.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::db::job_repository::JobStore;
use crate::db::models::{JobRecord, JobStatus, NewJob, UserRecord};
use crate::db::user_repository::UserStore;

pub struct MemoryUserStore {
    users: Mutex<HashMap<String, UserRecord>>,
    fail_refunds: AtomicBool,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            fail_refunds: AtomicBool::new(false),
        }
    }

    pub fn with_user(self, id: &str, quota_limit: i32, quota_bonus: i32, quota_used: i32) -> Self {
        let now = Utc::now();
        self.users.lock().unwrap().insert(
            id.to_string(),
            UserRecord {
                id: id.to_string(),
                email: format!("{id}@example.com"),
                tier: "free".to_string(),
                quota_limit,
                quota_bonus,
                quota_used,
                created_at: now,
                updated_at: now,
            },
        );
        self
    }

    /// Make every subsequent refund return a persistence error.
    pub fn break_refunds(&self) {
        self.fail_refunds.store(true, Ordering::SeqCst);
    }

    pub fn quota_used(&self, id: &str) -> i32 {
        self.users.lock().unwrap().get(id).map(|u| u.quota_used).unwrap_or(-1)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>, sqlx::Error> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn try_charge(&self, user_id: &str) -> Result<Option<UserRecord>, sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(user_id) {
            Some(user)
                if user.quota_limit == -1
                    || user.quota_used < user.quota_limit + user.quota_bonus =>
            {
                user.quota_used += 1;
                Ok(Some(user.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn refund(&self, user_id: &str) -> Result<(), sqlx::Error> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(sqlx::Error::Protocol("refund rejected".to_string()));
        }
        if let Some(user) = self.users.lock().unwrap().get_mut(user_id) {
            user.quota_used = (user.quota_used - 1).max(0);
        }
        Ok(())
    }

    async fn create(
        &self,
        user_id: &str,
        email: &str,
        tier: &str,
        quota_limit: i32,
        quota_bonus: i32,
    ) -> Result<UserRecord, sqlx::Error> {
        let now = Utc::now();
        let user = UserRecord {
            id: user_id.to_string(),
            email: email.to_string(),
            tier: tier.to_string(),
            quota_limit,
            quota_bonus,
            quota_used: 0,
            created_at: now,
            updated_at: now,
        };
        self.users
            .lock()
            .unwrap()
            .insert(user_id.to_string(), user.clone());
        Ok(user)
    }
}

pub struct MemoryJobStore {
    jobs: Mutex<Vec<JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }

    pub fn seed(&self, job: JobRecord) {
        self.jobs.lock().unwrap().push(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &NewJob) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        self.jobs.lock().unwrap().push(JobRecord {
            id: job.id.clone(),
            code: job.code.clone(),
            user_id: job.user_id.clone(),
            file_name: job.file_name.clone(),
            file_size: job.file_size,
            file_type: job.file_type,
            status: JobStatus::Pending,
            uploaded_at: job.uploaded_at,
            completed_at: None,
            metadata: None,
            analysis_result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn code_exists(&self, code: &str) -> Result<bool, sqlx::Error> {
        Ok(self.jobs.lock().unwrap().iter().any(|j| j.code == code))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<JobRecord>, sqlx::Error> {
        Ok(self.get(id))
    }

    async fn find_by_code_for_user(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<Option<JobRecord>, sqlx::Error> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.code == code && j.user_id == user_id)
            .cloned())
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<JobRecord>, sqlx::Error> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(jobs)
    }

    async fn mark_success(
        &self,
        id: &str,
        analysis_result: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), sqlx::Error> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.status = JobStatus::Success;
            job.analysis_result = Some(analysis_result);
            job.metadata = metadata;
            job.completed_at = Some(Utc::now());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error_message: &str) -> Result<(), sqlx::Error> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.status = JobStatus::Failed;
            job.error_message = Some(error_message.to_string());
            job.completed_at = Some(Utc::now());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail_all_pending(&self, error_message: &str) -> Result<u64, sqlx::Error> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut count = 0;
        for job in jobs.iter_mut().filter(|j| j.status == JobStatus::Pending) {
            job.status = JobStatus::Failed;
            job.error_message = Some(error_message.to_string());
            job.completed_at = Some(Utc::now());
            job.updated_at = Utc::now();
            count += 1;
        }
        Ok(count)
    }
}
