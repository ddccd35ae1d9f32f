//! OpenAI-compatible analysis backend.
//!
//! Two strategies: chat completion over extracted text, or files-API
//! upload followed by a chat completion referencing the uploaded file.
//! No timeout lives here; the orchestrator races the whole call
//! against its own deadline.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::ai::{AnalysisBackend, BackendError, StructuredAnalysis};
use crate::config::AiConfig;

pub struct OpenAiBackend {
    client: reqwest::Client,
    config: AiConfig,
}

impl OpenAiBackend {
    pub fn new(config: AiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn chat_completion(
        &self,
        body: serde_json::Value,
    ) -> Result<StructuredAnalysis, BackendError> {
        let res = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let detail = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{}: {}", status, detail)));
        }

        let response: serde_json::Value = res
            .json()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or(BackendError::EmptyResponse)?;

        // The model is instructed to answer with a JSON document; a
        // non-parseable answer counts as a backend failure.
        let parsed: serde_json::Value =
            serde_json::from_str(content).map_err(|_| BackendError::MalformedResponse)?;

        Ok(StructuredAnalysis::new(parsed))
    }

    async fn upload_file(&self, bytes: &[u8], file_name: &str) -> Result<String, BackendError> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);

        let res = self
            .client
            .post(format!("{}/files", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let detail = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!(
                "file upload failed: {}: {}",
                status, detail
            )));
        }

        let body: serde_json::Value = res
            .json()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Api("file upload returned no id".to_string()))
    }

    /// Cleanup is best-effort; the remote side garbage-collects
    /// eventually either way.
    async fn delete_file(&self, file_id: &str) {
        let result = self
            .client
            .delete(format!("{}/files/{}", self.config.api_base, file_id))
            .bearer_auth(&self.config.api_key)
            .send()
            .await;

        match result {
            Ok(res) if res.status().is_success() => {
                info!("Cleaned up uploaded file: {}", file_id)
            }
            Ok(res) => warn!(
                "Failed to delete uploaded file {}: {}",
                file_id,
                res.status()
            ),
            Err(e) => warn!("Failed to delete uploaded file {}: {}", file_id, e),
        }
    }
}

#[async_trait]
impl AnalysisBackend for OpenAiBackend {
    async fn analyze_text(&self, text: &str) -> Result<StructuredAnalysis, BackendError> {
        info!("Starting analysis with model {}", self.config.model);

        let user_prompt = format!("BELOW IS THE DATA TO BE ANALYZED:\n\n{}", text);
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": self.config.prompt },
                { "role": "user", "content": user_prompt },
            ],
            "response_format": { "type": "text" },
            "temperature": 1,
            "max_completion_tokens": 2048,
        });

        self.chat_completion(body).await
    }

    async fn analyze_file(
        &self,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<StructuredAnalysis, BackendError> {
        info!(
            "Starting file-based analysis for {} with model {}",
            file_name, self.config.model
        );

        let file_id = self.upload_file(bytes, file_name).await?;
        info!("File uploaded with id {}", file_id);

        let body = json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "developer",
                    "content": [{ "type": "text", "text": self.config.prompt }],
                },
                {
                    "role": "user",
                    "content": [{ "type": "file", "file": { "file_id": file_id } }],
                },
            ],
            "response_format": { "type": "json_object" },
        });

        let result = self.chat_completion(body).await;
        self.delete_file(&file_id).await;
        result
    }
}
