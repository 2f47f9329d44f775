use std::time::Duration;

use async_trait::async_trait;
use quantarun_application::QuantumHandler;
use quantarun_core::{AppError, AppResult};
use quantarun_domain::TaskQuantum;
use serde_json::Value;

/// HTTP-based quantum work handler.
///
/// Executes one quantum by POSTing its claimed dispatch payload to the
/// endpoint named inside it. Side effects happen only while the executor
/// holds the quantum's lease.
pub struct HttpQuantumDispatcher {
    http_client: reqwest::Client,
    max_attempts: u8,
    retry_backoff_ms: u64,
}

impl HttpQuantumDispatcher {
    /// Creates a new quantum dispatcher.
    #[must_use]
    pub fn new(http_client: reqwest::Client, max_attempts: u8, retry_backoff_ms: u64) -> Self {
        Self {
            http_client,
            max_attempts: max_attempts.max(1),
            retry_backoff_ms: retry_backoff_ms.max(50),
        }
    }

    async fn dispatch_with_retry(&self, quantum: &TaskQuantum, endpoint: &str) -> AppResult<()> {
        let idempotency_key = format!("{}:{}", quantum.task_id(), quantum.run_id());
        let body = serde_json::json!({
            "task_id": quantum.task_id(),
            "run_id": quantum.run_id(),
            "payload": quantum.payload().get("payload").cloned().unwrap_or(Value::Null),
        });

        let mut attempt = 0_u8;
        let mut last_error: Option<String> = None;

        while attempt < self.max_attempts {
            attempt = attempt.saturating_add(1);
            let response = self
                .http_client
                .post(endpoint)
                .header("Idempotency-Key", idempotency_key.as_str())
                .header("X-Quantarun-Task", quantum.task_id())
                .header("X-Quantarun-Run", quantum.run_id())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response)
                    if response.status().is_server_error()
                        || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS =>
                {
                    last_error = Some(format!(
                        "transient HTTP status {} for quantum dispatch '{idempotency_key}'",
                        response.status()
                    ));
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<response body unavailable>".to_owned());
                    return Err(AppError::Validation(format!(
                        "quantum dispatch failed with status {status}: {body}"
                    )));
                }
                Err(error) => {
                    last_error = Some(format!("quantum dispatch transport error: {error}"));
                }
            }

            if attempt < self.max_attempts {
                let delay = self.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(AppError::Internal(last_error.unwrap_or_else(|| {
            "quantum dispatch exhausted retries".to_owned()
        })))
    }
}

#[async_trait]
impl QuantumHandler for HttpQuantumDispatcher {
    async fn execute(&self, quantum: &TaskQuantum) -> AppResult<()> {
        let payload = quantum.payload().as_object().ok_or_else(|| {
            AppError::Validation("quantum dispatch payload must be an object".to_owned())
        })?;

        let endpoint = payload
            .get("endpoint")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AppError::Validation(
                    "quantum dispatch payload requires string field 'endpoint'".to_owned(),
                )
            })?;

        self.dispatch_with_retry(quantum, endpoint).await
    }
}
