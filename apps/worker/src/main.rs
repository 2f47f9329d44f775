//! Quantarun task-quantum worker runtime.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use quantarun_application::{LeaseCoordinator, QuantumExecutor, QuantumHandler, QuantumOutcome};
use quantarun_core::{AppError, AppResult};
use quantarun_domain::{TaskQuantum, TaskQuantumInput};
use quantarun_infrastructure::{HttpQuantumDispatcher, RedisLeaseCoordinator};

use reqwest::header;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct WorkerConfig {
    redis_url: String,
    api_base_url: String,
    worker_shared_secret: String,
    worker_id: String,
    claim_limit: usize,
    lease_seconds: u32,
    poll_interval_ms: u64,
    dispatch_max_attempts: u8,
    dispatch_retry_backoff_ms: u64,
}

#[derive(Debug, Serialize)]
struct ClaimQuantaRequest {
    limit: usize,
    lease_seconds: u32,
}

#[derive(Debug, Serialize)]
struct WorkerHeartbeatRequest {
    claimed_quanta: u32,
    executed_quanta: u32,
    denied_quanta: u32,
    failed_quanta: u32,
}

#[derive(Debug, Deserialize)]
struct ClaimedQuantaResponse {
    quanta: Vec<ClaimedQuantumResponse>,
}

#[derive(Debug, Deserialize)]
struct ClaimedQuantumResponse {
    task_id: String,
    run_id: String,
    quantum_seconds: u32,
    payload: Value,
}

#[derive(Debug, Default, Clone, Copy)]
struct CycleStats {
    claimed: u32,
    executed: u32,
    denied: u32,
    failed: u32,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;
    let executor = build_quantum_executor(&config, http_client.clone())?;

    info!(
        worker_id = %config.worker_id,
        api_base_url = %config.api_base_url,
        claim_limit = config.claim_limit,
        lease_seconds = config.lease_seconds,
        poll_interval_ms = config.poll_interval_ms,
        "quantarun-worker started"
    );

    loop {
        match claim_quanta(&http_client, &config).await {
            Ok(claimed_quanta) => {
                let mut stats = CycleStats {
                    claimed: u32::try_from(claimed_quanta.len()).unwrap_or(u32::MAX),
                    ..CycleStats::default()
                };

                if claimed_quanta.is_empty() {
                    report_heartbeat(&http_client, &config, stats).await;
                    tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
                    continue;
                }

                info!(
                    worker_id = %config.worker_id,
                    claimed_count = claimed_quanta.len(),
                    "claimed task quanta"
                );

                for claimed_quantum in claimed_quanta {
                    let quantum = match claimed_quantum.try_into_quantum() {
                        Ok(quantum) => quantum,
                        Err(error) => {
                            stats.failed = stats.failed.saturating_add(1);
                            warn!(
                                worker_id = %config.worker_id,
                                error = %error,
                                "failed to parse claimed quantum payload"
                            );
                            continue;
                        }
                    };
                    let task_id = quantum.task_id().to_owned();
                    let run_id = quantum.run_id().to_owned();

                    match executor.execute_quantum(quantum).await {
                        Ok(QuantumOutcome::Completed) => {
                            stats.executed = stats.executed.saturating_add(1);
                            info!(
                                worker_id = %config.worker_id,
                                task_id = %task_id,
                                run_id = %run_id,
                                "task quantum executed"
                            );
                        }
                        Ok(QuantumOutcome::Denied) => {
                            stats.denied = stats.denied.saturating_add(1);
                            info!(
                                worker_id = %config.worker_id,
                                task_id = %task_id,
                                run_id = %run_id,
                                "task quantum denied, lease held elsewhere"
                            );
                        }
                        Ok(outcome) => {
                            stats.failed = stats.failed.saturating_add(1);
                            warn!(
                                worker_id = %config.worker_id,
                                task_id = %task_id,
                                run_id = %run_id,
                                outcome = outcome.as_str(),
                                "task quantum did not complete"
                            );
                        }
                        Err(error) => {
                            stats.failed = stats.failed.saturating_add(1);
                            warn!(
                                worker_id = %config.worker_id,
                                task_id = %task_id,
                                run_id = %run_id,
                                error = %error,
                                "task quantum execution failed"
                            );
                        }
                    }
                }

                report_heartbeat(&http_client, &config, stats).await;
            }
            Err(error) => {
                warn!(
                    worker_id = %config.worker_id,
                    error = %error,
                    "failed to claim task quanta"
                );
                tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
            }
        }
    }
}

fn build_quantum_executor(
    config: &WorkerConfig,
    http_client: reqwest::Client,
) -> AppResult<QuantumExecutor> {
    let redis_client = redis::Client::open(config.redis_url.as_str())
        .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))?;
    let lease_coordinator = Arc::new(RedisLeaseCoordinator::new(redis_client, "quantarun"));
    let dispatcher = Arc::new(HttpQuantumDispatcher::new(
        http_client,
        config.dispatch_max_attempts,
        config.dispatch_retry_backoff_ms,
    ));

    QuantumExecutor::new(
        lease_coordinator as Arc<dyn LeaseCoordinator>,
        dispatcher as Arc<dyn QuantumHandler>,
        config.worker_id.as_str(),
        config.lease_seconds,
    )
}

async fn claim_quanta(
    http_client: &reqwest::Client,
    config: &WorkerConfig,
) -> AppResult<Vec<ClaimedQuantumResponse>> {
    let endpoint = format!("{}/api/internal/worker/quanta/claim", config.api_base_url);
    let response = http_client
        .post(endpoint)
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", config.worker_shared_secret),
        )
        .header("x-quantarun-worker-id", config.worker_id.as_str())
        .json(&ClaimQuantaRequest {
            limit: config.claim_limit,
            lease_seconds: config.lease_seconds,
        })
        .send()
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to call quanta claim endpoint: {error}"))
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_owned());
        return Err(AppError::Internal(format!(
            "quanta claim endpoint returned status {}: {body}",
            status.as_u16()
        )));
    }

    let response_body = response
        .json::<ClaimedQuantaResponse>()
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to parse quanta claim endpoint response body: {error}"
            ))
        })?;

    Ok(response_body.quanta)
}

async fn report_heartbeat(
    http_client: &reqwest::Client,
    config: &WorkerConfig,
    stats: CycleStats,
) {
    if let Err(error) = send_heartbeat(http_client, config, stats).await {
        warn!(
            worker_id = %config.worker_id,
            error = %error,
            "failed to publish worker heartbeat"
        );
    }
}

async fn send_heartbeat(
    http_client: &reqwest::Client,
    config: &WorkerConfig,
    stats: CycleStats,
) -> AppResult<()> {
    let endpoint = format!("{}/api/internal/worker/heartbeat", config.api_base_url);
    let response = http_client
        .post(endpoint)
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", config.worker_shared_secret),
        )
        .header("x-quantarun-worker-id", config.worker_id.as_str())
        .json(&WorkerHeartbeatRequest {
            claimed_quanta: stats.claimed,
            executed_quanta: stats.executed,
            denied_quanta: stats.denied,
            failed_quanta: stats.failed,
        })
        .send()
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to call worker heartbeat endpoint: {error}"))
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_owned());
        return Err(AppError::Internal(format!(
            "worker heartbeat endpoint returned status {}: {body}",
            status.as_u16()
        )));
    }

    Ok(())
}

impl ClaimedQuantumResponse {
    fn try_into_quantum(self) -> AppResult<TaskQuantum> {
        TaskQuantum::new(TaskQuantumInput {
            task_id: self.task_id,
            run_id: self.run_id,
            quantum_seconds: self.quantum_seconds,
            payload: self.payload,
        })
    }
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let redis_url = required_env("REDIS_URL")?;
        let api_base_url = env::var("WORKER_API_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:3001".to_owned())
            .trim_end_matches('/')
            .to_owned();
        let worker_shared_secret = required_env("WORKER_SHARED_SECRET")?;
        let worker_id = env::var("WORKER_ID")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let claim_limit = parse_env_usize("WORKER_CLAIM_LIMIT", 10)?;
        let lease_seconds = parse_env_u32("WORKER_LEASE_SECONDS", 30)?;
        let poll_interval_ms = parse_env_u64("WORKER_POLL_INTERVAL_MS", 1500)?;
        let dispatch_max_attempts =
            u8::try_from(parse_env_u32("WORKER_DISPATCH_MAX_ATTEMPTS", 3)?).map_err(|_| {
                AppError::Validation("WORKER_DISPATCH_MAX_ATTEMPTS must fit in u8".to_owned())
            })?;
        let dispatch_retry_backoff_ms = parse_env_u64("WORKER_DISPATCH_RETRY_BACKOFF_MS", 250)?;

        if claim_limit == 0 {
            return Err(AppError::Validation(
                "WORKER_CLAIM_LIMIT must be greater than zero".to_owned(),
            ));
        }

        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "WORKER_LEASE_SECONDS must be greater than zero".to_owned(),
            ));
        }

        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "WORKER_POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            redis_url,
            api_base_url,
            worker_shared_secret,
            worker_id,
            claim_limit,
            lease_seconds,
            poll_interval_ms,
            dispatch_max_attempts,
            dispatch_retry_backoff_ms,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
