//! Command-line interface.
//!
//! Every subcommand except `serve` talks to a running orchestrator over
//! HTTP and prints the JSON reply to stdout.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::api;
use crate::artifacts::model::{ArtifactFilter, ArtifactType};
use crate::client::ApiClient;
use crate::config::OrchestratorConfig;
use crate::jobs::model::JobStatus;
use crate::jobs::orchestrator::{JobFilter, JobOrchestrator, JobSubmission};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// MCP orchestrator: submit jobs, manage services, and run the server
#[derive(Parser, Debug)]
#[command(name = "mcp-orchestrator")]
#[command(version)]
#[command(about = "Job orchestrator with local and remote handlers", long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long = "json-logs", global = true)]
    pub json_logs: bool,

    /// Orchestrator base URL
    #[arg(
        long,
        global = true,
        env = "MCP_SERVER_URL",
        default_value = "http://127.0.0.1:8000"
    )]
    pub server: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a job
    Submit {
        /// Job type, e.g. ml_experiment
        #[arg(long = "type")]
        job_type: String,

        /// Payload as inline JSON or a path to a JSON file
        #[arg(long)]
        config: Option<String>,

        /// Metadata as inline JSON
        #[arg(long)]
        metadata: Option<String>,

        /// Poll until the job finishes and print the final record
        #[arg(long)]
        wait: bool,
    },

    /// Show a job
    Status {
        /// Job id
        job_id: Uuid,
    },

    /// Cancel a job
    Cancel {
        #[arg(long = "job-id")]
        job_id: Uuid,
    },

    /// List jobs in submission order
    ListJobs {
        /// Only jobs in this status
        #[arg(long = "status-filter")]
        status_filter: Option<JobStatus>,

        /// Only jobs of this type
        #[arg(long = "type")]
        job_type: Option<String>,

        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Bind a job type to a remote service
    RegisterService {
        #[arg(long = "job-type")]
        job_type: String,

        /// Base URL; jobs are POSTed to {url}/execute
        #[arg(long = "service-url")]
        service_url: String,
    },

    /// List handler bindings
    ListServices,

    /// Run the HTTP API
    Serve {
        /// Overrides MCP_HOST
        #[arg(long)]
        host: Option<String>,

        /// Overrides MCP_PORT
        #[arg(long)]
        port: Option<u16>,

        /// Accepted for compatibility; has no effect
        #[arg(long)]
        reload: bool,
    },

    /// List artifacts
    ListArtifacts {
        #[arg(long = "job-id")]
        job_id: Option<Uuid>,

        #[arg(long = "type")]
        artifact_type: Option<ArtifactType>,

        #[arg(long)]
        tag: Option<String>,

        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Show an artifact's dependencies
    Dependencies {
        artifact_id: Uuid,

        /// Follow dependencies recursively
        #[arg(long)]
        transitive: bool,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = ApiClient::new(&cli.server);

    match cli.command {
        Command::Serve { host, port, reload } => serve(host, port, reload).await,
        Command::Submit {
            job_type,
            config,
            metadata,
            wait,
        } => {
            let payload = match config {
                Some(raw) => load_payload(&raw)?,
                None => Value::Object(Default::default()),
            };
            let mut submission = JobSubmission::new(job_type, payload);
            if let Some(raw) = metadata {
                let metadata: Value =
                    serde_json::from_str(&raw).context("--metadata is not valid JSON")?;
                submission = submission.with_metadata(metadata);
            }
            let job_id = client.submit(&submission).await?;
            if wait {
                print_json(&client.wait(job_id, WAIT_POLL_INTERVAL).await?)
            } else {
                print_json(&serde_json::json!({"job_id": job_id, "status": "submitted"}))
            }
        }
        Command::Status { job_id } => print_json(&client.status(job_id).await?),
        Command::Cancel { job_id } => print_json(&client.cancel(job_id).await?),
        Command::ListJobs {
            status_filter,
            job_type,
            limit,
        } => {
            let filter = JobFilter {
                status: status_filter,
                job_type,
                limit: Some(limit),
            };
            print_json(&client.list_jobs(&filter).await?)
        }
        Command::RegisterService {
            job_type,
            service_url,
        } => print_json(&client.register_service(&job_type, &service_url).await?),
        Command::ListServices => print_json(&client.list_services().await?),
        Command::ListArtifacts {
            job_id,
            artifact_type,
            tag,
            limit,
        } => {
            let filter = ArtifactFilter {
                job_id,
                artifact_type,
                tag,
                service_id: None,
                limit: Some(limit),
            };
            print_json(&client.list_artifacts(&filter).await?)
        }
        Command::Dependencies {
            artifact_id,
            transitive,
        } => print_json(&client.dependencies(artifact_id, transitive).await?),
    }
}

async fn serve(host: Option<String>, port: Option<u16>, reload: bool) -> anyhow::Result<()> {
    if reload {
        tracing::warn!("--reload is not supported, starting normally");
    }
    let mut config = OrchestratorConfig::from_env()?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let orchestrator = Arc::new(JobOrchestrator::from_config(&config).await?);
    api::serve(orchestrator, &config.bind_addr())
        .await
        .with_context(|| format!("server on {} failed", config.bind_addr()))
}

/// Read a payload given either as inline JSON or as a path to a JSON file.
///
/// Inline JSON wins when the argument parses.
pub fn load_payload(raw: &str) -> anyhow::Result<Value> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Ok(value);
    }
    let path = Path::new(raw);
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("--config is neither JSON nor a readable file: {raw}"))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
