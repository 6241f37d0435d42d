//! Simulated ML experiment handler.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::{inline_location, rng};
use crate::artifacts::model::{ArtifactRegistration, ArtifactType};
use crate::error::HandlerError;
use crate::handlers::handler::{HandlerContext, HandlerOutput, JobHandler, JobRequest, PayloadSchema};

const DEFAULT_EPOCHS: u64 = 10;
const MAX_EPOCHS: u64 = 10_000;

#[derive(Debug, Clone, Serialize)]
struct EpochMetrics {
    epoch: u64,
    loss: f64,
    accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
struct TrainingRun {
    final_accuracy: f64,
    final_loss: f64,
    history: Vec<EpochMetrics>,
}

fn simulate_training(epochs: u64, seed: Option<u64>) -> TrainingRun {
    let mut rng = rng(seed);
    let final_accuracy = rng.gen_range(0.7..0.95);
    let final_loss = rng.gen_range(0.1..0.5);

    let history = (1..=epochs)
        .map(|epoch| {
            let progress = epoch as f64 / epochs as f64;
            EpochMetrics {
                epoch,
                loss: (final_loss * (2.0 - progress) + rng.gen_range(-0.05..0.05)).max(0.0),
                accuracy: (final_accuracy * progress + rng.gen_range(-0.05..0.05)).clamp(0.0, 1.0),
            }
        })
        .collect();

    TrainingRun {
        final_accuracy,
        final_loss,
        history,
    }
}

/// Trains nothing; produces plausible training metrics.
///
/// Payload: `model` and `dataset` (required), `epochs` (default 10), `seed`.
pub struct MlExperimentHandler {
    delay: Duration,
}

impl Default for MlExperimentHandler {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
        }
    }
}

impl MlExperimentHandler {
    /// Set the simulated processing time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl JobHandler for MlExperimentHandler {
    fn name(&self) -> &str {
        "ml-agent"
    }

    fn job_types(&self) -> Vec<String> {
        vec!["ml_experiment".into()]
    }

    fn payload_schema(&self) -> Option<PayloadSchema> {
        Some(PayloadSchema::required(&["model", "dataset"]))
    }

    async fn execute(
        &self,
        request: JobRequest,
        ctx: HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        request.require("model")?;
        request.require("dataset")?;
        let model = request.str_or("model", "linear")?.to_string();
        let dataset = request.str_or("dataset", "iris")?.to_string();
        let epochs = request.u64_opt("epochs")?.unwrap_or(DEFAULT_EPOCHS);
        if !(1..=MAX_EPOCHS).contains(&epochs) {
            return Err(HandlerError::InvalidField {
                field: "epochs".into(),
                reason: format!("must be between 1 and {MAX_EPOCHS}"),
            });
        }
        let seed = request.u64_opt("seed")?;

        tracing::info!(job_id = %request.job_id, model = %model, dataset = %dataset, epochs, "Starting ML experiment");
        ctx.sleep(self.delay).await?;
        let run = ctx.offload(move || simulate_training(epochs, seed)).await?;
        if ctx.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }

        let job_id = request.job_id;
        let experiment_id = format!("exp_{}", &job_id.simple().to_string()[..8]);
        let model_artifact = Uuid::new_v4();

        let result = json!({
            "model_type": model,
            "dataset": dataset,
            "epochs": epochs,
            "final_accuracy": run.final_accuracy,
            "final_loss": run.final_loss,
            "training_history": run.history,
            "experiment_id": experiment_id,
            "completed_at": Utc::now().to_rfc3339(),
        });

        let output = HandlerOutput::new(result)
            .with_artifact(
                ArtifactRegistration::new(
                    format!("{model}.model"),
                    ArtifactType::Model,
                    inline_location(job_id, "model.bin"),
                )
                .with_id(model_artifact)
                .with_description(format!("{model} trained on {dataset}"))
                .with_tag(experiment_id.clone()),
            )
            .with_artifact(
                ArtifactRegistration::new(
                    "metrics.json",
                    ArtifactType::Metrics,
                    inline_location(job_id, "metrics.json"),
                )
                .with_description("Training metrics")
                .with_tag(experiment_id)
                .with_dependency(model_artifact),
            );

        tracing::info!(job_id = %job_id, accuracy = run.final_accuracy, "ML experiment completed");
        Ok(output)
    }
}
