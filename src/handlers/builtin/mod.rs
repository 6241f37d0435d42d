//! Built-in simulated handlers.

pub mod backtest;
pub mod ml_experiment;

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::handlers::registry::HandlerRegistry;

pub use backtest::BacktestHandler;
pub use ml_experiment::MlExperimentHandler;

/// Register the built-in handlers.
pub async fn register_builtin(registry: &HandlerRegistry) -> Result<(), DispatchError> {
    registry
        .register_handler(Arc::new(MlExperimentHandler::default()))
        .await?;
    registry
        .register_handler(Arc::new(BacktestHandler::default()))
        .await?;
    Ok(())
}

/// Storage locator for results kept inline with the job.
fn inline_location(job_id: Uuid, file: &str) -> String {
    format!("inline://{job_id}/{file}")
}

/// Deterministic when the payload carries a `seed`.
fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::registry::TargetKind;
    use rand::Rng;

    #[tokio::test]
    async fn builtin_handlers_bind_their_types() {
        let registry = HandlerRegistry::new();
        register_builtin(&registry).await.unwrap();

        let bindings = registry.list_bindings().await;
        let types: Vec<&str> = bindings.iter().map(|b| b.job_type.as_str()).collect();
        assert_eq!(types, vec!["backtest", "ml_experiment"]);
        assert!(bindings.iter().all(|b| b.kind == TargetKind::Local));
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let a: f64 = rng(Some(7)).r#gen();
        let b: f64 = rng(Some(7)).r#gen();
        assert_eq!(a, b);
    }
}
