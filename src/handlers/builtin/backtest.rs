//! Simulated strategy backtest handler.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::{inline_location, rng};
use crate::artifacts::model::{ArtifactRegistration, ArtifactType};
use crate::error::HandlerError;
use crate::handlers::handler::{HandlerContext, HandlerOutput, JobHandler, JobRequest, PayloadSchema};

const TRADING_DAYS: usize = 252;
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Serialize)]
struct Trade {
    date: String,
    action: &'static str,
    price: f64,
    quantity: u32,
    pnl: f64,
}

#[derive(Debug, Clone, Serialize)]
struct PortfolioPoint {
    date: String,
    value: f64,
}

#[derive(Debug, Clone, Serialize)]
struct BacktestRun {
    final_value: f64,
    total_return: f64,
    sharpe_ratio: f64,
    max_drawdown: f64,
    trades: Vec<Trade>,
    portfolio_values: Vec<PortfolioPoint>,
}

fn simulate(start: NaiveDate, end: NaiveDate, initial_capital: f64, seed: Option<u64>) -> BacktestRun {
    let mut rng = rng(seed);
    let span_days = (end - start).num_days().max(0) as u64;
    let date_at = |offset: u64| {
        start
            .checked_add_days(Days::new(offset))
            .unwrap_or(end)
            .format(DATE_FORMAT)
            .to_string()
    };

    let num_trades = rng.gen_range(10..=50);
    let mut trades: Vec<Trade> = (0..num_trades)
        .map(|_| Trade {
            date: date_at(rng.gen_range(0..=span_days)),
            action: if rng.gen_bool(0.5) { "BUY" } else { "SELL" },
            price: rng.gen_range(100.0..200.0),
            quantity: rng.gen_range(10..=100),
            pnl: rng.gen_range(-1000.0..2000.0),
        })
        .collect();
    trades.sort_by(|a, b| a.date.cmp(&b.date));

    let mut value = initial_capital;
    let mut peak = initial_capital;
    let mut max_drawdown: f64 = 0.0;
    let mut returns = Vec::with_capacity(TRADING_DAYS);
    let mut portfolio_values = Vec::with_capacity(TRADING_DAYS);
    for day in 0..TRADING_DAYS {
        let daily = rng.gen_range(-0.02..0.0215);
        value *= 1.0 + daily;
        peak = peak.max(value);
        max_drawdown = max_drawdown.max((peak - value) / peak);
        returns.push(daily);
        portfolio_values.push(PortfolioPoint {
            date: date_at(day as u64),
            value,
        });
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let sharpe_ratio = if variance > 0.0 {
        mean / variance.sqrt() * (TRADING_DAYS as f64).sqrt()
    } else {
        0.0
    };

    BacktestRun {
        final_value: value,
        total_return: value / initial_capital - 1.0,
        sharpe_ratio,
        max_drawdown,
        trades,
        portfolio_values,
    }
}

fn parse_date(request: &JobRequest, field: &str, default: &str) -> Result<NaiveDate, HandlerError> {
    let raw = request.str_or(field, default)?;
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| HandlerError::InvalidField {
        field: field.to_string(),
        reason: format!("expected YYYY-MM-DD: {e}"),
    })
}

/// Runs a random-walk backtest for a strategy on one ticker.
///
/// Payload: `strategy` and `ticker` (required), `start_date`, `end_date`,
/// `initial_capital`, `seed`.
pub struct BacktestHandler {
    delay: Duration,
}

impl Default for BacktestHandler {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
        }
    }
}

impl BacktestHandler {
    /// Set the simulated processing time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl JobHandler for BacktestHandler {
    fn name(&self) -> &str {
        "backtest-agent"
    }

    fn job_types(&self) -> Vec<String> {
        vec!["backtest".into()]
    }

    fn payload_schema(&self) -> Option<PayloadSchema> {
        Some(PayloadSchema::required(&["strategy", "ticker"]))
    }

    async fn execute(
        &self,
        request: JobRequest,
        ctx: HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        request.require("strategy")?;
        request.require("ticker")?;
        let strategy = request.str_or("strategy", "momentum")?.to_string();
        let ticker = request.str_or("ticker", "AAPL")?.to_string();
        let start = parse_date(&request, "start_date", "2023-01-01")?;
        let end = parse_date(&request, "end_date", "2023-12-31")?;
        if end < start {
            return Err(HandlerError::InvalidField {
                field: "end_date".into(),
                reason: "must not be before start_date".into(),
            });
        }
        let initial_capital = request.f64_opt("initial_capital")?.unwrap_or(100_000.0);
        if !(initial_capital.is_finite() && initial_capital > 0.0) {
            return Err(HandlerError::InvalidField {
                field: "initial_capital".into(),
                reason: "must be a positive number".into(),
            });
        }
        let seed = request.u64_opt("seed")?;

        tracing::info!(job_id = %request.job_id, strategy = %strategy, ticker = %ticker, "Starting backtest");
        ctx.sleep(self.delay).await?;
        let run = ctx
            .offload(move || simulate(start, end, initial_capital, seed))
            .await?;
        if ctx.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }

        let job_id = request.job_id;
        let backtest_id = format!("bt_{}", &job_id.simple().to_string()[..8]);
        let metrics_artifact = Uuid::new_v4();

        let result = json!({
            "strategy": strategy,
            "ticker": ticker,
            "start_date": start.format(DATE_FORMAT).to_string(),
            "end_date": end.format(DATE_FORMAT).to_string(),
            "initial_capital": initial_capital,
            "final_value": run.final_value,
            "total_return": run.total_return,
            "sharpe_ratio": run.sharpe_ratio,
            "max_drawdown": run.max_drawdown,
            "num_trades": run.trades.len(),
            "trades": run.trades,
            "portfolio_values": run.portfolio_values,
            "backtest_id": backtest_id,
            "completed_at": Utc::now().to_rfc3339(),
        });

        let output = HandlerOutput::new(result)
            .with_artifact(
                ArtifactRegistration::new(
                    "metrics.json",
                    ArtifactType::Metrics,
                    inline_location(job_id, "metrics.json"),
                )
                .with_id(metrics_artifact)
                .with_description(format!("{strategy} on {ticker}: return, sharpe and drawdown"))
                .with_tag(backtest_id.clone()),
            )
            .with_artifact(
                ArtifactRegistration::new(
                    "backtest_report.json",
                    ArtifactType::Report,
                    inline_location(job_id, "backtest_report.json"),
                )
                .with_description(format!("Trade log and equity curve for {ticker}"))
                .with_tag(backtest_id)
                .with_dependency(metrics_artifact),
            );

        tracing::info!(job_id = %job_id, total_return = run.total_return, "Backtest completed");
        Ok(output)
    }
}
