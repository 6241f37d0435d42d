//! Job handlers and dispatch.
//!
//! - `handler`: the local handler capability (`validate`, `execute`)
//! - `registry`: job type to `Local`/`Remote` bindings
//! - `remote`: client for the remote `POST /execute` contract
//! - `builtin`: simulated `ml_experiment` and `backtest` handlers

pub mod builtin;
pub mod handler;
pub mod registry;
pub mod remote;

pub use handler::{HandlerContext, HandlerOutput, JobHandler, JobRequest, PayloadSchema};
pub use registry::{DispatchTarget, HandlerBinding, HandlerRegistry, TargetKind};
pub use remote::{RemoteClient, RemoteResponse, RemoteStatus};
