pub mod orchestrator;
pub mod retry;
pub mod unit;

pub use orchestrator::{
    plan_units, resolve_now, run_job, Orchestrator, RunError, RunReport, RunSettings, UnitFailure,
};
pub use retry::{with_retry, RetryPolicy, RetryingStore};
pub use unit::{process_unit, UnitContext, UnitError, UnitOutcome, WorkUnit};
