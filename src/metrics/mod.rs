pub mod calculator;
pub mod upsert;
pub mod window;

pub use calculator::{compute, EquipmentMetrics, IdealRates, InputLengthError, RollingInputs};
pub use upsert::{display_name, ResultUpserter, UpsertOutcome};
pub use window::{rolling_sum, WindowError};
