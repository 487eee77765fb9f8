pub mod cli;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod signal;
pub mod storage;
