pub mod duckdb;
pub mod traits;

pub use self::duckdb::DuckDbStore;
pub use traits::{
    Aggregate, AggregateSeries, DatapointBatch, NewSeries, SeriesFilter, SeriesInfo, StoreError,
    TimeSeriesStore,
};
