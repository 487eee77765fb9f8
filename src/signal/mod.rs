pub mod catalog;
pub mod reader;
pub mod reconstruct;
pub mod types;

pub use catalog::SignalCatalog;
pub use reader::{ReadError, WindowReader, WindowSamples};
pub use reconstruct::reconstruct;
pub use types::{
    DenseSignal, MetricBatch, SamplePoint, SeriesDescriptor, SignalType, TimeWindow, MINUTE_MS,
};
