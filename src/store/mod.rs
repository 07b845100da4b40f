pub mod captureplan;
pub mod counter;
pub mod csv_log;
pub mod csv_metadata;
pub mod csv_rms;
pub mod paths;

pub use counter::CounterStore;
