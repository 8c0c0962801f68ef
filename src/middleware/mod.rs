pub mod capture;

pub use capture::{capture_metrics, DbTiming, HandlerError, MetricsRecorder};
