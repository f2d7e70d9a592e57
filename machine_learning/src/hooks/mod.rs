mod anomaly;
mod hook;
mod logger;
mod optimizer_hook;
mod spec;

pub use anomaly::{AnomalousParameterDetector, AnomalyDetector, DetectionStrategy};
pub use hook::{Hook, IterContext, IterStats};
pub use logger::{LogCrateSink, LogSink, RecordingSink};
pub use optimizer_hook::OptimizerHook;
pub use spec::OptimizerHookSpec;
