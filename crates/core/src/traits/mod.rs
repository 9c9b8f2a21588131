pub mod launcher;
pub mod messenger;
pub mod telemetry;

pub use launcher::{FailureCallback, LaunchRequest, LaunchSignal, RemoteLauncher};
pub use messenger::WorkerMessenger;
pub use telemetry::{perf, NullSink, TelemetrySink};
