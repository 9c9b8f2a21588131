pub mod components;
pub mod connections;
pub mod queue;
pub mod runtime;

pub use components::{spawn_signal_listener, MasterClient, StatsReporter, StatsTracker};
pub use connections::{Connection, ConnectionWriter, Connections};
pub use queue::WorkQueue;
pub use runtime::{DrainHandle, ExitReason, WorkerOptions, WorkerPhase, WorkerRuntime};
