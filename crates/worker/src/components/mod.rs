pub mod master_client;
pub mod signal_handler;
pub mod stats_reporter;

pub use master_client::MasterClient;
pub use signal_handler::spawn_signal_listener;
pub use stats_reporter::{StatsReporter, StatsTracker};
