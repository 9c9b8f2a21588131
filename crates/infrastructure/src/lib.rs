pub mod launcher;
pub mod memory;
pub mod messenger;
pub mod telemetry;
pub mod transport;

pub use launcher::{LocalLauncher, SshLauncher};
pub use messenger::TcpMessenger;
pub use telemetry::PerfLog;
pub use transport::{read_message, send_message, write_message, MAX_FRAME_BYTES};
