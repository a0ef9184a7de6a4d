//! projsync daemon runtime: polling driver, control socket, log file.

mod error;
pub mod log_rotation;
pub mod logging;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use log_rotation::LogRotation;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{
    run, run_engine, start_blocking, DaemonSettings, DaemonStatus, Phase, SourceBaseline,
};
