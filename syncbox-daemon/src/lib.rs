//! Syncbox client daemon: watcher + engine loop + control socket server.

mod error;
pub mod protocol;
pub mod remote;
mod runtime;
pub mod watcher;

pub use error::DaemonError;
pub use protocol::{
    request, request_register_user, request_shutdown, send_passthrough, ControlCommand,
    ControlResponse,
};
pub use remote::{HttpRemote, RemoteClient, RemoteFailure};
pub use runtime::{run, start_blocking, Daemon, SERVER_SNAPSHOT_COMMAND};
