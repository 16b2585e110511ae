//! IPC between the daemon, the session layer and the UI

mod protocol;
mod server;

pub use protocol::{
    read_frame, write_message, DaemonStatus, Frame, Notification, Request, Response,
    MAX_MESSAGE_LEN,
};
pub use server::{Server, ServerContext};
