//! Serve mode: answer queries over a Unix socket

pub mod protocol;
pub mod server;

pub use protocol::{Command, Response, PROTOCOL_VERSION};
pub use server::{IpcServer, ServeContext};
