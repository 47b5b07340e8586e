//! SSH front end: listener, per-connection russh handler, and the per-channel session state
//! machine running upload-pack behind `exec git-upload-pack`.
pub mod handler;
pub mod server;
pub mod session;

pub use handler::ConnectionHandler;
pub use server::{SshServer, load_host_key};
pub use session::{Phase, RequestKind, SessionChannel, SessionRequest, SshSession};
