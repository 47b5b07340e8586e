//! git-upload-serve: read-only `git-upload-pack` for one repository over smart HTTP and SSH.
//!
//! Modules
//! - `protocol`: pkt-line framing, reference advertisement, request/response codecs and the
//!   transport-agnostic `UploadPack` orchestrator behind the `UploadPackProvider` trait.
//! - `repository`: `GitCliProvider`, a provider driving the local `git` binary.
//! - `http`: axum router for `GET /info/refs` and `POST /git-upload-pack`.
//! - `ssh`: russh listener, connection handler and per-channel session state machine.
//! - `config`: command line / environment configuration.
//! - `errors`: process-level errors.

pub mod config;
pub mod errors;
pub mod http;
pub mod protocol;
pub mod repository;
pub mod ssh;

// Core traits and types that external users need to implement/use
pub use config::ServerConfig;
pub use errors::ServerError;
pub use protocol::{Endpoint, ProtocolError, UploadPack, UploadPackProvider};
pub use repository::GitCliProvider;
