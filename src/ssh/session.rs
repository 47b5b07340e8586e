//! Per-channel session state machine: `env` requests, then one `exec` running upload-pack.
//!
//! The machine only sees a [`SessionChannel`], so it runs the same against a live russh channel
//! and against an in-memory channel in tests.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::protocol::{ProtocolError, UPLOAD_PACK_SERVICE, UploadPack, UploadPackProvider};

pub const GIT_PROTOCOL_ENV: &str = "GIT_PROTOCOL";
pub const REQUIRED_GIT_PROTOCOL: &str = "version=2";

/// Channel request as queued by the connection handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Env { name: String, value: String },
    Exec { command: String },
    /// Any request type the session does not serve (`shell`, `subsystem`, `pty-req`, ...).
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub kind: RequestKind,
    pub want_reply: bool,
}

impl SessionRequest {
    pub fn env(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Env {
                name: name.into(),
                value: value.into(),
            },
            want_reply: true,
        }
    }

    pub fn exec(command: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Exec {
                command: command.into(),
            },
            want_reply: true,
        }
    }

    pub fn other(kind: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Other(kind.into()),
            want_reply: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingRequest,
    Exec,
    Done,
}

/// One accepted session channel as seen by the state machine.
#[async_trait]
pub trait SessionChannel: Send {
    /// Next request in arrival order, `None` once the channel is gone.
    async fn next_request(&mut self) -> Option<SessionRequest>;

    /// Answer the request currently being processed.
    async fn reply(&mut self, success: bool);

    /// Run upload-pack over the channel's byte stream. All output has reached the peer when
    /// this returns.
    async fn serve<P: UploadPackProvider>(
        &mut self,
        upload_pack: &UploadPack<P>,
    ) -> Result<(), ProtocolError>;

    /// Send the exit status, then EOF and close.
    async fn finish(&mut self, exit_status: u32);
}

/// Mutable state of one SSH session channel.
#[derive(Debug)]
pub struct SshSession {
    env: HashMap<String, String>,
    exit_status: u32,
    phase: Phase,
}

impl Default for SshSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SshSession {
    pub fn new() -> Self {
        Self {
            env: HashMap::new(),
            exit_status: 0,
            phase: Phase::AwaitingRequest,
        }
    }

    pub fn env(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    pub fn exit_status(&self) -> u32 {
        self.exit_status
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drive the channel to completion and return the exit status that was sent.
    pub async fn run<P, C>(mut self, upload_pack: &UploadPack<P>, channel: &mut C) -> u32
    where
        P: UploadPackProvider,
        C: SessionChannel,
    {
        while self.phase == Phase::AwaitingRequest {
            let Some(request) = channel.next_request().await else {
                tracing::debug!("request queue closed before exec");
                break;
            };
            self.handle(request, upload_pack, channel).await;
        }

        self.phase = Phase::Done;
        channel.finish(self.exit_status).await;
        self.exit_status
    }

    async fn handle<P, C>(
        &mut self,
        request: SessionRequest,
        upload_pack: &UploadPack<P>,
        channel: &mut C,
    ) where
        P: UploadPackProvider,
        C: SessionChannel,
    {
        let want_reply = request.want_reply;
        match request.kind {
            RequestKind::Env { name, value } => {
                tracing::debug!(name = %name, value = %value, "env request");
                self.env.insert(name, value);
                if want_reply {
                    channel.reply(true).await;
                }
            }
            RequestKind::Exec { command } => {
                self.phase = Phase::Exec;
                self.exec(&command, want_reply, upload_pack, channel).await;
                self.phase = Phase::Done;
            }
            RequestKind::Other(kind) => {
                tracing::warn!(request = %kind, "unsupported channel request");
                if want_reply {
                    channel.reply(false).await;
                }
                self.fail();
                self.phase = Phase::Done;
            }
        }
    }

    async fn exec<P, C>(
        &mut self,
        command: &str,
        want_reply: bool,
        upload_pack: &UploadPack<P>,
        channel: &mut C,
    ) where
        P: UploadPackProvider,
        C: SessionChannel,
    {
        let Some(args) = shlex::split(command) else {
            tracing::warn!(command = %command, "exec command does not lex");
            self.fail();
            return;
        };

        match args.first().map(String::as_str) {
            Some(UPLOAD_PACK_SERVICE) => {
                // No reply on this path, only the exit status.
                if self.env(GIT_PROTOCOL_ENV) != Some(REQUIRED_GIT_PROTOCOL) {
                    tracing::warn!(
                        git_protocol = ?self.env(GIT_PROTOCOL_ENV),
                        "rejecting upload-pack without {GIT_PROTOCOL_ENV}={REQUIRED_GIT_PROTOCOL}"
                    );
                    self.fail();
                    return;
                }

                tracing::info!(args = ?&args[1..], "serving git-upload-pack");
                match channel.serve(upload_pack).await {
                    Ok(()) => {
                        if want_reply {
                            channel.reply(true).await;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "git-upload-pack failed");
                        self.fail();
                    }
                }
            }
            other => {
                tracing::warn!(command = ?other, "refusing exec command");
                if want_reply {
                    channel.reply(false).await;
                }
                self.fail();
            }
        }
    }

    fn fail(&mut self) {
        self.exit_status = 1;
    }
}
