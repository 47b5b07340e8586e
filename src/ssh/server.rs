use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::PrivateKey;
use russh::keys::ssh_key::Algorithm;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::server::Config;
use tokio::net::TcpListener;

use super::handler::ConnectionHandler;
use crate::errors::ServerError;
use crate::protocol::{Endpoint, UploadPackProvider};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Everything the SSH listener needs, fixed at startup.
pub struct SshServer<P: UploadPackProvider> {
    addr: SocketAddr,
    config: Arc<Config>,
    endpoint: Endpoint,
    provider: P,
}

impl<P: UploadPackProvider> SshServer<P> {
    pub fn new(
        addr: SocketAddr,
        host_key: PrivateKey,
        inactivity_timeout: Option<Duration>,
        endpoint: Endpoint,
        provider: P,
    ) -> Self {
        let config = Config {
            server_id: russh::SshId::Standard(format!(
                "SSH-2.0-git-upload-serve_{}",
                env!("CARGO_PKG_VERSION")
            )),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            keys: vec![host_key],
            inactivity_timeout,
            ..Default::default()
        };
        Self {
            addr,
            config: Arc::new(config),
            endpoint,
            provider,
        }
    }

    /// Bind the configured address and accept connections forever.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                transport: "ssh",
                addr: self.addr,
                source,
            })?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener, one task per connection.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().unwrap_or(self.addr);
        tracing::info!(addr = %local_addr, "SSH server listening");

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept ssh connection");
                    // Persistent errors such as EMFILE would otherwise spin.
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            tracing::debug!(%peer_addr, "new ssh client connection");

            let handler = ConnectionHandler::new(
                Some(peer_addr),
                self.endpoint.clone(),
                self.provider.clone(),
            );
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                match russh::server::run_stream(config, stream, handler).await {
                    Ok(session) => {
                        if let Err(e) = session.await {
                            tracing::warn!(%peer_addr, error = %e, "ssh session error");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%peer_addr, error = %e, "ssh handshake failed");
                    }
                }
            });
        }
    }
}

/// Load an OpenSSH host key, or generate an ephemeral Ed25519 key when no path is given.
pub fn load_host_key(path: Option<&Path>) -> Result<PrivateKey, ServerError> {
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading ssh host key");
            russh::keys::load_secret_key(path, None).map_err(|e| ServerError::HostKey {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        }
        None => {
            tracing::info!("generating ephemeral Ed25519 host key");
            PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(|e| {
                ServerError::HostKey {
                    path: "<ephemeral>".to_string(),
                    message: e.to_string(),
                }
            })
        }
    }
}
