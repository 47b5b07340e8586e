//! russh connection handler: accepts any client, opens one session task per `session` channel and
//! feeds it the channel's requests and input in arrival order.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use russh::keys::PublicKey;
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty, Sig};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};

use super::session::{SessionChannel, SessionRequest, SshSession};
use crate::protocol::{
    Endpoint, ProtocolError, TransportProtocol, UploadPack, UploadPackProvider,
};

const OUTPUT_BUFFER: usize = 64 * 1024;

/// Queues feeding one session task.
struct ChannelQueues {
    requests: mpsc::UnboundedSender<SessionRequest>,
    /// Dropped on EOF so the session reader sees end of stream.
    input: Option<mpsc::UnboundedSender<Bytes>>,
}

/// Per-connection russh handler.
pub struct ConnectionHandler<P: UploadPackProvider> {
    peer_addr: Option<SocketAddr>,
    endpoint: Endpoint,
    provider: P,
    channels: HashMap<ChannelId, ChannelQueues>,
}

impl<P: UploadPackProvider> ConnectionHandler<P> {
    pub fn new(peer_addr: Option<SocketAddr>, endpoint: Endpoint, provider: P) -> Self {
        Self {
            peer_addr,
            endpoint,
            provider,
            channels: HashMap::new(),
        }
    }

    fn enqueue(&mut self, channel: ChannelId, request: SessionRequest) {
        let Some(queues) = self.channels.get(&channel) else {
            debug!(peer_addr = ?self.peer_addr, ?channel, "request on unknown channel");
            return;
        };
        // The session task stops reading once it is done; late requests are dropped.
        if queues.requests.send(request).is_err() {
            debug!(peer_addr = ?self.peer_addr, ?channel, "session already finished");
        }
    }
}

impl<P: UploadPackProvider> Handler for ConnectionHandler<P> {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        debug!(peer_addr = ?self.peer_addr, user, "accepting client without credentials");
        Ok(Auth::Accept)
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        debug!(peer_addr = ?self.peer_addr, user, "accepting password client");
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        debug!(peer_addr = ?self.peer_addr, user, "accepting public key client");
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        self.channels.insert(
            id,
            ChannelQueues {
                requests: request_tx,
                input: Some(input_tx),
            },
        );

        let upload_pack = UploadPack::new(
            self.provider.clone(),
            self.endpoint.clone(),
            TransportProtocol::Ssh,
        );
        let mut channel = RusshChannel {
            id,
            handle: session.handle(),
            requests: request_rx,
            input: Some(input_rx),
        };
        let peer_addr = self.peer_addr;
        tokio::spawn(async move {
            let exit_status = SshSession::new().run(&upload_pack, &mut channel).await;
            info!(?peer_addr, channel = ?id, exit_status, "ssh session finished");
        });

        debug!(peer_addr = ?self.peer_addr, channel = ?id, "session channel opened");
        Ok(true)
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.enqueue(channel, SessionRequest::env(variable_name, variable_value));
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        debug!(peer_addr = ?self.peer_addr, ?channel, command = %command, "exec request");
        self.enqueue(channel, SessionRequest::exec(command));
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.enqueue(channel, SessionRequest::other("shell"));
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(peer_addr = ?self.peer_addr, ?channel, subsystem = name, "subsystem request");
        self.enqueue(channel, SessionRequest::other("subsystem"));
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.enqueue(channel, SessionRequest::other("pty-req"));
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.enqueue(channel, SessionRequest::other("x11-req"));
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.enqueue(channel, SessionRequest::other("window-change"));
        Ok(())
    }

    async fn agent_request(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.enqueue(channel, SessionRequest::other("auth-agent-req@openssh.com"));
        Ok(false)
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(peer_addr = ?self.peer_addr, ?channel, ?signal, "signal request");
        self.enqueue(channel, SessionRequest::other("signal"));
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(input) = self
            .channels
            .get(&channel)
            .and_then(|queues| queues.input.as_ref())
        {
            let _ = input.send(Bytes::copy_from_slice(data));
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(peer_addr = ?self.peer_addr, ?channel, "channel eof");
        if let Some(queues) = self.channels.get_mut(&channel) {
            queues.input = None;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(peer_addr = ?self.peer_addr, ?channel, "channel closed");
        self.channels.remove(&channel);
        Ok(())
    }
}

/// Live russh channel driven by a session task.
struct RusshChannel {
    id: ChannelId,
    handle: Handle,
    requests: mpsc::UnboundedReceiver<SessionRequest>,
    input: Option<mpsc::UnboundedReceiver<Bytes>>,
}

#[async_trait]
impl SessionChannel for RusshChannel {
    async fn next_request(&mut self) -> Option<SessionRequest> {
        self.requests.recv().await
    }

    async fn reply(&mut self, success: bool) {
        let sent = if success {
            self.handle.channel_success(self.id).await
        } else {
            self.handle.channel_failure(self.id).await
        };
        if sent.is_err() {
            debug!(channel = ?self.id, success, "could not reply, connection closed");
        }
    }

    async fn serve<P: UploadPackProvider>(
        &mut self,
        upload_pack: &UploadPack<P>,
    ) -> Result<(), ProtocolError> {
        let input = self
            .input
            .take()
            .ok_or_else(|| ProtocolError::Internal("channel input already consumed".into()))?;
        let mut reader =
            StreamReader::new(UnboundedReceiverStream::new(input).map(Ok::<_, io::Error>));

        let (mut writer, output) = tokio::io::duplex(OUTPUT_BUFFER);
        let pump = tokio::spawn(pump_output(self.handle.clone(), self.id, output));

        let served = upload_pack.serve(&mut reader, &mut writer).await;
        let _ = writer.shutdown().await;
        drop(writer);

        let pumped = pump
            .await
            .map_err(|e| ProtocolError::Internal(format!("output task failed: {e}")))?;
        served?;
        pumped.map_err(ProtocolError::Io)
    }

    async fn finish(&mut self, exit_status: u32) {
        // exit-status, then EOF, then close.
        if self
            .handle
            .exit_status_request(self.id, exit_status)
            .await
            .is_err()
        {
            warn!(channel = ?self.id, exit_status, "could not deliver exit status");
        }
        let _ = self.handle.eof(self.id).await;
        let _ = self.handle.close(self.id).await;
    }
}

/// Forward everything written by the session to the channel.
async fn pump_output(handle: Handle, id: ChannelId, output: DuplexStream) -> io::Result<()> {
    let mut chunks = ReaderStream::new(output);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        handle
            .data(id, CryptoVec::from_slice(&chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "ssh channel closed"))?;
    }
    Ok(())
}
