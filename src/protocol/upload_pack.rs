//! Transport-agnostic upload-pack sequence shared by the HTTP handlers and SSH sessions.
//!
//! HTTP splits the sequence over two requests (`info_refs`, then `exchange`); SSH runs both
//! back to back on the channel stream through `serve`.

use tokio::io::{AsyncRead, AsyncWrite};

use super::{
    advertisement::AdvertisedRefs,
    core::{Endpoint, UploadPackProvider},
    pktline::write_all_flushed,
    request::UploadPackRequest,
    types::{ProtocolError, TransportProtocol, UPLOAD_PACK_SERVICE},
};

/// One upload-pack session bound to an endpoint and a transport.
pub struct UploadPack<P: UploadPackProvider> {
    provider: P,
    endpoint: Endpoint,
    transport: TransportProtocol,
}

impl<P: UploadPackProvider> UploadPack<P> {
    pub fn new(provider: P, endpoint: Endpoint, transport: TransportProtocol) -> Self {
        Self {
            provider,
            endpoint,
            transport,
        }
    }

    /// Fetch the advertisement, adding the service prefix smart HTTP requires.
    pub async fn advertise(&self) -> Result<AdvertisedRefs, ProtocolError> {
        let mut refs = self.provider.advertised_refs(&self.endpoint).await?;
        if self.transport == TransportProtocol::Http {
            refs.set_service_prefix(UPLOAD_PACK_SERVICE);
        }
        tracing::debug!(
            transport = ?self.transport,
            refs = refs.refs.len(),
            "advertising references"
        );
        Ok(refs)
    }

    /// Advertise and encode the references into `writer`.
    pub async fn info_refs<W>(&self, writer: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let refs = self.advertise().await?;
        write_all_flushed(writer, &refs.encode()).await
    }

    /// Decode one request from `reader`, run it through the provider and encode the response.
    pub async fn exchange<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), ProtocolError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let request = UploadPackRequest::decode(reader).await?;
        let response = self.provider.upload_pack(&self.endpoint, request).await?;
        let sent = response.encode(writer).await?;
        tracing::info!(transport = ?self.transport, pack_bytes = sent, "upload-pack completed");
        Ok(())
    }

    /// Full stateful sequence on a single bidirectional stream.
    pub async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), ProtocolError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.info_refs(writer).await?;
        self.exchange(reader, writer).await
    }
}
