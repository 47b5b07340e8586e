//! Encoding of the upload-pack response: the ACK/NAK server reply followed by the pack,
//! multiplexed on side-band 1 when the client asked for it.

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::pktline::{add_flush, add_pkt_line_string, add_side_band, write_all_flushed};
use super::types::{LF, ObjectId, ProtocolError, ProtocolStream, SP, SideBand, SideBandMode};

/// Server reply preceding the pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerResponse {
    Nak,
    Ack(ObjectId),
}

/// Pack stream plus framing, produced once per session.
pub struct UploadPackResponse {
    pub server_response: ServerResponse,
    pub side_band: SideBandMode,
    pub pack: ProtocolStream,
}

impl std::fmt::Debug for UploadPackResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPackResponse")
            .field("server_response", &self.server_response)
            .field("side_band", &self.side_band)
            .finish_non_exhaustive()
    }
}

impl UploadPackResponse {
    /// Stream the response into `writer`, returning the number of pack bytes sent.
    pub async fn encode<W>(self, writer: &mut W) -> Result<u64, ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut head = BytesMut::new();
        match &self.server_response {
            ServerResponse::Nak => add_pkt_line_string(&mut head, format!("NAK{LF}")),
            ServerResponse::Ack(id) => add_pkt_line_string(&mut head, format!("ACK{SP}{id}{LF}")),
        }
        writer.write_all(&head).await?;

        let mut pack = self.pack;
        let mut sent = 0u64;
        while let Some(chunk) = pack.next().await {
            let chunk = chunk?;
            sent += chunk.len() as u64;
            match self.side_band.max_payload() {
                Some(max_payload) => {
                    let mut framed = BytesMut::with_capacity(chunk.len() + 16);
                    add_side_band(&mut framed, SideBand::PackfileData, &chunk, max_payload);
                    writer.write_all(&framed).await?;
                }
                None => writer.write_all(&chunk).await?,
            }
        }

        let mut tail = BytesMut::new();
        if self.side_band != SideBandMode::None {
            add_flush(&mut tail);
        }
        write_all_flushed(writer, &tail).await?;
        tracing::debug!(pack_bytes = sent, "encoded upload-pack response");
        Ok(sent)
    }
}
