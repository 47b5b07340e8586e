//! Pkt-line framing shared by the advertisement, request and response codecs: length-prefixed
//! lines, the `0000` flush marker, and async readers/writers for live transport streams.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::types::{MAX_PKT_LINE_LEN, PKT_LINE_END_MARKER, ProtocolError, SideBand};

/// One decoded pkt-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Flush,
    Data(Bytes),
}

/// Read a packet line from the given bytes buffer
///
/// Returns a tuple of (bytes_consumed, packet_data); a flush consumes 4 bytes and yields an
/// empty payload, malformed or truncated input consumes nothing.
#[cfg(test)]
pub(crate) fn read_pkt_line(bytes: &mut Bytes) -> (usize, Bytes) {
    if bytes.len() < 4 {
        return (0, Bytes::new());
    }

    let Some(pkt_length) = parse_length(&bytes[..4]) else {
        tracing::warn!("Invalid packet length header: {:?}", &bytes[..4]);
        return (0, Bytes::new());
    };

    if pkt_length == 0 {
        bytes.advance(4);
        return (4, Bytes::new());
    }

    if pkt_length < 4 {
        tracing::warn!("Invalid packet length: {} (must be >= 4)", pkt_length);
        return (0, Bytes::new());
    }

    if bytes.len() < pkt_length {
        tracing::warn!(
            "Insufficient data: need {} bytes, have {}",
            pkt_length,
            bytes.len()
        );
        return (0, Bytes::new());
    }

    bytes.advance(4);
    let pkt_line = bytes.copy_to_bytes(pkt_length - 4);
    (pkt_length, pkt_line)
}

/// Read one pkt-line from a live stream.
///
/// `Ok(None)` means the stream ended cleanly on a packet boundary. A stream ending inside a
/// packet is an I/O error.
pub async fn read_pkt_line_async<R>(reader: &mut R) -> Result<Option<PktLine>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended inside pkt-line header",
            )));
        }
        filled += n;
    }

    let pkt_length = parse_length(&header).ok_or_else(|| {
        ProtocolError::InvalidRequest(format!(
            "invalid pkt-line length header {:?}",
            String::from_utf8_lossy(&header)
        ))
    })?;

    if pkt_length == 0 {
        return Ok(Some(PktLine::Flush));
    }
    if pkt_length < 4 || pkt_length > MAX_PKT_LINE_LEN {
        return Err(ProtocolError::InvalidRequest(format!(
            "invalid pkt-line length {pkt_length}"
        )));
    }

    let mut payload = vec![0u8; pkt_length - 4];
    reader.read_exact(&mut payload).await?;
    Ok(Some(PktLine::Data(Bytes::from(payload))))
}

fn parse_length(header: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header).ok()?;
    usize::from_str_radix(text, 16).ok()
}

/// Add a packet line string to the buffer with proper length prefix
pub fn add_pkt_line_string(pkt_line_stream: &mut BytesMut, buf_str: String) {
    add_pkt_line_bytes(pkt_line_stream, buf_str.as_bytes());
}

pub fn add_pkt_line_bytes(pkt_line_stream: &mut BytesMut, data: &[u8]) {
    let length = data.len() + 4;
    pkt_line_stream.put(Bytes::from(format!("{length:04x}")));
    pkt_line_stream.put(data);
}

pub fn add_flush(pkt_line_stream: &mut BytesMut) {
    pkt_line_stream.put(&PKT_LINE_END_MARKER[..]);
}

/// Frame `data` on one side-band channel, splitting at `max_payload`.
pub fn add_side_band(
    pkt_line_stream: &mut BytesMut,
    band: SideBand,
    data: &[u8],
    max_payload: usize,
) {
    for chunk in data.chunks(max_payload) {
        let length = chunk.len() + 5;
        pkt_line_stream.put(Bytes::from(format!("{length:04x}")));
        pkt_line_stream.put_u8(band.value());
        pkt_line_stream.put(chunk);
    }
}

/// Write a pre-encoded buffer and flush the writer.
pub async fn write_all_flushed<W>(writer: &mut W, data: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read until whitespace and return the extracted string
pub fn read_until_white_space(bytes: &mut Bytes) -> String {
    let mut buf = Vec::new();
    while bytes.has_remaining() {
        let c = bytes.get_u8();
        if c.is_ascii_whitespace() || c == 0 {
            break;
        }
        buf.push(c);
    }
    match String::from_utf8(buf) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Invalid UTF-8 in protocol data: {}", e);
            String::new()
        }
    }
}
