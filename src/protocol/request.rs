//! Decoding of the client's upload-pack request: the want section (with capabilities and
//! shallow/deepen lines) up to a flush, then haves until `done`, a flush or end of stream.

use bytes::Bytes;
use tokio::io::AsyncRead;

use super::pktline::{PktLine, read_pkt_line_async, read_until_white_space};
use super::types::{Capability, ObjectId, ProtocolError, parse_capabilities};

/// Shallow clone limits requested by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Depth {
    Commits(u32),
    Since(i64),
    Not(String),
}

/// The client's decoded want/have negotiation payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPackRequest {
    pub wants: Vec<ObjectId>,
    pub capabilities: Vec<Capability>,
    pub shallows: Vec<ObjectId>,
    pub depth: Option<Depth>,
    pub haves: Vec<ObjectId>,
    pub done: bool,
}

impl UploadPackRequest {
    pub fn supports(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Decode a request from a live stream, consuming nothing past its end.
    pub async fn decode<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut request = UploadPackRequest::default();
        request.decode_wants(reader).await?;
        request.decode_haves(reader).await?;
        tracing::debug!(
            wants = request.wants.len(),
            haves = request.haves.len(),
            done = request.done,
            "decoded upload-pack request"
        );
        Ok(request)
    }

    async fn decode_wants<R>(&mut self, reader: &mut R) -> Result<(), ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let line = match read_pkt_line_async(reader).await? {
                Some(PktLine::Data(line)) => line,
                Some(PktLine::Flush) => break,
                None => {
                    return Err(ProtocolError::invalid_request(
                        "stream ended before the want list was flushed",
                    ));
                }
            };

            let mut line = trim_lf(line);
            let command = read_until_white_space(&mut line);
            let is_first = self.wants.is_empty() && self.shallows.is_empty();

            match command.as_str() {
                "want" => {
                    let hash = read_until_white_space(&mut line);
                    self.wants.push(hash.parse()?);
                    if is_first {
                        self.capabilities =
                            parse_capabilities(&String::from_utf8_lossy(&line));
                    }
                }
                _ if is_first => {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "first request line must be a want, got {command:?}"
                    )));
                }
                "shallow" => {
                    let hash = read_until_white_space(&mut line);
                    self.shallows.push(hash.parse()?);
                }
                "deepen" => {
                    let value = read_until_white_space(&mut line);
                    let depth = value.parse::<u32>().map_err(|_| {
                        ProtocolError::InvalidRequest(format!("invalid deepen value {value:?}"))
                    })?;
                    self.depth = Some(Depth::Commits(depth));
                }
                "deepen-since" => {
                    let value = read_until_white_space(&mut line);
                    let since = value.parse::<i64>().map_err(|_| {
                        ProtocolError::InvalidRequest(format!(
                            "invalid deepen-since value {value:?}"
                        ))
                    })?;
                    self.depth = Some(Depth::Since(since));
                }
                "deepen-not" => {
                    let value = read_until_white_space(&mut line);
                    self.depth = Some(Depth::Not(value));
                }
                _ => {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "unexpected line in want list: {command:?}"
                    )));
                }
            }
        }

        if self.wants.is_empty() {
            return Err(ProtocolError::invalid_request("request carries no wants"));
        }
        Ok(())
    }

    async fn decode_haves<R>(&mut self, reader: &mut R) -> Result<(), ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let line = match read_pkt_line_async(reader).await? {
                Some(PktLine::Data(line)) => line,
                Some(PktLine::Flush) | None => return Ok(()),
            };

            let mut line = trim_lf(line);
            let command = read_until_white_space(&mut line);
            match command.as_str() {
                "have" => {
                    let hash = read_until_white_space(&mut line);
                    self.haves.push(hash.parse()?);
                }
                "done" => {
                    self.done = true;
                    return Ok(());
                }
                _ => {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "unexpected line in have list: {command:?}"
                    )));
                }
            }
        }
    }
}

fn trim_lf(line: Bytes) -> Bytes {
    match line.last() {
        Some(b'\n') => line.slice(..line.len() - 1),
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::protocol::pktline::{add_flush, add_pkt_line_string};

    fn id(c: char) -> String {
        c.to_string().repeat(40)
    }

    fn encode(lines: &[Option<String>]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for line in lines {
            match line {
                Some(text) => add_pkt_line_string(&mut buf, text.clone()),
                None => add_flush(&mut buf),
            }
        }
        buf.to_vec()
    }

    #[tokio::test]
    async fn decodes_clone_request() {
        let raw = encode(&[
            Some(format!("want {} side-band-64k ofs-delta agent=git/2.43\n", id('a'))),
            Some(format!("want {}\n", id('b'))),
            None,
            Some("done\n".to_string()),
        ]);
        let request = UploadPackRequest::decode(&mut &raw[..]).await.unwrap();

        assert_eq!(request.wants.len(), 2);
        assert!(request.supports(&Capability::SideBand64k));
        assert!(request.supports(&Capability::OfsDelta));
        assert!(request.haves.is_empty());
        assert!(request.done);
    }

    #[tokio::test]
    async fn decodes_haves_until_flush() {
        let raw = encode(&[
            Some(format!("want {}\n", id('a'))),
            None,
            Some(format!("have {}\n", id('c'))),
            Some(format!("have {}\n", id('d'))),
            None,
        ]);
        let request = UploadPackRequest::decode(&mut &raw[..]).await.unwrap();
        assert_eq!(request.haves.len(), 2);
        assert!(!request.done);
    }

    #[tokio::test]
    async fn stops_at_done_without_over_reading() {
        let mut raw = encode(&[
            Some(format!("want {}\n", id('a'))),
            None,
            Some("done\n".to_string()),
        ]);
        raw.extend_from_slice(b"trailing");
        let mut reader = &raw[..];
        UploadPackRequest::decode(&mut reader).await.unwrap();
        assert_eq!(reader, b"trailing");
    }

    #[tokio::test]
    async fn records_shallow_and_depth() {
        let raw = encode(&[
            Some(format!("want {} shallow\n", id('a'))),
            Some(format!("shallow {}\n", id('e'))),
            Some("deepen 1\n".to_string()),
            None,
            Some("done\n".to_string()),
        ]);
        let request = UploadPackRequest::decode(&mut &raw[..]).await.unwrap();
        assert_eq!(request.shallows.len(), 1);
        assert_eq!(request.depth, Some(Depth::Commits(1)));
    }

    #[tokio::test]
    async fn rejects_request_not_starting_with_want() {
        let raw = encode(&[Some(format!("have {}\n", id('a'))), None]);
        let err = UploadPackRequest::decode(&mut &raw[..]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn rejects_empty_want_list() {
        let raw = encode(&[None, Some("done\n".to_string())]);
        let err = UploadPackRequest::decode(&mut &raw[..]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn rejects_truncated_want_list() {
        let raw = encode(&[Some(format!("want {}\n", id('a')))]);
        let err = UploadPackRequest::decode(&mut &raw[..]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest(_)));
    }
}
