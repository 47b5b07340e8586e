use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use bytes::Bytes;
use futures::stream::Stream;

/// Protocol error types
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid service: {0}")]
    InvalidService(String),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pack error: {0}")]
    Pack(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    pub fn invalid_service(service: &str) -> Self {
        ProtocolError::InvalidService(service.to_string())
    }

    pub fn repository_error(msg: String) -> Self {
        ProtocolError::Internal(msg)
    }

    pub fn invalid_request(msg: &str) -> Self {
        ProtocolError::InvalidRequest(msg.to_string())
    }

    pub fn unsupported(msg: &str) -> Self {
        ProtocolError::Unsupported(msg.to_string())
    }
}

/// Stream of raw bytes flowing out of a provider, typically pack data.
pub type ProtocolStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProtocolError>> + Send>>;

/// Git transport protocol types
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum TransportProtocol {
    #[default]
    Http,
    Ssh,
}

/// Git service types for smart protocol
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ServiceType {
    UploadPack,
    ReceivePack,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServiceType::UploadPack => write!(f, "git-upload-pack"),
            ServiceType::ReceivePack => write!(f, "git-receive-pack"),
        }
    }
}

impl FromStr for ServiceType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git-upload-pack" => Ok(ServiceType::UploadPack),
            "git-receive-pack" => Ok(ServiceType::ReceivePack),
            _ => Err(ProtocolError::InvalidService(s.to_string())),
        }
    }
}

/// Capabilities understood on the upload-pack path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    MultiAck,
    MultiAckDetailed,
    NoDone,
    SideBand,
    SideBand64k,
    OfsDelta,
    ThinPack,
    NoProgress,
    IncludeTag,
    Shallow,
    DeepenSince,
    DeepenNot,
    AllowTipSha1InWant,
    AllowReachableSha1InWant,
    SymRef(String),
    ObjectFormat(String),
    Agent(String),
    Unknown(String),
}

impl FromStr for Capability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Parameterized capabilities
        if let Some(rest) = s.strip_prefix("agent=") {
            return Ok(Capability::Agent(rest.to_string()));
        }
        if let Some(rest) = s.strip_prefix("symref=") {
            return Ok(Capability::SymRef(rest.to_string()));
        }
        if let Some(rest) = s.strip_prefix("object-format=") {
            return Ok(Capability::ObjectFormat(rest.to_string()));
        }

        match s {
            "multi_ack" => Ok(Capability::MultiAck),
            "multi_ack_detailed" => Ok(Capability::MultiAckDetailed),
            "no-done" => Ok(Capability::NoDone),
            "side-band" => Ok(Capability::SideBand),
            "side-band-64k" => Ok(Capability::SideBand64k),
            "ofs-delta" => Ok(Capability::OfsDelta),
            "thin-pack" => Ok(Capability::ThinPack),
            "no-progress" => Ok(Capability::NoProgress),
            "include-tag" => Ok(Capability::IncludeTag),
            "shallow" => Ok(Capability::Shallow),
            "deepen-since" => Ok(Capability::DeepenSince),
            "deepen-not" => Ok(Capability::DeepenNot),
            "allow-tip-sha1-in-want" => Ok(Capability::AllowTipSha1InWant),
            "allow-reachable-sha1-in-want" => Ok(Capability::AllowReachableSha1InWant),
            _ => Ok(Capability::Unknown(s.to_string())),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::MultiAck => write!(f, "multi_ack"),
            Capability::MultiAckDetailed => write!(f, "multi_ack_detailed"),
            Capability::NoDone => write!(f, "no-done"),
            Capability::SideBand => write!(f, "side-band"),
            Capability::SideBand64k => write!(f, "side-band-64k"),
            Capability::OfsDelta => write!(f, "ofs-delta"),
            Capability::ThinPack => write!(f, "thin-pack"),
            Capability::NoProgress => write!(f, "no-progress"),
            Capability::IncludeTag => write!(f, "include-tag"),
            Capability::Shallow => write!(f, "shallow"),
            Capability::DeepenSince => write!(f, "deepen-since"),
            Capability::DeepenNot => write!(f, "deepen-not"),
            Capability::AllowTipSha1InWant => write!(f, "allow-tip-sha1-in-want"),
            Capability::AllowReachableSha1InWant => write!(f, "allow-reachable-sha1-in-want"),
            Capability::SymRef(value) => write!(f, "symref={value}"),
            Capability::ObjectFormat(format) => write!(f, "object-format={format}"),
            Capability::Agent(agent) => write!(f, "agent={agent}"),
            Capability::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// Parse a whitespace separated capability list.
pub fn parse_capabilities(cap_str: &str) -> Vec<Capability> {
    cap_str
        .split_whitespace()
        .filter_map(|cap| cap.parse::<Capability>().ok())
        .collect()
}

/// Side-band channels for multiplexed data streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideBand {
    /// Sideband 1 contains packfile data
    PackfileData,
    /// Sideband 2 contains progress information
    ProgressInfo,
    /// Sideband 3 contains error information
    Error,
}

impl SideBand {
    pub fn value(&self) -> u8 {
        match self {
            Self::PackfileData => b'\x01',
            Self::ProgressInfo => b'\x02',
            Self::Error => b'\x03',
        }
    }
}

/// Side-band flavour negotiated by the client's first want line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideBandMode {
    None,
    /// `side-band`: at most 1000 bytes per pkt-line.
    Small,
    /// `side-band-64k`: at most 65520 bytes per pkt-line.
    Large,
}

impl SideBandMode {
    pub fn from_capabilities(caps: &[Capability]) -> Self {
        if caps.contains(&Capability::SideBand64k) {
            SideBandMode::Large
        } else if caps.contains(&Capability::SideBand) {
            SideBandMode::Small
        } else {
            SideBandMode::None
        }
    }

    /// Largest payload carried by one side-band pkt-line, band byte excluded.
    pub fn max_payload(&self) -> Option<usize> {
        match self {
            SideBandMode::None => None,
            SideBandMode::Small => Some(1000 - 4 - 1),
            SideBandMode::Large => Some(MAX_PKT_LINE_LEN - 4 - 1),
        }
    }
}

/// Hex object name, SHA-1 (40) or SHA-256 (64) digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn zero() -> Self {
        ObjectId(ZERO_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }
}

impl FromStr for ObjectId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 && s.len() != 64 {
            return Err(ProtocolError::InvalidRequest(format!(
                "invalid object id length {}: {s}",
                s.len()
            )));
        }
        hex::decode(s)
            .map_err(|e| ProtocolError::InvalidRequest(format!("invalid object id {s}: {e}")))?;
        Ok(ObjectId(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zero object ID constant
pub const ZERO_ID: &str = "0000000000000000000000000000000000000000";

/// Protocol constants
pub const LF: char = '\n';
pub const SP: char = ' ';
pub const NUL: char = '\0';
pub const PKT_LINE_END_MARKER: &[u8; 4] = b"0000";
/// Largest pkt-line, length header included.
pub const MAX_PKT_LINE_LEN: usize = 65520;

pub const UPLOAD_PACK_SERVICE: &str = "git-upload-pack";
pub const AGENT: &str = concat!("git-upload-serve/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_accepts_sha1_and_sha256() {
        let sha1: ObjectId = "ABCDabcd00000000000000000000000000000000".parse().unwrap();
        assert_eq!(sha1.as_str(), "abcdabcd00000000000000000000000000000000");
        let sha256 = "1".repeat(64).parse::<ObjectId>();
        assert!(sha256.is_ok());
    }

    #[test]
    fn object_id_rejects_garbage() {
        assert!("abcd".parse::<ObjectId>().is_err());
        assert!("z".repeat(40).parse::<ObjectId>().is_err());
    }

    #[test]
    fn capabilities_round_trip_through_display() {
        let caps = parse_capabilities("side-band-64k ofs-delta agent=git/2.43.0 frobnicate");
        assert_eq!(caps[0], Capability::SideBand64k);
        assert_eq!(caps[2], Capability::Agent("git/2.43.0".to_string()));
        assert_eq!(caps[3].to_string(), "frobnicate");
    }

    #[test]
    fn side_band_mode_prefers_64k() {
        let caps = vec![Capability::SideBand, Capability::SideBand64k];
        assert_eq!(SideBandMode::from_capabilities(&caps), SideBandMode::Large);
        assert_eq!(SideBandMode::Large.max_payload(), Some(65515));
        assert_eq!(SideBandMode::Small.max_payload(), Some(995));
        assert_eq!(SideBandMode::from_capabilities(&[]), SideBandMode::None);
    }
}
