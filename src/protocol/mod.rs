/// Git Protocol Module
///
/// Transport-agnostic upload-pack implementation shared by the HTTP and SSH front ends:
/// pkt-line framing, the reference advertisement, request decoding, response encoding, and the
/// orchestrator tying them to an `UploadPackProvider`.
pub mod advertisement;
pub mod core;
pub mod pktline;
pub mod request;
pub mod response;
pub mod types;
pub mod upload_pack;

// Re-export main interfaces
pub use advertisement::{AdvertisedRefs, PrefixLine};
pub use core::{Endpoint, UploadPackProvider};
pub use request::{Depth, UploadPackRequest};
pub use response::{ServerResponse, UploadPackResponse};
pub use types::*;
pub use upload_pack::UploadPack;
