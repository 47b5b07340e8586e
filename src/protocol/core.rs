//! Provider seam of the crate
//!
//! `UploadPackProvider` is the only way the transports reach repository data: one operation
//! advertises references, the other turns a decoded request into a pack response. How refs are
//! listed or packs are built stays behind this trait.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::advertisement::AdvertisedRefs;
use super::request::UploadPackRequest;
use super::response::UploadPackResponse;
use super::types::ProtocolError;

/// Locator of the repository being served.
///
/// Fixed at startup; every session on either transport serves the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    git_dir: Arc<PathBuf>,
}

impl Endpoint {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: Arc::new(git_dir.into()),
        }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }
}

/// Repository access used by the upload-pack orchestrator.
#[async_trait]
pub trait UploadPackProvider: Send + Sync + Clone + 'static {
    /// Produce the references offered before negotiation.
    async fn advertised_refs(&self, endpoint: &Endpoint) -> Result<AdvertisedRefs, ProtocolError>;

    /// Answer a decoded request with the server reply and the pack stream.
    async fn upload_pack(
        &self,
        endpoint: &Endpoint,
        request: UploadPackRequest,
    ) -> Result<UploadPackResponse, ProtocolError>;
}
