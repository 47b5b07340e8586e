//! Upload-pack provider backed by the local `git` binary.
//!
//! References come from `for-each-ref`, common haves from `cat-file --batch-check`, and packs
//! are streamed straight out of `pack-objects --revs --stdout`.

use std::ffi::OsStr;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, future};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::io::ReaderStream;

use crate::protocol::{
    AGENT, AdvertisedRefs, Capability, Endpoint, ObjectId, ProtocolError, ServerResponse,
    SideBandMode, UploadPackProvider, UploadPackRequest, UploadPackResponse,
};

/// Provider shelling out to `git --git-dir <endpoint>`.
#[derive(Debug, Clone, Default)]
pub struct GitCliProvider;

impl GitCliProvider {
    pub fn new() -> Self {
        Self
    }

    fn git_cmd(&self, endpoint: &Endpoint) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("--git-dir").arg(endpoint.git_dir());
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run_git<I, S>(&self, endpoint: &Endpoint, args: I) -> Result<Output, ProtocolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.git_cmd(endpoint)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(ProtocolError::Io)
    }

    async fn ensure_repository(&self, endpoint: &Endpoint) -> Result<(), ProtocolError> {
        let found = tokio::fs::metadata(endpoint.git_dir())
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !found {
            return Err(ProtocolError::RepositoryNotFound(
                endpoint.git_dir().display().to_string(),
            ));
        }
        Ok(())
    }

    /// Run a read-only query, `None` when git exits non-zero.
    async fn query(
        &self,
        endpoint: &Endpoint,
        args: &[&str],
    ) -> Result<Option<String>, ProtocolError> {
        let output = self.run_git(endpoint, args).await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    /// Subset of `ids` present in the object database, in input order.
    async fn existing_objects(
        &self,
        endpoint: &Endpoint,
        ids: &[ObjectId],
    ) -> Result<Vec<ObjectId>, ProtocolError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut child = self
            .git_cmd(endpoint)
            .args(["cat-file", "--batch-check"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut input = String::new();
        for id in ids {
            input.push_str(id.as_str());
            input.push('\n');
        }
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProtocolError::repository_error("cat-file stdin unavailable".into()))?;
        let writer = tokio::spawn(async move {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        writer
            .await
            .map_err(|e| ProtocolError::repository_error(e.to_string()))??;
        if !output.status.success() {
            return Err(ProtocolError::repository_error(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let present = text
            .lines()
            .zip(ids)
            .filter(|(line, _)| !line.ends_with(" missing"))
            .map(|(_, id)| id.clone())
            .collect();
        Ok(present)
    }
}

#[async_trait]
impl UploadPackProvider for GitCliProvider {
    async fn advertised_refs(&self, endpoint: &Endpoint) -> Result<AdvertisedRefs, ProtocolError> {
        self.ensure_repository(endpoint).await?;

        let output = self
            .run_git(
                endpoint,
                [
                    "for-each-ref",
                    "--format=%(objectname) %(refname) %(*objectname)",
                    "refs/",
                ],
            )
            .await?;
        if !output.status.success() {
            return Err(ProtocolError::repository_error(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let mut refs = AdvertisedRefs::default();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let mut parts = line.split(' ');
            let (Some(id), Some(name)) = (parts.next(), parts.next()) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            refs.refs.insert(name.to_string(), id.parse()?);
            if let Some(peeled) = parts.next().filter(|p| !p.is_empty()) {
                refs.peeled.insert(name.to_string(), peeled.parse()?);
            }
        }

        if let Some(head) = self
            .query(endpoint, &["rev-parse", "--verify", "--quiet", "HEAD"])
            .await?
        {
            refs.head = Some(head.parse()?);
        }

        refs.capabilities = vec![
            Capability::OfsDelta,
            Capability::SideBand64k,
            Capability::SideBand,
            Capability::ThinPack,
            Capability::NoProgress,
            Capability::IncludeTag,
        ];
        if refs.head.is_some()
            && let Some(target) = self
                .query(endpoint, &["symbolic-ref", "--quiet", "HEAD"])
                .await?
        {
            refs.capabilities
                .push(Capability::SymRef(format!("HEAD:{target}")));
        }
        if let Some(format) = self
            .query(endpoint, &["rev-parse", "--show-object-format"])
            .await?
            .filter(|f| !f.is_empty())
        {
            refs.capabilities.push(Capability::ObjectFormat(format));
        }
        refs.capabilities.push(Capability::Agent(AGENT.to_string()));

        tracing::debug!(
            git_dir = %endpoint.git_dir().display(),
            refs = refs.refs.len(),
            "listed references"
        );
        Ok(refs)
    }

    async fn upload_pack(
        &self,
        endpoint: &Endpoint,
        request: UploadPackRequest,
    ) -> Result<UploadPackResponse, ProtocolError> {
        if request.depth.is_some() || !request.shallows.is_empty() {
            return Err(ProtocolError::unsupported("shallow fetches are not served"));
        }
        self.ensure_repository(endpoint).await?;

        let common = self.existing_objects(endpoint, &request.haves).await?;
        let server_response = match common.first() {
            Some(id) => ServerResponse::Ack(id.clone()),
            None => ServerResponse::Nak,
        };

        let mut cmd = self.git_cmd(endpoint);
        cmd.args(["pack-objects", "--revs", "--stdout", "-q"]);
        if request.supports(&Capability::ThinPack) {
            cmd.arg("--thin");
        }
        if request.supports(&Capability::OfsDelta) {
            cmd.arg("--delta-base-offset");
        }
        if request.supports(&Capability::IncludeTag) {
            cmd.arg("--include-tag");
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut revs = String::new();
        for want in &request.wants {
            revs.push_str(&format!("{want}\n"));
        }
        for have in &common {
            revs.push_str(&format!("^{have}\n"));
        }
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProtocolError::repository_error("pack-objects stdin unavailable".into()))?;
        stdin.write_all(revs.as_bytes()).await?;
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProtocolError::repository_error("pack-objects stdout unavailable".into()))?;

        tracing::debug!(
            wants = request.wants.len(),
            common = common.len(),
            "spawned pack-objects"
        );

        // Surface a failing pack-objects exit after its output drains.
        let exit = futures::stream::once(reap_pack_objects(child))
            .filter_map(|result| future::ready(result.transpose()));

        let pack = ReaderStream::new(stdout)
            .map(|chunk| chunk.map_err(ProtocolError::Io))
            .chain(exit);

        Ok(UploadPackResponse {
            server_response,
            side_band: SideBandMode::from_capabilities(&request.capabilities),
            pack: Box::pin(pack),
        })
    }
}

async fn reap_pack_objects(child: Child) -> Result<Option<Bytes>, ProtocolError> {
    let output = child.wait_with_output().await?;
    if output.status.success() {
        return Ok(None);
    }
    Err(ProtocolError::Pack(
        String::from_utf8_lossy(&output.stderr).trim().to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use futures::TryStreamExt;
    use tempfile::TempDir;

    use super::*;
    use crate::protocol::Depth;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .current_dir(dir)
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn repo_with_commit() -> TempDir {
        let dir = TempDir::new().unwrap();
        git(dir.path(), &["init", "-q"]);
        std::fs::write(dir.path().join("README"), "hello\n").unwrap();
        git(dir.path(), &["add", "README"]);
        git(dir.path(), &["commit", "-q", "-m", "init"]);
        git(dir.path(), &["tag", "-a", "v1", "-m", "release"]);
        dir
    }

    #[tokio::test]
    async fn advertises_head_branch_and_peeled_tag() {
        if !git_available() {
            return;
        }
        let dir = repo_with_commit();
        let endpoint = Endpoint::new(dir.path().join(".git"));
        let refs = GitCliProvider::new().advertised_refs(&endpoint).await.unwrap();

        let head = refs.head.clone().unwrap();
        assert!(refs.refs.values().any(|id| *id == head));
        assert_eq!(refs.peeled.get("refs/tags/v1"), Some(&head));
        assert!(refs.capabilities.iter().any(|c| matches!(
            c,
            Capability::SymRef(target) if target.starts_with("HEAD:refs/heads/")
        )));
    }

    #[tokio::test]
    async fn empty_repository_has_no_refs() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        git(dir.path(), &["init", "-q", "--bare"]);
        let refs = GitCliProvider::new()
            .advertised_refs(&Endpoint::new(dir.path()))
            .await
            .unwrap();
        assert!(refs.is_empty());
    }

    #[tokio::test]
    async fn missing_repository_is_reported() {
        let dir = TempDir::new().unwrap();
        let endpoint = Endpoint::new(dir.path().join("absent.git"));
        let err = GitCliProvider::new()
            .advertised_refs(&endpoint)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::RepositoryNotFound(_)));
    }

    #[tokio::test]
    async fn streams_pack_for_wanted_head() {
        if !git_available() {
            return;
        }
        let dir = repo_with_commit();
        let endpoint = Endpoint::new(dir.path().join(".git"));
        let provider = GitCliProvider::new();
        let head = provider
            .advertised_refs(&endpoint)
            .await
            .unwrap()
            .head
            .unwrap();

        let request = UploadPackRequest {
            wants: vec![head.clone()],
            haves: vec![head.clone(), "e".repeat(40).parse().unwrap()],
            done: true,
            ..Default::default()
        };
        let response = provider.upload_pack(&endpoint, request).await.unwrap();
        assert_eq!(response.server_response, ServerResponse::Ack(head));

        let chunks: Vec<Bytes> = response.pack.try_collect().await.unwrap();
        let pack = chunks.concat();
        assert!(pack.starts_with(b"PACK"));
    }

    #[tokio::test]
    async fn rejects_shallow_requests() {
        let request = UploadPackRequest {
            wants: vec!["a".repeat(40).parse().unwrap()],
            depth: Some(Depth::Commits(1)),
            ..Default::default()
        };
        let err = GitCliProvider::new()
            .upload_pack(&Endpoint::new("/nonexistent"), request)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Unsupported(_)));
    }
}
