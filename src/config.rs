use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Startup configuration shared read-only by both front ends.
#[derive(Parser, Debug, Clone)]
#[command(name = "git-upload-serve")]
#[command(about = "Serve one repository's git-upload-pack over smart HTTP and SSH")]
#[command(version)]
pub struct ServerConfig {
    /// Repository to serve (the `.git` directory or a bare repository).
    #[arg(long, env = "GIT_DIR")]
    pub git_dir: PathBuf,

    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: SocketAddr,

    #[arg(long, env = "SSH_ADDR", default_value = "0.0.0.0:8081")]
    pub ssh_addr: SocketAddr,

    /// OpenSSH private key; an ephemeral Ed25519 key is generated when unset.
    #[arg(long, env = "SSH_HOST_KEY")]
    pub ssh_host_key: Option<PathBuf>,

    /// Seconds of SSH inactivity before a connection is dropped, 0 disables.
    #[arg(long, env = "SSH_INACTIVITY_TIMEOUT", default_value = "600")]
    pub inactivity_timeout: u64,
}

impl ServerConfig {
    pub fn inactivity_timeout(&self) -> Option<Duration> {
        match self.inactivity_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = ServerConfig::try_parse_from(["git-upload-serve", "--git-dir", "/srv/repo.git"])
            .unwrap();
        assert_eq!(config.git_dir, PathBuf::from("/srv/repo.git"));
        assert_eq!(config.http_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.ssh_addr, "0.0.0.0:8081".parse().unwrap());
        assert!(config.ssh_host_key.is_none());
        assert_eq!(config.inactivity_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn zero_timeout_disables() {
        let config = ServerConfig::try_parse_from([
            "git-upload-serve",
            "--git-dir",
            "/srv/repo.git",
            "--inactivity-timeout",
            "0",
            "--ssh-addr",
            "127.0.0.1:2222",
        ])
        .unwrap();
        assert_eq!(config.inactivity_timeout(), None);
        assert_eq!(config.ssh_addr.port(), 2222);
    }
}
