use anyhow::{Result, anyhow};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use git_upload_serve::http::{HttpState, run_http};
use git_upload_serve::ssh::{SshServer, load_host_key};
use git_upload_serve::{Endpoint, GitCliProvider, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::parse();
    let endpoint = Endpoint::new(&config.git_dir);
    let provider = GitCliProvider::new();

    tracing::info!(
        git_dir = %config.git_dir.display(),
        http_addr = %config.http_addr,
        ssh_addr = %config.ssh_addr,
        "starting git-upload-serve"
    );

    let http = run_http(
        config.http_addr,
        HttpState::new(endpoint.clone(), provider.clone()),
    );
    let ssh = async {
        let host_key = load_host_key(config.ssh_host_key.as_deref())?;
        SshServer::new(
            config.ssh_addr,
            host_key,
            config.inactivity_timeout(),
            endpoint.clone(),
            provider.clone(),
        )
        .run()
        .await
    };

    // Each front end runs until it fails; the process outlives a single failure.
    let (http_result, ssh_result) = tokio::join!(http, ssh);

    let mut failures = Vec::new();
    if let Err(e) = http_result {
        tracing::error!(error = %e, "HTTP front end terminated");
        failures.push(e.to_string());
    }
    if let Err(e) = ssh_result {
        tracing::error!(error = %e, "SSH front end terminated");
        failures.push(e.to_string());
    }

    if failures.is_empty() {
        return Ok(());
    }
    Err(anyhow!(failures.join("; ")))
}
