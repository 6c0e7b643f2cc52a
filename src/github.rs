//! GitHub repository references and codeload archive download.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::io::Read;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::ArchiveConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// `owner/name`, the key used for snapshots and history.
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn repo_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)github\.com/([^/]+)/([^/#?]+)/?(?:#.*|\?.*)?$").expect("static regex")
    })
}

/// Extract owner and repository from a GitHub URL.
///
/// Accepts an optional trailing slash, `#fragment` or `?query`; strips `.git`.
pub fn parse_repo_url(url: &str) -> Result<RepoRef> {
    let url = url.trim();
    let Some(caps) = repo_url_regex().captures(url) else {
        bail!("invalid GitHub repository URL: {url}");
    };
    let owner = caps[1].to_string();
    let name = caps[2].strip_suffix(".git").unwrap_or(&caps[2]).to_string();
    if name.is_empty() {
        bail!("invalid GitHub repository URL: {url}");
    }
    Ok(RepoRef { owner, name })
}

/// Accept either a full URL or a bare `owner/name`.
pub fn parse_repo_arg(arg: &str) -> Result<RepoRef> {
    if arg.contains("github.com") {
        return parse_repo_url(arg);
    }
    match arg.trim().split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => Ok(RepoRef {
            owner: owner.to_string(),
            name: name.strip_suffix(".git").unwrap_or(name).to_string(),
        }),
        _ => bail!("expected a GitHub URL or owner/repo, got `{arg}`"),
    }
}

pub fn archive_url(base: &str, repo: &RepoRef, branch: &str) -> String {
    format!(
        "{}/{}/{}/zip/refs/heads/{}",
        base.trim_end_matches('/'),
        repo.owner,
        repo.name,
        branch
    )
}

/// Source of repository archives.
pub trait ArchiveFetcher {
    /// Bytes of the archive for `branch`, or `None` when that branch has no archive.
    fn fetch_branch(&self, repo: &RepoRef, branch: &str) -> Result<Option<Vec<u8>>>;
}

/// Try each branch in order and return the first archive found.
pub fn download_archive(fetcher: &dyn ArchiveFetcher, repo: &RepoRef, branches: &[String]) -> Result<(String, Vec<u8>)> {
    for branch in branches {
        match fetcher.fetch_branch(repo, branch)? {
            Some(bytes) => {
                tracing::info!(repo = %repo, branch = %branch, bytes = bytes.len(), "downloaded archive");
                return Ok((branch.clone(), bytes));
            }
            None => tracing::debug!(repo = %repo, branch = %branch, "no archive for branch"),
        }
    }
    bail!("failed to download repo archive (tried {})", branches.join(" & "))
}

/// Downloads from codeload.github.com (or a configured mirror).
pub struct CodeloadClient {
    agent: ureq::Agent,
    base: String,
    max_bytes: u64,
}

impl CodeloadClient {
    pub fn new(cfg: &ArchiveConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(concat!("gitme/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base: cfg.codeload_base.clone(),
            max_bytes: cfg.max_archive_bytes,
        }
    }
}

impl ArchiveFetcher for CodeloadClient {
    fn fetch_branch(&self, repo: &RepoRef, branch: &str) -> Result<Option<Vec<u8>>> {
        let url = archive_url(&self.base, repo, branch);
        let resp = match self.agent.get(&url).call() {
            Ok(r) => r,
            Err(ureq::Error::Status(code, _)) => {
                tracing::debug!(%url, code, "archive request rejected");
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("request to {url} failed")),
        };

        let bytes = read_body(resp.into_reader(), self.max_bytes)
            .with_context(|| format!("reading archive body from {url}"))?;
        Ok(Some(bytes))
    }
}

/// Read a response body, refusing anything over `max_bytes`.
fn read_body(reader: impl Read, max_bytes: u64) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.take(max_bytes.saturating_add(1)).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > max_bytes {
        bail!("archive exceeds {max_bytes} bytes");
    }
    Ok(bytes)
}
