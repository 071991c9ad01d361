//! GitHub implementation of [`RemoteSource`].
//!
//! Listing uses the recursive git-trees endpoint. Small selections are
//! fetched file by file from `raw.githubusercontent.com` so progress can be
//! reported per file; larger ones download the branch zipball once and
//! extract the requested paths.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::core::remote::{extract_archive, has_allowed_extension};
use crate::{FetchedFile, NetworkFailure, RemoteFile, RemoteSource, RepoLocator, Result, ScriptHubError};

const API_BASE: &str = "https://api.github.com";
const RAW_BASE: &str = "https://raw.githubusercontent.com";
const USER_AGENT: &str = "ScriptHub-App";

/// Above this many files the zipball is downloaded instead of single files.
const PER_FILE_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
    /// Repository size in KiB.
    size: u64,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// HTTP client for public (or token-accessible) GitHub repositories.
pub struct GitHubSource {
    client: Client,
    token: Option<String>,
}

impl GitHubSource {
    /// Builds a client with the given request timeout and optional API token.
    ///
    /// # Errors
    ///
    /// Returns a [`ScriptHubError::Network`] if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(classify_transport)?;
        Ok(Self { client, token })
    }

    fn get(&self, url: &str) -> Result<Response> {
        log::debug!("GET {url}");
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().map_err(classify_transport)?;
        ensure_success(response)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.get(url)?.json::<T>().map_err(classify_transport)
    }

    fn repo_info(&self, locator: &RepoLocator) -> Result<RepoInfo> {
        self.get_json(&format!("{API_BASE}/repos/{}/{}", locator.owner, locator.repo))
    }

    fn branch(&self, locator: &RepoLocator) -> Result<String> {
        match &locator.branch {
            Some(branch) => Ok(branch.clone()),
            None => Ok(self.repo_info(locator)?.default_branch),
        }
    }
}

impl RemoteSource for GitHubSource {
    fn list_script_files(&self, locator: &RepoLocator, extensions: &[String]) -> Result<Vec<RemoteFile>> {
        let branch = self.branch(locator)?;
        let tree: TreeResponse = self.get_json(&format!(
            "{API_BASE}/repos/{}/{}/git/trees/{branch}?recursive=1",
            locator.owner, locator.repo
        ))?;
        if tree.truncated {
            log::warn!("tree listing for {locator} was truncated by the API");
        }

        Ok(tree
            .tree
            .iter()
            .filter(|entry| entry.kind == "blob")
            .filter(|entry| locator.relative_path(&entry.path).is_some())
            .filter(|entry| has_allowed_extension(&entry.path, extensions))
            .map(|entry| RemoteFile::from_path(&entry.path))
            .collect())
    }

    fn fetch_contents(
        &self,
        locator: &RepoLocator,
        paths: &[String],
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<FetchedFile>> {
        let branch = self.branch(locator)?;
        let total = paths.len();
        on_progress(0, total);

        if total <= PER_FILE_LIMIT {
            let mut files = Vec::with_capacity(total);
            for (i, path) in paths.iter().enumerate() {
                let url = raw_url(locator, &branch, path)?;
                let content = self.get(url.as_str())?.text().map_err(classify_transport)?;
                files.push(FetchedFile {
                    path: path.clone(),
                    content,
                });
                on_progress(i + 1, total);
            }
            return Ok(files);
        }

        let url = format!("{API_BASE}/repos/{}/{}/zipball/{branch}", locator.owner, locator.repo);
        let bytes = self.get(&url)?.bytes().map_err(classify_transport)?;
        let wanted: HashSet<String> = paths.iter().cloned().collect();
        let files = extract_archive(&bytes, &wanted)?;
        on_progress(total, total);
        Ok(files)
    }

    fn estimate_size(&self, locator: &RepoLocator) -> Result<u64> {
        Ok(self.repo_info(locator)?.size * 1024)
    }
}

/// Raw file URL with every segment percent-encoded.
fn raw_url(locator: &RepoLocator, branch: &str, path: &str) -> Result<Url> {
    let invalid = || ScriptHubError::network(NetworkFailure::Other, format!("cannot build URL for {path}"));
    let mut url = Url::parse(RAW_BASE).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|()| invalid())?
        .clear()
        .push(&locator.owner)
        .push(&locator.repo)
        .extend(branch.split('/'))
        .extend(path.split('/'));
    Ok(url)
}

fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let rate_limited = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "0");
    let body = response
        .text()
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(ScriptHubError::network(classify_status(status, rate_limited), format!("{status}: {body}")))
}

/// Maps an HTTP status to the failure reason shown to the user.
fn classify_status(status: StatusCode, rate_limited: bool) -> NetworkFailure {
    match status {
        StatusCode::TOO_MANY_REQUESTS => NetworkFailure::RateLimited,
        StatusCode::FORBIDDEN if rate_limited => NetworkFailure::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => NetworkFailure::AccessDenied,
        StatusCode::NOT_FOUND => NetworkFailure::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => NetworkFailure::Timeout,
        _ => NetworkFailure::Other,
    }
}

fn classify_transport(e: reqwest::Error) -> ScriptHubError {
    let kind = if e.is_timeout() {
        NetworkFailure::Timeout
    } else if let Some(status) = e.status() {
        classify_status(status, false)
    } else {
        NetworkFailure::Other
    };
    ScriptHubError::network(kind, e.to_string())
}
