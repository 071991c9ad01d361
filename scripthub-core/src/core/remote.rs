//! Remote repository access used by subscriptions.
//!
//! [`RemoteSource`] is the seam between the subscription importer and the
//! network. [`GitHubSource`](crate::GitHubSource) implements it against the
//! GitHub REST API when the `github` feature is enabled; tests use an
//! in-memory fake.

use std::collections::HashSet;
use std::fmt;
use std::io::{Cursor, Read};

use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::{Platform, Result, ScriptHubError};

/// Extensions treated as scripts when the settings do not override them.
pub const DEFAULT_SCRIPT_EXTENSIONS: &[&str] = &[
    "sh", "bash", "zsh", "fish", "bat", "cmd", "ps1", "py", "rb", "pl", "command",
];

/// A parsed repository address, optionally narrowed to a branch and subfolder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoLocator {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
    /// Folder inside the repository, without leading or trailing `/`. Empty for the root.
    pub base_path: String,
}

impl RepoLocator {
    /// Parses `owner/repo`, `https://github.com/owner/repo(.git)`, or
    /// `https://github.com/owner/repo/tree/<branch>/<path>`.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptHubError::Validation`] for anything else.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || ScriptHubError::Validation(format!("Not a repository address: {input}"));

        let trimmed = input.trim();
        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        let without_host = without_scheme
            .strip_prefix("www.github.com/")
            .or_else(|| without_scheme.strip_prefix("github.com/"));
        let rest = match without_host {
            Some(rest) => rest,
            // A bare `owner/repo` is fine; any other host is not.
            None if without_scheme.len() == trimmed.len() => trimmed,
            None => return Err(invalid()),
        };

        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            return Err(invalid());
        }
        let owner = segments[0];
        let repo = segments[1].strip_suffix(".git").unwrap_or(segments[1]);
        if !is_repo_segment(owner) || !is_repo_segment(repo) {
            return Err(invalid());
        }

        let (branch, base_path) = match segments.get(2..) {
            None | Some([]) => (None, String::new()),
            Some(["tree", branch, path @ ..]) => (Some((*branch).to_string()), path.join("/")),
            Some(_) => return Err(invalid()),
        };

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch,
            base_path,
        })
    }

    /// Name for the root subscription category: the last folder of the base path, else the repo.
    pub fn display_name(&self) -> &str {
        self.base_path.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or(&self.repo)
    }

    /// Canonical web address.
    pub fn url(&self) -> String {
        let mut url = format!("https://github.com/{}/{}", self.owner, self.repo);
        if let Some(branch) = &self.branch {
            url.push_str("/tree/");
            url.push_str(branch);
            if !self.base_path.is_empty() {
                url.push('/');
                url.push_str(&self.base_path);
            }
        }
        url
    }

    /// `path` relative to the base path, or `None` when it lies outside it.
    pub fn relative_path<'p>(&self, path: &'p str) -> Option<&'p str> {
        if self.base_path.is_empty() {
            return Some(path);
        }
        path.strip_prefix(self.base_path.as_str())?.strip_prefix('/')
    }
}

impl fmt::Display for RepoLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)?;
        if !self.base_path.is_empty() {
            write!(f, "/{}", self.base_path)?;
        }
        Ok(())
    }
}

fn is_repo_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// A candidate script found in a remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Path from the repository root.
    pub path: String,
    pub name: String,
    pub platform: Platform,
}

impl RemoteFile {
    pub fn from_path(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            path: path.to_string(),
            platform: detect_platform(&name, None),
            name,
        }
    }
}

/// Downloaded content of one remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: String,
    pub content: String,
}

/// A repository host the subscription importer can read from.
pub trait RemoteSource {
    /// Lists files under the locator's base path whose extension is in `extensions`.
    fn list_script_files(&self, locator: &RepoLocator, extensions: &[String]) -> Result<Vec<RemoteFile>>;

    /// Downloads `paths`, reporting `(done, total)` as it goes.
    fn fetch_contents(
        &self,
        locator: &RepoLocator,
        paths: &[String],
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<FetchedFile>>;

    /// Approximate download size in bytes.
    fn estimate_size(&self, locator: &RepoLocator) -> Result<u64>;
}

fn extension_of(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty()).then_some(ext)
}

/// Whether `path` ends in one of `extensions` (case-insensitive, leading `.` optional).
pub fn has_allowed_extension(path: &str, extensions: &[String]) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    extension_of(name).is_some_and(|ext| {
        extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    })
}

/// Guesses the platform from the file name, then from a shebang line.
pub fn detect_platform(name: &str, content: Option<&str>) -> Platform {
    let by_extension = extension_of(name).map(str::to_ascii_lowercase);
    match by_extension.as_deref() {
        Some("bat" | "cmd" | "ps1") => return Platform::Windows,
        Some("command" | "zsh") => return Platform::Macos,
        Some("sh" | "bash") => return Platform::Linux,
        Some("py" | "rb" | "pl" | "js" | "fish") => return Platform::Cross,
        _ => {}
    }

    let shebang = content
        .and_then(|c| c.lines().next())
        .filter(|line| line.starts_with("#!"));
    match shebang {
        Some(line) if line.contains("zsh") => Platform::Macos,
        Some(line) if line.contains("bash") || line.ends_with("/sh") || line.contains("/sh ") => {
            Platform::Linux
        }
        _ => Platform::Cross,
    }
}

/// Drops a known script extension from `name` (`deploy.sh` → `deploy`).
pub fn strip_script_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && DEFAULT_SCRIPT_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext)) =>
        {
            stem
        }
        _ => name,
    }
}

/// Reads the `wanted` paths out of a repository zip archive.
///
/// Hosting services wrap the tree in one top-level folder (`repo-<sha>/`);
/// that folder is stripped before matching. Non-UTF-8 bytes are replaced.
pub fn extract_archive(bytes: &[u8], wanted: &HashSet<String>) -> Result<Vec<FetchedFile>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut files = Vec::with_capacity(wanted.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some((_, path)) = entry.name().split_once('/') else {
            continue;
        };
        if !wanted.contains(path) {
            continue;
        }
        let path = path.to_string();
        let mut buffer = Vec::new();
        entry.read_to_end(&mut buffer)?;
        files.push(FetchedFile {
            path,
            content: String::from_utf8_lossy(&buffer).into_owned(),
        });
    }

    if files.len() < wanted.len() {
        log::warn!("archive held {} of {} requested files", files.len(), wanted.len());
    }
    Ok(files)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;
    use std::collections::HashMap;

    use super::*;
    use crate::NetworkFailure;

    /// An in-memory repository keyed by path.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub(crate) files: HashMap<String, String>,
        pub(crate) size: u64,
        pub(crate) fail_fetch: Option<NetworkFailure>,
        pub(crate) fetch_calls: Cell<usize>,
    }

    impl FakeSource {
        pub(crate) fn with_files(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
                    .collect(),
                size: 1024,
                ..Default::default()
            }
        }
    }

    impl RemoteSource for FakeSource {
        fn list_script_files(&self, locator: &RepoLocator, extensions: &[String]) -> Result<Vec<RemoteFile>> {
            let mut paths: Vec<&String> = self
                .files
                .keys()
                .filter(|p| locator.relative_path(p).is_some() && has_allowed_extension(p, extensions))
                .collect();
            paths.sort();
            Ok(paths.into_iter().map(|p| RemoteFile::from_path(p)).collect())
        }

        fn fetch_contents(
            &self,
            _locator: &RepoLocator,
            paths: &[String],
            on_progress: &mut dyn FnMut(usize, usize),
        ) -> Result<Vec<FetchedFile>> {
            self.fetch_calls.set(self.fetch_calls.get() + 1);
            if let Some(kind) = self.fail_fetch {
                return Err(ScriptHubError::network(kind, "simulated"));
            }
            let mut fetched = Vec::new();
            for (i, path) in paths.iter().enumerate() {
                if let Some(content) = self.files.get(path) {
                    fetched.push(FetchedFile {
                        path: path.clone(),
                        content: content.clone(),
                    });
                }
                on_progress(i + 1, paths.len());
            }
            Ok(fetched)
        }

        fn estimate_size(&self, _locator: &RepoLocator) -> Result<u64> {
            Ok(self.size)
        }
    }
}
