//! Importing scripts from a remote repository as a subscription category.
//!
//! One attempt moves through [`ImportPhase`]s:
//! `Idle → Scanning → Previewing → Downloading → Extracting →
//! MappingDirectories → Persisting → Done`, or `Failed` from any of them.
//! Nothing is written before `Persisting`. Once persisting starts the
//! cancel flag is ignored, and a storage failure is reported as
//! [`ScriptHubError::PartialImport`] with exact counts; created rows are not
//! rolled back.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::remote::{detect_platform, strip_script_extension};
use crate::core::scripts::forget_scripts;
use crate::core::store::{now, EntityStore};
use crate::core::tree::descendant_ids;
use crate::{
    Command, CategoryPatch, EntityKind, FetchedFile, NewCategory, NewScript, PartialProgress,
    RemoteFile, RemoteSource, RepoLocator, Result, ScriptHubError, Settings, WriteOp,
};

/// Icon given to subscription root categories.
pub const SUBSCRIPTION_ICON: &str = "github";

/// Where a subscription attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportPhase {
    Idle,
    Scanning,
    Previewing,
    Downloading,
    Extracting,
    MappingDirectories,
    Persisting,
    Done,
    Failed,
}

/// Candidate scripts found in a repository, before anything is downloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPreview {
    pub repo_name: String,
    pub owner: String,
    pub scripts: Vec<RemoteFile>,
    pub url: String,
    pub locator: RepoLocator,
}

/// Outcome of the size gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeCheck {
    pub bytes: u64,
    pub threshold: u64,
    pub requires_confirmation: bool,
}

/// Counts reported after a successful import or re-sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionImportResult {
    pub root_category_id: String,
    pub categories_created: usize,
    pub scripts_created: usize,
    /// Scripts removed before re-creating; always 0 for a first import.
    pub scripts_removed: usize,
    /// Selected paths the remote did not return.
    pub missing_paths: Vec<String>,
}

/// Drives one subscription attempt against a [`RemoteSource`].
pub struct SubscriptionImporter<'a> {
    source: &'a dyn RemoteSource,
    extensions: Vec<String>,
    size_threshold: u64,
    cancel: Arc<AtomicBool>,
    phase: ImportPhase,
    on_progress: Option<Box<dyn FnMut(usize, usize) + 'a>>,
}

impl<'a> SubscriptionImporter<'a> {
    pub fn new(source: &'a dyn RemoteSource, extensions: Vec<String>, size_threshold: u64) -> Self {
        Self {
            source,
            extensions,
            size_threshold,
            cancel: Arc::new(AtomicBool::new(false)),
            phase: ImportPhase::Idle,
            on_progress: None,
        }
    }

    /// Uses the extension allow-list and size threshold from `settings`.
    pub fn from_settings(source: &'a dyn RemoteSource, settings: &Settings) -> Self {
        Self::new(source, settings.script_extensions.clone(), settings.size_threshold_bytes)
    }

    /// Registers a `(done, total)` callback for the download phase.
    #[must_use]
    pub fn with_progress(mut self, on_progress: impl FnMut(usize, usize) + 'a) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }

    pub fn phase(&self) -> ImportPhase {
        self.phase
    }

    /// A flag another thread can set to abort the download.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn enter(&mut self, phase: ImportPhase) {
        log::debug!("subscription phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn fail<T>(&mut self, error: ScriptHubError) -> Result<T> {
        log::warn!("subscription failed during {:?}: {error}", self.phase);
        self.phase = ImportPhase::Failed;
        Err(error)
    }

    fn check_cancelled(&mut self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return self.fail(ScriptHubError::Cancelled);
        }
        Ok(())
    }

    /// Lists the scripts a subscription to `locator` would import.
    ///
    /// # Errors
    ///
    /// The remote error, or [`ScriptHubError::Validation`] when no file
    /// matches the extension allow-list.
    pub fn preview(&mut self, locator: &RepoLocator) -> Result<SubscriptionPreview> {
        self.enter(ImportPhase::Scanning);
        let mut scripts = match self.source.list_script_files(locator, &self.extensions) {
            Ok(scripts) => scripts,
            Err(e) => return self.fail(e),
        };
        if scripts.is_empty() {
            return self.fail(ScriptHubError::Validation(format!(
                "No scripts with extensions [{}] found in {locator}",
                self.extensions.join(", ")
            )));
        }
        scripts.sort_by(|a, b| a.path.cmp(&b.path));

        self.enter(ImportPhase::Previewing);
        Ok(SubscriptionPreview {
            repo_name: locator.repo.clone(),
            owner: locator.owner.clone(),
            scripts,
            url: locator.url(),
            locator: locator.clone(),
        })
    }

    /// Compares the estimated download size with the threshold.
    pub fn check_size(&mut self, locator: &RepoLocator) -> Result<SizeCheck> {
        let bytes = match self.source.estimate_size(locator) {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(e),
        };
        Ok(SizeCheck {
            bytes,
            threshold: self.size_threshold,
            requires_confirmation: bytes > self.size_threshold,
        })
    }

    /// Refuses oversized downloads, returning to the preview phase.
    fn size_gate(&mut self, locator: &RepoLocator) -> Result<()> {
        let size = self.check_size(locator)?;
        if size.requires_confirmation {
            self.enter(ImportPhase::Previewing);
            return Err(ScriptHubError::ConfirmationRequired {
                bytes: size.bytes,
                threshold: size.threshold,
            });
        }
        Ok(())
    }

    fn download(&mut self, locator: &RepoLocator, paths: &[String]) -> Result<Vec<FetchedFile>> {
        self.check_cancelled()?;
        self.enter(ImportPhase::Downloading);
        let mut noop = |_: usize, _: usize| {};
        let progress: &mut dyn FnMut(usize, usize) = match self.on_progress.as_mut() {
            Some(callback) => callback.as_mut(),
            None => &mut noop,
        };
        let fetched = match self.source.fetch_contents(locator, paths, progress) {
            Ok(fetched) => fetched,
            Err(e) => return self.fail(e),
        };
        self.check_cancelled()?;
        Ok(fetched)
    }

    /// Downloads the preview's candidates and creates categories and scripts
    /// for the `selected` paths only.
    ///
    /// Above the size threshold this refuses with
    /// [`ScriptHubError::ConfirmationRequired`] unless `confirmed` is set.
    ///
    /// # Errors
    ///
    /// [`ScriptHubError::Validation`] for an empty or unknown selection, the
    /// remote error, [`ScriptHubError::Cancelled`], or
    /// [`ScriptHubError::PartialImport`] when storage fails mid-way.
    pub fn download_and_import(
        &mut self,
        store: &mut EntityStore,
        preview: &SubscriptionPreview,
        selected: &[String],
        confirmed: bool,
    ) -> Result<SubscriptionImportResult> {
        if selected.is_empty() {
            return self.fail(ScriptHubError::Validation("Select at least one script".to_string()));
        }
        let candidates: HashSet<&str> = preview.scripts.iter().map(|s| s.path.as_str()).collect();
        if let Some(unknown) = selected.iter().find(|p| !candidates.contains(p.as_str())) {
            return self.fail(ScriptHubError::Validation(format!("{unknown} is not in the preview")));
        }

        if !confirmed {
            self.size_gate(&preview.locator)?;
        }

        let all_paths: Vec<String> = preview.scripts.iter().map(|s| s.path.clone()).collect();
        let fetched = self.download(&preview.locator, &all_paths)?;

        self.enter(ImportPhase::Extracting);
        let wanted: HashSet<&str> = selected.iter().map(String::as_str).collect();
        let mut files: Vec<FetchedFile> = fetched
            .into_iter()
            .filter(|f| wanted.contains(f.path.as_str()))
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let missing_paths = missing(selected, &files);

        self.enter(ImportPhase::MappingDirectories);
        let plan = directory_plan(&preview.locator, &files);

        self.enter(ImportPhase::Persisting);
        let mut progress = PartialProgress::default();
        let outcome = (|| {
            let root = store.tree().add_category(
                NewCategory {
                    description: Some(format!("Subscribed from {}", preview.url)),
                    icon: SUBSCRIPTION_ICON.to_string(),
                    ..NewCategory::named(preview.locator.display_name())
                },
                None,
            )?;
            progress.categories_created += 1;
            persist(store, &root.id, &preview.locator, &plan, &files, &mut progress)?;
            mark_synced(store, &root.id, &preview.url)?;
            Ok::<_, ScriptHubError>(root.id)
        })();

        let root_category_id = match outcome {
            Ok(id) => id,
            Err(e) => return self.fail(partial(progress, e)),
        };

        self.enter(ImportPhase::Done);
        log::info!(
            "subscribed to {}: {} categories, {} scripts",
            preview.locator,
            progress.categories_created,
            progress.scripts_created
        );
        Ok(SubscriptionImportResult {
            root_category_id,
            categories_created: progress.categories_created,
            scripts_created: progress.scripts_created,
            scripts_removed: 0,
            missing_paths,
        })
    }

    /// Re-syncs a subscription category.
    ///
    /// Every script in the subscription subtree is deleted and the current
    /// remote files are imported again. Existing directory categories are
    /// reused by name; missing ones are created. Local edits to subscribed
    /// scripts are lost. The size threshold applies as in
    /// [`Self::download_and_import`].
    ///
    /// # Errors
    ///
    /// [`ScriptHubError::ConfirmationRequired`] above the threshold unless
    /// `confirmed` is set, [`ScriptHubError::NotFound`] for an unknown category,
    /// [`ScriptHubError::Validation`] if it is not a subscription, the remote
    /// error, [`ScriptHubError::Cancelled`], or [`ScriptHubError::PartialImport`].
    pub fn pull_update(
        &mut self,
        store: &mut EntityStore,
        category_id: &str,
        confirmed: bool,
    ) -> Result<SubscriptionImportResult> {
        let Some(root) = store.tree().category(category_id).cloned() else {
            return self.fail(ScriptHubError::not_found(EntityKind::Category, category_id));
        };
        let source_url = match (&root.source_url, root.is_subscription) {
            (Some(url), true) => url.clone(),
            _ => {
                return self.fail(ScriptHubError::Validation(format!(
                    "Category {} is not a subscription",
                    root.name
                )))
            }
        };
        let locator = match RepoLocator::parse(&source_url) {
            Ok(locator) => locator,
            Err(e) => return self.fail(e),
        };

        let listing = self.preview(&locator)?;
        if !confirmed {
            self.size_gate(&locator)?;
        }
        let paths: Vec<String> = listing.scripts.iter().map(|s| s.path.clone()).collect();
        let fetched = self.download(&locator, &paths)?;

        self.enter(ImportPhase::Extracting);
        let mut files = fetched;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let missing_paths = missing(&paths, &files);

        self.enter(ImportPhase::MappingDirectories);
        let plan = directory_plan(&locator, &files);

        self.enter(ImportPhase::Persisting);
        let mut progress = PartialProgress::default();
        let removed = match remove_subtree_scripts(store, category_id) {
            Ok(removed) => removed,
            Err(e) => return self.fail(e),
        };
        let outcome = persist(store, category_id, &locator, &plan, &files, &mut progress)
            .and_then(|()| mark_synced(store, category_id, &source_url));
        if let Err(e) = outcome {
            return self.fail(partial(progress, e));
        }

        self.enter(ImportPhase::Done);
        log::info!(
            "re-synced {locator}: removed {removed}, created {} scripts",
            progress.scripts_created
        );
        Ok(SubscriptionImportResult {
            root_category_id: category_id.to_string(),
            categories_created: progress.categories_created,
            scripts_created: progress.scripts_created,
            scripts_removed: removed,
            missing_paths,
        })
    }
}

/// Every directory implied by the files, relative to the locator base path,
/// parents before children.
fn directory_plan(locator: &RepoLocator, files: &[FetchedFile]) -> Vec<String> {
    let mut dirs: BTreeSet<(usize, String)> = BTreeSet::new();
    for file in files {
        let rel = locator.relative_path(&file.path).unwrap_or(&file.path);
        let segments: Vec<&str> = rel.split('/').collect();
        for depth in 1..segments.len() {
            dirs.insert((depth, segments[..depth].join("/")));
        }
    }
    dirs.into_iter().map(|(_, dir)| dir).collect()
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn missing(selected: &[String], files: &[FetchedFile]) -> Vec<String> {
    let got: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
    selected
        .iter()
        .filter(|p| !got.contains(p.as_str()))
        .cloned()
        .collect()
}

fn partial(progress: PartialProgress, cause: ScriptHubError) -> ScriptHubError {
    if progress.categories_created == 0 && progress.scripts_created == 0 {
        return cause;
    }
    ScriptHubError::PartialImport(PartialProgress {
        cause: cause.to_string(),
        ..progress
    })
}

/// Creates the directory categories under `root_id` (reusing same-named
/// children) and one script per file.
fn persist(
    store: &mut EntityStore,
    root_id: &str,
    locator: &RepoLocator,
    plan: &[String],
    files: &[FetchedFile],
    progress: &mut PartialProgress,
) -> Result<()> {
    let mut dir_ids: HashMap<String, String> = HashMap::new();
    dir_ids.insert(String::new(), root_id.to_string());

    for dir in plan {
        let parent_id = dir_ids
            .get(parent_dir(dir))
            .cloned()
            .unwrap_or_else(|| root_id.to_string());
        let name = dir.rsplit('/').next().unwrap_or(dir);
        let existing = store
            .tree()
            .children(&parent_id)
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id.clone());
        let id = match existing {
            Some(id) => id,
            None => {
                let created = store.tree().add_category(NewCategory::named(name), Some(&parent_id))?;
                progress.categories_created += 1;
                created.id
            }
        };
        dir_ids.insert(dir.clone(), id);
    }

    for file in files {
        let rel = locator.relative_path(&file.path).unwrap_or(&file.path);
        let name = rel.rsplit('/').next().unwrap_or(rel);
        let category_id = dir_ids
            .get(parent_dir(rel))
            .cloned()
            .unwrap_or_else(|| root_id.to_string());
        let content = file.content.strip_suffix('\n').unwrap_or(&file.content);

        store.scripts().add_script(NewScript {
            description: format!("From {}/{}: {}", locator.owner, locator.repo, file.path),
            commands: vec![Command::new(content)],
            category_id: Some(category_id),
            ..NewScript::new(strip_script_extension(name), detect_platform(name, Some(&file.content)))
        })?;
        progress.scripts_created += 1;
    }
    Ok(())
}

fn mark_synced(store: &mut EntityStore, category_id: &str, url: &str) -> Result<()> {
    store.tree().update_category(
        category_id,
        CategoryPatch {
            is_subscription: Some(true),
            source_url: Some(Some(url.to_string())),
            last_synced_at: Some(Some(now())),
            ..Default::default()
        },
    )?;
    Ok(())
}

/// Deletes every script assigned to `root_id` or its descendants in one batch.
fn remove_subtree_scripts(store: &mut EntityStore, root_id: &str) -> Result<usize> {
    let mut scope = descendant_ids(&store.categories, root_id);
    scope.insert(root_id.to_string());
    let doomed: Vec<String> = store
        .scripts
        .iter()
        .filter(|s| s.category_id.as_ref().is_some_and(|c| scope.contains(c)))
        .map(|s| s.id.clone())
        .collect();

    let ops: Vec<WriteOp<'_>> = doomed
        .iter()
        .map(|id| WriteOp::delete(EntityKind::Script, id.as_str()))
        .collect();
    store.commit(&ops)?;
    store.scripts.retain(|s| !doomed.contains(&s.id));
    forget_scripts(store, &doomed);
    Ok(doomed.len())
}
