//! The in-memory entity store and its write-through primitive.
//!
//! [`EntityStore`] owns the canonical collections. Engines borrow it mutably
//! ([`EntityStore::tree`], [`EntityStore::scripts`], [`EntityStore::cascade`],
//! [`EntityStore::tags`]) so every mutation is serialized by the borrow checker.
//! All of them funnel writes through [`EntityStore::commit`], which persists
//! a batch before any in-memory change is made.

use std::collections::HashSet;

use crate::core::delete::CascadeDelete;
use crate::core::scripts::ScriptLibrary;
use crate::core::tags::TagBook;
use crate::core::tree::CategoryTree;
use crate::{Backend, Category, Result, Script, Snapshot, Tag, Variable, WriteOp};

/// Default number of entries kept in the recently-copied list.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Authoritative in-memory state mirrored into a [`Backend`].
pub struct EntityStore {
    backend: Box<dyn Backend>,
    pub(crate) categories: Vec<Category>,
    pub(crate) scripts: Vec<Script>,
    pub(crate) tags: Vec<Tag>,
    pub(crate) variables: Vec<Variable>,
    pub(crate) selected_category_id: Option<String>,
    pub(crate) selected_script_id: Option<String>,
    pub(crate) expanded: HashSet<String>,
    pub(crate) recent_script_ids: Vec<String>,
    recent_limit: usize,
}

impl EntityStore {
    /// Loads every collection from `backend`.
    ///
    /// # Errors
    ///
    /// Returns whatever the backend reports while reading.
    pub fn open(backend: Box<dyn Backend>) -> Result<Self> {
        let snapshot = backend.select_all()?;
        log::debug!(
            "loaded {} categories, {} scripts, {} tags, {} variables",
            snapshot.categories.len(),
            snapshot.scripts.len(),
            snapshot.tags.len(),
            snapshot.variables.len()
        );
        Ok(Self {
            backend,
            categories: snapshot.categories,
            scripts: snapshot.scripts,
            tags: snapshot.tags,
            variables: snapshot.variables,
            selected_category_id: None,
            selected_script_id: None,
            expanded: HashSet::new(),
            recent_script_ids: Vec::new(),
            recent_limit: DEFAULT_RECENT_LIMIT,
        })
    }

    /// Sets how many ids [`ScriptLibrary::record_recent`] keeps.
    pub fn set_recent_limit(&mut self, limit: usize) {
        self.recent_limit = limit;
        self.recent_script_ids.truncate(limit);
    }

    pub(crate) fn recent_limit(&self) -> usize {
        self.recent_limit
    }

    /// Persists `ops` atomically. Callers mutate memory only after this returns `Ok`.
    pub(crate) fn commit(&mut self, ops: &[WriteOp<'_>]) -> Result<()> {
        self.backend.apply(ops)
    }

    pub fn tree(&mut self) -> CategoryTree<'_> {
        CategoryTree::new(self)
    }

    pub fn scripts(&mut self) -> ScriptLibrary<'_> {
        ScriptLibrary::new(self)
    }

    pub fn cascade(&mut self) -> CascadeDelete<'_> {
        CascadeDelete::new(self)
    }

    pub fn tags(&mut self) -> TagBook<'_> {
        TagBook::new(self)
    }

    pub fn all_categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn all_scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn all_tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn all_variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn selected_category_id(&self) -> Option<&str> {
        self.selected_category_id.as_deref()
    }

    pub fn selected_script_id(&self) -> Option<&str> {
        self.selected_script_id.as_deref()
    }

    pub fn expanded_ids(&self) -> &HashSet<String> {
        &self.expanded
    }

    pub fn recent_script_ids(&self) -> &[String] {
        &self.recent_script_ids
    }

    /// Clones every collection, e.g. as input for an export.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            categories: self.categories.clone(),
            scripts: self.scripts.clone(),
            tags: self.tags.clone(),
            variables: self.variables.clone(),
        }
    }

    /// Replaces the whole store with `snapshot` in one backend transaction.
    ///
    /// Selection, expansion, and recent state are cleared because the ids
    /// they reference may no longer exist.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the store is unchanged in that case.
    pub fn replace_all(&mut self, snapshot: Snapshot) -> Result<()> {
        self.backend.replace_all(&snapshot)?;
        log::info!(
            "replaced library: {} categories, {} scripts",
            snapshot.categories.len(),
            snapshot.scripts.len()
        );
        self.categories = snapshot.categories;
        self.scripts = snapshot.scripts;
        self.tags = snapshot.tags;
        self.variables = snapshot.variables;
        self.selected_category_id = None;
        self.selected_script_id = None;
        self.expanded.clear();
        self.recent_script_ids.clear();
        Ok(())
    }
}

/// Current wall-clock time in Unix seconds.
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
