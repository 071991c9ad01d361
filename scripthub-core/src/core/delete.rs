//! Cascade deletion of a category subtree and its scripts.
//!
//! [`CascadeDelete`] composes the category tree and the script collection:
//! removing a category removes every descendant category and every script
//! assigned to any of them, in one backend batch.
//!
//! ## Examples
//!
//! ```rust
//! use scripthub_core::{EntityStore, NewCategory, NewScript, Platform, Storage};
//!
//! let mut store = EntityStore::open(Box::new(Storage::in_memory()?))?;
//! let dev = store.tree().add_category(NewCategory::named("Dev"), None)?;
//! store.tree().add_category(NewCategory::named("Ops"), Some(&dev.id))?;
//! store
//!     .scripts()
//!     .add_script(NewScript::new("Build", Platform::Linux).in_category(dev.id.clone()))?;
//!
//! let result = store.cascade().delete_category(&dev.id)?;
//! assert_eq!(result.deleted_count, 3);
//! assert!(store.all_categories().is_empty());
//! assert!(store.all_scripts().is_empty());
//! # Ok::<(), scripthub_core::ScriptHubError>(())
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::entity::{apply_orders, compaction};
use crate::core::scripts::forget_scripts;
use crate::core::store::EntityStore;
use crate::core::tree::descendant_ids;
use crate::{EntityKind, Result, ScriptHubError, WriteOp};

/// The outcome of a cascade delete.
///
/// # Examples
///
/// ```rust
/// use scripthub_core::DeleteResult;
///
/// let result = DeleteResult {
///     deleted_count: 1,
///     affected_ids: vec!["category-id-abc".to_string()],
/// };
/// assert_eq!(result.deleted_count, 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    /// Categories plus scripts that were permanently removed.
    pub deleted_count: usize,

    /// IDs of every deleted category and script, and of siblings whose order shifted.
    pub affected_ids: Vec<String>,
}

/// Removes a category, its descendants, and their scripts atomically.
pub struct CascadeDelete<'s> {
    store: &'s mut EntityStore,
}

impl<'s> CascadeDelete<'s> {
    pub(crate) fn new(store: &'s mut EntityStore) -> Self {
        Self { store }
    }

    /// Deletes `id` and everything it transitively owns.
    ///
    /// The remaining siblings of `id` are compacted in the same batch so their
    /// orders stay dense. Selection and expansion state referencing deleted
    /// ids is cleared.
    ///
    /// # Errors
    ///
    /// [`ScriptHubError::NotFound`] if `id` is unknown, or the backend error.
    /// In both cases neither the store nor the backend is changed.
    pub fn delete_category(&mut self, id: &str) -> Result<DeleteResult> {
        let target = self
            .store
            .categories
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| ScriptHubError::not_found(EntityKind::Category, id))?;
        let parent_id = target.parent_id.clone();

        let mut doomed = descendant_ids(&self.store.categories, id);
        doomed.insert(id.to_string());

        let doomed_scripts: Vec<String> = self
            .store
            .scripts
            .iter()
            .filter(|s| s.category_id.as_ref().is_some_and(|cid| doomed.contains(cid)))
            .map(|s| s.id.clone())
            .collect();
        // Children before parents so no row ever points at a deleted parent mid-batch.
        let doomed_categories = deletion_order(&self.store.categories, &doomed);

        let reorders = compaction(
            self.store
                .categories
                .iter()
                .filter(|c| c.parent_id == parent_id && !doomed.contains(&c.id)),
        );

        let mut ops: Vec<WriteOp<'_>> =
            Vec::with_capacity(doomed_scripts.len() + doomed_categories.len() + reorders.len());
        ops.extend(
            doomed_scripts
                .iter()
                .map(|sid| WriteOp::delete(EntityKind::Script, sid.as_str())),
        );
        ops.extend(
            doomed_categories
                .iter()
                .map(|cid| WriteOp::delete(EntityKind::Category, cid.as_str())),
        );
        ops.extend(
            reorders
                .iter()
                .map(|(cid, order)| WriteOp::set_order(EntityKind::Category, cid.as_str(), *order)),
        );
        self.store.commit(&ops)?;

        self.store.scripts.retain(|s| !doomed_scripts.contains(&s.id));
        self.store.categories.retain(|c| !doomed.contains(&c.id));
        apply_orders(&mut self.store.categories, &reorders);
        forget_scripts(self.store, &doomed_scripts);
        if self
            .store
            .selected_category_id
            .as_ref()
            .is_some_and(|selected| doomed.contains(selected))
        {
            self.store.selected_category_id = None;
        }
        self.store.expanded.retain(|e| !doomed.contains(e));

        log::info!(
            "deleted category {id}: {} categories, {} scripts",
            doomed_categories.len(),
            doomed_scripts.len()
        );

        let mut affected_ids = doomed_categories;
        affected_ids.extend(doomed_scripts);
        let deleted_count = affected_ids.len();
        affected_ids.extend(reorders.into_iter().map(|(cid, _)| cid));
        Ok(DeleteResult {
            deleted_count,
            affected_ids,
        })
    }
}

/// Orders the doomed ids deepest-first.
fn deletion_order(categories: &[crate::Category], doomed: &HashSet<String>) -> Vec<String> {
    let parent_of = |id: &str| {
        categories
            .iter()
            .find(|c| c.id == id)
            .and_then(|c| c.parent_id.as_deref())
    };
    let depth = |id: &str| {
        let mut depth = 0usize;
        let mut current = parent_of(id);
        while let Some(pid) = current {
            if !doomed.contains(pid) || depth > doomed.len() {
                break;
            }
            depth += 1;
            current = parent_of(pid);
        }
        depth
    };

    let mut ordered: Vec<(usize, &String)> = doomed.iter().map(|id| (depth(id), id)).collect();
    ordered.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    ordered.into_iter().map(|(_, id)| id.clone()).collect()
}
