//! Script CRUD, per-category ordering, favorites, and filtering.
//!
//! Each script belongs to at most one category. Its `order` is dense within
//! the scope of scripts sharing the same `category_id`; uncategorized scripts
//! form their own scope keyed by `None`.

use serde::{Deserialize, Serialize};

use crate::core::entity::{apply_orders, compaction, renumber_commands, require_non_empty, sort_ranked};
use crate::core::store::{new_id, now, EntityStore};
use crate::{Command, EntityKind, Platform, Result, RowPatch, Script, ScriptHubError, WriteOp};

/// Attributes for a new script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewScript {
    pub title: String,
    pub description: String,
    pub platform: Platform,
    pub commands: Vec<Command>,
    pub tags: Vec<String>,
    pub category_id: Option<String>,
    pub is_favorite: bool,
}

impl NewScript {
    pub fn new(title: impl Into<String>, platform: Platform) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            platform,
            commands: Vec::new(),
            tags: Vec::new(),
            category_id: None,
            is_favorite: false,
        }
    }

    #[must_use]
    pub fn in_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    #[must_use]
    pub fn with_command(mut self, content: impl Into<String>) -> Self {
        self.commands.push(Command::new(content));
        self
    }
}

/// Field-level changes for [`ScriptLibrary::update_script`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub platform: Option<Platform>,
    pub commands: Option<Vec<Command>>,
    pub tags: Option<Vec<String>>,
    pub category_id: Option<Option<String>>,
    pub is_favorite: Option<bool>,
}

/// Which platforms [`ScriptLibrary::filtered_scripts`] keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlatformFilter {
    #[default]
    All,
    Only(Platform),
}

/// Platform filter AND free-text search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptQuery {
    pub platform: PlatformFilter,
    pub search: String,
}

impl ScriptQuery {
    /// Whether `script` passes the filter.
    pub fn matches(&self, script: &Script) -> bool {
        if let PlatformFilter::Only(platform) = self.platform {
            if script.platform != platform {
                return false;
            }
        }

        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let hit = |text: &str| text.to_lowercase().contains(&needle);
        hit(&script.title)
            || hit(&script.description)
            || script.commands.iter().any(|c| {
                hit(&c.content) || c.description.as_deref().is_some_and(hit)
            })
    }
}

/// Mutating and querying operations on scripts.
pub struct ScriptLibrary<'s> {
    store: &'s mut EntityStore,
}

impl<'s> ScriptLibrary<'s> {
    pub(crate) fn new(store: &'s mut EntityStore) -> Self {
        Self { store }
    }

    pub fn script(&self, id: &str) -> Option<&Script> {
        self.store.scripts.iter().find(|s| s.id == id)
    }

    fn require(&self, id: &str) -> Result<&Script> {
        self.script(id)
            .ok_or_else(|| ScriptHubError::not_found(EntityKind::Script, id))
    }

    fn require_category(&self, category_id: Option<&str>) -> Result<()> {
        if let Some(cid) = category_id {
            if !self.store.categories.iter().any(|c| c.id == cid) {
                return Err(ScriptHubError::not_found(EntityKind::Category, cid));
            }
        }
        Ok(())
    }

    /// Scripts of one scope (`None` = uncategorized) in display order.
    pub fn scripts_in(&self, category_id: Option<&str>) -> Vec<&Script> {
        let mut scripts: Vec<&Script> = self
            .store
            .scripts
            .iter()
            .filter(|s| s.category_id.as_deref() == category_id)
            .collect();
        sort_ranked(&mut scripts);
        scripts
    }

    pub fn favorites(&self) -> Vec<&Script> {
        self.store.scripts.iter().filter(|s| s.is_favorite).collect()
    }

    /// Creates a script at the end of its scope with commands renumbered `0..n`.
    ///
    /// # Errors
    ///
    /// [`ScriptHubError::Validation`] for a blank title, [`ScriptHubError::NotFound`]
    /// for an unknown category, or the backend error.
    pub fn add_script(&mut self, attrs: NewScript) -> Result<Script> {
        require_non_empty("Script title", &attrs.title)?;
        self.require_category(attrs.category_id.as_deref())?;

        let order = self
            .store
            .scripts
            .iter()
            .filter(|s| s.category_id == attrs.category_id)
            .count() as i32;
        let mut commands = attrs.commands;
        renumber_commands(&mut commands);
        let timestamp = now();

        let script = Script {
            id: new_id(),
            title: attrs.title.trim().to_string(),
            description: attrs.description,
            platform: attrs.platform,
            commands,
            tags: attrs.tags,
            category_id: attrs.category_id,
            order,
            created_at: timestamp,
            updated_at: timestamp,
            is_favorite: attrs.is_favorite,
        };

        self.store.commit(&[WriteOp::Insert((&script).into())])?;
        self.store.scripts.push(script.clone());
        Ok(script)
    }

    /// Merges `patch` into the script and refreshes `updated_at`.
    ///
    /// Moving to another category appends the script to the new scope and
    /// compacts the old one in the same batch.
    ///
    /// # Errors
    ///
    /// [`ScriptHubError::NotFound`] for an unknown script or category,
    /// [`ScriptHubError::Validation`] for a blank title, or the backend error.
    pub fn update_script(&mut self, id: &str, patch: ScriptPatch) -> Result<Script> {
        let current = self.require(id)?.clone();
        let mut updated = current.clone();

        if let Some(title) = patch.title {
            require_non_empty("Script title", &title)?;
            updated.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(platform) = patch.platform {
            updated.platform = platform;
        }
        if let Some(mut commands) = patch.commands {
            renumber_commands(&mut commands);
            updated.commands = commands;
        }
        if let Some(tags) = patch.tags {
            updated.tags = tags;
        }
        if let Some(is_favorite) = patch.is_favorite {
            updated.is_favorite = is_favorite;
        }

        let mut reorders = Vec::new();
        if let Some(category_id) = patch.category_id {
            if category_id != current.category_id {
                self.require_category(category_id.as_deref())?;
                updated.order = self
                    .store
                    .scripts
                    .iter()
                    .filter(|s| s.category_id == category_id && s.id != id)
                    .count() as i32;
                updated.category_id = category_id;
                reorders = compaction(
                    self.store
                        .scripts
                        .iter()
                        .filter(|s| s.category_id == current.category_id && s.id != id),
                );
            }
        }
        updated.updated_at = now();

        let mut ops = Vec::with_capacity(reorders.len() + 1);
        let row_patch = RowPatch::script_changes(&current, &updated)?;
        if !row_patch.is_empty() {
            ops.push(WriteOp::update(EntityKind::Script, id, row_patch));
        }
        ops.extend(
            reorders
                .iter()
                .map(|(sid, order)| WriteOp::set_order(EntityKind::Script, sid.as_str(), *order)),
        );
        self.store.commit(&ops)?;

        apply_orders(&mut self.store.scripts, &reorders);
        if let Some(slot) = self.store.scripts.iter_mut().find(|s| s.id == id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    /// Deletes a script, compacts its scope, and drops it from selection and recents.
    ///
    /// # Errors
    ///
    /// [`ScriptHubError::NotFound`] for an unknown id, or the backend error.
    pub fn delete_script(&mut self, id: &str) -> Result<()> {
        let scope = self.require(id)?.category_id.clone();
        let reorders = compaction(
            self.store
                .scripts
                .iter()
                .filter(|s| s.category_id == scope && s.id != id),
        );

        let mut ops = vec![WriteOp::delete(EntityKind::Script, id)];
        ops.extend(
            reorders
                .iter()
                .map(|(sid, order)| WriteOp::set_order(EntityKind::Script, sid.as_str(), *order)),
        );
        self.store.commit(&ops)?;

        self.store.scripts.retain(|s| s.id != id);
        apply_orders(&mut self.store.scripts, &reorders);
        forget_scripts(self.store, &[id.to_string()]);
        Ok(())
    }

    /// Flips the favorite flag; returns the new value.
    ///
    /// # Errors
    ///
    /// [`ScriptHubError::NotFound`] for an unknown id, or the backend error.
    pub fn toggle_favorite(&mut self, id: &str) -> Result<bool> {
        let favorite = !self.require(id)?.is_favorite;
        self.store.commit(&[WriteOp::update(
            EntityKind::Script,
            id,
            RowPatch::new().set("is_favorite", favorite),
        )])?;
        if let Some(script) = self.store.scripts.iter_mut().find(|s| s.id == id) {
            script.is_favorite = favorite;
        }
        Ok(favorite)
    }

    /// Re-ranks the scripts of one scope to follow `ordered_ids`.
    ///
    /// Ids outside the scope are ignored; scripts of the scope missing from
    /// the list keep their order.
    ///
    /// # Errors
    ///
    /// Returns the backend error; nothing changes in that case.
    pub fn reorder_scripts(&mut self, category_id: Option<&str>, ordered_ids: &[String]) -> Result<()> {
        let in_scope: Vec<&String> = ordered_ids
            .iter()
            .filter(|id| {
                self.store
                    .scripts
                    .iter()
                    .any(|s| &s.id == *id && s.category_id.as_deref() == category_id)
            })
            .collect();
        let orders: Vec<(String, i32)> = in_scope
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i as i32))
            .collect();

        let ops: Vec<WriteOp<'_>> = orders
            .iter()
            .map(|(id, order)| WriteOp::set_order(EntityKind::Script, id.as_str(), *order))
            .collect();
        self.store.commit(&ops)?;
        apply_orders(&mut self.store.scripts, &orders);
        Ok(())
    }

    /// Scripts passing `query`, in collection order.
    pub fn filtered_scripts(&self, query: &ScriptQuery) -> Vec<&Script> {
        self.store.scripts.iter().filter(|s| query.matches(s)).collect()
    }

    /// Selects a script, or clears the selection with `None`.
    pub fn select_script(&mut self, id: Option<&str>) -> Result<()> {
        if let Some(id) = id {
            self.require(id)?;
        }
        self.store.selected_script_id = id.map(str::to_string);
        Ok(())
    }

    /// Moves `id` to the front of the recently-used list.
    pub fn record_recent(&mut self, id: &str) -> Result<()> {
        self.require(id)?;
        let limit = self.store.recent_limit();
        let recent = &mut self.store.recent_script_ids;
        recent.retain(|r| r != id);
        recent.insert(0, id.to_string());
        recent.truncate(limit);
        Ok(())
    }
}

/// Clears selection and recent references to deleted scripts.
pub(crate) fn forget_scripts(store: &mut EntityStore, ids: &[String]) {
    if store
        .selected_script_id
        .as_ref()
        .is_some_and(|selected| ids.contains(selected))
    {
        store.selected_script_id = None;
    }
    store.recent_script_ids.retain(|r| !ids.contains(r));
}
