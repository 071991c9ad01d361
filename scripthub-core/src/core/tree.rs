//! Category hierarchy: parent links, sibling order, descendant queries.
//!
//! Sibling groups are keyed by `parent_id` (`None` for the root level) and
//! keep a dense `0..n` order. Display order is `order` ascending with ties
//! broken by id string comparison, so the result is deterministic even on
//! data that violates the invariant.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::entity::{apply_orders, compaction, require_non_empty, sort_ranked};
use crate::core::store::{new_id, now, EntityStore};
use crate::{
    Category, DeleteResult, EntityKind, Result, RowPatch, ScriptHubError, WriteOp,
};

/// Nesting deeper than this is treated as corrupt when walking the tree recursively.
pub const MAX_TREE_DEPTH: usize = 256;

/// Default built-in icon for new categories.
pub const DEFAULT_CATEGORY_ICON: &str = "folder";

/// Attributes for a new category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub name: String,
    pub icon: String,
    pub custom_icon: Option<String>,
    pub description: Option<String>,
}

impl NewCategory {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            icon: DEFAULT_CATEGORY_ICON.to_string(),
            custom_icon: None,
            description: None,
        }
    }
}

/// Field-level changes for [`CategoryTree::update_category`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub custom_icon: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub parent_id: Option<Option<String>>,
    pub is_subscription: Option<bool>,
    pub source_url: Option<Option<String>>,
    pub last_synced_at: Option<Option<i64>>,
}

/// One node of the forest returned by [`CategoryTree::category_tree`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    pub category: Category,
    /// Depth in the tree; roots are level 0.
    pub level: usize,
    pub children: Vec<CategoryNode>,
}

/// Sorts siblings by `order`, then id.
pub fn sort_siblings(siblings: &mut [&Category]) {
    sort_ranked(siblings);
}

/// Direct children of `parent_id` in display order.
pub fn children_of<'a>(categories: &'a [Category], parent_id: Option<&str>) -> Vec<&'a Category> {
    let mut children: Vec<&Category> = categories
        .iter()
        .filter(|c| c.parent_id.as_deref() == parent_id)
        .collect();
    sort_siblings(&mut children);
    children
}

/// Every category below `id`, found depth-first with an explicit stack.
///
/// Returns an empty set for leaves and unknown ids. A visited set keeps
/// corrupt (cyclic) data from looping.
pub fn descendant_ids(categories: &[Category], id: &str) -> HashSet<String> {
    let mut by_parent: HashMap<&str, Vec<&str>> = HashMap::new();
    for c in categories {
        if let Some(parent) = c.parent_id.as_deref() {
            by_parent.entry(parent).or_default().push(&c.id);
        }
    }

    let mut found = HashSet::new();
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        for &child in by_parent.get(current).into_iter().flatten() {
            if child != id && found.insert(child.to_string()) {
                stack.push(child);
            }
        }
    }
    found
}

/// The chain of categories from the root down to `id`.
///
/// # Errors
///
/// [`ScriptHubError::NotFound`] if `id` is unknown, [`ScriptHubError::CorruptTree`]
/// if a parent link is dangling or the walk exceeds the collection size.
pub fn category_path(categories: &[Category], id: &str) -> Result<Vec<Category>> {
    let by_id: HashMap<&str, &Category> = categories.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut current = *by_id
        .get(id)
        .ok_or_else(|| ScriptHubError::not_found(EntityKind::Category, id))?;

    let mut path = vec![current.clone()];
    while let Some(parent_id) = current.parent_id.as_deref() {
        if path.len() > categories.len() {
            return Err(ScriptHubError::CorruptTree(format!(
                "cycle detected above category {id}"
            )));
        }
        current = *by_id.get(parent_id).ok_or_else(|| {
            ScriptHubError::CorruptTree(format!("category {} has missing parent {parent_id}", current.id))
        })?;
        path.push(current.clone());
    }
    path.reverse();
    Ok(path)
}

/// Builds the display forest. Categories unreachable from a root (cycles) are omitted.
pub fn build_forest(categories: &[Category]) -> Vec<CategoryNode> {
    let mut by_parent: HashMap<Option<&str>, Vec<&Category>> = HashMap::new();
    for c in categories {
        by_parent.entry(c.parent_id.as_deref()).or_default().push(c);
    }
    for siblings in by_parent.values_mut() {
        sort_siblings(siblings);
    }
    build_level(&by_parent, None, 0)
}

fn build_level(
    by_parent: &HashMap<Option<&str>, Vec<&Category>>,
    parent_id: Option<&str>,
    level: usize,
) -> Vec<CategoryNode> {
    if level >= MAX_TREE_DEPTH {
        log::warn!("category tree deeper than {MAX_TREE_DEPTH} levels; truncating");
        return Vec::new();
    }
    by_parent
        .get(&parent_id)
        .map(|siblings| {
            siblings
                .iter()
                .map(|c| CategoryNode {
                    category: (*c).clone(),
                    level,
                    children: build_level(by_parent, Some(&c.id), level + 1),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Mutating and querying operations on the category hierarchy.
pub struct CategoryTree<'s> {
    store: &'s mut EntityStore,
}

impl<'s> CategoryTree<'s> {
    pub(crate) fn new(store: &'s mut EntityStore) -> Self {
        Self { store }
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.store.categories.iter().find(|c| c.id == id)
    }

    fn require(&self, id: &str) -> Result<&Category> {
        self.category(id)
            .ok_or_else(|| ScriptHubError::not_found(EntityKind::Category, id))
    }

    pub fn roots(&self) -> Vec<&Category> {
        children_of(&self.store.categories, None)
    }

    pub fn children(&self, parent_id: &str) -> Vec<&Category> {
        children_of(&self.store.categories, Some(parent_id))
    }

    /// Creates a category at the end of `parent_id`'s sibling group.
    ///
    /// # Errors
    ///
    /// [`ScriptHubError::Validation`] for a blank name, [`ScriptHubError::NotFound`]
    /// for an unknown parent, or the backend error.
    pub fn add_category(&mut self, attrs: NewCategory, parent_id: Option<&str>) -> Result<Category> {
        require_non_empty("Category name", &attrs.name)?;
        if let Some(pid) = parent_id {
            self.require(pid)?;
        }

        let order = self
            .store
            .categories
            .iter()
            .filter(|c| c.parent_id.as_deref() == parent_id)
            .count() as i32;

        let category = Category {
            id: new_id(),
            name: attrs.name.trim().to_string(),
            icon: attrs.icon,
            custom_icon: attrs.custom_icon,
            description: attrs.description,
            order,
            created_at: now(),
            parent_id: parent_id.map(str::to_string),
            is_subscription: false,
            source_url: None,
            last_synced_at: None,
        };

        self.store.commit(&[WriteOp::Insert((&category).into())])?;
        log::debug!("added category {} ({})", category.name, category.id);
        self.store.categories.push(category.clone());
        Ok(category)
    }

    /// Merges `patch` into the category.
    ///
    /// A changed `parent_id` appends the category to the end of its new
    /// sibling group and compacts the group it left, in the same batch.
    ///
    /// # Errors
    ///
    /// [`ScriptHubError::NotFound`] for an unknown id or parent,
    /// [`ScriptHubError::InvalidMove`] if the move would create a cycle,
    /// [`ScriptHubError::Validation`] for a blank name, or the backend error.
    pub fn update_category(&mut self, id: &str, patch: CategoryPatch) -> Result<Category> {
        let current = self.require(id)?.clone();
        let mut updated = current.clone();

        if let Some(name) = patch.name {
            require_non_empty("Category name", &name)?;
            updated.name = name.trim().to_string();
        }
        if let Some(icon) = patch.icon {
            updated.icon = icon;
        }
        if let Some(custom_icon) = patch.custom_icon {
            updated.custom_icon = custom_icon;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(is_subscription) = patch.is_subscription {
            updated.is_subscription = is_subscription;
        }
        if let Some(source_url) = patch.source_url {
            updated.source_url = source_url;
        }
        if let Some(last_synced_at) = patch.last_synced_at {
            updated.last_synced_at = last_synced_at;
        }

        let mut reorders = Vec::new();
        if let Some(new_parent) = patch.parent_id {
            if new_parent != current.parent_id {
                if let Some(pid) = new_parent.as_deref() {
                    if pid == id {
                        return Err(ScriptHubError::InvalidMove(
                            "A category cannot be its own parent".to_string(),
                        ));
                    }
                    self.require(pid)?;
                    if descendant_ids(&self.store.categories, id).contains(pid) {
                        return Err(ScriptHubError::InvalidMove(
                            "Move would create a cycle".to_string(),
                        ));
                    }
                }

                updated.order = self
                    .store
                    .categories
                    .iter()
                    .filter(|c| c.parent_id == new_parent && c.id != id)
                    .count() as i32;
                updated.parent_id = new_parent;

                reorders = compaction(
                    self.store
                        .categories
                        .iter()
                        .filter(|c| c.parent_id == current.parent_id && c.id != id),
                );
            }
        }

        let mut ops = Vec::with_capacity(reorders.len() + 1);
        let row_patch = RowPatch::category_changes(&current, &updated);
        if !row_patch.is_empty() {
            ops.push(WriteOp::update(EntityKind::Category, id, row_patch));
        }
        ops.extend(
            reorders
                .iter()
                .map(|(sid, order)| WriteOp::set_order(EntityKind::Category, sid.as_str(), *order)),
        );
        self.store.commit(&ops)?;

        apply_orders(&mut self.store.categories, &reorders);
        if let Some(slot) = self.store.categories.iter_mut().find(|c| c.id == id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    /// Deletes the category, its descendants, and all their scripts.
    ///
    /// # Errors
    ///
    /// See [`CascadeDelete::delete_category`](crate::CascadeDelete::delete_category).
    pub fn delete_category(&mut self, id: &str) -> Result<DeleteResult> {
        self.store.cascade().delete_category(id)
    }

    pub fn descendant_ids(&self, id: &str) -> HashSet<String> {
        descendant_ids(&self.store.categories, id)
    }

    pub fn category_tree(&self) -> Vec<CategoryNode> {
        build_forest(&self.store.categories)
    }

    /// # Errors
    ///
    /// See [`category_path`].
    pub fn category_path(&self, id: &str) -> Result<Vec<Category>> {
        category_path(&self.store.categories, id)
    }

    /// Sets `order` to each id's index in `ordered_ids`, which the caller
    /// guarantees is one sibling group. Categories not listed keep their order.
    ///
    /// # Errors
    ///
    /// [`ScriptHubError::NotFound`] if any id is unknown (nothing is changed),
    /// or the backend error.
    pub fn reorder_categories(&mut self, ordered_ids: &[String]) -> Result<()> {
        for id in ordered_ids {
            self.require(id)?;
        }
        let orders: Vec<(String, i32)> = ordered_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i as i32))
            .collect();
        let ops: Vec<WriteOp<'_>> = orders
            .iter()
            .map(|(id, order)| WriteOp::set_order(EntityKind::Category, id.as_str(), *order))
            .collect();
        self.store.commit(&ops)?;
        apply_orders(&mut self.store.categories, &orders);
        Ok(())
    }

    /// Flips the expanded flag of a category; returns the new state.
    pub fn toggle_expanded(&mut self, id: &str) -> Result<bool> {
        self.require(id)?;
        if self.store.expanded.remove(id) {
            Ok(false)
        } else {
            self.store.expanded.insert(id.to_string());
            Ok(true)
        }
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.store.expanded.contains(id)
    }

    /// Selects a category, or clears the selection with `None`.
    pub fn select_category(&mut self, id: Option<&str>) -> Result<()> {
        if let Some(id) = id {
            self.require(id)?;
        }
        self.store.selected_category_id = id.map(str::to_string);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_support::{failing_store, memory_store};
    use crate::Snapshot;

    fn orders_of(store: &mut EntityStore, parent: Option<&str>) -> Vec<i32> {
        let tree = store.tree();
        let siblings = match parent {
            Some(p) => tree.children(p),
            None => tree.roots(),
        };
        siblings.iter().map(|c| c.order).collect()
    }

    fn raw(id: &str, parent: Option<&str>, order: i32) -> Category {
        Category {
            id: id.to_string(),
            name: id.to_string(),
            icon: DEFAULT_CATEGORY_ICON.to_string(),
            custom_icon: None,
            description: None,
            order,
            created_at: 0,
            parent_id: parent.map(str::to_string),
            is_subscription: false,
            source_url: None,
            last_synced_at: None,
        }
    }

    #[test]
    fn test_add_category_assigns_dense_order() {
        let mut store = memory_store();
        let dev = store.tree().add_category(NewCategory::named("Dev"), None).unwrap();
        let ops = store.tree().add_category(NewCategory::named("Ops"), None).unwrap();
        let child = store
            .tree()
            .add_category(NewCategory::named("Scripts"), Some(&dev.id))
            .unwrap();

        assert_eq!(dev.order, 0);
        assert_eq!(ops.order, 1);
        assert_eq!(child.order, 0);
        assert_eq!(child.parent_id.as_deref(), Some(dev.id.as_str()));
    }

    #[test]
    fn test_add_category_unknown_parent() {
        let mut store = memory_store();
        let err = store
            .tree()
            .add_category(NewCategory::named("Orphan"), Some("nope"))
            .unwrap_err();
        assert!(matches!(err, ScriptHubError::NotFound { .. }));
        assert!(store.all_categories().is_empty());
    }

    #[test]
    fn test_add_category_rejects_blank_name() {
        let mut store = memory_store();
        let err = store.tree().add_category(NewCategory::named("   "), None).unwrap_err();
        assert!(matches!(err, ScriptHubError::Validation(_)));
    }

    #[test]
    fn test_add_category_write_failure_leaves_memory_untouched() {
        let (mut store, fail) = failing_store();
        fail.set(true);
        assert!(store.tree().add_category(NewCategory::named("Dev"), None).is_err());
        assert!(store.all_categories().is_empty());
    }

    #[test]
    fn test_reorder_categories() {
        let mut store = memory_store();
        let a = store.tree().add_category(NewCategory::named("A"), None).unwrap();
        let b = store.tree().add_category(NewCategory::named("B"), None).unwrap();
        let c = store.tree().add_category(NewCategory::named("C"), None).unwrap();

        store
            .tree()
            .reorder_categories(&[c.id.clone(), a.id.clone(), b.id.clone()])
            .unwrap();

        let tree = store.tree();
        assert_eq!(tree.category(&c.id).unwrap().order, 0);
        assert_eq!(tree.category(&a.id).unwrap().order, 1);
        assert_eq!(tree.category(&b.id).unwrap().order, 2);
        let names: Vec<&str> = tree.roots().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_reorder_with_unknown_id_changes_nothing() {
        let mut store = memory_store();
        let a = store.tree().add_category(NewCategory::named("A"), None).unwrap();
        let b = store.tree().add_category(NewCategory::named("B"), None).unwrap();
        assert!(store
            .tree()
            .reorder_categories(&[b.id.clone(), "ghost".to_string(), a.id.clone()])
            .is_err());
        assert_eq!(orders_of(&mut store, None), vec![0, 1]);
        assert_eq!(store.tree().roots()[0].id, a.id);
    }

    #[test]
    fn test_reorder_failure_keeps_memory() {
        let (mut store, fail) = failing_store();
        let a = store.tree().add_category(NewCategory::named("A"), None).unwrap();
        let b = store.tree().add_category(NewCategory::named("B"), None).unwrap();
        fail.set(true);
        assert!(store.tree().reorder_categories(&[b.id.clone(), a.id.clone()]).is_err());
        assert_eq!(store.tree().category(&a.id).unwrap().order, 0);
    }

    #[test]
    fn test_update_category_not_found() {
        let mut store = memory_store();
        store.tree().add_category(NewCategory::named("Dev"), None).unwrap();
        let patch = CategoryPatch {
            name: Some("x".to_string()),
            ..Default::default()
        };
        let err = store.tree().update_category("nonexistent", patch).unwrap_err();
        assert!(matches!(err, ScriptHubError::NotFound { kind: EntityKind::Category, .. }));
        assert_eq!(store.all_categories()[0].name, "Dev");
    }

    #[test]
    fn test_update_category_merges_fields() {
        let mut store = memory_store();
        let dev = store.tree().add_category(NewCategory::named("Dev"), None).unwrap();
        let updated = store
            .tree()
            .update_category(
                &dev.id,
                CategoryPatch {
                    name: Some("Development".to_string()),
                    description: Some(Some("build tools".to_string())),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Development");
        assert_eq!(updated.description.as_deref(), Some("build tools"));
        assert_eq!(updated.icon, dev.icon);
    }

    #[test]
    fn test_reparent_compacts_old_group_and_appends_to_new() {
        let mut store = memory_store();
        let a = store.tree().add_category(NewCategory::named("A"), None).unwrap();
        let b = store.tree().add_category(NewCategory::named("B"), None).unwrap();
        let c = store.tree().add_category(NewCategory::named("C"), None).unwrap();
        store.tree().add_category(NewCategory::named("C1"), Some(&c.id)).unwrap();

        let moved = store
            .tree()
            .update_category(
                &a.id,
                CategoryPatch {
                    parent_id: Some(Some(c.id.clone())),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(moved.order, 1);
        assert_eq!(orders_of(&mut store, None), vec![0, 1]);
        assert_eq!(orders_of(&mut store, Some(&c.id)), vec![0, 1]);
        assert_eq!(store.tree().roots()[0].id, b.id);
    }

    #[test]
    fn test_reparent_into_descendant_is_rejected() {
        let mut store = memory_store();
        let a = store.tree().add_category(NewCategory::named("A"), None).unwrap();
        let b = store.tree().add_category(NewCategory::named("B"), Some(&a.id)).unwrap();
        let err = store
            .tree()
            .update_category(
                &a.id,
                CategoryPatch {
                    parent_id: Some(Some(b.id.clone())),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));

        let err = store
            .tree()
            .update_category(
                &a.id,
                CategoryPatch {
                    parent_id: Some(Some(a.id.clone())),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ScriptHubError::InvalidMove(_)));
    }

    #[test]
    fn test_descendant_ids() {
        let mut store = memory_store();
        let a = store.tree().add_category(NewCategory::named("A"), None).unwrap();
        let b = store.tree().add_category(NewCategory::named("B"), Some(&a.id)).unwrap();
        let c = store.tree().add_category(NewCategory::named("C"), Some(&b.id)).unwrap();
        let d = store.tree().add_category(NewCategory::named("D"), None).unwrap();

        let ids = store.tree().descendant_ids(&a.id);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&b.id) && ids.contains(&c.id));
        assert!(store.tree().descendant_ids(&d.id).is_empty());
    }

    #[test]
    fn test_category_tree_levels_and_order() {
        let mut store = memory_store();
        let a = store.tree().add_category(NewCategory::named("A"), None).unwrap();
        store.tree().add_category(NewCategory::named("B"), None).unwrap();
        let a1 = store.tree().add_category(NewCategory::named("A1"), Some(&a.id)).unwrap();
        store.tree().add_category(NewCategory::named("A2"), Some(&a.id)).unwrap();
        store.tree().add_category(NewCategory::named("A1x"), Some(&a1.id)).unwrap();

        let forest = store.tree().category_tree();
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].category.name, "A");
        assert_eq!(forest[0].level, 0);
        assert_eq!(forest[0].children.len(), 2);
        assert_eq!(forest[0].children[0].category.name, "A1");
        assert_eq!(forest[0].children[0].level, 1);
        assert_eq!(forest[0].children[0].children[0].level, 2);
    }

    #[test]
    fn test_category_path() {
        let mut store = memory_store();
        let a = store.tree().add_category(NewCategory::named("A"), None).unwrap();
        let b = store.tree().add_category(NewCategory::named("B"), Some(&a.id)).unwrap();
        let c = store.tree().add_category(NewCategory::named("C"), Some(&b.id)).unwrap();

        let path: Vec<String> = store
            .tree()
            .category_path(&c.id)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(path, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_category_path_terminates_on_cycle() {
        let mut store = memory_store();
        store
            .replace_all(Snapshot {
                categories: vec![raw("a", Some("b"), 0), raw("b", Some("a"), 0)],
                ..Default::default()
            })
            .unwrap();

        let err = store.tree().category_path("a").unwrap_err();
        assert!(matches!(err, ScriptHubError::CorruptTree(_)));
        assert!(store.tree().category_tree().is_empty());
        assert_eq!(store.tree().descendant_ids("a").len(), 1);
    }

    #[test]
    fn test_ties_break_by_id() {
        let categories = vec![raw("b", None, 0), raw("a", None, 0)];
        let roots = children_of(&categories, None);
        assert_eq!(roots[0].id, "a");
    }

    #[test]
    fn test_toggle_expanded_and_select() {
        let mut store = memory_store();
        let a = store.tree().add_category(NewCategory::named("A"), None).unwrap();
        assert!(store.tree().toggle_expanded(&a.id).unwrap());
        assert!(store.tree().is_expanded(&a.id));
        assert!(!store.tree().toggle_expanded(&a.id).unwrap());
        store.tree().select_category(Some(&a.id)).unwrap();
        assert_eq!(store.selected_category_id(), Some(a.id.as_str()));
        assert!(store.tree().select_category(Some("ghost")).is_err());
    }
}
