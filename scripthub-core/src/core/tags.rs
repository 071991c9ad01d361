//! Tags, variables, and `${NAME}` template rendering.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::core::entity::require_non_empty;
use crate::core::store::{new_id, now, EntityStore};
use crate::{EntityKind, Result, RowPatch, ScriptHubError, Tag, Variable, WriteOp};

/// Colours handed out to new tags, in order.
pub const TAG_PALETTE: &[&str] = &[
    "#3b82f6", "#10b981", "#f59e0b", "#ef4444", "#8b5cf6", "#ec4899", "#14b8a6", "#f97316",
    "#6366f1", "#84cc16",
];

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Z][A-Z0-9_]*)\}").expect("valid regex"));

static VARIABLE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("valid regex"));

/// First palette colour no existing tag uses; cycles once all are taken.
pub fn next_tag_color(tags: &[Tag]) -> &'static str {
    TAG_PALETTE
        .iter()
        .copied()
        .find(|color| !tags.iter().any(|t| t.color.eq_ignore_ascii_case(color)))
        .unwrap_or(TAG_PALETTE[tags.len() % TAG_PALETTE.len()])
}

/// Substitutes `${NAME}` placeholders.
///
/// Values come from `overrides` first, then from the variable defaults.
/// Unknown placeholders are left as written.
pub fn render_template(text: &str, variables: &[Variable], overrides: &HashMap<String, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            overrides
                .get(name)
                .cloned()
                .or_else(|| {
                    variables
                        .iter()
                        .find(|v| v.name == name)
                        .map(|v| v.default_value.clone())
                })
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Placeholder names used in `text`, in first-appearance order.
pub fn template_placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(text) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Tag and variable CRUD.
pub struct TagBook<'s> {
    store: &'s mut EntityStore,
}

impl<'s> TagBook<'s> {
    pub(crate) fn new(store: &'s mut EntityStore) -> Self {
        Self { store }
    }

    pub fn tag(&self, id: &str) -> Option<&Tag> {
        self.store.tags.iter().find(|t| t.id == id)
    }

    /// Tags of `script_tag_ids` that still exist; dangling ids are skipped.
    pub fn resolve_tags(&self, script_tag_ids: &[String]) -> Vec<&Tag> {
        script_tag_ids.iter().filter_map(|id| self.tag(id)).collect()
    }

    fn ensure_unique_tag(&self, name: &str, except: Option<&str>) -> Result<()> {
        let taken = self
            .store
            .tags
            .iter()
            .any(|t| t.name.eq_ignore_ascii_case(name) && Some(t.id.as_str()) != except);
        if taken {
            return Err(ScriptHubError::Validation(format!("Tag \"{name}\" already exists")));
        }
        Ok(())
    }

    /// Creates a tag with the next unused palette colour.
    pub fn add_tag(&mut self, name: &str) -> Result<Tag> {
        require_non_empty("Tag name", name)?;
        let name = name.trim();
        self.ensure_unique_tag(name, None)?;

        let tag = Tag {
            id: new_id(),
            name: name.to_string(),
            color: next_tag_color(&self.store.tags).to_string(),
            created_at: now(),
        };
        self.store.commit(&[WriteOp::Insert((&tag).into())])?;
        self.store.tags.push(tag.clone());
        Ok(tag)
    }

    /// Renames and/or recolours a tag.
    pub fn update_tag(&mut self, id: &str, name: Option<&str>, color: Option<&str>) -> Result<Tag> {
        let mut tag = self
            .tag(id)
            .cloned()
            .ok_or_else(|| ScriptHubError::not_found(EntityKind::Tag, id))?;
        let mut patch = RowPatch::new();
        if let Some(name) = name {
            require_non_empty("Tag name", name)?;
            self.ensure_unique_tag(name.trim(), Some(id))?;
            tag.name = name.trim().to_string();
            patch = patch.set("name", tag.name.as_str());
        }
        if let Some(color) = color {
            tag.color = color.to_string();
            patch = patch.set("color", color);
        }
        if patch.is_empty() {
            return Ok(tag);
        }

        self.store.commit(&[WriteOp::update(EntityKind::Tag, id, patch)])?;
        if let Some(slot) = self.store.tags.iter_mut().find(|t| t.id == id) {
            *slot = tag.clone();
        }
        Ok(tag)
    }

    /// Deletes a tag. Scripts keep the now-dangling id.
    pub fn delete_tag(&mut self, id: &str) -> Result<()> {
        if self.tag(id).is_none() {
            return Err(ScriptHubError::not_found(EntityKind::Tag, id));
        }
        self.store.commit(&[WriteOp::delete(EntityKind::Tag, id)])?;
        self.store.tags.retain(|t| t.id != id);
        Ok(())
    }

    pub fn variable(&self, id: &str) -> Option<&Variable> {
        self.store.variables.iter().find(|v| v.id == id)
    }

    fn validate_variable_name(&self, name: &str, except: Option<&str>) -> Result<()> {
        if !VARIABLE_NAME_RE.is_match(name) {
            return Err(ScriptHubError::Validation(format!(
                "Variable name \"{name}\" must be UPPER_SNAKE_CASE"
            )));
        }
        if self
            .store
            .variables
            .iter()
            .any(|v| v.name == name && Some(v.id.as_str()) != except)
        {
            return Err(ScriptHubError::Validation(format!("Variable \"{name}\" already exists")));
        }
        Ok(())
    }

    pub fn add_variable(
        &mut self,
        name: &str,
        default_value: &str,
        description: Option<&str>,
    ) -> Result<Variable> {
        let name = name.trim();
        self.validate_variable_name(name, None)?;

        let variable = Variable {
            id: new_id(),
            name: name.to_string(),
            default_value: default_value.to_string(),
            description: description.map(str::to_string),
        };
        self.store.commit(&[WriteOp::Insert((&variable).into())])?;
        self.store.variables.push(variable.clone());
        Ok(variable)
    }

    /// Replaces a variable's name, default, and description.
    pub fn update_variable(
        &mut self,
        id: &str,
        name: &str,
        default_value: &str,
        description: Option<&str>,
    ) -> Result<Variable> {
        if self.variable(id).is_none() {
            return Err(ScriptHubError::not_found(EntityKind::Variable, id));
        }
        let name = name.trim();
        self.validate_variable_name(name, Some(id))?;

        let variable = Variable {
            id: id.to_string(),
            name: name.to_string(),
            default_value: default_value.to_string(),
            description: description.map(str::to_string),
        };
        let patch = RowPatch::new()
            .set("name", name)
            .set("default_value", default_value)
            .set("description", description);
        self.store.commit(&[WriteOp::update(EntityKind::Variable, id, patch)])?;
        if let Some(slot) = self.store.variables.iter_mut().find(|v| v.id == id) {
            *slot = variable.clone();
        }
        Ok(variable)
    }

    pub fn delete_variable(&mut self, id: &str) -> Result<()> {
        if self.variable(id).is_none() {
            return Err(ScriptHubError::not_found(EntityKind::Variable, id));
        }
        self.store.commit(&[WriteOp::delete(EntityKind::Variable, id)])?;
        self.store.variables.retain(|v| v.id != id);
        Ok(())
    }

    /// Renders `text` against the stored variables.
    pub fn render(&self, text: &str, overrides: &HashMap<String, String>) -> String {
        render_template(text, &self.store.variables, overrides)
    }
}
