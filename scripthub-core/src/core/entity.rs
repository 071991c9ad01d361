//! Canonical entity types: categories, scripts, commands, tags, and variables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Result, ScriptHubError};

/// Target platform of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Macos,
    Linux,
    Cross,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Macos => "macos",
            Self::Linux => "linux",
            Self::Cross => "cross",
        }
    }

    /// File extension used when a script of this platform is exported.
    pub fn export_extension(self) -> &'static str {
        match self {
            Self::Windows => "bat",
            Self::Macos | Self::Linux | Self::Cross => "sh",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ScriptHubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "windows" => Ok(Self::Windows),
            "macos" => Ok(Self::Macos),
            "linux" => Ok(Self::Linux),
            "cross" => Ok(Self::Cross),
            other => Err(ScriptHubError::Validation(format!("Unknown platform: {other}"))),
        }
    }
}

/// A node of the category hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    /// Built-in icon identifier.
    pub icon: String,
    /// Inline image data (usually a `data:` URL). Takes precedence over `icon`.
    pub custom_icon: Option<String>,
    pub description: Option<String>,
    /// Zero-based position among siblings sharing `parent_id`.
    pub order: i32,
    pub created_at: i64,
    pub parent_id: Option<String>,
    pub is_subscription: bool,
    pub source_url: Option<String>,
    pub last_synced_at: Option<i64>,
}

impl Category {
    /// Returns the icon to render: the custom image when present, else the built-in id.
    pub fn display_icon(&self) -> &str {
        self.custom_icon.as_deref().unwrap_or(&self.icon)
    }
}

/// One shell line of a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub content: String,
    pub description: Option<String>,
    pub order: i32,
}

impl Command {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            description: None,
            order: 0,
        }
    }
}

/// Rewrites `order` so that `commands[i].order == i`.
pub fn renumber_commands(commands: &mut [Command]) {
    for (i, command) in commands.iter_mut().enumerate() {
        command.order = i as i32;
    }
}

/// A reusable snippet made of one or more commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: String,
    pub title: String,
    pub description: String,
    pub platform: Platform,
    pub commands: Vec<Command>,
    /// Tag ids. Ids of deleted tags may linger and are treated as absent.
    pub tags: Vec<String>,
    pub category_id: Option<String>,
    /// Zero-based position among scripts sharing `category_id`.
    pub order: i32,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_favorite: bool,
}

impl Script {
    /// All command lines joined with `\n`, in command order.
    pub fn joined_commands(&self) -> String {
        let mut commands: Vec<&Command> = self.commands.iter().collect();
        commands.sort_by_key(|c| c.order);
        commands
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A coloured label scripts can reference by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: String,
    pub created_at: i64,
}

/// A named value substituted into `${NAME}` placeholders at copy time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub id: String,
    pub name: String,
    pub default_value: String,
    pub description: Option<String>,
}

/// Entities ranked by a dense per-scope `order`.
pub(crate) trait Ranked {
    fn id(&self) -> &str;
    fn rank(&self) -> i32;
    fn set_rank(&mut self, order: i32);
}

impl Ranked for Category {
    fn id(&self) -> &str {
        &self.id
    }
    fn rank(&self) -> i32 {
        self.order
    }
    fn set_rank(&mut self, order: i32) {
        self.order = order;
    }
}

impl Ranked for Script {
    fn id(&self) -> &str {
        &self.id
    }
    fn rank(&self) -> i32 {
        self.order
    }
    fn set_rank(&mut self, order: i32) {
        self.order = order;
    }
}

/// Sorts by `order`, breaking ties by id.
pub(crate) fn sort_ranked<T: Ranked>(items: &mut [&T]) {
    items.sort_by(|a, b| a.rank().cmp(&b.rank()).then_with(|| a.id().cmp(b.id())));
}

/// `(id, new_order)` pairs that make `items` dense, skipping ids already in place.
pub(crate) fn compaction<'a, T: Ranked + 'a>(items: impl IntoIterator<Item = &'a T>) -> Vec<(String, i32)> {
    let mut items: Vec<&T> = items.into_iter().collect();
    sort_ranked(&mut items);
    items
        .iter()
        .enumerate()
        .filter(|(i, item)| item.rank() != *i as i32)
        .map(|(i, item)| (item.id().to_string(), i as i32))
        .collect()
}

pub(crate) fn apply_orders<T: Ranked>(items: &mut [T], orders: &[(String, i32)]) {
    if orders.is_empty() {
        return;
    }
    let orders: std::collections::HashMap<&str, i32> =
        orders.iter().map(|(id, o)| (id.as_str(), *o)).collect();
    for item in items.iter_mut() {
        if let Some(order) = orders.get(item.id()) {
            item.set_rank(*order);
        }
    }
}

/// Ensures a required text attribute is not blank.
pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ScriptHubError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}
