//! Library export as a portable folder tree.
//!
//! ```text
//! <root>/scripthub.json
//!        global/{tags,variables,custom_icons}.json
//!        categories/<name>/category.json, icon.png, scripts/, <child>/...
//!        uncategorized/category.json, scripts/
//!        README.md
//! ```
//!
//! Category metadata nests recursively; each script is reduced to a file
//! reference whose content is its commands, one per line.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::core::entity::sort_ranked;
use crate::core::tree::MAX_TREE_DEPTH;
use crate::{Category, Platform, Result, Script, Snapshot};

pub const MANIFEST_VERSION: &str = "2.0";
pub const MANIFEST_FILE: &str = "scripthub.json";
pub(crate) const GLOBAL_DIR: &str = "global";
pub(crate) const CATEGORIES_DIR: &str = "categories";
pub(crate) const UNCATEGORIZED_DIR: &str = "uncategorized";
pub(crate) const SCRIPTS_DIR: &str = "scripts";
pub(crate) const CATEGORY_FILE: &str = "category.json";
pub(crate) const ICON_FILE: &str = "icon.png";
pub(crate) const TAGS_FILE: &str = "tags.json";
pub(crate) const VARIABLES_FILE: &str = "variables.json";
pub(crate) const CUSTOM_ICONS_FILE: &str = "custom_icons.json";

pub(crate) const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Entity counts recorded in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStats {
    pub categories: usize,
    pub scripts: usize,
    pub tags: usize,
    pub variables: usize,
}

/// Top-level `scripthub.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub manifest_version: String,
    /// RFC 3339 timestamp.
    pub exported_at: String,
    pub app_version: String,
    pub stats: ExportStats,
}

/// One script inside a `category.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptExport {
    pub id: String,
    pub title: String,
    pub description: String,
    pub platform: Platform,
    pub tags: Vec<String>,
    pub order: i32,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_favorite: bool,
    /// Path of the command file, relative to the category directory.
    pub file: String,
}

/// `category.json`: the category's attributes, its scripts, and its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryExport {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub description: Option<String>,
    pub order: i32,
    pub created_at: i64,
    pub is_subscription: bool,
    pub source_url: Option<String>,
    pub last_synced_at: Option<i64>,
    pub scripts: Vec<ScriptExport>,
    #[serde(default)]
    pub subcategories: Vec<CategoryExport>,
}

/// `uncategorized/category.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncategorizedExport {
    pub scripts: Vec<ScriptExport>,
}

/// What an export wrote, plus items that could not be written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub categories_exported: usize,
    pub scripts_exported: usize,
    pub failures: Vec<String>,
}

/// Converts a name into a safe file or directory name.
///
/// Lowercases, turns whitespace into `_`, and drops path-unsafe characters.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() => Some('_'),
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => None,
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Hands out names unique within one directory: `name`, `name_2`, `name_3`, ...
#[derive(Default)]
struct UniqueNames {
    taken: HashSet<String>,
}

impl UniqueNames {
    fn reserving(names: &[&str]) -> Self {
        Self {
            taken: names.iter().map(|n| (*n).to_string()).collect(),
        }
    }

    fn claim(&mut self, stem: &str, extension: Option<&str>) -> String {
        let render = |n: usize| {
            let stem = if n == 1 { stem.to_string() } else { format!("{stem}_{n}") };
            match extension {
                Some(ext) => format!("{stem}.{ext}"),
                None => stem,
            }
        };
        let mut n = 1;
        while self.taken.contains(&render(n)) {
            n += 1;
        }
        let name = render(n);
        self.taken.insert(name.clone());
        name
    }
}

/// Decodes a `data:image/png;base64,` URL.
pub(crate) fn decode_png_data_url(data: &str) -> Option<Vec<u8>> {
    BASE64.decode(data.strip_prefix(PNG_DATA_URL_PREFIX)?).ok()
}

pub(crate) fn encode_png_data_url(bytes: &[u8]) -> String {
    format!("{PNG_DATA_URL_PREFIX}{}", BASE64.encode(bytes))
}

struct Exporter<'a> {
    children: HashMap<&'a str, Vec<&'a Category>>,
    scripts: HashMap<&'a str, Vec<&'a Script>>,
    visited: HashSet<&'a str>,
    summary: ExportSummary,
}

impl<'a> Exporter<'a> {
    /// Writes `dir/category.json`, the scripts, the icon, and each child directory.
    fn write_category(&mut self, dir: &Path, category: &'a Category, depth: usize) -> Option<CategoryExport> {
        if depth > MAX_TREE_DEPTH || !self.visited.insert(category.id.as_str()) {
            self.summary
                .failures
                .push(format!("category {} skipped: cycle or excessive depth", category.name));
            return None;
        }
        if let Err(e) = fs::create_dir_all(dir.join(SCRIPTS_DIR)) {
            self.summary
                .failures
                .push(format!("category {}: {e}", category.name));
            return None;
        }

        if let Some(bytes) = category.custom_icon.as_deref().and_then(decode_png_data_url) {
            if let Err(e) = fs::write(dir.join(ICON_FILE), bytes) {
                self.summary
                    .failures
                    .push(format!("icon of {}: {e}", category.name));
            }
        }

        let scripts = self.scripts.get(category.id.as_str()).cloned().unwrap_or_default();
        let script_exports = self.write_scripts(dir, &scripts);

        let mut names = UniqueNames::reserving(&[SCRIPTS_DIR]);
        let children = self.children.get(category.id.as_str()).cloned().unwrap_or_default();
        let mut subcategories = Vec::with_capacity(children.len());
        for child in children {
            let child_dir = dir.join(names.claim(&sanitize_filename(&child.name), None));
            if let Some(export) = self.write_category(&child_dir, child, depth + 1) {
                subcategories.push(export);
            }
        }

        let export = CategoryExport {
            id: category.id.clone(),
            name: category.name.clone(),
            icon: category.icon.clone(),
            description: category.description.clone(),
            order: category.order,
            created_at: category.created_at,
            is_subscription: category.is_subscription,
            source_url: category.source_url.clone(),
            last_synced_at: category.last_synced_at,
            scripts: script_exports,
            subcategories,
        };
        match write_json(&dir.join(CATEGORY_FILE), &export) {
            Ok(()) => {
                self.summary.categories_exported += 1;
                Some(export)
            }
            Err(e) => {
                self.summary
                    .failures
                    .push(format!("category {}: {e}", category.name));
                None
            }
        }
    }

    fn write_scripts(&mut self, dir: &Path, scripts: &[&Script]) -> Vec<ScriptExport> {
        let mut names = UniqueNames::default();
        let mut exports = Vec::with_capacity(scripts.len());
        for script in scripts {
            let file_name = names.claim(
                &sanitize_filename(&script.title),
                Some(script.platform.export_extension()),
            );
            let relative = format!("{SCRIPTS_DIR}/{file_name}");
            let mut content = script.joined_commands();
            content.push('\n');
            if let Err(e) = fs::write(dir.join(SCRIPTS_DIR).join(&file_name), content) {
                self.summary
                    .failures
                    .push(format!("script {}: {e}", script.title));
                continue;
            }
            self.summary.scripts_exported += 1;
            exports.push(ScriptExport {
                id: script.id.clone(),
                title: script.title.clone(),
                description: script.description.clone(),
                platform: script.platform,
                tags: script.tags.clone(),
                order: script.order,
                created_at: script.created_at,
                updated_at: script.updated_at,
                is_favorite: script.is_favorite,
                file: relative,
            });
        }
        exports
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Writes `snapshot` under `dir` in the transfer layout.
///
/// Scripts whose category is missing are exported as uncategorized.
/// Failures of individual categories or scripts are collected in the
/// summary; the manifest is written last.
///
/// # Errors
///
/// Returns an error only when the root, the global section, or the manifest
/// cannot be written.
pub fn export_library(dir: &Path, snapshot: &Snapshot) -> Result<ExportSummary> {
    fs::create_dir_all(dir.join(GLOBAL_DIR))?;
    write_json(&dir.join(GLOBAL_DIR).join(TAGS_FILE), &snapshot.tags)?;
    write_json(&dir.join(GLOBAL_DIR).join(VARIABLES_FILE), &snapshot.variables)?;
    let custom_icons: HashMap<&str, &str> = snapshot
        .categories
        .iter()
        .filter_map(|c| Some((c.id.as_str(), c.custom_icon.as_deref()?)))
        .collect();
    if !custom_icons.is_empty() {
        write_json(&dir.join(GLOBAL_DIR).join(CUSTOM_ICONS_FILE), &custom_icons)?;
    }

    let known: HashSet<&str> = snapshot.categories.iter().map(|c| c.id.as_str()).collect();
    let mut children: HashMap<&str, Vec<&Category>> = HashMap::new();
    let mut roots: Vec<&Category> = Vec::new();
    for category in &snapshot.categories {
        match category.parent_id.as_deref() {
            Some(pid) if known.contains(pid) => children.entry(pid).or_default().push(category),
            _ => roots.push(category),
        }
    }
    for siblings in children.values_mut() {
        sort_ranked(siblings);
    }
    sort_ranked(&mut roots);

    let mut scripts: HashMap<&str, Vec<&Script>> = HashMap::new();
    let mut uncategorized: Vec<&Script> = Vec::new();
    for script in &snapshot.scripts {
        match script.category_id.as_deref() {
            Some(cid) if known.contains(cid) => scripts.entry(cid).or_default().push(script),
            _ => uncategorized.push(script),
        }
    }
    for group in scripts.values_mut() {
        sort_ranked(group);
    }
    sort_ranked(&mut uncategorized);

    let mut exporter = Exporter {
        children,
        scripts,
        visited: HashSet::new(),
        summary: ExportSummary::default(),
    };

    let categories_dir = dir.join(CATEGORIES_DIR);
    fs::create_dir_all(&categories_dir)?;
    let mut names = UniqueNames::default();
    for root in roots {
        let root_dir = categories_dir.join(names.claim(&sanitize_filename(&root.name), None));
        exporter.write_category(&root_dir, root, 0);
    }

    let loose_dir = dir.join(UNCATEGORIZED_DIR);
    fs::create_dir_all(loose_dir.join(SCRIPTS_DIR))?;
    let loose = UncategorizedExport {
        scripts: exporter.write_scripts(&loose_dir, &uncategorized),
    };
    write_json(&loose_dir.join(CATEGORY_FILE), &loose)?;

    let summary = exporter.summary;
    let manifest = ExportManifest {
        manifest_version: MANIFEST_VERSION.to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        stats: ExportStats {
            categories: summary.categories_exported,
            scripts: summary.scripts_exported,
            tags: snapshot.tags.len(),
            variables: snapshot.variables.len(),
        },
    };
    fs::write(dir.join("README.md"), readme(&manifest))?;
    write_json(&dir.join(MANIFEST_FILE), &manifest)?;

    if !summary.failures.is_empty() {
        log::warn!("export finished with {} failures", summary.failures.len());
    }
    log::info!(
        "exported {} categories and {} scripts to {}",
        summary.categories_exported,
        summary.scripts_exported,
        dir.display()
    );
    Ok(summary)
}

fn readme(manifest: &ExportManifest) -> String {
    format!(
        "# ScriptHub export\n\n\
         Exported {} by ScriptHub {} (format {}).\n\n\
         - {} categories\n- {} scripts\n- {} tags\n- {} variables\n\n\
         Each folder under `categories/` is one category. Its `category.json` lists the\n\
         category's scripts; their commands live in `scripts/`, one per line.\n\
         Scripts without a category are in `uncategorized/`.\n",
        manifest.exported_at,
        manifest.app_version,
        manifest.manifest_version,
        manifest.stats.categories,
        manifest.stats.scripts,
        manifest.stats.tags,
        manifest.stats.variables,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;
    use tempfile::TempDir;

    fn category(id: &str, name: &str, parent: Option<&str>, order: i32) -> Category {
        Category {
            id: id.to_string(),
            name: name.to_string(),
            icon: "folder".to_string(),
            custom_icon: None,
            description: None,
            order,
            created_at: 1_700_000_000,
            parent_id: parent.map(str::to_string),
            is_subscription: false,
            source_url: None,
            last_synced_at: None,
        }
    }

    fn script(id: &str, title: &str, category_id: Option<&str>, platform: Platform) -> Script {
        Script {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            platform,
            commands: vec![Command::new(format!("echo {id}"))],
            tags: vec![],
            category_id: category_id.map(str::to_string),
            order: 0,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_100,
            is_favorite: false,
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Backup Home"), "backup_home");
        assert_eq!(sanitize_filename("a/b\\c:d*e?"), "abcde");
        assert_eq!(sanitize_filename("../etc"), "etc");
        assert_eq!(sanitize_filename("  "), "untitled");
        assert_eq!(sanitize_filename("Déjà Vu"), "déjà_vu");
    }

    #[test]
    fn test_unique_names() {
        let mut names = UniqueNames::reserving(&[SCRIPTS_DIR]);
        assert_eq!(names.claim("scripts", None), "scripts_2");
        assert_eq!(names.claim("run", Some("sh")), "run.sh");
        assert_eq!(names.claim("run", Some("sh")), "run_2.sh");
        assert_eq!(names.claim("run", Some("bat")), "run.bat");
    }

    #[test]
    fn test_export_layout() {
        let dir = TempDir::new().unwrap();
        let mut snapshot = Snapshot::default();
        let mut root = category("r", "Dev Tools", None, 0);
        root.custom_icon = Some(encode_png_data_url(&[0x89, b'P', b'N', b'G']));
        snapshot.categories.push(root);
        snapshot.categories.push(category("c", "Child", Some("r"), 0));
        let mut multi = script("s1", "Build All", Some("r"), Platform::Linux);
        multi.commands.push(Command::new("make"));
        snapshot.scripts.push(multi);
        snapshot.scripts.push(script("s2", "Flush", Some("c"), Platform::Windows));
        snapshot.scripts.push(script("s3", "Loose", None, Platform::Macos));
        snapshot.scripts.push(script("s4", "Orphan", Some("gone"), Platform::Cross));

        let summary = export_library(dir.path(), &snapshot).unwrap();
        assert_eq!(summary.categories_exported, 2);
        assert_eq!(summary.scripts_exported, 4);
        assert!(summary.failures.is_empty());

        let root_dir = dir.path().join("categories").join("dev_tools");
        assert!(root_dir.join("category.json").exists());
        assert!(root_dir.join("icon.png").exists());
        assert_eq!(
            fs::read_to_string(root_dir.join("scripts").join("build_all.sh")).unwrap(),
            "echo s1\nmake\n"
        );
        assert!(root_dir.join("child").join("scripts").join("flush.bat").exists());
        assert!(dir.path().join("uncategorized").join("scripts").join("loose.sh").exists());
        assert!(dir.path().join("uncategorized").join("scripts").join("orphan.sh").exists());
        assert!(dir.path().join("global").join("custom_icons.json").exists());
        assert!(dir.path().join("README.md").exists());

        let exported: CategoryExport =
            serde_json::from_str(&fs::read_to_string(root_dir.join("category.json")).unwrap()).unwrap();
        assert_eq!(exported.scripts[0].file, "scripts/build_all.sh");
        assert_eq!(exported.subcategories.len(), 1);
        assert_eq!(exported.subcategories[0].name, "Child");

        let manifest: ExportManifest =
            serde_json::from_str(&fs::read_to_string(dir.path().join("scripthub.json")).unwrap()).unwrap();
        assert_eq!(manifest.manifest_version, "2.0");
        assert_eq!(manifest.stats.scripts, 4);
    }

    #[test]
    fn test_manifest_uses_snake_case_keys() {
        let manifest = ExportManifest {
            manifest_version: MANIFEST_VERSION.to_string(),
            exported_at: "2024-01-01T00:00:00Z".to_string(),
            app_version: "0.3.0".to_string(),
            stats: ExportStats::default(),
        };
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("\"manifest_version\":\"2.0\""));
        assert!(json.contains("\"exported_at\""));
    }

    #[test]
    fn test_colliding_titles_get_suffixes() {
        let dir = TempDir::new().unwrap();
        let mut snapshot = Snapshot::default();
        snapshot.scripts.push(script("a", "Run", None, Platform::Linux));
        let mut second = script("b", "run", None, Platform::Linux);
        second.order = 1;
        snapshot.scripts.push(second);
        export_library(dir.path(), &snapshot).unwrap();
        let scripts = dir.path().join("uncategorized").join("scripts");
        assert!(scripts.join("run.sh").exists());
        assert!(scripts.join("run_2.sh").exists());
    }

    #[test]
    fn test_png_data_url_round_trip() {
        let url = encode_png_data_url(b"\x89PNG");
        assert!(url.starts_with(PNG_DATA_URL_PREFIX));
        assert_eq!(decode_png_data_url(&url).unwrap(), b"\x89PNG");
        assert!(decode_png_data_url("data:image/svg+xml;base64,AAAA").is_none());
    }
}
