//! Reading an exported folder tree back into entities.
//!
//! The manifest is checked before anything else. After that, every section
//! is best-effort: an unreadable category or script file is logged, recorded
//! in [`ImportedLibrary::failures`], and skipped. Directory nesting decides
//! each category's parent.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::entity::{apply_orders, compaction, Ranked};
use crate::core::export::{
    encode_png_data_url, CategoryExport, ExportManifest, ScriptExport,
    UncategorizedExport, CATEGORIES_DIR, CATEGORY_FILE, CUSTOM_ICONS_FILE, GLOBAL_DIR, ICON_FILE,
    MANIFEST_FILE, MANIFEST_VERSION, SCRIPTS_DIR, TAGS_FILE, UNCATEGORIZED_DIR, VARIABLES_FILE,
};
use crate::core::store::{new_id, EntityStore};
use crate::core::tree::MAX_TREE_DEPTH;
use crate::{Category, Command, Result, Script, ScriptHubError, Snapshot, Tag, Variable};

/// Everything reconstructed from an export, ready for
/// [`EntityStore::replace_all`] or [`EntityStore::merge_import`].
#[derive(Debug, Clone)]
pub struct ImportedLibrary {
    pub manifest: ExportManifest,
    pub snapshot: Snapshot,
    /// One line per skipped item.
    pub failures: Vec<String>,
}

/// Counts from [`EntityStore::merge_import`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    pub categories_added: usize,
    pub scripts_added: usize,
    pub tags_added: usize,
    pub variables_added: usize,
}

/// Reads and validates the manifest without importing anything.
///
/// # Errors
///
/// [`ScriptHubError::Format`] if the manifest is missing, malformed, or has
/// an unsupported version.
pub fn peek_import(dir: &Path) -> Result<ExportManifest> {
    let path = dir.join(MANIFEST_FILE);
    let raw = fs::read_to_string(&path)
        .map_err(|e| ScriptHubError::Format(format!("cannot read {}: {e}", path.display())))?;
    let manifest: ExportManifest = serde_json::from_str(&raw)
        .map_err(|e| ScriptHubError::Format(format!("malformed {MANIFEST_FILE}: {e}")))?;
    if manifest.manifest_version != MANIFEST_VERSION {
        return Err(ScriptHubError::Format(format!(
            "unsupported version {} (expected {MANIFEST_VERSION})",
            manifest.manifest_version
        )));
    }
    Ok(manifest)
}

struct Importer {
    icons: HashMap<String, String>,
    snapshot: Snapshot,
    seen_ids: HashSet<String>,
    failures: Vec<String>,
}

impl Importer {
    fn skip(&mut self, what: String) {
        log::warn!("import: {what}");
        self.failures.push(what);
    }

    /// Optional global section; absence is not a failure.
    fn read_global<T: DeserializeOwned + Default>(&mut self, dir: &Path, file: &str) -> T {
        let path = dir.join(GLOBAL_DIR).join(file);
        if !path.exists() {
            log::debug!("import: no {file}, skipping");
            return T::default();
        }
        match read_json(&path) {
            Ok(value) => value,
            Err(e) => {
                self.skip(format!("{GLOBAL_DIR}/{file}: {e}"));
                T::default()
            }
        }
    }

    fn claim_id(&mut self, id: &str, what: &str) -> bool {
        if self.seen_ids.insert(id.to_string()) {
            return true;
        }
        self.skip(format!("duplicate {what} id {id}"));
        false
    }

    fn read_category(&mut self, dir: &Path, parent_id: Option<&str>, depth: usize) {
        if depth > MAX_TREE_DEPTH {
            self.skip(format!("{}: nested too deeply", dir.display()));
            return;
        }
        let export: CategoryExport = match read_json(&dir.join(CATEGORY_FILE)) {
            Ok(export) => export,
            Err(e) => {
                self.skip(format!("{}: {e}", dir.join(CATEGORY_FILE).display()));
                return;
            }
        };
        if !self.claim_id(&export.id, "category") {
            return;
        }

        let custom_icon = self.icons.get(&export.id).cloned().or_else(|| {
            fs::read(dir.join(ICON_FILE))
                .ok()
                .map(|bytes| encode_png_data_url(&bytes))
        });
        self.snapshot.categories.push(Category {
            id: export.id.clone(),
            name: export.name,
            icon: export.icon,
            custom_icon,
            description: export.description,
            order: export.order,
            created_at: export.created_at,
            parent_id: parent_id.map(str::to_string),
            is_subscription: export.is_subscription,
            source_url: export.source_url,
            last_synced_at: export.last_synced_at,
        });

        self.read_scripts(dir, export.scripts, Some(&export.id));

        for child in subdirectories(dir, Some(SCRIPTS_DIR)) {
            self.read_category(&child, Some(&export.id), depth + 1);
        }
    }

    fn read_scripts(&mut self, dir: &Path, scripts: Vec<ScriptExport>, category_id: Option<&str>) {
        for export in scripts {
            if !is_relative_inside(&export.file) {
                self.skip(format!("{}: script file {:?} escapes the export", dir.display(), export.file));
                continue;
            }
            let path = dir.join(&export.file);
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    self.skip(format!("{}: {e}", path.display()));
                    continue;
                }
            };
            if !self.claim_id(&export.id, "script") {
                continue;
            }
            let content = content.strip_suffix('\n').unwrap_or(&content).to_string();
            self.snapshot.scripts.push(Script {
                id: export.id,
                title: export.title,
                description: export.description,
                platform: export.platform,
                commands: vec![Command::new(content)],
                tags: export.tags,
                category_id: category_id.map(str::to_string),
                order: export.order,
                created_at: export.created_at,
                updated_at: export.updated_at,
                is_favorite: export.is_favorite,
            });
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Only plain relative paths like `scripts/build.sh` may be read.
fn is_relative_inside(file: &str) -> bool {
    let path = Path::new(file);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Directories below `dir` sorted by name, leaving out `reserved`.
fn subdirectories(dir: &Path, reserved: Option<&str>) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && !reserved.is_some_and(|name| path.ends_with(name)))
        .collect();
    dirs.sort();
    dirs
}

/// Re-densifies `order` within each group keyed by `scope`.
fn densify<T: Ranked, K: std::hash::Hash + Eq>(items: &mut [T], scope: impl Fn(&T) -> K) {
    let mut groups: HashMap<K, Vec<&T>> = HashMap::new();
    for item in items.iter() {
        groups.entry(scope(item)).or_default().push(item);
    }
    let orders: Vec<(String, i32)> = groups
        .into_values()
        .flat_map(|group| compaction(group))
        .collect();
    apply_orders(items, &orders);
}

/// Reconstructs the library exported under `dir`.
///
/// # Errors
///
/// [`ScriptHubError::Format`] for a missing or unsupported manifest. Nothing
/// else is fatal.
pub fn import_library(dir: &Path) -> Result<ImportedLibrary> {
    let manifest = peek_import(dir)?;

    let mut importer = Importer {
        icons: HashMap::new(),
        snapshot: Snapshot::default(),
        seen_ids: HashSet::new(),
        failures: Vec::new(),
    };
    importer.snapshot.tags = importer.read_global::<Vec<Tag>>(dir, TAGS_FILE);
    importer.snapshot.variables = importer.read_global::<Vec<Variable>>(dir, VARIABLES_FILE);
    importer.icons = importer.read_global::<HashMap<String, String>>(dir, CUSTOM_ICONS_FILE);

    for root in subdirectories(&dir.join(CATEGORIES_DIR), None) {
        importer.read_category(&root, None, 0);
    }

    let loose_dir = dir.join(UNCATEGORIZED_DIR);
    if loose_dir.join(CATEGORY_FILE).exists() {
        match read_json::<UncategorizedExport>(&loose_dir.join(CATEGORY_FILE)) {
            Ok(loose) => importer.read_scripts(&loose_dir, loose.scripts, None),
            Err(e) => importer.skip(format!("{UNCATEGORIZED_DIR}/{CATEGORY_FILE}: {e}")),
        }
    }

    let Importer {
        mut snapshot,
        failures,
        ..
    } = importer;
    densify(&mut snapshot.categories, |c: &Category| c.parent_id.clone());
    densify(&mut snapshot.scripts, |s: &Script| s.category_id.clone());

    log::info!(
        "imported {} categories, {} scripts ({} skipped) from {}",
        snapshot.categories.len(),
        snapshot.scripts.len(),
        failures.len(),
        dir.display()
    );
    Ok(ImportedLibrary {
        manifest,
        snapshot,
        failures,
    })
}

impl EntityStore {
    /// Adds an imported library next to the existing one.
    ///
    /// Every imported category and script gets a fresh id, with parent and
    /// category links remapped. Tags and variables are matched by name and
    /// only missing ones are added. Imported root categories and
    /// uncategorized scripts are appended after the existing ones. All rows
    /// are inserted in one backend batch.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the store is unchanged in that case.
    pub fn merge_import(&mut self, imported: Snapshot) -> Result<MergeSummary> {
        let mut tag_ids: HashMap<String, String> = HashMap::new();
        let mut new_tags: Vec<Tag> = Vec::new();
        for tag in imported.tags {
            let existing = self
                .tags
                .iter()
                .chain(new_tags.iter())
                .find(|t| t.name.eq_ignore_ascii_case(&tag.name))
                .map(|t| t.id.clone());
            match existing {
                Some(id) => {
                    tag_ids.insert(tag.id, id);
                }
                None => {
                    let id = new_id();
                    tag_ids.insert(tag.id, id.clone());
                    new_tags.push(Tag { id, ..tag });
                }
            }
        }

        let mut new_variables: Vec<Variable> = Vec::new();
        for variable in imported.variables {
            let taken = self
                .variables
                .iter()
                .chain(new_variables.iter())
                .any(|v| v.name == variable.name);
            if !taken {
                new_variables.push(Variable {
                    id: new_id(),
                    ..variable
                });
            }
        }

        let category_ids: HashMap<String, String> = imported
            .categories
            .iter()
            .map(|c| (c.id.clone(), new_id()))
            .collect();
        let mut new_categories: Vec<Category> = imported
            .categories
            .into_iter()
            .map(|c| Category {
                id: category_ids[&c.id].clone(),
                parent_id: c.parent_id.as_ref().and_then(|p| category_ids.get(p)).cloned(),
                ..c
            })
            .collect();
        let root_offset = self.categories.iter().filter(|c| c.parent_id.is_none()).count() as i32;
        densify(&mut new_categories, |c: &Category| c.parent_id.clone());
        for category in new_categories.iter_mut().filter(|c| c.parent_id.is_none()) {
            category.order += root_offset;
        }

        let loose_offset = self.scripts.iter().filter(|s| s.category_id.is_none()).count() as i32;
        let mut new_scripts: Vec<Script> = imported
            .scripts
            .into_iter()
            .map(|s| Script {
                id: new_id(),
                category_id: s.category_id.as_ref().and_then(|c| category_ids.get(c)).cloned(),
                tags: s.tags.iter().filter_map(|t| tag_ids.get(t)).cloned().collect(),
                ..s
            })
            .collect();
        densify(&mut new_scripts, |s: &Script| s.category_id.clone());
        for script in new_scripts.iter_mut().filter(|s| s.category_id.is_none()) {
            script.order += loose_offset;
        }

        let additions = Snapshot {
            categories: new_categories,
            scripts: new_scripts,
            tags: new_tags,
            variables: new_variables,
        };
        self.commit(&additions.insert_ops())?;

        let summary = MergeSummary {
            categories_added: additions.categories.len(),
            scripts_added: additions.scripts.len(),
            tags_added: additions.tags.len(),
            variables_added: additions.variables.len(),
        };
        self.tags.extend(additions.tags);
        self.variables.extend(additions.variables);
        self.categories.extend(additions.categories);
        self.scripts.extend(additions.scripts);
        log::info!(
            "merged {} categories and {} scripts",
            summary.categories_added,
            summary.scripts_added
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::export::{decode_png_data_url, export_library};
    use crate::core::store::test_support::{failing_store, memory_store};
    use crate::{NewCategory, NewScript, Platform};
    use tempfile::TempDir;

    fn by_id<T: Ranked + Clone>(items: &[T]) -> Vec<T> {
        let mut items = items.to_vec();
        items.sort_by(|a, b| a.id().cmp(b.id()));
        items
    }

    /// Root "Dev" with two scripts and a child "Ops" with one.
    fn populated_store() -> EntityStore {
        let mut store = memory_store();
        let dev = store.tree().add_category(NewCategory::named("Dev"), None).unwrap();
        let ops = store.tree().add_category(NewCategory::named("Ops"), Some(&dev.id)).unwrap();
        let tag = store.tags().add_tag("deploy").unwrap();
        store.tags().add_variable("HOST", "localhost", Some("target")).unwrap();
        let mut build = NewScript::new("Build", Platform::Linux)
            .in_category(dev.id.clone())
            .with_command("make all");
        build.tags = vec![tag.id.clone()];
        build.description = "compile".to_string();
        store.scripts().add_script(build).unwrap();
        store
            .scripts()
            .add_script(NewScript::new("Test", Platform::Cross).in_category(dev.id.clone()).with_command("make test"))
            .unwrap();
        store
            .scripts()
            .add_script(NewScript::new("Flush", Platform::Windows).in_category(ops.id).with_command("ipconfig /flushdns"))
            .unwrap();
        store
            .scripts()
            .add_script(NewScript::new("Loose", Platform::Macos).with_command("open ."))
            .unwrap();
        store
    }

    #[test]
    fn test_round_trip_preserves_entities() {
        let store = populated_store();
        let dir = TempDir::new().unwrap();
        let original = store.snapshot();
        export_library(dir.path(), &original).unwrap();

        let imported = import_library(dir.path()).unwrap();
        assert!(imported.failures.is_empty(), "{:?}", imported.failures);
        assert_eq!(by_id(&imported.snapshot.categories), by_id(&original.categories));
        assert_eq!(by_id(&imported.snapshot.scripts), by_id(&original.scripts));
        assert_eq!(imported.snapshot.tags, original.tags);
        assert_eq!(imported.snapshot.variables, original.variables);
    }

    #[test]
    fn test_multi_command_script_collapses_to_one_command() {
        let mut store = memory_store();
        let mut attrs = NewScript::new("Deploy", Platform::Linux);
        attrs.commands = vec![Command::new("git pull"), Command::new("make")];
        store.scripts().add_script(attrs).unwrap();
        let dir = TempDir::new().unwrap();
        export_library(dir.path(), &store.snapshot()).unwrap();

        let imported = import_library(dir.path()).unwrap();
        let commands = &imported.snapshot.scripts[0].commands;
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].content, "git pull\nmake");
        assert_eq!(commands[0].order, 0);
    }

    #[test]
    fn test_custom_icon_round_trips() {
        let mut store = memory_store();
        let mut attrs = NewCategory::named("Icons");
        attrs.custom_icon = Some(encode_png_data_url(b"\x89PNG"));
        let category = store.tree().add_category(attrs, None).unwrap();
        let dir = TempDir::new().unwrap();
        export_library(dir.path(), &store.snapshot()).unwrap();

        // Without the JSON section the icon comes back from icon.png.
        fs::remove_file(dir.path().join(GLOBAL_DIR).join(CUSTOM_ICONS_FILE)).unwrap();
        let imported = import_library(dir.path()).unwrap();
        assert_eq!(imported.snapshot.categories[0].custom_icon, category.custom_icon);
        assert_eq!(
            decode_png_data_url(imported.snapshot.categories[0].custom_icon.as_deref().unwrap()).unwrap(),
            b"\x89PNG"
        );
    }

    #[test]
    fn test_merge_import_assigns_fresh_ids() {
        let source = populated_store();
        let dir = TempDir::new().unwrap();
        export_library(dir.path(), &source.snapshot()).unwrap();
        let imported = import_library(dir.path()).unwrap();

        let mut target = memory_store();
        target.scripts().add_script(NewScript::new("Mine", Platform::Linux)).unwrap();
        let summary = target.merge_import(imported.snapshot).unwrap();
        assert_eq!(summary.categories_added, 2);
        assert_eq!(summary.scripts_added, 4);

        let categorized = target.all_scripts().iter().filter(|s| s.category_id.is_some()).count();
        assert_eq!(categorized, 3);
        assert_eq!(target.all_categories().len(), 2);

        let dev = target.all_categories().iter().find(|c| c.name == "Dev").unwrap();
        let ops = target.all_categories().iter().find(|c| c.name == "Ops").unwrap();
        assert_eq!(ops.parent_id.as_deref(), Some(dev.id.as_str()));
        assert!(source.all_categories().iter().all(|c| c.id != dev.id));

        let loose_orders: Vec<i32> = target.scripts().scripts_in(None).iter().map(|s| s.order).collect();
        assert_eq!(loose_orders, vec![0, 1]);
        let build = target.all_scripts().iter().find(|s| s.title == "Build").unwrap();
        assert_eq!(build.tags, vec![target.all_tags()[0].id.clone()]);
    }

    #[test]
    fn test_merge_import_appends_roots_and_merges_tags_by_name() {
        let source = populated_store();
        let mut target = memory_store();
        target.tree().add_category(NewCategory::named("Existing"), None).unwrap();
        let existing_tag = target.tags().add_tag("Deploy").unwrap();

        target.merge_import(source.snapshot()).unwrap();
        let dev = target.all_categories().iter().find(|c| c.name == "Dev").unwrap();
        assert_eq!(dev.order, 1);
        assert_eq!(target.all_tags().len(), 1);
        assert_eq!(target.all_variables().len(), 1);
        let build = target.all_scripts().iter().find(|s| s.title == "Build").unwrap();
        assert_eq!(build.tags, vec![existing_tag.id]);
    }

    #[test]
    fn test_merge_import_failure_keeps_store() {
        let source = populated_store();
        let (mut target, fail) = failing_store();
        fail.set(true);
        assert!(target.merge_import(source.snapshot()).is_err());
        assert!(target.all_categories().is_empty());
        assert!(target.all_scripts().is_empty());
    }

    #[test]
    fn test_replace_all_with_import_keeps_ids() {
        let source = populated_store();
        let dir = TempDir::new().unwrap();
        export_library(dir.path(), &source.snapshot()).unwrap();
        let imported = import_library(dir.path()).unwrap();

        let mut target = memory_store();
        target.tree().add_category(NewCategory::named("Gone"), None).unwrap();
        target.replace_all(imported.snapshot).unwrap();
        assert_eq!(by_id(target.all_categories()), by_id(source.all_categories()));
    }

    #[test]
    fn test_missing_or_wrong_manifest_is_fatal() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(import_library(dir.path()), Err(ScriptHubError::Format(_))));

        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"manifest_version":"1.0","exported_at":"x","app_version":"0.1.0","stats":{"categories":0,"scripts":0,"tags":0,"variables":0}}"#,
        )
        .unwrap();
        assert!(matches!(peek_import(dir.path()), Err(ScriptHubError::Format(_))));
        assert!(matches!(import_library(dir.path()), Err(ScriptHubError::Format(_))));
    }

    #[test]
    fn test_broken_items_are_skipped() {
        let store = populated_store();
        let dir = TempDir::new().unwrap();
        export_library(dir.path(), &store.snapshot()).unwrap();

        let ops_dir = dir.path().join(CATEGORIES_DIR).join("dev").join("ops");
        fs::write(ops_dir.join(CATEGORY_FILE), "{ broken").unwrap();
        fs::remove_file(dir.path().join(CATEGORIES_DIR).join("dev").join(SCRIPTS_DIR).join("build.sh")).unwrap();
        fs::remove_file(dir.path().join(GLOBAL_DIR).join(TAGS_FILE)).unwrap();

        let imported = import_library(dir.path()).unwrap();
        assert_eq!(imported.failures.len(), 2);
        assert_eq!(imported.snapshot.categories.len(), 1);
        assert!(imported.snapshot.tags.is_empty());
        let titles: Vec<&str> = imported.snapshot.scripts.iter().map(|s| s.title.as_str()).collect();
        assert!(titles.contains(&"Test"));
        assert!(titles.contains(&"Loose"));
        assert!(!titles.contains(&"Build"));
        // The remaining script in Dev is re-ranked to stay dense.
        let test = imported.snapshot.scripts.iter().find(|s| s.title == "Test").unwrap();
        assert_eq!(test.order, 0);
    }
    #[test]
    fn test_root_named_like_scripts_folder_round_trips() {
        let mut store = memory_store();
        let root = store.tree().add_category(NewCategory::named("Scripts"), None).unwrap();
        let child = store.tree().add_category(NewCategory::named("Scripts"), Some(&root.id)).unwrap();
        store
            .scripts()
            .add_script(NewScript::new("Backup", Platform::Linux).in_category(root.id.clone()).with_command("tar czf b.tgz ."))
            .unwrap();
        let dir = TempDir::new().unwrap();
        export_library(dir.path(), &store.snapshot()).unwrap();
        assert!(dir.path().join(CATEGORIES_DIR).join(SCRIPTS_DIR).join(CATEGORY_FILE).exists());

        let imported = import_library(dir.path()).unwrap();
        assert!(imported.failures.is_empty(), "{:?}", imported.failures);
        assert_eq!(by_id(&imported.snapshot.categories), by_id(store.all_categories()));
        assert_eq!(imported.snapshot.scripts.len(), 1);
        assert_eq!(imported.snapshot.scripts[0].category_id.as_deref(), Some(root.id.as_str()));
        let nested = imported.snapshot.categories.iter().find(|c| c.id == child.id).unwrap();
        assert_eq!(nested.parent_id.as_deref(), Some(root.id.as_str()));
    }

    #[test]
    fn test_script_file_outside_export_is_rejected() {
        let store = populated_store();
        let dir = TempDir::new().unwrap();
        let export_dir = dir.path().join("export");
        export_library(&export_dir, &store.snapshot()).unwrap();
        fs::write(dir.path().join("secret.txt"), "TOP SECRET").unwrap();

        let loose_file = export_dir.join(UNCATEGORIZED_DIR).join(CATEGORY_FILE);
        let mut loose: UncategorizedExport = read_json(&loose_file).unwrap();
        loose.scripts[0].file = "../../secret.txt".to_string();
        let mut absolute = loose.scripts[0].clone();
        absolute.id = "abs".to_string();
        absolute.file = dir.path().join("secret.txt").to_string_lossy().to_string();
        loose.scripts.push(absolute);
        fs::write(&loose_file, serde_json::to_string(&loose).unwrap()).unwrap();

        let imported = import_library(&export_dir).unwrap();
        assert_eq!(imported.failures.len(), 2, "{:?}", imported.failures);
        assert!(imported
            .snapshot
            .scripts
            .iter()
            .all(|s| s.commands.iter().all(|c| c.content != "TOP SECRET")));
        assert!(!imported.snapshot.scripts.iter().any(|s| s.title == "Loose"));
    }

    #[test]
    fn test_only_plain_relative_paths_are_inside() {
        assert!(is_relative_inside("scripts/build.sh"));
        assert!(!is_relative_inside("../secret.txt"));
        assert!(!is_relative_inside("scripts/../../x"));
        assert!(!is_relative_inside("/etc/passwd"));
        assert!(!is_relative_inside("./scripts/build.sh"));
        assert!(!is_relative_inside(""));
    }
}
