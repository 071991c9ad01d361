//! Internal domain modules for the ScriptHub core library.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod delete;
pub mod entity;
pub mod error;
pub mod export;
#[cfg(feature = "github")]
pub mod github;
pub mod import;
pub mod remote;
pub mod scripts;
pub mod settings;
pub mod storage;
pub mod store;
pub mod subscription;
pub mod tags;
pub mod tree;

#[doc(inline)]
pub use delete::{CascadeDelete, DeleteResult};
#[doc(inline)]
pub use entity::{renumber_commands, Category, Command, Platform, Script, Tag, Variable};
#[doc(inline)]
pub use error::{NetworkFailure, PartialProgress, Result, ScriptHubError};
#[doc(inline)]
pub use export::{
    export_library, sanitize_filename, CategoryExport, ExportManifest, ExportStats, ExportSummary,
    ScriptExport, UncategorizedExport, MANIFEST_FILE, MANIFEST_VERSION,
};
#[doc(inline)]
#[cfg(feature = "github")]
pub use github::GitHubSource;
#[doc(inline)]
pub use import::{import_library, peek_import, ImportedLibrary, MergeSummary};
#[doc(inline)]
pub use remote::{
    detect_platform, extract_archive, has_allowed_extension, strip_script_extension, FetchedFile,
    RemoteFile, RemoteSource, RepoLocator, DEFAULT_SCRIPT_EXTENSIONS,
};
#[doc(inline)]
pub use scripts::{NewScript, PlatformFilter, ScriptLibrary, ScriptPatch, ScriptQuery};
#[doc(inline)]
pub use settings::{
    load_settings, load_settings_from, save_settings, save_settings_to, settings_file_path,
    Settings, DEFAULT_SIZE_THRESHOLD_BYTES,
};
#[doc(inline)]
pub use storage::{Backend, EntityKind, RowPatch, RowRef, Snapshot, SqlValue, Storage, WriteOp};
#[doc(inline)]
pub use store::{EntityStore, DEFAULT_RECENT_LIMIT};
#[doc(inline)]
pub use subscription::{
    ImportPhase, SizeCheck, SubscriptionImportResult, SubscriptionImporter, SubscriptionPreview,
};
#[doc(inline)]
pub use tags::{next_tag_color, render_template, template_placeholders, TagBook, TAG_PALETTE};
#[doc(inline)]
pub use tree::{
    build_forest, category_path, descendant_ids, CategoryNode, CategoryPatch, CategoryTree,
    NewCategory, MAX_TREE_DEPTH,
};
