//! Core library for ScriptHub: a local library of reusable command-line snippets.
//!
//! The primary entry point is [`EntityStore`], which holds every category,
//! script, tag, and variable in memory and mirrors each change into a
//! [`Backend`] (normally the SQLite [`Storage`]) before applying it.
//! Mutations go through short-lived engines borrowed from the store:
//! [`CategoryTree`], [`ScriptLibrary`], [`CascadeDelete`], and [`TagBook`].
//!
//! Repositories are subscribed to with [`SubscriptionImporter`]; whole
//! libraries move between machines with [`export_library`] and
//! [`import_library`].
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

// Re-export commonly used types.
#[doc(inline)]
pub use crate::core::{
    delete::{CascadeDelete, DeleteResult},
    entity::{renumber_commands, Category, Command, Platform, Script, Tag, Variable},
    error::{NetworkFailure, PartialProgress, Result, ScriptHubError},
    export::{
        export_library, sanitize_filename, CategoryExport, ExportManifest, ExportStats,
        ExportSummary, ScriptExport, UncategorizedExport, MANIFEST_FILE, MANIFEST_VERSION,
    },
    import::{import_library, peek_import, ImportedLibrary, MergeSummary},
    remote::{
        detect_platform, extract_archive, has_allowed_extension, strip_script_extension,
        FetchedFile, RemoteFile, RemoteSource, RepoLocator, DEFAULT_SCRIPT_EXTENSIONS,
    },
    scripts::{NewScript, PlatformFilter, ScriptLibrary, ScriptPatch, ScriptQuery},
    settings::{
        load_settings, load_settings_from, save_settings, save_settings_to, settings_file_path,
        Settings, DEFAULT_SIZE_THRESHOLD_BYTES,
    },
    storage::{Backend, EntityKind, RowPatch, RowRef, Snapshot, SqlValue, Storage, WriteOp},
    store::{EntityStore, DEFAULT_RECENT_LIMIT},
    subscription::{
        ImportPhase, SizeCheck, SubscriptionImportResult, SubscriptionImporter,
        SubscriptionPreview,
    },
    tags::{next_tag_color, render_template, template_placeholders, TagBook, TAG_PALETTE},
    tree::{
        build_forest, category_path, descendant_ids, CategoryNode, CategoryPatch, CategoryTree,
        NewCategory, MAX_TREE_DEPTH,
    },
};

#[doc(inline)]
#[cfg(feature = "github")]
pub use crate::core::github::GitHubSource;
