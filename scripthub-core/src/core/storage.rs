//! Persistent backing store for the entity collections.
//!
//! The in-memory [`EntityStore`](super::store::EntityStore) is authoritative;
//! a [`Backend`] only mirrors it. Every mutation is expressed as a list of
//! [`WriteOp`]s handed to [`Backend::apply`], which must apply all of them or
//! none. [`Storage`] is the SQLite implementation.

use std::fmt;
use std::path::Path;

use rusqlite::types::{ToSql, ToSqlOutput, Value};
use rusqlite::{params, Connection, Transaction};

use crate::{Category, Command, Result, Script, ScriptHubError, Tag, Variable};

/// The four persisted entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Category,
    Script,
    Tag,
    Variable,
}

impl EntityKind {
    fn table(self) -> &'static str {
        match self {
            Self::Category => "categories",
            Self::Script => "scripts",
            Self::Tag => "tags",
            Self::Variable => "variables",
        }
    }

    fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Category => &[
                "name",
                "icon",
                "custom_icon",
                "description",
                "sort_order",
                "created_at",
                "parent_id",
                "is_subscription",
                "source_url",
                "last_synced_at",
            ],
            Self::Script => &[
                "title",
                "description",
                "platform",
                "commands_json",
                "tags_json",
                "category_id",
                "sort_order",
                "created_at",
                "updated_at",
                "is_favorite",
            ],
            Self::Tag => &["name", "color", "created_at"],
            Self::Variable => &["name", "default_value", "description"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Category => "category",
            Self::Script => "script",
            Self::Tag => "tag",
            Self::Variable => "variable",
        };
        f.write_str(name)
    }
}

/// A column value inside a [`RowPatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Text(s) => ToSqlOutput::Borrowed(s.as_str().into()),
        })
    }
}

/// A partial row: the columns that changed and their new values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPatch {
    changes: Vec<(&'static str, SqlValue)>,
}

impl RowPatch {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.changes.push((column, value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.changes.iter().map(|(c, _)| *c)
    }

    /// Columns of `new` that differ from `old`.
    pub fn category_changes(old: &Category, new: &Category) -> Self {
        let mut patch = Self::new();
        if old.name != new.name {
            patch = patch.set("name", new.name.as_str());
        }
        if old.icon != new.icon {
            patch = patch.set("icon", new.icon.as_str());
        }
        if old.custom_icon != new.custom_icon {
            patch = patch.set("custom_icon", new.custom_icon.clone());
        }
        if old.description != new.description {
            patch = patch.set("description", new.description.clone());
        }
        if old.order != new.order {
            patch = patch.set("sort_order", new.order);
        }
        if old.parent_id != new.parent_id {
            patch = patch.set("parent_id", new.parent_id.clone());
        }
        if old.is_subscription != new.is_subscription {
            patch = patch.set("is_subscription", new.is_subscription);
        }
        if old.source_url != new.source_url {
            patch = patch.set("source_url", new.source_url.clone());
        }
        if old.last_synced_at != new.last_synced_at {
            patch = patch.set("last_synced_at", new.last_synced_at);
        }
        patch
    }

    /// Columns of `new` that differ from `old`.
    pub fn script_changes(old: &Script, new: &Script) -> Result<Self> {
        let mut patch = Self::new();
        if old.title != new.title {
            patch = patch.set("title", new.title.as_str());
        }
        if old.description != new.description {
            patch = patch.set("description", new.description.as_str());
        }
        if old.platform != new.platform {
            patch = patch.set("platform", new.platform.as_str());
        }
        if old.commands != new.commands {
            patch = patch.set("commands_json", serde_json::to_string(&new.commands)?);
        }
        if old.tags != new.tags {
            patch = patch.set("tags_json", serde_json::to_string(&new.tags)?);
        }
        if old.category_id != new.category_id {
            patch = patch.set("category_id", new.category_id.clone());
        }
        if old.order != new.order {
            patch = patch.set("sort_order", new.order);
        }
        if old.updated_at != new.updated_at {
            patch = patch.set("updated_at", new.updated_at);
        }
        if old.is_favorite != new.is_favorite {
            patch = patch.set("is_favorite", new.is_favorite);
        }
        Ok(patch)
    }
}

/// A borrowed full row, used for inserts.
#[derive(Debug, Clone, Copy)]
pub enum RowRef<'a> {
    Category(&'a Category),
    Script(&'a Script),
    Tag(&'a Tag),
    Variable(&'a Variable),
}

impl<'a> From<&'a Category> for RowRef<'a> {
    fn from(c: &'a Category) -> Self {
        Self::Category(c)
    }
}

impl<'a> From<&'a Script> for RowRef<'a> {
    fn from(s: &'a Script) -> Self {
        Self::Script(s)
    }
}

impl<'a> From<&'a Tag> for RowRef<'a> {
    fn from(t: &'a Tag) -> Self {
        Self::Tag(t)
    }
}

impl<'a> From<&'a Variable> for RowRef<'a> {
    fn from(v: &'a Variable) -> Self {
        Self::Variable(v)
    }
}

/// One step of an atomic write batch.
#[derive(Debug, Clone)]
pub enum WriteOp<'a> {
    Insert(RowRef<'a>),
    Update {
        kind: EntityKind,
        id: String,
        patch: RowPatch,
    },
    Delete {
        kind: EntityKind,
        id: String,
    },
    /// Removes every row of one entity type.
    Clear(EntityKind),
}

impl WriteOp<'_> {
    pub fn update(kind: EntityKind, id: impl Into<String>, patch: RowPatch) -> Self {
        Self::Update { kind, id: id.into(), patch }
    }

    pub fn delete(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::Delete { kind, id: id.into() }
    }

    pub fn set_order(kind: EntityKind, id: impl Into<String>, order: i32) -> Self {
        Self::update(kind, id, RowPatch::new().set("sort_order", order))
    }
}

/// Every persisted row, as loaded at startup or produced by an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub categories: Vec<Category>,
    pub scripts: Vec<Script>,
    pub tags: Vec<Tag>,
    pub variables: Vec<Variable>,
}

impl Snapshot {
    /// Insert operations for every row, categories before the scripts that reference them.
    pub fn insert_ops(&self) -> Vec<WriteOp<'_>> {
        let mut ops = Vec::with_capacity(
            self.categories.len() + self.scripts.len() + self.tags.len() + self.variables.len(),
        );
        ops.extend(self.tags.iter().map(|t| WriteOp::Insert(t.into())));
        ops.extend(self.variables.iter().map(|v| WriteOp::Insert(v.into())));
        ops.extend(self.categories.iter().map(|c| WriteOp::Insert(c.into())));
        ops.extend(self.scripts.iter().map(|s| WriteOp::Insert(s.into())));
        ops
    }
}

/// The storage collaborator mirrored by the entity store.
///
/// Implementations must make [`apply`](Backend::apply) atomic: either every
/// operation in the slice takes effect or none does. Backends are `Send` so a
/// store can live behind a `Mutex` shared between threads.
pub trait Backend: Send {
    /// Reads every row of every entity type.
    fn select_all(&self) -> Result<Snapshot>;

    /// Applies `ops` in order inside a single transaction.
    fn apply(&mut self, ops: &[WriteOp<'_>]) -> Result<()>;

    fn insert(&mut self, row: RowRef<'_>) -> Result<()> {
        self.apply(&[WriteOp::Insert(row)])
    }

    fn update(&mut self, kind: EntityKind, id: &str, patch: RowPatch) -> Result<()> {
        self.apply(&[WriteOp::update(kind, id, patch)])
    }

    fn delete(&mut self, kind: EntityKind, id: &str) -> Result<()> {
        self.apply(&[WriteOp::delete(kind, id)])
    }

    fn delete_batch(&mut self, kind: EntityKind, ids: &[String]) -> Result<()> {
        let ops: Vec<WriteOp<'_>> = ids.iter().map(|id| WriteOp::delete(kind, id.as_str())).collect();
        self.apply(&ops)
    }

    fn update_order_batch(&mut self, kind: EntityKind, orders: &[(String, i32)]) -> Result<()> {
        let ops: Vec<WriteOp<'_>> = orders
            .iter()
            .map(|(id, order)| WriteOp::set_order(kind, id.as_str(), *order))
            .collect();
        self.apply(&ops)
    }

    /// Replaces the entire contents with `snapshot`.
    fn replace_all(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut ops = vec![
            WriteOp::Clear(EntityKind::Script),
            WriteOp::Clear(EntityKind::Category),
            WriteOp::Clear(EntityKind::Tag),
            WriteOp::Clear(EntityKind::Variable),
        ];
        ops.extend(snapshot.insert_ops());
        self.apply(&ops)
    }
}

/// SQLite-backed [`Backend`].
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Creates (or upgrades) a database at `path` with the ScriptHub schema.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Opens an existing database, rejecting files without the ScriptHub tables.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        let table_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type='table'
             AND name IN ('categories', 'scripts', 'tags', 'variables')",
            [],
            |row| row.get(0),
        )?;

        if table_count != 4 {
            return Err(ScriptHubError::Persistence(
                "Not a valid ScriptHub database".to_string(),
            ));
        }

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// A private in-memory database, mostly for tests and previews.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn insert_in_tx(tx: &Transaction, row: RowRef<'_>) -> Result<()> {
        match row {
            RowRef::Category(c) => {
                tx.execute(
                    "INSERT INTO categories (id, name, icon, custom_icon, description, sort_order, created_at, parent_id, is_subscription, source_url, last_synced_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        c.id,
                        c.name,
                        c.icon,
                        c.custom_icon,
                        c.description,
                        c.order,
                        c.created_at,
                        c.parent_id,
                        c.is_subscription,
                        c.source_url,
                        c.last_synced_at,
                    ],
                )?;
            }
            RowRef::Script(s) => {
                tx.execute(
                    "INSERT INTO scripts (id, title, description, platform, commands_json, tags_json, category_id, sort_order, created_at, updated_at, is_favorite)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        s.id,
                        s.title,
                        s.description,
                        s.platform.as_str(),
                        serde_json::to_string(&s.commands)?,
                        serde_json::to_string(&s.tags)?,
                        s.category_id,
                        s.order,
                        s.created_at,
                        s.updated_at,
                        s.is_favorite,
                    ],
                )?;
            }
            RowRef::Tag(t) => {
                tx.execute(
                    "INSERT INTO tags (id, name, color, created_at) VALUES (?, ?, ?, ?)",
                    params![t.id, t.name, t.color, t.created_at],
                )?;
            }
            RowRef::Variable(v) => {
                tx.execute(
                    "INSERT INTO variables (id, name, default_value, description) VALUES (?, ?, ?, ?)",
                    params![v.id, v.name, v.default_value, v.description],
                )?;
            }
        }
        Ok(())
    }

    fn update_in_tx(tx: &Transaction, kind: EntityKind, id: &str, patch: &RowPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let allowed = kind.columns();
        if let Some(bad) = patch.columns().find(|c| !allowed.contains(c)) {
            return Err(ScriptHubError::Persistence(format!(
                "Unknown column '{bad}' for {kind}"
            )));
        }

        let assignments: Vec<String> = patch
            .changes
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            kind.table(),
            assignments.join(", "),
            patch.changes.len() + 1
        );

        let mut values: Vec<&dyn ToSql> = patch.changes.iter().map(|(_, v)| v as &dyn ToSql).collect();
        values.push(&id);
        tx.execute(&sql, values.as_slice())?;

        // UPDATE on a missing row succeeds but touches nothing.
        if tx.changes() == 0 {
            return Err(ScriptHubError::not_found(kind, id));
        }
        Ok(())
    }
}

impl Backend for Storage {
    fn select_all(&self) -> Result<Snapshot> {
        let categories = {
            let mut stmt = self.conn.prepare(
                "SELECT id, name, icon, custom_icon, description, sort_order, created_at, parent_id, is_subscription, source_url, last_synced_at
                 FROM categories ORDER BY sort_order, id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        icon: row.get(2)?,
                        custom_icon: row.get(3)?,
                        description: row.get(4)?,
                        order: row.get(5)?,
                        created_at: row.get(6)?,
                        parent_id: row.get(7)?,
                        is_subscription: row.get::<_, i64>(8)? != 0,
                        source_url: row.get(9)?,
                        last_synced_at: row.get(10)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let scripts = {
            let mut stmt = self.conn.prepare(
                "SELECT id, title, description, platform, commands_json, tags_json, category_id, sort_order, created_at, updated_at, is_favorite
                 FROM scripts ORDER BY sort_order, id",
            )?;
            let rows = stmt
                .query_map([], map_script_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(script_from_row_tuple)
                .collect::<Result<Vec<_>>>()?
        };

        let tags = {
            let mut stmt = self
                .conn
                .prepare("SELECT id, name, color, created_at FROM tags ORDER BY created_at, id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Tag {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        color: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let variables = {
            let mut stmt = self
                .conn
                .prepare("SELECT id, name, default_value, description FROM variables ORDER BY name")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Variable {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        default_value: row.get(2)?,
                        description: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        Ok(Snapshot {
            categories,
            scripts,
            tags,
            variables,
        })
    }

    fn apply(&mut self, ops: &[WriteOp<'_>]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for op in ops {
            match op {
                WriteOp::Insert(row) => Self::insert_in_tx(&tx, *row)?,
                WriteOp::Update { kind, id, patch } => Self::update_in_tx(&tx, *kind, id, patch)?,
                WriteOp::Delete { kind, id } => {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
                        params![id],
                    )?;
                    if tx.changes() == 0 {
                        return Err(ScriptHubError::not_found(*kind, id.as_str()));
                    }
                }
                WriteOp::Clear(kind) => {
                    tx.execute(&format!("DELETE FROM {}", kind.table()), [])?;
                }
            }
        }
        // Dropping `tx` on any early return rolls everything back.
        tx.commit()?;
        Ok(())
    }
}

/// Raw 11-column tuple extracted from a `scripts` row.
type ScriptRow = (String, String, String, String, String, String, Option<String>, i32, i64, i64, i64);

fn map_script_row(row: &rusqlite::Row) -> rusqlite::Result<ScriptRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

/// Converts a raw tuple into a [`Script`], parsing the JSON columns.
fn script_from_row_tuple(
    (id, title, description, platform, commands_json, tags_json, category_id, order, created_at, updated_at, is_favorite): ScriptRow,
) -> Result<Script> {
    let commands: Vec<Command> = serde_json::from_str(&commands_json)?;
    Ok(Script {
        id,
        title,
        description,
        platform: platform.parse()?,
        commands,
        tags: serde_json::from_str(&tags_json)?,
        category_id,
        order,
        created_at,
        updated_at,
        is_favorite: is_favorite != 0,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::Platform;
    use tempfile::NamedTempFile;

    fn category(id: &str, parent: Option<&str>, order: i32) -> Category {
        Category {
            id: id.to_string(),
            name: id.to_uppercase(),
            icon: "folder".to_string(),
            custom_icon: None,
            description: None,
            order,
            created_at: 100,
            parent_id: parent.map(str::to_string),
            is_subscription: false,
            source_url: None,
            last_synced_at: None,
        }
    }

    fn script(id: &str, category_id: Option<&str>) -> Script {
        Script {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            platform: Platform::Linux,
            commands: vec![Command::new("echo hi")],
            tags: vec!["t1".to_string()],
            category_id: category_id.map(str::to_string),
            order: 0,
            created_at: 1,
            updated_at: 2,
            is_favorite: true,
        }
    }

    #[test]
    fn test_create_storage() {
        let temp = NamedTempFile::new().unwrap();
        let storage = Storage::create(temp.path()).unwrap();

        let tables: Vec<String> = storage
            .connection()
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        for table in ["categories", "scripts", "tags", "variables"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_open_existing_storage() {
        let temp = NamedTempFile::new().unwrap();
        {
            let mut storage = Storage::create(temp.path()).unwrap();
            storage.insert((&category("a", None, 0)).into()).unwrap();
        }
        let storage = Storage::open(temp.path()).unwrap();
        assert_eq!(storage.select_all().unwrap().categories.len(), 1);
    }

    #[test]
    fn test_open_invalid_database() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), "not a database").unwrap();
        assert!(Storage::open(temp.path()).is_err());
    }

    #[test]
    fn test_rows_round_trip() {
        let mut storage = Storage::in_memory().unwrap();
        let c = category("a", None, 0);
        let s = script("s1", Some("a"));
        storage.insert((&c).into()).unwrap();
        storage.insert((&s).into()).unwrap();

        let snapshot = storage.select_all().unwrap();
        assert_eq!(snapshot.categories, vec![c]);
        assert_eq!(snapshot.scripts, vec![s]);
    }

    #[test]
    fn test_update_patch_touches_only_listed_columns() {
        let mut storage = Storage::in_memory().unwrap();
        storage.insert((&category("a", None, 0)).into()).unwrap();
        storage
            .update(EntityKind::Category, "a", RowPatch::new().set("name", "Renamed"))
            .unwrap();
        let c = &storage.select_all().unwrap().categories[0];
        assert_eq!(c.name, "Renamed");
        assert_eq!(c.icon, "folder");
    }

    #[test]
    fn test_update_missing_row_is_not_found() {
        let mut storage = Storage::in_memory().unwrap();
        let err = storage
            .update(EntityKind::Category, "ghost", RowPatch::new().set("name", "x"))
            .unwrap_err();
        assert!(matches!(err, ScriptHubError::NotFound { kind: EntityKind::Category, .. }));
    }

    #[test]
    fn test_update_rejects_unknown_column() {
        let mut storage = Storage::in_memory().unwrap();
        storage.insert((&category("a", None, 0)).into()).unwrap();
        let patch = RowPatch::new().set("id; DROP TABLE categories", "x");
        assert!(storage.update(EntityKind::Category, "a", patch).is_err());
        assert_eq!(storage.select_all().unwrap().categories.len(), 1);
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let mut storage = Storage::in_memory().unwrap();
        storage.insert((&category("a", None, 0)).into()).unwrap();
        storage.insert((&category("b", None, 1)).into()).unwrap();

        let ops = [
            WriteOp::delete(EntityKind::Category, "a"),
            WriteOp::delete(EntityKind::Category, "missing"),
        ];
        assert!(storage.apply(&ops).is_err());
        assert_eq!(storage.select_all().unwrap().categories.len(), 2);
    }

    #[test]
    fn test_update_order_batch() {
        let mut storage = Storage::in_memory().unwrap();
        storage.insert((&category("a", None, 0)).into()).unwrap();
        storage.insert((&category("b", None, 1)).into()).unwrap();
        storage
            .update_order_batch(
                EntityKind::Category,
                &[("a".to_string(), 1), ("b".to_string(), 0)],
            )
            .unwrap();
        let ids: Vec<String> = storage
            .select_all()
            .unwrap()
            .categories
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_deleting_category_row_orphans_scripts() {
        let mut storage = Storage::in_memory().unwrap();
        storage.insert((&category("a", None, 0)).into()).unwrap();
        storage.insert((&script("s1", Some("a"))).into()).unwrap();
        storage.delete(EntityKind::Category, "a").unwrap();
        let snapshot = storage.select_all().unwrap();
        assert_eq!(snapshot.scripts[0].category_id, None);
    }

    #[test]
    fn test_unique_tag_names() {
        let mut storage = Storage::in_memory().unwrap();
        let tag = Tag {
            id: "t1".to_string(),
            name: "docker".to_string(),
            color: "#fff".to_string(),
            created_at: 0,
        };
        storage.insert((&tag).into()).unwrap();
        let dup = Tag { id: "t2".to_string(), ..tag };
        assert!(storage.insert((&dup).into()).is_err());
    }

    #[test]
    fn test_replace_all() {
        let mut storage = Storage::in_memory().unwrap();
        storage.insert((&category("old", None, 0)).into()).unwrap();
        let snapshot = Snapshot {
            categories: vec![category("new", None, 0)],
            scripts: vec![script("s1", Some("new"))],
            tags: vec![],
            variables: vec![],
        };
        storage.replace_all(&snapshot).unwrap();
        assert_eq!(storage.select_all().unwrap(), snapshot);
    }
}
