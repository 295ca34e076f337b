use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    params, types::Type, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};

use crate::model::{Category, Tag, Todo, TodoDraft};

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("sqlite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("could not prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not determine home directory")]
    NoHomeDirectory,
    #[error("table `todos` already exists with a different layout; point --database at another file")]
    IncompatibleSchema,
    #[error("database worker failed: {0}")]
    Worker(String),
}

impl DatabaseError {
    /// True when a UNIQUE constraint rejected the write.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DatabaseError::RusqliteError(rusqlite::Error::SqliteFailure(error, _)) => {
                error.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            }
            _ => false,
        }
    }
}

pub type SqlResult<T> = std::result::Result<T, DatabaseError>;

/// Shared handle to the single connection used by the web process.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> SqlResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn with_conn<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        // A panicking caller's transaction was rolled back when it unwound.
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn)
    }

    /// Runs `f` on tokio's blocking pool.
    pub async fn call<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DatabaseError> + Send + 'static,
    {
        let db = self.clone();
        match tokio::task::spawn_blocking(move || db.with_conn(f)).await {
            Ok(result) => result,
            Err(join_error) => Err(DatabaseError::Worker(join_error.to_string()).into()),
        }
    }
}

pub fn open_db(path: &Path) -> SqlResult<Connection> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.is_dir() {
            fs::create_dir_all(dir)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    init_db(&conn)?;
    Ok(conn)
}

fn init_db(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            color TEXT NOT NULL DEFAULT '#007bff',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            slug TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS todos (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            title_key TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            due_date TEXT,
            is_resolved BOOLEAN NOT NULL DEFAULT 0,
            category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS todo_tags (
            todo_id INTEGER NOT NULL REFERENCES todos(id) ON DELETE CASCADE,
            tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (todo_id, tag_id)
        );",
    )?;

    let title_key_columns: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info('todos') WHERE name = 'title_key'",
        params![],
        |row| row.get(0),
    )?;
    if title_key_columns == 0 {
        return Err(DatabaseError::IncompatibleSchema);
    }

    Ok(())
}

/// Starts a write transaction that takes the write lock up front, so a
/// duplicate check and the write that follows it see the same data.
pub fn write_transaction(conn: &mut Connection) -> SqlResult<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// Case-folded form of a title, backing the unique index on `title_key`.
pub fn title_key(title: &str) -> String {
    title.to_lowercase()
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_timestamp(idx, &row.get::<_, String>(idx)?)
}

fn get_optional_timestamp(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|value| parse_timestamp(idx, &value))
        .transpose()
}

const TODO_COLUMNS: &str = "SELECT t.id, t.title, t.description, t.due_date, t.is_resolved,
        t.created_at, t.updated_at, c.id, c.name, c.color, c.created_at
    FROM todos t
    LEFT JOIN categories c ON c.id = t.category_id";

fn todo_from_row(row: &Row) -> rusqlite::Result<Todo> {
    let category = match row.get::<_, Option<i64>>(7)? {
        Some(id) => Some(Category {
            id,
            name: row.get(8)?,
            color: row.get(9)?,
            created_at: get_timestamp(row, 10)?,
        }),
        None => None,
    };

    Ok(Todo {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        due_date: get_optional_timestamp(row, 3)?,
        is_resolved: row.get(4)?,
        category,
        tags: vec![],
        created_at: get_timestamp(row, 5)?,
        updated_at: get_timestamp(row, 6)?,
    })
}

fn category_from_row(row: &Row) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        created_at: get_timestamp(row, 3)?,
    })
}

fn tag_from_row(row: &Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
    })
}

fn insert_todo_tags(conn: &Connection, todo_id: i64, tag_ids: &[i64]) -> SqlResult<()> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO todo_tags (todo_id, tag_id) VALUES (?1, ?2)")?;
    for tag_id in tag_ids {
        stmt.execute(params![todo_id, tag_id])?;
    }
    Ok(())
}

pub fn add_todo(conn: &Connection, draft: &TodoDraft, now: DateTime<Utc>) -> SqlResult<i64> {
    let timestamp = format_timestamp(now);
    conn.execute(
        "INSERT INTO todos (title, title_key, description, due_date, is_resolved, category_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            draft.title,
            title_key(&draft.title),
            draft.description,
            draft.due_date.map(format_timestamp),
            draft.is_resolved,
            draft.category_id,
            timestamp,
        ],
    )?;
    let todo_id = conn.last_insert_rowid();
    insert_todo_tags(conn, todo_id, &draft.tag_ids)?;

    Ok(todo_id)
}

/// Replaces every editable field of the todo. Returns false if it does not exist.
pub fn update_todo(
    conn: &Connection,
    todo_id: i64,
    draft: &TodoDraft,
    now: DateTime<Utc>,
) -> SqlResult<bool> {
    let changed = conn.execute(
        "UPDATE todos SET
            title = ?2,
            title_key = ?3,
            description = ?4,
            due_date = ?5,
            is_resolved = ?6,
            category_id = ?7,
            updated_at = ?8
        WHERE id = ?1",
        params![
            todo_id,
            draft.title,
            title_key(&draft.title),
            draft.description,
            draft.due_date.map(format_timestamp),
            draft.is_resolved,
            draft.category_id,
            format_timestamp(now),
        ],
    )?;
    if changed == 0 {
        return Ok(false);
    }

    conn.execute("DELETE FROM todo_tags WHERE todo_id = ?1", params![todo_id])?;
    insert_todo_tags(conn, todo_id, &draft.tag_ids)?;

    Ok(true)
}

/// Flips `is_resolved`. Returns false if the todo does not exist.
pub fn toggle_todo_completion(conn: &Connection, todo_id: i64, now: DateTime<Utc>) -> SqlResult<bool> {
    let changed = conn.execute(
        "UPDATE todos SET
            is_resolved = NOT is_resolved,
            updated_at = ?2
        WHERE id = ?1",
        params![todo_id, format_timestamp(now)],
    )?;

    Ok(changed > 0)
}

pub fn delete_todo(conn: &Connection, todo_id: i64) -> SqlResult<bool> {
    let changed = conn.execute("DELETE FROM todos WHERE id = ?1", params![todo_id])?;
    Ok(changed > 0)
}

fn fetch_tags_by_todo(conn: &Connection) -> SqlResult<HashMap<i64, Vec<Tag>>> {
    let mut stmt = conn.prepare(
        "SELECT tt.todo_id, g.id, g.name, g.slug
        FROM todo_tags tt
        JOIN tags g ON g.id = tt.tag_id
        ORDER BY g.name",
    )?;
    let rows = stmt.query_map(params![], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            Tag {
                id: row.get(1)?,
                name: row.get(2)?,
                slug: row.get(3)?,
            },
        ))
    })?;

    let mut tags: HashMap<i64, Vec<Tag>> = HashMap::new();
    for row in rows {
        let (todo_id, tag) = row?;
        tags.entry(todo_id).or_default().push(tag);
    }
    Ok(tags)
}

/// Every todo with its category and tags, in id order.
pub fn fetch_todos(conn: &Connection) -> SqlResult<Vec<Todo>> {
    let mut stmt = conn.prepare(&format!("{TODO_COLUMNS} ORDER BY t.id"))?;
    let rows = stmt.query_map(params![], todo_from_row)?;
    let mut todos = rows.collect::<rusqlite::Result<Vec<Todo>>>()?;

    let mut tags = fetch_tags_by_todo(conn)?;
    for todo in &mut todos {
        todo.tags = tags.remove(&todo.id).unwrap_or_default();
    }

    Ok(todos)
}

pub fn fetch_todo(conn: &Connection, todo_id: i64) -> SqlResult<Option<Todo>> {
    let todo = conn
        .query_row(
            &format!("{TODO_COLUMNS} WHERE t.id = ?1"),
            params![todo_id],
            todo_from_row,
        )
        .optional()?;

    let Some(mut todo) = todo else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT g.id, g.name, g.slug
        FROM todo_tags tt
        JOIN tags g ON g.id = tt.tag_id
        WHERE tt.todo_id = ?1
        ORDER BY g.name",
    )?;
    let rows = stmt.query_map(params![todo_id], tag_from_row)?;
    todo.tags = rows.collect::<rusqlite::Result<Vec<Tag>>>()?;

    Ok(Some(todo))
}

/// Whether a todo other than `exclude` already uses this title, ignoring case.
pub fn title_taken(conn: &Connection, title: &str, exclude: Option<i64>) -> SqlResult<bool> {
    let taken = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM todos WHERE title_key = ?1 AND (?2 IS NULL OR id != ?2))",
        params![title_key(title), exclude],
        |row| row.get(0),
    )?;
    Ok(taken)
}

pub fn add_category(conn: &Connection, name: &str, color: &str, now: DateTime<Utc>) -> SqlResult<i64> {
    conn.execute(
        "INSERT INTO categories (name, color, created_at) VALUES (?1, ?2, ?3)",
        params![name, color, format_timestamp(now)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Deletes the category; todos that used it keep existing without one.
pub fn delete_category(conn: &Connection, category_id: i64) -> SqlResult<bool> {
    conn.execute(
        "UPDATE todos SET category_id = NULL WHERE category_id = ?1",
        params![category_id],
    )?;
    let changed = conn.execute("DELETE FROM categories WHERE id = ?1", params![category_id])?;
    Ok(changed > 0)
}

pub fn fetch_categories(conn: &Connection) -> SqlResult<Vec<Category>> {
    let mut stmt = conn.prepare("SELECT id, name, color, created_at FROM categories ORDER BY name")?;
    let rows = stmt.query_map(params![], category_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<Category>>>()?)
}

pub fn find_category_by_name(conn: &Connection, name: &str) -> SqlResult<Option<Category>> {
    Ok(conn
        .query_row(
            "SELECT id, name, color, created_at FROM categories WHERE name = ?1",
            params![name],
            category_from_row,
        )
        .optional()?)
}

pub fn category_exists(conn: &Connection, category_id: i64) -> SqlResult<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM categories WHERE id = ?1)",
        params![category_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn add_tag(conn: &Connection, name: &str, slug: &str) -> SqlResult<i64> {
    conn.execute(
        "INSERT INTO tags (name, slug) VALUES (?1, ?2)",
        params![name, slug],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Deletes the tag and its memberships; the tagged todos are untouched.
pub fn delete_tag(conn: &Connection, tag_id: i64) -> SqlResult<bool> {
    conn.execute("DELETE FROM todo_tags WHERE tag_id = ?1", params![tag_id])?;
    let changed = conn.execute("DELETE FROM tags WHERE id = ?1", params![tag_id])?;
    Ok(changed > 0)
}

pub fn fetch_tags(conn: &Connection) -> SqlResult<Vec<Tag>> {
    let mut stmt = conn.prepare("SELECT id, name, slug FROM tags ORDER BY name")?;
    let rows = stmt.query_map(params![], tag_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<Tag>>>()?)
}

pub fn find_tag_by_name(conn: &Connection, name: &str) -> SqlResult<Option<Tag>> {
    Ok(conn
        .query_row(
            "SELECT id, name, slug FROM tags WHERE name = ?1",
            params![name],
            tag_from_row,
        )
        .optional()?)
}

pub fn tag_exists(conn: &Connection, tag_id: i64) -> SqlResult<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tags WHERE id = ?1)",
        params![tag_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}
