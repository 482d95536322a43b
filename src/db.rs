use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;

pub const DB_FILE: &str = "study.sqlite3";

const NOW_DEFAULT: &str = "(strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    for name in ["program", "year", "season", "paper"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {name}(
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT {NOW_DEFAULT}
                )"
            ),
            [],
        )?;
    }

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS subject(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                code TEXT,
                description TEXT,
                image TEXT,
                program_id INTEGER,
                sort INTEGER,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT {NOW_DEFAULT},
                FOREIGN KEY(program_id) REFERENCES program(id)
            )"
        ),
        [],
    )?;
    ensure_columns(
        conn,
        "subject",
        &[
            ("description", "TEXT"),
            ("sort", "INTEGER"),
            ("is_deleted", "INTEGER NOT NULL DEFAULT 0"),
        ],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS chapter(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                parent_id INTEGER,
                sort INTEGER,
                created_at TEXT NOT NULL DEFAULT {NOW_DEFAULT},
                FOREIGN KEY(subject_id) REFERENCES subject(id),
                FOREIGN KEY(parent_id) REFERENCES chapter(id)
            )"
        ),
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chapter_subject ON chapter(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chapter_parent ON chapter(parent_id)",
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS note(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER NOT NULL,
                chapter_id INTEGER,
                title TEXT NOT NULL,
                caption TEXT,
                created_at TEXT NOT NULL DEFAULT {NOW_DEFAULT},
                edited_at TEXT,
                FOREIGN KEY(subject_id) REFERENCES subject(id),
                FOREIGN KEY(chapter_id) REFERENCES chapter(id)
            )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS flashcard(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER NOT NULL,
                chapter_id INTEGER,
                front TEXT NOT NULL,
                back TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT {NOW_DEFAULT},
                FOREIGN KEY(subject_id) REFERENCES subject(id),
                FOREIGN KEY(chapter_id) REFERENCES chapter(id)
            )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS quiz(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER NOT NULL,
                chapter_id INTEGER,
                question TEXT NOT NULL,
                mcq1 TEXT,
                mcq2 TEXT,
                mcq3 TEXT,
                mcq4 TEXT,
                mcq_answer TEXT,
                mark_scheme TEXT,
                num TEXT,
                year TEXT,
                season_id INTEGER,
                paper TEXT,
                created_at TEXT NOT NULL DEFAULT {NOW_DEFAULT},
                FOREIGN KEY(subject_id) REFERENCES subject(id),
                FOREIGN KEY(chapter_id) REFERENCES chapter(id),
                FOREIGN KEY(season_id) REFERENCES season(id)
            )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS quiz_frq(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER NOT NULL,
                chapter_id INTEGER,
                parent_id INTEGER,
                question TEXT NOT NULL,
                mark_scheme TEXT,
                max_score REAL,
                num TEXT,
                year TEXT,
                season_id INTEGER,
                paper TEXT,
                created_at TEXT NOT NULL DEFAULT {NOW_DEFAULT},
                FOREIGN KEY(subject_id) REFERENCES subject(id),
                FOREIGN KEY(chapter_id) REFERENCES chapter(id),
                FOREIGN KEY(parent_id) REFERENCES quiz_frq(id),
                FOREIGN KEY(season_id) REFERENCES season(id)
            )"
        ),
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_frq_parent ON quiz_frq(parent_id)",
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS exam(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                max_score INTEGER,
                start_date TEXT,
                duration INTEGER,
                created_at TEXT NOT NULL DEFAULT {NOW_DEFAULT},
                FOREIGN KEY(subject_id) REFERENCES subject(id)
            )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS exam_questions(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                exam_id INTEGER NOT NULL,
                subject_id INTEGER,
                sort INTEGER,
                question TEXT NOT NULL,
                type TEXT,
                mcq1 TEXT,
                mcq2 TEXT,
                mcq3 TEXT,
                mcq4 TEXT,
                answer TEXT,
                created_at TEXT NOT NULL DEFAULT {NOW_DEFAULT},
                FOREIGN KEY(exam_id) REFERENCES exam(id)
            )"
        ),
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_questions_exam ON exam_questions(exam_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_exam_answer(
            id TEXT PRIMARY KEY,
            question_id INTEGER NOT NULL,
            student_id TEXT NOT NULL,
            answer TEXT,
            updated_at TEXT,
            UNIQUE(question_id, student_id),
            FOREIGN KEY(question_id) REFERENCES exam_questions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_students(
            id TEXT PRIMARY KEY,
            exam_id INTEGER NOT NULL,
            student_id TEXT NOT NULL,
            score INTEGER,
            percentage INTEGER,
            is_submit INTEGER NOT NULL DEFAULT 0,
            UNIQUE(exam_id, student_id),
            FOREIGN KEY(exam_id) REFERENCES exam(id)
        )",
        [],
    )?;
    // Deadlines used to live in the client; older workspaces lack the timing columns.
    ensure_columns(
        conn,
        "exam_students",
        &[
            ("started_at", "TEXT"),
            ("deadline_at", "TEXT"),
            ("submitted_at", "TEXT"),
        ],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS profiles(
                id TEXT PRIMARY KEY,
                email TEXT,
                full_name TEXT,
                created_at TEXT NOT NULL DEFAULT {NOW_DEFAULT}
            )"
        ),
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// Adds columns missing from workspaces created by older builds.
fn ensure_columns(conn: &Connection, table: &str, columns: &[(&str, &str)]) -> anyhow::Result<()> {
    for (column, decl) in columns {
        if !table_has_column(conn, table, column)? {
            conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Converts a row into a JSON object keyed by the statement's column names.
pub fn row_to_json(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<serde_json::Value> {
    let mut obj = serde_json::Map::with_capacity(columns.len());
    for (i, name) in columns.iter().enumerate() {
        let v = match row.get_ref(i)? {
            ValueRef::Null => serde_json::Value::Null,
            ValueRef::Integer(n) => serde_json::Value::from(n),
            ValueRef::Real(f) => serde_json::Value::from(f),
            ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(_) => serde_json::Value::Null,
        };
        obj.insert(name.clone(), v);
    }
    Ok(serde_json::Value::Object(obj))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent_and_adds_timing_columns() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        for column in ["started_at", "deadline_at", "submitted_at"] {
            assert!(table_has_column(&conn, "exam_students", column).expect("pragma"));
        }
    }

    #[test]
    fn older_subject_table_gains_listing_columns() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE subject(id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
            [],
        )
        .expect("legacy table");
        conn.execute("INSERT INTO subject(name) VALUES('Biology')", [])
            .expect("legacy row");
        init_schema(&conn).expect("init");
        for column in ["description", "sort", "is_deleted"] {
            assert!(table_has_column(&conn, "subject", column).expect("pragma"));
        }
        let hidden: i64 = conn
            .query_row("SELECT is_deleted FROM subject WHERE id = 1", [], |r| r.get(0))
            .expect("read");
        assert_eq!(hidden, 0);
    }

    #[test]
    fn settings_round_trip_overwrites() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        assert_eq!(settings_get_json(&conn, "k").expect("get"), None);
        settings_set_json(&conn, "k", &serde_json::json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "k", &serde_json::json!({ "a": 2 })).expect("set");
        assert_eq!(
            settings_get_json(&conn, "k").expect("get"),
            Some(serde_json::json!({ "a": 2 }))
        );
    }
}
