use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::db;
use crate::exam::answers_match;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, optional_i64, optional_str, page_params, require_session, required_i64,
    required_str, resolve_subject,
};
use crate::ipc::types::{AppState, Request};
use crate::viewer::{sanitize_fields, Cursor};

const QUIZ_RICH: &[&str] = &["question", "mark_scheme"];

fn query_rows(conn: &Connection, sql: &str, params: Vec<SqlValue>) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt
        .query_map(params_from_iter(params), |row| db::row_to_json(row, &columns))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn opt_int(v: Option<i64>) -> SqlValue {
    v.map(SqlValue::Integer).unwrap_or(SqlValue::Null)
}

fn opt_text(v: Option<String>) -> SqlValue {
    v.map(SqlValue::Text).unwrap_or(SqlValue::Null)
}

/// Loads a chapter-filtered item list and positions the cursor within it.
fn viewer(
    state: &AppState,
    req: &Request,
    sql: &str,
    rich: &[&str],
) -> Result<Value, Value> {
    let session = require_session(state, req)?;
    let conn = db_conn(state, req)?;
    let subject_id = resolve_subject(conn, req, Some(&session))?;
    let chapter_id = optional_i64(req, "chapterId")?;
    let index = optional_i64(req, "index")?.unwrap_or(0);

    let mut items = query_rows(
        conn,
        sql,
        vec![SqlValue::Integer(subject_id), opt_int(chapter_id)],
    )
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    for item in &mut items {
        sanitize_fields(item, rich);
    }

    let cursor = Cursor::new(index, items.len());
    let current = items.get(cursor.index).cloned();
    Ok(json!({
        "subjectId": subject_id,
        "chapterId": chapter_id,
        "items": items,
        "current": current,
        "cursor": cursor,
    }))
}

fn respond(req: &Request, result: Result<Value, Value>) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e,
    }
}

fn handle_notes(state: &mut AppState, req: &Request) -> Value {
    let result = viewer(
        state,
        req,
        "SELECT id, title, caption, chapter_id, subject_id, edited_at, created_at
         FROM note
         WHERE subject_id = ?1 AND (?2 IS NULL OR chapter_id = ?2)
         ORDER BY chapter_id ASC, edited_at DESC, id ASC",
        &["caption"],
    );
    respond(req, result)
}

fn handle_flashcards(state: &mut AppState, req: &Request) -> Value {
    let result = viewer(
        state,
        req,
        "SELECT id, front, back, chapter_id, subject_id, created_at
         FROM flashcard
         WHERE subject_id = ?1 AND (?2 IS NULL OR chapter_id = ?2)
         ORDER BY chapter_id ASC, created_at ASC, id ASC",
        &["front", "back"],
    );
    respond(req, result)
}

fn handle_quizzes(state: &mut AppState, req: &Request) -> Value {
    let result = viewer(
        state,
        req,
        "SELECT id, question, mcq1, mcq2, mcq3, mcq4, mcq_answer, mark_scheme, num,
                chapter_id, subject_id
         FROM quiz
         WHERE subject_id = ?1 AND (?2 IS NULL OR chapter_id = ?2)
         ORDER BY chapter_id ASC, num ASC, id ASC",
        QUIZ_RICH,
    );
    respond(req, result)
}

fn handle_quiz_check(state: &mut AppState, req: &Request) -> Value {
    if let Err(e) = require_session(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let quiz_id = match required_i64(req, "quizId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let choice = match required_str(req, "choice") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let row: Option<(Option<String>, Option<String>)> = match conn
        .query_row(
            "SELECT mcq_answer, mark_scheme FROM quiz WHERE id = ?",
            [quiz_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((answer, mark_scheme)) = row else {
        return err(&req.id, "not_found", format!("quiz {quiz_id} not found"), None);
    };
    let correct = answer
        .as_deref()
        .map(|a| answers_match(&choice, a))
        .unwrap_or(false);
    ok(
        &req.id,
        json!({
            "correct": correct,
            "answer": answer.map(|a| a.trim().to_uppercase()),
            "markScheme": mark_scheme.map(|m| crate::viewer::sanitize_html(&m)),
        }),
    )
}

fn lookup(conn: &Connection, table: &str) -> rusqlite::Result<Vec<Value>> {
    query_rows(
        conn,
        &format!("SELECT id, name FROM {table} ORDER BY name ASC"),
        Vec::new(),
    )
}

fn past_papers(state: &AppState, req: &Request) -> Result<Value, Value> {
    let session = require_session(state, req)?;
    let conn = db_conn(state, req)?;
    let subject_id = resolve_subject(conn, req, Some(&session))?;
    let year = optional_str(req, "year");
    let season_id = optional_i64(req, "seasonId")?;
    let paper = optional_str(req, "paper");
    let index = optional_i64(req, "index")?.unwrap_or(0);
    let db_err = |e: rusqlite::Error| err(&req.id, "db_query_failed", e.to_string(), None);

    let mut items = query_rows(
        conn,
        "SELECT q.id, q.question, q.mcq1, q.mcq2, q.mcq3, q.mcq4, q.mcq_answer, q.mark_scheme,
                q.num, q.year, q.season_id, s.name AS season_name, q.paper, q.chapter_id,
                q.subject_id
         FROM quiz q
         LEFT JOIN season s ON s.id = q.season_id
         WHERE q.subject_id = ?1
           AND (?2 IS NULL OR q.year = ?2)
           AND (?3 IS NULL OR q.season_id = ?3)
           AND (?4 IS NULL OR q.paper = ?4)
         ORDER BY q.year IS NULL, q.year DESC, q.season_id ASC, q.paper ASC, q.num ASC, q.id ASC",
        vec![
            SqlValue::Integer(subject_id),
            opt_text(year.clone()),
            opt_int(season_id),
            opt_text(paper.clone()),
        ],
    )
    .map_err(db_err)?;
    for item in &mut items {
        sanitize_fields(item, QUIZ_RICH);
    }

    let options = json!({
        "years": lookup(conn, "year").map_err(db_err)?,
        "seasons": lookup(conn, "season").map_err(db_err)?,
        "papers": lookup(conn, "paper").map_err(db_err)?,
    });
    let cursor = Cursor::new(index, items.len());
    let current = items.get(cursor.index).cloned();
    Ok(json!({
        "subjectId": subject_id,
        "filters": { "year": year, "seasonId": season_id, "paper": paper },
        "options": options,
        "items": items,
        "current": current,
        "cursor": cursor,
    }))
}

fn handle_past_papers(state: &mut AppState, req: &Request) -> Value {
    let result = past_papers(state, req);
    respond(req, result)
}

fn frq(state: &AppState, req: &Request) -> Result<Value, Value> {
    let session = require_session(state, req)?;
    let conn = db_conn(state, req)?;
    let subject_id = resolve_subject(conn, req, Some(&session))?;
    let chapter_id = optional_i64(req, "chapterId")?;
    let year = optional_str(req, "year");
    let season_id = optional_i64(req, "seasonId")?;
    let paper = optional_str(req, "paper");
    let (page, page_size) = page_params(req)?;
    let page_size = i64::from(page_size);
    let direction = match optional_str(req, "sortOrder").as_deref() {
        None | Some("asc") => "ASC",
        Some("desc") => "DESC",
        Some(other) => {
            return Err(err(
                &req.id,
                "bad_params",
                format!("sortOrder must be asc or desc, got {other}"),
                None,
            ))
        }
    };
    let db_err = |e: rusqlite::Error| err(&req.id, "db_query_failed", e.to_string(), None);

    let where_sql = "WHERE f.subject_id = ?1 AND f.parent_id IS NULL
           AND (?2 IS NULL OR f.chapter_id = ?2)
           AND (?3 IS NULL OR f.year = ?3)
           AND (?4 IS NULL OR f.season_id = ?4)
           AND (?5 IS NULL OR f.paper = ?5)";
    let params = vec![
        SqlValue::Integer(subject_id),
        opt_int(chapter_id),
        opt_text(year),
        opt_int(season_id),
        opt_text(paper),
    ];

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM quiz_frq f {where_sql}"),
            params_from_iter(params.clone()),
            |r| r.get(0),
        )
        .map_err(db_err)?;

    let mut paged = params;
    paged.push(SqlValue::Integer(page_size));
    paged.push(SqlValue::Integer(i64::from(page - 1) * page_size));
    let mut parents = query_rows(
        conn,
        &format!(
            "SELECT f.id, f.question, f.mark_scheme, f.max_score, f.num, f.year, f.season_id,
                    s.name AS season_name, f.paper, f.chapter_id, f.subject_id
             FROM quiz_frq f
             LEFT JOIN season s ON s.id = f.season_id
             {where_sql}
             ORDER BY f.id {direction}
             LIMIT ?6 OFFSET ?7"
        ),
        paged,
    )
    .map_err(db_err)?;

    let mut children_stmt = conn
        .prepare(
            "SELECT id, parent_id, question, mark_scheme, max_score
             FROM quiz_frq
             WHERE parent_id = ?
             ORDER BY id ASC",
        )
        .map_err(db_err)?;
    let child_columns: Vec<String> = children_stmt
        .column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    for parent in &mut parents {
        sanitize_fields(parent, QUIZ_RICH);
        let Some(pid) = parent.get("id").and_then(|v| v.as_i64()) else {
            continue;
        };
        let mut parts = children_stmt
            .query_map([pid], |row| db::row_to_json(row, &child_columns))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        for part in &mut parts {
            sanitize_fields(part, QUIZ_RICH);
        }
        parent["parts"] = Value::Array(parts);
    }

    Ok(json!({
        "subjectId": subject_id,
        "rows": parents,
        "totalCount": total,
        "page": page,
        "pageSize": page_size,
        "totalPages": ((total + page_size - 1) / page_size).max(1),
    }))
}

fn handle_frq(state: &mut AppState, req: &Request) -> Value {
    let result = frq(state, req);
    respond(req, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "study.notes" => Some(handle_notes(state, req)),
        "study.flashcards" => Some(handle_flashcards(state, req)),
        "study.quizzes" => Some(handle_quizzes(state, req)),
        "study.quizCheck" => Some(handle_quiz_check(state, req)),
        "study.pastPapers" => Some(handle_past_papers(state, req)),
        "study.frq" => Some(handle_frq(state, req)),
        _ => None,
    }
}
