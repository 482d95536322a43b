use chrono::Utc;
use rusqlite::params;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::db;
use crate::exam::{self, ExamError};
use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{db_conn, require_session, required_i64, resolve_subject};
use crate::ipc::types::{AppState, Request};
use crate::viewer::sanitize_fields;

fn handle_list(state: &mut AppState, req: &Request) -> Value {
    let session = match require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjectId": null, "exams": [] }));
    };
    let subject_id = match resolve_subject(conn, req, Some(&session)) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT e.id, e.title, e.description, e.max_score, e.start_date, e.duration,
                s.score, s.percentage, COALESCE(s.is_submit, 0) AS is_submit
         FROM exam e
         LEFT JOIN exam_students s ON s.exam_id = e.id AND s.student_id = ?2
         WHERE e.subject_id = ?1
         ORDER BY e.start_date IS NULL, e.start_date DESC, e.id DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let exams = match stmt
        .query_map(params![subject_id, session.user_id], |row| {
            db::row_to_json(row, &columns)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "subjectId": subject_id, "exams": exams }))
}

fn handle_open(state: &mut AppState, req: &Request) -> Value {
    let session = match require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let exam_id = match required_i64(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = Utc::now();

    let exam_row = match exam::load_exam(conn, exam_id) {
        Ok(v) => v,
        Err(e) => return fail(&req.id, &e, "db_query_failed"),
    };
    let (attempt, window) = match exam::open_attempt(conn, &exam_row, &session.user_id, now) {
        Ok(v) => v,
        Err(e) => return fail(&req.id, &e, "db_update_failed"),
    };
    let timer = exam::timer_status(&window, now, attempt.submitted);

    let mut stmt = match conn.prepare(
        "SELECT id, sort, question, type, mcq1, mcq2, mcq3, mcq4, answer
         FROM exam_questions
         WHERE exam_id = ?
         ORDER BY sort, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut questions = match stmt
        .query_map([exam_id], |row| db::row_to_json(row, &columns))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    for q in &mut questions {
        sanitize_fields(q, &["question"]);
        if session.is_student() {
            if let Some(obj) = q.as_object_mut() {
                obj.remove("answer");
            }
        }
    }

    let answers = match exam::student_answers(conn, exam_id, &session.user_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let answers: Map<String, Value> = answers
        .into_iter()
        .map(|(qid, a)| (qid.to_string(), Value::String(a)))
        .collect();

    ok(
        &req.id,
        json!({
            "exam": exam_row,
            "questions": questions,
            "answers": answers,
            "timer": timer,
            "score": attempt.score,
            "percentage": attempt.percentage,
            "submittedAt": attempt.submitted_at,
        }),
    )
}

fn handle_timer(state: &mut AppState, req: &Request) -> Value {
    let session = match require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let exam_id = match required_i64(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = Utc::now();
    let exam_row = match exam::load_exam(conn, exam_id) {
        Ok(v) => v,
        Err(e) => return fail(&req.id, &e, "db_query_failed"),
    };
    match exam::open_attempt(conn, &exam_row, &session.user_id, now) {
        Ok((attempt, window)) => ok(
            &req.id,
            json!(exam::timer_status(&window, now, attempt.submitted)),
        ),
        Err(e) => fail(&req.id, &e, "db_update_failed"),
    }
}

fn handle_answer(state: &mut AppState, req: &Request) -> Value {
    let session = match require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let exam_id = match required_i64(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let question_id = match required_i64(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let answer = match req.params.get("answer") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let now = Utc::now();

    let result = (|| -> Result<exam::TimerStatus, ExamError> {
        let exam_row = exam::load_exam(conn, exam_id)?;
        let (attempt, window) = exam::open_attempt(conn, &exam_row, &session.user_id, now)?;
        let status = exam::timer_status(&window, now, attempt.submitted);
        exam::ensure_writable(&status)?;
        exam::ensure_question(conn, exam_id, question_id)?;
        Ok(status)
    })();
    let status = match result {
        Ok(s) => s,
        Err(e) => return fail(&req.id, &e, "db_query_failed"),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = exam::upsert_answer(&tx, question_id, &session.user_id, &answer, now) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "saved": true, "questionId": question_id, "timer": status }),
    )
}

fn handle_submit(state: &mut AppState, req: &Request) -> Value {
    let session = match require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let exam_id = match required_i64(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = Utc::now();

    let result = (|| -> Result<(exam::ExamRow, exam::Attempt), ExamError> {
        let exam_row = exam::load_exam(conn, exam_id)?;
        let (attempt, window) = exam::open_attempt(conn, &exam_row, &session.user_id, now)?;
        exam::ensure_writable(&exam::timer_status(&window, now, attempt.submitted))?;
        Ok((exam_row, attempt))
    })();
    let (exam_row, attempt) = match result {
        Ok(v) => v,
        Err(e) => {
            warn!(exam = exam_id, student = %session.user_id, error = %e, "submission refused");
            return fail(&req.id, &e, "db_query_failed");
        }
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let keys = match exam::answer_keys(&tx, exam_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let answers = match exam::student_answers(&tx, exam_id, &session.user_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let grade = exam::grade(&keys, &answers, exam_row.max_score);
    match exam::record_submission(&tx, &attempt.id, grade, now) {
        Ok(true) => {}
        Ok(false) => return fail(&req.id, &ExamError::AlreadySubmitted, "db_update_failed"),
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    info!(
        exam = exam_id,
        student = %session.user_id,
        score = grade.score,
        "exam submitted"
    );
    ok(
        &req.id,
        json!({
            "score": grade.score,
            "percentage": grade.percentage,
            "maxScore": exam_row.max_score,
            "submitted": true,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "exams.list" => Some(handle_list(state, req)),
        "exams.open" => Some(handle_open(state, req)),
        "exams.timer" => Some(handle_timer(state, req)),
        "exams.answer" => Some(handle_answer(state, req)),
        "exams.submit" => Some(handle_submit(state, req)),
        _ => None,
    }
}
