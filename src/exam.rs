use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Longest duration accepted for an exam, one week.
pub const MAX_DURATION_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Error)]
pub enum ExamError {
    #[error("exam not found")]
    NotFound,
    #[error("question does not belong to this exam")]
    UnknownQuestion,
    #[error("exam is locked")]
    Locked,
    #[error("Exam already submitted.")]
    AlreadySubmitted,
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

/// Accepts RFC 3339, or naive `YYYY-MM-DD HH:MM[:SS]` / `YYYY-MM-DDTHH:MM[:SS]` read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    NAIVE
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|n| n.and_utc())
}

pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExamWindow {
    pub starts_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// The student's effective window.
///
/// The start is the exam's scheduled start, or the student's first open when the exam is
/// unscheduled. The deadline never moves backwards: a previously persisted later deadline
/// wins over `start + duration`. Durations are clamped to `MAX_DURATION_MINUTES`, and a
/// deadline past chrono's range saturates at `DateTime::<Utc>::MAX_UTC`.
pub fn resolve_window(
    scheduled_start: Option<DateTime<Utc>>,
    first_opened: DateTime<Utc>,
    duration_minutes: Option<i64>,
    persisted_deadline: Option<DateTime<Utc>>,
) -> ExamWindow {
    let starts_at = scheduled_start.unwrap_or(first_opened);
    let minutes = duration_minutes.unwrap_or(0).clamp(0, MAX_DURATION_MINUTES);
    let computed = Duration::try_minutes(minutes)
        .and_then(|d| starts_at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let deadline = match persisted_deadline {
        Some(p) if p > computed => p,
        _ => computed,
    };
    ExamWindow {
        starts_at,
        deadline,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStatus {
    pub remaining_ms: i64,
    pub display: String,
    pub locked: bool,
    pub not_started: bool,
    pub submitted: bool,
    pub starts_at: String,
    pub deadline: String,
}

pub fn timer_status(window: &ExamWindow, now: DateTime<Utc>, submitted: bool) -> TimerStatus {
    let remaining_ms = (window.deadline - now).num_milliseconds().max(0);
    let not_started = now < window.starts_at;
    TimerStatus {
        remaining_ms,
        display: format_countdown(remaining_ms),
        locked: submitted || not_started || remaining_ms == 0,
        not_started,
        submitted,
        starts_at: format_timestamp(window.starts_at),
        deadline: format_timestamp(window.deadline),
    }
}

/// `MM:SS`; minutes are not wrapped into hours.
pub fn format_countdown(remaining_ms: i64) -> String {
    let total_seconds = remaining_ms.max(0) / 1000;
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// Trimmed, case-insensitive exact match. Blank answers never match.
pub fn answers_match(given: &str, expected: &str) -> bool {
    let g = given.trim().to_lowercase();
    let e = expected.trim().to_lowercase();
    !g.is_empty() && !e.is_empty() && g == e
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub score: i64,
    pub percentage: Option<i64>,
}

pub fn grade(
    answer_keys: &[(i64, Option<String>)],
    answers: &HashMap<i64, String>,
    max_score: Option<i64>,
) -> Grade {
    let score = answer_keys
        .iter()
        .filter(|(qid, key)| match (answers.get(qid), key) {
            (Some(given), Some(expected)) => answers_match(given, expected),
            _ => false,
        })
        .count() as i64;
    let percentage = match max_score {
        Some(max) if max > 0 => Some(((score as f64 / max as f64) * 100.0).round() as i64),
        _ => None,
    };
    Grade { score, percentage }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRow {
    pub id: i64,
    pub subject_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub max_score: Option<i64>,
    pub start_date: Option<String>,
    pub duration: Option<i64>,
}

pub fn load_exam(conn: &Connection, exam_id: i64) -> Result<ExamRow, ExamError> {
    conn.query_row(
        "SELECT id, subject_id, title, description, max_score, start_date, duration
         FROM exam WHERE id = ?",
        [exam_id],
        |r| {
            Ok(ExamRow {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                title: r.get(2)?,
                description: r.get(3)?,
                max_score: r.get(4)?,
                start_date: r.get(5)?,
                duration: r.get(6)?,
            })
        },
    )
    .optional()?
    .ok_or(ExamError::NotFound)
}

/// One student's sitting of an exam (`exam_students`).
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub id: String,
    pub started_at: Option<String>,
    pub deadline_at: Option<String>,
    pub submitted: bool,
    pub score: Option<i64>,
    pub percentage: Option<i64>,
    pub submitted_at: Option<String>,
}

pub fn load_attempt(
    conn: &Connection,
    exam_id: i64,
    student_id: &str,
) -> rusqlite::Result<Option<Attempt>> {
    conn.query_row(
        "SELECT id, started_at, deadline_at, is_submit, score, percentage, submitted_at
         FROM exam_students
         WHERE exam_id = ? AND student_id = ?",
        params![exam_id, student_id],
        |r| {
            Ok(Attempt {
                id: r.get(0)?,
                started_at: r.get(1)?,
                deadline_at: r.get(2)?,
                submitted: r.get::<_, Option<i64>>(3)?.unwrap_or(0) != 0,
                score: r.get(4)?,
                percentage: r.get(5)?,
                submitted_at: r.get(6)?,
            })
        },
    )
    .optional()
}

/// Starts (or resumes) a sitting and persists its deadline.
///
/// The first open stamps `started_at`. The stored `deadline_at` only ever moves later.
pub fn open_attempt(
    conn: &Connection,
    exam: &ExamRow,
    student_id: &str,
    now: DateTime<Utc>,
) -> Result<(Attempt, ExamWindow), ExamError> {
    let attempt = match load_attempt(conn, exam.id, student_id)? {
        Some(a) => a,
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO exam_students(id, exam_id, student_id, is_submit, started_at)
                 VALUES(?, ?, ?, 0, ?)
                 ON CONFLICT(exam_id, student_id) DO NOTHING",
                params![id, exam.id, student_id, format_timestamp(now)],
            )?;
            info!(exam = exam.id, student = student_id, "exam sitting started");
            load_attempt(conn, exam.id, student_id)?.ok_or(ExamError::NotFound)?
        }
    };

    let first_opened = attempt
        .started_at
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(now);
    let window = resolve_window(
        exam.start_date.as_deref().and_then(parse_timestamp),
        first_opened,
        exam.duration,
        attempt.deadline_at.as_deref().and_then(parse_timestamp),
    );

    let deadline = format_timestamp(window.deadline);
    let mut attempt = attempt;
    if attempt.started_at.is_none() || attempt.deadline_at.as_deref() != Some(deadline.as_str()) {
        let started = attempt
            .started_at
            .clone()
            .unwrap_or_else(|| format_timestamp(first_opened));
        conn.execute(
            "UPDATE exam_students SET started_at = ?, deadline_at = ? WHERE id = ?",
            params![started, deadline, attempt.id],
        )?;
        attempt.started_at = Some(started);
        attempt.deadline_at = Some(deadline);
    }
    Ok((attempt, window))
}

/// Answers are only accepted while the clock is running on an unsubmitted sitting.
pub fn ensure_writable(status: &TimerStatus) -> Result<(), ExamError> {
    if status.submitted {
        return Err(ExamError::AlreadySubmitted);
    }
    if status.locked {
        return Err(ExamError::Locked);
    }
    Ok(())
}

pub fn ensure_question(conn: &Connection, exam_id: i64, question_id: i64) -> Result<(), ExamError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM exam_questions WHERE id = ? AND exam_id = ?",
            params![question_id, exam_id],
            |r| r.get(0),
        )
        .optional()?;
    found.map(|_| ()).ok_or(ExamError::UnknownQuestion)
}

pub fn upsert_answer(
    conn: &Connection,
    question_id: i64,
    student_id: &str,
    answer: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO student_exam_answer(id, question_id, student_id, answer, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(question_id, student_id)
         DO UPDATE SET answer = excluded.answer, updated_at = excluded.updated_at",
        params![
            Uuid::new_v4().to_string(),
            question_id,
            student_id,
            answer,
            format_timestamp(now)
        ],
    )?;
    Ok(())
}

pub fn answer_keys(conn: &Connection, exam_id: i64) -> rusqlite::Result<Vec<(i64, Option<String>)>> {
    let mut stmt = conn.prepare(
        "SELECT id, answer FROM exam_questions WHERE exam_id = ? ORDER BY sort, id",
    )?;
    let rows = stmt
        .query_map([exam_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn student_answers(
    conn: &Connection,
    exam_id: i64,
    student_id: &str,
) -> rusqlite::Result<HashMap<i64, String>> {
    let mut stmt = conn.prepare(
        "SELECT a.question_id, a.answer
         FROM student_exam_answer a
         JOIN exam_questions q ON q.id = a.question_id
         WHERE q.exam_id = ? AND a.student_id = ?",
    )?;
    let rows = stmt
        .query_map(params![exam_id, student_id], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, Option<String>>(1)?))
        })?
        .filter_map(|r| match r {
            Ok((q, Some(a))) => Some(Ok((q, a))),
            Ok((_, None)) => None,
            Err(e) => Some(Err(e)),
        })
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

/// Marks the sitting submitted. Returns `false` when it already was.
pub fn record_submission(
    conn: &Connection,
    attempt_id: &str,
    grade: Grade,
    now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE exam_students
         SET score = ?, percentage = ?, is_submit = 1, submitted_at = ?
         WHERE id = ? AND is_submit = 0",
        params![grade.score, grade.percentage, format_timestamp(now), attempt_id],
    )?;
    Ok(changed == 1)
}
