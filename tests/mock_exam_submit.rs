mod test_support;

use chrono::{Duration, SecondsFormat, Utc};
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{create_row, request_err, request_ok, sign_in, spawn_sidecar, temp_dir};

fn seed_exam(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
    subject: i64,
    started_minutes_ago: i64,
    duration: i64,
) -> (i64, Vec<i64>) {
    let start = (Utc::now() - Duration::minutes(started_minutes_ago))
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    let exam = create_row(
        stdin,
        reader,
        &format!("{prefix}-exam"),
        "exam",
        json!({
            "subject_id": subject,
            "title": "Mock 1",
            "max_score": 2,
            "start_date": start,
            "duration": duration
        }),
    );
    let mut questions = Vec::new();
    for (i, key) in ["A", "c"].iter().enumerate() {
        questions.push(create_row(
            stdin,
            reader,
            &format!("{prefix}-q{i}"),
            "exam_questions",
            json!({
                "exam_id": exam,
                "sort": i,
                "question": format!("Question {}", i + 1),
                "type": "mcq",
                "mcq1": "one",
                "mcq2": "two",
                "answer": key
            }),
        ));
    }
    (exam, questions)
}

#[test]
fn second_submission_is_rejected() {
    let workspace = temp_dir("studyd-mock-exam");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = sign_in(&mut stdin, &mut reader, "2", "admin-1", Some("admin"));
    let subject = create_row(&mut stdin, &mut reader, "3", "subject", json!({ "name": "Biology" }));
    let (exam, questions) = seed_exam(&mut stdin, &mut reader, "seed", subject, 5, 60);

    let _ = sign_in(&mut stdin, &mut reader, "4", "student-1", Some("student"));
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "exams.open",
        json!({ "examId": exam }),
    );
    assert_eq!(opened["questions"].as_array().map(|q| q.len()), Some(2));
    for q in opened["questions"].as_array().expect("questions") {
        assert!(q.get("answer").is_none(), "answer key leaked: {q}");
    }
    assert_eq!(opened["timer"]["locked"], false);
    assert!(opened["timer"]["remainingMs"].as_i64().expect("remainingMs") > 0);

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "exams.answer",
        json!({ "examId": exam, "questionId": questions[0], "answer": "a" }),
    );
    assert_eq!(saved["saved"], true);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "exams.answer",
        json!({ "examId": exam, "questionId": questions[1], "answer": "d" }),
    );

    let reopened = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "exams.open",
        json!({ "examId": exam }),
    );
    assert_eq!(reopened["answers"][questions[0].to_string()], "a");
    assert_eq!(reopened["timer"]["deadline"], opened["timer"]["deadline"]);

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "exams.submit",
        json!({ "examId": exam }),
    );
    assert_eq!(submitted["score"], 1);
    assert_eq!(submitted["percentage"], 50);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "exams.submit",
        json!({ "examId": exam }),
    );
    assert_eq!(code, "already_submitted");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "exams.answer",
        json!({ "examId": exam, "questionId": questions[1], "answer": "c" }),
    );
    assert_eq!(code, "already_submitted");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "exams.list",
        json!({ "subjectId": subject }),
    );
    assert_eq!(listed["exams"][0]["is_submit"], 1);
    assert_eq!(listed["exams"][0]["percentage"], 50);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn expired_exam_locks_answers_and_submission() {
    let workspace = temp_dir("studyd-mock-exam-expired");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = sign_in(&mut stdin, &mut reader, "2", "admin-1", Some("admin"));
    let subject = create_row(&mut stdin, &mut reader, "3", "subject", json!({ "name": "Biology" }));
    let (exam, questions) = seed_exam(&mut stdin, &mut reader, "seed", subject, 180, 30);

    let _ = sign_in(&mut stdin, &mut reader, "4", "student-2", Some("student"));
    let timer = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "exams.timer",
        json!({ "examId": exam }),
    );
    assert_eq!(timer["remainingMs"], 0);
    assert_eq!(timer["display"], "00:00");
    assert_eq!(timer["locked"], true);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "exams.answer",
        json!({ "examId": exam, "questionId": questions[0], "answer": "A" }),
    );
    assert_eq!(code, "exam_locked");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "exams.submit",
        json!({ "examId": exam }),
    );
    assert_eq!(code, "exam_locked");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "exams.open",
        json!({ "examId": 9999 }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
