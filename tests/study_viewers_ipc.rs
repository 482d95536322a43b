mod test_support;

use serde_json::{json, Value};
use test_support::{create_row, request_ok, sign_in, spawn_sidecar, temp_dir};

fn ids(items: &Value) -> Vec<i64> {
    items
        .as_array()
        .expect("items")
        .iter()
        .filter_map(|i| i["id"].as_i64())
        .collect()
}

#[test]
fn viewers_filter_by_chapter_and_move_a_cursor() {
    let workspace = temp_dir("studyd-study-viewers");
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
    let cells = create_row(
        &mut stdin,
        &mut reader,
        "4",
        "chapter",
        json!({ "subject_id": subject, "title": "Cells" }),
    );
    let organelles = create_row(
        &mut stdin,
        &mut reader,
        "5",
        "chapter",
        json!({ "subject_id": subject, "title": "Organelles", "parent_id": cells }),
    );

    let f1 = create_row(
        &mut stdin,
        &mut reader,
        "6",
        "flashcard",
        json!({ "subject_id": subject, "chapter_id": cells, "front": "Cell", "back": "Unit of life" }),
    );
    let f2 = create_row(
        &mut stdin,
        &mut reader,
        "7",
        "flashcard",
        json!({ "subject_id": subject, "chapter_id": cells, "front": "Membrane", "back": "Boundary" }),
    );
    let _f3 = create_row(
        &mut stdin,
        &mut reader,
        "8",
        "flashcard",
        json!({ "subject_id": subject, "chapter_id": organelles, "front": "Nucleus", "back": "Control" }),
    );
    let q1 = create_row(
        &mut stdin,
        &mut reader,
        "9",
        "quiz",
        json!({
            "subject_id": subject,
            "chapter_id": organelles,
            "question": "<p>Which organelle makes ATP?</p><script>x()</script>",
            "mcq1": "Nucleus",
            "mcq2": "Mitochondrion",
            "mcq_answer": "B",
            "num": "1"
        }),
    );
    let _ = create_row(
        &mut stdin,
        &mut reader,
        "10",
        "note",
        json!({ "subject_id": subject, "chapter_id": cells, "title": "Cells overview", "caption": "<h2>Cells</h2>" }),
    );

    let _ = sign_in(&mut stdin, &mut reader, "11", "student-1", Some("student"));

    let cards = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "study.flashcards",
        json!({ "subjectId": subject, "chapterId": cells, "index": 7 }),
    );
    assert_eq!(ids(&cards["items"]), vec![f1, f2]);
    assert_eq!(cards["cursor"]["index"], 1);
    assert_eq!(cards["cursor"]["hasNext"], false);
    assert_eq!(cards["cursor"]["hasPrev"], true);
    assert_eq!(cards["current"]["id"], f2);

    let all_cards = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "study.flashcards",
        json!({ "subjectId": subject }),
    );
    assert_eq!(all_cards["cursor"]["total"], 3);

    // Chapter filters are exact: the parent chapter does not pull in its children's quizzes.
    let parent_quizzes = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "study.quizzes",
        json!({ "subjectId": subject, "chapterId": cells }),
    );
    assert_eq!(parent_quizzes["cursor"]["total"], 0);
    assert!(parent_quizzes["current"].is_null());

    let quizzes = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "study.quizzes",
        json!({ "subjectId": subject, "chapterId": organelles }),
    );
    assert_eq!(ids(&quizzes["items"]), vec![q1]);
    assert_eq!(
        quizzes["current"]["question"],
        "<p>Which organelle makes ATP?</p>"
    );

    let check = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "study.quizCheck",
        json!({ "quizId": q1, "choice": "b" }),
    );
    assert_eq!(check["correct"], true);
    assert_eq!(check["answer"], "B");
    let wrong = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "study.quizCheck",
        json!({ "quizId": q1, "choice": "A" }),
    );
    assert_eq!(wrong["correct"], false);

    let notes = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "study.notes",
        json!({ "subjectId": subject }),
    );
    assert_eq!(notes["current"]["caption"], "<h2>Cells</h2>");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn past_papers_sort_newest_year_first_and_frq_groups_parts() {
    let workspace = temp_dir("studyd-study-papers");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = sign_in(&mut stdin, &mut reader, "2", "admin-1", Some("admin"));
    let subject = create_row(&mut stdin, &mut reader, "3", "subject", json!({ "name": "Physics" }));
    let summer = create_row(&mut stdin, &mut reader, "4", "season", json!({ "name": "May/June" }));

    let undated = create_row(
        &mut stdin,
        &mut reader,
        "5",
        "quiz",
        json!({ "subject_id": subject, "question": "Undated", "num": "1" }),
    );
    let old = create_row(
        &mut stdin,
        &mut reader,
        "6",
        "quiz",
        json!({ "subject_id": subject, "question": "Old", "year": "2019", "season_id": summer, "paper": "1", "num": "1" }),
    );
    let recent = create_row(
        &mut stdin,
        &mut reader,
        "7",
        "quiz",
        json!({ "subject_id": subject, "question": "Recent", "year": "2023", "season_id": summer, "paper": "1", "num": "1" }),
    );

    let papers = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "study.pastPapers",
        json!({ "subjectId": subject }),
    );
    assert_eq!(ids(&papers["items"]), vec![recent, old, undated]);
    assert_eq!(papers["items"][0]["season_name"], "May/June");
    assert_eq!(papers["options"]["seasons"][0]["name"], "May/June");

    let filtered = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "study.pastPapers",
        json!({ "subjectId": subject, "year": "2019" }),
    );
    assert_eq!(ids(&filtered["items"]), vec![old]);

    let q1 = create_row(
        &mut stdin,
        &mut reader,
        "10",
        "quiz_frq",
        json!({ "subject_id": subject, "question": "Forces" }),
    );
    let q2 = create_row(
        &mut stdin,
        &mut reader,
        "11",
        "quiz_frq",
        json!({ "subject_id": subject, "question": "Energy" }),
    );
    let a = create_row(
        &mut stdin,
        &mut reader,
        "12",
        "quiz_frq",
        json!({ "subject_id": subject, "question": "(a)", "parent_id": q1, "max_score": 2 }),
    );
    let b = create_row(
        &mut stdin,
        &mut reader,
        "13",
        "quiz_frq",
        json!({ "subject_id": subject, "question": "(b)", "parent_id": q1, "max_score": 3 }),
    );

    let frq = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "study.frq",
        json!({ "subjectId": subject, "pageSize": 1 }),
    );
    assert_eq!(frq["totalCount"], 2);
    assert_eq!(frq["totalPages"], 2);
    assert_eq!(ids(&frq["rows"]), vec![q1]);
    assert_eq!(ids(&frq["rows"][0]["parts"]), vec![a, b]);

    let desc = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "study.frq",
        json!({ "subjectId": subject, "sortOrder": "desc" }),
    );
    assert_eq!(ids(&desc["rows"]), vec![q2, q1]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
