mod test_support;

use serde_json::json;
use test_support::{create_row, request_err, request_ok, sign_in, spawn_sidecar, temp_dir};

#[test]
fn delete_removes_row_and_decrements_total() {
    let workspace = temp_dir("studyd-resource-crud");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = sign_in(&mut stdin, &mut reader, "2", "admin-1", Some("admin"));

    let mut ids = Vec::new();
    for (i, name) in ["Science", "Arts", "Commerce"].iter().enumerate() {
        ids.push(create_row(
            &mut stdin,
            &mut reader,
            &format!("c{i}"),
            "program",
            json!({ "name": name }),
        ));
    }

    let page = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "resource.list",
        json!({ "table": "program", "pageSize": 2 }),
    );
    assert_eq!(page["totalCount"], 3);
    assert_eq!(page["totalPages"], 2);
    assert_eq!(page["rows"].as_array().map(|r| r.len()), Some(2));
    // Newest first.
    assert_eq!(page["rows"][0]["id"], ids[2]);

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "resource.delete",
        json!({ "table": "program", "id": ids[1] }),
    );
    assert_eq!(deleted["deleted"], true);
    assert_eq!(deleted["totalCount"], 2);

    let page = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "resource.list",
        json!({ "table": "program" }),
    );
    assert_eq!(page["totalCount"], 2);
    let listed: Vec<i64> = page["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(|r| r["id"].as_i64())
        .collect();
    assert!(!listed.contains(&ids[1]));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "resource.delete",
        json!({ "table": "program", "id": ids[1] }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn writes_validate_fields_and_sanitize_rich_text() {
    let workspace = temp_dir("studyd-resource-validate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = sign_in(&mut stdin, &mut reader, "2", "admin-1", Some("admin"));
    let subject = create_row(
        &mut stdin,
        &mut reader,
        "3",
        "subject",
        json!({ "name": "Biology", "code": "9700" }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "resource.create",
        json!({ "table": "chapter", "values": { "title": "Cells", "subject_id": "" } }),
    );
    assert_eq!(code, "no_subject");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "resource.create",
        json!({ "table": "chapter", "values": { "title": "Cells", "subject_id": subject, "sort": "first" } }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "resource.create",
        json!({ "table": "secrets", "values": {} }),
    );
    assert_eq!(code, "bad_params");

    let card = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "resource.create",
        json!({
            "table": "flashcard",
            "values": {
                "subject_id": subject.to_string(),
                "front": "<b>Mitosis</b><script>alert(1)</script>",
                "back": "<p onclick=\"x()\">Cell division</p>"
            }
        }),
    );
    assert_eq!(card["row"]["front"], "<b>Mitosis</b>");
    assert_eq!(card["row"]["back"], "<p>Cell division</p>");
    assert_eq!(card["row"]["chapter_id"], serde_json::Value::Null);

    let note_id = create_row(
        &mut stdin,
        &mut reader,
        "8",
        "note",
        json!({ "subject_id": subject, "title": "Intro" }),
    );
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "resource.update",
        json!({ "table": "note", "id": note_id, "values": { "title": "Intro to cells" } }),
    );
    assert_eq!(updated["row"]["title"], "Intro to cells");
    assert!(updated["row"]["edited_at"].is_string());

    let searched = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "resource.list",
        json!({
            "table": "note",
            "search": "CELLS",
            "filters": [{ "column": "subject_id", "value": subject }]
        }),
    );
    assert_eq!(searched["totalCount"], 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn content_management_is_closed_to_students_and_guests() {
    let workspace = temp_dir("studyd-resource-roles");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "resource.list",
        json!({ "table": "subject" }),
    );
    assert_eq!(code, "unauthorized");

    let _ = sign_in(&mut stdin, &mut reader, "3", "student-1", Some("student"));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "resource.create",
        json!({ "table": "subject", "values": { "name": "Biology" } }),
    );
    assert_eq!(code, "forbidden");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn frq_parts_block_parent_delete() {
    let workspace = temp_dir("studyd-resource-frq");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = sign_in(&mut stdin, &mut reader, "2", "admin-1", None);
    let subject = create_row(&mut stdin, &mut reader, "3", "subject", json!({ "name": "Physics" }));
    let parent = create_row(
        &mut stdin,
        &mut reader,
        "4",
        "quiz_frq",
        json!({ "subject_id": subject, "question": "Describe motion." }),
    );
    let part = create_row(
        &mut stdin,
        &mut reader,
        "5",
        "quiz_frq",
        json!({ "subject_id": subject, "question": "(a) Define velocity.", "parent_id": parent, "max_score": "2" }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "resource.create",
        json!({ "table": "quiz_frq", "values": { "subject_id": subject, "question": "(i)", "parent_id": part } }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "resource.delete",
        json!({ "table": "quiz_frq", "id": parent }),
    );
    assert_eq!(code, "has_children");

    let remaining = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "resource.delete",
        json!({
            "table": "quiz_frq",
            "id": part,
            "filters": [{ "column": "parent_id", "value": "__NULL__" }]
        }),
    );
    assert_eq!(remaining["totalCount"], 1);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "resource.delete",
        json!({ "table": "quiz_frq", "id": parent }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
