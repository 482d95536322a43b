use serde::Serialize;
use serde_json::Value;

/// Strips scripts, event handlers and unknown tags from stored rich text.
pub fn sanitize_html(html: &str) -> String {
    ammonia::clean(html)
}

/// Sanitizes the named string fields of a JSON row in place.
pub fn sanitize_fields(row: &mut Value, keys: &[&str]) {
    let Some(obj) = row.as_object_mut() else {
        return;
    };
    for key in keys {
        if let Some(Value::String(s)) = obj.get_mut(*key) {
            *s = sanitize_html(s);
        }
    }
}

/// Prev/next position within a filtered item list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub index: usize,
    pub total: usize,
    pub has_prev: bool,
    pub has_next: bool,
}

impl Cursor {
    pub fn new(requested: i64, total: usize) -> Self {
        let index = if total == 0 {
            0
        } else {
            requested.clamp(0, total as i64 - 1) as usize
        };
        Cursor {
            index,
            total,
            has_prev: index > 0,
            has_next: index + 1 < total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_clamps_into_range() {
        assert_eq!(
            Cursor::new(5, 3),
            Cursor {
                index: 2,
                total: 3,
                has_prev: true,
                has_next: false
            }
        );
        assert_eq!(Cursor::new(-4, 3).index, 0);
        assert!(Cursor::new(0, 3).has_next);

        let empty = Cursor::new(2, 0);
        assert_eq!(empty.index, 0);
        assert!(!empty.has_prev && !empty.has_next);
    }

    #[test]
    fn sanitize_removes_script_and_handlers() {
        let out = sanitize_html(r#"<p onclick="x()">hi</p><script>alert(1)</script>"#);
        assert_eq!(out, "<p>hi</p>");
    }

    #[test]
    fn sanitize_fields_leaves_other_keys() {
        let mut row = json!({ "front": "<b>a</b><script>1</script>", "id": 3, "back": null });
        sanitize_fields(&mut row, &["front", "back"]);
        assert_eq!(row["front"], "<b>a</b>");
        assert_eq!(row["id"], 3);
        assert!(row["back"].is_null());
    }
}
