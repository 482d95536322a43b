//! Registry-driven CRUD over the administrable tables.
//!
//! Table and column identifiers come only from the static registry below; request data is
//! always bound as parameters.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::chapters::MAX_DEPTH;
use crate::db;
use crate::exam::{format_timestamp, MAX_DURATION_MINUTES};
use crate::viewer::sanitize_html;

pub const NULL_SENTINEL: &str = "__NULL__";
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Checkbox,
    Richtext,
    Select,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub key: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    pub as_number: bool,
    /// Numeric fields stored as INTEGER; fractional input is refused.
    #[serde(skip)]
    pub integer: bool,
    /// Inclusive bounds for integer fields.
    #[serde(skip)]
    pub range: Option<(i64, i64)>,
}

impl FieldSpec {
    const fn new(key: &'static str, label: &'static str, field_type: FieldType) -> Self {
        FieldSpec {
            key,
            label,
            field_type,
            required: false,
            as_number: false,
            integer: false,
            range: None,
        }
    }

    const fn required(self) -> Self {
        FieldSpec {
            required: true,
            ..self
        }
    }

    const fn as_number(self) -> Self {
        FieldSpec {
            as_number: true,
            integer: true,
            ..self
        }
    }

    const fn range(self, min: i64, max: i64) -> Self {
        FieldSpec {
            range: Some((min, max)),
            ..self
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self.field_type, FieldType::Number)
            || (matches!(self.field_type, FieldType::Select) && self.as_number)
    }

    fn is_searchable(&self) -> bool {
        !self.is_numeric() && !matches!(self.field_type, FieldType::Checkbox)
    }
}

const fn text(key: &'static str, label: &'static str) -> FieldSpec {
    FieldSpec::new(key, label, FieldType::Text)
}

const fn textarea(key: &'static str, label: &'static str) -> FieldSpec {
    FieldSpec::new(key, label, FieldType::Textarea)
}

const fn number(key: &'static str, label: &'static str) -> FieldSpec {
    FieldSpec {
        integer: true,
        ..FieldSpec::new(key, label, FieldType::Number)
    }
}

const fn real(key: &'static str, label: &'static str) -> FieldSpec {
    FieldSpec::new(key, label, FieldType::Number)
}

const fn checkbox(key: &'static str, label: &'static str) -> FieldSpec {
    FieldSpec::new(key, label, FieldType::Checkbox)
}

const fn rich(key: &'static str, label: &'static str) -> FieldSpec {
    FieldSpec::new(key, label, FieldType::Richtext)
}

const fn reference(key: &'static str, label: &'static str) -> FieldSpec {
    FieldSpec::new(key, label, FieldType::Select).as_number()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub singular: &'static str,
    pub fields: &'static [FieldSpec],
    /// Column stamped with the current time on every write.
    #[serde(skip)]
    pub touch_column: Option<&'static str>,
    /// Listed and read through the registry, written elsewhere.
    pub read_only: bool,
}

impl TableSpec {
    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    fn has_sort(&self) -> bool {
        self.field("sort").is_some()
    }
}

const NAME_ONLY: &[FieldSpec] = &[text("name", "Name").required()];

const MCQ_OPTIONS: [FieldSpec; 4] = [
    text("mcq1", "Option A"),
    text("mcq2", "Option B"),
    text("mcq3", "Option C"),
    text("mcq4", "Option D"),
];

pub static TABLES: &[TableSpec] = &[
    TableSpec {
        name: "program",
        title: "Programs",
        singular: "Program",
        fields: NAME_ONLY,
        touch_column: None,
        read_only: false,
    },
    TableSpec {
        name: "subject",
        title: "Subjects",
        singular: "Subject",
        fields: &[
            text("name", "Name").required(),
            text("code", "Code"),
            textarea("description", "Description"),
            text("image", "Image URL"),
            reference("program_id", "Program"),
            number("sort", "Sort"),
            checkbox("is_deleted", "Hidden"),
        ],
        touch_column: None,
        read_only: false,
    },
    TableSpec {
        name: "chapter",
        title: "Chapters",
        singular: "Chapter",
        fields: &[
            reference("subject_id", "Subject").required(),
            text("title", "Title").required(),
            reference("parent_id", "Parent chapter"),
            number("sort", "Sort"),
        ],
        touch_column: None,
        read_only: false,
    },
    TableSpec {
        name: "note",
        title: "Notes",
        singular: "Note",
        fields: &[
            reference("subject_id", "Subject").required(),
            reference("chapter_id", "Chapter"),
            text("title", "Title").required(),
            rich("caption", "Content"),
        ],
        touch_column: Some("edited_at"),
        read_only: false,
    },
    TableSpec {
        name: "flashcard",
        title: "Flashcards",
        singular: "Flashcard",
        fields: &[
            reference("subject_id", "Subject").required(),
            reference("chapter_id", "Chapter"),
            rich("front", "Front").required(),
            rich("back", "Back").required(),
        ],
        touch_column: None,
        read_only: false,
    },
    TableSpec {
        name: "year",
        title: "Years",
        singular: "Year",
        fields: NAME_ONLY,
        touch_column: None,
        read_only: false,
    },
    TableSpec {
        name: "season",
        title: "Seasons",
        singular: "Season",
        fields: NAME_ONLY,
        touch_column: None,
        read_only: false,
    },
    TableSpec {
        name: "paper",
        title: "Papers",
        singular: "Paper",
        fields: NAME_ONLY,
        touch_column: None,
        read_only: false,
    },
    TableSpec {
        name: "quiz",
        title: "Quizzes",
        singular: "Quiz",
        fields: &[
            reference("subject_id", "Subject").required(),
            reference("chapter_id", "Chapter"),
            rich("question", "Question").required(),
            MCQ_OPTIONS[0],
            MCQ_OPTIONS[1],
            MCQ_OPTIONS[2],
            MCQ_OPTIONS[3],
            text("mcq_answer", "Answer"),
            rich("mark_scheme", "Mark scheme"),
            text("num", "Number"),
            text("year", "Year"),
            reference("season_id", "Season"),
            text("paper", "Paper"),
        ],
        touch_column: None,
        read_only: false,
    },
    TableSpec {
        name: "quiz_frq",
        title: "Free-response questions",
        singular: "Free-response question",
        fields: &[
            reference("subject_id", "Subject").required(),
            reference("chapter_id", "Chapter"),
            reference("parent_id", "Parent question"),
            rich("question", "Question").required(),
            rich("mark_scheme", "Mark scheme"),
            real("max_score", "Max score"),
            text("num", "Number"),
            text("year", "Year"),
            reference("season_id", "Season"),
            text("paper", "Paper"),
        ],
        touch_column: None,
        read_only: false,
    },
    TableSpec {
        name: "exam",
        title: "Exams",
        singular: "Exam",
        fields: &[
            reference("subject_id", "Subject").required(),
            text("title", "Title").required(),
            textarea("description", "Description"),
            number("max_score", "Max score"),
            text("start_date", "Start date"),
            number("duration", "Duration (minutes)").range(0, MAX_DURATION_MINUTES),
        ],
        touch_column: None,
        read_only: false,
    },
    TableSpec {
        name: "exam_questions",
        title: "Exam questions",
        singular: "Exam question",
        fields: &[
            reference("exam_id", "Exam").required(),
            reference("subject_id", "Subject"),
            number("sort", "Sort"),
            rich("question", "Question").required(),
            FieldSpec::new("type", "Type", FieldType::Select),
            MCQ_OPTIONS[0],
            MCQ_OPTIONS[1],
            MCQ_OPTIONS[2],
            MCQ_OPTIONS[3],
            text("answer", "Answer"),
        ],
        touch_column: None,
        read_only: false,
    },
    TableSpec {
        name: "profiles",
        title: "Profiles",
        singular: "Profile",
        fields: &[text("email", "Email"), text("full_name", "Full name")],
        touch_column: None,
        read_only: true,
    },
];

/// Rows that must be removed before their parent can be deleted.
const CHILD_GUARDS: &[(&str, &str, &str)] = &[
    ("subject", "chapter", "subject_id"),
    ("chapter", "chapter", "parent_id"),
    ("quiz_frq", "quiz_frq", "parent_id"),
    ("exam", "exam_questions", "exam_id"),
];

pub fn table(name: &str) -> Result<&'static TableSpec, ResourceError> {
    TABLES
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| ResourceError::UnknownTable(name.to_string()))
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown field {field} on {table}")]
    UnknownField { table: String, field: String },
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{field} must be a number, got {value}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("{0} is read-only")]
    ReadOnly(&'static str),
    #[error("bad filter: {0}")]
    BadFilter(String),
    #[error("{table} {id} not found")]
    NotFound { table: &'static str, id: i64 },
    #[error("Please select a subject first.")]
    NoSubject,
    #[error("invalid parent: {0}")]
    InvalidParent(String),
    #[error("{table} {id} still has {child_table} rows")]
    HasChildren {
        table: &'static str,
        id: i64,
        child_table: &'static str,
    },
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { column: String, value: SqlValue },
    IsNull { column: String },
    Any(Vec<Filter>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    pub search: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            filters: Vec::new(),
            search: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub rows: Vec<Value>,
    pub total_count: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: i64,
}

fn filterable_column<'a>(spec: &TableSpec, column: &'a str) -> Result<&'a str, ResourceError> {
    if column == "id" || column == "created_at" || spec.field(column).is_some() {
        Ok(column)
    } else {
        Err(ResourceError::UnknownField {
            table: spec.name.to_string(),
            field: column.to_string(),
        })
    }
}

fn filter_value(spec: &TableSpec, column: &str, raw: &Value) -> Result<SqlValue, ResourceError> {
    let field = spec.field(column);
    let numeric = column == "id" || field.map(|f| f.is_numeric()).unwrap_or(false);
    if numeric {
        let integer = column == "id" || field.map(|f| f.integer).unwrap_or(false);
        let parsed = match raw {
            Value::Number(n) => number_value(n, integer),
            Value::String(s) => parse_number(s.trim(), integer),
            _ => None,
        };
        return parsed.ok_or_else(|| {
            ResourceError::BadFilter(format!("{column} expects a number, got {raw}"))
        });
    }
    Ok(match raw {
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Number(n) => SqlValue::Text(n.to_string()),
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        other => SqlValue::Text(other.to_string()),
    })
}

/// Parses `[{column, value}]` and `[{or: [{column, value}, ...]}]`.
///
/// `"__NULL__"` selects `IS NULL`; null or empty values skip the filter.
pub fn parse_filters(spec: &TableSpec, raw: Option<&Value>) -> Result<Vec<Filter>, ResourceError> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let Some(items) = raw.as_array() else {
        return Err(ResourceError::BadFilter("filters must be an array".into()));
    };
    let mut out = Vec::new();
    for item in items {
        if let Some(group) = item.get("or") {
            let parsed = parse_filters(spec, Some(group))?;
            if !parsed.is_empty() {
                out.push(Filter::Any(parsed));
            }
            continue;
        }
        let Some(column) = item.get("column").and_then(|v| v.as_str()) else {
            return Err(ResourceError::BadFilter("filter needs a column".into()));
        };
        let column = filterable_column(spec, column)?.to_string();
        match item.get("value") {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s.is_empty() => {}
            Some(Value::String(s)) if s == NULL_SENTINEL => out.push(Filter::IsNull { column }),
            Some(v) => {
                let value = filter_value(spec, &column, v)?;
                out.push(Filter::Eq { column, value });
            }
        }
    }
    Ok(out)
}

fn filter_sql(filter: &Filter, params: &mut Vec<SqlValue>) -> String {
    match filter {
        Filter::Eq { column, value } => {
            params.push(value.clone());
            format!("{column} = ?")
        }
        Filter::IsNull { column } => format!("{column} IS NULL"),
        Filter::Any(group) => {
            let parts: Vec<String> = group.iter().map(|f| filter_sql(f, params)).collect();
            format!("({})", parts.join(" OR "))
        }
    }
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn where_clause(
    spec: &TableSpec,
    filters: &[Filter],
    search: Option<&str>,
) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
    let mut parts: Vec<String> = filters.iter().map(|f| filter_sql(f, &mut params)).collect();

    if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
        let cols: Vec<&str> = spec
            .fields
            .iter()
            .filter(|f| f.is_searchable())
            .map(|f| f.key)
            .collect();
        if !cols.is_empty() {
            let pattern = escape_like(term);
            let ors: Vec<String> = cols
                .iter()
                .map(|c| {
                    params.push(SqlValue::Text(pattern.clone()));
                    format!("{c} LIKE ? ESCAPE '\\'")
                })
                .collect();
            parts.push(format!("({})", ors.join(" OR ")));
        }
    }

    if parts.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", parts.join(" AND ")), params)
    }
}

fn order_clause(spec: &TableSpec) -> &'static str {
    if spec.has_sort() {
        " ORDER BY sort IS NULL, sort ASC, created_at DESC, id DESC"
    } else {
        " ORDER BY created_at DESC, id DESC"
    }
}

pub fn count(
    conn: &Connection,
    spec: &TableSpec,
    filters: &[Filter],
    search: Option<&str>,
) -> Result<i64, ResourceError> {
    let (where_sql, params) = where_clause(spec, filters, search);
    let sql = format!("SELECT COUNT(*) FROM {}{}", spec.name, where_sql);
    Ok(conn.query_row(&sql, params_from_iter(params), |r| r.get(0))?)
}

pub fn list(conn: &Connection, spec: &TableSpec, query: &ListQuery) -> Result<Page, ResourceError> {
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, MAX_PAGE_SIZE);
    let total_count = count(conn, spec, &query.filters, query.search.as_deref())?;

    let (where_sql, mut params) = where_clause(spec, &query.filters, query.search.as_deref());
    let sql = format!(
        "SELECT * FROM {}{}{} LIMIT ? OFFSET ?",
        spec.name,
        where_sql,
        order_clause(spec)
    );
    params.push(SqlValue::Integer(i64::from(page_size)));
    params.push(SqlValue::Integer(i64::from(page - 1) * i64::from(page_size)));

    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt
        .query_map(params_from_iter(params), |row| db::row_to_json(row, &columns))?
        .collect::<Result<Vec<_>, _>>()?;

    let size = i64::from(page_size);
    Ok(Page {
        rows,
        total_count,
        page,
        page_size,
        total_pages: ((total_count + size - 1) / size).max(1),
    })
}

pub fn get(conn: &Connection, spec: &TableSpec, id: i64) -> Result<Option<Value>, ResourceError> {
    let sql = format!("SELECT * FROM {} WHERE id = ?", spec.name);
    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    Ok(stmt
        .query_row([id], |row| db::row_to_json(row, &columns))
        .optional()?)
}

/// Whole floats in i64 range, so `2.0` is accepted where `2.5` is not.
fn integral(f: f64) -> Option<i64> {
    // `i64::MAX as f64` rounds up to 2^63, which is already out of range.
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

fn float_value(f: f64, integer: bool) -> Option<SqlValue> {
    if !f.is_finite() {
        return None;
    }
    if integer {
        integral(f).map(SqlValue::Integer)
    } else {
        Some(SqlValue::Real(f))
    }
}

fn number_value(n: &serde_json::Number, integer: bool) -> Option<SqlValue> {
    match n.as_i64() {
        Some(i) => Some(SqlValue::Integer(i)),
        None => float_value(n.as_f64()?, integer),
    }
}

fn parse_number(s: &str, integer: bool) -> Option<SqlValue> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(SqlValue::Integer(i));
    }
    float_value(s.parse::<f64>().ok()?, integer)
}

fn check_range(field: &FieldSpec, v: SqlValue) -> Result<SqlValue, ResourceError> {
    match (field.range, &v) {
        (Some((min, max)), SqlValue::Integer(i)) if *i < min || *i > max => {
            Err(ResourceError::OutOfRange {
                field: field.label,
                value: *i,
                min,
                max,
            })
        }
        _ => Ok(v),
    }
}

/// Converts a form value into its stored representation.
pub fn coerce(field: &FieldSpec, raw: &Value) -> Result<SqlValue, ResourceError> {
    if field.is_numeric() {
        let parsed = match raw {
            Value::Null => return Ok(SqlValue::Null),
            Value::String(s) if s.trim().is_empty() => return Ok(SqlValue::Null),
            Value::Number(n) => number_value(n, field.integer),
            Value::String(s) => parse_number(s.trim(), field.integer),
            _ => None,
        };
        let value = parsed.ok_or_else(|| ResourceError::InvalidNumber {
            field: field.label,
            value: match raw {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        })?;
        return check_range(field, value);
    }

    match field.field_type {
        FieldType::Checkbox => Ok(SqlValue::Integer(i64::from(matches!(
            raw,
            Value::Bool(true)
        ) || raw.as_str() == Some("true")))),
        _ => {
            let text = match raw {
                Value::Null => return Ok(SqlValue::Null),
                Value::String(s) if s.is_empty() => return Ok(SqlValue::Null),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if field.field_type == FieldType::Richtext {
                Ok(SqlValue::Text(sanitize_html(&text)))
            } else {
                Ok(SqlValue::Text(text))
            }
        }
    }
}

fn coerce_values(
    spec: &TableSpec,
    values: &Map<String, Value>,
    partial: bool,
) -> Result<Vec<(&'static str, SqlValue)>, ResourceError> {
    for key in values.keys() {
        if spec.field(key).is_none() {
            return Err(ResourceError::UnknownField {
                table: spec.name.to_string(),
                field: key.clone(),
            });
        }
    }

    let mut out = Vec::new();
    for field in spec.fields {
        let raw = match values.get(field.key) {
            Some(v) => v,
            None if partial => continue,
            None => &Value::Null,
        };
        let v = coerce(field, raw)?;
        if field.required && v == SqlValue::Null {
            if spec.name == "chapter" && field.key == "subject_id" {
                return Err(ResourceError::NoSubject);
            }
            return Err(ResourceError::MissingField(field.label));
        }
        out.push((field.key, v));
    }
    Ok(out)
}

fn int_of(values: &[(&'static str, SqlValue)], key: &str) -> Option<Option<i64>> {
    values.iter().find(|(k, _)| *k == key).map(|(_, v)| match v {
        SqlValue::Integer(i) => Some(*i),
        _ => None,
    })
}

fn row_ints(
    conn: &Connection,
    table: &str,
    id: i64,
) -> Result<Option<(i64, Option<i64>)>, ResourceError> {
    let sql = format!("SELECT subject_id, parent_id FROM {table} WHERE id = ?");
    Ok(conn
        .query_row(&sql, [id], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()?)
}

fn chapter_depth(conn: &Connection, id: i64) -> Result<usize, ResourceError> {
    let mut depth = 0;
    let mut cur = Some(id);
    while let Some(c) = cur {
        depth += 1;
        if depth > 64 {
            return Err(ResourceError::InvalidParent("chapter ancestry loops".into()));
        }
        cur = row_ints(conn, "chapter", c)?.and_then(|(_, p)| p);
    }
    Ok(depth)
}

fn chapter_height(conn: &Connection, id: i64) -> Result<usize, ResourceError> {
    let mut stmt = conn.prepare("SELECT id FROM chapter WHERE parent_id = ?")?;
    let mut height = 1;
    let mut frontier = vec![id];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for p in &frontier {
            let kids = stmt
                .query_map([p], |r| r.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            next.extend(kids);
        }
        if next.is_empty() {
            break;
        }
        height += 1;
        if height > 64 {
            return Err(ResourceError::InvalidParent("chapter ancestry loops".into()));
        }
        frontier = next;
    }
    Ok(height)
}

fn is_ancestor(conn: &Connection, candidate: i64, of: i64) -> Result<bool, ResourceError> {
    let mut cur = Some(of);
    let mut hops = 0;
    while let Some(c) = cur {
        if c == candidate {
            return Ok(true);
        }
        hops += 1;
        if hops > 64 {
            return Ok(true);
        }
        cur = row_ints(conn, "chapter", c)?.and_then(|(_, p)| p);
    }
    Ok(false)
}

/// Resolves the effective subject and parent of a write, falling back to the stored row.
fn effective_links(
    conn: &Connection,
    spec: &TableSpec,
    values: &[(&'static str, SqlValue)],
    id: Option<i64>,
) -> Result<(Option<i64>, Option<i64>), ResourceError> {
    let existing = match id {
        Some(id) => row_ints(conn, spec.name, id)?,
        None => None,
    };
    let subject = int_of(values, "subject_id")
        .flatten()
        .or(existing.map(|(s, _)| s));
    let parent = match int_of(values, "parent_id") {
        Some(p) => p,
        None => existing.and_then(|(_, p)| p),
    };
    Ok((subject, parent))
}

fn check_chapter(
    conn: &Connection,
    values: &[(&'static str, SqlValue)],
    id: Option<i64>,
) -> Result<(), ResourceError> {
    let spec = table("chapter")?;
    let (subject, parent) = effective_links(conn, spec, values, id)?;
    let Some(parent) = parent else {
        return Ok(());
    };
    let Some((parent_subject, _)) = row_ints(conn, "chapter", parent)? else {
        return Err(ResourceError::InvalidParent(format!("chapter {parent} does not exist")));
    };
    if Some(parent_subject) != subject {
        return Err(ResourceError::InvalidParent(
            "parent chapter belongs to another subject".into(),
        ));
    }
    if let Some(id) = id {
        if is_ancestor(conn, id, parent)? {
            return Err(ResourceError::InvalidParent(
                "a chapter cannot be nested under itself".into(),
            ));
        }
    }
    let subtree = match id {
        Some(id) => chapter_height(conn, id)?,
        None => 1,
    };
    if chapter_depth(conn, parent)? + subtree > MAX_DEPTH {
        return Err(ResourceError::InvalidParent(format!(
            "chapters nest at most {MAX_DEPTH} levels"
        )));
    }
    Ok(())
}

fn check_frq(
    conn: &Connection,
    values: &[(&'static str, SqlValue)],
    id: Option<i64>,
) -> Result<(), ResourceError> {
    let spec = table("quiz_frq")?;
    let (subject, parent) = effective_links(conn, spec, values, id)?;
    let Some(parent) = parent else {
        return Ok(());
    };
    if Some(parent) == id {
        return Err(ResourceError::InvalidParent(
            "a question cannot be its own part".into(),
        ));
    }
    let Some((parent_subject, grandparent)) = row_ints(conn, "quiz_frq", parent)? else {
        return Err(ResourceError::InvalidParent(format!("question {parent} does not exist")));
    };
    if grandparent.is_some() {
        return Err(ResourceError::InvalidParent(
            "parts can only belong to a top-level question".into(),
        ));
    }
    if Some(parent_subject) != subject {
        return Err(ResourceError::InvalidParent(
            "parent question belongs to another subject".into(),
        ));
    }
    if let Some(id) = id {
        let has_parts: Option<i64> = conn
            .query_row("SELECT 1 FROM quiz_frq WHERE parent_id = ? LIMIT 1", [id], |r| {
                r.get(0)
            })
            .optional()?;
        if has_parts.is_some() {
            return Err(ResourceError::InvalidParent(
                "a question with parts cannot become a part".into(),
            ));
        }
    }
    Ok(())
}

fn check_links(
    conn: &Connection,
    spec: &TableSpec,
    values: &[(&'static str, SqlValue)],
    id: Option<i64>,
) -> Result<(), ResourceError> {
    match spec.name {
        "chapter" => check_chapter(conn, values, id),
        "quiz_frq" => check_frq(conn, values, id),
        _ => Ok(()),
    }
}

fn ensure_writable(spec: &TableSpec) -> Result<(), ResourceError> {
    if spec.read_only {
        return Err(ResourceError::ReadOnly(spec.title));
    }
    Ok(())
}

fn now_text() -> String {
    format_timestamp(chrono::Utc::now())
}

pub fn insert(
    conn: &Connection,
    spec: &TableSpec,
    values: &Map<String, Value>,
) -> Result<i64, ResourceError> {
    ensure_writable(spec)?;
    let mut cols = coerce_values(spec, values, false)?;
    check_links(conn, spec, &cols, None)?;
    if let Some(touch) = spec.touch_column {
        cols.push((touch, SqlValue::Text(now_text())));
    }

    let names: Vec<&str> = cols.iter().map(|(k, _)| *k).collect();
    let marks: Vec<&str> = cols.iter().map(|_| "?").collect();
    let sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        spec.name,
        names.join(", "),
        marks.join(", ")
    );
    conn.execute(&sql, params_from_iter(cols.into_iter().map(|(_, v)| v)))?;
    Ok(conn.last_insert_rowid())
}

pub fn update(
    conn: &Connection,
    spec: &TableSpec,
    id: i64,
    values: &Map<String, Value>,
) -> Result<(), ResourceError> {
    ensure_writable(spec)?;
    if get(conn, spec, id)?.is_none() {
        return Err(ResourceError::NotFound {
            table: spec.name,
            id,
        });
    }
    let mut cols = coerce_values(spec, values, true)?;
    check_links(conn, spec, &cols, Some(id))?;
    if let Some(touch) = spec.touch_column {
        cols.push((touch, SqlValue::Text(now_text())));
    }
    if cols.is_empty() {
        return Ok(());
    }

    let sets: Vec<String> = cols.iter().map(|(k, _)| format!("{k} = ?")).collect();
    let sql = format!("UPDATE {} SET {} WHERE id = ?", spec.name, sets.join(", "));
    let mut params: Vec<SqlValue> = cols.into_iter().map(|(_, v)| v).collect();
    params.push(SqlValue::Integer(id));
    conn.execute(&sql, params_from_iter(params))?;
    Ok(())
}

pub fn delete(conn: &Connection, spec: &TableSpec, id: i64) -> Result<(), ResourceError> {
    ensure_writable(spec)?;
    for (parent, child_table, fk) in CHILD_GUARDS {
        if *parent != spec.name {
            continue;
        }
        let sql = format!("SELECT 1 FROM {child_table} WHERE {fk} = ? LIMIT 1");
        let found: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
        if found.is_some() {
            return Err(ResourceError::HasChildren {
                table: spec.name,
                id,
                child_table,
            });
        }
    }

    let sql = format!("DELETE FROM {} WHERE id = ?", spec.name);
    let changed = conn.execute(&sql, [id])?;
    if changed == 0 {
        return Err(ResourceError::NotFound {
            table: spec.name,
            id,
        });
    }
    Ok(())
}

/// Registry as sent to form renderers.
pub fn describe() -> Value {
    json!({ "tables": TABLES })
}
