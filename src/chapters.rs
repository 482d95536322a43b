use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Chapters nest parent, child, grandchild.
pub const MAX_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRow {
    pub id: i64,
    pub title: Option<String>,
    pub parent_id: Option<i64>,
    pub sort: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterNode {
    pub id: i64,
    pub title: String,
    pub sort: Option<i64>,
    pub children: Vec<ChapterNode>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutlineEntry {
    pub id: i64,
    pub title: String,
    pub depth: usize,
    pub parent_id: Option<i64>,
}

pub fn load_rows(conn: &Connection, subject_id: i64) -> rusqlite::Result<Vec<ChapterRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, parent_id, sort
         FROM chapter
         WHERE subject_id = ?
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map([subject_id], |r| {
            Ok(ChapterRow {
                id: r.get(0)?,
                title: r.get(1)?,
                parent_id: r.get(2)?,
                sort: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn display_title(row: &ChapterRow) -> String {
    match row.title.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => format!("Chapter {}", row.id),
    }
}

/// Builds the nested chapter tree.
///
/// Siblings order by `sort` (missing counts as 0), then title, then id. Rows without a
/// parent are roots; every other row appears exactly once under its parent. Rows whose
/// parent is missing, or that sit on a parent cycle, are surfaced as roots so nothing is
/// dropped.
pub fn build_tree(rows: &[ChapterRow]) -> Vec<ChapterNode> {
    let mut sorted: Vec<&ChapterRow> = rows.iter().collect();
    sorted.sort_by(|a, b| {
        a.sort
            .unwrap_or(0)
            .cmp(&b.sort.unwrap_or(0))
            .then_with(|| display_title(a).cmp(&display_title(b)))
            .then_with(|| a.id.cmp(&b.id))
    });

    let ids: HashSet<i64> = rows.iter().map(|r| r.id).collect();
    let mut children: HashMap<i64, Vec<&ChapterRow>> = HashMap::new();
    let mut roots: Vec<&ChapterRow> = Vec::new();
    for row in &sorted {
        match row.parent_id {
            Some(p) if p != row.id && ids.contains(&p) => {
                children.entry(p).or_default().push(row);
            }
            _ => roots.push(row),
        }
    }

    let mut visited: HashSet<i64> = HashSet::new();
    let mut tree: Vec<ChapterNode> = roots
        .iter()
        .filter_map(|r| build_node(r, &children, &mut visited))
        .collect();

    // Anything left is only reachable through a cycle.
    for row in &sorted {
        if !visited.contains(&row.id) {
            if let Some(node) = build_node(row, &children, &mut visited) {
                tree.push(node);
            }
        }
    }
    tree
}

fn build_node(
    row: &ChapterRow,
    children: &HashMap<i64, Vec<&ChapterRow>>,
    visited: &mut HashSet<i64>,
) -> Option<ChapterNode> {
    if !visited.insert(row.id) {
        return None;
    }
    let kids = children
        .get(&row.id)
        .map(|list| {
            list.iter()
                .filter_map(|c| build_node(c, children, visited))
                .collect()
        })
        .unwrap_or_default();
    Some(ChapterNode {
        id: row.id,
        title: display_title(row),
        sort: row.sort,
        children: kids,
    })
}

/// Depth-first outline of the tree, roots at depth 1.
pub fn flatten(tree: &[ChapterNode]) -> Vec<OutlineEntry> {
    fn walk(nodes: &[ChapterNode], depth: usize, parent: Option<i64>, out: &mut Vec<OutlineEntry>) {
        for n in nodes {
            out.push(OutlineEntry {
                id: n.id,
                title: n.title.clone(),
                depth,
                parent_id: parent,
            });
            walk(&n.children, depth + 1, Some(n.id), out);
        }
    }
    let mut out = Vec::new();
    walk(tree, 1, None, &mut out);
    out
}
