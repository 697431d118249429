//! Path-informed community detection
//!
//! Current FILE nodes are grouped by their leading path tokens, then groups
//! bridged by dense IMPORTS→REFERENCES connectivity are merged. Labels come
//! from the dominant path token. Deterministic, dependency-free; a Leiden
//! implementation can replace `detect_communities` behind the same
//! signature.

use crate::index::FileEntry;
use crate::model::{Community, Edge, EdgeKind};
use std::collections::{BTreeMap, HashMap};

/// Merge two groups when more than this share of either group's files
/// reference the other group.
const MERGE_DENSITY: f64 = 0.5;

pub fn detect_communities(project: &str, files: &[FileEntry], edges: &[Edge]) -> Vec<Community> {
    if files.is_empty() {
        return Vec::new();
    }

    // Group by leading path token (the directory right under the root).
    let mut groups: BTreeMap<String, Vec<&FileEntry>> = BTreeMap::new();
    for file in files {
        let token = leading_token(&file.rel_path);
        groups.entry(token).or_default().push(file);
    }

    // Cross-group REFERENCES density, via IMPORT nodes: the import's file id
    // is encoded in the edge endpoints' SCIP ids.
    let file_group: HashMap<&str, &str> = groups
        .iter()
        .flat_map(|(token, members)| members.iter().map(move |f| (f.id.as_str(), token.as_str())))
        .collect();
    let import_owner: HashMap<&str, &str> = edges
        .iter()
        .filter(|e| e.kind == EdgeKind::Imports)
        .map(|e| (e.to.as_str(), e.from.as_str()))
        .collect();
    let mut cross: HashMap<(String, String), usize> = HashMap::new();
    for edge in edges.iter().filter(|e| e.kind == EdgeKind::References) {
        let Some(owner_file) = import_owner.get(edge.from.as_str()) else {
            continue;
        };
        let (Some(from_group), Some(to_group)) =
            (file_group.get(owner_file), file_group.get(edge.to.as_str()))
        else {
            continue;
        };
        if from_group != to_group {
            let key = if from_group < to_group {
                (from_group.to_string(), to_group.to_string())
            } else {
                (to_group.to_string(), from_group.to_string())
            };
            *cross.entry(key).or_default() += 1;
        }
    }

    // Union-find over group names, merging densely connected pairs.
    let names: Vec<String> = groups.keys().cloned().collect();
    let mut parent: HashMap<String, String> = names.iter().map(|n| (n.clone(), n.clone())).collect();
    fn find(parent: &mut HashMap<String, String>, name: &str) -> String {
        let mut current = name.to_string();
        while parent[&current] != current {
            current = parent[&current].clone();
        }
        current
    }
    for ((a, b), count) in &cross {
        let size_a = groups[a].len();
        let size_b = groups[b].len();
        let density = *count as f64 / size_a.min(size_b).max(1) as f64;
        if density >= MERGE_DENSITY {
            let root_a = find(&mut parent, a);
            let root_b = find(&mut parent, b);
            if root_a != root_b {
                parent.insert(root_b, root_a);
            }
        }
    }

    let mut merged: BTreeMap<String, Vec<&FileEntry>> = BTreeMap::new();
    for (token, members) in &groups {
        let root = find(&mut parent, token);
        merged.entry(root).or_default().extend(members.iter().copied());
    }

    merged
        .into_iter()
        .map(|(label, members)| {
            let mut paths: Vec<&str> = members.iter().map(|f| f.rel_path.as_str()).collect();
            paths.sort();
            let sample: Vec<&str> = paths.iter().take(5).copied().collect();
            let summary = format!(
                "{} files under '{}'; representative: {}",
                members.len(),
                label,
                sample.join(", ")
            );
            Community {
                id: format!("{}:community:{}", project, label),
                project_id: project.to_string(),
                label: label.clone(),
                summary,
                member_count: members.len() as u64,
                members: members.iter().map(|f| f.id.clone()).collect(),
            }
        })
        .collect()
}

/// The directory token right under the workspace root, or the file stem for
/// root-level files.
fn leading_token(rel_path: &str) -> String {
    let mut parts = rel_path.split('/');
    let first = parts.next().unwrap_or(rel_path);
    if parts.next().is_some() {
        // At least one more component follows, so the first is a directory.
        let second_level: Vec<&str> = rel_path.split('/').collect();
        if second_level.len() > 2 {
            format!("{}/{}", second_level[0], second_level[1])
        } else {
            first.to_string()
        }
    } else {
        "root".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str, rel: &str) -> FileEntry {
        FileEntry {
            id: id.to_string(),
            path: format!("/w/{}", rel),
            rel_path: rel.to_string(),
            language: Some("typescript".into()),
            content_hash: None,
        }
    }

    #[test]
    fn groups_by_leading_directory() {
        let files = vec![
            file("p:file:src/api/a.ts", "src/api/a.ts"),
            file("p:file:src/api/b.ts", "src/api/b.ts"),
            file("p:file:src/db/c.ts", "src/db/c.ts"),
        ];
        let communities = detect_communities("p", &files, &[]);
        assert_eq!(communities.len(), 2);
        let labels: Vec<&str> = communities.iter().map(|c| c.label.as_str()).collect();
        assert!(labels.contains(&"src/api"));
        assert!(labels.contains(&"src/db"));
        let api = communities.iter().find(|c| c.label == "src/api").unwrap();
        assert_eq!(api.member_count, 2);
    }

    #[test]
    fn empty_input_yields_no_communities() {
        assert!(detect_communities("p", &[], &[]).is_empty());
    }
}
