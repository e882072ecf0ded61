pub mod edge;
pub mod scan;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use petgraph::Directed;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use rayon::prelude::*;
use tracing::debug;

use crate::walker::ScannedFile;
use edge::EdgeKind;
use scan::{resolve_reference, scan_references};

/// In-project dependency graph over root-relative file paths.
///
/// Edges run declaring file -> referenced file. Dependents of a file are its incoming
/// neighbours; `file_index` gives O(1) node lookup so a dependents query costs only the
/// in-degree of the file. Edges only ever connect files that are currently watched.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    graph: StableGraph<PathBuf, EdgeKind, Directed>,
    file_index: HashMap<PathBuf, NodeIndex>,
    /// References whose target is not watched (yet): target -> declaring file -> kind.
    /// Used to relink edges when the target file appears later.
    pending: BTreeMap<PathBuf, BTreeMap<PathBuf, EdgeKind>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the full graph from a baseline snapshot. Every file becomes a node; each text
    /// file is scanned once (in parallel) and its resolved references become edges.
    pub fn build(files: &[ScannedFile]) -> Self {
        let mut graph = Self::new();
        for file in files {
            graph.add_node(&file.path);
        }

        let scanned: Vec<(PathBuf, Vec<(PathBuf, EdgeKind)>)> = files
            .par_iter()
            .filter_map(|file| {
                let text = file.text.as_deref()?;
                Some((file.path.clone(), resolved_references(&file.path, text)))
            })
            .collect();

        for (from, refs) in scanned {
            graph.link(&from, refs);
        }

        debug!(
            files = graph.file_count(),
            edges = graph.edge_count(),
            pending = graph.pending.len(),
            "dependency graph built"
        );
        graph
    }

    /// Files that directly reference `path` (one hop), sorted.
    pub fn lookup(&self, path: &Path) -> BTreeSet<PathBuf> {
        let Some(&idx) = self.file_index.get(path) else {
            return BTreeSet::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| self.graph[e.source()].clone())
            .collect()
    }

    /// Files that `path` references, with the edge kind, sorted by path.
    pub fn references(&self, path: &Path) -> Vec<(PathBuf, EdgeKind)> {
        let Some(&idx) = self.file_index.get(path) else {
            return Vec::new();
        };
        let mut out: Vec<(PathBuf, EdgeKind)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (self.graph[e.target()].clone(), *e.weight()))
            .collect();
        out.sort();
        out
    }

    /// A file appeared: add it, scan its own references, and relink any pending
    /// references from other files that were waiting for it.
    pub fn on_file_added(&mut self, path: &Path, text: Option<&str>) {
        let idx = self.add_node(path);

        if let Some(waiting) = self.pending.remove(path) {
            for (from, kind) in waiting {
                if let Some(&from_idx) = self.file_index.get(&from) {
                    self.add_edge(from_idx, idx, kind);
                }
            }
        }

        if let Some(text) = text {
            let refs = resolved_references(path, text);
            self.link(path, refs);
        }
    }

    /// A file's content changed: drop its outgoing references and re-scan it.
    pub fn on_file_changed(&mut self, path: &Path, text: Option<&str>) {
        let Some(&idx) = self.file_index.get(path) else {
            self.on_file_added(path, text);
            return;
        };

        let outgoing: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for edge in outgoing {
            self.graph.remove_edge(edge);
        }
        self.forget_pending_from(path);

        if let Some(text) = text {
            let refs = resolved_references(path, text);
            self.link(path, refs);
        }
    }

    /// A file was removed: prune its node and every edge touching it. References from
    /// other files that pointed at it go back to pending.
    pub fn on_file_removed(&mut self, path: &Path) {
        let Some(idx) = self.file_index.remove(path) else {
            return;
        };

        let importers: Vec<(PathBuf, EdgeKind)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (self.graph[e.source()].clone(), *e.weight()))
            .collect();

        self.graph.remove_node(idx);
        self.forget_pending_from(path);

        if !importers.is_empty() {
            let waiting = self.pending.entry(path.to_path_buf()).or_default();
            for (from, kind) in importers {
                waiting.entry(from).or_insert(kind);
            }
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.file_index.contains_key(path)
    }

    /// Number of file nodes in the graph.
    pub fn file_count(&self) -> usize {
        self.file_index.len()
    }

    /// Number of dependency edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of unresolved relative references waiting for their target.
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    fn add_node(&mut self, path: &Path) -> NodeIndex {
        if let Some(&existing) = self.file_index.get(path) {
            return existing;
        }
        let idx = self.graph.add_node(path.to_path_buf());
        self.file_index.insert(path.to_path_buf(), idx);
        idx
    }

    /// Add at most one edge per (from, to) pair.
    fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, kind: EdgeKind) {
        if from != to && self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, kind);
        }
    }

    fn link(&mut self, from: &Path, refs: Vec<(PathBuf, EdgeKind)>) {
        let Some(&from_idx) = self.file_index.get(from) else {
            return;
        };
        for (target, kind) in refs {
            match self.file_index.get(&target) {
                Some(&to_idx) => self.add_edge(from_idx, to_idx, kind),
                None => {
                    self.pending
                        .entry(target)
                        .or_default()
                        .entry(from.to_path_buf())
                        .or_insert(kind);
                }
            }
        }
    }

    fn forget_pending_from(&mut self, from: &Path) {
        self.pending.retain(|_, waiting| {
            waiting.remove(from);
            !waiting.is_empty()
        });
    }
}

/// Scan `text` and resolve every relative reference against `path`.
fn resolved_references(path: &Path, text: &str) -> Vec<(PathBuf, EdgeKind)> {
    scan_references(path, text)
        .into_iter()
        .filter_map(|r| resolve_reference(path, &r.specifier).map(|target| (target, r.kind)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;

    fn file(path: &str, text: &str) -> ScannedFile {
        ScannedFile {
            path: PathBuf::from(path),
            checksum: Checksum::from_bytes(text.as_bytes()),
            text: Some(text.to_owned()),
        }
    }

    fn binary(path: &str) -> ScannedFile {
        ScannedFile {
            path: PathBuf::from(path),
            checksum: Checksum::from_bytes(&[0xff, 0x00]),
            text: None,
        }
    }

    fn set(paths: &[&str]) -> BTreeSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_import_creates_dependent() {
        let graph = DependencyGraph::build(&[
            file("main.css", "@import './a.css';"),
            file("a.css", "a { color: red }"),
        ]);
        assert_eq!(graph.lookup(Path::new("a.css")), set(&["main.css"]));
        assert!(graph.lookup(Path::new("main.css")).is_empty());
    }

    #[test]
    fn test_external_and_unresolved_references_dropped() {
        let graph = DependencyGraph::build(&[file(
            "main.css",
            "@import 'https://fonts.example/x.css'; @import 'bare.css'; @import './missing.css';",
        )]);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.pending_count(), 1, "only the relative miss is remembered");
    }

    #[test]
    fn test_duplicate_references_deduplicated() {
        let graph = DependencyGraph::build(&[
            file(
                "main.css",
                "@import url(./a.css);\n@import './a.css';\n.x { background: url(./a.css) }",
            ),
            file("a.css", ""),
        ]);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_cycle_is_single_hop() {
        let graph = DependencyGraph::build(&[
            file("a.css", "@import './b.css';"),
            file("b.css", "@import './a.css';"),
        ]);
        assert_eq!(graph.lookup(Path::new("a.css")), set(&["b.css"]));
        assert_eq!(graph.lookup(Path::new("b.css")), set(&["a.css"]));
    }

    #[test]
    fn test_remove_prunes_edges_both_ways() {
        let mut graph = DependencyGraph::build(&[
            file("chapter.md", "![Photo](./img/photo.png)"),
            file("gallery.md", "[next](./chapter.md)"),
            binary("img/photo.png"),
        ]);
        assert_eq!(graph.lookup(Path::new("img/photo.png")), set(&["chapter.md"]));

        graph.on_file_removed(Path::new("img/photo.png"));
        assert!(!graph.contains(Path::new("img/photo.png")));
        assert!(graph.lookup(Path::new("img/photo.png")).is_empty());
        assert!(graph.references(Path::new("chapter.md")).is_empty());
        assert_eq!(graph.lookup(Path::new("chapter.md")), set(&["gallery.md"]));
    }

    #[test]
    fn test_readded_file_relinks_pending_reference() {
        let mut graph = DependencyGraph::build(&[
            file("chapter.md", "![Photo](./img/photo.png)"),
            binary("img/photo.png"),
        ]);
        graph.on_file_removed(Path::new("img/photo.png"));
        assert_eq!(graph.pending_count(), 1);

        graph.on_file_added(Path::new("img/photo.png"), None);
        assert_eq!(graph.lookup(Path::new("img/photo.png")), set(&["chapter.md"]));
        assert_eq!(graph.pending_count(), 0);
    }

    #[test]
    fn test_added_file_scans_only_itself() {
        let mut graph = DependencyGraph::build(&[file("a.css", "")]);
        graph.on_file_added(Path::new("main.css"), Some("@import './a.css';"));
        assert_eq!(graph.lookup(Path::new("a.css")), set(&["main.css"]));
    }

    #[test]
    fn test_changed_file_rescans_references() {
        let mut graph = DependencyGraph::build(&[
            file("main.css", "@import './a.css';"),
            file("a.css", ""),
            file("b.css", ""),
        ]);
        graph.on_file_changed(Path::new("main.css"), Some("@import './b.css';"));
        assert!(graph.lookup(Path::new("a.css")).is_empty());
        assert_eq!(graph.lookup(Path::new("b.css")), set(&["main.css"]));
    }

    #[test]
    fn test_changed_file_drops_stale_pending() {
        let mut graph = DependencyGraph::build(&[file("main.css", "@import './later.css';")]);
        assert_eq!(graph.pending_count(), 1);
        graph.on_file_changed(Path::new("main.css"), Some(""));
        assert_eq!(graph.pending_count(), 0);

        graph.on_file_added(Path::new("later.css"), Some(""));
        assert!(graph.lookup(Path::new("later.css")).is_empty());
    }

    #[test]
    fn test_edge_kinds_recorded() {
        let graph = DependencyGraph::build(&[
            file("index.json", r#"{ "chapters": ["./one.md"], "style": "./main.css" }"#),
            file("one.md", ""),
            file("main.css", ""),
        ]);
        assert_eq!(
            graph.references(Path::new("index.json")),
            vec![
                (PathBuf::from("main.css"), EdgeKind::ConfigPath),
                (PathBuf::from("one.md"), EdgeKind::ConfigPath),
            ]
        );
    }
}
