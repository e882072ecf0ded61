use serde::Serialize;

/// The kind of directed edge between two files in the dependency graph.
///
/// Every edge runs from the declaring file to the file it references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// `@import`, `@use`, `import ... from`, `require(...)`.
    Import,
    /// `url(...)`, `src=`/`href=` attributes, Markdown links and images.
    AssetUrl,
    /// Quoted relative path values inside configuration and layout files.
    ConfigPath,
}
