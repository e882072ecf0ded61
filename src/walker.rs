use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::checksum::Checksum;
use crate::error::{Error, Result};

/// Path components that are never watched, regardless of configuration.
const BUILTIN_IGNORED: &[&str] = &[".git", "node_modules"];

/// Files larger than this are fingerprinted but never scanned for references.
const MAX_SCAN_BYTES: usize = 2 * 1024 * 1024;

/// One user-supplied ignore rule.
#[derive(Debug, Clone)]
enum IgnoreRule {
    /// `dist*`: path or any component starts with the prefix.
    Prefix(String),
    /// `*.tmp`: path or any component ends with the suffix.
    Suffix(String),
    /// Any other pattern with wildcards, matched against the path and each component.
    Glob(glob::Pattern),
    /// No wildcards: plain substring exclude on the relative path.
    Substring(String),
}

impl IgnoreRule {
    fn parse(pattern: &str) -> Result<Self> {
        let has_wild = |s: &str| s.contains(['*', '?', '[']);
        if let Some(prefix) = pattern.strip_suffix('*')
            && !prefix.is_empty()
            && !has_wild(prefix)
        {
            return Ok(Self::Prefix(prefix.to_owned()));
        }
        if let Some(suffix) = pattern.strip_prefix('*')
            && !suffix.is_empty()
            && !has_wild(suffix)
        {
            return Ok(Self::Suffix(suffix.to_owned()));
        }
        if has_wild(pattern) {
            return glob::Pattern::new(pattern)
                .map(Self::Glob)
                .map_err(|source| Error::Pattern {
                    pattern: pattern.to_owned(),
                    source,
                });
        }
        Ok(Self::Substring(pattern.to_owned()))
    }

    fn matches(&self, rel: &str, components: &[&str]) -> bool {
        match self {
            Self::Prefix(p) => {
                rel.starts_with(p.as_str()) || components.iter().any(|c| c.starts_with(p.as_str()))
            }
            Self::Suffix(s) => {
                rel.ends_with(s.as_str()) || components.iter().any(|c| c.ends_with(s.as_str()))
            }
            Self::Glob(g) => g.matches(rel) || components.iter().any(|c| g.matches(c)),
            Self::Substring(s) => rel.contains(s.as_str()),
        }
    }
}

/// Decides which root-relative paths are invisible to the rest of the pipeline.
///
/// Combines built-in exclusions, the root `.gitignore`, and user patterns.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    gitignore: Gitignore,
    rules: Vec<IgnoreRule>,
}

impl IgnoreMatcher {
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self> {
        let rules = patterns
            .iter()
            .map(|p| IgnoreRule::parse(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            gitignore: build_gitignore_matcher(root),
            rules,
        })
    }

    /// A matcher with built-in exclusions only.
    pub fn empty() -> Self {
        Self {
            gitignore: Gitignore::empty(),
            rules: Vec::new(),
        }
    }

    /// Returns true if the root-relative `rel` path should be hidden.
    pub fn is_ignored(&self, rel: &Path, is_dir: bool) -> bool {
        let components: Vec<&str> = rel
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();

        if components.iter().any(|c| BUILTIN_IGNORED.contains(c)) {
            return true;
        }

        let rel_str = components.join("/");
        if self.rules.iter().any(|r| r.matches(&rel_str, &components)) {
            return true;
        }

        !rel.as_os_str().is_empty()
            && self
                .gitignore
                .matched_path_or_any_parents(rel, is_dir)
                .is_ignore()
    }
}

/// Build a Gitignore matcher from the project root's .gitignore file.
/// If no .gitignore exists, returns an empty matcher that matches nothing.
fn build_gitignore_matcher(root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    let gitignore_path = root.join(".gitignore");
    if gitignore_path.exists()
        && let Some(err) = builder.add(&gitignore_path)
    {
        warn!(error = %err, "ignoring unreadable .gitignore");
    }
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

/// A file captured by the baseline walk.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Root-relative path.
    pub path: PathBuf,
    pub checksum: Checksum,
    /// UTF-8 contents when the file is text and small enough to scan for references.
    pub text: Option<String>,
}

impl ScannedFile {
    /// Read and fingerprint `root/rel`. Returns `None` when the file cannot be read.
    pub fn read(root: &Path, rel: &Path) -> Option<Self> {
        let bytes = match std::fs::read(root.join(rel)) {
            Ok(b) => b,
            Err(err) => {
                warn!(path = %rel.display(), error = %err, "skipping unreadable file");
                return None;
            }
        };
        let checksum = Checksum::from_bytes(&bytes);
        let text = if bytes.len() <= MAX_SCAN_BYTES {
            String::from_utf8(bytes).ok()
        } else {
            None
        };
        Some(Self {
            path: rel.to_path_buf(),
            checksum,
            text,
        })
    }
}

/// Convert an absolute event path into a root-relative one. `None` when outside the root.
pub fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    let rel = path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        None
    } else {
        Some(rel.to_path_buf())
    }
}

/// Verify the root is a readable directory. Failure is fatal for a session.
pub fn check_root(root: &Path) -> Result<()> {
    std::fs::read_dir(root)
        .map(|_| ())
        .map_err(|source| Error::RootUnreadable {
            path: root.to_path_buf(),
            source,
        })
}

/// Collect root-relative paths of every non-ignored file under `start` (a directory
/// inside `root`). Unreadable entries are logged and skipped.
pub fn collect_files(root: &Path, start: &Path, matcher: &Arc<IgnoreMatcher>) -> Vec<PathBuf> {
    let filter_root = root.to_path_buf();
    let filter_matcher = Arc::clone(matcher);

    let walker = ignore::WalkBuilder::new(start)
        .standard_filters(true)
        // Read .gitignore files even when the directory is not inside a git repository.
        .require_git(false)
        .filter_entry(move |entry| match relative_to(&filter_root, entry.path()) {
            Some(rel) => {
                let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                !filter_matcher.is_ignored(&rel, is_dir)
            }
            None => true,
        })
        .build();

    let mut out = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "skipping entry during walk");
                continue;
            }
        };

        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        if let Some(rel) = relative_to(root, entry.path()) {
            out.push(rel);
        }
    }
    out.sort();
    out
}

/// Synchronous baseline walk: every watched file with its checksum and scannable text.
///
/// Runs before the event stream is consumed so the checksum store and the dependency
/// graph are built from the same snapshot.
pub fn walk_baseline(root: &Path, matcher: &Arc<IgnoreMatcher>) -> Result<Vec<ScannedFile>> {
    check_root(root)?;

    let paths = collect_files(root, root, matcher);
    let files: Vec<ScannedFile> = paths
        .par_iter()
        .filter_map(|rel| ScannedFile::read(root, rel))
        .collect();

    debug!(root = %root.display(), files = files.len(), "baseline walk complete");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tmp() -> TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    fn matcher(root: &Path, patterns: &[&str]) -> IgnoreMatcher {
        let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        IgnoreMatcher::new(root, &patterns).unwrap()
    }

    #[test]
    fn test_prefix_suffix_and_substring_rules() {
        let dir = tmp();
        let m = matcher(dir.path(), &["dist*", "*.tmp", "draft"]);

        assert!(m.is_ignored(Path::new("dist/out.css"), false));
        assert!(m.is_ignored(Path::new("docs/dist-old/a.md"), false));
        assert!(m.is_ignored(Path::new("notes.tmp"), false));
        assert!(m.is_ignored(Path::new("chapters/draft-2.md"), false));
        assert!(!m.is_ignored(Path::new("chapters/final.md"), false));
        assert!(!m.is_ignored(Path::new("a.css"), false));
    }

    #[test]
    fn test_glob_rule() {
        let dir = tmp();
        let m = matcher(dir.path(), &["cache/**/*.bin"]);
        assert!(m.is_ignored(Path::new("cache/x/y.bin"), false));
        assert!(!m.is_ignored(Path::new("cache/x/y.txt"), false));
    }

    #[test]
    fn test_builtin_exclusions() {
        let m = IgnoreMatcher::empty();
        assert!(m.is_ignored(Path::new(".git/HEAD"), false));
        assert!(m.is_ignored(Path::new("node_modules/pkg/index.css"), false));
        assert!(!m.is_ignored(Path::new("styles/index.css"), false));
    }

    #[test]
    fn test_gitignore_respected() {
        let dir = tmp();
        fs::write(dir.path().join(".gitignore"), "build/\n*.log\n").unwrap();
        let m = matcher(dir.path(), &[]);
        assert!(m.is_ignored(Path::new("build/a.css"), false));
        assert!(m.is_ignored(Path::new("debug.log"), false));
        assert!(!m.is_ignored(Path::new("a.css"), false));
    }

    #[test]
    fn test_invalid_glob_is_an_error() {
        let dir = tmp();
        let result = IgnoreMatcher::new(dir.path(), &["a[".to_string()]);
        assert!(matches!(result, Err(Error::Pattern { .. })));
    }

    #[test]
    fn test_walk_baseline_collects_checksums_and_text() {
        let dir = tmp();
        fs::create_dir_all(dir.path().join("img")).unwrap();
        fs::write(dir.path().join("main.css"), "@import './a.css';").unwrap();
        fs::write(dir.path().join("a.css"), "a {}").unwrap();
        fs::write(dir.path().join("img/photo.png"), [0x89u8, 0x50, 0xff, 0xfe]).unwrap();
        fs::write(dir.path().join("scratch.tmp"), "x").unwrap();

        let m = Arc::new(matcher(dir.path(), &["*.tmp"]));
        let files = walk_baseline(dir.path(), &m).unwrap();
        let names: Vec<&Path> = files.iter().map(|f| f.path.as_path()).collect();

        assert!(names.contains(&Path::new("main.css")));
        assert!(names.contains(&Path::new("a.css")));
        assert!(names.contains(&Path::new("img/photo.png")));
        assert!(!names.contains(&Path::new("scratch.tmp")));

        let png = files
            .iter()
            .find(|f| f.path == Path::new("img/photo.png"))
            .unwrap();
        assert!(png.text.is_none(), "binary files are not scanned");
    }

    #[test]
    fn test_walk_baseline_unreadable_root_is_fatal() {
        let dir = tmp();
        let missing = dir.path().join("does-not-exist");
        let m = Arc::new(IgnoreMatcher::empty());
        assert!(matches!(
            walk_baseline(&missing, &m),
            Err(Error::RootUnreadable { .. })
        ));
    }

    #[test]
    fn test_relative_to() {
        let root = Path::new("/proj");
        assert_eq!(
            relative_to(root, Path::new("/proj/a/b.css")),
            Some(PathBuf::from("a/b.css"))
        );
        assert_eq!(relative_to(root, Path::new("/proj")), None);
        assert_eq!(relative_to(root, Path::new("/other/x")), None);
    }
}
