//! Heuristic reference scanners.
//!
//! These are regex scans, not per-language parsers. They over-approximate in comments
//! and strings, which only ever widens the set of dependents that get reloaded.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::edge::EdgeKind;
use crate::classify::{ChangeKind, classify_path};

/// A raw reference found in a file, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub specifier: String,
    pub kind: EdgeKind,
}

// ---------------------------------------------------------------------------
// Pattern cache (compiled once via OnceLock)
// ---------------------------------------------------------------------------

static IMPORT_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
static ASSET_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
static CONFIG_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
}

fn import_patterns() -> &'static [Regex] {
    IMPORT_PATTERNS.get_or_init(|| {
        compile(&[
            // @import "./a.css"; @use '../mixins'; @forward "./x"
            r#"@(?:import|use|forward)\s+(?:url\(\s*)?["']([^"']+)["']"#,
            // @import url(./a.css)
            r#"@import\s+url\(\s*([^"'()\s]+)\s*\)"#,
            // import x from "./x"; import "./side-effect"; export * from "./y"
            r#"\b(?:import|export)\s+(?:[^"';]*?\s+from\s+)?["']([^"']+)["']"#,
            // require("./x"); import("./x")
            r#"\b(?:require|import)\s*\(\s*["']([^"']+)["']\s*\)"#,
        ])
    })
}

fn asset_patterns() -> &'static [Regex] {
    ASSET_PATTERNS.get_or_init(|| {
        compile(&[
            // url(./img/a.png), url("./font.woff2")
            r#"url\(\s*["']?([^"'()\s]+)["']?\s*\)"#,
            // src="./a.png", href='../b.css', poster=, data=
            r#"\b(?:src|href|poster|data)\s*=\s*["']([^"']+)["']"#,
            // ![alt](./img/a.png "title"), [text](../other.md)
            r#"!?\[[^\]]*\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#,
        ])
    })
}

fn config_patterns() -> &'static [Regex] {
    CONFIG_PATTERNS.get_or_init(|| {
        compile(&[
            // "./chapters/one.md" anywhere in JSON/TOML/YAML
            r#"["'](\.\.?/[^"'\s]+)["']"#,
            // YAML unquoted value:  cover: ./img/cover.png
            r#"(?m):\s*(\.\.?/[^\s#]+)\s*$"#,
        ])
    })
}

fn scan_with(patterns: &[Regex], text: &str, kind: EdgeKind, out: &mut Vec<Reference>) {
    for re in patterns {
        for caps in re.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                out.push(Reference {
                    specifier: m.as_str().to_owned(),
                    kind,
                });
            }
        }
    }
}

/// Import-style references (`@import`, `import ... from`, `require`).
pub fn scan_imports(text: &str) -> Vec<Reference> {
    let mut out = Vec::new();
    scan_with(import_patterns(), text, EdgeKind::Import, &mut out);
    out
}

/// Asset-URL references (`url()`, `src=`/`href=`, Markdown links).
pub fn scan_asset_urls(text: &str) -> Vec<Reference> {
    let mut out = Vec::new();
    scan_with(asset_patterns(), text, EdgeKind::AssetUrl, &mut out);
    out
}

/// Config-path references (quoted or YAML-unquoted relative path values).
pub fn scan_config_paths(text: &str) -> Vec<Reference> {
    let mut out = Vec::new();
    scan_with(config_patterns(), text, EdgeKind::ConfigPath, &mut out);
    out
}

/// Run every scanner applicable to `path` over its text.
///
/// The config-path scanner runs only on configuration and layout files, where any
/// quoted relative path is a reference. Results keep scanner order and may repeat.
pub fn scan_references(path: &Path, text: &str) -> Vec<Reference> {
    let mut refs = scan_imports(text);
    refs.extend(scan_asset_urls(text));
    if matches!(
        classify_path(path),
        ChangeKind::Configuration | ChangeKind::Layout
    ) {
        refs.extend(scan_config_paths(text));
    }
    refs
}

/// Returns true for `./x` and `../x` specifiers, the only ones that are resolved.
pub fn is_relative_specifier(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

/// Resolve a relative specifier declared in `from` (root-relative) to a root-relative path.
///
/// Query strings and fragments are dropped. Returns `None` for bare or external
/// specifiers and for paths that climb out of the project root.
pub fn resolve_reference(from: &Path, specifier: &str) -> Option<PathBuf> {
    if !is_relative_specifier(specifier) {
        return None;
    }
    let cleaned = specifier
        .split(['?', '#'])
        .next()
        .unwrap_or(specifier);

    let base = from.parent().unwrap_or(Path::new(""));
    let mut resolved = PathBuf::new();
    for component in base.join(cleaned).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::Normal(part) => resolved.push(part),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if resolved.as_os_str().is_empty() || resolved == from {
        None
    } else {
        Some(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specifiers(refs: &[Reference]) -> Vec<&str> {
        refs.iter().map(|r| r.specifier.as_str()).collect()
    }

    #[test]
    fn test_css_imports() {
        let css = "@import './a.css';\n@import url(\"../base.css\");\n@import url(./reset.css);\n@use \"./mixins\";";
        let refs = scan_imports(css);
        let specs = specifiers(&refs);
        assert!(specs.contains(&"./a.css"));
        assert!(specs.contains(&"../base.css"));
        assert!(specs.contains(&"./reset.css"));
        assert!(specs.contains(&"./mixins"));
        assert!(refs.iter().all(|r| r.kind == EdgeKind::Import));
    }

    #[test]
    fn test_script_imports() {
        let js = "import x from './x.js';\nimport './side.js';\nconst y = require(\"../y\");\nconst z = await import('./z.js');\nimport React from 'react';";
        let specs: Vec<String> = scan_imports(js).into_iter().map(|r| r.specifier).collect();
        for want in ["./x.js", "./side.js", "../y", "./z.js", "react"] {
            assert!(specs.iter().any(|s| s == want), "missing {want}: {specs:?}");
        }
    }

    #[test]
    fn test_asset_urls() {
        let text = "body { background: url('./img/bg.png'); }\n<img src=\"./img/photo.png\">\n![Cover](../cover.jpg \"cover\")\n[Next](./two.md)";
        let refs = scan_asset_urls(text);
        let specs = specifiers(&refs);
        for want in ["./img/bg.png", "./img/photo.png", "../cover.jpg", "./two.md"] {
            assert!(specs.contains(&want), "missing {want}: {specs:?}");
        }
        assert!(refs.iter().all(|r| r.kind == EdgeKind::AssetUrl));
    }

    #[test]
    fn test_config_paths() {
        let json = r#"{ "chapters": ["./one.md", "./two.md"], "name": "book", "theme": "../theme.css" }"#;
        let specs: Vec<String> = scan_config_paths(json)
            .into_iter()
            .map(|r| r.specifier)
            .collect();
        assert_eq!(specs, vec!["./one.md", "./two.md", "../theme.css"]);

        let yaml = "cover: ./img/cover.png\ntitle: Book\n";
        let specs: Vec<String> = scan_config_paths(yaml)
            .into_iter()
            .map(|r| r.specifier)
            .collect();
        assert_eq!(specs, vec!["./img/cover.png"]);
    }

    #[test]
    fn test_config_scanner_only_for_structural_files() {
        let text = r#"see "./a.md" for details"#;
        let in_markdown = scan_references(Path::new("notes.md"), text);
        assert!(in_markdown.iter().all(|r| r.kind != EdgeKind::ConfigPath));

        let in_layout = scan_references(Path::new("index.json"), text);
        assert!(in_layout.iter().any(|r| r.kind == EdgeKind::ConfigPath));
    }

    #[test]
    fn test_resolve_relative_only() {
        let from = Path::new("styles/main.css");
        assert_eq!(
            resolve_reference(from, "./a.css"),
            Some(PathBuf::from("styles/a.css"))
        );
        assert_eq!(
            resolve_reference(from, "../img/photo.png?v=2#frag"),
            Some(PathBuf::from("img/photo.png"))
        );
        assert_eq!(resolve_reference(from, "a.css"), None);
        assert_eq!(resolve_reference(from, "react"), None);
        assert_eq!(resolve_reference(from, "https://cdn.example/x.css"), None);
        assert_eq!(resolve_reference(from, "/abs.css"), None);
    }

    #[test]
    fn test_resolve_rejects_escaping_root() {
        assert_eq!(resolve_reference(Path::new("main.css"), "../outside.css"), None);
        assert_eq!(resolve_reference(Path::new("a/b.md"), "../../x.md"), None);
    }

    #[test]
    fn test_resolve_ignores_self_reference() {
        assert_eq!(resolve_reference(Path::new("a.md"), "./a.md#top"), None);
    }
}
