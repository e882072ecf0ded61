use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Semantic kind of a changed file, derived from its path alone.
///
/// Plain enum, cheap to copy, ordered so that sets of kinds iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Configuration,
    Styles,
    Layout,
    Assets,
    Content,
    Unknown,
}

impl ChangeKind {
    /// Kinds that can be patched into a live preview without regeneration.
    pub fn is_hot_reloadable(self) -> bool {
        matches!(
            self,
            ChangeKind::Styles | ChangeKind::Assets | ChangeKind::Content
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Configuration => "configuration",
            ChangeKind::Styles => "styles",
            ChangeKind::Layout => "layout",
            ChangeKind::Assets => "assets",
            ChangeKind::Content => "content",
            ChangeKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one changed path. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeClassification {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub hot_reloadable: bool,
}

/// File names that configure the whole project.
const CONFIG_FILES: &[&str] = &[
    "package.json",
    "manifest.json",
    "config.json",
    "pack.json",
    "pack-reload.toml",
    ".env",
];

/// File names that describe document structure.
const LAYOUT_FILES: &[&str] = &["index.json", "layout.json", "toc.json", "structure.json"];

/// Directory names whose files are always layout.
const LAYOUT_DIRS: &[&str] = &["layouts", "templates", "_layouts", "partials"];

const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "ini", "env"];
const LAYOUT_EXTENSIONS: &[&str] = &["json", "html", "htm", "hbs", "njk", "liquid", "xhtml"];
const STYLE_EXTENSIONS: &[&str] = &["css", "scss", "sass", "less", "styl"];
const ASSET_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico", "bmp", "woff", "woff2", "ttf",
    "otf", "eot", "mp3", "mp4", "webm", "wav", "ogg",
];
const CONTENT_EXTENSIONS: &[&str] = &["md", "markdown", "mdx", "txt", "rst", "adoc"];

/// Map a path to its semantic change kind.
///
/// Precedence: exact configuration file names, `*.config.*` names, exact layout file
/// names, layout directories, then extension tables. Anything unmatched is
/// [`ChangeKind::Unknown`], which always forces a full reload.
pub fn classify_path(path: &Path) -> ChangeKind {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    if CONFIG_FILES.contains(&file_name.as_str()) || file_name.contains(".config.") {
        return ChangeKind::Configuration;
    }
    if LAYOUT_FILES.contains(&file_name.as_str()) {
        return ChangeKind::Layout;
    }
    let in_layout_dir = path.parent().is_some_and(|parent| {
        parent
            .components()
            .any(|c| c.as_os_str().to_str().is_some_and(|s| LAYOUT_DIRS.contains(&s)))
    });
    if in_layout_dir {
        return ChangeKind::Layout;
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let ext = ext.as_str();

    if CONFIG_EXTENSIONS.contains(&ext) {
        ChangeKind::Configuration
    } else if LAYOUT_EXTENSIONS.contains(&ext) {
        ChangeKind::Layout
    } else if STYLE_EXTENSIONS.contains(&ext) {
        ChangeKind::Styles
    } else if ASSET_EXTENSIONS.contains(&ext) {
        ChangeKind::Assets
    } else if CONTENT_EXTENSIONS.contains(&ext) {
        ChangeKind::Content
    } else {
        ChangeKind::Unknown
    }
}

/// Classify a path into a full [`ChangeClassification`].
pub fn classify(path: &Path) -> ChangeClassification {
    let kind = classify_path(path);
    ChangeClassification {
        path: path.to_path_buf(),
        kind,
        hot_reloadable: kind.is_hot_reloadable(),
    }
}
