//! Turning reload plans into concrete preview updates.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::debug;

use crate::checksum::{Checksum, ChecksumStore};
use crate::classify::{ChangeKind, classify_path};
use crate::error::{Error, Result};
use crate::impact::{ReloadPlan, ReloadStrategy};

/// One file as the renderer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub checksum: Checksum,
    pub kind: ChangeKind,
}

/// Snapshot of the project handed to the renderer. Entries are sorted by path, so equal
/// project states produce equal manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub root: PathBuf,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn from_store(root: &Path, store: &ChecksumStore) -> Self {
        Self {
            root: root.to_path_buf(),
            entries: store
                .iter()
                .map(|f| ManifestEntry {
                    path: f.path.clone(),
                    checksum: f.last_checksum,
                    kind: classify_path(&f.path),
                })
                .collect(),
        }
    }
}

/// Rendered preview content produced by a [`Renderer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderOutput {
    pub body: String,
}

/// Input for one full render: the project snapshot plus the files that triggered it.
///
/// `affected_files` is a hint; it is empty for the initial render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderRequest {
    pub manifest: Manifest,
    pub affected_files: Vec<PathBuf>,
}

/// The external component that regenerates the whole preview.
///
/// Implementations must be idempotent: the same request yields the same output, and a
/// failed call has no side effects. Calls run on a blocking thread and are bounded by the
/// session's render timeout.
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, request: &RenderRequest) -> Result<RenderOutput>;
}

/// Renders the manifest itself as pretty JSON. Used by the command-line host and as a
/// deterministic renderer in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestRenderer;

impl Renderer for ManifestRenderer {
    fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
        let body = serde_json::to_string_pretty(&request.manifest)
            .map_err(|e| Error::Render(e.to_string()))?;
        Ok(RenderOutput { body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    StylePatch,
    AssetReference,
    ContentFragment,
}

/// An order-independent patch for a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    pub path: PathBuf,
    pub kind: FragmentKind,
    /// Style or content text, or a cache-busted asset reference.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdatePayload {
    Fragment(Fragment),
    Document(RenderOutput),
}

/// A single update, consumed exactly once by the applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewUpdate {
    pub strategy: ReloadStrategy,
    pub payload: UpdatePayload,
    pub timestamp: SystemTime,
}

/// Build one fragment per affected file of a hot plan.
///
/// Returns the first path whose fragment could not be produced (the file vanished or is
/// no longer text); the caller escalates to a full reload.
pub fn hot_updates(
    plan: &ReloadPlan,
    root: &Path,
    store: &ChecksumStore,
) -> std::result::Result<Vec<PreviewUpdate>, PathBuf> {
    let timestamp = SystemTime::now();
    let mut updates = Vec::with_capacity(plan.affected_files.len());

    for path in &plan.affected_files {
        let fragment = match classify_path(path) {
            ChangeKind::Styles => read_text(root, path).map(|body| Fragment {
                path: path.clone(),
                kind: FragmentKind::StylePatch,
                body,
            }),
            ChangeKind::Content => read_text(root, path).map(|body| Fragment {
                path: path.clone(),
                kind: FragmentKind::ContentFragment,
                body,
            }),
            ChangeKind::Assets => store.get(path).map(|f| Fragment {
                path: path.clone(),
                kind: FragmentKind::AssetReference,
                body: format!("{}?v={}", web_path(path), f.last_checksum),
            }),
            _ => None,
        };

        match fragment {
            Some(fragment) => updates.push(PreviewUpdate {
                strategy: ReloadStrategy::Hot,
                payload: UpdatePayload::Fragment(fragment),
                timestamp,
            }),
            None => return Err(path.clone()),
        }
    }
    Ok(updates)
}

/// Invoke the renderer for a full reload, bounded by `timeout`.
///
/// Expiry is reported as [`Error::RenderTimeout`]; it is not retried.
pub async fn full_update(
    renderer: Arc<dyn Renderer>,
    request: RenderRequest,
    timeout: Duration,
) -> Result<PreviewUpdate> {
    let entries = request.manifest.entries.len();
    let task = tokio::task::spawn_blocking(move || renderer.render(&request));

    let output = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join_err)) => {
            return Err(Error::Render(format!("renderer panicked: {join_err}")));
        }
        Err(_) => return Err(Error::RenderTimeout(timeout)),
    };

    debug!(entries, bytes = output.body.len(), "full render complete");
    Ok(PreviewUpdate {
        strategy: ReloadStrategy::Full,
        payload: UpdatePayload::Document(output),
        timestamp: SystemTime::now(),
    })
}

fn read_text(root: &Path, rel: &Path) -> Option<String> {
    std::fs::read_to_string(root.join(rel)).ok()
}

/// Forward-slash form of a relative path, as used in preview references.
fn web_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::impact::analyze;
    use crate::scheduler::ChangeBatch;
    use crate::watcher::event::{RawChangeEvent, RawKind};
    use std::fs;

    struct SlowRenderer(Duration);

    impl Renderer for SlowRenderer {
        fn render(&self, _request: &RenderRequest) -> Result<RenderOutput> {
            std::thread::sleep(self.0);
            Ok(RenderOutput {
                body: "late".into(),
            })
        }
    }

    struct FailingRenderer;

    impl Renderer for FailingRenderer {
        fn render(&self, _request: &RenderRequest) -> Result<RenderOutput> {
            Err(Error::Render("template missing".into()))
        }
    }

    /// Echoes the affected-file hint.
    struct HintRenderer;

    impl Renderer for HintRenderer {
        fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
            let names: Vec<String> = request
                .affected_files
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            Ok(RenderOutput {
                body: names.join(","),
            })
        }
    }

    fn empty_request() -> RenderRequest {
        RenderRequest {
            manifest: Manifest {
                root: PathBuf::from("/proj"),
                entries: Vec::new(),
            },
            affected_files: Vec::new(),
        }
    }

    fn plan_for(paths: &[&str]) -> ReloadPlan {
        let batch = ChangeBatch::from_events(
            paths
                .iter()
                .map(|p| RawChangeEvent::new(*p, RawKind::Modified)),
        );
        analyze(&batch, &DependencyGraph::new()).expect("plan")
    }

    fn store_with(root: &Path, paths: &[&str]) -> ChecksumStore {
        let mut store = ChecksumStore::new();
        for p in paths {
            let bytes = fs::read(root.join(p)).unwrap();
            store.insert(PathBuf::from(p), Checksum::from_bytes(&bytes));
        }
        store
    }

    #[test]
    fn test_hot_updates_one_fragment_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("img")).unwrap();
        fs::write(root.join("a.css"), "a { color: red }").unwrap();
        fs::write(root.join("intro.md"), "# Intro").unwrap();
        fs::write(root.join("img/p.png"), [1u8, 2, 3]).unwrap();
        let store = store_with(root, &["a.css", "intro.md", "img/p.png"]);

        let plan = plan_for(&["a.css", "intro.md", "img/p.png"]);
        let updates = hot_updates(&plan, root, &store).expect("hot updates");
        assert_eq!(updates.len(), 3);
        assert!(updates.iter().all(|u| u.strategy == ReloadStrategy::Hot));

        let kinds: Vec<FragmentKind> = updates
            .iter()
            .filter_map(|u| match &u.payload {
                UpdatePayload::Fragment(f) => Some(f.kind),
                UpdatePayload::Document(_) => None,
            })
            .collect();
        assert!(kinds.contains(&FragmentKind::StylePatch));
        assert!(kinds.contains(&FragmentKind::ContentFragment));
        assert!(kinds.contains(&FragmentKind::AssetReference));

        let asset = updates
            .iter()
            .find_map(|u| match &u.payload {
                UpdatePayload::Fragment(f) if f.kind == FragmentKind::AssetReference => Some(f),
                _ => None,
            })
            .unwrap();
        assert!(asset.body.starts_with("img/p.png?v="));
    }

    #[test]
    fn test_hot_updates_report_vanished_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChecksumStore::new();
        let plan = plan_for(&["gone.css"]);
        assert_eq!(
            hot_updates(&plan, dir.path(), &store),
            Err(PathBuf::from("gone.css"))
        );
    }

    #[test]
    fn test_manifest_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("b.md"), "b").unwrap();
        fs::write(root.join("a.css"), "a").unwrap();
        let store = store_with(root, &["b.md", "a.css"]);

        let m1 = Manifest::from_store(root, &store);
        let m2 = Manifest::from_store(root, &store);
        assert_eq!(m1, m2);
        assert_eq!(m1.entries[0].path, PathBuf::from("a.css"));
    }

    #[tokio::test]
    async fn test_full_update_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.json"), "{}").unwrap();
        let store = store_with(dir.path(), &["index.json"]);
        let request = RenderRequest {
            manifest: Manifest::from_store(dir.path(), &store),
            affected_files: vec![PathBuf::from("index.json")],
        };
        let renderer: Arc<dyn Renderer> = Arc::new(ManifestRenderer);

        let first = full_update(renderer.clone(), request.clone(), Duration::from_secs(5))
            .await
            .unwrap();
        let second = full_update(renderer, request, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(first.payload, second.payload);
        assert_eq!(first.strategy, ReloadStrategy::Full);
    }

    #[tokio::test]
    async fn test_full_update_times_out() {
        let renderer: Arc<dyn Renderer> = Arc::new(SlowRenderer(Duration::from_millis(500)));
        let result = full_update(renderer, empty_request(), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::RenderTimeout(_))));
    }

    #[tokio::test]
    async fn test_full_update_propagates_render_error() {
        let result =
            full_update(Arc::new(FailingRenderer), empty_request(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Render(msg)) if msg == "template missing"));
    }

    #[tokio::test]
    async fn test_full_update_passes_affected_files_to_renderer() {
        let request = RenderRequest {
            affected_files: vec![PathBuf::from("index.json"), PathBuf::from("a.css")],
            ..empty_request()
        };
        let update = full_update(Arc::new(HintRenderer), request, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            update.payload,
            UpdatePayload::Document(RenderOutput {
                body: "index.json,a.css".into()
            })
        );
    }
}
