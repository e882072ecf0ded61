mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, OutputFormat};
use pack_reload::graph::DependencyGraph;
use pack_reload::walker::{IgnoreMatcher, walk_baseline};
use pack_reload::{
    ManifestRenderer, OverflowPolicy, ReloadConfig, ReloadNotification, WatchOptions,
    WatchSession,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            path,
            debounce_ms,
            render_timeout_ms,
            ignore,
            no_initial_render,
            format,
        } => {
            let mut options =
                WatchOptions::from_config(&ReloadConfig::load(&path)).with_ignore_patterns(ignore);
            if let Some(ms) = debounce_ms {
                options = options.with_debounce(Duration::from_millis(ms));
            }
            if let Some(ms) = render_timeout_ms {
                options = options.with_render_timeout(Duration::from_millis(ms));
            }
            if no_initial_render {
                options = options.with_initial_render(false);
            }
            watch(&path, options, format).await?;
        }
        Commands::Deps { path, file, format } => {
            deps(&path, &file, format)?;
        }
    }

    Ok(())
}

async fn watch(path: &Path, options: WatchOptions, format: OutputFormat) -> Result<()> {
    let session = WatchSession::start(path, options, Arc::new(ManifestRenderer))
        .await
        .with_context(|| format!("failed to watch {}", path.display()))?;
    let mut sub = session.subscribe(256, OverflowPolicy::DropOldest);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notification = sub.recv() => match notification {
                Some(n) => print_notification(&n, format)?,
                None => break,
            },
        }
    }

    let stats = session.stats();
    session.stop().await;
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!(
            "{} reload(s): {} hot, {} full, {} failed",
            stats.total_reloads, stats.hot_reloads, stats.full_reloads, stats.failed_reloads
        );
    }
    Ok(())
}

fn print_notification(notification: &ReloadNotification, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(notification)?),
        OutputFormat::Compact => match notification {
            ReloadNotification::Completed(done) => println!(
                "{} reload: {} file(s) in {}ms",
                done.strategy,
                done.affected_files.len(),
                done.duration_ms
            ),
            ReloadNotification::Failed(failed) => println!(
                "reload failed: {} ({} file(s))",
                failed.error,
                failed.affected_files.len()
            ),
        },
    }
    Ok(())
}

fn deps(path: &Path, file: &Path, format: OutputFormat) -> Result<()> {
    let root = path
        .canonicalize()
        .with_context(|| format!("cannot open {}", path.display()))?;
    let options = WatchOptions::from_config(&ReloadConfig::load(&root));
    let matcher = Arc::new(IgnoreMatcher::new(&root, &options.ignore_patterns)?);
    let baseline = walk_baseline(&root, &matcher)?;
    let graph = DependencyGraph::build(&baseline);

    let dependents = graph.lookup(file);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&dependents)?),
        OutputFormat::Compact => {
            if dependents.is_empty() {
                println!("no files reference {}", file.display());
            }
            for dependent in &dependents {
                println!("{}", dependent.display());
            }
        }
    }
    Ok(())
}
