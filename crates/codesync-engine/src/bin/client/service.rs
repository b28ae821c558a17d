use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use codesync_engine::signals::shutdown_signal;
use codesync_engine::watcher::{mark_dirty, next_burst};
use codesync_engine::{
    ClientConfig, HttpTransport, ProjectWatcher, SyncClient, SyncMode, SyncReport,
};
use tracing::{error, info, warn};

use super::cli::Args;

/// Project ids allow alphanumerics, `-` and `.`; everything else becomes `-`
fn default_project_id(root: &Path) -> String {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect();
    if id.is_empty() { "project".to_string() } else { id }
}

fn build_client(args: &Args, path: &Path) -> Result<SyncClient> {
    let root = path
        .canonicalize()
        .with_context(|| format!("Project path does not exist: {}", path.display()))?;
    let project_id = args
        .project
        .clone()
        .unwrap_or_else(|| default_project_id(&root));
    let transport = HttpTransport::new(
        &args.server,
        args.api_key.clone(),
        Duration::from_secs(args.timeout_secs),
    )?;

    info!(
        server = %args.server,
        tenant = %args.tenant,
        project = %project_id,
        root = %root.display(),
        "Client configured"
    );
    let mut config = ClientConfig::new(args.tenant.clone(), project_id, root);
    config.max_request_bytes = args.max_request_bytes;
    Ok(SyncClient::new(config, Arc::new(transport)))
}

fn print_report(report: &SyncReport) {
    match report.mode {
        SyncMode::Unchanged => println!("Up to date at {}", report.root),
        SyncMode::Registered | SyncMode::TwoPhase => {
            println!(
                "{:?} sync {}: {} chunks, {} needed, {} cached, {} stored",
                report.mode, report.status, report.chunks, report.needed, report.cached, report.stored
            );
            println!("Root {}", report.root);
        }
    }
    for e in &report.errors {
        println!("  {} {}: {}", e.code, e.hash.as_deref().unwrap_or("-"), e.message);
    }
    if !report.owed_paths.is_empty() {
        println!("{} paths stay dirty for the next round", report.owed_paths.len());
    }
}

pub async fn run_sync(args: &Args, path: &Path) -> Result<()> {
    let mut client = build_client(args, path)?;
    let report = client.sync().await?;
    print_report(&report);
    if !report.is_complete() {
        warn!(status = %report.status, owed = report.owed_paths.len(), "Sync incomplete");
    }
    Ok(())
}

/// Sync once, then sync after every burst of file changes until shutdown
pub async fn run_watch(args: &Args, path: &Path, debounce_ms: u64) -> Result<()> {
    let (mut watcher, mut events) = ProjectWatcher::new(path)?;
    watcher.start()?;
    let root = watcher.root().to_path_buf();
    let mut client = build_client(args, &root)?;
    let debounce = Duration::from_millis(debounce_ms);

    match client.sync().await {
        Ok(report) => print_report(&report),
        Err(e) => error!(error = %e, "Initial sync failed"),
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            burst = next_burst(&mut events, &root, debounce) => {
                let Some(paths) = burst else {
                    warn!("Watcher channel closed");
                    break;
                };
                let marked = mark_dirty(&root, paths)?;
                info!(marked, "Changes detected");
                match client.sync().await {
                    Ok(report) => print_report(&report),
                    // Dirty paths survive on disk; the next burst retries them
                    Err(e) => error!(error = %e, "Sync failed"),
                }
            }
            _ = &mut shutdown => {
                info!("Stopping watch");
                break;
            }
        }
    }
    Ok(())
}

pub async fn run_status(args: &Args, path: &Path) -> Result<()> {
    let client = build_client(args, path)?;
    let status = client.status()?;

    println!("Local root:    {}", status.root);
    println!("Tracked files: {}", status.tracked_files);
    println!(
        "Synced root:   {}",
        status.synced_root.as_deref().unwrap_or("never synced")
    );
    if let Some(at) = status.last_sync {
        println!("Last sync:     {}", at.to_rfc3339());
    }
    println!("Dirty paths:   {}", status.dirty_paths.len());
    for p in &status.dirty_paths {
        println!("  {p}");
    }
    if let Some(diff) = status.diff {
        for p in &diff.added {
            println!("  + {p}");
        }
        for p in &diff.modified {
            println!("  ~ {p}");
        }
        for p in &diff.removed {
            println!("  - {p}");
        }
    }
    Ok(())
}

pub async fn run_search(args: &Args, path: &Path, query: &str, top_k: usize) -> Result<()> {
    let client = build_client(args, path)?;
    let response = client.search(query, top_k).await?;

    if response.results.is_empty() {
        println!("No matches");
    }
    for hit in &response.results {
        println!(
            "{:.3}  {}:{}-{}  {} {}",
            hit.score,
            hit.file_path,
            hit.line_range.start,
            hit.line_range.end,
            hit.chunk_type,
            hit.name.as_deref().unwrap_or("")
        );
        println!("       {}", hit.summary);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_project_id() {
        assert_eq!(default_project_id(Path::new("/work/my_app")), "my-app");
        assert_eq!(default_project_id(Path::new("/work/api.v2")), "api.v2");
        assert_eq!(default_project_id(Path::new("/")), "project");
    }
}
