//! codeweave: Dependency and call graphs that follow your source tree
//!
//! Tracks the TypeScript, JavaScript and Python files of a project, extracts
//! their imports, declarations and call sites, and keeps an import graph and
//! a call graph in `.codeweave/` synchronized as files change.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codeweave_graph::graph::owning_file;
use codeweave_graph::paths;
use codeweave_graph::watcher::watch_batches;
use codeweave_graph::{
    FileWatcher, GraphStore, SyncReport, WatcherConfig, Workspace, WorkspaceConfig,
};
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::{CODEWEAVE_DIR, CONFIG_FILE, Config};

/// Keep a dependency and call graph of a source tree in sync with the files on disk
#[derive(Parser)]
#[command(name = "codeweave")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .codeweave directory (default: search for .codeweave/config.toml)
    #[arg(long, global = true, env = "CODEWEAVE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new .codeweave directory with config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Track a file or folder and add it to the graph
    Add {
        path: PathBuf,
    },

    /// Stop tracking a file or folder and drop it from the graph
    Remove {
        path: PathBuf,
    },

    /// Re-extract tracked files whose content changed
    Sync,

    /// Rebuild the graph from every tracked file
    Reindex,

    /// Keep the graph synchronized with filesystem events until Ctrl-C
    Watch,

    /// Show tracked files and graph statistics
    Status,

    /// Print graph nodes (and edges) as JSON
    Show {
        /// Only nodes of this file
        #[arg(long, conflicts_with = "folder")]
        file: Option<PathBuf>,

        /// Only nodes of files under this folder
        #[arg(long)]
        folder: Option<PathBuf>,

        /// Include call graph edges and unresolved calls
        #[arg(long)]
        calls: bool,
    },

    /// Print the tracked folder tree
    Tree,
}

fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize logging for one-shot commands.
/// Logs to stderr so stdout stays clean for command output.
fn init_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter(verbose))
        .init();
}

/// Initialize logging for watch mode.
/// Logs to rotating files in .codeweave/logs/ with daily rotation.
fn init_file_logging(codeweave_dir: &Path, verbose: bool) {
    let logs_dir = codeweave_dir.join("logs");

    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        init_logging(verbose);
        return;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "codeweave.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the background writer.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(env_filter(verbose))
        .init();
}

/// Load config from an explicit path or auto-discover `.codeweave/config.toml`.
///
/// Returns the config and the `.codeweave` directory relative paths resolve
/// against. Without a config file the defaults apply in the current directory.
fn load_config(override_path: Option<&PathBuf>) -> Result<(Config, PathBuf)> {
    if let Some(path) = override_path {
        let config_file = if path.is_dir() {
            path.join(CONFIG_FILE)
        } else {
            path.clone()
        };
        let codeweave_dir = config_file.parent().unwrap_or(path).to_path_buf();
        let config = Config::from_file(&config_file)?;
        return Ok((config, codeweave_dir));
    }

    match Config::find_and_load()? {
        Some(found) => Ok(found),
        None => {
            let current = std::env::current_dir().context("Failed to read current directory")?;
            Ok((Config::default(), current.join(CODEWEAVE_DIR)))
        }
    }
}

fn open_workspace(config: WorkspaceConfig) -> Result<Workspace> {
    let root = config.root.clone();
    Workspace::open(config)
        .with_context(|| format!("Failed to open workspace at {}", root.display()))
}

/// Run a blocking workspace cycle off the async runtime.
async fn run_cycle<F>(config: WorkspaceConfig, cycle: F) -> Result<SyncReport>
where
    F: FnOnce(&mut Workspace) -> Result<SyncReport> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut workspace = open_workspace(config)?;
        cycle(&mut workspace)
    })
    .await?
}

fn print_report(action: &str, report: &SyncReport) {
    println!(
        "{action}: {} indexed, {} skipped, {} failed, {} removed ({} nodes, {} edges, {} unresolved)",
        report.indexed,
        report.skipped,
        report.failed,
        report.removed,
        report.nodes,
        report.edges,
        report.unresolved
    );
}

fn init(force: bool) -> Result<()> {
    let codeweave_dir = PathBuf::from(CODEWEAVE_DIR);
    let config_path = codeweave_dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        anyhow::bail!(".codeweave/config.toml already exists. Use --force to overwrite.");
    }

    std::fs::create_dir_all(&codeweave_dir)
        .with_context(|| format!("Failed to create {}", codeweave_dir.display()))?;
    std::fs::write(&config_path, config::DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    info!("Created {}", config_path.display());
    println!("Created {}", config_path.display());
    println!("Next steps:");
    println!("  1. Run 'codeweave add <path>' to track source files");
    println!("  2. Run 'codeweave watch' to keep the graph in sync");
    Ok(())
}

fn format_timestamp(store: &GraphStore) -> String {
    store
        .timestamp()
        .map(|ts| {
            ts.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "never".to_string())
}

fn status(workspace: &Workspace) {
    let imports = workspace.import_store();
    let calls = workspace.call_store();
    let import_stats = imports.stats();
    let call_stats = calls.stats();

    let call_sites = call_stats.edge_count + call_stats.unresolved_count;
    let ratio = if call_sites == 0 {
        0.0
    } else {
        call_stats.unresolved_count as f64 / call_sites as f64 * 100.0
    };

    println!("Workspace:     {}", workspace.root().display());
    println!("Tracked files: {}", workspace.watch_service().file_count());
    println!(
        "Import graph:  {} files, {} edges (saved {})",
        import_stats.node_count,
        import_stats.edge_count,
        format_timestamp(imports)
    );
    println!(
        "Call graph:    {} entities, {} edges (saved {})",
        call_stats.node_count,
        call_stats.edge_count,
        format_timestamp(calls)
    );
    println!(
        "Unresolved:    {} of {} call sites ({:.1}%)",
        call_stats.unresolved_count, call_sites, ratio
    );
}

/// Which files a `show` invocation covers.
enum Scope {
    All,
    File(String),
    Folder(String),
}

impl Scope {
    fn contains(&self, file_id: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::File(id) => file_id == id,
            Scope::Folder(folder) => paths::is_within(file_id, folder),
        }
    }
}

fn show(workspace: &Workspace, scope: &Scope, calls: bool) -> Result<String> {
    let imports = workspace.import_store();
    let call_store = workspace.call_store();

    let nodes: Vec<_> = imports
        .get_nodes()
        .into_iter()
        .chain(call_store.get_nodes())
        .filter(|node| scope.contains(&node.file_id))
        .collect();

    let mut edges: Vec<_> = imports
        .get_edges()
        .iter()
        .filter(|edge| scope.contains(edge.source_file()))
        .collect();

    let mut document = serde_json::json!({ "nodes": nodes });
    if calls {
        edges.extend(
            call_store
                .get_edges()
                .iter()
                .filter(|edge| scope.contains(owning_file(&edge.source))),
        );
        let unresolved: Vec<_> = call_store
            .get_unresolved()
            .iter()
            .filter(|call| scope.contains(call.source_file()))
            .collect();
        document["unresolved"] = serde_json::to_value(unresolved)?;
    }
    document["edges"] = serde_json::to_value(edges)?;

    Ok(serde_json::to_string_pretty(&document)?)
}

/// Blocking watch loop: catch up, then apply coalesced change batches.
fn run_watch(
    config: WorkspaceConfig,
    watcher_config: WatcherConfig,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let root = workspace.root().to_path_buf();

    let report = if workspace.watch_service().file_count() == 0 {
        info!(root = %root.display(), "Nothing tracked yet, adding project root");
        workspace.add_folder(&root)?
    } else {
        workspace.sync_changed()?
    };
    info!(
        indexed = report.indexed,
        skipped = report.skipped,
        failed = report.failed,
        "Initial sync complete"
    );

    let quiet_period = watcher_config.debounce_duration;
    let watcher = FileWatcher::with_config(&root, watcher_config)
        .with_context(|| format!("Failed to watch {}", root.display()))?;
    info!("File watcher started for {}", root.display());

    watch_batches(
        &watcher,
        quiet_period,
        || stop.load(Ordering::Relaxed),
        |batch| {
            let report = workspace.apply_changes(&batch.modified, &batch.deleted)?;
            if !report.is_noop() {
                info!(
                    indexed = report.indexed,
                    removed = report.removed,
                    failed = report.failed,
                    nodes = report.nodes,
                    edges = report.edges,
                    "Graph updated"
                );
            }
            Ok::<_, codeweave_graph::WorkspaceError>(())
        },
    );

    info!("File watcher stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        init_logging(cli.verbose);
        return init(force);
    }

    let (config, codeweave_dir) = load_config(cli.config.as_ref())?;
    if matches!(cli.command, Commands::Watch) {
        init_file_logging(&codeweave_dir, cli.verbose);
    } else {
        init_logging(cli.verbose);
    }
    for problem in config.validate() {
        warn!("Config problem: {}", problem);
    }

    let ws_config = config.workspace_config(&codeweave_dir);

    match cli.command {
        Commands::Init { .. } => {}

        Commands::Add { path } => {
            let path = std::path::absolute(&path)
                .with_context(|| format!("Invalid path {}", path.display()))?;
            let report = run_cycle(ws_config, move |ws| {
                if path.is_dir() {
                    Ok(ws.add_folder(&path)?)
                } else {
                    Ok(ws.add_file(&path)?)
                }
            })
            .await?;
            print_report("Added", &report);
        }

        Commands::Remove { path } => {
            let path = std::path::absolute(&path)
                .with_context(|| format!("Invalid path {}", path.display()))?;
            let report = run_cycle(ws_config, move |ws| {
                if ws.watch_service().is_file_watched(&path) {
                    Ok(ws.remove_file(&path)?)
                } else {
                    Ok(ws.remove_folder(&path)?)
                }
            })
            .await?;
            print_report("Removed", &report);
        }

        Commands::Sync => {
            let report = run_cycle(ws_config, |ws| Ok(ws.sync_changed()?)).await?;
            print_report("Synced", &report);
        }

        Commands::Reindex => {
            let report = run_cycle(ws_config, |ws| Ok(ws.reindex_all()?)).await?;
            print_report("Reindexed", &report);
        }

        Commands::Watch => {
            let watcher_config = WatcherConfig {
                debounce_duration: config.watch.debounce(),
                use_gitignore: config.watch.use_gitignore,
                ..Default::default()
            };
            let stop = Arc::new(AtomicBool::new(false));
            let stop_flag = Arc::clone(&stop);
            let mut handle = tokio::task::spawn_blocking(move || {
                run_watch(ws_config, watcher_config, stop_flag)
            });

            println!("Watching for changes (Ctrl-C to stop)...");
            tokio::select! {
                result = &mut handle => result??,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, flushing pending changes");
                    stop.store(true, Ordering::Relaxed);
                    handle.await??;
                }
            }
        }

        Commands::Status => {
            let workspace = tokio::task::spawn_blocking(move || open_workspace(ws_config)).await??;
            status(&workspace);
        }

        Commands::Show {
            file,
            folder,
            calls,
        } => {
            let workspace = tokio::task::spawn_blocking(move || open_workspace(ws_config)).await??;
            let scope = match (file, folder) {
                (Some(file), _) => {
                    let path = std::path::absolute(&file)?;
                    let id = workspace
                        .file_id(&path)
                        .with_context(|| format!("{} is outside the workspace", file.display()))?;
                    Scope::File(id)
                }
                (None, Some(folder)) => {
                    let path = std::path::absolute(&folder)?;
                    if path == workspace.root() {
                        Scope::All
                    } else {
                        let id = workspace.file_id(&path).with_context(|| {
                            format!("{} is outside the workspace", folder.display())
                        })?;
                        Scope::Folder(id)
                    }
                }
                (None, None) => Scope::All,
            };
            println!("{}", show(&workspace, &scope, calls)?);
        }

        Commands::Tree => {
            let workspace = tokio::task::spawn_blocking(move || open_workspace(ws_config)).await??;
            let tree = workspace.folder_tree();
            if tree.is_empty() {
                println!("No tracked files. Run 'codeweave add <path>' first.");
            } else {
                print!("{}", tree.render());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["codeweave", "show", "--folder", "src", "--calls"]).unwrap();
        match cli.command {
            Commands::Show {
                file,
                folder,
                calls,
            } => {
                assert!(file.is_none());
                assert_eq!(folder, Some(PathBuf::from("src")));
                assert!(calls);
            }
            _ => panic!("Expected show"),
        }

        let both = ["codeweave", "show", "--file", "a", "--folder", "b"];
        assert!(Cli::try_parse_from(both).is_err());
        assert!(Cli::try_parse_from(["codeweave", "-v", "sync"]).unwrap().verbose);
    }

    #[test]
    fn test_show_scopes_nodes_and_edges() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/a.ts"), "export function a() {}\n").unwrap();
        fs::write(
            root.join("src/b.ts"),
            "import { a } from './a';\nexport function b() { a(); nope(); }\n",
        )
        .unwrap();
        fs::write(root.join("main.py"), "def main():\n    pass\n").unwrap();

        let mut ws = Workspace::open(WorkspaceConfig::in_memory(root)).unwrap();
        ws.add_folder(root).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&show(&ws, &Scope::Folder("src".to_string()), true).unwrap())
                .unwrap();
        let ids: Vec<_> = json["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"src/a.ts"));
        assert!(ids.contains(&"src/b.ts::b"));
        assert!(!ids.contains(&"main.py"));
        assert_eq!(json["edges"].as_array().unwrap().len(), 2);
        assert_eq!(json["unresolved"].as_array().unwrap().len(), 1);

        let json: serde_json::Value =
            serde_json::from_str(&show(&ws, &Scope::File("main.py".to_string()), false).unwrap())
                .unwrap();
        assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
        assert!(json["edges"].as_array().unwrap().is_empty());
        assert!(json.get("unresolved").is_none());
    }
}
