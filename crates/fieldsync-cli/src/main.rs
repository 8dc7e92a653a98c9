//! fieldsync CLI - check out, edit, and upload remote feature datasets
//!
//! Thin terminal front end over fieldsync-core's flows.

use std::collections::BTreeSet;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};
use fieldsync_core::api::{HttpSyncApi, SyncApi};
use fieldsync_core::flows::{
    validate_decisions, CancelToken, ConflictHandling, DownloadFlow, EventSink, FlowTermination,
    ProgressEvent, UploadFlow,
};
use fieldsync_core::models::{CatalogItem, ConflictResolution, SyncStatus};
use fieldsync_core::store::{
    list_local_datasets, DatasetLayout, GeometryStore, SqliteContainer,
};
use fieldsync_core::tagger::{apply_tags, EditDelta, UploadedRowPolicy};
use fieldsync_core::{ClientConfig, ConflictStrategy};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Check out, edit, and upload remote feature datasets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local data directory
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List datasets available on the server
    Catalog {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a dataset out and download its snapshot
    Checkout {
        /// Server dataset id
        dataset_id: i64,
    },
    /// List datasets checked out locally
    Datasets,
    /// Show sync status counts for a local dataset
    Status {
        /// Server dataset id
        dataset_id: i64,
    },
    /// Tag locally edited rows for the next upload
    MarkEdited {
        /// Server dataset id
        dataset_id: i64,
        /// Comma-separated fids that were changed
        #[arg(long, value_name = "FIDS", default_value = "")]
        changed: String,
        /// Comma-separated fids that were added
        #[arg(long, value_name = "FIDS", default_value = "")]
        added: String,
        /// Re-tag already uploaded rows instead of leaving them locked
        #[arg(long)]
        retag_uploaded: bool,
    },
    /// Upload pending edits as a batch
    Upload {
        /// Server dataset id
        dataset_id: i64,
        /// What to do when the server reports conflicts
        #[arg(long, value_enum, default_value_t = OnConflict::Manual)]
        on_conflict: OnConflict,
        /// Ask the server to park the batch on conflicts instead of failing it
        #[arg(long)]
        interactive: bool,
    },
    /// Show the conflicts blocking an upload batch
    Conflicts {
        /// Batch UUID
        batch_uuid: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve every conflict of a batch the same way
    Resolve {
        /// Batch UUID
        batch_uuid: String,
        /// Keep the uploaded versions
        #[arg(long, conflicts_with = "all_theirs")]
        all_mine: bool,
        /// Keep the server versions
        #[arg(long)]
        all_theirs: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum OnConflict {
    /// Report conflicts and keep polling while they are resolved elsewhere
    Manual,
    /// Resolve every conflict in favor of the uploaded version
    TakeMine,
    /// Resolve every conflict in favor of the server version
    TakeTheirs,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid fid list '{0}': expected comma-separated integers")]
    InvalidFidList(String),
    #[error("Nothing to tag: pass --changed and/or --added")]
    EmptyDelta,
    #[error("Pass either --all-mine or --all-theirs")]
    NoResolutionChosen,
    #[error(
        "Server is not configured. Set FIELDSYNC_API_URL and FIELDSYNC_TOKEN to talk to a sync server."
    )]
    ServerNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fieldsync=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir);
    tracing::debug!("using data directory {}", data_dir.display());
    let layout = DatasetLayout::new(data_dir);

    match cli.command {
        Commands::Catalog { json } => run_catalog(json, &layout).await?,
        Commands::Checkout { dataset_id } => run_checkout(dataset_id, &layout).await?,
        Commands::Datasets => run_datasets(&layout)?,
        Commands::Status { dataset_id } => run_status(dataset_id, &layout)?,
        Commands::MarkEdited {
            dataset_id,
            changed,
            added,
            retag_uploaded,
        } => run_mark_edited(dataset_id, &changed, &added, retag_uploaded, &layout)?,
        Commands::Upload {
            dataset_id,
            on_conflict,
            interactive,
        } => run_upload(dataset_id, on_conflict, interactive, &layout).await?,
        Commands::Conflicts { batch_uuid, json } => {
            run_conflicts(&batch_uuid, json, &layout).await?;
        }
        Commands::Resolve {
            batch_uuid,
            all_mine,
            all_theirs,
        } => run_resolve(&batch_uuid, all_mine, all_theirs, &layout).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}

/// Prints flow events as single-line progress updates.
struct PrintSink;

impl EventSink for PrintSink {
    fn on_progress(&mut self, event: &ProgressEvent) {
        println!("[{:>3}%] {}", event.percent, event.stage);
    }

    fn on_conflict_detected(&mut self, batch_uuid: &str) {
        println!(
            "Conflicts detected for batch {batch_uuid}. Inspect with `fieldsync conflicts {batch_uuid}`."
        );
    }

    fn on_terminal(&mut self, termination: &FlowTermination) {
        match termination {
            FlowTermination::Success => {}
            FlowTermination::Failure(message) => println!("Failed: {message}"),
            FlowTermination::Cancelled => println!("Cancelled"),
        }
    }
}

async fn run_catalog(as_json: bool, layout: &DatasetLayout) -> Result<(), CliError> {
    let (config, token) = server_config(layout)?;
    let api = HttpSyncApi::new(&config, &token)?;
    let items = api.fetch_catalog().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&catalog_rows(&items))?);
    } else {
        for line in format_catalog_lines(&items) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_checkout(dataset_id: i64, layout: &DatasetLayout) -> Result<(), CliError> {
    let (config, token) = server_config(layout)?;
    let api = HttpSyncApi::new(&config, &token)?;
    let cancel = cancel_on_ctrl_c();

    let mut sink = PrintSink;
    let outcome = DownloadFlow::new(&api, layout, cancel)
        .run(dataset_id, &mut sink)
        .await?;

    if outcome.cache_hit {
        println!(
            "Dataset {dataset_id}: snapshot up to date, lease refreshed until {}",
            outcome.session.expires_at
        );
    } else {
        println!(
            "Dataset {dataset_id}: {} features materialized at {}",
            outcome.feature_count,
            outcome.container_path.display()
        );
    }
    Ok(())
}

fn run_datasets(layout: &DatasetLayout) -> Result<(), CliError> {
    let datasets = list_local_datasets(layout)?;
    if datasets.is_empty() {
        println!("No datasets checked out under {}", layout.base_dir().display());
        return Ok(());
    }
    for dataset in datasets {
        let store = SqliteContainer::open_readonly(&dataset.container_path)?;
        let counts = store.count_by_status()?;
        let lease = dataset
            .session
            .map_or_else(|| "no lease".to_string(), |s| format!("lease until {}", s.expires_at));
        println!(
            "{:<8} {:>6} features  {:>4} pending  {lease}",
            dataset.dataset_id,
            counts.total,
            counts.pending()
        );
    }
    Ok(())
}

fn run_status(dataset_id: i64, layout: &DatasetLayout) -> Result<(), CliError> {
    let store = SqliteContainer::open_readonly(&layout.container_path(dataset_id))?;
    let counts = store.count_by_status()?;
    for line in format_status_lines(&counts) {
        println!("{line}");
    }
    Ok(())
}

fn run_mark_edited(
    dataset_id: i64,
    changed: &str,
    added: &str,
    retag_uploaded: bool,
    layout: &DatasetLayout,
) -> Result<(), CliError> {
    let delta = EditDelta {
        changed: parse_fid_list(changed)?,
        added: parse_fid_list(added)?,
    };
    if delta.is_empty() {
        return Err(CliError::EmptyDelta);
    }
    let policy = if retag_uploaded {
        UploadedRowPolicy::Retag
    } else {
        UploadedRowPolicy::Locked
    };

    let mut store = SqliteContainer::open(&layout.container_path(dataset_id))?;
    let summary = apply_tags(&mut store, &delta, policy)?;
    println!(
        "{} modified, {} new, {} uploaded rows left untouched",
        summary.modified, summary.added, summary.skipped_uploaded
    );
    Ok(())
}

async fn run_upload(
    dataset_id: i64,
    on_conflict: OnConflict,
    interactive: bool,
    layout: &DatasetLayout,
) -> Result<(), CliError> {
    let (mut config, token) = server_config(layout)?;
    if interactive {
        config = config.with_conflict_strategy(ConflictStrategy::Interactive);
    }
    let api = HttpSyncApi::new(&config, &token)?;
    let cancel = cancel_on_ctrl_c();
    let handling = match on_conflict {
        OnConflict::Manual => ConflictHandling::Manual,
        OnConflict::TakeMine => ConflictHandling::AutoResolve(ConflictResolution::TakeMine),
        OnConflict::TakeTheirs => ConflictHandling::AutoResolve(ConflictResolution::TakeTheirs),
    };

    let mut sink = PrintSink;
    let outcome = UploadFlow::new(&api, layout, &config, cancel)
        .run(dataset_id, handling, &mut sink)
        .await?;

    println!(
        "Batch {} completed: {} accepted, {} rows marked uploaded",
        outcome.batch.batch_uuid, outcome.batch.accepted_count, outcome.marked_uploaded
    );
    Ok(())
}

async fn run_conflicts(
    batch_uuid: &str,
    as_json: bool,
    layout: &DatasetLayout,
) -> Result<(), CliError> {
    let (config, token) = server_config(layout)?;
    let api = HttpSyncApi::new(&config, &token)?;
    let set = api.fetch_conflicts(batch_uuid).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflict_rows(&set))?);
    } else if set.is_empty() {
        println!("No conflicts for batch {batch_uuid}");
    } else {
        for item in &set.conflicts {
            let suggested = item
                .suggested
                .map_or_else(String::new, |s| format!("  suggested: {s:?}"));
            println!("{:<24} {:<12}{suggested}", item.feature_hash, item.conflict_type);
        }
    }
    Ok(())
}

async fn run_resolve(
    batch_uuid: &str,
    all_mine: bool,
    all_theirs: bool,
    layout: &DatasetLayout,
) -> Result<(), CliError> {
    let resolution = match (all_mine, all_theirs) {
        (true, false) => ConflictResolution::TakeMine,
        (false, true) => ConflictResolution::TakeTheirs,
        _ => return Err(CliError::NoResolutionChosen),
    };

    let (config, token) = server_config(layout)?;
    let api = HttpSyncApi::new(&config, &token)?;
    let set = api.fetch_conflicts(batch_uuid).await?;
    if set.is_empty() {
        println!("No conflicts for batch {batch_uuid}");
        return Ok(());
    }

    let decisions = set.decide_all(resolution);
    validate_decisions(&set, &decisions)?;
    api.resolve_conflicts(batch_uuid, &decisions).await?;
    println!("Resolved {} conflict(s)", decisions.len());
    Ok(())
}

fn run_completions(
    shell: CompletionShell,
    output_path: Option<&std::path::Path>,
) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();

    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, "fieldsync", buffer);
}

#[derive(Debug, serde::Serialize)]
struct CatalogRow {
    id: i64,
    name: String,
    status: String,
    result_count: Option<u64>,
    total_area_ha: Option<f64>,
}

fn catalog_rows(items: &[CatalogItem]) -> Vec<CatalogRow> {
    items
        .iter()
        .map(|item| CatalogRow {
            id: item.id,
            name: item.name.clone(),
            status: item.status.clone().unwrap_or_else(|| "READY".to_string()),
            result_count: item.result_count,
            total_area_ha: item.total_area_ha,
        })
        .collect()
}

fn format_catalog_lines(items: &[CatalogItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let status = item.status.as_deref().unwrap_or("READY");
            let count = item
                .result_count
                .map_or_else(String::new, |c| format!("  {c} features"));
            format!("{:<8} {:<32} {status:<12}{count}", item.id, item.name)
        })
        .collect()
}

fn format_status_lines(counts: &fieldsync_core::store::StatusCounts) -> Vec<String> {
    let mut lines = vec![format!("total      {:>6}", counts.total)];
    for status in [
        SyncStatus::Downloaded,
        SyncStatus::Modified,
        SyncStatus::New,
        SyncStatus::Uploaded,
    ] {
        lines.push(format!(
            "{:<10} {:>6}",
            status.as_str().to_lowercase(),
            counts.count(status)
        ));
    }
    if counts.untagged > 0 {
        lines.push(format!("untagged   {:>6}", counts.untagged));
    }
    lines
}

#[derive(Debug, serde::Serialize)]
struct ConflictRow {
    feature_hash: String,
    conflict_type: String,
    original_id: Option<i64>,
    suggested: Option<ConflictResolution>,
}

fn conflict_rows(set: &fieldsync_core::models::ConflictSet) -> Vec<ConflictRow> {
    set.conflicts
        .iter()
        .map(|item| ConflictRow {
            feature_hash: item.feature_hash.clone(),
            conflict_type: item.conflict_type.clone(),
            original_id: item.original_id,
            suggested: item.suggested,
        })
        .collect()
}

fn parse_fid_list(raw: &str) -> Result<BTreeSet<i64>, CliError> {
    let mut fids = BTreeSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let fid = part
            .parse::<i64>()
            .map_err(|_| CliError::InvalidFidList(raw.to_string()))?;
        fids.insert(fid);
    }
    Ok(fids)
}

fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });
    token
}

fn server_config(layout: &DatasetLayout) -> Result<(ClientConfig, String), CliError> {
    let url = env::var("FIELDSYNC_API_URL").ok().filter(|v| !v.is_empty());
    let token = env::var("FIELDSYNC_TOKEN").ok().filter(|v| !v.is_empty());
    let (Some(url), Some(token)) = (url, token) else {
        return Err(CliError::ServerNotConfigured);
    };
    let config = ClientConfig::new(&url, layout.base_dir())?;
    Ok((config, token))
}

fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> PathBuf {
    cli_data_dir
        .or_else(|| env::var_os("FIELDSYNC_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(default_data_dir)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
}

#[cfg(test)]
mod tests {
    use fieldsync_core::store::StatusCounts;

    use super::*;

    #[test]
    fn parse_fid_list_accepts_gaps_and_spaces() {
        let fids = parse_fid_list(" 1, 3 ,,7 ").unwrap();
        assert_eq!(fids, [1, 3, 7].into());
    }

    #[test]
    fn parse_fid_list_empty_is_ok() {
        assert!(parse_fid_list("").unwrap().is_empty());
    }

    #[test]
    fn parse_fid_list_rejects_garbage() {
        assert!(matches!(
            parse_fid_list("1,two,3"),
            Err(CliError::InvalidFidList(_))
        ));
    }

    #[test]
    fn default_data_dir_is_defined() {
        assert!(default_data_dir().ends_with("fieldsync"));
    }

    #[test]
    fn catalog_lines_show_status_and_count() {
        let items: Vec<CatalogItem> = serde_json::from_str(
            r#"[{"id": 5, "name": "north-field", "resultCount": 120},
                {"id": 6, "name": "south-field", "status": "PROCESSING"}]"#,
        )
        .unwrap();
        let lines = format_catalog_lines(&items);
        assert!(lines[0].contains("north-field"));
        assert!(lines[0].contains("READY"));
        assert!(lines[0].contains("120 features"));
        assert!(lines[1].contains("PROCESSING"));
    }

    #[test]
    fn status_lines_include_every_status() {
        let mut counts = StatusCounts::default();
        counts.total = 5;
        counts.untagged = 1;
        counts.by_status.insert(SyncStatus::Downloaded, 2);
        counts.by_status.insert(SyncStatus::Modified, 2);
        let lines = format_status_lines(&counts);
        assert_eq!(lines.len(), 6);
        assert!(lines.iter().any(|l| l.starts_with("modified") && l.ends_with('2')));
        assert!(lines.iter().any(|l| l.starts_with("untagged")));
    }

    #[test]
    fn run_completions_writes_bash_script_file() {
        let output_path = std::env::temp_dir().join(format!(
            "fieldsync-completions-test-{}.bash",
            std::process::id()
        ));

        run_completions(CompletionShell::Bash, Some(&output_path)).unwrap();

        let script = std::fs::read_to_string(&output_path).unwrap();
        assert!(script.contains("_fieldsync()"));
        assert!(script.contains("complete -F _fieldsync"));

        let _ = std::fs::remove_file(output_path);
    }
}
