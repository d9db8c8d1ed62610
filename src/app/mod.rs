
use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::cli::{Cli, Command, SyncDirection, TrackCommand};
use crate::config::Config;
use crate::gateway::{FollowGateway, LabsGateway};
use crate::jncweb::{resource_from_url, to_new_website_series_url};
use crate::shutdown::install_interrupt_handler;
use crate::store::{self, TrackingStore};
use crate::sync::{
    Direction, SyncEngine, SyncError, SyncReport, SyncResult, TaskRunner, track_series,
};

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_cli(&cli)?;

    match cli.command {
        Command::Track(TrackCommand::Add { url, no_follow }) => {
            run_add(&config, &url, !no_follow).await?
        }
        Command::Track(TrackCommand::Rm { url }) => run_rm(&config, &url)?,
        Command::Track(TrackCommand::List) => run_list(&config)?,
        Command::Track(TrackCommand::Sync { direction, delete }) => {
            run_sync(&config, direction.into(), delete).await?
        }
    }

    Ok(())
}

impl From<SyncDirection> for Direction {
    fn from(direction: SyncDirection) -> Self {
        match direction {
            SyncDirection::Forward => Self::Forward,
            SyncDirection::Backward => Self::Backward,
            SyncDirection::Both => Self::Both,
        }
    }
}

fn connect(config: &Config) -> Result<LabsGateway> {
    let token = config
        .token
        .clone()
        .context("an API token is required: pass --token or set JNCTRACK_TOKEN")?;
    Ok(LabsGateway::new(Some(token)))
}

fn load_store(config: &Config) -> Result<TrackingStore> {
    let path = config.tracked_file();
    store::load(&path)
        .with_context(|| format!("cannot load tracked series from {}", path.display()))
}

fn save_store(config: &Config, tracked: &TrackingStore) -> Result<()> {
    config.ensure_config_dir()?;
    let path = config.tracked_file();
    store::save(&path, tracked)
        .with_context(|| format!("cannot save tracked series to {}", path.display()))
}

async fn run_add(config: &Config, url: &str, follow: bool) -> Result<()> {
    let Some(resource) = resource_from_url(url) else {
        bail!("'{url}' is not a J-Novel Club series URL");
    };
    let mut tracked = load_store(config)?;
    let series_url = resource.to_string();
    if let Some(entry) = tracked.get(&series_url) {
        println!("The series '{}' is already tracked.", entry.name);
        return Ok(());
    }

    let gateway = connect(config)?;
    let series = gateway
        .resolve_series(&resource)
        .await
        .with_context(|| format!("cannot resolve series {resource}"))?;
    let (series_url, entry) = track_series(&gateway, &series)
        .await
        .with_context(|| format!("cannot fetch parts of '{}'", series.title))?;

    if follow && let Err(err) = gateway.follow_series(&series.series_id).await {
        warn!(error = %err, "follow failed");
        println!("Warning: could not follow '{}' on J-Novel Club: {err}", series.title);
    }

    println!("{}", describe_new_entry(&entry.name, entry.part));
    tracked.insert(series_url, entry);
    save_store(config, &tracked)
}

fn run_rm(config: &Config, url: &str) -> Result<()> {
    let mut tracked = load_store(config)?;
    let series_url = to_new_website_series_url(url);
    match tracked.remove(&series_url) {
        Some(entry) => {
            save_store(config, &tracked)?;
            println!("The series '{}' is no longer tracked.", entry.name);
        }
        None => println!("'{series_url}' is not tracked."),
    }
    Ok(())
}

fn run_list(config: &Config) -> Result<()> {
    let tracked = load_store(config)?;
    for line in format_tracked_table(&tracked) {
        println!("{line}");
    }
    Ok(())
}

async fn run_sync(config: &Config, direction: Direction, delete: bool) -> Result<()> {
    let gateway = connect(config)?;
    let runner = TaskRunner::new(config.concurrency, install_interrupt_handler());
    let report = sync_tracked(config, &gateway, runner, direction, delete).await?;

    for line in format_sync_summary(&report) {
        println!("{line}");
    }

    let failures = report.failure_count();
    if failures > 0 {
        bail!("{failures} series could not be synchronized");
    }
    Ok(())
}

/// Loads the store, reconciles it with the remote follow list and saves it.
/// An interrupted run is an error and leaves the file on disk untouched.
async fn sync_tracked<G>(
    config: &Config,
    gateway: &G,
    runner: TaskRunner,
    direction: Direction,
    delete: bool,
) -> Result<SyncReport>
where
    G: FollowGateway + ?Sized,
{
    let mut tracked = load_store(config)?;
    let follows = gateway
        .list_follows()
        .await
        .context("cannot fetch followed series")?;

    let engine = SyncEngine::new(gateway, runner);
    let report = match engine.sync(&mut tracked, &follows, direction, delete).await {
        Ok(report) => report,
        Err(SyncError::Cancelled(_)) => {
            bail!("sync interrupted, tracked series left unchanged");
        }
    };

    // whatever succeeded is kept even when some series failed
    save_store(config, &tracked)?;
    Ok(report)
}

fn describe_new_entry(name: &str, part: u32) -> String {
    if part == 0 {
        format!("The series '{name}' is now tracked, starting from the beginning.")
    } else {
        format!("The series '{name}' is now tracked, starting after part {part}.")
    }
}

pub(crate) fn format_tracked_table(tracked: &TrackingStore) -> Vec<String> {
    if tracked.is_empty() {
        return vec!["No tracked series yet. Run `jnctrack track add <URL>` first.".to_string()];
    }

    let mut lines = vec![format!("{:<50} {:>6} {:<14} {}", "TITLE", "PART", "PART DATE", "URL")];
    for (url, entry) in tracked.iter() {
        lines.push(format!(
            "{:<50} {:>6} {:<14} {}",
            truncate(&entry.name, 50),
            entry.part,
            entry.part_date_display(),
            url
        ));
    }
    lines
}

pub(crate) fn format_sync_summary(report: &SyncReport) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(forward) = &report.forward {
        push_direction_summary(&mut lines, forward, "Tracked", "Untracked");
    }
    if let Some(backward) = &report.backward {
        push_direction_summary(&mut lines, backward, "Followed", "Unfollowed");
    }
    if [&report.forward, &report.backward]
        .into_iter()
        .flatten()
        .all(SyncResult::is_noop)
    {
        lines.push("Everything is already in sync.".to_string());
    }
    lines
}

fn push_direction_summary(
    lines: &mut Vec<String>,
    result: &SyncResult,
    added_label: &str,
    removed_label: &str,
) {
    for url in &result.added {
        lines.push(format!("{added_label}: {url}"));
    }
    for url in &result.removed {
        lines.push(format!("{removed_label}: {url}"));
    }
    for failure in &result.failures {
        lines.push(format!("Failed: {} ({})", failure.key, failure.error));
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}
