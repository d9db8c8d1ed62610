mod runner;


use std::collections::{BTreeSet, HashSet};

use chrono::DateTime;
use thiserror::Error;
use tracing::{debug, info, warn};

pub(crate) use runner::{Cancelled, TaskFailure, TaskRunner};

use self::runner::Task;
use crate::gateway::{FollowGateway, FollowedSeries, GatewayError, SeriesHandle};
use crate::jncweb::{resource_from_url, url_from_series_slug};
use crate::store::{TrackedEntry, TrackingStore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum SyncError {
    #[error("synchronization cancelled: {0}")]
    Cancelled(#[from] Cancelled),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Forward,
    Backward,
    Both,
}

impl Direction {
    fn includes_forward(self) -> bool {
        matches!(self, Self::Forward | Self::Both)
    }

    fn includes_backward(self) -> bool {
        matches!(self, Self::Backward | Self::Both)
    }
}

/// URLs touched by one direction of a sync, plus per-series failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SyncResult {
    pub(crate) added: BTreeSet<String>,
    pub(crate) removed: BTreeSet<String>,
    pub(crate) failures: Vec<TaskFailure>,
}

impl SyncResult {
    pub(crate) fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SyncReport {
    pub(crate) forward: Option<SyncResult>,
    pub(crate) backward: Option<SyncResult>,
}

impl SyncReport {
    pub(crate) fn failure_count(&self) -> usize {
        [&self.forward, &self.backward]
            .into_iter()
            .flatten()
            .map(|result| result.failures.len())
            .sum()
    }
}

enum RemoteChange {
    Followed,
    Unfollowed,
}

pub(crate) struct SyncEngine<'g, G: ?Sized> {
    gateway: &'g G,
    runner: TaskRunner,
}

impl<'g, G> SyncEngine<'g, G>
where
    G: FollowGateway + ?Sized,
{
    pub(crate) fn new(gateway: &'g G, runner: TaskRunner) -> Self {
        Self { gateway, runner }
    }

    /// Runs the requested directions one after the other; backward sync sees
    /// the entries forward sync just added. A series whose forward task failed
    /// is never unfollowed by the backward pass of the same run.
    pub(crate) async fn sync(
        &self,
        store: &mut TrackingStore,
        follows: &[FollowedSeries],
        direction: Direction,
        delete: bool,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        if direction.includes_forward() {
            report.forward = Some(self.sync_forward(store, follows, delete).await?);
        }
        if direction.includes_backward() {
            let failed_forward: HashSet<&str> = report
                .forward
                .iter()
                .flat_map(|forward| forward.failures.iter())
                .map(|failure| failure.key.as_str())
                .collect();
            let backward = self
                .backward_pass(store, follows, delete, &failed_forward)
                .await?;
            report.backward = Some(backward);
        }
        Ok(report)
    }

    /// Tracks every followed series not tracked yet and, with `delete`, drops
    /// tracked series that are no longer followed. Series already tracked are
    /// never fetched again.
    pub(crate) async fn sync_forward(
        &self,
        store: &mut TrackingStore,
        follows: &[FollowedSeries],
        delete: bool,
    ) -> Result<SyncResult, SyncError> {
        let gateway = self.gateway;
        let mut scheduled = HashSet::new();
        let tasks: Vec<Task<'_, TrackedEntry>> = follows
            .iter()
            .filter(|follow| !store.contains(&follow.url) && scheduled.insert(follow.url.as_str()))
            .map(|follow| {
                Task::new(follow.url.clone(), async move {
                    let resource = resource_from_url(&follow.url)
                        .ok_or_else(|| GatewayError::NotFound(follow.url.clone()))?;
                    let series = gateway.resolve_series(&resource).await?;
                    let (_, entry) = track_series(gateway, &series).await?;
                    Ok(entry)
                })
            })
            .collect();

        let report = self.runner.run(tasks).await?;

        let mut result = SyncResult {
            failures: report.failed,
            ..SyncResult::default()
        };
        for (url, entry) in report.succeeded {
            store.insert(url.clone(), entry);
            result.added.insert(url);
        }

        if delete {
            let followed: HashSet<&str> =
                follows.iter().map(|follow| follow.url.as_str()).collect();
            store.retain(|url, entry| {
                if followed.contains(url) {
                    return true;
                }
                warn!("The series '{}' is no longer tracked", entry.name);
                result.removed.insert(url.to_string());
                false
            });
        }

        Ok(result)
    }

    /// Follows remotely every tracked series not followed yet and, with
    /// `delete`, unfollows series that are not tracked.
    pub(crate) async fn sync_backward(
        &self,
        store: &TrackingStore,
        follows: &[FollowedSeries],
        delete: bool,
    ) -> Result<SyncResult, SyncError> {
        self.backward_pass(store, follows, delete, &HashSet::new()).await
    }

    /// `keep_followed` lists follows that must survive `delete` even though
    /// they are not tracked.
    async fn backward_pass(
        &self,
        store: &TrackingStore,
        follows: &[FollowedSeries],
        delete: bool,
        keep_followed: &HashSet<&str>,
    ) -> Result<SyncResult, SyncError> {
        let gateway = self.gateway;
        let followed: HashSet<&str> = follows.iter().map(|follow| follow.url.as_str()).collect();

        let mut tasks: Vec<Task<'_, RemoteChange>> = store
            .urls()
            .filter(|url| !followed.contains(url.as_str()))
            .map(|url| {
                Task::new(url.clone(), async move {
                    let resource = resource_from_url(url)
                        .ok_or_else(|| GatewayError::NotFound(url.clone()))?;
                    info!("Fetching metadata for '{resource}'...");
                    let series = gateway.resolve_series(&resource).await?;
                    info!("Follow '{}'...", series.title);
                    gateway.follow_series(&series.series_id).await?;
                    Ok(RemoteChange::Followed)
                })
            })
            .collect();

        if delete {
            let mut scheduled = HashSet::new();
            tasks.extend(
                follows
                    .iter()
                    .filter(|follow| {
                        if store.contains(&follow.url) {
                            return false;
                        }
                        if keep_followed.contains(follow.url.as_str()) {
                            debug!(url = %follow.url, "not tracked after a failure, keeping follow");
                            return false;
                        }
                        scheduled.insert(follow.url.as_str())
                    })
                    .map(|follow| {
                        Task::new(follow.url.clone(), async move {
                            // the follow already carries the id, no need to resolve
                            warn!("Unfollow '{}'...", follow.title);
                            gateway.unfollow_series(&follow.series_id).await?;
                            Ok(RemoteChange::Unfollowed)
                        })
                    }),
            );
        }

        let report = self.runner.run(tasks).await?;

        let mut result = SyncResult {
            failures: report.failed,
            ..SyncResult::default()
        };
        for (url, change) in report.succeeded {
            match change {
                RemoteChange::Followed => result.added.insert(url),
                RemoteChange::Unfollowed => result.removed.insert(url),
            };
        }
        Ok(result)
    }
}

/// Builds the tracking record for a series: its last published part, or part
/// 0 when nothing is out yet. Only the last volume's parts are fetched.
pub(crate) async fn track_series<G>(
    gateway: &G,
    series: &SeriesHandle,
) -> Result<(String, TrackedEntry), GatewayError>
where
    G: FollowGateway + ?Sized,
{
    let volumes = gateway.fetch_volumes_meta(&series.series_id).await?;
    let last_part = match volumes.last() {
        Some(last_volume) => gateway
            .fetch_parts_meta(&last_volume.volume_id)
            .await?
            .pop()
            .map(|part| (last_volume.number, part)),
        None => None,
    };

    let entry = match last_part {
        None => {
            info!(
                "The series '{}' is now tracked, starting from the beginning",
                series.title
            );
            TrackedEntry::not_started(series.title.clone())
        }
        Some((volume_number, part)) => {
            let part_date = DateTime::parse_from_rfc3339(&part.launch)
                .map(|date| date.format("%b %d, %Y").to_string())
                .unwrap_or_else(|_| part.launch.clone());
            debug!(part_id = %part.part_id, launch = %part.launch, "last published part");
            info!(
                "The series '{}' is now tracked, starting after part {}.{} [{}]",
                series.title, volume_number, part.number, part_date
            );
            TrackedEntry {
                name: series.title.clone(),
                part: part.number,
                part_date: part.launch,
            }
        }
    };

    Ok((url_from_series_slug(&series.slug), entry))
}
