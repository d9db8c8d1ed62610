mod labs;

pub(crate) use labs::LabsGateway;

use async_trait::async_trait;
use thiserror::Error;

use crate::jncweb::ResourceRef;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SeriesHandle {
    pub(crate) series_id: String,
    pub(crate) slug: String,
    pub(crate) title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Volume {
    pub(crate) volume_id: String,
    pub(crate) number: u32,
}

/// `number` is the part's position inside its volume, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Part {
    pub(crate) part_id: String,
    pub(crate) number: u32,
    pub(crate) launch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FollowedSeries {
    pub(crate) url: String,
    pub(crate) series_id: String,
    pub(crate) title: String,
}

/// Remote side of the follow list. Volumes and parts come back in publication
/// order.
#[async_trait]
pub(crate) trait FollowGateway: Send + Sync {
    async fn resolve_series(&self, resource: &ResourceRef) -> Result<SeriesHandle, GatewayError>;

    async fn fetch_volumes_meta(&self, series_id: &str) -> Result<Vec<Volume>, GatewayError>;

    async fn fetch_parts_meta(&self, volume_id: &str) -> Result<Vec<Part>, GatewayError>;

    async fn list_follows(&self) -> Result<Vec<FollowedSeries>, GatewayError>;

    async fn follow_series(&self, series_id: &str) -> Result<(), GatewayError>;

    async fn unfollow_series(&self, series_id: &str) -> Result<(), GatewayError>;
}
