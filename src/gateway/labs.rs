use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{FollowGateway, FollowedSeries, GatewayError, Part, SeriesHandle, Volume};
use crate::http::{HttpFailure, Method, Request, RetryPolicy, send_with_retries};
use crate::jncweb::{ResourceRef, url_from_series_slug};

pub(crate) const LABS_API_URL: &str = "https://labs.j-novel.club/app/v1";

const PAGE_LIMIT: usize = 50;

/// J-Novel Club labs API over blocking ureq calls, each moved to the blocking
/// pool so concurrent callers are not stalled.
pub(crate) struct LabsGateway {
    base_url: String,
    token: Option<String>,
    policy: RetryPolicy,
}

impl fmt::Debug for LabsGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabsGateway")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("policy", &self.policy)
            .finish()
    }
}

impl LabsGateway {
    pub(crate) fn new(token: Option<String>) -> Self {
        Self::with_base_url(LABS_API_URL, token)
    }

    pub(crate) fn with_base_url(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            policy: RetryPolicy::default(),
        }
    }

    fn request(&self, path: &str) -> Request {
        Request::new(format!("{}{path}", self.base_url))
            .bearer(self.token.as_deref())
            .query("format", "json")
    }

    async fn send(&self, method: Method, request: Request) -> Result<String, GatewayError> {
        let policy = self.policy.clone();
        let url = request.url.clone();
        debug!(%url, ?method, "labs request");
        tokio::task::spawn_blocking(move || send_with_retries(method, &request, &policy))
            .await
            .map_err(|err| GatewayError::Remote(format!("request task for {url} failed: {err}")))?
            .map_err(|failure| gateway_error_from_http(&url, failure))
    }

    async fn get_json(&self, request: Request) -> Result<Value, GatewayError> {
        let url = request.url.clone();
        let body = self.send(Method::Get, request).await?;
        serde_json::from_str(&body)
            .map_err(|err| GatewayError::Decode(format!("invalid JSON from {url}: {err}")))
    }

    async fn get_all_pages(&self, path: &str, field: &str) -> Result<Vec<Value>, GatewayError> {
        let mut items = Vec::new();
        let mut skip = 0_usize;
        loop {
            let request = self
                .request(path)
                .query("limit", &PAGE_LIMIT.to_string())
                .query("skip", &skip.to_string());
            let page = self.get_json(request).await?;
            let batch = page
                .get(field)
                .and_then(Value::as_array)
                .ok_or_else(|| GatewayError::Decode(format!("missing '{field}' list in {path}")))?;

            let count = batch.len();
            items.extend(batch.iter().cloned());
            if count == 0 || is_last_page(&page) {
                return Ok(items);
            }
            skip += count;
        }
    }
}

#[async_trait]
impl FollowGateway for LabsGateway {
    async fn resolve_series(&self, resource: &ResourceRef) -> Result<SeriesHandle, GatewayError> {
        let value = self
            .get_json(self.request(&format!("/series/{}", resource.slug)))
            .await?;
        parse_series(&value)
    }

    async fn fetch_volumes_meta(&self, series_id: &str) -> Result<Vec<Volume>, GatewayError> {
        let items = self
            .get_all_pages(&format!("/series/{series_id}/volumes"), "volumes")
            .await?;
        parse_volumes(&items)
    }

    async fn fetch_parts_meta(&self, volume_id: &str) -> Result<Vec<Part>, GatewayError> {
        let items = self
            .get_all_pages(&format!("/volumes/{volume_id}/parts"), "parts")
            .await?;
        parse_parts(&items)
    }

    async fn list_follows(&self) -> Result<Vec<FollowedSeries>, GatewayError> {
        let items = self.get_all_pages("/me/follows", "series").await?;
        parse_follows(&items)
    }

    async fn follow_series(&self, series_id: &str) -> Result<(), GatewayError> {
        let request = self.request(&format!("/me/follow/{series_id}"));
        self.send(Method::Post, request).await.map(|_| ())
    }

    async fn unfollow_series(&self, series_id: &str) -> Result<(), GatewayError> {
        let request = self.request(&format!("/me/unfollow/{series_id}"));
        self.send(Method::Post, request).await.map(|_| ())
    }
}

fn gateway_error_from_http(url: &str, failure: HttpFailure) -> GatewayError {
    match failure.status {
        Some(404) => GatewayError::NotFound(url.to_string()),
        Some(401) | Some(403) => {
            GatewayError::Remote(format!("authentication rejected for {url}: {failure}"))
        }
        _ => GatewayError::Remote(format!("{url}: {failure}")),
    }
}

fn is_last_page(page: &Value) -> bool {
    page.pointer("/pagination/lastPage")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    let raw = value.get(key)?.as_str()?.trim();
    (!raw.is_empty()).then_some(raw)
}

pub(crate) fn parse_series(value: &Value) -> Result<SeriesHandle, GatewayError> {
    let field = |key: &str| {
        str_field(value, key)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Decode(format!("series payload without '{key}'")))
    };
    Ok(SeriesHandle {
        series_id: field("id")?,
        slug: field("slug")?,
        title: field("title")?,
    })
}

fn required_str<'a>(
    item: &'a Value,
    key: &str,
    what: &str,
    idx: usize,
) -> Result<&'a str, GatewayError> {
    str_field(item, key)
        .ok_or_else(|| GatewayError::Decode(format!("{what} #{} without '{key}'", idx + 1)))
}

pub(crate) fn parse_volumes(items: &[Value]) -> Result<Vec<Volume>, GatewayError> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let volume_id = required_str(item, "id", "volume", idx)?;
            let number = item
                .get("number")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or((idx + 1) as u32);
            Ok(Volume {
                volume_id: volume_id.to_string(),
                number,
            })
        })
        .collect()
}

/// Part numbers are positions in the payload, so a malformed item fails the
/// whole list instead of shifting every later number.
pub(crate) fn parse_parts(items: &[Value]) -> Result<Vec<Part>, GatewayError> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            Ok(Part {
                part_id: required_str(item, "id", "part", idx)?.to_string(),
                number: (idx + 1) as u32,
                launch: required_str(item, "launch", "part", idx)?.to_string(),
            })
        })
        .collect()
}

pub(crate) fn parse_follows(items: &[Value]) -> Result<Vec<FollowedSeries>, GatewayError> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let series_id = required_str(item, "id", "followed series", idx)?;
            let slug = required_str(item, "slug", "followed series", idx)?;
            let title = str_field(item, "title").unwrap_or(slug);
            Ok(FollowedSeries {
                url: url_from_series_slug(slug),
                series_id: series_id.to_string(),
                title: title.to_string(),
            })
        })
        .collect()
}
