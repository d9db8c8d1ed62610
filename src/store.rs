use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::jncweb::{
    is_current_series_url, series_slug_from_url, title_from_slug, to_new_website_series_url,
    url_from_series_slug,
};

/// Part date recorded for a series that has no published part yet. `0000-...`
/// is not a valid date, hence the odd value.
pub(crate) const NOT_STARTED_PART_DATE: &str = "1111-11-11T11:11:11.111Z";

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Error, Debug)]
pub(crate) enum StoreError {
    #[error("failed to read tracked series at {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed tracked series file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("tracked series file {} must contain a JSON object", .path.display())]
    NotAnObject { path: PathBuf },

    #[error("cannot migrate tracked entry '{key}': {reason}")]
    Migration { key: String, reason: String },

    #[error("failed to serialize tracked series: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write tracked series to {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TrackedEntry {
    pub(crate) name: String,
    pub(crate) part: u32,
    pub(crate) part_date: String,
}

impl TrackedEntry {
    pub(crate) fn not_started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            part: 0,
            part_date: NOT_STARTED_PART_DATE.to_string(),
        }
    }

    pub(crate) fn is_not_started(&self) -> bool {
        self.part_date == NOT_STARTED_PART_DATE
    }

    pub(crate) fn part_date_display(&self) -> String {
        if self.is_not_started() {
            return "-".to_string();
        }
        DateTime::parse_from_rfc3339(&self.part_date)
            .map(|dt| dt.with_timezone(&Local).format("%b %d, %Y").to_string())
            .unwrap_or_else(|_| self.part_date.clone())
    }
}

/// Tracked series keyed by their canonical series URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub(crate) struct TrackingStore {
    entries: BTreeMap<String, TrackedEntry>,
}

impl TrackingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn contains(&self, series_url: &str) -> bool {
        self.entries.contains_key(series_url)
    }

    pub(crate) fn get(&self, series_url: &str) -> Option<&TrackedEntry> {
        self.entries.get(series_url)
    }

    pub(crate) fn insert(
        &mut self,
        series_url: String,
        entry: TrackedEntry,
    ) -> Option<TrackedEntry> {
        self.entries.insert(series_url, entry)
    }

    pub(crate) fn remove(&mut self, series_url: &str) -> Option<TrackedEntry> {
        self.entries.remove(series_url)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &TrackedEntry)> {
        self.entries.iter()
    }

    pub(crate) fn urls(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&str, &TrackedEntry) -> bool) {
        self.entries.retain(|url, entry| keep(url, entry));
    }

    pub(crate) fn to_json_pretty(&self) -> Result<String, StoreError> {
        let mut out = serde_json::to_string_pretty(&self.entries)?;
        out.push('\n');
        Ok(out)
    }
}

/// Reads the tracked series file. A missing file is a first run and yields an
/// empty store.
pub(crate) fn load(path: &Path) -> Result<TrackingStore, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no tracked series file yet");
            return Ok(TrackingStore::new());
        }
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let parsed: Value = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let Value::Object(data) = parsed else {
        return Err(StoreError::NotAnObject {
            path: path.to_path_buf(),
        });
    };

    migrate(&data)
}

/// Writes the store next to `path` then renames it into place so the file is
/// never observed half written.
pub(crate) fn save(path: &Path, store: &TrackingStore) -> Result<(), StoreError> {
    let payload = store.to_json_pretty()?;
    let temp_path = temp_path_for(path);
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(payload.as_bytes())?;
        file.sync_all()
    });
    if let Err(source) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(write_err(source));
    }

    if let Err(source) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(write_err(source));
    }

    debug!(path = %path.display(), entries = store.len(), "saved tracked series");
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Converts any on-disk layout into the current one:
/// - a bare number instead of an object is a legacy part-only entry keyed by
///   series slug
/// - series URLs from the old website layout are rewritten
///
/// Running it on current data changes nothing.
pub(crate) fn migrate(data: &Map<String, Value>) -> Result<TrackingStore, StoreError> {
    let mut legacy = Vec::new();
    let mut current = Vec::new();

    for (key, value) in data {
        let url = canonical_series_url(key)?;
        let entry = match value {
            Value::Object(record) => entry_from_record(key, record)?,
            other => TrackedEntry {
                name: title_from_slug(&series_slug(key)),
                part: part_from_value(key, other)?,
                part_date: NOT_STARTED_PART_DATE.to_string(),
            },
        };

        if key == &url && is_current_series_url(key) {
            current.push((url, entry));
        } else {
            legacy.push((url, entry));
        }
    }

    // entries already in the current layout win over migrated duplicates
    let mut store = TrackingStore::new();
    for (url, entry) in legacy.into_iter().chain(current) {
        if let Some(replaced) = store.insert(url.clone(), entry) {
            debug!(%url, name = %replaced.name, "dropped duplicate legacy entry");
        }
    }
    Ok(store)
}

fn canonical_series_url(key: &str) -> Result<String, StoreError> {
    if series_slug_from_url(key).is_some() {
        return Ok(to_new_website_series_url(key));
    }
    let slug = key.trim().trim_matches('/');
    if slug.is_empty() || slug.contains(['/', ':', '?', '#']) {
        return Err(migration_error(key, "key is neither a series url nor a series slug"));
    }
    Ok(url_from_series_slug(slug))
}

fn series_slug(key: &str) -> String {
    series_slug_from_url(key).unwrap_or_else(|| key.trim().trim_matches('/').to_string())
}

fn entry_from_record(key: &str, record: &Map<String, Value>) -> Result<TrackedEntry, StoreError> {
    let name = match record.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        Some(_) => return Err(migration_error(key, "'name' must be a non-empty string")),
        None => title_from_slug(&series_slug(key)),
    };

    let part = match record.get("part") {
        Some(value) => part_from_value(key, value)?,
        None => return Err(migration_error(key, "missing 'part'")),
    };

    let part_date = match record.get("part_date") {
        Some(Value::String(date)) => {
            if date != NOT_STARTED_PART_DATE && DateTime::parse_from_rfc3339(date).is_err() {
                return Err(migration_error(key, "'part_date' is not an ISO-8601 timestamp"));
            }
            date.clone()
        }
        // written before part dates were recorded
        None | Some(Value::Null) => NOT_STARTED_PART_DATE.to_string(),
        Some(_) => return Err(migration_error(key, "'part_date' must be a string")),
    };

    Ok(TrackedEntry {
        name,
        part,
        part_date,
    })
}

fn part_from_value(key: &str, value: &Value) -> Result<u32, StoreError> {
    value
        .as_u64()
        .and_then(|part| u32::try_from(part).ok())
        .ok_or_else(|| migration_error(key, &format!("'{value}' is not a part number")))
}

fn migration_error(key: &str, reason: &str) -> StoreError {
    StoreError::Migration {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn remigrate(store: &TrackingStore) -> TrackingStore {
        let value = serde_json::to_value(store).expect("serialize store");
        migrate(&object(value)).expect("migrated data should migrate again")
    }

    #[test]
    fn load_missing_file_returns_empty_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = load(&temp.path().join("tracked.json")).expect("missing file is fine");
        assert!(store.is_empty());
    }

    #[test]
    fn load_rejects_malformed_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tracked.json");
        fs::write(&path, "{ not json").expect("write");

        let err = load(&path).expect_err("malformed json is fatal");
        assert!(matches!(err, StoreError::Parse { .. }), "unexpected error: {err}");
    }

    #[test]
    fn load_rejects_non_object_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tracked.json");
        fs::write(&path, "[1, 2]").expect("write");

        assert!(matches!(load(&path), Err(StoreError::NotAnObject { .. })));
    }

    #[test]
    fn migrate_converts_bare_part_keyed_by_slug() {
        let store = migrate(&object(json!({ "the-faraway-paladin": 7 }))).expect("migrate");

        let entry = store
            .get("https://j-novel.club/series/the-faraway-paladin")
            .expect("entry should be keyed by url");
        assert_eq!(entry.name, "The Faraway Paladin");
        assert_eq!(entry.part, 7);
        assert!(entry.is_not_started());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn migrate_rewrites_legacy_urls() {
        let store = migrate(&object(json!({
            "https://j-novel.club/s/my-series": {
                "name": "My Series",
                "part": 3,
                "part_date": "2021-03-04T05:06:07.000Z"
            }
        })))
        .expect("migrate");

        let urls: Vec<_> = store.urls().cloned().collect();
        assert_eq!(urls, vec!["https://j-novel.club/series/my-series".to_string()]);
        assert_eq!(
            store.get(&urls[0]).map(|entry| entry.part_date.as_str()),
            Some("2021-03-04T05:06:07.000Z")
        );
    }

    #[test]
    fn migrate_converts_slug_keyed_record() {
        let store = migrate(&object(json!({
            "my-series": { "name": "My Series", "part": 5, "part_date": "2021-03-04T05:06:07.000Z" }
        })))
        .expect("migrate");

        assert!(store.contains("https://j-novel.club/series/my-series"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn migrate_fills_missing_part_date_with_sentinel() {
        let store = migrate(&object(json!({
            "https://j-novel.club/series/s1": { "name": "S1", "part": 2 }
        })))
        .expect("migrate");

        let entry = store.get("https://j-novel.club/series/s1").expect("entry");
        assert_eq!(entry.part, 2);
        assert_eq!(entry.part_date, NOT_STARTED_PART_DATE);
    }

    #[test]
    fn migrate_prefers_current_entry_over_legacy_duplicate() {
        let store = migrate(&object(json!({
            "dup-series": 1,
            "https://j-novel.club/series/dup-series": {
                "name": "Dup Series",
                "part": 9,
                "part_date": "2022-01-01T00:00:00Z"
            }
        })))
        .expect("migrate");

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get("https://j-novel.club/series/dup-series").map(|entry| entry.part),
            Some(9)
        );
    }

    #[test]
    fn migrate_fails_loudly_on_uncoercible_records() {
        for data in [
            json!({ "https://j-novel.club/series/x": { "name": "X", "part": "two" } }),
            json!({ "https://j-novel.club/series/x": { "name": 4, "part": 1 } }),
            json!({ "https://j-novel.club/series/x": { "name": "X" } }),
            json!({ "https://j-novel.club/series/x": { "name": "X", "part": 1, "part_date": "yesterday" } }),
            json!({ "some-slug": -3 }),
            json!({ "some-slug": "1.2" }),
            json!({ "https://example.com/x": 1 }),
        ] {
            let err = migrate(&object(data.clone())).expect_err("record should be rejected");
            assert!(
                matches!(err, StoreError::Migration { .. }),
                "unexpected error for {data}: {err}"
            );
        }
    }

    #[test]
    fn migrate_is_noop_on_current_data() {
        let data = object(json!({
            "https://j-novel.club/series/a": { "name": "A", "part": 0, "part_date": NOT_STARTED_PART_DATE },
            "https://j-novel.club/series/b": { "name": "B", "part": 12, "part_date": "2020-02-02T02:02:02.000Z" }
        }));

        let store = migrate(&data).expect("migrate");
        assert_eq!(serde_json::to_value(&store).expect("to value"), Value::Object(data));
    }

    #[test]
    fn save_writes_sorted_keys_and_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tracked.json");
        let mut store = TrackingStore::new();
        store.insert(
            "https://j-novel.club/series/zeta".to_string(),
            TrackedEntry::not_started("Zeta"),
        );
        store.insert(
            "https://j-novel.club/series/alpha".to_string(),
            TrackedEntry {
                name: "Alpha".to_string(),
                part: 4,
                part_date: "2023-05-06T07:08:09.000Z".to_string(),
            },
        );

        save(&path, &store).expect("save");

        let raw = fs::read_to_string(&path).expect("read back");
        let alpha = raw.find("series/alpha").expect("alpha present");
        let zeta = raw.find("series/zeta").expect("zeta present");
        assert!(alpha < zeta, "keys should be sorted:\n{raw}");
        assert!(raw.contains("\n  \"https://j-novel.club/series/alpha\": {"));
        assert_eq!(load(&path).expect("load"), store);
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn failed_save_leaves_previous_file_intact() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tracked.json");
        let original = "{\"https://j-novel.club/series/a\": {\"name\": \"A\", \"part\": 1, \"part_date\": \"2020-01-01T00:00:00Z\"}}";
        fs::write(&path, original).expect("seed file");

        // a directory squatting on the temp path makes the temp write fail
        fs::create_dir(temp_path_for(&path)).expect("block temp path");

        let err = save(&path, &TrackingStore::new()).expect_err("temp write should fail");
        assert!(matches!(err, StoreError::Write { .. }));
        assert_eq!(fs::read_to_string(&path).expect("read"), original);
    }

    #[test]
    fn temp_file_sits_next_to_target() {
        let path = Path::new("/cfg/tracked.json");
        assert_eq!(temp_path_for(path), Path::new("/cfg/tracked.json.tmp"));
    }

    fn legacy_or_current_value() -> impl Strategy<Value = (String, Value)> {
        let slug = "[a-z]{1,8}(-[a-z]{1,8}){0,2}";
        prop_oneof![
            (slug, 0u32..500).prop_map(|(slug, part)| (slug, json!(part))),
            (slug, 0u32..500).prop_map(|(slug, part)| (
                format!("https://j-novel.club/s/{slug}"),
                json!({ "name": "Legacy", "part": part })
            )),
            (slug, 0u32..500).prop_map(|(slug, part)| (
                format!("https://j-novel.club/series/{slug}"),
                json!({ "name": "Current", "part": part, "part_date": "2021-07-08T09:10:11.000Z" })
            )),
        ]
    }

    proptest! {
        #[test]
        fn migrate_is_idempotent(entries in proptest::collection::vec(legacy_or_current_value(), 0..12)) {
            let data: Map<String, Value> = entries.into_iter().collect();
            let once = migrate(&data).expect("generated data is migratable");
            let twice = remigrate(&once);
            prop_assert_eq!(&twice, &once);
            prop_assert!(once.urls().all(|url| is_current_series_url(url)));
        }
    }
}
