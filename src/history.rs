use std::collections::BTreeMap;
use std::time::Duration;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::message::{json_kind, TelemetryMessage};
use crate::types::sample::{GroupData, Sample, Series};

/// Key under which the seconds since the last inbound message are published.
pub const LAST_UPDATE_ELAPSED_KEY: &str = "_last_update_elapsed";

/// Outcome of ingesting one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub samples_appended: usize,
    pub groups_replaced: usize,
    pub groups_skipped: usize,
}

/// Grouped time-series store with a sliding retention window.
///
/// Eviction is lazy: samples older than the window survive until the next
/// call to [`HistoryStore::evict`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStore {
    groups: BTreeMap<String, GroupData>,
    retention: Duration,
    last_update_elapsed: Option<f64>,
}

impl HistoryStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            groups: BTreeMap::new(),
            retention,
            last_update_elapsed: None,
        }
    }

    /// Pre-populate from a value in the published snapshot shape.
    pub fn from_json(value: Value, retention: Duration) -> Result<Self, String> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(format!(
                    "Initial snapshot must be an object, got {}",
                    json_kind(&other)
                ))
            }
        };

        let mut store = Self::new(retention);
        for (name, payload) in map {
            if name == LAST_UPDATE_ELAPSED_KEY {
                continue;
            }
            let data = match series_from_json(&payload) {
                Some(fields) => GroupData::Series(fields),
                None => GroupData::Scalar(payload),
            };
            store.groups.insert(name, data);
        }
        Ok(store)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn set_retention(&mut self, retention: Duration) {
        self.retention = retention;
    }

    pub fn group(&self, name: &str) -> Option<&GroupData> {
        self.groups.get(name)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&String, &GroupData)> {
        self.groups.iter()
    }

    pub fn series(&self, group: &str, field: &str) -> Option<&Series> {
        self.groups.get(group)?.as_series()?.get(field)
    }

    pub fn last_update_elapsed(&self) -> Option<f64> {
        self.last_update_elapsed
    }

    pub fn set_last_update_elapsed(&mut self, secs: Option<f64>) {
        self.last_update_elapsed = secs;
    }

    /// Total number of samples across every series group.
    pub fn sample_count(&self) -> usize {
        self.groups
            .values()
            .filter_map(GroupData::as_series)
            .flat_map(|fields| fields.values())
            .map(Series::len)
            .sum()
    }

    /// Append one sample, creating the group/field if absent. A scalar group
    /// is converted to a series group first.
    pub fn append(&mut self, group: &str, field: &str, value: Value, now_ms: u64) {
        if is_reserved_group(group) {
            return;
        }
        let entry = self
            .groups
            .entry(group.to_string())
            .or_insert_with(|| GroupData::Series(BTreeMap::new()));
        if !entry.is_series() {
            debug!(group, "Group switched from replace mode to history mode");
            *entry = GroupData::Series(BTreeMap::new());
        }
        let GroupData::Series(fields) = entry else {
            return;
        };
        let series = fields.entry(field.to_string()).or_default();
        // Clamp so a wall clock stepping backwards cannot break ordering.
        let timestamp = series.back().map_or(now_ms, |last| last.timestamp.max(now_ms));
        series.push_back(Sample { value, timestamp });
    }

    /// Store `value` as the group's current value, discarding whatever was there.
    pub fn replace(&mut self, group: &str, value: Value) {
        if is_reserved_group(group) {
            return;
        }
        self.groups.insert(group.to_string(), GroupData::Scalar(value));
    }

    /// Apply one parsed message. A malformed group is skipped without
    /// affecting the others.
    pub fn ingest(&mut self, message: &TelemetryMessage, now_ms: u64) -> IngestReport {
        let mut report = IngestReport::default();
        for (group, payload) in message.groups() {
            if is_reserved_group(group) {
                warn!(group = group.as_str(), "Skipping group with reserved name");
                report.groups_skipped += 1;
                continue;
            }
            if message.is_replace_mode(group) {
                self.replace(group, payload.clone());
                report.groups_replaced += 1;
                continue;
            }
            match payload {
                Value::Object(fields) => {
                    for (field, value) in fields {
                        self.append(group, field, value.clone(), now_ms);
                        report.samples_appended += 1;
                    }
                }
                other => {
                    warn!(
                        group = group.as_str(),
                        kind = json_kind(other),
                        "Skipping history group whose payload is not an object"
                    );
                    report.groups_skipped += 1;
                }
            }
        }
        report
    }

    /// Drop every sample older than `now_ms - retention`. Scalar groups are
    /// untouched and emptied fields stay in place. Returns the number evicted.
    pub fn evict(&mut self, now_ms: u64) -> usize {
        let retention_ms = u64::try_from(self.retention.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_ms.saturating_sub(retention_ms);
        let mut evicted = 0;
        for data in self.groups.values_mut() {
            let GroupData::Series(fields) = data else {
                continue;
            };
            for series in fields.values_mut() {
                while series.front().is_some_and(|s| s.timestamp < cutoff) {
                    series.pop_front();
                    evicted += 1;
                }
            }
        }
        evicted
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for HistoryStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.groups.len() + 1))?;
        for (name, data) in &self.groups {
            map.serialize_entry(name, data)?;
        }
        map.serialize_entry(LAST_UPDATE_ELAPSED_KEY, &self.last_update_elapsed)?;
        map.end()
    }
}

/// Group names the store cannot hold without clashing with published keys.
fn is_reserved_group(name: &str) -> bool {
    name == LAST_UPDATE_ELAPSED_KEY
}

/// `Some` when every field of `payload` is an array of `{value, timestamp}`.
/// Samples are sorted by timestamp since eviction only trims the front.
fn series_from_json(payload: &Value) -> Option<BTreeMap<String, Series>> {
    let fields = payload.as_object()?;
    let mut out = BTreeMap::new();
    for (field, samples) in fields {
        let mut series: Series = serde_json::from_value(samples.clone()).ok()?;
        series.make_contiguous().sort_by_key(|sample| sample.timestamp);
        out.insert(field.clone(), series);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(retention_secs: u64) -> HistoryStore {
        HistoryStore::new(Duration::from_secs(retention_secs))
    }

    fn msg(text: &str) -> TelemetryMessage {
        TelemetryMessage::parse(text).unwrap()
    }

    #[test]
    fn history_group_appends_samples() {
        let mut s = store(30);
        let report = s.ingest(&msg(r#"{"telemetry": {"x": 1}}"#), 0);
        assert_eq!(report.samples_appended, 1);
        assert_eq!(
            s.to_json(),
            json!({
                "telemetry": {"x": [{"value": 1, "timestamp": 0}]},
                "_last_update_elapsed": null
            })
        );
    }

    #[test]
    fn retention_window_empties_old_series() {
        let mut s = store(2);
        s.ingest(&msg(r#"{"telemetry": {"x": 1}}"#), 0);
        assert_eq!(s.series("telemetry", "x").unwrap().len(), 1);

        let evicted = s.evict(3_000);
        assert_eq!(evicted, 1);
        let x = s.series("telemetry", "x").unwrap();
        assert!(x.is_empty());
    }

    #[test]
    fn evict_keeps_samples_inside_window() {
        let mut s = store(2);
        for t in [0, 500, 1_000, 1_500, 2_000, 2_500] {
            s.ingest(&msg(r#"{"g": {"f": 0}}"#), t);
        }
        s.evict(3_000);
        let remaining: Vec<u64> =
            s.series("g", "f").unwrap().iter().map(|x| x.timestamp).collect();
        assert_eq!(remaining, vec![1_000, 1_500, 2_000, 2_500]);
        assert!(remaining.iter().all(|&t| t >= 3_000 - 2_000));
    }

    #[test]
    fn evict_before_window_elapsed_is_noop() {
        let mut s = store(30);
        s.ingest(&msg(r#"{"g": {"f": 0}}"#), 10_000);
        assert_eq!(s.evict(12_000), 0);
        assert_eq!(s.sample_count(), 1);
    }

    #[test]
    fn replace_group_keeps_only_latest_payload() {
        let mut s = store(30);
        s.ingest(&msg(r#"{"cfg": {"mode": "auto"}, "noHistoryFields": ["cfg"]}"#), 0);
        s.ingest(&msg(r#"{"cfg": {"mode": "manual"}, "noHistoryFields": ["cfg"]}"#), 100);
        assert_eq!(s.group("cfg").unwrap().as_scalar(), Some(&json!({"mode": "manual"})));
        assert!(s.to_json()["cfg"].is_object());
    }

    #[test]
    fn replace_group_accepts_non_object_payload() {
        let mut s = store(30);
        s.ingest(
            &msg(
                r#"{"alert_conditions": [{"alert": "Overpressure"}],
                    "noHistoryFields": ["alert_conditions"]}"#,
            ),
            0,
        );
        assert_eq!(
            s.group("alert_conditions").unwrap().as_scalar(),
            Some(&json!([{"alert": "Overpressure"}]))
        );
    }

    #[test]
    fn scalar_groups_survive_eviction() {
        let mut s = store(1);
        s.ingest(&msg(r#"{"cfg": 5, "noHistoryFields": ["cfg"]}"#), 0);
        s.evict(60_000);
        assert_eq!(s.group("cfg").unwrap().as_scalar(), Some(&json!(5)));
    }

    #[test]
    fn group_can_flip_between_modes() {
        let mut s = store(30);
        s.ingest(&msg(r#"{"g": {"f": 1}}"#), 0);
        s.ingest(&msg(r#"{"g": "latest", "noHistoryFields": ["g"]}"#), 10);
        assert_eq!(s.group("g").unwrap().as_scalar(), Some(&json!("latest")));

        s.ingest(&msg(r#"{"g": {"f": 2}}"#), 20);
        let f = s.series("g", "f").unwrap();
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].value, json!(2));
    }

    #[test]
    fn malformed_group_does_not_block_others() {
        let mut s = store(30);
        let report = s.ingest(&msg(r#"{"bad": 42, "good": {"y": "ok"}}"#), 0);
        assert_eq!(report.groups_skipped, 1);
        assert_eq!(report.samples_appended, 1);
        assert!(s.group("bad").is_none());
        assert_eq!(s.series("good", "y").unwrap()[0].value, json!("ok"));
    }

    #[test]
    fn timestamps_stay_non_decreasing_when_clock_steps_back() {
        let mut s = store(30);
        s.append("g", "f", json!(1), 5_000);
        s.append("g", "f", json!(2), 4_000);
        s.append("g", "f", json!(3), 6_000);
        let ts: Vec<u64> = s.series("g", "f").unwrap().iter().map(|x| x.timestamp).collect();
        assert_eq!(ts, vec![5_000, 5_000, 6_000]);
    }

    #[test]
    fn missing_field_is_absent_not_error() {
        let s = store(30);
        assert!(s.series("telemetry", "x").is_none());
        assert_eq!(s.sample_count(), 0);
    }

    #[test]
    fn from_json_restores_published_shape() {
        let initial = json!({
            "sensors": {"x": [{"value": 1.5, "timestamp": 100}, {"value": 2.0, "timestamp": 200}]},
            "display_fields": ["x", "y"],
            "cfg": {"mode": "auto"},
            "_last_update_elapsed": 0.3
        });
        let s = HistoryStore::from_json(initial, Duration::from_secs(30)).unwrap();
        assert_eq!(s.series("sensors", "x").unwrap().len(), 2);
        assert_eq!(s.group("display_fields").unwrap().as_scalar(), Some(&json!(["x", "y"])));
        assert_eq!(s.group("cfg").unwrap().as_scalar(), Some(&json!({"mode": "auto"})));
        assert!(s.group(LAST_UPDATE_ELAPSED_KEY).is_none());
        assert_eq!(s.last_update_elapsed(), None);
    }

    #[test]
    fn from_json_orders_unsorted_series_before_eviction() {
        let initial = json!({
            "g": {"f": [
                {"value": "late", "timestamp": 10_000},
                {"value": "early", "timestamp": 0},
                {"value": "mid", "timestamp": 9_500}
            ]}
        });
        let mut s = HistoryStore::from_json(initial, Duration::from_secs(2)).unwrap();
        let ts: Vec<u64> = s.series("g", "f").unwrap().iter().map(|x| x.timestamp).collect();
        assert_eq!(ts, vec![0, 9_500, 10_000]);

        assert_eq!(s.evict(11_000), 1);
        let survivors: Vec<u64> =
            s.series("g", "f").unwrap().iter().map(|x| x.timestamp).collect();
        assert_eq!(survivors, vec![9_500, 10_000]);
        assert!(survivors.iter().all(|&t| t >= 11_000 - 2_000));
    }

    #[test]
    fn reserved_group_name_is_skipped() {
        let mut s = store(30);
        let report = s.ingest(
            &msg(r#"{"_last_update_elapsed": {"x": 1}, "other": {"y": 2}}"#),
            0,
        );
        assert_eq!(report.groups_skipped, 1);
        assert_eq!(report.samples_appended, 1);
        assert!(s.group(LAST_UPDATE_ELAPSED_KEY).is_none());

        s.ingest(
            &msg(r#"{"_last_update_elapsed": 3, "noHistoryFields": ["_last_update_elapsed"]}"#),
            10,
        );
        assert!(s.group(LAST_UPDATE_ELAPSED_KEY).is_none());

        s.set_last_update_elapsed(Some(1.5));
        let text = serde_json::to_string(&s).unwrap();
        assert_eq!(text.matches(LAST_UPDATE_ELAPSED_KEY).count(), 1);
        assert_eq!(s.to_json()[LAST_UPDATE_ELAPSED_KEY], json!(1.5));
        assert_eq!(s.series("other", "y").unwrap()[0].value, json!(2));
    }

    #[test]
    fn from_json_rejects_non_object() {
        assert!(HistoryStore::from_json(json!([1, 2]), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn published_snapshot_carries_elapsed_seconds() {
        let mut s = store(30);
        s.set_last_update_elapsed(Some(1.25));
        assert_eq!(s.to_json()[LAST_UPDATE_ELAPSED_KEY], json!(1.25));
    }
}
