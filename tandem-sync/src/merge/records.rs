//! Record-level merge for keyed collections with completion history.
//!
//! Used by habits and tasks. Records are matched by id and resolved by their
//! own `updatedAt` (falling back to `createdAt`); the per-day
//! `completionHistory` maps are unioned so a check-off made on either device
//! survives.

use crate::error::{SyncError, SyncResult};
use crate::registry::SliceMerge;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tandem_types::Timestamp;

const HISTORY_FIELD: &str = "completionHistory";
const TIME_FIELDS: [&str; 2] = ["updatedAt", "createdAt"];

/// Merges one keyed collection record by record.
#[derive(Debug, Clone)]
pub struct RecordMerge {
    collection: &'static str,
    history_field: &'static str,
}

impl RecordMerge {
    /// Merge for the `habits` store.
    #[must_use]
    pub fn habits() -> Self {
        Self::new("habits")
    }

    /// Merge for the `tasks` store.
    #[must_use]
    pub fn tasks() -> Self {
        Self::new("tasks")
    }

    /// Merge for an arbitrary collection with a `completionHistory` field.
    #[must_use]
    pub fn new(collection: &'static str) -> Self {
        Self {
            collection,
            history_field: HISTORY_FIELD,
        }
    }

    /// The collection this merge operates on.
    #[must_use]
    pub fn collection(&self) -> &'static str {
        self.collection
    }

    fn merge_record(&self, local: &Value, remote: &Value) -> Value {
        match record_time(remote).cmp(&record_time(local)) {
            Ordering::Greater => self.with_history_union(remote, local, remote),
            Ordering::Equal => self.with_history_union(local, local, remote),
            Ordering::Less => local.clone(),
        }
    }

    /// `base` with its history replaced by local's history overlaid with
    /// remote's. Remote wins on the same day.
    fn with_history_union(&self, base: &Value, local: &Value, remote: &Value) -> Value {
        let local_history = local.get(self.history_field).and_then(Value::as_object);
        let remote_history = remote.get(self.history_field).and_then(Value::as_object);
        if local_history.is_none() && remote_history.is_none() {
            return base.clone();
        }

        let mut history = local_history.cloned().unwrap_or_default();
        if let Some(remote_history) = remote_history {
            for (day, entry) in remote_history {
                history.insert(day.clone(), entry.clone());
            }
        }

        let mut record = base.clone();
        if let Some(fields) = record.as_object_mut() {
            fields.insert(self.history_field.to_string(), Value::Object(history));
        }
        record
    }

    fn records<'a>(&self, fields: &'a Map<String, Value>, side: &str) -> SyncResult<Option<&'a Map<String, Value>>> {
        match fields.get(self.collection) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(records)) => Ok(Some(records)),
            Some(_) => Err(SyncError::Merge {
                store: self.collection.to_string(),
                message: format!("{side} `{}` is not a keyed collection", self.collection),
            }),
        }
    }
}

impl SliceMerge for RecordMerge {
    fn merge(
        &self,
        local: &Map<String, Value>,
        remote: &Map<String, Value>,
    ) -> SyncResult<Map<String, Value>> {
        let mut merged = local.clone();
        for (key, value) in remote {
            if key != self.collection && !merged.contains_key(key) {
                merged.insert(key.clone(), value.clone());
            }
        }

        let Some(remote_records) = self.records(remote, "remote")? else {
            return Ok(merged);
        };
        let mut records = self.records(local, "local")?.cloned().unwrap_or_default();

        for (id, remote_record) in remote_records {
            let next = match records.get(id) {
                Some(local_record) => self.merge_record(local_record, remote_record),
                None => remote_record.clone(),
            };
            records.insert(id.clone(), next);
        }

        merged.insert(self.collection.to_string(), Value::Object(records));
        Ok(merged)
    }
}

/// A record's last-modified time: `updatedAt`, else `createdAt`, else zero.
/// Accepts epoch milliseconds or RFC 3339 strings.
pub(crate) fn record_time(record: &Value) -> Timestamp {
    TIME_FIELDS
        .iter()
        .filter_map(|field| record.get(*field))
        .find_map(parse_time)
        .unwrap_or(Timestamp::ZERO)
}

fn parse_time(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(Timestamp::from_millis),
        Value::String(s) => s
            .parse::<u64>()
            .ok()
            .map(Timestamp::from_millis)
            .or_else(|| Timestamp::parse_rfc3339(s).ok()),
        _ => None,
    }
}
