/// Content-addressed deduplication of inbound events.
///
/// Gateways retransmit: the same message upsert or connection flap can
/// arrive several times within seconds. The cache answers "has an event
/// with this fingerprint already been admitted recently" so workers never
/// reprocess a retransmission, while genuinely new events of the same
/// type/source pass through.
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::DedupConfig;

/// Payload keys that change on every retransmission and must never
/// participate in a fingerprint.
const VOLATILE_KEYS: &[&str] = &["timestamp", "messageTimestamp", "t", "ts", "date_time"];

#[derive(Debug, Clone)]
struct DedupEntry {
    event_type: String,
    source: String,
    first_seen_at: Instant,
    last_seen_at: Instant,
    hit_count: u64,
    ttl: Duration,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, DedupEntry>,
    total_checked: u64,
    total_filtered: u64,
}

/// Aggregate counters for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct DedupStats {
    pub total_checked: u64,
    pub total_filtered: u64,
    pub filter_rate: f64,
    pub entries: usize,
}

/// One cache entry as reported by the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct DedupEntryInfo {
    pub fingerprint: String,
    pub event_type: String,
    pub source: String,
    pub hit_count: u64,
    pub age_secs: u64,
    pub last_seen_secs_ago: u64,
}

pub struct DeduplicationCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    short_ttl: Duration,
    max_entries: usize,
}

impl DeduplicationCache {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            ttl: Duration::from_secs(config.ttl_secs),
            short_ttl: Duration::from_secs(config.short_ttl_secs),
            max_entries: config.max_entries.max(1),
        }
    }

    /// Deterministic fingerprint over the event's stable identifying
    /// fields. Volatile fields are excluded so a retransmission hashes to
    /// the same value as the original delivery.
    pub fn fingerprint(event_type: &str, source: &str, payload: &serde_json::Value) -> String {
        let stable = stable_view(event_type, payload);
        let mut hasher = Sha256::new();
        hasher.update(event_type.as_bytes());
        hasher.update(b"|");
        hasher.update(source.as_bytes());
        hasher.update(b"|");
        hasher.update(stable.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Decide whether an event should be processed. A hit within the TTL
    /// is filtered and refreshes the entry (sliding TTL); a miss or an
    /// expired entry admits the event and records its fingerprint.
    pub async fn should_process(
        &self,
        event_type: &str,
        source: &str,
        payload: &serde_json::Value,
    ) -> bool {
        self.should_process_at(event_type, source, payload, Instant::now())
            .await
    }

    async fn should_process_at(
        &self,
        event_type: &str,
        source: &str,
        payload: &serde_json::Value,
        now: Instant,
    ) -> bool {
        let fingerprint = Self::fingerprint(event_type, source, payload);
        let ttl = self.ttl_for(event_type);

        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        inner.total_checked += 1;

        if let Some(entry) = inner.entries.get_mut(&fingerprint) {
            if now.duration_since(entry.last_seen_at) < entry.ttl {
                entry.hit_count += 1;
                entry.last_seen_at = now;
                inner.total_filtered += 1;
                tracing::debug!(
                    event_type = %event_type,
                    source = %source,
                    hits = entry.hit_count,
                    "duplicate event filtered"
                );
                return false;
            }
        }

        // Lazy eviction of expired entries on the insert path keeps the
        // hot path free of a separate sweep when traffic is steady.
        inner
            .entries
            .retain(|_, e| now.duration_since(e.last_seen_at) < e.ttl);

        inner.entries.insert(
            fingerprint,
            DedupEntry {
                event_type: event_type.to_string(),
                source: source.to_string(),
                first_seen_at: now,
                last_seen_at: now,
                hit_count: 0,
                ttl,
            },
        );

        // Size cap independent of TTL: evict least-recently-seen first
        while inner.entries.len() > self.max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_seen_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    inner.entries.remove(&key);
                }
                None => break,
            }
        }

        true
    }

    fn ttl_for(&self, event_type: &str) -> Duration {
        // Presence/connection events repeat legitimately at high frequency
        // and only carry value on state change, hence the short TTL.
        if event_type.starts_with("presence.") || event_type == "connection.update" {
            self.short_ttl
        } else {
            self.ttl
        }
    }

    pub async fn stats(&self) -> DedupStats {
        let inner = self.inner.lock().await;
        let filter_rate = if inner.total_checked == 0 {
            0.0
        } else {
            inner.total_filtered as f64 / inner.total_checked as f64
        };
        DedupStats {
            total_checked: inner.total_checked,
            total_filtered: inner.total_filtered,
            filter_rate,
            entries: inner.entries.len(),
        }
    }

    /// Entries ordered by hit count, most-duplicated first. Read-only.
    pub async fn cache_info(&self) -> Vec<DedupEntryInfo> {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        let mut info: Vec<DedupEntryInfo> = inner
            .entries
            .iter()
            .map(|(fingerprint, e)| DedupEntryInfo {
                fingerprint: fingerprint.clone(),
                event_type: e.event_type.clone(),
                source: e.source.clone(),
                hit_count: e.hit_count,
                age_secs: now.duration_since(e.first_seen_at).as_secs(),
                last_seen_secs_ago: now.duration_since(e.last_seen_at).as_secs(),
            })
            .collect();
        info.sort_by(|a, b| b.hit_count.cmp(&a.hit_count));
        info
    }

    pub async fn reset_stats(&self) {
        let mut inner = self.inner.lock().await;
        inner.total_checked = 0;
        inner.total_filtered = 0;
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
    }

    /// Remove expired entries. Idempotent; also runs lazily on insert.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner
            .entries
            .retain(|_, e| now.duration_since(e.last_seen_at) < e.ttl);
    }
}

/// Serialize the stable subset of a payload in canonical (key-sorted) form.
///
/// Known event types use an explicit allow-list of identifying fields; an
/// unknown type falls back to the whole payload with volatile keys
/// stripped, which errs toward under-filtering.
fn stable_view(event_type: &str, payload: &serde_json::Value) -> String {
    match event_type {
        "messages.upsert" => extract_fields(
            payload,
            &[&["key", "id"], &["key", "remoteJid"], &["key", "fromMe"]],
        ),
        "messages.update" => extract_fields(
            payload,
            &[&["key", "id"], &["key", "remoteJid"], &["update", "status"]],
        ),
        "connection.update" => extract_fields(payload, &[&["connection"], &["state"]]),
        "presence.update" => {
            let id = extract_fields(payload, &[&["id"]]);
            let participants = payload
                .get("presences")
                .and_then(|p| p.as_object())
                .map(|map| {
                    let mut keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
                    keys.sort_unstable();
                    keys.join(",")
                })
                .unwrap_or_default();
            format!("{id}#{participants}")
        }
        _ => canonicalize(&strip_volatile(payload)),
    }
}

fn extract_fields(payload: &serde_json::Value, paths: &[&[&str]]) -> String {
    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        let mut cursor = payload;
        let mut found = true;
        for segment in *path {
            match cursor.get(segment) {
                Some(next) => cursor = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            parts.push(canonicalize(cursor));
        } else {
            parts.push(String::new());
        }
    }
    parts.join("#")
}

fn strip_volatile(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .filter(|(k, _)| !VOLATILE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), strip_volatile(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(strip_volatile).collect())
        }
        other => other.clone(),
    }
}

/// Key-sorted rendering so logically equal objects hash identically
/// regardless of key insertion order.
fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let fields: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{k}:{v}"))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}
