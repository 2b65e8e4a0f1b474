//! Exact-match response cache
//!
//! Entries live until their TTL elapses or capacity overflow evicts them,
//! oldest-inserted first. Only successful responses are ever inserted.

use super::request::{ChatRequest, ResponseFormat, Role};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Bytes of each binary attachment that participate in the cache key
pub const ATTACHMENT_KEY_PREFIX_BYTES: usize = 256;

pub const COMPLETION_TTL: Duration = Duration::from_secs(5 * 60);
pub const CATALOG_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub capacity: usize,
    pub completion_ttl: Duration,
    pub catalog_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            completion_ttl: COMPLETION_TTL,
            catalog_ttl: CATALOG_TTL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

struct Entries<V> {
    map: HashMap<String, CacheEntry<V>>,
    insertion_order: VecDeque<String>,
}

pub struct ResponseCache<V> {
    capacity: usize,
    default_ttl: Duration,
    entries: RwLock<Entries<V>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            default_ttl,
            entries: RwLock::new(Entries {
                map: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
        }
    }

    /// Fresh value for `key`, if any
    pub async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .map
            .get(key)
            .filter(|entry| entry.is_fresh(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: String, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl).await;
    }

    pub async fn insert_with_ttl(&self, key: String, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if entries.map.remove(&key).is_some() {
            entries.insertion_order.retain(|k| k != &key);
        }
        Self::purge_expired(&mut entries, now);

        while entries.map.len() >= self.capacity {
            match entries.insertion_order.pop_front() {
                Some(oldest) => {
                    entries.map.remove(&oldest);
                }
                None => break,
            }
        }

        entries.insertion_order.push_back(key.clone());
        entries.map.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                inserted_at: now,
                ttl,
            },
        );
    }

    pub async fn invalidate(&self, key: &str) {
        let mut entries = self.entries.write().await;
        if entries.map.remove(key).is_some() {
            entries.insertion_order.retain(|k| k != key);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn purge_expired(entries: &mut Entries<V>, now: Instant) {
        let Entries {
            map,
            insertion_order,
        } = entries;
        map.retain(|_, entry| entry.is_fresh(now));
        insertion_order.retain(|k| map.contains_key(k));
    }
}

//
// ================= Key derivation =================
//

#[derive(Serialize)]
struct NormalizedRequest<'a> {
    model_id: &'a str,
    messages: Vec<NormalizedMessage<'a>>,
    temperature: f32,
    max_output_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct NormalizedMessage<'a> {
    role: Role,
    text: &'a str,
    attachments: Vec<NormalizedAttachment<'a>>,
}

#[derive(Serialize)]
struct NormalizedAttachment<'a> {
    media_type: &'a str,
    len: usize,
    prefix: String,
}

/// Deterministic key for a request. Binary payloads contribute only their
/// length and a bounded prefix.
pub fn cache_key(request: &ChatRequest) -> String {
    let normalized = NormalizedRequest {
        model_id: &request.model_id,
        messages: request
            .messages
            .iter()
            .map(|m| NormalizedMessage {
                role: m.role,
                text: &m.text,
                attachments: m
                    .attachments
                    .iter()
                    .map(|a| NormalizedAttachment {
                        media_type: &a.media_type,
                        len: a.data.len(),
                        prefix: hex::encode(
                            &a.data[..a.data.len().min(ATTACHMENT_KEY_PREFIX_BYTES)],
                        ),
                    })
                    .collect(),
            })
            .collect(),
        temperature: request.temperature,
        max_output_tokens: request.max_output_tokens,
        response_format: request.response_format,
    };

    let mut hasher = Sha256::new();

    // Stream JSON directly into hasher (no intermediate String)
    if serde_json::to_writer(&mut HashWriter(&mut hasher), &normalized).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
