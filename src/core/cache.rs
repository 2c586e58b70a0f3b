//! Process-local LRU + TTL cache for forms, question batches, stats and submissions.
//!
//! The cache is an optimization only. Every miss is rebuilt from the store, and a
//! malfunctioning cache (poisoned lock) behaves as a miss instead of an error.
//!
//! Each slot owns exactly one [`ExpiryHandle`]. Handles are created only by
//! `schedule_expiry` and dropped only by `cancel_expiry`; every path that replaces,
//! refreshes or removes a slot goes through those two calls, so an expiry scheduled
//! for an old value can never fire against a newer one.
//!
//! TTL is sliding: a hit re-arms the entry with the TTL the value was stored with.

use crate::core::config::{CacheConfig, CachePolicy};
use crate::core::time::{Clock, SystemClock};
use crate::plugins::questions::{Form, Question};
use crate::plugins::stats::FormStats;
use crate::plugins::submissions::Submission;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Longest deadline ever scheduled; larger TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A scheduled expiry. Ordered by deadline, ties broken by creation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpiryHandle {
    deadline: Instant,
    seq: u64,
}

impl ExpiryHandle {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

struct Slot<V> {
    value: V,
    ttl: Duration,
    expiry: ExpiryHandle,
    recency: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Bounded map with least-recently-used eviction and per-entry sliding TTL.
pub struct LruTtlCache<V> {
    max_size: usize,
    default_ttl: Duration,
    entries: FxHashMap<String, Slot<V>>,
    // recency tick -> key; first entry is the least recently used
    recency: BTreeMap<u64, String>,
    // scheduled expiries -> key; first entry fires first
    expiries: BTreeMap<ExpiryHandle, String>,
    next_tick: u64,
    next_seq: u64,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
}

impl<V: Clone> LruTtlCache<V> {
    pub fn new(policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        let max_size = policy.max_size.max(1);
        Self {
            max_size,
            default_ttl: policy.ttl(),
            entries: FxHashMap::default(),
            recency: BTreeMap::new(),
            expiries: BTreeMap::new(),
            next_tick: 0,
            next_seq: 0,
            clock,
            stats: CacheStats {
                max_size,
                ..CacheStats::default()
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Presence check that neither refreshes recency nor counts as a hit.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .is_some_and(|slot| slot.expiry.deadline > now)
    }

    pub fn keys(&self) -> Vec<String> {
        self.recency.values().cloned().collect()
    }

    /// On hit the entry becomes most recently used and its TTL restarts from its own
    /// stored duration.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let (expired, ttl) = match self.entries.get(key) {
            Some(slot) => (slot.expiry.deadline <= now, slot.ttl),
            None => {
                self.stats.misses += 1;
                return None;
            }
        };

        if expired {
            self.detach(key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            return None;
        }

        let tick = self.bump_tick();
        let expiry = self.schedule_expiry(key, ttl, now);
        let previous = self.entries.get_mut(key).map(|slot| {
            let old_tick = std::mem::replace(&mut slot.recency, tick);
            let old_expiry = std::mem::replace(&mut slot.expiry, expiry);
            (old_tick, old_expiry)
        });
        if let Some((old_tick, old_expiry)) = previous {
            self.recency.remove(&old_tick);
            self.cancel_expiry(&old_expiry);
        }
        self.recency.insert(tick, key.to_string());
        self.stats.hits += 1;

        self.entries.get(key).map(|slot| slot.value.clone())
    }

    /// Insert or replace. Only a genuinely new key at capacity evicts, and then
    /// exactly one entry: the least recently used. Entries already past their
    /// deadline are reclaimed first and never count against capacity.
    pub fn set(&mut self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = self.clock.now();

        if !self.entries.contains_key(key) && self.entries.len() >= self.max_size {
            self.purge_expired();
            if self.entries.len() >= self.max_size {
                self.evict_lru();
            }
        }

        let tick = self.bump_tick();
        let expiry = self.schedule_expiry(key, ttl, now);
        let slot = Slot {
            value,
            ttl,
            expiry,
            recency: tick,
        };
        if let Some(old) = self.entries.insert(key.to_string(), slot) {
            self.recency.remove(&old.recency);
            self.cancel_expiry(&old.expiry);
        }
        self.recency.insert(tick, key.to_string());
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.detach(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.expiries.clear();
    }

    /// Keep only entries matching the predicate. Returns how many were dropped.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&str, &V) -> bool,
    {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, slot)| !keep(key.as_str(), &slot.value))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.detach(key);
        }
        doomed.len()
    }

    /// Fire every expiry whose deadline has passed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let mut purged = 0;
        while let Some((handle, key)) = self
            .expiries
            .first_key_value()
            .map(|(handle, key)| (*handle, key.clone()))
        {
            if handle.deadline > now {
                break;
            }
            self.expiries.remove(&handle);
            if let Some(slot) = self.entries.remove(&key) {
                self.recency.remove(&slot.recency);
                purged += 1;
            }
        }
        self.stats.expirations += purged as u64;
        purged
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            ..self.stats
        }
    }

    fn bump_tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn schedule_expiry(&mut self, key: &str, ttl: Duration, now: Instant) -> ExpiryHandle {
        self.next_seq += 1;
        // Oversized TTLs from config saturate instead of overflowing `Instant`.
        let deadline = now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now);
        let handle = ExpiryHandle {
            deadline,
            seq: self.next_seq,
        };
        self.expiries.insert(handle, key.to_string());
        handle
    }

    fn cancel_expiry(&mut self, handle: &ExpiryHandle) {
        self.expiries.remove(handle);
    }

    fn detach(&mut self, key: &str) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.recency);
        self.cancel_expiry(&slot.expiry);
        Some(slot.value)
    }

    fn evict_lru(&mut self) {
        let lru_key = self.recency.first_key_value().map(|(_, key)| key.clone());
        if let Some(key) = lru_key {
            self.detach(&key);
            self.stats.evictions += 1;
        }
    }
}

/// Cache key for a batch of question ids: sorted, de-duplicated, comma-joined.
pub fn batch_key<S: AsRef<str>>(ids: &[S]) -> String {
    let mut sorted: Vec<&str> = ids.iter().map(|id| id.as_ref()).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(",")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FormCacheStats {
    pub forms: CacheStats,
    pub questions: CacheStats,
    pub stats: CacheStats,
    pub submissions: CacheStats,
}

/// One sub-cache per entity kind, each with its own bounds.
///
/// Built once at service start and handed to consumers through the `Store`.
pub struct FormCache {
    forms: Mutex<LruTtlCache<Form>>,
    questions: Mutex<LruTtlCache<Vec<Question>>>,
    stats: Mutex<LruTtlCache<FormStats>>,
    submissions: Mutex<LruTtlCache<Submission>>,
}

impl FormCache {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            forms: Mutex::new(LruTtlCache::new(config.forms, clock.clone())),
            questions: Mutex::new(LruTtlCache::new(config.questions, clock.clone())),
            stats: Mutex::new(LruTtlCache::new(config.stats, clock.clone())),
            submissions: Mutex::new(LruTtlCache::new(config.submissions, clock)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn get_form(&self, form_id: &str) -> Option<Form> {
        read_guard("forms", &self.forms)?.get(form_id)
    }

    pub fn set_form(&self, form: &Form) {
        if let Some(mut cache) = read_guard("forms", &self.forms) {
            cache.set(&form.id, form.clone(), None);
        }
    }

    pub fn get_questions<S: AsRef<str>>(&self, ids: &[S]) -> Option<Vec<Question>> {
        read_guard("questions", &self.questions)?.get(&batch_key(ids))
    }

    pub fn set_questions<S: AsRef<str>>(&self, ids: &[S], questions: &[Question]) {
        if let Some(mut cache) = read_guard("questions", &self.questions) {
            cache.set(&batch_key(ids), questions.to_vec(), None);
        }
    }

    pub fn get_stats(&self, form_id: &str) -> Option<FormStats> {
        read_guard("stats", &self.stats)?.get(form_id)
    }

    pub fn set_stats(&self, stats: &FormStats) {
        if let Some(mut cache) = read_guard("stats", &self.stats) {
            cache.set(&stats.form_id, stats.clone(), None);
        }
    }

    pub fn get_submission(&self, submission_id: &str) -> Option<Submission> {
        read_guard("submissions", &self.submissions)?.get(submission_id)
    }

    pub fn set_submission(&self, submission: &Submission) {
        if let Some(mut cache) = read_guard("submissions", &self.submissions) {
            cache.set(&submission.id, submission.clone(), None);
        }
    }

    /// Drop a form together with its stats and every cached submission of that form.
    pub fn invalidate(&self, form_id: &str) {
        invalidation_guard(&self.forms).delete(form_id);
        invalidation_guard(&self.stats).delete(form_id);
        let dropped =
            invalidation_guard(&self.submissions).retain(|_, sub| sub.form_id != form_id);
        tracing::debug!(form_id, dropped_submissions = dropped, "form cache invalidated");
    }

    pub fn invalidate_stats(&self, form_id: &str) {
        invalidation_guard(&self.stats).delete(form_id);
    }

    pub fn invalidate_submission(&self, submission_id: &str) {
        invalidation_guard(&self.submissions).delete(submission_id);
    }

    /// Drop every cached question batch that includes this question.
    pub fn invalidate_question(&self, question_id: &str) {
        let dropped = invalidation_guard(&self.questions)
            .retain(|key, _| !key.split(',').any(|id| id == question_id));
        tracing::debug!(question_id, dropped_batches = dropped, "question cache invalidated");
    }

    pub fn clear(&self) {
        invalidation_guard(&self.forms).clear();
        invalidation_guard(&self.questions).clear();
        invalidation_guard(&self.stats).clear();
        invalidation_guard(&self.submissions).clear();
    }

    pub fn purge_expired(&self) -> usize {
        invalidation_guard(&self.forms).purge_expired()
            + invalidation_guard(&self.questions).purge_expired()
            + invalidation_guard(&self.stats).purge_expired()
            + invalidation_guard(&self.submissions).purge_expired()
    }

    pub fn stats(&self) -> FormCacheStats {
        FormCacheStats {
            forms: invalidation_guard(&self.forms).stats(),
            questions: invalidation_guard(&self.questions).stats(),
            stats: invalidation_guard(&self.stats).stats(),
            submissions: invalidation_guard(&self.submissions).stats(),
        }
    }
}

/// Lock for get/set. A poisoned sub-cache is skipped so callers fall through to the store.
fn read_guard<'a, V>(
    kind: &'static str,
    cache: &'a Mutex<LruTtlCache<V>>,
) -> Option<MutexGuard<'a, LruTtlCache<V>>> {
    match cache.lock() {
        Ok(guard) => Some(guard),
        Err(_) => {
            tracing::warn!(kind, "cache lock poisoned, bypassing cache");
            None
        }
    }
}

/// Lock for invalidation. Invalidation must still happen on a poisoned sub-cache.
fn invalidation_guard<V>(cache: &Mutex<LruTtlCache<V>>) -> MutexGuard<'_, LruTtlCache<V>> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
