//! Preview cache: TTL- and capacity-bounded memoization of previews.
//!
//! Entries live for a fixed window after they are computed. Every access
//! first sweeps expired entries; there is no background timer. When the
//! cache is full the least recently used entry is evicted.
//!
//! The cache only pays off in a long-lived caller, such as a server that
//! renders previews for repeated slider positions. A one-shot process
//! renders directly with [`render_preview`](crate::render_preview).
//!
//! # Concurrency
//!
//! The entry map sits behind one mutex, and each entry owns a second
//! mutex around its value. A miss inserts an empty slot while holding
//! the map lock, then computes while holding only the slot lock, so two
//! concurrent requests for the same key compute once and the second
//! waits for the first. A sweep can only remove a slot whose
//! `created_at` has aged past the window, and a freshly inserted slot
//! has not.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::diagnostics::{Clock, WebClock};
use crate::preview::PreviewPayload;
use crate::types::ParameterSet;

/// Cache sizing and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime (seconds when serialized).
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub ttl: Duration,
    /// Maximum number of entries.
    pub capacity: usize,
}

impl CacheConfig {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
    pub const DEFAULT_CAPACITY: usize = 64;
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Self::DEFAULT_TTL,
            capacity: Self::DEFAULT_CAPACITY,
        }
    }
}

/// What a preview was rendered from.
#[derive(Debug, Clone, Copy)]
pub enum SourceIdentity<'a> {
    /// The encoded source image itself.
    Bytes(&'a [u8]),
    /// A caller-chosen stable name, e.g. a stored file id.
    Named(&'a str),
}

/// Deterministic cache key over the source, every parameter, and the
/// preview-mode flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PreviewKey(u64);

impl PreviewKey {
    /// Hash the inputs of a preview render.
    #[must_use]
    pub fn new(source: SourceIdentity<'_>, params: &ParameterSet, preview_mode: bool) -> Self {
        let mut h = SipHasher13::new();
        match source {
            SourceIdentity::Bytes(bytes) => {
                0u8.hash(&mut h);
                bytes.hash(&mut h);
            }
            SourceIdentity::Named(name) => {
                1u8.hash(&mut h);
                name.hash(&mut h);
            }
        }
        float_bits(params.blur_amount()).hash(&mut h);
        float_bits(params.contrast()).hash(&mut h);
        params.brightness().hash(&mut h);
        float_bits(params.edge_enhancement()).hash(&mut h);
        params.invert_depth().hash(&mut h);
        params.background_threshold().hash(&mut h);
        preview_mode.hash(&mut h);
        Self(h.finish())
    }

    /// The raw hash value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Bit pattern with `-0.0` folded into `0.0`.
#[allow(clippy::float_cmp)]
fn float_bits(v: f64) -> u64 {
    if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() }
}

type Cell<T> = Arc<Mutex<Option<Arc<T>>>>;

struct Slot<I, T> {
    created_at: I,
    last_used: u64,
    cell: Cell<T>,
}

struct CacheState<I, T> {
    entries: HashMap<PreviewKey, Slot<I, T>>,
    tick: u64,
}

/// TTL + LRU bounded memoization keyed by [`PreviewKey`].
///
/// Stored values are shared as `Arc<T>` and never mutated.
pub struct PreviewCache<T = PreviewPayload, C: Clock = WebClock> {
    config: CacheConfig,
    clock: C,
    state: Mutex<CacheState<C::Instant, T>>,
}

impl<T> PreviewCache<T, WebClock> {
    /// Create a cache on the wall clock.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, WebClock)
    }
}

impl<T> Default for PreviewCache<T, WebClock> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T, C: Clock> PreviewCache<T, C> {
    /// Create a cache driven by `clock`.
    #[must_use]
    pub fn with_clock(config: CacheConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    #[must_use]
    pub const fn config(&self) -> CacheConfig {
        self.config
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// A failed computation stores nothing.
    ///
    /// # Errors
    ///
    /// Returns whatever `compute` returns.
    pub fn get_or_compute<E>(
        &self,
        key: PreviewKey,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        let cell = {
            let mut state = lock(&self.state);
            self.sweep(&mut state);
            state.tick += 1;
            let tick = state.tick;
            if let Some(slot) = state.entries.get_mut(&key) {
                slot.last_used = tick;
                Arc::clone(&slot.cell)
            } else {
                if self.config.capacity > 0 && state.entries.len() >= self.config.capacity {
                    evict_lru(&mut state.entries);
                }
                let cell: Cell<T> = Arc::new(Mutex::new(None));
                state.entries.insert(
                    key,
                    Slot {
                        created_at: self.clock.now(),
                        last_used: tick,
                        cell: Arc::clone(&cell),
                    },
                );
                cell
            }
        };

        let mut value = lock(&cell);
        if let Some(hit) = value.as_ref() {
            tracing::trace!(key = key.value(), "preview cache hit");
            return Ok(Arc::clone(hit));
        }

        let outcome = compute();
        let mut state = lock(&self.state);
        let ours = state
            .entries
            .get(&key)
            .is_some_and(|slot| Arc::ptr_eq(&slot.cell, &cell));
        match outcome {
            Ok(computed) => {
                let computed = Arc::new(computed);
                *value = Some(Arc::clone(&computed));
                if ours && let Some(slot) = state.entries.get_mut(&key) {
                    slot.created_at = self.clock.now();
                }
                tracing::trace!(key = key.value(), "preview cache miss, stored");
                Ok(computed)
            }
            Err(e) => {
                if ours {
                    state.entries.remove(&key);
                }
                Err(e)
            }
        }
    }

    /// Remove every expired entry now.
    pub fn purge_expired(&self) {
        let mut state = lock(&self.state);
        self.sweep(&mut state);
    }

    /// Number of entries, including ones still being computed.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        lock(&self.state).entries.clear();
    }

    fn sweep(&self, state: &mut CacheState<C::Instant, T>) {
        let before = state.entries.len();
        let ttl = self.config.ttl;
        state
            .entries
            .retain(|_, slot| self.clock.elapsed(&slot.created_at) < ttl);
        let purged = before - state.entries.len();
        if purged > 0 {
            tracing::debug!(purged, remaining = state.entries.len(), "purged expired previews");
        }
    }
}

fn evict_lru<I, T>(entries: &mut HashMap<PreviewKey, Slot<I, T>>) {
    if let Some(oldest) = entries
        .iter()
        .min_by_key(|(_, slot)| slot.last_used)
        .map(|(key, _)| *key)
    {
        entries.remove(&oldest);
        tracing::debug!(key = oldest.value(), "evicted least recently used preview");
    }
}
