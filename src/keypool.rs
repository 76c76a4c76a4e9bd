use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::time::Duration;

use crate::clock::Clock;
use crate::config::KeyPoolConfig;
use crate::{LinguaError, Result};

#[derive(Debug, Default)]
struct KeyState {
    active: u32,
    failure: Option<FailureRecord>,
}

#[derive(Debug)]
struct FailureRecord {
    at_ms: u64,
    count: u32,
}

#[derive(Debug, Default)]
struct PoolState {
    states: HashMap<String, HashMap<String, KeyState>>,
}

/// Rotating pool of provider API keys. A key that fails with an invalid-key
/// or rate-limited error is blacklisted for `blacklist_ms`; keys also carry a
/// per-key concurrency ceiling. Keys are never removed permanently.
///
/// Per-key state is created lazily on first use, so configured keys that are
/// never touched cost nothing.
pub struct KeyPool {
    config: KeyPoolConfig,
    keys: HashMap<String, Vec<String>>,
    state: Arc<Mutex<PoolState>>,
}

impl KeyPool {
    pub fn new(keys: HashMap<String, Vec<String>>, config: KeyPoolConfig) -> Self {
        Self {
            config,
            keys,
            state: Arc::new(Mutex::new(PoolState::default())),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Configured keys minus blacklisted minus saturated, in configured
    /// order. Duplicated configured keys stay duplicated, giving them
    /// proportionally more weight in the random pick.
    /// `max_active_per_key == 0` lifts the concurrency ceiling.
    pub fn available_keys(&self, provider: &str, now: u64) -> Result<Vec<String>> {
        let configured = self
            .keys
            .get(provider)
            .filter(|keys| !keys.is_empty())
            .ok_or_else(|| LinguaError::NoKeysConfigured {
                provider: provider.to_string(),
            })?;

        let guard = self.lock_state();
        let states = guard.states.get(provider);
        let available = configured
            .iter()
            .filter(|key| match states.and_then(|map| map.get(*key)) {
                Some(state) => {
                    let blacklisted = state.failure.as_ref().is_some_and(|failure| {
                        now.saturating_sub(failure.at_ms) < self.config.blacklist_ms
                    });
                    let saturated = self.config.max_active_per_key != 0
                        && state.active >= self.config.max_active_per_key;
                    !blacklisted && !saturated
                }
                None => true,
            })
            .cloned()
            .collect();
        Ok(available)
    }

    /// Uniform random pick over the currently available keys.
    pub fn random_key(&self, provider: &str, now: u64) -> Result<String> {
        let available = self.available_keys(provider, now)?;
        if available.is_empty() {
            return Err(LinguaError::NoKeysAvailable {
                provider: provider.to_string(),
            });
        }
        Ok(available[random_index(available.len())].clone())
    }

    /// Takes an active slot on `key`, released when the returned lease drops.
    pub fn lease(&self, provider: &str, key: &str) -> KeyLease {
        let mut guard = self.lock_state();
        let entry = guard
            .states
            .entry(provider.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        entry.active = entry.active.saturating_add(1);
        KeyLease {
            state: Arc::clone(&self.state),
            provider: provider.to_string(),
            key: key.to_string(),
        }
    }

    /// Runs `fut` while holding a lease on `key`. An invalid-key or
    /// rate-limited failure blacklists the key before the error is returned;
    /// the lease releases on every exit path, including cancellation.
    pub async fn use_key<F, T>(
        &self,
        provider: &str,
        key: &str,
        clock: &dyn Clock,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _lease = self.lease(provider, key);
        match fut.await {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_invalid_key() || err.is_rate_limited() {
                    self.record_failure(provider, key, clock.now_millis());
                }
                Err(err)
            }
        }
    }

    pub fn record_failure(&self, provider: &str, key: &str, now: u64) {
        let mut guard = self.lock_state();
        let entry = guard
            .states
            .entry(provider.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        let count = entry
            .failure
            .as_ref()
            .map_or(1, |failure| failure.count.saturating_add(1));
        entry.failure = Some(FailureRecord { at_ms: now, count });
        tracing::warn!(
            provider,
            key = %key_tail(key),
            failures = count,
            blacklist_ms = self.config.blacklist_ms,
            "blacklisting api key"
        );
    }

    /// Dispatches `generator` over up to `max_concurrent` distinct available
    /// keys concurrently. The first success wins; the remaining in-flight
    /// attempts are dropped with it (their leases release on drop). Only if
    /// every attempted key fails does the call fail, carrying each key's
    /// failure reason.
    pub async fn execute_with_multiple_keys<G, Fut, T>(
        &self,
        provider: &str,
        max_concurrent: usize,
        now: u64,
        generator: G,
    ) -> Result<T>
    where
        G: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let available = self.available_keys(provider, now)?;
        if available.is_empty() {
            return Err(LinguaError::NoKeysAvailable {
                provider: provider.to_string(),
            });
        }

        let mut distinct = Vec::<String>::new();
        for key in available {
            if !distinct.contains(&key) {
                distinct.push(key);
            }
        }

        let mut in_flight = FuturesUnordered::new();
        for key in distinct.into_iter().take(max_concurrent.max(1)) {
            let attempt = generator(key.clone());
            in_flight.push(async move { (key, attempt.await) });
        }

        let mut failures = Vec::new();
        while let Some((key, result)) = in_flight.next().await {
            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::debug!(key = %key_tail(&key), error = %err, "fan-out attempt failed");
                    failures.push((key_tail(&key), err.to_string()));
                }
            }
        }
        Err(LinguaError::AllKeysExhausted { failures })
    }

    /// Drops failure records whose blacklist window has passed. Correctness
    /// never depends on this running: `available_keys` re-checks expiry on
    /// every read. Sweeping just bounds the state map.
    pub fn sweep_expired(&self, now: u64) {
        let mut guard = self.lock_state();
        for states in guard.states.values_mut() {
            for state in states.values_mut() {
                let expired = state.failure.as_ref().is_some_and(|failure| {
                    now.saturating_sub(failure.at_ms) >= self.config.blacklist_ms
                });
                if expired {
                    state.failure = None;
                }
            }
        }
    }

    /// Periodic sweep loop the host may spawn.
    pub async fn run_sweeper(&self, clock: Arc<dyn Clock>) {
        let period = Duration::from_millis(self.config.sweep_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            self.sweep_expired(clock.now_millis());
        }
    }

    #[cfg(test)]
    fn active_count(&self, provider: &str, key: &str) -> u32 {
        let guard = self.lock_state();
        guard
            .states
            .get(provider)
            .and_then(|map| map.get(key))
            .map_or(0, |state| state.active)
    }
}

/// RAII guard for one active slot on one key. Dropping it releases the slot,
/// so success, error, and cancellation all decrement exactly once.
pub struct KeyLease {
    state: Arc<Mutex<PoolState>>,
    provider: String,
    key: String,
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = guard
            .states
            .get_mut(&self.provider)
            .and_then(|map| map.get_mut(&self.key))
        {
            entry.active = entry.active.saturating_sub(1);
        }
    }
}

fn random_index(len: usize) -> usize {
    let mut bytes = [0u8; 8];
    if getrandom::fill(&mut bytes).is_err() {
        return 0;
    }
    (u64::from_le_bytes(bytes) % len as u64) as usize
}

/// Last few characters of a key, for logs and error messages.
pub(crate) fn key_tail(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let start = chars.len().saturating_sub(4);
    let tail: String = chars[start..].iter().collect();
    format!("...{tail}")
}
