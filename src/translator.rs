use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::time::Duration;

use crate::batch::RequestExecutor;
use crate::cache::{TtlLruCache, content_key, text_key};
use crate::clock::{Clock, SystemClock};
use crate::config::{Env, ProviderSettings, TranslatorConfig};
use crate::keypool::{KeyPool, key_tail};
use crate::providers::{self, Payload, Provider};
use crate::ratelimit::RateLimiter;
use crate::utils::http::send_classified_json;
use crate::{LinguaError, Result};

#[cfg(feature = "store-sqlite")]
use crate::store::SqliteCacheStore;

const OCR_INSTRUCTION: &str = "Extract all text from this image, preserving line breaks.";
const TRANSCRIBE_INSTRUCTION: &str = "Transcribe the spoken content of this media verbatim.";

/// How many distinct keys a fan-out call may occupy at once.
const MAX_FANOUT_KEYS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheSizes {
    pub text: usize,
    pub image: usize,
    pub media: usize,
}

/// Request orchestrator. Owns the key pool, the rate limiter, the three
/// response caches, the provider, and the HTTP client; ownership is
/// one-directional, nothing here holds a reference back to a caller.
pub struct Translator {
    config: TranslatorConfig,
    settings: ProviderSettings,
    provider: Arc<dyn Provider>,
    http: reqwest::Client,
    keys: KeyPool,
    limiter: RateLimiter,
    text_cache: Mutex<TtlLruCache<String>>,
    image_cache: Mutex<TtlLruCache<String>>,
    media_cache: Mutex<TtlLruCache<String>>,
    clock: Arc<dyn Clock>,
    #[cfg(feature = "store-sqlite")]
    store: Option<SqliteCacheStore>,
}

impl Translator {
    pub fn from_config(config: TranslatorConfig, env: &Env) -> Result<Self> {
        Self::with_clock(config, env, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: TranslatorConfig,
        env: &Env,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let settings = config.provider_settings()?.clone();
        let provider = providers::from_config(&config.provider, &settings)?;
        let mut keys_by_provider = HashMap::new();
        keys_by_provider.insert(config.provider.clone(), settings.resolve_keys(env));
        let keys = KeyPool::new(keys_by_provider, config.key_pool.clone());
        let limiter = RateLimiter::new(config.rate_limit.clone());
        let text_cache = Mutex::new(TtlLruCache::new(config.caches.text.clone()));
        let image_cache = Mutex::new(TtlLruCache::new(config.caches.image.clone()));
        let media_cache = Mutex::new(TtlLruCache::new(config.caches.media.clone()));

        Ok(Self {
            config,
            settings,
            provider,
            http: build_http_client(),
            keys,
            limiter,
            text_cache,
            image_cache,
            media_cache,
            clock,
            #[cfg(feature = "store-sqlite")]
            store: None,
        })
    }

    /// Attach a durable store backing the text cache. Store failures are
    /// logged and swallowed; the in-memory path always wins on disagreement.
    #[cfg(feature = "store-sqlite")]
    pub fn with_store(mut self, store: SqliteCacheStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn key_pool(&self) -> &KeyPool {
        &self.keys
    }

    /// One orchestrated request: pick a key, call the provider, parse. Rate
    /// limited attempts rotate to another key immediately; other retryable
    /// failures back off exponentially. Pool-empty errors surface at once
    /// since retrying cannot help them.
    pub async fn request(&self, payload: &Payload) -> Result<String> {
        let max_attempts = self.config.retry.max_retries.max(1);
        let mut last_error: Option<LinguaError> = None;

        for attempt in 0..max_attempts {
            let now = self.clock.now_millis();
            self.keys.sweep_expired(now);
            let key = self.keys.random_key(&self.config.provider, now)?;

            let outcome = self
                .keys
                .use_key(
                    &self.config.provider,
                    &key,
                    self.clock.as_ref(),
                    self.dispatch(&key, payload),
                )
                .await;

            match outcome {
                Ok(text) => return Ok(text),
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    // A blacklisting failure already freed us to rotate; only
                    // transient failures earn a backoff pause.
                    let rotate_immediately = err.is_rate_limited() || err.is_invalid_key();
                    tracing::debug!(
                        attempt,
                        key = %key_tail(&key),
                        error = %err,
                        rotate_immediately,
                        "request attempt failed"
                    );
                    last_error = Some(err);
                    if !rotate_immediately && attempt + 1 < max_attempts {
                        let delay = self
                            .config
                            .retry
                            .retry_delay_ms
                            .saturating_mul(1u64 << attempt.min(16));
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(LinguaError::NoKeysAvailable {
            provider: self.config.provider.clone(),
        }))
    }

    /// Cached text translation. The cache key is the composite of mode,
    /// target language, and source text.
    pub async fn translate(&self, text: &str, mode: &str, target_lang: &str) -> Result<String> {
        let cache_key = text_key(text, mode, target_lang);
        let now = self.clock.now_millis();

        if let Some(hit) = lock_cache(&self.text_cache).get(&cache_key, now) {
            tracing::debug!(kind = "text", "cache hit");
            return Ok(hit);
        }

        #[cfg(feature = "store-sqlite")]
        if let Some(value) = self.load_from_store(&cache_key, now).await {
            tracing::debug!(kind = "text", "durable cache hit");
            lock_cache(&self.text_cache).insert(cache_key.clone(), value.clone(), now);
            return Ok(value);
        }

        self.limiter.wait_for_slot().await;
        let prompt = format!("{mode} the following text into {target_lang}:\n\n{text}");
        let result = self.request(&Payload::text(prompt)).await?;

        let now = self.clock.now_millis();
        lock_cache(&self.text_cache).insert(cache_key.clone(), result.clone(), now);
        #[cfg(feature = "store-sqlite")]
        self.save_to_store(&cache_key, &result, now).await;

        Ok(result)
    }

    /// Cached OCR over an inline image. The cache key is content-addressed,
    /// so the same bytes hit regardless of where they came from.
    pub async fn recognize_image(&self, base64_data: &str, mime_type: &str) -> Result<String> {
        self.cached_inline(
            &self.image_cache,
            "image",
            base64_data,
            mime_type,
            OCR_INSTRUCTION,
        )
        .await
    }

    /// Cached transcription of inline audio or video.
    pub async fn transcribe_media(&self, base64_data: &str, mime_type: &str) -> Result<String> {
        self.cached_inline(
            &self.media_cache,
            "media",
            base64_data,
            mime_type,
            TRANSCRIBE_INSTRUCTION,
        )
        .await
    }

    async fn cached_inline(
        &self,
        cache: &Mutex<TtlLruCache<String>>,
        kind: &'static str,
        base64_data: &str,
        mime_type: &str,
        instruction: &str,
    ) -> Result<String> {
        let cache_key = content_key(base64_data);
        let now = self.clock.now_millis();
        if let Some(hit) = lock_cache(cache).get(&cache_key, now) {
            tracing::debug!(kind, "cache hit");
            return Ok(hit);
        }

        self.limiter.wait_for_slot().await;
        let payload = Payload::Inline {
            mime_type: mime_type.to_string(),
            data: base64_data.to_string(),
            instruction: instruction.to_string(),
        };
        let result = self.request(&payload).await?;

        lock_cache(cache).insert(cache_key, result.clone(), self.clock.now_millis());
        Ok(result)
    }

    /// Runs every payload sequentially under a single key, fanning out over
    /// up to three distinct keys until one of them carries the whole batch.
    pub async fn batch_request(&self, payloads: &[Payload]) -> Result<Vec<String>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let now = self.clock.now_millis();
        self.keys.sweep_expired(now);
        self.keys
            .execute_with_multiple_keys(&self.config.provider, MAX_FANOUT_KEYS, now, |key| {
                async move {
                    let mut out = Vec::with_capacity(payloads.len());
                    for payload in payloads {
                        let text = self
                            .keys
                            .use_key(
                                &self.config.provider,
                                &key,
                                self.clock.as_ref(),
                                self.dispatch(&key, payload),
                            )
                            .await?;
                        out.push(text);
                    }
                    Ok(out)
                }
            })
            .await
    }

    pub fn clear_caches(&self) {
        lock_cache(&self.text_cache).clear();
        lock_cache(&self.image_cache).clear();
        lock_cache(&self.media_cache).clear();
    }

    pub fn cache_sizes(&self) -> CacheSizes {
        CacheSizes {
            text: lock_cache(&self.text_cache).len(),
            image: lock_cache(&self.image_cache).len(),
            media: lock_cache(&self.media_cache).len(),
        }
    }

    async fn dispatch(&self, api_key: &str, payload: &Payload) -> Result<String> {
        let url = self.provider.request_url(&self.settings.model);
        let body = self
            .provider
            .build_body(&self.settings.model, payload, &self.config.generation);
        let request = self
            .provider
            .apply_auth(self.http.post(&url), api_key)
            .json(&body);
        let response = send_classified_json(request).await?;
        self.provider.parse_response(response)
    }

    #[cfg(feature = "store-sqlite")]
    async fn load_from_store(&self, cache_key: &str, now: u64) -> Option<String> {
        let store = self.store.as_ref()?;
        let expiration_ms = self.config.caches.text.expiration_ms;
        match store.load(cache_key).await {
            Ok(Some(entry)) => {
                if now.saturating_sub(entry.timestamp) > expiration_ms {
                    if let Err(err) = store
                        .purge_older_than(now.saturating_sub(expiration_ms))
                        .await
                    {
                        tracing::warn!(error = %err, "failed to purge stale durable cache entries");
                    }
                    None
                } else {
                    Some(entry.value)
                }
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "durable cache read failed");
                None
            }
        }
    }

    #[cfg(feature = "store-sqlite")]
    async fn save_to_store(&self, cache_key: &str, value: &str, now: u64) {
        if let Some(store) = self.store.as_ref() {
            if let Err(err) = store.save(cache_key, value, now).await {
                tracing::warn!(error = %err, "durable cache write failed");
            }
        }
    }
}

#[async_trait]
impl RequestExecutor for Translator {
    async fn execute(&self, payload: &Payload) -> Result<String> {
        self.request(payload).await
    }
}

fn lock_cache<'a>(
    cache: &'a Mutex<TtlLruCache<String>>,
) -> MutexGuard<'a, TtlLruCache<String>> {
    match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_keys(keys: &[&str]) -> TranslatorConfig {
        TranslatorConfig::from_toml_str(&format!(
            r#"
            provider = "gemini"

            [providers.gemini]
            api_keys = [{}]
            model = "gemini-2.0-flash"
            "#,
            keys.iter()
                .map(|key| format!("\"{key}\""))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .unwrap()
    }

    #[test]
    fn from_config_requires_provider_settings() {
        let config = TranslatorConfig::from_toml_str("provider = \"gemini\"").unwrap();
        assert!(matches!(
            Translator::from_config(config, &Env::default()),
            Err(LinguaError::Config(_))
        ));
    }

    #[test]
    fn caches_start_empty_and_clear_is_idempotent() {
        let translator =
            Translator::from_config(config_with_keys(&["k1"]), &Env::default()).unwrap();
        let sizes = translator.cache_sizes();
        assert_eq!(
            sizes,
            CacheSizes {
                text: 0,
                image: 0,
                media: 0
            }
        );
        translator.clear_caches();
        assert_eq!(translator.cache_sizes(), sizes);
    }

    #[tokio::test]
    async fn request_with_no_configured_keys_fails_fast() {
        let translator =
            Translator::from_config(config_with_keys(&[]), &Env::default()).unwrap();
        let err = translator
            .request(&Payload::text("bonjour"))
            .await
            .unwrap_err();
        assert!(matches!(err, LinguaError::NoKeysConfigured { .. }));
    }
}
