pub mod batch;
pub mod cache;
mod clock;
pub mod config;
mod error;
pub mod keypool;
pub mod providers;
pub mod ratelimit;
#[cfg(feature = "store-sqlite")]
pub mod store;
mod translator;
pub mod utils;

pub use batch::{BatchScheduler, RequestExecutor, RequestPriority};
pub use cache::{TtlLruCache, content_key, text_key};
pub use clock::{Clock, SystemClock};
pub use config::{
    BatchConfig, CacheSettings, CachesConfig, Env, GenerationConfig, KeyPoolConfig,
    ProviderSettings, RateLimitConfig, RetryConfig, TranslatorConfig, parse_dotenv,
};
pub use error::{LinguaError, Result};
pub use keypool::{KeyLease, KeyPool};
pub use providers::{Payload, Provider};
pub use ratelimit::RateLimiter;
#[cfg(feature = "store-sqlite")]
pub use store::{SqliteCacheStore, SqliteCacheStoreError, StoredEntry};
pub use translator::{CacheSizes, Translator};

#[cfg(feature = "provider-google")]
pub use providers::Google;
#[cfg(feature = "provider-openai")]
pub use providers::OpenAi;
