//! Remote key-value cache backend. Separate connection pools are kept for
//! the primary (write) and reader endpoints, since GitHub Enterprise-style
//! deployments often split reads to a replica; when no reader endpoint is
//! configured, reads and writes share the primary pool.

use r2d2::Pool;
use redis::Commands;

use crate::config::RedisConfig;
use crate::error::init::InitError;

use super::{CacheError, CacheKey, CachedResponse, ResponseCache};

const SCAN_BATCH: usize = 200;
const KEY_PREFIX: &[u8] = b"ghmirror:";

pub struct RedisCache {
    write_pool: Pool<redis::Client>,
    read_pool: Pool<redis::Client>,
}

impl RedisCache {
    pub fn connect(config: &RedisConfig) -> Result<Self, InitError> {
        let write_pool = Pool::builder().build(client_for(&config.primary_endpoint, config)?)?;
        let read_pool = match &config.reader_endpoint {
            Some(endpoint) => Pool::builder().build(client_for(endpoint, config)?)?,
            None => write_pool.clone(),
        };
        Ok(Self { write_pool, read_pool })
    }

    /// Encodes a key as `ghmirror:` followed by its `bincode` encoding.
    /// Redis keys are binary-safe, so the portable binary serialization
    /// used for values is reused here rather than a text format.
    fn encode_key(key: &CacheKey) -> Result<Vec<u8>, CacheError> {
        let mut encoded = KEY_PREFIX.to_vec();
        encoded.extend(bincode::serialize(key)?);
        Ok(encoded)
    }
}

fn client_for(host: &str, config: &RedisConfig) -> Result<redis::Client, InitError> {
    let scheme = if config.ssl { "rediss" } else { "redis" };
    let url = match &config.token {
        Some(token) => format!(
            "{scheme}://:{}@{host}:{}",
            token.expose(),
            config.port
        ),
        None => format!("{scheme}://{host}:{}", config.port),
    };
    Ok(redis::Client::open(url)?)
}

#[async_trait::async_trait]
impl ResponseCache for RedisCache {
    async fn contains(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let pool = self.read_pool.clone();
        let encoded = Self::encode_key(key)?;
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let exists: bool = conn.exists(&encoded)?;
            Ok(exists)
        })
        .await
        .expect("redis blocking task panicked")
    }

    async fn get(&self, key: &CacheKey) -> Result<CachedResponse, CacheError> {
        let pool = self.read_pool.clone();
        let encoded = Self::encode_key(key)?;
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let raw: Option<Vec<u8>> = conn.get(&encoded)?;
            match raw {
                Some(bytes) => Ok(bincode::deserialize(&bytes)?),
                None => Err(CacheError::NotFound),
            }
        })
        .await
        .expect("redis blocking task panicked")
    }

    async fn put(&self, key: CacheKey, value: CachedResponse) -> Result<(), CacheError> {
        let pool = self.write_pool.clone();
        let encoded = Self::encode_key(&key)?;
        let bytes = bincode::serialize(&value)?;
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let _: () = conn.set(&encoded, bytes)?;
            Ok(())
        })
        .await
        .expect("redis blocking task panicked")
    }

    async fn iterate(&self) -> Result<Vec<CacheKey>, CacheError> {
        let pool = self.read_pool.clone();
        let mut pattern = KEY_PREFIX.to_vec();
        pattern.push(b'*');
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let mut cursor: u64 = 0;
            let mut keys = Vec::new();
            loop {
                let (next_cursor, batch): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query(&mut *conn)?;
                for raw in batch {
                    if let Some(encoded) = raw.strip_prefix(KEY_PREFIX) {
                        if let Ok(key) = bincode::deserialize::<CacheKey>(encoded) {
                            keys.push(key);
                        }
                    }
                }
                cursor = next_cursor;
                if cursor == 0 {
                    break;
                }
            }
            Ok(keys)
        })
        .await
        .expect("redis blocking task panicked")
    }

    async fn len(&self) -> Result<u64, CacheError> {
        let pool = self.read_pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let count: u64 = redis::cmd("DBSIZE").query(&mut *conn)?;
            Ok(count)
        })
        .await
        .expect("redis blocking task panicked")
    }

    async fn byte_size(&self) -> Result<u64, CacheError> {
        let pool = self.read_pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let info: String = redis::cmd("INFO").arg("memory").query(&mut *conn)?;
            Ok(parse_used_memory(&info))
        })
        .await
        .expect("redis blocking task panicked")
    }
}

fn parse_used_memory(info: &str) -> u64 {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}
