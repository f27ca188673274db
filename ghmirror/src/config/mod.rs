use std::path::PathBuf;
use std::time::Duration;

use displaydoc::Display;
use thiserror::Error;

use crate::error::init::InitError;
use crate::types::secret::Secret;

/// Upstream GitHub REST API base URL.
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.github.com";
/// GitHub's public status document, polled by the health monitor.
pub const DEFAULT_STATUS_URL: &str =
    "https://www.githubstatus.com/api/v2/components.json";
/// Component name the health monitor keys its decision on.
pub const HEALTH_COMPONENT_NAME: &str = "API Requests";
/// Default page size injected into proxied requests that don't specify one.
pub const DEFAULT_PER_PAGE: u32 = 30;

#[derive(Debug, Error, Display)]
pub enum Error {
    /// error collecting config sources: {0}
    Source(#[from] config::ConfigError),
    /// `REDIS_PORT` is not a valid port number: {0}
    InvalidRedisPort(String),
    /// `GITHUB_MIRROR_URL` is not a valid URL: {0}
    InvalidMirrorUrl(#[from] url::ParseError),
    /// invalid configuration: {0}
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    InMemory,
    Redis,
}

impl Default for CacheType {
    fn default() -> Self {
        Self::InMemory
    }
}

/// Connection details for the remote key-value cache backend.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub primary_endpoint: String,
    pub reader_endpoint: Option<String>,
    pub port: u16,
    pub token: Option<Secret<String>>,
    pub ssl: bool,
}

/// Process-wide configuration, assembled once at startup from the
/// environment (and, optionally, a config file merged underneath it).
#[derive(Debug, Clone)]
pub struct Config {
    /// Colon-separated allow-list of GitHub logins. `None` means open mode:
    /// any caller with a resolvable token is accepted.
    pub github_users: Option<Vec<String>>,
    pub cache_type: CacheType,
    pub redis: Option<RedisConfig>,
    pub github_status_sleep_time: Duration,
    /// Externally-visible base URL of this mirror, substituted into
    /// rewritten `Link` headers and bodies. Falls back to the inbound
    /// request's own host URL when unset.
    pub github_mirror_url: Option<url::Url>,
    pub requests_timeout: Duration,
    pub listen_addr: std::net::SocketAddr,
    /// Upstream GitHub API base URL. Overridable only for tests; production
    /// deployments always point at `DEFAULT_UPSTREAM_URL`.
    pub upstream_url: url::Url,
    /// GitHub status document URL. Overridable only for tests.
    pub status_url: url::Url,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RawConfig {
    github_users: Option<String>,
    cache_type: Option<String>,
    primary_endpoint: Option<String>,
    reader_endpoint: Option<String>,
    redis_port: Option<String>,
    redis_token: Option<String>,
    redis_ssl: Option<bool>,
    github_status_sleep_time: Option<u64>,
    github_mirror_url: Option<String>,
    requests_timeout: Option<u64>,
    listen_addr: Option<String>,
    github_api_url: Option<String>,
    github_status_url: Option<String>,
}

impl Config {
    /// Reads configuration from the process environment. Every field is
    /// optional; absent values fall back to the defaults described in the
    /// module-level docs and `SPEC_FULL.md` §6.
    pub fn from_env() -> Result<Self, Error> {
        Self::try_read(None)
    }

    /// Reads configuration from an optional config file merged underneath
    /// the process environment, so an operator can ship a base file and
    /// still override any single field with an environment variable
    /// without editing it.
    pub fn try_read(config_file_path: Option<PathBuf>) -> Result<Self, Error> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_file_path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::default().try_parsing(true));
        let raw: RawConfig = builder.build()?.try_deserialize()?;
        Self::from_raw(raw)
    }

    /// Sanity-checks the resolved configuration before the process binds a
    /// socket, per the init-time error split in `SPEC_FULL.md` §7.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.requests_timeout.is_zero() {
            return Err(
                Error::Validation("REQUESTS_TIMEOUT must be greater than zero".to_string()).into(),
            );
        }
        if self.github_status_sleep_time.is_zero() {
            return Err(Error::Validation(
                "GITHUB_STATUS_SLEEP_TIME must be greater than zero".to_string(),
            )
            .into());
        }
        if self.cache_type == CacheType::Redis && self.redis.is_none() {
            return Err(Error::Validation(
                "CACHE_TYPE=redis requires PRIMARY_ENDPOINT/REDIS_PORT settings".to_string(),
            )
            .into());
        }
        Ok(())
    }

    fn from_raw(raw: RawConfig) -> Result<Self, Error> {
        let github_users = raw.github_users.map(|users| {
            users
                .split(':')
                .map(str::to_owned)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        });

        let cache_type = match raw.cache_type.as_deref() {
            Some("redis") => CacheType::Redis,
            _ => CacheType::InMemory,
        };

        let redis = if cache_type == CacheType::Redis {
            let port = raw
                .redis_port
                .as_deref()
                .unwrap_or("6379")
                .parse::<u16>()
                .map_err(|_| {
                    Error::InvalidRedisPort(
                        raw.redis_port.clone().unwrap_or_default(),
                    )
                })?;
            Some(RedisConfig {
                primary_endpoint: raw
                    .primary_endpoint
                    .unwrap_or_else(|| "127.0.0.1".to_string()),
                reader_endpoint: raw.reader_endpoint,
                port,
                token: raw.redis_token.map(Secret::from),
                ssl: raw.redis_ssl.unwrap_or(false),
            })
        } else {
            None
        };

        let github_mirror_url = raw
            .github_mirror_url
            .map(|u| url::Url::parse(&u))
            .transpose()?;

        let upstream_url = raw
            .github_api_url
            .map(|u| url::Url::parse(&u))
            .transpose()?
            .unwrap_or_else(|| {
                url::Url::parse(DEFAULT_UPSTREAM_URL)
                    .expect("default upstream url is always valid")
            });

        let status_url = raw
            .github_status_url
            .map(|u| url::Url::parse(&u))
            .transpose()?
            .unwrap_or_else(|| {
                url::Url::parse(DEFAULT_STATUS_URL)
                    .expect("default status url is always valid")
            });

        let listen_addr = raw
            .listen_addr
            .as_deref()
            .unwrap_or("0.0.0.0:8080")
            .parse()
            .unwrap_or_else(|_| {
                std::net::SocketAddr::from(([0, 0, 0, 0], 8080))
            });

        Ok(Self {
            github_users,
            cache_type,
            redis,
            github_status_sleep_time: Duration::from_secs(
                raw.github_status_sleep_time.unwrap_or(1),
            ),
            github_mirror_url,
            requests_timeout: Duration::from_secs(
                raw.requests_timeout.unwrap_or(10),
            ),
            listen_addr,
            upstream_url,
            status_url,
        })
    }

    /// Base URL to rewrite outbound `Link` headers and bodies into, falling
    /// back to the given request host when `GITHUB_MIRROR_URL` is unset.
    #[must_use]
    pub fn mirror_url_or(&self, fallback: &url::Url) -> url::Url {
        self.github_mirror_url.clone().unwrap_or_else(|| fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_mode_when_no_allow_list() {
        let raw = RawConfig::default();
        let config = Config::from_raw(raw).unwrap();
        assert!(config.github_users.is_none());
    }

    #[test]
    fn allow_list_parses_colon_separated_users() {
        let raw = RawConfig {
            github_users: Some("alice:bob:carol".to_string()),
            ..Default::default()
        };
        let config = Config::from_raw(raw).unwrap();
        assert_eq!(
            config.github_users,
            Some(vec![
                "alice".to_string(),
                "bob".to_string(),
                "carol".to_string()
            ])
        );
    }

    #[test]
    fn defaults_to_in_memory_cache() {
        let config = Config::from_raw(RawConfig::default()).unwrap();
        assert_eq!(config.cache_type, CacheType::InMemory);
        assert!(config.redis.is_none());
    }

    #[test]
    fn redis_cache_type_requires_endpoint_defaults() {
        let raw = RawConfig {
            cache_type: Some("redis".to_string()),
            ..Default::default()
        };
        let config = Config::from_raw(raw).unwrap();
        let redis = config.redis.expect("redis config should be built");
        assert_eq!(redis.port, 6379);
        assert!(!redis.ssl);
    }

    #[test]
    fn invalid_redis_port_is_rejected() {
        let raw = RawConfig {
            cache_type: Some("redis".to_string()),
            redis_port: Some("not-a-port".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::from_raw(raw),
            Err(Error::InvalidRedisPort(_))
        ));
    }

    #[test]
    fn default_sleep_time_is_one_second() {
        let config = Config::from_raw(RawConfig::default()).unwrap();
        assert_eq!(config.github_status_sleep_time, Duration::from_secs(1));
    }

    #[test]
    fn validate_accepts_defaults() {
        let config = Config::from_raw(RawConfig::default()).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = Config::from_raw(RawConfig::default()).unwrap();
        config.requests_timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());
    }
}
