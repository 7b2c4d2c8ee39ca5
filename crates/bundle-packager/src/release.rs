//! Release check - advise when a newer packager has been published
//!
//! The check is advisory and rate-limited through a small on-disk cache:
//!
//! - a timestamp of the last check (RFC3339 text)
//! - the last fetched release descriptor (bincode)
//!
//! A check whose timestamp is missing or older than the TTL is stale. A stale
//! check records the current time and forgets the cached release. With
//! deferred fetching (the default) it stops there and reports nothing, so the
//! first stale run never touches the network. The following run sees a fresh
//! timestamp with no cached release and performs the one fetch for that
//! window; later runs compare against the cached release.
//!
//! Cache files that are missing or unreadable are treated as stale.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{PackagerConfig, PACKAGER_VERSION};

const TIMESTAMP_FILENAME: &str = "packager_last_checked.txt";
const RELEASE_FILENAME: &str = "packager_latest_release";

/// A published release; only the tag is interpreted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// What the cache currently holds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub last_checked_at: Option<DateTime<Utc>>,
    pub latest_release: Option<Release>,
}

impl CacheEntry {
    /// Whether the entry must not be trusted at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        match self.last_checked_at {
            Some(checked) => now.signed_duration_since(checked) >= ttl,
            None => true,
        }
    }
}

/// Persistence for the release check
pub trait CacheStore: Send + Sync {
    /// Read the cache; unreadable parts come back empty
    fn load(&self) -> CacheEntry;

    fn save_timestamp(&self, at: DateTime<Utc>) -> Result<()>;

    fn save_release(&self, release: &Release) -> Result<()>;

    fn clear_release(&self) -> Result<()>;
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Where the latest release is looked up
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn latest_release(&self) -> Result<Release>;
}

/// Cache kept as two files in a user-level cache directory
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn timestamp_path(&self) -> PathBuf {
        self.dir.join(TIMESTAMP_FILENAME)
    }

    fn release_path(&self) -> PathBuf {
        self.dir.join(RELEASE_FILENAME)
    }

    fn load_timestamp(&self) -> Option<DateTime<Utc>> {
        let path = self.timestamp_path();
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!("Failed to read {:?}: {}", path, err);
                return None;
            }
        };

        match DateTime::parse_from_rfc3339(data.trim()) {
            Ok(at) => Some(at.with_timezone(&Utc)),
            Err(err) => {
                tracing::warn!("Ignoring corrupt release check timestamp {:?}: {}", path, err);
                None
            }
        }
    }

    fn load_release(&self) -> Option<Release> {
        let path = self.release_path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!("Failed to read {:?}: {}", path, err);
                return None;
            }
        };

        match bincode::serde::decode_from_slice::<Release, _>(&data, bincode::config::standard()) {
            Ok((release, _)) => Some(release),
            Err(err) => {
                tracing::warn!("Ignoring corrupt cached release {:?}: {}", path, err);
                None
            }
        }
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory: {:?}", self.dir))
    }
}

impl CacheStore for FileCacheStore {
    fn load(&self) -> CacheEntry {
        CacheEntry {
            last_checked_at: self.load_timestamp(),
            latest_release: self.load_release(),
        }
    }

    fn save_timestamp(&self, at: DateTime<Utc>) -> Result<()> {
        self.ensure_dir()?;
        let path = self.timestamp_path();
        fs::write(&path, at.to_rfc3339_opts(SecondsFormat::Secs, true))
            .with_context(|| format!("Failed to write {:?}", path))
    }

    fn save_release(&self, release: &Release) -> Result<()> {
        self.ensure_dir()?;
        let path = self.release_path();
        let data = bincode::serde::encode_to_vec(release, bincode::config::standard())
            .context("Failed to encode release")?;
        fs::write(&path, data).with_context(|| format!("Failed to write {:?}", path))
    }

    fn clear_release(&self) -> Result<()> {
        let path = self.release_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to remove {:?}", path)),
        }
    }
}

/// Latest release lookup against the GitHub API
#[derive(Debug, Clone)]
pub struct GitHubReleaseSource {
    client: reqwest::Client,
    url: String,
}

impl GitHubReleaseSource {
    pub fn new(api_url: &str, repo: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bundle-packager/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: format!("{}/repos/{}/releases/latest", api_url.trim_end_matches('/'), repo),
        })
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleaseSource {
    async fn latest_release(&self) -> Result<Release> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .context("Failed to fetch latest release")?
            .error_for_status()
            .context("Latest release request was rejected")?;

        response
            .json::<Release>()
            .await
            .context("Failed to parse latest release")
    }
}

/// Compares this packager against the latest published release
pub struct ReleaseChecker {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    source: Arc<dyn ReleaseSource>,
    current_version: String,
    ttl: chrono::Duration,
    defer_fetch: bool,
}

impl ReleaseChecker {
    pub fn new(
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        source: Arc<dyn ReleaseSource>,
    ) -> Self {
        Self {
            store,
            clock,
            source,
            current_version: PACKAGER_VERSION.to_string(),
            ttl: chrono::Duration::hours(1),
            defer_fetch: true,
        }
    }

    /// Checker backed by the user cache directory and GitHub
    pub fn from_config(config: &PackagerConfig) -> Result<Self> {
        let source = GitHubReleaseSource::new(
            &config.release_api_url,
            &config.release_repo,
            config.release_check_timeout,
        )?;
        let ttl = chrono::Duration::from_std(config.release_check_ttl)
            .context("Release check TTL is out of range")?;

        Ok(Self::new(
            Arc::new(FileCacheStore::new(&config.cache_dir)),
            Arc::new(SystemClock),
            Arc::new(source),
        )
        .with_ttl(ttl)
        .with_defer_fetch(config.release_defer_fetch))
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_defer_fetch(mut self, defer_fetch: bool) -> Self {
        self.defer_fetch = defer_fetch;
        self
    }

    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = version.into();
        self
    }

    /// Refresh the timestamp when stale and report whether a fetch is due
    ///
    /// Does not perform the fetch itself.
    pub fn should_check(&self) -> Result<bool> {
        let entry = self.store.load();
        let now = self.clock.now();

        if !entry.is_stale(now, self.ttl) {
            return Ok(false);
        }

        self.store
            .save_timestamp(now)
            .context("Failed to cache release check timestamp")?;
        self.store
            .clear_release()
            .context("Failed to clear cached release")?;

        Ok(true)
    }

    /// Upgrade notice if a newer release exists, `None` otherwise
    pub async fn check_for_latest_version(&self) -> Result<Option<String>> {
        let release = if self.should_check()? {
            if self.defer_fetch {
                tracing::debug!("Release check primed; fetching on the next run");
                return Ok(None);
            }
            self.fetch_and_cache().await?
        } else {
            match self.store.load().latest_release {
                Some(release) => release,
                None => self.fetch_and_cache().await?,
            }
        };

        upgrade_notice(&self.current_version, &release.tag_name)
    }

    async fn fetch_and_cache(&self) -> Result<Release> {
        let release = self.source.latest_release().await?;
        self.store
            .save_release(&release)
            .context("Failed to cache latest release")?;
        Ok(release)
    }
}

/// Human-readable notice when `latest` is strictly newer than `current`
pub fn upgrade_notice(current: &str, latest: &str) -> Result<Option<String>> {
    let current_version = parse_release_version(current)
        .with_context(|| format!("Failed to parse current version {:?}", current))?;
    let latest_version = parse_release_version(latest)
        .with_context(|| format!("Failed to parse latest version {:?}", latest))?;

    if current_version < latest_version {
        Ok(Some(format!(
            "An upgrade for packager is available: {} → {}",
            current_version, latest_version
        )))
    } else {
        Ok(None)
    }
}

fn parse_release_version(tag: &str) -> Result<semver::Version, semver::Error> {
    let trimmed = tag.trim();
    semver::Version::parse(trimmed.strip_prefix('v').unwrap_or(trimmed))
}
