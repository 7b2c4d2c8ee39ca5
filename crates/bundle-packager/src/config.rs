//! Packager configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::augment::AugmentPolicy;

/// Runtime version bundles declare compatibility with by default
pub const RUNTIME_VERSION: &str = "0.4.2";

/// Version of this packager, compared against published releases
pub const PACKAGER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct PackagerConfig {
    /// Project directory to operate on when no `--dir` is given
    pub project_dir: PathBuf,

    /// User-level cache directory (release check, downloaded templates)
    pub cache_dir: PathBuf,

    /// How undeclared runnables are reconciled with the directive
    pub augment_policy: AugmentPolicy,

    /// Runtime version written into synthesized directives
    pub runtime_version: String,

    /// Skip the advisory release check entirely
    pub release_check_disabled: bool,

    /// GitHub API base URL used for the release check
    pub release_api_url: String,

    /// `owner/repo` whose latest release is compared with this packager
    pub release_repo: String,

    /// Request timeout for the release check
    pub release_check_timeout: Duration,

    /// How long a cached release check stays trusted
    pub release_check_ttl: Duration,

    /// Only prime the release check when stale; fetch on the following run
    pub release_defer_fetch: bool,

    /// `owner/repo` the deploy templates are downloaded from
    pub templates_repo: String,

    /// Kubernetes namespace created before applying deploy manifests
    pub deploy_namespace: String,
}

impl PackagerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            project_dir: env::var("PACKAGER_PROJECT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),

            cache_dir: env::var("PACKAGER_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_cache_dir()),

            augment_policy: env::var("PACKAGER_REQUIRE_DECLARED")
                .ok()
                .filter(|v| parse_flag(v))
                .map(|_| AugmentPolicy::RequireDeclared)
                .unwrap_or_default(),

            runtime_version: env::var("PACKAGER_RUNTIME_VERSION")
                .unwrap_or_else(|_| RUNTIME_VERSION.to_string()),

            release_check_disabled: env::var("PACKAGER_DISABLE_RELEASE_CHECK")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),

            release_api_url: env::var("PACKAGER_RELEASE_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),

            release_repo: env::var("PACKAGER_RELEASE_REPO")
                .unwrap_or_else(|_| "suborbital/subo".to_string()),

            release_check_timeout: env::var("PACKAGER_RELEASE_CHECK_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(5)),

            release_check_ttl: env::var("PACKAGER_RELEASE_CHECK_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(60 * 60)),

            release_defer_fetch: env::var("PACKAGER_RELEASE_DEFER_FETCH")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            templates_repo: env::var("PACKAGER_TEMPLATES_REPO")
                .unwrap_or_else(|_| "suborbital/subo".to_string()),

            deploy_namespace: env::var("PACKAGER_DEPLOY_NAMESPACE")
                .unwrap_or_else(|_| "suborbital".to_string()),
        }
    }
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "bundle-packager")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| env::temp_dir().join("bundle-packager"))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
