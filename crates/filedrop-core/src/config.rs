//! Configuration module for Filedrop.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, defaults, and strict startup validation. Unknown
//! keys are errors, not warnings; weak secrets abort the process before it
//! binds a socket.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Substrings that disqualify a secret outright
const WEAK_SECRET_FRAGMENTS: &[&str] = &[
    "change-me",
    "password",
    "admin",
    "secret",
    "default",
    "123456",
];

/// Minimum entropy carrier for MAC/session secrets, in bytes
const MIN_SECRET_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for the Filedrop server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub metadata: MetadataConfig,
    pub object_store: ObjectStoreConfig,
    pub upload: UploadConfig,
    pub cleanup: CleanupConfig,
    pub rate_limits: RateLimitsConfig,
    /// Consumed by the notification tooling outside the core; validated here
    /// so a typo fails fast rather than at first send.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    /// Consumed by the backup tooling outside the core.
    #[serde(default)]
    pub backup: Option<BackupConfig>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
    /// Preferred base URL embedded in issued download links.
    pub public_base_url: String,
    /// Base URL used when the preferred one is empty (e.g. behind a
    /// provisional proxy name).
    pub fallback_base_url: Option<String>,
    /// Honor `x-forwarded-for` from the reverse proxy for principal
    /// fallback and audit ips.
    pub trusted_proxy: bool,
    /// Grace period for draining in-flight requests on shutdown.
    pub shutdown_grace_secs: u64,
}

/// Secrets and token policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Session-layer secret; required, >= 32 bytes, no weak fragments.
    pub session_secret: String,
    /// HMAC key for download tokens; required, >= 32 bytes, no weak fragments.
    pub download_signing_secret: String,
    /// Bootstrap admin principal id (UUID). Optional; when set the user is
    /// upserted as admin at startup.
    pub admin_user_id: Option<String>,
    /// Longest TTL a client may request for a download link, in seconds.
    pub max_link_ttl_secs: u64,
}

/// Metadata store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataConfig {
    /// SQLite DSN, e.g. `sqlite:///var/lib/filedrop/meta.db` or a bare path.
    pub dsn: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

/// Object store settings (S3-compatible).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectStoreConfig {
    /// Endpoint URL, e.g. `http://minio:9000`.
    pub endpoint: String,
    /// Region name; MinIO accepts any non-empty value.
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Path-style addressing, required by MinIO and most self-hosted
    /// backends.
    pub force_path_style: bool,
}

/// Upload pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    /// Global per-file ceiling in bytes.
    pub max_upload_bytes: u64,
    /// Window for the duplicate-reservation check, in seconds.
    pub dedup_window_secs: u64,
    /// Hash job queue depth; overflow fails the finalize.
    pub hash_queue_depth: usize,
    /// Seconds a producer waits for queue space before giving up.
    pub hash_enqueue_timeout_secs: u64,
    /// Chunk size handed to the backend for resumable sessions, in bytes.
    pub session_chunk_bytes: u64,
}

/// Cleanup reaper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupConfig {
    pub enabled: bool,
    /// Seconds between reaper passes.
    pub interval_secs: u64,
    /// Age after which `pending` rows are considered abandoned, in seconds.
    pub max_age_secs: u64,
    /// Objects sampled per pass by the orphan scan; 0 disables it.
    pub orphan_sample: usize,
}

/// Token-bucket defaults per endpoint class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitsConfig {
    pub auth_per_min: u32,
    pub auth_burst: u32,
    pub upload_per_hour: u32,
    pub upload_burst: u32,
    pub download_per_hour: u32,
    pub download_burst: u32,
    pub admin_per_min: u32,
    pub admin_burst: u32,
    pub default_per_min: u32,
    pub default_burst: u32,
}

/// SMTP relay settings, used by the notification tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
}

/// Backup schedule, used by the backup tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Cron-style schedule expression.
    pub schedule: String,
    pub target_path: String,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            public_base_url: String::new(),
            fallback_base_url: None,
            trusted_proxy: false,
            shutdown_grace_secs: 5,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            dsn: "sqlite://filedrop.db".to_string(),
            max_connections: 25,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024 * 1024,
            dedup_window_secs: 30,
            hash_queue_depth: 256,
            hash_enqueue_timeout_secs: 2,
            session_chunk_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            max_age_secs: 24 * 3600,
            orphan_sample: 16,
        }
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            auth_per_min: 10,
            auth_burst: 10,
            upload_per_hour: 20,
            upload_burst: 5,
            download_per_hour: 100,
            download_burst: 20,
            admin_per_min: 50,
            admin_burst: 50,
            default_per_min: 100,
            default_burst: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration, collecting every violation.
    ///
    /// An empty vector means the configuration is usable. The caller
    /// turns a non-empty vector into a startup failure; partial starts
    /// with weak secrets are not permitted.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            problems.push(format!(
                "server.bind_addr {:?} is not a socket address",
                self.server.bind_addr
            ));
        }
        if self.server.public_base_url.is_empty()
            && self
                .server
                .fallback_base_url
                .as_deref()
                .unwrap_or("")
                .is_empty()
        {
            problems.push("server.public_base_url or fallback_base_url must be set".into());
        }

        validate_secret("security.session_secret", &self.security.session_secret, &mut problems);
        validate_secret(
            "security.download_signing_secret",
            &self.security.download_signing_secret,
            &mut problems,
        );
        if self.security.max_link_ttl_secs == 0 {
            problems.push("security.max_link_ttl_secs must be positive".into());
        }
        if let Some(admin) = &self.security.admin_user_id {
            if admin.parse::<uuid::Uuid>().is_err() {
                problems.push("security.admin_user_id must be a UUID".into());
            }
        }

        if self.metadata.dsn.is_empty() {
            problems.push("metadata.dsn must be set".into());
        }
        if self.metadata.max_connections == 0 {
            problems.push("metadata.max_connections must be positive".into());
        }

        for (key, value) in [
            ("object_store.endpoint", &self.object_store.endpoint),
            ("object_store.access_key", &self.object_store.access_key),
            ("object_store.secret_key", &self.object_store.secret_key),
            ("object_store.bucket", &self.object_store.bucket),
        ] {
            if value.is_empty() {
                problems.push(format!("{key} must be set"));
            }
        }

        if self.upload.max_upload_bytes == 0 {
            problems.push("upload.max_upload_bytes must be positive".into());
        }
        if self.upload.hash_queue_depth == 0 {
            problems.push("upload.hash_queue_depth must be positive".into());
        }
        if self.upload.session_chunk_bytes < 5 * 1024 * 1024 {
            // S3 rejects non-final parts below 5 MiB.
            problems.push("upload.session_chunk_bytes must be at least 5 MiB".into());
        }

        if self.cleanup.enabled && self.cleanup.interval_secs == 0 {
            problems.push("cleanup.interval_secs must be positive when cleanup is enabled".into());
        }

        problems
    }

    /// The base URL links are rendered against.
    pub fn link_base_url(&self) -> &str {
        if !self.server.public_base_url.is_empty() {
            &self.server.public_base_url
        } else {
            self.server.fallback_base_url.as_deref().unwrap_or("")
        }
    }
}

fn validate_secret(key: &str, value: &str, problems: &mut Vec<String>) {
    if value.len() < MIN_SECRET_BYTES {
        problems.push(format!(
            "{key} must be at least {MIN_SECRET_BYTES} bytes, got {}",
            value.len()
        ));
    }
    let lowered = value.to_lowercase();
    for fragment in WEAK_SECRET_FRAGMENTS {
        if lowered.contains(fragment) {
            problems.push(format!("{key} contains the weak fragment {fragment:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.server.public_base_url = "https://drop.example.com".into();
        config.security.session_secret = "k".repeat(48);
        config.security.download_signing_secret = "j".repeat(48);
        config.security.max_link_ttl_secs = 7 * 24 * 3600;
        config.object_store = ObjectStoreConfig {
            endpoint: "http://127.0.0.1:9000".into(),
            region: "us-east-1".into(),
            access_key: "AKIAEXAMPLE".into(),
            secret_key: "x".repeat(40),
            bucket: "filedrop".into(),
            force_path_style: true,
        };
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_empty());
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = valid_config();
        config.security.download_signing_secret = "short".into();
        let problems = config.validate();
        assert!(problems
            .iter()
            .any(|p| p.contains("download_signing_secret")));
    }

    #[test]
    fn test_weak_fragments_rejected() {
        for fragment in WEAK_SECRET_FRAGMENTS {
            let mut config = valid_config();
            config.security.session_secret = format!("{}{}", "a".repeat(40), fragment);
            let problems = config.validate();
            assert!(
                problems.iter().any(|p| p.contains(fragment)),
                "fragment {fragment} was not rejected"
            );
        }
    }

    #[test]
    fn test_missing_base_url_rejected() {
        let mut config = valid_config();
        config.server.public_base_url = String::new();
        config.server.fallback_base_url = None;
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn test_fallback_base_url_suffices() {
        let mut config = valid_config();
        config.server.public_base_url = String::new();
        config.server.fallback_base_url = Some("https://fallback.example.com".into());
        assert!(config.validate().is_empty());
        assert_eq!(config.link_base_url(), "https://fallback.example.com");
    }

    #[test]
    fn test_unknown_keys_are_errors() {
        let yaml = r#"
server:
  bind_addr: "127.0.0.1:8080"
  public_base_url: "https://x"
  trusted_proxy: false
  shutdown_grace_secs: 5
  surprise_key: true
"#;
        let parsed: Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_small_session_chunk_rejected() {
        let mut config = valid_config();
        config.upload.session_chunk_bytes = 1024;
        assert!(config
            .validate()
            .iter()
            .any(|p| p.contains("session_chunk_bytes")));
    }

    #[test]
    fn test_default_ceiling_is_50_gib() {
        assert_eq!(
            UploadConfig::default().max_upload_bytes,
            50 * 1024 * 1024 * 1024
        );
    }
}
