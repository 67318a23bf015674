use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Engine configuration, passed explicitly at construction.
///
/// Environment parsing happens once at the process boundary via
/// [`EngineConfig::from_env`]; the engine itself never reads the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for persistent state.
    pub sessions_dir: PathBuf,
    /// Edits between automatic checkpoints (K).
    pub checkpoint_interval: u64,
    /// WAL length at which session status suggests compaction.
    pub wal_compact_threshold: u64,
    /// Whether mutations write back to the session's source.
    pub auto_save: bool,
    /// TTL for cross-process locks; holders renew at TTL/3.
    pub lock_ttl: Duration,
    /// How long lock acquisition retries before giving up.
    pub lock_acquire_timeout: Duration,
    /// Backoff bounds between acquisition attempts.
    pub lock_retry_min: Duration,
    pub lock_retry_max: Duration,
    /// Largest accepted patch batch.
    pub max_batch_ops: usize,
    /// Largest accepted history query limit.
    pub max_query_limit: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            checkpoint_interval: 10,
            wal_compact_threshold: 50,
            auto_save: true,
            lock_ttl: Duration::from_secs(60),
            lock_acquire_timeout: Duration::from_secs(5),
            lock_retry_min: Duration::from_millis(50),
            lock_retry_max: Duration::from_millis(200),
            max_batch_ops: 10,
            max_query_limit: 50,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the `DOCX_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("DOCX_SESSIONS_DIR") {
            if !dir.is_empty() {
                config.sessions_dir = PathBuf::from(dir);
            }
        }
        if let Some(interval) = parse_var::<u64>("DOCX_CHECKPOINT_INTERVAL") {
            config.checkpoint_interval = interval.max(1);
        }
        if let Some(threshold) = parse_var::<u64>("DOCX_WAL_COMPACT_THRESHOLD") {
            config.wal_compact_threshold = threshold;
        }
        if let Ok(value) = std::env::var("DOCX_AUTO_SAVE") {
            config.auto_save = !matches!(
                value.to_ascii_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            );
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring unparseable {name}={value}");
            None
        }
    }
}

fn default_sessions_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docx-session")
        .join("sessions")
}
