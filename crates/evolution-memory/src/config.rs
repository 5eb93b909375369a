// evolution-memory/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::evolution::MutationConfig;

/// Location of the store file relative to the project root.
pub const DEFAULT_DB_RELATIVE_PATH: &str = ".agent/brain/memory.db";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub project_root: PathBuf,
    pub max_payload_bytes: usize,
    pub confidence_threshold: f64,
    pub max_mutations_per_session: usize,
    pub retrieval_limit: usize,
    pub worker_host: String,
    pub worker_port: u16,
    pub worker_timeout_seconds: u64,
    pub llm_api_endpoint: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment variables from {}", path.display()),
            Err(e) => debug!("No .env file loaded ({}), using process environment", e),
        }

        let cwd = env::current_dir().context("Failed to determine current directory")?;
        Self::from_lookup(|key| env::var(key).ok(), &cwd)
    }

    /// Build the configuration from an arbitrary variable source. `from_env`
    /// passes the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F, cwd: &Path) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let project_root = resolve_project_root(get("EVOLUTION_PROJECT_ROOT").map(PathBuf::from), cwd);
        let db_path = resolve_db_path(get("EVOLUTION_DB_PATH").map(PathBuf::from), &project_root);

        Ok(Self {
            db_path,
            project_root,
            max_payload_bytes: parse_var(&get, "EVOLUTION_MAX_PAYLOAD_BYTES", "10000")?,
            confidence_threshold: parse_var(&get, "EVOLUTION_CONFIDENCE_THRESHOLD", "0.8")?,
            max_mutations_per_session: parse_var(&get, "EVOLUTION_MAX_MUTATIONS", "3")?,
            retrieval_limit: parse_var(&get, "EVOLUTION_RETRIEVAL_LIMIT", "5")?,
            worker_host: get("MEMORY_WORKER_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            worker_port: parse_var(&get, "MEMORY_WORKER_PORT", "37777")?,
            worker_timeout_seconds: parse_var(&get, "MEMORY_WORKER_TIMEOUT_SECONDS", "30")?,
            llm_api_endpoint: get("LLM_API_ENDPOINT"),
            llm_api_key: get("LLM_API_KEY"),
            llm_model: get("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            llm_timeout_seconds: parse_var(&get, "LLM_TIMEOUT_SECONDS", "30")?,
        })
    }

    /// Replace the store location, e.g. from a `--db-path` flag.
    pub fn with_db_path(mut self, db_path: PathBuf) -> Self {
        self.db_path = db_path;
        self
    }

    pub fn mutation_config(&self) -> MutationConfig {
        MutationConfig {
            confidence_threshold: self.confidence_threshold,
            max_mutations_per_session: self.max_mutations_per_session,
        }
    }

    pub fn project_path(&self) -> String {
        self.project_root.to_string_lossy().into_owned()
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database: {}", self.db_path.display());
        info!("- Project Root: {}", self.project_root.display());
        info!("- Max Payload Bytes: {}", self.max_payload_bytes);
        info!("- Confidence Threshold: {}", self.confidence_threshold);
        info!("- Max Mutations/Session: {}", self.max_mutations_per_session);
        info!("- Retrieval Limit: {}", self.retrieval_limit);
        info!("- Worker: {}:{}", self.worker_host, self.worker_port);
        info!(
            "- Summarizer: {}",
            match (&self.llm_api_endpoint, &self.llm_api_key) {
                (Some(endpoint), Some(_)) => format!("{} ({})", endpoint, self.llm_model),
                _ => "disabled".to_string(),
            }
        );
    }

    pub fn worker_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.worker_host, self.worker_port)
            .parse()
            .with_context(|| format!("Invalid worker address {}:{}", self.worker_host, self.worker_port))
    }
}

fn parse_var<T, G>(get: &G, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {:?}", key, raw))
}

/// Explicit root if given, else the nearest ancestor of `cwd` holding a
/// `.git` entry, else `cwd` itself.
pub fn resolve_project_root(explicit: Option<PathBuf>, cwd: &Path) -> PathBuf {
    if let Some(root) = explicit {
        return root;
    }
    cwd.ancestors()
        .find(|dir| dir.join(".git").exists())
        .unwrap_or(cwd)
        .to_path_buf()
}

/// Explicit store path if given, else `<project_root>/.agent/brain/memory.db`.
pub fn resolve_db_path(explicit: Option<PathBuf>, project_root: &Path) -> PathBuf {
    explicit.unwrap_or_else(|| project_root.join(DEFAULT_DB_RELATIVE_PATH))
}
