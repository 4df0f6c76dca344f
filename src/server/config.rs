//! Configuration loading for huginnd.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag, or `HUGINN_CONFIG`)
//! 2. `./huginn.toml` (working directory)
//! 3. `~/.huginn/config.toml` (user)
//! 4. `/etc/huginn/config.toml` (system)
//! 5. built-in defaults
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.huginn/secrets.toml` (user, must be 0600)
//! 2. `/etc/huginn/secrets.toml` (system, must be 0600)
//! 3. `GEMINI_API_KEY`, then `GOOGLE_API_KEY` from the environment

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::gateway::{HuginnBuilder, SpamConfig};
use crate::limiter::RateLimitConfig;
use crate::persona::PersonaConfig;
use crate::providers::DEFAULT_CANDIDATES;
use crate::types::GenerationOptions;
use crate::{Huginn, HuginnError, Result};

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub spam: SpamSection,
    #[serde(default)]
    pub persona: PersonaConfig,
}

/// Server network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0:8000).
    #[serde(default = "default_address")]
    pub address: String,
    /// CORS origins; `"*"` allows any (default: http://localhost:5173).
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            allowed_origins: default_origins(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

/// Model candidates and generation parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Candidate model ids, highest priority first.
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: Option<f32>,
    #[serde(default = "default_top_k")]
    pub top_k: Option<u32>,
    /// Per-call timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Override the Gemini API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Send persona instructions as `systemInstruction` (default: false).
    #[serde(default)]
    pub system_instruction: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            timeout_secs: default_timeout(),
            base_url: None,
            system_instruction: false,
        }
    }
}

fn default_candidates() -> Vec<String> {
    DEFAULT_CANDIDATES.iter().map(|s| s.to_string()).collect()
}

fn default_max_output_tokens() -> u32 {
    GenerationOptions::default().max_output_tokens
}

fn default_temperature() -> f32 {
    GenerationOptions::default().temperature
}

fn default_top_p() -> Option<f32> {
    GenerationOptions::default().top_p
}

fn default_top_k() -> Option<u32> {
    GenerationOptions::default().top_k
}

fn default_timeout() -> u64 {
    30
}

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_response_chars")]
    pub max_response_chars: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl(),
            max_response_chars: default_max_response_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_entries() -> u64 {
    CacheConfig::default().max_entries
}

fn default_cache_ttl() -> u64 {
    CacheConfig::default().ttl.as_secs()
}

fn default_max_response_chars() -> usize {
    CacheConfig::default().max_response_chars
}

/// `[rate_limit]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    /// Seconds between requests from one client (default: 3, 0 disables).
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_clients")]
    pub max_clients: u64,
    /// Path prefixes the cooldown applies to.
    #[serde(default = "default_limited_paths")]
    pub paths: Vec<String>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            max_clients: default_max_clients(),
            paths: default_limited_paths(),
        }
    }
}

fn default_cooldown() -> u64 {
    3
}

fn default_max_clients() -> u64 {
    RateLimitConfig::default().max_clients
}

fn default_limited_paths() -> Vec<String> {
    RateLimitConfig::default().paths
}

/// `[spam]` section. Defaults match [`SpamConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpamSection {
    pub max_message_chars: usize,
    pub diversity_min_len: usize,
    pub min_distinct_chars: usize,
    pub max_dominant_share: f64,
}

impl Default for SpamSection {
    fn default() -> Self {
        let d = SpamConfig::default();
        Self {
            max_message_chars: d.max_message_chars,
            diversity_min_len: d.diversity_min_len,
            min_distinct_chars: d.min_distinct_chars,
            max_dominant_share: d.max_dominant_share,
        }
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided; must exist)
    /// 2. `./huginn.toml`
    /// 3. `~/.huginn/config.toml`
    /// 4. `/etc/huginn/config.toml`
    ///
    /// Falls back to built-in defaults when no file is found. `FRONTEND_URL`
    /// is appended to the allowed origins when set.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path)?,
            None => Config::default(),
        };

        if let Ok(origin) = std::env::var("FRONTEND_URL")
            && !origin.trim().is_empty()
            && !config.server.allowed_origins.contains(&origin)
        {
            config.server.allowed_origins.push(origin);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HuginnError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(HuginnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        let local = PathBuf::from("huginn.toml");
        if local.exists() {
            return Ok(Some(local));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".huginn").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/huginn/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Reject values that would only fail later, at request time.
    pub fn validate(&self) -> Result<()> {
        if self.models.candidates.is_empty() {
            return Err(HuginnError::NoCandidates);
        }
        if self.models.timeout_secs == 0 {
            return Err(HuginnError::Configuration(
                "models.timeout_secs must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.spam.max_dominant_share) {
            return Err(HuginnError::Configuration(
                "spam.max_dominant_share must be between 0 and 1".into(),
            ));
        }
        // Surfaces unknown template parameters at startup.
        self.persona.render()?;
        Ok(())
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_output_tokens: self.models.max_output_tokens,
            temperature: self.models.temperature,
            top_p: self.models.top_p,
            top_k: self.models.top_k,
        }
    }

    pub fn cache_config(&self) -> Option<CacheConfig> {
        self.cache.enabled.then(|| CacheConfig {
            max_entries: self.cache.max_entries,
            ttl: Duration::from_secs(self.cache.ttl_secs),
            max_response_chars: self.cache.max_response_chars,
        })
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            cooldown: Duration::from_secs(self.rate_limit.cooldown_secs),
            max_clients: self.rate_limit.max_clients,
            paths: self.rate_limit.paths.clone(),
        }
    }

    pub fn spam_config(&self) -> SpamConfig {
        SpamConfig {
            max_message_chars: self.spam.max_message_chars,
            diversity_min_len: self.spam.diversity_min_len,
            min_distinct_chars: self.spam.min_distinct_chars,
            max_dominant_share: self.spam.max_dominant_share,
        }
    }

    /// Gateway builder with everything from this config applied.
    pub fn gateway_builder(&self, api_key: impl Into<String>) -> Result<HuginnBuilder> {
        let mut builder = Huginn::builder()
            .gemini(api_key)
            .system_instruction(self.models.system_instruction)
            .candidates(self.models.candidates.clone())
            .generation_options(self.generation_options())
            .timeout(Duration::from_secs(self.models.timeout_secs))
            .spam(self.spam_config())
            .persona(self.persona.render()?);

        if let Some(ref url) = self.models.base_url {
            builder = builder.gemini_base_url(url.clone());
        }
        builder = match self.cache_config() {
            Some(cache) => builder.response_cache(cache),
            None => builder.disable_response_cache(),
        };
        Ok(builder)
    }
}

/// Secrets configuration (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub gemini: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

/// Environment variables checked for the Gemini key, in order.
const GEMINI_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Resolution order:
    /// 1. `~/.huginn/secrets.toml` (if exists, must be 0600)
    /// 2. `/etc/huginn/secrets.toml` (if exists, must be 0600)
    ///
    /// Returns empty secrets if no file exists (the key may come from env vars).
    pub fn load() -> Result<Self> {
        // Try user secrets first
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".huginn").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_path(&user_secrets);
            }
        }

        // Try system secrets
        let system_secrets = PathBuf::from("/etc/huginn/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_path(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load one secrets file, refusing it if other users can read it.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HuginnError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(HuginnError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Gemini API key, falling back to the environment.
    pub fn gemini_key(&self) -> Option<String> {
        self.gemini
            .as_ref()
            .map(|s| s.api_key.clone())
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                GEMINI_ENV_VARS
                    .iter()
                    .find_map(|var| std::env::var(var).ok())
                    .filter(|k| !k.trim().is_empty())
            })
    }

    /// Like [`gemini_key`](Self::gemini_key), but a missing key is fatal.
    pub fn require_gemini_key(&self) -> Result<String> {
        self.gemini_key().ok_or_else(|| {
            HuginnError::Configuration(
                "GEMINI_API_KEY not found in secrets file or environment".to_string(),
            )
        })
    }
}
