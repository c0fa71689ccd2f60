use std::collections::HashMap;

use serde::Deserialize;

use crate::middleware::anti_replay::NonceScope;

const DEFAULTS: &str = include_str!("../config/default.toml");

/// Smallest non-zero rate whose burst capacity (2 × rps) still holds one token.
const MIN_RATE_LIMIT_RPS: f64 = 0.5;

/// Plain environment names understood for compatibility with existing
/// deployments. They take precedence over every other source.
const PLAIN_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("APP_ENV", "app_env"),
    ("PORT", "server.port"),
    ("SESSION_TTL", "security.session_ttl"),
    ("FRESHNESS_WINDOW", "security.freshness_window"),
    ("RATE_LIMIT_RPS", "security.rate_limit_rps"),
    ("DELAY_MS", "chat.delay_ms"),
    ("MAX_MESSAGE_BYTES", "chat.max_message_bytes"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Sliding session expiry in seconds.
    pub session_ttl: u64,
    /// Replay timestamp tolerance and nonce retention horizon in seconds.
    pub freshness_window: u64,
    /// Sustained requests per second; burst capacity is twice this. `0` disables limiting.
    pub rate_limit_rps: f64,
    /// Derive the client key from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy: bool,
    pub nonce_scope: NonceScope,
    /// Mount `GET /csrf`, which only sets the CSRF cookie.
    pub csrf_seed_endpoint: bool,
    /// Stable key material for CSRF token derivation. Random per process when unset.
    pub csrf_secret: Option<String>,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub delay_ms: u64,
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub chat: ChatConfig,
}

impl AppConfig {
    /// Production deployments get `Secure` cookies.
    pub fn is_production(&self) -> bool {
        matches!(self.app_env.trim().to_ascii_lowercase().as_str(), "prod" | "production")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        match ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();
    load_from_env(std::env::vars().collect())
}

/// Builds the configuration against an explicit environment snapshot.
pub fn load_from_env(env: HashMap<String, String>) -> anyhow::Result<AppConfig> {
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: chatwall.toml (in CWD)
        .add_source(::config::File::with_name("chatwall").required(false));

    if let Some(custom_path) = env.get("CHATWALL_CONFIG") {
        builder = builder.add_source(::config::File::with_name(custom_path).required(false));
    }
    builder = builder.add_source(
        ::config::Environment::with_prefix("CHATWALL")
            .separator("__")
            .source(Some(env.clone())),
    );

    for (var, key) in PLAIN_ENV_OVERRIDES {
        builder = builder.set_override_option(*key, env.get(*var).cloned())?;
    }

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    let sec = &cfg.security;
    if sec.session_ttl == 0 {
        return Err(anyhow::anyhow!("security.session_ttl must be > 0"));
    }
    if sec.freshness_window == 0 {
        return Err(anyhow::anyhow!("security.freshness_window must be > 0"));
    }
    if !sec.rate_limit_rps.is_finite() || sec.rate_limit_rps < 0.0 {
        return Err(anyhow::anyhow!("security.rate_limit_rps must be a finite number >= 0"));
    }
    // Below 0.5 the burst capacity is under one token and no request ever passes.
    if sec.rate_limit_rps > 0.0 && sec.rate_limit_rps < MIN_RATE_LIMIT_RPS {
        return Err(anyhow::anyhow!(
            "security.rate_limit_rps must be 0 (disabled) or at least {}",
            MIN_RATE_LIMIT_RPS
        ));
    }
    if sec.sweep_interval_secs == 0 {
        return Err(anyhow::anyhow!("security.sweep_interval_secs must be > 0"));
    }
    if let Some(secret) = &sec.csrf_secret {
        if secret.trim().is_empty() {
            return Err(anyhow::anyhow!("security.csrf_secret must not be blank when set"));
        }
    }

    if cfg.chat.max_message_bytes == 0 {
        return Err(anyhow::anyhow!("chat.max_message_bytes must be > 0"));
    }

    Ok(())
}
