use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Gemini model used when `GEMINI_MODEL` is not provided.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";
/// Public Gemini REST endpoint.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// Rasterization resolution applied to PDF pages.
pub const DEFAULT_PDF_RENDER_DPI: u32 = 200;
/// Upper bound on request bodies accepted by `/extract` (25 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the claims QA server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Credential for the Gemini API. Model operations fail while this is absent.
    pub google_api_key: Option<String>,
    /// Gemini model identifier, e.g. `gemini-1.5-flash-latest`.
    pub gemini_model: String,
    /// Base URL of the Gemini REST API.
    pub gemini_base_url: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Directory under which per-request scratch directories are created.
    pub scratch_dir: PathBuf,
    /// DPI used when rasterizing PDF pages.
    pub pdf_render_dpi: u32,
    /// Maximum accepted request body size in bytes.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let pdf_render_dpi =
            parse_optional::<u32>("PDF_RENDER_DPI")?.unwrap_or(DEFAULT_PDF_RENDER_DPI);
        if pdf_render_dpi == 0 {
            return Err(ConfigError::InvalidValue("PDF_RENDER_DPI".into()));
        }

        Ok(Self {
            google_api_key: load_env_optional("GOOGLE_API_KEY"),
            gemini_model: load_env_optional("GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_base_url: load_env_optional("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            server_port: parse_optional("SERVER_PORT")?,
            scratch_dir: load_env_optional("CLAIMS_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            pdf_render_dpi,
            max_upload_bytes: parse_optional("MAX_UPLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        })
    }

    /// Whether a model credential is available.
    pub fn has_api_key(&self) -> bool {
        self.google_api_key.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            google_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            server_port: None,
            scratch_dir: env::temp_dir(),
            pdf_render_dpi: DEFAULT_PDF_RENDER_DPI,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        model = %config.gemini_model,
        base_url = %config.gemini_base_url,
        has_api_key = config.has_api_key(),
        server_port = ?config.server_port,
        scratch_dir = %config.scratch_dir.display(),
        pdf_render_dpi = config.pdf_render_dpi,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
