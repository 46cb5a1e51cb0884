use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::error::{CoreResult, SentimentError};

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
/// Default Anthropic API version header required by the Messages API.
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiCfg {
    /// Full endpoint URL of the Messages API.
    #[serde(default = "default_api_url")]
    pub url: String,
    /// Name of the environment variable that contains the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Value of the `anthropic-version` header.
    #[serde(default = "default_api_version")]
    pub version: String,
}

impl Default for ApiCfg {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            version: default_api_version(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}
fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Transport-level request timeout in milliseconds (default 60000ms).
    /// The orchestrator's call timeout is the one that normally fires first.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CallCfg {
    /// Deadline for the outbound call, in milliseconds (default 30000ms)
    #[serde(default = "default_call_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on the input text, in chars, after normalization.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for CallCfg {
    fn default() -> Self {
        Self {
            timeout_ms: default_call_timeout_ms(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl CallCfg {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_call_timeout_ms() -> u64 {
    30_000
}
fn default_max_input_chars() -> usize {
    10_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiCfg,
    /// HTTP client configuration (timeouts, pooling). Missing in older configs → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub call: CallCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(SentimentError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| SentimentError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| SentimentError::Other(e.into()))?
            }
            Some("toml") => {
                toml::from_str::<Self>(s).map_err(|e| SentimentError::Other(e.into()))?
            }
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| SentimentError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s).map_err(|e| SentimentError::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make every call fail.
    pub fn validate(&self) -> CoreResult<()> {
        if self.api.url.trim().is_empty() {
            return Err(SentimentError::Config("api.url must not be empty".into()));
        }
        if self.api.model.trim().is_empty() {
            return Err(SentimentError::Config("api.model must not be empty".into()));
        }
        if self.api.max_tokens == 0 {
            return Err(SentimentError::Config("api.max_tokens must be at least 1".into()));
        }
        if self.call.timeout_ms == 0 {
            return Err(SentimentError::Config("call.timeout_ms must be at least 1".into()));
        }
        if self.call.max_input_chars == 0 {
            return Err(SentimentError::Config(
                "call.max_input_chars must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Read the API key from the environment variable named by `api.api_key_env`.
    pub fn api_key(&self) -> CoreResult<SecretString> {
        match std::env::var(&self.api.api_key_env) {
            Ok(v) if !v.trim().is_empty() => Ok(SecretString::from(v)),
            _ => Err(SentimentError::Config(format!(
                "environment variable {} is not set",
                self.api.api_key_env
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("app.json");
        let json = r#"{
          "api": {
            "url": "http://localhost:8080/v1/messages",
            "api_key_env": "MY_KEY",
            "model": "claude-3-haiku-20240307",
            "max_tokens": 256
          },
          "call": {"timeout_ms": 5000}
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.api.url, "http://localhost:8080/v1/messages");
        assert_eq!(cfg.api.model, "claude-3-haiku-20240307");
        assert_eq!(cfg.api.max_tokens, 256);
        assert_eq!(cfg.api.version, DEFAULT_API_VERSION);
        assert_eq!(cfg.call.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.call.max_input_chars, 10_000);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.request_timeout_ms, 60_000);
        assert_eq!(cfg.http.pool_max_idle_per_host, None);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("empty.json");
        fs::write(&file, "{}").unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.api.url, DEFAULT_API_URL);
        assert_eq!(cfg.call.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/aisentiment-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            SentimentError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        fs::write(&file, vec![0xff, 0xfe, 0xfd, 0x00, 0x80]).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            SentimentError::Other(_) => {}
            other => panic!("expected Other(utf8) error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_json_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        let json = r#"{ "api": { "max_tokens": "lots" }"#;
        fs::write(&file, json).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            SentimentError::Other(_) => {}
            other => panic!("expected Other(json parse) error, got: {:?}", other),
        }
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("app.toml");
        let toml = r#"
[api]
model = "claude-3-haiku-20240307"
max_tokens = 512

[http]
connect_timeout_ms = 1000
pool_max_idle_per_host = 4

[call]
max_input_chars = 2000
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.api.model, "claude-3-haiku-20240307");
        assert_eq!(cfg.api.max_tokens, 512);
        assert_eq!(cfg.api.url, DEFAULT_API_URL);
        assert_eq!(cfg.http.connect_timeout_ms, 1_000);
        assert_eq!(cfg.http.pool_max_idle_per_host, Some(4));
        assert_eq!(cfg.call.max_input_chars, 2_000);
        assert_eq!(cfg.call.timeout_ms, 30_000);
    }

    #[test]
    fn unknown_extension_falls_back_to_json_then_toml() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("app.conf");
        fs::write(&json_path, r#"{"api":{"model":"m-json"}}"#).unwrap();
        let cfg_json_first = Config::from_path(&json_path).unwrap();
        assert_eq!(cfg_json_first.api.model, "m-json");

        let toml_path = dir.path().join("app2.conf");
        fs::write(&toml_path, "[api]\nmodel = \"m-toml\"\n").unwrap();
        let cfg_toml_fallback = Config::from_path(&toml_path).unwrap();
        assert_eq!(cfg_toml_fallback.api.model, "m-toml");
        assert_eq!(cfg_toml_fallback.http.request_timeout_ms, 60_000);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("zero.toml");
        fs::write(&file, "[call]\ntimeout_ms = 0\n").unwrap();
        let err = Config::from_path(&file).unwrap_err();
        assert!(matches!(err, SentimentError::Config(_)), "got {err:?}");
    }

    #[test]
    fn api_key_missing_env_is_config_error() {
        let cfg = Config {
            api: ApiCfg {
                api_key_env: "AISENTIMENT_TEST_KEY_THAT_IS_NEVER_SET".into(),
                ..ApiCfg::default()
            },
            ..Config::default()
        };
        let err = cfg.api_key().unwrap_err();
        match err {
            SentimentError::Config(msg) => {
                assert!(msg.contains("AISENTIMENT_TEST_KEY_THAT_IS_NEVER_SET"))
            }
            other => panic!("expected Config error, got: {:?}", other),
        }
    }
}
