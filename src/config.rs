use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_AI_TIMEOUT_SECS: u64 = 120;

const APP_DIR_NAME: &str = "planforge";
const DB_FILE_NAME: &str = "planforge.db";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SecretStoreKind {
    Keyring,
    Disabled,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub secret_store: SecretStoreKind,
    pub api_base: String,
    pub model: String,
    pub ai_timeout: Duration,
}

impl Config {
    pub fn resolve(
        data_dir: Option<PathBuf>,
        secret_store: SecretStoreKind,
        api_base: Option<String>,
        model: Option<String>,
        ai_timeout_secs: Option<u64>,
    ) -> Result<Self, AppError> {
        let data_dir = match data_dir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => std::env::current_dir()?.join(dir),
            None => default_data_dir()?,
        };
        let api_base = non_blank(api_base).unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let model = non_blank(model).unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout = ai_timeout_secs.unwrap_or(DEFAULT_AI_TIMEOUT_SECS);
        if timeout == 0 {
            return Err(AppError::InvalidInput(
                "ai timeout must be at least one second".to_string(),
            ));
        }

        Ok(Self {
            data_dir,
            secret_store,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
            ai_timeout: Duration::from_secs(timeout),
        })
    }

    pub fn db_path(&self) -> PathBuf {
        resolve_db_path(&self.data_dir)
    }
}

pub fn resolve_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE_NAME)
}

fn default_data_dir() -> Result<PathBuf, AppError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| {
            AppError::InvalidInput(
                "unable to resolve a data directory; pass --data-dir or set PLANFORGE_HOME"
                    .to_string(),
            )
        })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_overrides_fall_back_to_defaults() {
        let config = Config::resolve(
            Some(PathBuf::from("/tmp/pf")),
            SecretStoreKind::Disabled,
            Some("  ".to_string()),
            None,
            None,
        )
        .expect("config");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.ai_timeout, Duration::from_secs(DEFAULT_AI_TIMEOUT_SECS));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/pf/planforge.db"));
    }

    #[test]
    fn api_base_drops_trailing_slash() {
        let config = Config::resolve(
            Some(PathBuf::from("/tmp/pf")),
            SecretStoreKind::Keyring,
            Some("http://localhost:9999/v1/".to_string()),
            Some("gpt-4o".to_string()),
            Some(5),
        )
        .expect("config");
        assert_eq!(config.api_base, "http://localhost:9999/v1");
        assert_eq!(config.model, "gpt-4o");
    }

    #[test]
    fn relative_data_dir_is_anchored_at_cwd() {
        let config = Config::resolve(
            Some(PathBuf::from("pf-data")),
            SecretStoreKind::Disabled,
            None,
            None,
            None,
        )
        .expect("config");
        assert!(config.data_dir.is_absolute());
        assert!(config.data_dir.ends_with("pf-data"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = Config::resolve(
            Some(PathBuf::from("/tmp/pf")),
            SecretStoreKind::Disabled,
            None,
            None,
            Some(0),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
