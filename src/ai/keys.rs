use async_trait::async_trait;

use crate::app::App;
use crate::error::AppError;
use crate::model::SettingsChanges;

pub const KEYRING_SERVICE: &str = "PlanForge";
pub const KEYRING_ACCOUNT: &str = "OpenAI_API_Key";

/// First-tier storage for the API key.
pub trait SecretStore: Send + Sync {
    fn get(&self) -> Result<Option<String>, AppError>;
    fn set(&self, secret: &str) -> Result<(), AppError>;
    fn delete(&self) -> Result<(), AppError>;
}

/// Second-tier storage, consulted when the secret store has nothing.
#[async_trait]
pub trait KeyFallback: Send + Sync {
    async fn load_key(&self) -> Result<Option<String>, AppError>;
    /// `None` clears the stored key.
    async fn store_key(&self, key: Option<&str>) -> Result<(), AppError>;
}

/// The operating system credential store.
pub struct KeyringStore {
    service: String,
    account: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            account: KEYRING_ACCOUNT.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, AppError> {
        keyring::Entry::new(&self.service, &self.account).map_err(keyring_error)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    fn get(&self) -> Result<Option<String>, AppError> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(keyring_error(err)),
        }
    }

    fn set(&self, secret: &str) -> Result<(), AppError> {
        self.entry()?.set_password(secret).map_err(keyring_error)
    }

    fn delete(&self) -> Result<(), AppError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(keyring_error(err)),
        }
    }
}

fn keyring_error(err: keyring::Error) -> AppError {
    AppError::SecretStore(err.to_string())
}

/// Used with `--secret-store disabled`: reads nothing, refuses writes.
pub struct DisabledStore;

impl SecretStore for DisabledStore {
    fn get(&self) -> Result<Option<String>, AppError> {
        Ok(None)
    }

    fn set(&self, _secret: &str) -> Result<(), AppError> {
        Err(AppError::SecretStore(
            "credential store is disabled".to_string(),
        ))
    }

    fn delete(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl KeyFallback for App {
    async fn load_key(&self) -> Result<Option<String>, AppError> {
        let settings = self.get_settings().await?;
        Ok(settings
            .openai_api_key
            .filter(|key| !key.trim().is_empty()))
    }

    async fn store_key(&self, key: Option<&str>) -> Result<(), AppError> {
        self.update_settings(SettingsChanges {
            openai_api_key: Some(key.unwrap_or_default().to_string()),
            ..Default::default()
        })
        .await?;
        Ok(())
    }
}

/// Shows the first and last four characters of a key.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::setup_app;

    #[tokio::test]
    async fn settings_row_backs_the_key() {
        let (_dir, app) = setup_app().await;
        assert_eq!(app.load_key().await.expect("load"), None);

        app.store_key(Some("sk-from-settings")).await.expect("store");
        assert_eq!(
            app.load_key().await.expect("load").as_deref(),
            Some("sk-from-settings")
        );

        app.store_key(None).await.expect("clear");
        assert_eq!(app.load_key().await.expect("load"), None);
    }

    #[test]
    fn disabled_store_refuses_writes() {
        let store = DisabledStore;
        assert_eq!(store.get().expect("get"), None);
        assert!(matches!(store.set("sk-x"), Err(AppError::SecretStore(_))));
        assert!(store.delete().is_ok());
    }

    #[test]
    fn masking_hides_the_middle() {
        assert_eq!(mask_key("sk-abcdefghijkl"), "sk-a...ijkl");
        assert_eq!(mask_key("sk-short"), "********");
    }
}
