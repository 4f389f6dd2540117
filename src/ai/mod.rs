pub mod client;
pub mod keys;
pub mod prompts;
pub mod response;
pub mod types;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{Config, SecretStoreKind};
use crate::error::{AiError, AppError, ErrorKind};

use self::client::{ChatMessage, ChatRequest, CompletionBackend, OpenAiClient};
use self::keys::{DisabledStore, KeyFallback, KeyringStore, SecretStore};
use self::prompts::Prompt;
use self::types::{GeneratedPlan, GeneratedTask, TaskEnhancement};

const DEFAULT_TASK_COUNT: u8 = 5;

/// Owns the AI configuration and the validated key for the process.
///
/// The key is resolved lazily: secret store first, then the fallback
/// (the settings row), and validated once before it is cached.
pub struct AiService {
    backend: Arc<dyn CompletionBackend>,
    secrets: Arc<dyn SecretStore>,
    fallback: Option<Arc<dyn KeyFallback>>,
    model: String,
    session: Mutex<Option<String>>,
}

impl AiService {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        secrets: Arc<dyn SecretStore>,
        fallback: Option<Arc<dyn KeyFallback>>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            secrets,
            fallback,
            model: model.into(),
            session: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config, fallback: Arc<dyn KeyFallback>) -> Result<Self, AppError> {
        let backend = OpenAiClient::new(&config.api_base, config.ai_timeout)?;
        let secrets: Arc<dyn SecretStore> = match config.secret_store {
            SecretStoreKind::Keyring => Arc::new(KeyringStore::new()),
            SecretStoreKind::Disabled => Arc::new(DisabledStore),
        };
        Ok(Self::new(
            Arc::new(backend),
            secrets,
            Some(fallback),
            config.model.clone(),
        ))
    }

    /// Validates `api_key`, or the stored key when none is given, and keeps
    /// it for later calls.
    pub async fn initialize(&self, api_key: Option<&str>) -> Result<(), AppError> {
        let key = match api_key.map(str::trim).filter(|key| !key.is_empty()) {
            Some(key) => key.to_string(),
            None => self.get_api_key().await.ok_or(AiError::MissingKey)?,
        };
        if !key.starts_with("sk-") {
            return Err(AiError::MalformedKey.into());
        }
        let models = self.backend.list_models(&key).await?;
        tracing::debug!(models = models.len(), "API key validated");
        *self.session.lock().await = Some(key);
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Secret store first, then the fallback. Failures at either tier are
    /// logged and treated as a miss.
    pub async fn get_api_key(&self) -> Option<String> {
        match self.secrets.get() {
            Ok(Some(key)) if !key.trim().is_empty() => return Some(key),
            Ok(_) => tracing::debug!("no API key in the credential store"),
            Err(err) => tracing::warn!(error = %err, "credential store read failed"),
        }
        let fallback = self.fallback.as_ref()?;
        match fallback.load_key().await {
            Ok(Some(key)) if !key.trim().is_empty() => Some(key),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "settings key read failed");
                None
            }
        }
    }

    /// Writes both tiers; fails only when neither write succeeds.
    pub async fn set_api_key(&self, api_key: &str) -> Result<(), AppError> {
        let key = api_key.trim();
        if key.is_empty() {
            return Err(AppError::InvalidInput("API key cannot be empty".to_string()));
        }
        let stored = match self.secrets.set(key) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(error = %err, "credential store write failed");
                Err(err)
            }
        };
        let backed_up = match &self.fallback {
            Some(fallback) => match fallback.store_key(Some(key)).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    tracing::warn!(error = %err, "settings key write failed");
                    Err(err)
                }
            },
            None => Err(AppError::SecretStore("no fallback store configured".to_string())),
        };
        *self.session.lock().await = None;
        match (stored, backed_up) {
            (Err(err), Err(_)) => Err(err),
            _ => {
                tracing::debug!(length = key.len(), "API key saved");
                Ok(())
            }
        }
    }

    /// Clears both tiers, continuing past a failed clear.
    pub async fn delete_api_key(&self) -> Result<(), AppError> {
        if let Err(err) = self.secrets.delete() {
            tracing::warn!(error = %err, "credential store delete failed");
        }
        if let Some(fallback) = &self.fallback {
            if let Err(err) = fallback.store_key(None).await {
                tracing::warn!(error = %err, "settings key delete failed");
            }
        }
        *self.session.lock().await = None;
        Ok(())
    }

    pub async fn generate_plan(
        &self,
        goal: &str,
        timeframe: Option<&str>,
    ) -> Result<GeneratedPlan, AppError> {
        ensure_text("goal", goal)?;
        let raw = self.run(prompts::plan(goal, timeframe)).await?;
        Ok(response::parse_plan(&raw)?)
    }

    pub async fn enhance_task(
        &self,
        title: &str,
        context: &str,
    ) -> Result<TaskEnhancement, AppError> {
        ensure_text("task title", title)?;
        let raw = self.run(prompts::enhance_task(title, context)).await?;
        Ok(response::parse_json(&raw)?)
    }

    pub async fn suggest_next_steps(
        &self,
        plan_title: &str,
        completed: &[String],
        remaining: &[String],
    ) -> Result<Vec<String>, AppError> {
        ensure_text("plan title", plan_title)?;
        let raw = self
            .run(prompts::suggest_next_steps(plan_title, completed, remaining))
            .await?;
        Ok(response::parse_json(&raw)?)
    }

    pub async fn generate_tasks(
        &self,
        plan_title: &str,
        goal: &str,
        existing_tasks: &[String],
        existing_milestones: &[String],
        count: Option<u8>,
    ) -> Result<Vec<GeneratedTask>, AppError> {
        ensure_text("plan title", plan_title)?;
        let count = count.unwrap_or(DEFAULT_TASK_COUNT).clamp(1, 20);
        let raw = self
            .run(prompts::generate_tasks(
                plan_title,
                goal,
                existing_tasks,
                existing_milestones,
                count,
            ))
            .await?;
        Ok(response::parse_json(&raw)?)
    }

    async fn ready_key(&self) -> Result<String, AppError> {
        if let Some(key) = self.session.lock().await.clone() {
            return Ok(key);
        }
        self.initialize(None).await?;
        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(|| AiError::MissingKey.into())
    }

    async fn run(&self, prompt: Prompt) -> Result<String, AppError> {
        let key = self.ready_key().await?;
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(prompt.system), ChatMessage::user(prompt.user)],
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
        };
        match self.backend.complete(&key, &request).await {
            Ok(text) => Ok(text),
            Err(err) => {
                if err.kind() == ErrorKind::Configuration {
                    *self.session.lock().await = None;
                }
                Err(err.into())
            }
        }
    }
}

fn ensure_text(label: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{label} cannot be empty")));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;

    pub(crate) const PODCAST_PLAN: &str = r#"```json
{
  "title": "Launch a Weekly Podcast",
  "description": "Plan, record and publish a podcast.",
  "milestones": [
    {"title": "Concept", "description": "Pick the format", "order": 1, "estimatedDuration": "2 weeks"},
    {"title": "Production", "description": "Record episodes", "order": 2, "estimatedDuration": "1 month"}
  ],
  "tasks": [
    {"title": "Choose a niche", "description": "Research topics", "priority": "HIGH", "estimatedHours": 4, "milestoneIndex": 0, "order": 1},
    {"title": "Record pilot", "description": "First episode", "priority": "MEDIUM", "estimatedHours": 6, "milestoneIndex": 1, "order": 2, "prerequisites": ["Choose a niche"]}
  ],
  "estimatedTimeframe": "3 months",
  "tips": ["Publish on a fixed day"]
}
```"#;

    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub reply: String,
        pub reject_keys: bool,
        pub complete_error: StdMutex<Option<AiError>>,
        pub probes: AtomicUsize,
        pub completions: AtomicUsize,
        pub last_key: StdMutex<Option<String>>,
        pub last_request: StdMutex<Option<ChatRequest>>,
    }

    impl FakeBackend {
        pub(crate) fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.probes.load(Ordering::SeqCst) + self.completions.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for FakeBackend {
        async fn list_models(&self, api_key: &str) -> Result<Vec<String>, AiError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            *self.last_key.lock().unwrap() = Some(api_key.to_string());
            if self.reject_keys {
                return Err(AiError::InvalidKey);
            }
            Ok(vec!["gpt-4".to_string()])
        }

        async fn complete(&self, api_key: &str, request: &ChatRequest) -> Result<String, AiError> {
            self.completions.fetch_add(1, Ordering::SeqCst);
            *self.last_key.lock().unwrap() = Some(api_key.to_string());
            *self.last_request.lock().unwrap() = Some(request.clone());
            if let Some(err) = self.complete_error.lock().unwrap().take() {
                return Err(err);
            }
            Ok(self.reply.clone())
        }
    }

    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub value: StdMutex<Option<String>>,
        pub broken: bool,
    }

    impl MemoryStore {
        pub(crate) fn holding(key: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                value: StdMutex::new(key.map(str::to_string)),
                broken: false,
            })
        }

        pub(crate) fn broken() -> Arc<Self> {
            Arc::new(Self {
                value: StdMutex::new(Some("sk-unreachable".to_string())),
                broken: true,
            })
        }
    }

    impl SecretStore for MemoryStore {
        fn get(&self) -> Result<Option<String>, AppError> {
            if self.broken {
                return Err(AppError::SecretStore("locked".to_string()));
            }
            Ok(self.value.lock().unwrap().clone())
        }

        fn set(&self, secret: &str) -> Result<(), AppError> {
            if self.broken {
                return Err(AppError::SecretStore("locked".to_string()));
            }
            *self.value.lock().unwrap() = Some(secret.to_string());
            Ok(())
        }

        fn delete(&self) -> Result<(), AppError> {
            if self.broken {
                return Err(AppError::SecretStore("locked".to_string()));
            }
            *self.value.lock().unwrap() = None;
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct MemoryFallback {
        pub value: StdMutex<Option<String>>,
        pub broken: bool,
    }

    #[async_trait]
    impl KeyFallback for MemoryFallback {
        async fn load_key(&self) -> Result<Option<String>, AppError> {
            if self.broken {
                return Err(AppError::InvalidInput("settings unavailable".to_string()));
            }
            Ok(self.value.lock().unwrap().clone())
        }

        async fn store_key(&self, key: Option<&str>) -> Result<(), AppError> {
            if self.broken {
                return Err(AppError::InvalidInput("settings unavailable".to_string()));
            }
            *self.value.lock().unwrap() = key.map(str::to_string);
            Ok(())
        }
    }

    fn fallback_holding(key: Option<&str>) -> Arc<MemoryFallback> {
        Arc::new(MemoryFallback {
            value: StdMutex::new(key.map(str::to_string)),
            broken: false,
        })
    }

    fn service(
        backend: Arc<FakeBackend>,
        secrets: Arc<MemoryStore>,
        fallback: Arc<MemoryFallback>,
    ) -> AiService {
        let fallback: Arc<dyn KeyFallback> = fallback;
        AiService::new(backend, secrets, Some(fallback), "gpt-4")
    }

    #[tokio::test]
    async fn missing_key_fails_without_network_calls() {
        let backend = FakeBackend::replying(PODCAST_PLAN);
        let ai = service(
            backend.clone(),
            MemoryStore::holding(None),
            fallback_holding(None),
        );

        assert_eq!(ai.get_api_key().await, None);
        let err = ai.generate_plan("Launch a podcast", None).await.unwrap_err();
        assert!(matches!(err, AppError::Ai(AiError::MissingKey)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn settings_key_is_used_when_credential_store_is_empty() {
        let backend = FakeBackend::replying(PODCAST_PLAN);
        let ai = service(
            backend.clone(),
            MemoryStore::holding(None),
            fallback_holding(Some("sk-from-settings")),
        );

        assert_eq!(ai.get_api_key().await.as_deref(), Some("sk-from-settings"));
        ai.generate_plan("Launch a podcast", None).await.expect("plan");
        assert_eq!(
            backend.last_key.lock().unwrap().as_deref(),
            Some("sk-from-settings")
        );
    }

    #[tokio::test]
    async fn credential_store_wins_and_failures_fall_through() {
        let ai = service(
            FakeBackend::replying("[]"),
            MemoryStore::holding(Some("sk-keyring")),
            fallback_holding(Some("sk-settings")),
        );
        assert_eq!(ai.get_api_key().await.as_deref(), Some("sk-keyring"));

        let ai = service(
            FakeBackend::replying("[]"),
            MemoryStore::broken(),
            fallback_holding(Some("sk-settings")),
        );
        assert_eq!(ai.get_api_key().await.as_deref(), Some("sk-settings"));
    }

    #[tokio::test]
    async fn malformed_key_is_rejected_before_the_probe() {
        let backend = FakeBackend::replying(PODCAST_PLAN);
        let ai = service(
            backend.clone(),
            MemoryStore::holding(None),
            fallback_holding(None),
        );
        let err = ai.initialize(Some("not-a-key")).await.unwrap_err();
        assert!(matches!(err, AppError::Ai(AiError::MalformedKey)));
        assert_eq!(backend.calls(), 0);
        assert!(!ai.is_initialized().await);
    }

    #[tokio::test]
    async fn rejected_key_leaves_service_uninitialized() {
        let backend = Arc::new(FakeBackend {
            reject_keys: true,
            ..Default::default()
        });
        let ai = service(
            backend.clone(),
            MemoryStore::holding(None),
            fallback_holding(None),
        );
        let err = ai.initialize(Some("sk-revoked")).await.unwrap_err();
        assert!(matches!(err, AppError::Ai(AiError::InvalidKey)));
        assert!(!ai.is_initialized().await);
    }

    #[tokio::test]
    async fn validated_session_is_reused() {
        let backend = FakeBackend::replying(r#"["Record a trailer", "Book a guest"]"#);
        let ai = service(
            backend.clone(),
            MemoryStore::holding(Some("sk-live")),
            fallback_holding(None),
        );
        let first = ai
            .suggest_next_steps("Podcast", &["Pick a name".to_string()], &[])
            .await
            .expect("first");
        ai.suggest_next_steps("Podcast", &[], &[]).await.expect("second");

        assert_eq!(first.len(), 2);
        assert_eq!(backend.probes.load(Ordering::SeqCst), 1);
        assert_eq!(backend.completions.load(Ordering::SeqCst), 2);
        assert!(ai.is_initialized().await);
    }

    #[tokio::test]
    async fn podcast_plan_has_the_required_shape() {
        let backend = FakeBackend::replying(PODCAST_PLAN);
        let ai = service(
            backend.clone(),
            MemoryStore::holding(Some("sk-live")),
            fallback_holding(None),
        );
        let plan = ai
            .generate_plan("Launch a podcast", Some("3 months"))
            .await
            .expect("plan");
        assert!(!plan.title.trim().is_empty());
        assert!(!plan.milestones.is_empty());
        assert!(!plan.tasks.is_empty());
        assert_eq!(plan.estimated_timeframe, "3 months");
        assert_eq!(plan.tasks[1].prerequisites, vec!["Choose a niche"]);

        let request = backend.last_request.lock().unwrap().clone().expect("request");
        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.max_tokens, 3000);
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[1].content.contains("Launch a podcast"));
    }

    #[tokio::test]
    async fn invalid_json_is_a_parse_error() {
        let ai = service(
            FakeBackend::replying("I could not build a plan, sorry."),
            MemoryStore::holding(Some("sk-live")),
            fallback_holding(None),
        );
        let err = ai.generate_plan("Launch a podcast", None).await.unwrap_err();
        assert!(matches!(err, AppError::Ai(AiError::Parse)));
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[tokio::test]
    async fn enhance_and_generate_tasks_parse_their_shapes() {
        let ai = service(
            FakeBackend::replying(
                r#"{"description":"Write it up","estimatedHours":3,"tips":["Start early"]}"#,
            ),
            MemoryStore::holding(Some("sk-live")),
            fallback_holding(None),
        );
        let enhancement = ai.enhance_task("Draft outline", "Podcast").await.expect("enhance");
        assert_eq!(enhancement.estimated_hours, Some(3.0));
        assert_eq!(enhancement.tips.len(), 1);

        let ai = service(
            FakeBackend::replying(concat!(
                r#"[{"title":"Edit audio","description":"Clean up","#,
                r#""priority":"LOW","milestoneName":"Production"}]"#,
            )),
            MemoryStore::holding(Some("sk-live")),
            fallback_holding(None),
        );
        let tasks = ai
            .generate_tasks("Podcast", "Launch", &[], &["Production".to_string()], None)
            .await
            .expect("tasks");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].milestone_name.as_deref(), Some("Production"));
    }

    #[tokio::test]
    async fn set_key_writes_both_tiers_and_survives_one_failure() {
        let secrets = MemoryStore::holding(None);
        let fallback = fallback_holding(None);
        let ai = service(FakeBackend::replying("[]"), secrets.clone(), fallback.clone());
        ai.set_api_key(" sk-new ").await.expect("set");
        assert_eq!(secrets.value.lock().unwrap().as_deref(), Some("sk-new"));
        assert_eq!(fallback.value.lock().unwrap().as_deref(), Some("sk-new"));

        let fallback = fallback_holding(None);
        let ai = service(FakeBackend::replying("[]"), MemoryStore::broken(), fallback.clone());
        ai.set_api_key("sk-db-only").await.expect("set with broken store");
        assert_eq!(fallback.value.lock().unwrap().as_deref(), Some("sk-db-only"));

        let broken_fallback = Arc::new(MemoryFallback {
            broken: true,
            ..Default::default()
        });
        let ai = service(FakeBackend::replying("[]"), MemoryStore::broken(), broken_fallback);
        assert!(ai.set_api_key("sk-nowhere").await.is_err());
    }

    #[tokio::test]
    async fn delete_key_clears_both_tiers_and_the_session() {
        let secrets = MemoryStore::holding(Some("sk-live"));
        let fallback = fallback_holding(Some("sk-live"));
        let ai = service(FakeBackend::replying("[]"), secrets.clone(), fallback.clone());
        ai.initialize(None).await.expect("init");
        assert!(ai.is_initialized().await);

        ai.delete_api_key().await.expect("delete");
        assert!(!ai.is_initialized().await);
        assert_eq!(*secrets.value.lock().unwrap(), None);
        assert_eq!(*fallback.value.lock().unwrap(), None);
        assert_eq!(ai.get_api_key().await, None);
    }

    #[tokio::test]
    async fn key_rejected_mid_session_forces_a_new_probe() {
        let backend = Arc::new(FakeBackend {
            reply: PODCAST_PLAN.to_string(),
            complete_error: StdMutex::new(Some(AiError::InvalidKey)),
            ..Default::default()
        });
        let ai = service(
            backend.clone(),
            MemoryStore::holding(Some("sk-revoked-later")),
            fallback_holding(None),
        );

        let err = ai.generate_plan("Launch a podcast", None).await.unwrap_err();
        assert!(matches!(err, AppError::Ai(AiError::InvalidKey)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!ai.is_initialized().await);
        assert_eq!(backend.probes.load(Ordering::SeqCst), 1);

        ai.generate_plan("Launch a podcast", None).await.expect("plan");
        assert_eq!(backend.probes.load(Ordering::SeqCst), 2);
        assert!(ai.is_initialized().await);
    }

    #[tokio::test]
    async fn concurrent_calls_before_initialization_both_succeed() {
        let backend = FakeBackend::replying(PODCAST_PLAN);
        let ai = service(
            backend.clone(),
            MemoryStore::holding(Some("sk-shared-key")),
            fallback_holding(None),
        );

        let (first, second) = tokio::join!(
            ai.generate_plan("Launch a podcast", None),
            ai.generate_plan("Learn the cello", Some("1 year")),
        );
        first.expect("first plan");
        second.expect("second plan");

        // No de-duplication: each call may run its own probe.
        let probes = backend.probes.load(Ordering::SeqCst);
        assert!((1..=2).contains(&probes), "probes: {probes}");
        assert_eq!(backend.completions.load(Ordering::SeqCst), 2);
        assert!(ai.is_initialized().await);
        assert_eq!(backend.last_key.lock().unwrap().as_deref(), Some("sk-shared-key"));
    }
}
