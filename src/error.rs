use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{}", labelled("Not found", .0))]
    NotFound(String),
    #[error("{}", labelled("Invalid input", .0))]
    InvalidInput(String),
    #[error("credential store error: {0}")]
    SecretStore(String),
    #[error(transparent)]
    Ai(#[from] AiError),
}

/// Failures of the AI orchestration, keyed by what went wrong rather than
/// by the text the remote API happened to return.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI features require an OpenAI API key. Please configure it in Settings.")]
    MissingKey,
    #[error("Invalid API key format. OpenAI API keys should start with 'sk-'")]
    MalformedKey,
    #[error("Invalid API key. Please check your OpenAI API key and try again.")]
    InvalidKey,
    #[error("API rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("Insufficient quota. Please check your OpenAI account billing.")]
    QuotaExhausted,
    #[error("OpenAI API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("OpenAI request failed: {0}")]
    Network(String),
    #[error("No response from OpenAI")]
    EmptyResponse,
    #[error("Failed to parse AI response as JSON")]
    Parse,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Transient,
    Data,
    NotFound,
    InvalidInput,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Io(_) | AppError::Db(_) | AppError::SecretStore(_) => ErrorKind::Transient,
            AppError::Json(_) => ErrorKind::Data,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::InvalidInput(_) => ErrorKind::InvalidInput,
            AppError::Ai(err) => err.kind(),
        }
    }
}

impl AiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AiError::MissingKey
            | AiError::MalformedKey
            | AiError::InvalidKey
            | AiError::QuotaExhausted => ErrorKind::Configuration,
            AiError::RateLimited | AiError::Api { .. } | AiError::Network(_) => {
                ErrorKind::Transient
            }
            AiError::EmptyResponse | AiError::Parse => ErrorKind::Data,
        }
    }
}

fn labelled(label: &str, message: &str) -> String {
    if message.contains('\n') {
        format!("{label}:\n{message}")
    } else {
        format!("{label}: {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_a_configuration_error() {
        let err = AppError::from(AiError::MissingKey);
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn multiline_messages_break_after_label() {
        let err = AppError::InvalidInput("first\nsecond".to_string());
        assert_eq!(err.to_string(), "Invalid input:\nfirst\nsecond");
        let err = AppError::NotFound("plan id 4".to_string());
        assert_eq!(err.to_string(), "Not found: plan id 4");
    }

    #[test]
    fn rate_limit_is_transient_and_parse_is_data() {
        assert_eq!(AiError::RateLimited.kind(), ErrorKind::Transient);
        assert_eq!(AiError::Parse.kind(), ErrorKind::Data);
        assert_eq!(AiError::QuotaExhausted.kind(), ErrorKind::Configuration);
    }
}
