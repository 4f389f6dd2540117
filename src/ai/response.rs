use serde::de::DeserializeOwned;

use crate::ai::types::GeneratedPlan;
use crate::error::AiError;

/// Removes a surrounding Markdown fence (```` ```json ```` or bare ```` ``` ````).
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body
        .strip_prefix("json")
        .or_else(|| body.strip_prefix("JSON"))
        .unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, AiError> {
    serde_json::from_str(strip_code_fence(raw)).map_err(|err| {
        tracing::warn!(
            error = %err,
            bytes = raw.len(),
            "AI response did not match the expected JSON"
        );
        AiError::Parse
    })
}

pub fn parse_plan(raw: &str) -> Result<GeneratedPlan, AiError> {
    let plan: GeneratedPlan = parse_json(raw)?;
    if plan.title.trim().is_empty() {
        tracing::warn!("AI plan has no title");
        return Err(AiError::Parse);
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"{
        "title": "Ship it",
        "description": "d",
        "milestones": [{"title": "m", "description": "md", "order": 1}],
        "tasks": [{"title": "t", "description": "td", "milestoneIndex": 0}],
        "estimatedTimeframe": "1 month"
    }"#;

    #[test]
    fn fenced_and_bare_responses_parse_the_same() {
        let bare = parse_plan(PLAN).expect("bare");
        let fenced = parse_plan(&format!("```json\n{PLAN}\n```")).expect("fenced");
        let plain_fence = parse_plan(&format!("```\n{PLAN}\n```")).expect("plain fence");
        for plan in [&fenced, &plain_fence] {
            assert_eq!(plan.title, bare.title);
            assert_eq!(plan.milestones.len(), bare.milestones.len());
            assert_eq!(plan.tasks.len(), bare.tasks.len());
            assert_eq!(plan.estimated_timeframe, bare.estimated_timeframe);
        }
    }

    #[test]
    fn prose_is_a_parse_error() {
        assert!(matches!(
            parse_plan("Sure! Here is your plan."),
            Err(AiError::Parse)
        ));
    }

    #[test]
    fn blank_title_is_a_parse_error() {
        let raw = PLAN.replace("Ship it", "  ");
        assert!(matches!(parse_plan(&raw), Err(AiError::Parse)));
    }

    #[test]
    fn arrays_parse_through_the_generic_helper() {
        let steps: Vec<String> = parse_json("```json\n[\"a\", \"b\"]\n```").expect("steps");
        assert_eq!(steps, vec!["a", "b"]);
    }
}
