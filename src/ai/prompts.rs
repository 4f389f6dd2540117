/// One chat completion worth of instructions.
#[derive(Clone, Debug)]
pub struct Prompt {
    pub system: &'static str,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

const PLANNER_SYSTEM: &str = "You are an experienced project manager and goal coach. \
Reply with valid JSON only and no surrounding text.";
const ASSISTANT_SYSTEM: &str = "You are a helpful assistant. Reply with valid JSON only.";
const ADVISOR_SYSTEM: &str = "You are a practical project advisor. Reply with a JSON array only.";
const TASK_SYSTEM: &str = "You are an experienced project manager. Reply with valid JSON only.";

pub fn plan(goal: &str, timeframe: Option<&str>) -> Prompt {
    let window = match timeframe.map(str::trim).filter(|value| !value.is_empty()) {
        Some(timeframe) => format!("within {timeframe}"),
        None => "with no fixed timeframe".to_string(),
    };
    let user = format!(
        r#"Build a detailed, actionable plan for the goal "{goal}" {window}.

Answer with JSON in exactly this shape:
{{
  "title": "short actionable plan title, at most 60 characters",
  "description": "two or three sentences on what the plan achieves",
  "milestones": [
    {{"title": "milestone title", "description": "what it achieves", "order": 1, "estimatedDuration": "e.g. 2 weeks"}}
  ],
  "tasks": [
    {{
      "title": "concrete task",
      "description": "what has to be done",
      "priority": "HIGH|MEDIUM|LOW",
      "estimatedHours": 8,
      "milestoneIndex": 0,
      "order": 1,
      "prerequisites": ["titles of tasks that must finish first"]
    }}
  ],
  "estimatedTimeframe": "overall duration",
  "tips": ["practical advice"]
}}

Rules:
- 3 to 5 milestones that build on each other
- 8 to 15 specific tasks spread across the milestones
- milestoneIndex is the zero-based position in the milestones array
- realistic hour estimates
- keep the plan specific, measurable and achievable"#
    );
    Prompt {
        system: PLANNER_SYSTEM,
        user,
        temperature: 0.7,
        max_tokens: 3000,
    }
}

pub fn enhance_task(title: &str, context: &str) -> Prompt {
    let user = format!(
        r#"Add detail to this task.

Task: "{title}"
Context: "{context}"

Answer with JSON:
{{
  "description": "two or three sentences on what needs to be done",
  "estimatedHours": 8,
  "tips": ["practical tips for finishing the task"]
}}"#
    );
    Prompt {
        system: ASSISTANT_SYSTEM,
        user,
        temperature: 0.5,
        max_tokens: 500,
    }
}

pub fn suggest_next_steps(plan_title: &str, completed: &[String], remaining: &[String]) -> Prompt {
    let user = format!(
        r#"Suggest 3 to 5 next steps for this plan.

Plan: "{plan_title}"
Completed tasks: {}
Remaining tasks: {}

Answer with a JSON array of strings:
["first suggestion", "second suggestion"]"#,
        join_or_none(completed),
        join_or_none(remaining),
    );
    Prompt {
        system: ADVISOR_SYSTEM,
        user,
        temperature: 0.7,
        max_tokens: 300,
    }
}

pub fn generate_tasks(
    plan_title: &str,
    goal: &str,
    existing_tasks: &[String],
    existing_milestones: &[String],
    count: u8,
) -> Prompt {
    let user = format!(
        r#"Propose {count} specific, actionable tasks for this plan.

Plan title: "{plan_title}"
Plan goal: "{goal}"
Existing tasks: {}
Existing milestones: {}

Answer with a JSON array:
[
  {{
    "title": "task title",
    "description": "task description",
    "priority": "HIGH|MEDIUM|LOW",
    "estimatedHours": 2,
    "order": 1,
    "milestoneName": "an existing milestone title, or a new one"
  }}
]
Prefer tasks that are missing or are the logical next steps."#,
        join_or_none(existing_tasks),
        join_or_none(existing_milestones),
    );
    Prompt {
        system: TASK_SYSTEM,
        user,
        temperature: 0.7,
        max_tokens: 1000,
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_prompt_embeds_goal_and_timeframe() {
        let prompt = plan("Launch a podcast", Some("3 months"));
        assert!(prompt.user.contains("\"Launch a podcast\" within 3 months"));
        assert_eq!(prompt.max_tokens, 3000);

        let open = plan("Learn Rust", Some("  "));
        assert!(open.user.contains("with no fixed timeframe"));
    }

    #[test]
    fn task_prompt_lists_existing_milestones() {
        let prompt = generate_tasks(
            "Plan",
            "Goal",
            &[],
            &["Research".to_string(), "Build".to_string()],
            4,
        );
        assert!(prompt.user.contains("Existing milestones: Research, Build"));
        assert!(prompt.user.contains("Existing tasks: none"));
        assert!(prompt.user.contains("Propose 4 specific"));
    }
}
