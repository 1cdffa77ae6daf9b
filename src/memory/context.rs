//! Context replay
//!
//! The backend sees the whole log, oldest first, with nothing summarized.
//! The cycle ceiling keeps it short.

use crate::models::{ReasoningStep, StepRole};

/// Result payloads longer than this are cut in the replay only.
const MAX_RESULT_CHARS: usize = 1500;

pub fn render_replay(steps: &[ReasoningStep]) -> String {
    if steps.is_empty() {
        return "## Reasoning Log\n\n(empty)\n".to_string();
    }

    let mut out = String::from("## Reasoning Log\n\n");

    for step in steps {
        let label = match step.role {
            StepRole::Reasoning => "**Reasoning**",
            StepRole::Action => "**Action**",
            StepRole::Observation => "**Observation**",
        };

        out.push_str(&format!("{}. {}", step.index, label));
        if let Some(tool) = &step.tool {
            out.push_str(&format!(" [{}]", tool));
        }
        out.push_str(&format!(": {}\n", step.content));

        if let Some(arguments) = step.arguments.as_ref().filter(|a| !is_empty_value(a)) {
            out.push_str(&format!("   arguments: {}\n", arguments));
        }
        if let Some(result) = &step.result {
            let rendered = result.to_string();
            if rendered.chars().count() > MAX_RESULT_CHARS {
                let cut: String = rendered.chars().take(MAX_RESULT_CHARS).collect();
                out.push_str(&format!("   result: {}...\n", cut));
            } else {
                out.push_str(&format!("   result: {}\n", rendered));
            }
        }
    }

    out
}

fn is_empty_value(value: &serde_json::Value) -> bool {
    value.is_null() || value.as_object().is_some_and(|o| o.is_empty())
}
