//! Prompt composition for presented steps.

use stepwise_types::PlainStep;

use crate::workflow::resolver::LoopFrame;

/// Guidance text returned once every step is satisfied.
pub const COMPLETE_PROMPT: &str = "Workflow complete.";

/// Composes the caller-facing prompt: role, guidance bullets, the step prompt,
/// and a loop context section for the innermost active loop.
pub fn compose_step_prompt(step: &PlainStep, innermost_loop: Option<&LoopFrame>) -> String {
    let mut prompt = String::new();

    if let Some(role) = step.agent_role.as_deref().filter(|role| !role.trim().is_empty()) {
        prompt.push_str("## Agent Role Instructions\n");
        prompt.push_str(role);
        prompt.push_str("\n\n");
    }

    if !step.guidance.is_empty() {
        prompt.push_str("## Step Guidance\n");
        let bullets: Vec<String> = step.guidance.iter().map(|line| format!("- {line}")).collect();
        prompt.push_str(&bullets.join("\n"));
        prompt.push_str("\n\n");
    }

    prompt.push_str(&step.prompt);

    if let Some(frame) = innermost_loop {
        prompt.push_str(&format!("\n\n## Loop Context\n- Iteration: {}", frame.iteration + 1));
        if let (Some(total_items), Some(index)) = (frame.total_items, frame.index) {
            prompt.push_str(&format!("\n- Total Items: {total_items}\n- Current Index: {index}"));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn frame(index: Option<u32>, total_items: Option<usize>) -> LoopFrame {
        LoopFrame {
            loop_id: "files".into(),
            depth: 0,
            iteration: 1,
            index,
            total_items,
            step_index: 0,
            current_step: "inspect".into(),
            variables: Map::new(),
        }
    }

    #[test]
    fn plain_prompt_is_returned_verbatim() {
        let step = PlainStep {
            id: "plan".into(),
            prompt: "Write the plan.".into(),
            ..Default::default()
        };
        assert_eq!(compose_step_prompt(&step, None), "Write the plan.");
    }

    #[test]
    fn role_and_guidance_precede_prompt() {
        let step = PlainStep {
            id: "plan".into(),
            prompt: "Write the plan.".into(),
            agent_role: Some("You are a planner.".into()),
            guidance: vec!["Be brief".into(), "List risks".into()],
            ..Default::default()
        };

        assert_eq!(
            compose_step_prompt(&step, None),
            "## Agent Role Instructions\nYou are a planner.\n\n## Step Guidance\n- Be brief\n- List risks\n\nWrite the plan."
        );
    }

    #[test]
    fn loop_context_includes_collection_position() {
        let step = PlainStep {
            id: "inspect".into(),
            prompt: "Inspect the file.".into(),
            ..Default::default()
        };

        assert_eq!(
            compose_step_prompt(&step, Some(&frame(None, None))),
            "Inspect the file.\n\n## Loop Context\n- Iteration: 2"
        );
        assert_eq!(
            compose_step_prompt(&step, Some(&frame(Some(1), Some(3)))),
            "Inspect the file.\n\n## Loop Context\n- Iteration: 2\n- Total Items: 3\n- Current Index: 1"
        );
    }
}
