//! Model conversation for a run: initial prompt and post-suspension résumé.

use crate::config::AgentDefinition;
use crate::types::{ContentPart, ModelMessage, Role, Run, TriggerContext};

/// System prompt from the agent's profile.
pub fn system_prompt(agent: &AgentDefinition) -> String {
    let mut prompt = format!("You are {}.", agent.name);
    if !agent.instructions.trim().is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(agent.instructions.trim());
    }
    push_list(&mut prompt, "Goals", &agent.goals);
    push_list(&mut prompt, "Memories", &agent.memories);
    prompt.push_str(
        "\n\nYou communicate only through the send_message tool. \
         Text you produce outside of tool calls is not shown to anyone.",
    );
    prompt
}

fn push_list(prompt: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    prompt.push_str(&format!("\n\n{title}:"));
    for item in items {
        prompt.push_str(&format!("\n- {item}"));
    }
}

/// The user turn describing why the run exists.
pub fn trigger_message(trigger: &TriggerContext) -> ModelMessage {
    let mut text = trigger.summary();
    let recent = trigger.recent();
    if !recent.is_empty() {
        text.push_str("\n\nRecent messages:");
        for line in recent {
            text.push_str(&format!(
                "\n[{}] {} ({}): {}",
                line.seq, line.entity_id, line.role, line.content
            ));
        }
    }
    if let Some(space_id) = trigger.space_id() {
        text.push_str(&format!("\n\nActive space: {space_id}"));
    }
    ModelMessage::user(text)
}

pub fn initial_messages(agent: &AgentDefinition, trigger: &TriggerContext) -> Vec<ModelMessage> {
    vec![
        ModelMessage::system(system_prompt(agent)),
        trigger_message(trigger),
    ]
}

/// Conversation for a resumed run.
///
/// Turns before the suspending one are folded into a short résumé, each
/// excerpt capped at `excerpt_chars`. The suspending assistant turn, the
/// results it already had and the externally supplied results follow
/// verbatim.
pub fn resume_messages(agent: &AgentDefinition, run: &Run, excerpt_chars: usize) -> Vec<ModelMessage> {
    let transcript = &run.metadata.transcript;
    let mut messages = initial_messages(agent, &run.trigger);

    let split = transcript
        .iter()
        .rposition(|message| message.role == Role::Assistant)
        .unwrap_or(transcript.len());
    let (earlier, tail) = transcript.split_at(split);

    let lines: Vec<String> = earlier
        .iter()
        .filter(|message| matches!(message.role, Role::Assistant | Role::Tool))
        .flat_map(|message| resume_lines(message, excerpt_chars))
        .collect();
    if !lines.is_empty() {
        messages.push(ModelMessage::user(format!(
            "Progress before this run paused for tool results:\n{}",
            lines.join("\n")
        )));
    }

    messages.extend(tail.iter().cloned());
    for call in &run.metadata.pending_tool_calls {
        if let Some(result) = run.metadata.tool_results.get(&call.tool_call_id) {
            messages.push(ModelMessage::tool_result(
                call.tool_call_id.clone(),
                result.clone(),
                false,
            ));
        }
    }
    messages
}

fn resume_lines(message: &ModelMessage, excerpt_chars: usize) -> Vec<String> {
    message
        .content
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } if !text.trim().is_empty() => {
                Some(format!("- said: {}", excerpt(text, excerpt_chars)))
            }
            ContentPart::ToolCall(call) => Some(format!(
                "- called {} with {}",
                call.name,
                excerpt(&call.arguments.to_string(), excerpt_chars)
            )),
            ContentPart::ToolResult(result) => Some(format!(
                "- {} {}: {}",
                result.tool_call_id,
                if result.is_error { "failed" } else { "returned" },
                excerpt(&result.result.to_string(), excerpt_chars)
            )),
            _ => None,
        })
        .collect()
}

/// First `limit` characters of `text`, marked when cut.
pub fn excerpt(text: &str, limit: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PendingToolCall, ToolCall};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: serde_json::json!({"q": "x"}),
        }
    }

    #[test]
    fn excerpt_cuts_on_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé...");
        assert_eq!(excerpt("hi", 5), "hi");
    }

    #[test]
    fn system_prompt_lists_goals() {
        let mut agent = AgentDefinition::new("scout");
        agent.goals.push("keep the space tidy".into());
        let prompt = system_prompt(&agent);
        assert!(prompt.starts_with("You are scout."));
        assert!(prompt.contains("Goals:\n- keep the space tidy"));
        assert!(!prompt.contains("Memories"));
    }

    #[test]
    fn resume_keeps_suspending_turn_and_appends_results() {
        let agent = AgentDefinition::new("scout");
        let mut run = Run::queued(
            agent.entity_id,
            agent.agent_id,
            TriggerContext::Service {
                service_name: "intake".into(),
                payload: serde_json::Value::Null,
                space_id: None,
            },
        );
        let long = "a".repeat(50);
        run.metadata.transcript = vec![
            ModelMessage::system("sys"),
            ModelMessage::user("go"),
            ModelMessage::assistant_turn(long, vec![call("c0", "lookup")]),
            ModelMessage::tool_result("c0", serde_json::json!({"hits": 3}), false),
            ModelMessage::assistant_turn("", vec![call("c1", "confirm")]),
        ];
        run.metadata.pending_tool_calls.push(PendingToolCall {
            tool_call_id: "c1".into(),
            tool_name: "confirm".into(),
            arguments: serde_json::json!({}),
            display_message_id: Some(Uuid::new_v4()),
        });
        run.metadata
            .tool_results
            .insert("c1".into(), serde_json::json!({"confirmed": true}));

        let messages = resume_messages(&agent, &run, 10);
        assert_eq!(messages.len(), 5);
        let resume = messages[2].text();
        assert!(resume.contains(&format!("said: {}...", "a".repeat(10))));
        assert!(resume.contains("called lookup"));
        assert!(resume.contains("c0 returned"));
        assert_eq!(messages[3].tool_calls()[0].id, "c1");
        assert_eq!(
            messages[4].tool_results()[0].result,
            serde_json::json!({"confirmed": true})
        );
    }
}
