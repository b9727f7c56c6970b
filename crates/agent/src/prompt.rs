use omniagent_core::Message;
use omniagent_tools::ToolDescriptor;

/// Everything the decision step sees for one iteration.
pub struct PromptInputs<'a> {
    pub instruction: &'a str,
    pub history: &'a [Message],
    /// Serialized memory snapshot.
    pub memory: &'a str,
    pub tools: &'a [ToolDescriptor],
    /// Visual grounding: the scanner's numbered element description.
    pub context: &'a str,
}

/// Assemble the decision prompt: conversation history, agent memory, the
/// external tool catalog and the current page context, followed by the
/// guidelines and the strict response schema.
pub fn build_prompt(inputs: &PromptInputs) -> String {
    let history = inputs
        .history
        .iter()
        .map(|m| format!("{}: {}", role_tag(m), m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let tools = if inputs.tools.is_empty() {
        "(no tool servers connected)".to_string()
    } else {
        inputs
            .tools
            .iter()
            .map(|t| {
                format!(
                    "- [{}] {}: {}",
                    t.server,
                    t.name,
                    t.description.as_deref().unwrap_or("(no description)")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are OmniAgent, a browser automation assistant.
You will receive a list of interactive elements visible on the screen, each with a numeric ID (e.g., [42]).
Your goal is to interpret the user's natural language command and decide the next action.

CONVERSATION HISTORY:
{history}

AGENT MEMORY (What you have saved so far):
{memory}

EXTERNAL TOOLS (invoke with the TOOL_CALL action):
{tools}

CURRENT COMMAND: "{instruction}"

VISIBLE ELEMENTS (Visual Grounding):
{context}

GUIDELINES:
1. **Goal Achievement**: Break down the user's goal into logical steps (Research, Action, Verification).
2. **Efficiency**: Before clicking into details, check if the necessary information is visible on the current page (e.g., list views). If so, use "SAVE_MEMORY".
3. **Batch Saving**: If multiple relevant items are visible (e.g. in a search list), save them ALL in ONE single "SAVE_MEMORY" action as an array. Do NOT loop one by one.
4. **Internal Memory**: usage of "SAVE_MEMORY" is automatic and internal. Do NOT announce it as a step to the user, just do it.
5. **Planning**: For multi-step goals, you may record a plan once with "CREATE_PLAN" and follow it.
6. **External Tools**: Use "TOOL_CALL" only for tools listed above; value must be a JSON string {{"tool": ..., "source": ..., "args": {{...}}}}.
7. **Workflow**: Scan/Research -> Save Relevant Data -> Analyze/Decide -> Execute Action.
8. **Risk Assessment**:
   - **HIGH**: Buying (Checkout), Deleting data, Posting content, Auth/Login, Configuring Settings.
   - **MEDIUM**: Navigating to new domains, Clicking ads/unknown links.
   - **LOW**: Searching, Scrolling, Reading, Extracting, Tab Management.
9. **Chat Titles**: If this is the START of a conversation, generate a short `new_title` (3-5 words) summarizing the goal.

RESPONSE FORMAT:
Strictly output a JSON object with this schema (no markdown, no code blocks):
{{
  "thought": "Internal reasoning (e.g. 'I see 5 prices in the list, will save them all in one go')",
  "message": "Public message to user (e.g. 'Searching for...', or null)",
  "action": "CLICK" | "TYPE" | "SCROLL" | "NAVIGATE" | "OPEN_TAB" | "EXTRACT" | "DONE" | "SAVE_MEMORY" | "WAIT" | "CREATE_PLAN" | "TOOL_CALL",
  "target_id": 12, // (integer) or null
  "value": "For SAVE_MEMORY: '{{\"key\":\"variable_name\", \"value\": [item1, item2, ...]}}'. For TOOL_CALL: '{{\"tool\":...,\"source\":...,\"args\":...}}'. For others: text/url",
  "risk_score": "LOW" | "MEDIUM" | "HIGH",
  "new_title": "Conversation Title (or null if not new)"
}}
"#,
        history = history,
        memory = inputs.memory,
        tools = tools,
        instruction = inputs.instruction,
        context = inputs.context,
    )
}

fn role_tag(message: &Message) -> &'static str {
    match message.role {
        omniagent_core::Role::User => "USER",
        omniagent_core::Role::Agent => "AGENT",
        omniagent_core::Role::System => "SYSTEM",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_carries_all_sections() {
        let history = vec![
            Message::user("find laptops"),
            Message::agent("Scanning page..."),
        ];
        let tools = vec![ToolDescriptor {
            name: "search".to_string(),
            description: Some("Full-text search".to_string()),
            input_schema: json!({}),
            server: "docs".to_string(),
        }];
        let prompt = build_prompt(&PromptInputs {
            instruction: "Continue achieving the goal.",
            history: &history,
            memory: "{\"prices\": [\"$10\"]}",
            tools: &tools,
            context: "[ID: 1] <button> \"Search\"",
        });

        assert!(prompt.contains("USER: find laptops"));
        assert!(prompt.contains("AGENT: Scanning page..."));
        assert!(prompt.contains("\"$10\""));
        assert!(prompt.contains("- [docs] search: Full-text search"));
        assert!(prompt.contains("[ID: 1] <button> \"Search\""));
        assert!(prompt.contains("CURRENT COMMAND: \"Continue achieving the goal.\""));
    }

    #[test]
    fn empty_catalog_is_stated() {
        let prompt = build_prompt(&PromptInputs {
            instruction: "go",
            history: &[],
            memory: "{}",
            tools: &[],
            context: "",
        });
        assert!(prompt.contains("(no tool servers connected)"));
    }
}
