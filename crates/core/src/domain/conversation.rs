use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { tool_call_id: tool_call_id.into(), content: content.into(), is_error: false }
    }

    pub fn failure(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { tool_call_id: tool_call_id.into(), content: content.into(), is_error: true }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_call_id: None, tool_calls }
    }

    pub fn tool(result: &ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.content.clone(),
            tool_call_id: Some(result.tool_call_id.clone()),
            tool_calls: Vec::new(),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), tool_call_id: None, tool_calls: Vec::new() }
    }
}

/// Message history owned by a single reasoning run.
///
/// The system message is always first and unique. Messages can only be
/// appended; nothing already recorded is ever rewritten.
#[derive(Clone, Debug, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Builds `[system, ...prior, user(question)]`. System entries in `prior`
    /// are dropped so the first-and-only invariant holds.
    pub fn new(
        system_prompt: impl Into<String>,
        prior: impl IntoIterator<Item = Message>,
        question: impl Into<String>,
    ) -> Self {
        let mut messages = vec![Message::system(system_prompt)];
        messages.extend(prior.into_iter().filter(|message| message.role != Role::System));
        messages.push(Message::user(question));
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Records one round-trip: the assistant's tool-call message followed by
    /// each result, in call order.
    pub fn record_round(
        &mut self,
        assistant_text: impl Into<String>,
        calls: Vec<ToolCall>,
        results: &[ToolResult],
    ) {
        self.messages.push(Message::assistant_tool_calls(assistant_text, calls));
        self.messages.extend(results.iter().map(Message::tool));
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// One LLM call producing a single SQL statement.
    SqlChain,
    #[default]
    ToolLoop,
}

impl AgentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SqlChain => "sql_chain",
            Self::ToolLoop => "tool_loop",
        }
    }
}

impl std::str::FromStr for AgentMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sql_chain" | "chain" | "sql" => Ok(Self::SqlChain),
            "tool_loop" | "agent" | "tools" => Ok(Self::ToolLoop),
            other => Err(format!("unsupported mode `{other}` (expected sql_chain|tool_loop)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AgentMode, Conversation, Message, Role, ToolCall, ToolResult};

    #[test]
    fn conversation_starts_with_single_system_message() {
        let prior = vec![
            Message::system("stale system prompt"),
            Message::user("What was revenue in March?"),
            Message::assistant("Revenue in March was 12,000.00."),
        ];

        let conversation = Conversation::new("You are a data analyst.", prior, "And April?");
        let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();

        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(conversation.messages()[0].content, "You are a data analyst.");
        assert_eq!(conversation.messages()[3].content, "And April?");
    }

    #[test]
    fn record_round_keeps_results_after_their_call() {
        let mut conversation = Conversation::new("system", Vec::new(), "question");
        let calls = vec![
            ToolCall { id: "call_1".into(), name: "GetSchema".into(), arguments: json!({}) },
            ToolCall {
                id: "call_2".into(),
                name: "Calculate".into(),
                arguments: json!({"expression": "1+1"}),
            },
        ];
        let results =
            vec![ToolResult::success("call_1", "schema"), ToolResult::failure("call_2", "boom")];

        conversation.record_round("", calls, &results);

        let messages = conversation.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].tool_calls.len(), 2);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[4].tool_call_id.as_deref(), Some("call_2"));
        assert_eq!(messages[4].content, "boom");
    }

    #[test]
    fn mode_parses_aliases() {
        assert_eq!("sql_chain".parse::<AgentMode>(), Ok(AgentMode::SqlChain));
        assert_eq!("Agent".parse::<AgentMode>(), Ok(AgentMode::ToolLoop));
        assert!("stream".parse::<AgentMode>().is_err());
        assert_eq!(AgentMode::default(), AgentMode::ToolLoop);
    }
}
