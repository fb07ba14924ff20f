use serde_json::Value;

use crate::models::chat::ChatMessage;
use crate::services::memory::MemorySnapshot;

const GENERAL_INSTRUCTIONS: &str = "You are a helpful AI assistant. You have access to tools that can help you answer questions and perform tasks.

Use the following guidelines:
- Always be helpful, accurate, and concise
- Use tools when appropriate to get accurate information
- If you don't know something, say so rather than making up information
- Format your responses clearly and professionally";

const RAG_INSTRUCTIONS: &str = "You are a helpful AI assistant with access to internal company documents.

Use the following guidelines:
- Always search internal documents first when answering questions
- Use the document_search tool to find relevant information
- Cite the source documents when providing answers
- If information is not found in documents, say so clearly";

const RAG_MEMORY_EXTRAS: &str = "
- Combine information from multiple documents when relevant
- Be accurate and cite sources properly";

const MEMORY_GUIDELINE: &str = "
- Remember previous conversation context when available";

/// System instructions plus the message layout handed to the model.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    instructions: &'static str,
    memory_extras: &'static str,
}

impl PromptTemplate {
    pub fn general() -> Self {
        Self {
            instructions: GENERAL_INSTRUCTIONS,
            memory_extras: "",
        }
    }

    pub fn rag() -> Self {
        Self {
            instructions: RAG_INSTRUCTIONS,
            memory_extras: RAG_MEMORY_EXTRAS,
        }
    }

    pub fn system_instructions(&self, with_memory: bool) -> String {
        if with_memory {
            format!("{}{}{}", self.instructions, self.memory_extras, MEMORY_GUIDELINE)
        } else {
            self.instructions.to_string()
        }
    }

    /// instructions → summary → recent turns → request context → user input.
    ///
    /// The scratchpad (tool calls and results) is appended by the executor.
    pub fn render(
        &self,
        memory: Option<&MemorySnapshot>,
        context: Option<&Value>,
        input: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_instructions(memory.is_some()))];

        if let Some(snapshot) = memory {
            messages.extend(snapshot.to_messages());
        }

        if let Some(note) = context.and_then(context_note) {
            messages.push(ChatMessage::system(note));
        }

        messages.push(ChatMessage::user(input));
        messages
    }
}

fn context_note(context: &Value) -> Option<String> {
    let is_empty = match context {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    };
    if is_empty {
        return None;
    }

    let rendered = serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
    Some(format!("Additional context for this request:\n{}", rendered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::MessageRole;
    use crate::services::memory::Turn;
    use serde_json::json;

    #[test]
    fn test_memory_guideline_only_with_session() {
        let template = PromptTemplate::general();
        assert!(template
            .system_instructions(true)
            .ends_with("Remember previous conversation context when available"));
        assert!(!template.system_instructions(false).contains("Remember"));
        assert!(PromptTemplate::rag()
            .system_instructions(true)
            .contains("Combine information from multiple documents"));
    }

    #[test]
    fn test_render_order() {
        let snapshot = MemorySnapshot {
            recent_messages: vec![Turn::user("hi"), Turn::assistant("hello")],
            summary: Some("User introduced themselves.".into()),
            total_messages: 2,
        };
        let context = json!({"userId": "u1"});
        let messages = PromptTemplate::general().render(Some(&snapshot), Some(&context), "next");

        let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::System,
                MessageRole::User,
            ]
        );
        assert!(messages[1].content_str().contains("User introduced themselves."));
        assert!(messages[4].content_str().contains("\"userId\": \"u1\""));
        assert_eq!(messages[5].content_str(), "next");
    }

    #[test]
    fn test_empty_context_is_skipped() {
        let messages = PromptTemplate::rag().render(None, Some(&json!({})), "q");
        assert_eq!(messages.len(), 2);
    }
}
