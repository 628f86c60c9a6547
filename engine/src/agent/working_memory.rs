//! Working memory for one agent step
//!
//! Holds the messages sent with a step and keeps them within the model's
//! context budget. The system prompt and the newest exchange are always
//! kept; the oldest messages in between are dropped first.

use crate::llm::{Message, MessageRole};

/// Default context limit in tokens (conservative estimate for most models)
const DEFAULT_CONTEXT_LIMIT: usize = 8000;

/// Average characters per token (rough estimate: 1 token ≈ 4 characters)
const CHARS_PER_TOKEN: usize = 4;

/// Per-message overhead for role and structure
const MESSAGE_OVERHEAD: usize = 10;

/// Messages kept at the tail whatever their size
const KEEP_RECENT: usize = 2;

#[derive(Debug, Clone)]
pub struct WorkingMemory {
    messages: Vec<Message>,
    context_limit: usize,
    token_count: usize,
    dropped: usize,
}

impl WorkingMemory {
    pub fn with_limit(context_limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            context_limit,
            token_count: 0,
            dropped: 0,
        }
    }

    /// Appends a message, trimming old ones when over the limit
    pub fn push(&mut self, message: Message) {
        self.token_count += estimate_tokens(&message);
        self.messages.push(message);

        if self.token_count > self.context_limit {
            self.trim();
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Number of messages dropped to stay within the limit
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    fn trim(&mut self) {
        let pinned = usize::from(
            self.messages
                .first()
                .map_or(false, |m| m.role == MessageRole::System),
        );

        while self.token_count > self.context_limit
            && self.messages.len() > pinned + KEEP_RECENT
        {
            let removed = self.messages.remove(pinned);
            self.token_count = self.token_count.saturating_sub(estimate_tokens(&removed));
            self.dropped += 1;
        }
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::with_limit(DEFAULT_CONTEXT_LIMIT)
    }
}

/// Rough token estimate from the character count
fn estimate_tokens(message: &Message) -> usize {
    message.content.len().div_ceil(CHARS_PER_TOKEN) + MESSAGE_OVERHEAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_counts_tokens() {
        let mut memory = WorkingMemory::default();
        memory.push(Message::system("You are a helpful assistant"));
        memory.push(Message::user("Hello"));
        assert_eq!(memory.messages().len(), 2);
        assert_eq!(
            memory.token_count(),
            estimate_tokens(&Message::system("You are a helpful assistant"))
                + estimate_tokens(&Message::user("Hello"))
        );
    }

    #[test]
    fn test_trim_keeps_system_prompt_and_recent_messages() {
        let mut memory = WorkingMemory::with_limit(60);
        memory.push(Message::system("system"));
        for i in 0..10 {
            memory.push(Message::user(format!("message number {} {}", i, "x".repeat(40))));
        }

        let messages = memory.messages();
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages.last().unwrap().content.starts_with("message number 9"));
        assert!(memory.dropped() > 0);
        assert!(messages.len() >= 1 + KEEP_RECENT);
    }

    #[test]
    fn test_no_trim_under_limit() {
        let mut memory = WorkingMemory::with_limit(10_000);
        for i in 0..5 {
            memory.push(Message::user(format!("m{}", i)));
        }
        assert_eq!(memory.messages().len(), 5);
        assert_eq!(memory.dropped(), 0);
    }
}
