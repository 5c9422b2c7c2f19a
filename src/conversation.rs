//! Conversation turns and the append-only history shared by the steps of a run.

use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;

/// One tagged turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "text", rename_all = "snake_case")]
pub enum Turn {
    /// Process directive
    System(String),
    /// Instruction given to the agent
    Human(String),
    /// Agent output
    Agent(String),
}

impl Turn {
    pub fn text(&self) -> &str {
        match self {
            Turn::System(t) | Turn::Human(t) | Turn::Agent(t) => t,
        }
    }

    pub fn to_message(&self) -> ChatMessage {
        match self {
            Turn::System(t) => ChatMessage::system(t.clone()),
            Turn::Human(t) => ChatMessage::user(t.clone()),
            Turn::Agent(t) => ChatMessage::assistant(t.clone()),
        }
    }
}

/// Ordered conversation record. Turns can only be appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Most recent agent output, if any.
    pub fn last_agent_output(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|t| match t {
            Turn::Agent(text) => Some(text.as_str()),
            _ => None,
        })
    }

    /// Render the history as chat messages, ending with `instruction` as a user
    /// message unless the history already ends with it.
    pub fn to_messages(&self, instruction: &str) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = self.turns.iter().map(Turn::to_message).collect();
        let ends_with_instruction =
            matches!(self.last(), Some(Turn::Human(text)) if text == instruction);
        if !ends_with_instruction {
            messages.push(ChatMessage::user(instruction));
        }
        messages
    }
}
