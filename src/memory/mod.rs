
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// One completed question/answer exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Turns kept before the oldest are dropped, 0 keeps everything
    pub max_turns: usize,
}

impl Default for MemoryConfig {
    #[inline]
    fn default() -> Self {
        Self { max_turns: 20 }
    }
}

/// Session chat history, oldest turn first
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl ConversationMemory {
    #[inline]
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: config.max_turns,
        }
    }

    #[inline]
    pub fn unbounded() -> Self {
        Self::new(MemoryConfig { max_turns: 0 })
    }

    #[inline]
    pub fn append(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push_back(ConversationTurn {
            question: question.into(),
            answer: answer.into(),
        });

        if self.max_turns > 0 {
            while self.turns.len() > self.max_turns {
                self.turns.pop_front();
                debug!("Dropped oldest conversation turn, cap is {}", self.max_turns);
            }
        }
    }

    #[inline]
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
