use std::fmt::Write;

use crate::chunking::Chunk;
use crate::memory::ConversationTurn;

const INSTRUCTIONS: &str = "Use the following pieces of context and the chat history to \
answer the question at the end. If the context does not contain the answer, say that you \
don't know instead of making one up.";

/// Render the prompt sent to the language model
#[inline]
pub fn build_prompt(question: &str, context: &[Chunk], history: &[ConversationTurn]) -> String {
    let mut prompt = String::from(INSTRUCTIONS);
    prompt.push_str("\n\n");

    if !history.is_empty() {
        prompt.push_str("Chat history:\n");
        for turn in history {
            // Writing to a String cannot fail
            let _ = writeln!(prompt, "Human: {}", turn.question);
            let _ = writeln!(prompt, "Assistant: {}", turn.answer);
        }
        prompt.push('\n');
    }

    prompt.push_str("Context:\n");
    let context_text = context
        .iter()
        .map(|chunk| chunk.content.trim())
        .collect::<Vec<_>>()
        .join("\n\n");
    prompt.push_str(&context_text);
    prompt.push_str("\n\n");

    let _ = write!(prompt, "Question: {}\nHelpful answer:", question.trim());
    prompt
}
