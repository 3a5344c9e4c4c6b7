//! Append-only conversation log and bounded history windows.
//!
//! Turns are never mutated after creation. The only removal is the router
//! retracting its own optimistically appended user turn when an in-flight
//! investigation is cancelled; retraction is by id so a superseding
//! question appended by a newer request is never touched.

use crate::types::{ConversationTurn, TurnRole};

#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Remove the turn with `id` if present. Returns whether it was found.
    pub fn retract(&mut self, id: &str) -> bool {
        match self.turns.iter().position(|t| t.id == id) {
            Some(idx) => {
                self.turns.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// The most recent `limit` turns, adjusted so the window never opens on
    /// an assistant turn: providers require an assistant turn to follow the
    /// user message it answers, so leading assistant turns are dropped from
    /// the window rather than sent without their question.
    pub fn recent_window(&self, limit: usize) -> Vec<ConversationTurn> {
        if limit == 0 {
            return Vec::new();
        }
        let skip = self.turns.len().saturating_sub(limit);
        let mut window: &[ConversationTurn] = &self.turns[skip..];
        while let Some(first) = window.first() {
            if first.role == TurnRole::Assistant {
                window = &window[1..];
            } else {
                break;
            }
        }
        window.to_vec()
    }
}
