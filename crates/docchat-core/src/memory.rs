//! Token-budgeted conversation memory.
//!
//! Holds the ordered log of prior turns that is replayed to the language
//! model. Tokens are counted with [`count_tokens`] (whitespace-separated
//! words), which is deterministic and model-independent.
//!
//! Eviction removes whole turns from the oldest end until the retained
//! turns fit the budget. The most recent turn is never evicted, even when
//! it alone exceeds the budget.

use std::collections::VecDeque;

use crate::models::Turn;

/// Number of whitespace-separated tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    budget: usize,
    turns: VecDeque<Turn>,
    tokens: usize,
}

impl ConversationMemory {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            turns: VecDeque::new(),
            tokens: 0,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Append a turn, then evict from the front until within budget.
    pub fn append(&mut self, turn: Turn) {
        self.tokens += count_tokens(&turn.text);
        self.turns.push_back(turn);
        while self.tokens > self.budget && self.turns.len() > 1 {
            if let Some(evicted) = self.turns.pop_front() {
                self.tokens -= count_tokens(&evicted.text);
            }
        }
    }

    /// Retained turns, oldest first.
    pub fn turns(&mut self) -> &[Turn] {
        self.turns.make_contiguous()
    }

    /// Owned copy of the retained turns, oldest first.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn token_count(&self) -> usize {
        self.tokens
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.tokens = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("  one\ttwo\n three  "), 3);
    }

    #[test]
    fn test_keeps_everything_under_budget() {
        let mut mem = ConversationMemory::new(10);
        mem.append(Turn::user(words(3)));
        mem.append(Turn::assistant(words(4)));
        assert_eq!(mem.len(), 2);
        assert_eq!(mem.token_count(), 7);
    }

    #[test]
    fn test_evicts_oldest_whole_turns() {
        let mut mem = ConversationMemory::new(10);
        mem.append(Turn::user(words(4)));
        mem.append(Turn::assistant(words(4)));
        mem.append(Turn::user(words(4)));
        let turns = mem.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, crate::models::Role::Assistant);
        assert_eq!(mem.token_count(), 8);
    }

    #[test]
    fn test_latest_turn_survives_even_over_budget() {
        let mut mem = ConversationMemory::new(5);
        mem.append(Turn::user(words(2)));
        mem.append(Turn::assistant(words(50)));
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.token_count(), 50);
    }

    #[test]
    fn test_budget_invariant_over_many_appends() {
        let mut mem = ConversationMemory::new(40);
        for i in 0..200 {
            let n = (i * 7) % 23;
            let turn = if i % 2 == 0 {
                Turn::user(words(n))
            } else {
                Turn::assistant(words(n))
            };
            mem.append(turn);
            let total: usize = mem.turns().iter().map(|t| count_tokens(&t.text)).sum();
            assert_eq!(total, mem.token_count());
            assert!(total <= 40 || mem.len() == 1, "over budget at step {}", i);
        }
    }

    #[test]
    fn test_clear() {
        let mut mem = ConversationMemory::new(10);
        mem.append(Turn::user("hello there"));
        mem.clear();
        assert!(mem.is_empty());
        assert_eq!(mem.token_count(), 0);
    }
}
