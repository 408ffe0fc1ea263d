//! Context trimming — budget-bounded selection from the persisted transcript.
//!
//! Token cost is a character heuristic: ~4 characters per token. The
//! heuristic is intentional (portable, predictable for tests); the context
//! budget constant was chosen against it, so swapping in a real tokenizer
//! would also mean re-deriving the budget.

use fableloom_core::message::ChatMessage;

/// Total context budget shared by the system prompt and the transcript.
pub const MAX_CONTEXT_TOKENS: usize = 100_000;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters, rounded up; non-empty strings cost at
/// least 1.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.len() + 3) / 4
}

/// Select the transcript suffix that fits the remaining budget.
///
/// Whatever the system prompt does not consume is spent newest-first:
/// walking backward from the most recent message, each message is included
/// whole while it fits; the walk **stops at the first message that does
/// not fit**. The result is therefore a contiguous suffix in original
/// order. Dropped messages are simply gone — no summarization.
pub fn trim_history<'a>(
    system_prompt: &str,
    history: &'a [ChatMessage],
    max_tokens: usize,
) -> &'a [ChatMessage] {
    let mut remaining = max_tokens.saturating_sub(estimate_tokens(system_prompt));
    let mut start = history.len();

    for (i, msg) in history.iter().enumerate().rev() {
        let cost = estimate_tokens(&msg.content);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        start = i;
    }

    &history[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn single_char_costs_one() {
        assert_eq!(estimate_tokens("x"), 1);
    }

    #[test]
    fn empty_history_yields_empty_selection() {
        let selected = trim_history("some system prompt", &[], MAX_CONTEXT_TOKENS);
        assert!(selected.is_empty());
    }

    #[test]
    fn everything_fits_under_a_generous_budget() {
        let history = vec![
            ChatMessage::user("look around"),
            ChatMessage::assistant("The tavern is quiet."),
        ];
        let selected = trim_history("prompt", &history, MAX_CONTEXT_TOKENS);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].content, "look around");
    }

    #[test]
    fn walk_stops_at_first_message_that_does_not_fit() {
        // system: 0 tokens; budget 25. Newest two fit (10 each); the big
        // middle message does not, and the walk stops there even though the
        // oldest tiny message would have fit on its own.
        let history = vec![
            ChatMessage::user("tiny"),                // 1 token
            ChatMessage::assistant(&"b".repeat(400)), // 100 tokens — blocks
            ChatMessage::user(&"c".repeat(40)),       // 10 tokens
            ChatMessage::assistant(&"d".repeat(40)),  // 10 tokens
        ];
        let selected = trim_history("", &history, 25);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].content, "c".repeat(40));
        assert_eq!(selected[1].content, "d".repeat(40));
    }

    #[test]
    fn system_prompt_cost_reduces_the_budget() {
        // 320_000 chars → 80_000 tokens; three 40_000-char messages cost
        // 10_000 each. Remaining budget 20_000 admits exactly the newest two.
        let system = "s".repeat(320_000);
        let history = vec![
            ChatMessage::user(&"a".repeat(40_000)),
            ChatMessage::assistant(&"b".repeat(40_000)),
            ChatMessage::user(&"c".repeat(40_000)),
        ];
        let selected = trim_history(&system, &history, MAX_CONTEXT_TOKENS);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].content, "b".repeat(40_000));
    }

    #[test]
    fn oversized_system_prompt_clamps_budget_to_zero() {
        let system = "s".repeat(500_000);
        let history = vec![ChatMessage::user("hello")];
        let selected = trim_history(&system, &history, MAX_CONTEXT_TOKENS);
        assert!(selected.is_empty());
    }

    #[test]
    fn trimming_is_monotonic_in_budget() {
        let history: Vec<ChatMessage> = (0..10)
            .map(|i| ChatMessage::user(format!("message number {i} with some padding text")))
            .collect();

        let mut previous = 0;
        for budget in (0..200).step_by(10) {
            let selected = trim_history("", &history, budget);
            assert!(
                selected.len() >= previous,
                "raising the budget dropped a previously included message"
            );
            previous = selected.len();
        }
    }

    #[test]
    fn selection_preserves_original_order() {
        let history = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("second"),
            ChatMessage::user("third"),
        ];
        let selected = trim_history("", &history, MAX_CONTEXT_TOKENS);
        let contents: Vec<&str> = selected.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }
}
