use wright_core::messages::Message;
use wright_core::tokens::estimate_tokens;

/// Counts tokens for compaction decisions. Implementations must be additive:
/// the count of a list equals the sum over its messages.
pub trait TokenCounter: Send + Sync {
    fn count_message(&self, message: &Message) -> usize;

    fn count(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// Four characters per token over the flattened message text.
#[derive(Clone, Copy, Debug, Default)]
pub struct CharEstimator;

impl TokenCounter for CharEstimator {
    fn count_message(&self, message: &Message) -> usize {
        estimate_tokens(&message.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_per_message() {
        let msgs = vec![Message::user("abcd"), Message::assistant("abcdefgh")];
        assert_eq!(CharEstimator.count(&msgs), 3);
        assert_eq!(CharEstimator.count(&[]), 0);
    }
}
