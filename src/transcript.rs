//! The ordered record of a conversation.
//!
//! A [`Transcript`] is an append-only list of [`Message`]s.  Appending is the only structural
//! change; the one in-place mutation is filling in the content of an assistant message while its
//! response arrives.  That message starts out holding [`SENTINEL`], a display-only placeholder
//! that the first applied fragment replaces.  Whether a placeholder has been filled is tracked by
//! position, so a reply whose text happens to equal the sentinel is kept.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::types::{Message, MessageId, Role};

/// Placeholder content of an assistant message whose response has not produced any text yet.
pub const SENTINEL: &str = ". . .";

/// An append-only, ordered sequence of messages.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    next_id: u64,
    // Positions of placeholders no fragment has touched yet.
    unfilled: BTreeSet<usize>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its position.
    pub fn push(&mut self, role: Role, content: impl Into<String>) -> usize {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.messages.push(Message::new(id, role, content));
        self.messages.len() - 1
    }

    /// Append an assistant message holding [`SENTINEL`] and return its position.
    pub fn push_placeholder(&mut self) -> usize {
        let position = self.push(Role::Assistant, SENTINEL);
        self.unfilled.insert(position);
        position
    }

    /// All messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The messages a chat view shows.
    pub fn displayed(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_displayed())
    }

    pub fn get(&self, position: usize) -> Option<&Message> {
        self.messages.get(position)
    }

    pub fn get_mut(&mut self, position: usize) -> Option<&mut Message> {
        self.messages.get_mut(position)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True if the message at `position` is a placeholder no fragment has been applied to.
    pub fn is_placeholder(&self, position: usize) -> bool {
        self.unfilled.contains(&position)
    }

    /// Append `fragment` to the content of the message at `position`.
    ///
    /// If the message is an unfilled placeholder, the sentinel is cleared first, so applying "Hel"
    /// then "lo" to a fresh placeholder yields "Hello".  An empty fragment still counts as the
    /// first one.
    pub fn apply_fragment(&mut self, position: usize, fragment: &str) -> Result<()> {
        let len = self.messages.len();
        let message = self.messages.get_mut(position).ok_or_else(|| {
            Error::validation(
                format!("no message at position {position} (transcript has {len})"),
                Some("position".to_string()),
            )
        })?;
        if self.unfilled.remove(&position) {
            message.content.clear();
        }
        message.content.push_str(fragment);
        Ok(())
    }

    /// Clear [`SENTINEL`] from the message at `position` if no fragment was ever applied to it.
    ///
    /// Returns true if the sentinel was cleared.
    pub fn settle(&mut self, position: usize) -> bool {
        if !self.unfilled.remove(&position) {
            return false;
        }
        if let Some(message) = self.messages.get_mut(position) {
            message.content.clear();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_and_ids_increase() {
        let mut transcript = Transcript::new();
        assert!(transcript.is_empty());
        assert_eq!(transcript.push(Role::User, "Hi"), 0);
        assert_eq!(transcript.push_placeholder(), 1);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].id, MessageId(0));
        assert_eq!(transcript.messages()[1].id, MessageId(1));
        assert_eq!(transcript.last().map(|m| m.role), Some(Role::Assistant));
    }

    #[test]
    fn fragments_replace_the_sentinel_then_append() {
        let mut transcript = Transcript::new();
        transcript.push(Role::User, "Hi");
        let position = transcript.push_placeholder();
        assert!(transcript.is_placeholder(position));
        transcript.apply_fragment(position, "Hel").unwrap();
        assert!(!transcript.is_placeholder(position));
        transcript.apply_fragment(position, "lo").unwrap();
        assert_eq!(transcript.messages()[position].content, "Hello");
    }

    #[test]
    fn fragments_append_to_ordinary_content() {
        let mut transcript = Transcript::new();
        let position = transcript.push(Role::Assistant, "Partial");
        transcript.apply_fragment(position, "Error: cut off").unwrap();
        assert_eq!(transcript.messages()[position].content, "PartialError: cut off");
    }

    #[test]
    fn fragment_out_of_range_is_rejected() {
        let mut transcript = Transcript::new();
        let err = transcript.apply_fragment(3, "x").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn settle_only_clears_untouched_placeholders() {
        let mut transcript = Transcript::new();
        let empty = transcript.push_placeholder();
        let filled = transcript.push_placeholder();
        transcript.apply_fragment(filled, "done").unwrap();
        assert!(transcript.settle(empty));
        assert!(!transcript.settle(filled));
        assert_eq!(transcript.messages()[empty].content, "");
        assert_eq!(transcript.messages()[filled].content, "done");
    }

    #[test]
    fn empty_first_fragment_still_clears_the_sentinel() {
        let mut transcript = Transcript::new();
        let position = transcript.push_placeholder();
        transcript.apply_fragment(position, "").unwrap();
        assert_eq!(transcript.messages()[position].content, "");
        assert!(!transcript.is_placeholder(position));
        transcript.apply_fragment(position, "Hi").unwrap();
        assert_eq!(transcript.messages()[position].content, "Hi");
        assert!(!transcript.settle(position));
        assert_eq!(transcript.messages()[position].content, "Hi");
    }

    #[test]
    fn reply_equal_to_the_sentinel_survives_settle() {
        let mut transcript = Transcript::new();
        let position = transcript.push_placeholder();
        transcript.apply_fragment(position, SENTINEL).unwrap();
        assert!(!transcript.is_placeholder(position));
        assert!(!transcript.settle(position));
        assert_eq!(transcript.messages()[position].content, SENTINEL);

        let ordinary = transcript.push(Role::Assistant, SENTINEL);
        assert!(!transcript.is_placeholder(ordinary));
        transcript.apply_fragment(ordinary, "!").unwrap();
        assert_eq!(transcript.messages()[ordinary].content, ". . .!");
    }

    #[test]
    fn system_messages_are_hidden_from_display() {
        let mut transcript = Transcript::new();
        transcript.push(Role::System, "be terse");
        transcript.push(Role::User, "Hi");
        let shown: Vec<_> = transcript.displayed().map(|m| m.content.as_str()).collect();
        assert_eq!(shown, vec!["Hi"]);
    }
}
