use std::mem;

/// The two most recently attempted messages.
///
/// Slot 0 holds the newest message, slot 1 the one attempted before it.
/// Every call to [`Publisher::send`](crate::Publisher::send) pushes exactly
/// once, whether or not the send succeeds.
///
/// # Examples
///
/// ```
/// use stomp_publisher::RecentMessages;
///
/// let mut recent = RecentMessages::default();
/// recent.push("first");
/// recent.push("second");
/// assert_eq!(recent.newest(), Some("second"));
/// assert_eq!(recent.previous(), Some("first"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentMessages {
    slots: [Option<String>; 2],
}

impl RecentMessages {
    pub fn push(&mut self, message: &str) {
        self.slots[1] = mem::take(&mut self.slots[0]);
        self.slots[0] = Some(message.to_string());
    }

    pub fn newest(&self) -> Option<&str> {
        self.slots[0].as_deref()
    }

    pub fn previous(&self) -> Option<&str> {
        self.slots[1].as_deref()
    }
}

/// Outcome of publishing a line stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Lines published successfully.
    pub sent: usize,
    /// Lines whose send failed; the stream carried on past them.
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring() {
        let recent = RecentMessages::default();
        assert_eq!(recent.newest(), None);
        assert_eq!(recent.previous(), None);
    }

    #[test]
    fn test_push_shifts_slots() {
        let mut recent = RecentMessages::default();

        recent.push("a");
        assert_eq!(recent.newest(), Some("a"));
        assert_eq!(recent.previous(), None);

        recent.push("b");
        recent.push("c");
        assert_eq!(recent.newest(), Some("c"));
        assert_eq!(recent.previous(), Some("b"));
    }

    #[test]
    fn test_push_same_message_twice() {
        let mut recent = RecentMessages::default();
        recent.push("dup");
        recent.push("dup");
        assert_eq!(recent.newest(), recent.previous());
    }

    #[test]
    fn test_summary_default() {
        let summary = StreamSummary::default();
        assert_eq!(summary.sent, 0);
        assert_eq!(summary.failed, 0);
    }
}
