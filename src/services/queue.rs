use std::collections::VecDeque;

/// One pending request: generate the assistant message `id` in
/// `conversation_id` as a reply to `content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: String,
    pub content: String,
    pub conversation_id: String,
}

/// FIFO of generation requests across all conversations.
#[derive(Debug, Default)]
pub struct GenerationQueue {
    items: VecDeque<QueueItem>,
}

impl GenerationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: QueueItem) {
        self.items.push_back(item);
    }

    pub fn pop_front(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn count_for(&self, conversation_id: &str) -> usize {
        self.items
            .iter()
            .filter(|item| item.conversation_id == conversation_id)
            .count()
    }

    /// Drop every item targeting `conversation_id`, preserving the order of
    /// the rest. Returns how many were removed.
    pub fn remove_conversation(&mut self, conversation_id: &str) -> usize {
        let before = self.items.len();
        self.items
            .retain(|item| item.conversation_id != conversation_id);
        before - self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, conversation_id: &str) -> QueueItem {
        QueueItem {
            id: id.to_string(),
            content: format!("prompt {}", id),
            conversation_id: conversation_id.to_string(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = GenerationQueue::new();
        queue.push(item("1", "a"));
        queue.push(item("2", "b"));
        queue.push(item("3", "a"));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop_front())
            .map(|i| i.id)
            .collect();
        assert_eq!(order, vec!["1", "2", "3"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_conversation_keeps_others_in_order() {
        let mut queue = GenerationQueue::new();
        queue.push(item("1", "a"));
        queue.push(item("2", "b"));
        queue.push(item("3", "a"));
        queue.push(item("4", "c"));

        assert_eq!(queue.count_for("a"), 2);
        assert_eq!(queue.remove_conversation("a"), 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front().unwrap().id, "2");
        assert_eq!(queue.pop_front().unwrap().id, "4");
        assert_eq!(queue.remove_conversation("missing"), 0);
    }
}
