use std::collections::{HashSet, VecDeque};

use shared::domain::{ChatMessage, CorrelationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    Appended,
    /// A message carrying this correlation id is already in the backlog,
    /// either our own local echo or an earlier delivery.
    Duplicate(CorrelationId),
}

/// Append-only record of every live message seen on the current connection,
/// across all conversations. Unbounded unless a capacity is configured, in
/// which case the oldest entries are evicted first.
#[derive(Debug, Default)]
pub struct LiveBacklog {
    entries: VecDeque<ChatMessage>,
    seen: HashSet<CorrelationId>,
    capacity: Option<usize>,
}

impl LiveBacklog {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            seen: HashSet::new(),
            capacity: capacity.filter(|capacity| *capacity > 0),
        }
    }

    pub fn append(&mut self, message: ChatMessage) -> Append {
        if let Some(client_id) = message.client_id {
            if !self.seen.insert(client_id) {
                return Append::Duplicate(client_id);
            }
        }

        self.entries.push_back(message);
        if let Some(capacity) = self.capacity {
            while self.entries.len() > capacity {
                if let Some(evicted) = self.entries.pop_front() {
                    if let Some(client_id) = evicted.client_id {
                        self.seen.remove(&client_id);
                    }
                }
            }
        }
        Append::Appended
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
