use chrono::{DateTime, Utc};
use shared::domain::{ChatMessage, Identity, MessageOrigin};

/// One line of the rendered conversation. Presentation decides how to style
/// it; `is_self` is enough to align it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRow {
    pub content: String,
    pub sender: Identity,
    pub is_self: bool,
    pub origin: MessageOrigin,
    pub local_echo: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

impl RenderRow {
    fn from_message(message: &ChatMessage, me: &Identity) -> Self {
        Self {
            content: message.content.clone(),
            sender: message.sender.clone(),
            is_self: &message.sender == me,
            origin: message.origin,
            local_echo: message.local_echo,
            sent_at: message.sent_at,
        }
    }
}

/// Persisted rows in fetch order followed by live rows in arrival order.
///
/// This is a concatenation, not a timestamp merge: a live message that is
/// also part of a later history fetch shows up in both segments, and a live
/// message can render after history that was sent later than it.
pub fn render<'a>(
    persisted: &'a [ChatMessage],
    live: impl IntoIterator<Item = &'a ChatMessage>,
    me: &Identity,
) -> Vec<RenderRow> {
    persisted
        .iter()
        .chain(live)
        .map(|message| RenderRow::from_message(message, me))
        .collect()
}

/// Proof that a history fetch was issued for a particular selection by a
/// particular identity. Only the ticket of the latest selection can populate
/// the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTicket {
    owner: Identity,
    peer: Identity,
    generation: u64,
}

impl HistoryTicket {
    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn peer(&self) -> &Identity {
        &self.peer
    }
}

/// Selected peer plus the persisted history fetched for it.
#[derive(Debug, Default)]
pub struct Transcript {
    selected: Option<HistoryTicket>,
    persisted: Vec<ChatMessage>,
}

impl Transcript {
    /// Switches conversation: drops the previous history and hands out the
    /// ticket for the one fetch that may replace it. `generation` must never
    /// repeat for the lifetime of the client, across sessions included.
    pub fn select(&mut self, owner: Identity, peer: Identity, generation: u64) -> HistoryTicket {
        let ticket = HistoryTicket {
            owner,
            peer,
            generation,
        };
        self.selected = Some(ticket.clone());
        self.persisted.clear();
        ticket
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
        self.persisted.clear();
    }

    pub fn is_current(&self, ticket: &HistoryTicket) -> bool {
        self.selected.as_ref() == Some(ticket)
    }

    /// Returns `false` and leaves the transcript untouched when the ticket
    /// belongs to a selection that has since changed.
    pub fn apply_history(&mut self, ticket: &HistoryTicket, history: Vec<ChatMessage>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.persisted = history;
        true
    }

    pub fn selected(&self) -> Option<&Identity> {
        self.selected.as_ref().map(HistoryTicket::peer)
    }

    pub fn persisted(&self) -> &[ChatMessage] {
        &self.persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str, sender: &str, recipient: &str, origin: MessageOrigin) -> ChatMessage {
        ChatMessage {
            content: content.into(),
            sender: Identity::from(sender),
            recipient: Identity::from(recipient),
            origin,
            local_echo: false,
            client_id: None,
            sent_at: None,
        }
    }

    #[test]
    fn persisted_rows_precede_live_rows() {
        let me = Identity::from("alice");
        let persisted = vec![message("hi", "bob", "alice", MessageOrigin::Persisted)];
        let live = vec![message("yo", "alice", "bob", MessageOrigin::Live)];

        let rows = render(&persisted, &live, &me);

        let contents: Vec<&str> = rows.iter().map(|row| row.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "yo"]);
        assert!(!rows[0].is_self);
        assert!(rows[1].is_self);
        assert_eq!(rows[0].origin, MessageOrigin::Persisted);
        assert_eq!(rows[1].origin, MessageOrigin::Live);
    }

    #[test]
    fn overlap_between_history_and_live_is_not_merged() {
        let me = Identity::from("alice");
        let persisted = vec![message("late history", "bob", "alice", MessageOrigin::Persisted)];
        let live = vec![message("late history", "bob", "alice", MessageOrigin::Live)];

        assert_eq!(render(&persisted, &live, &me).len(), 2);
    }

    fn alice() -> Identity {
        Identity::from("alice")
    }

    #[test]
    fn stale_ticket_is_rejected() {
        let mut transcript = Transcript::default();
        let bob = transcript.select(alice(), Identity::from("bob"), 1);
        let carol = transcript.select(alice(), Identity::from("carol"), 2);

        assert!(!transcript.apply_history(
            &bob,
            vec![message("for bob", "bob", "alice", MessageOrigin::Persisted)]
        ));
        assert!(transcript.persisted().is_empty());

        assert!(transcript.apply_history(
            &carol,
            vec![message("for carol", "carol", "alice", MessageOrigin::Persisted)]
        ));
        assert_eq!(transcript.persisted()[0].content, "for carol");
    }

    #[test]
    fn reselecting_same_peer_invalidates_earlier_fetch() {
        let mut transcript = Transcript::default();
        let first = transcript.select(alice(), Identity::from("bob"), 1);
        transcript.select(alice(), Identity::from("carol"), 2);
        let second = transcript.select(alice(), Identity::from("bob"), 3);

        assert!(!transcript.is_current(&first));
        assert!(transcript.is_current(&second));
    }

    #[test]
    fn ticket_from_another_identity_is_rejected() {
        let mut previous = Transcript::default();
        let alices = previous.select(alice(), Identity::from("bob"), 7);

        let mut transcript = Transcript::default();
        let carols = transcript.select(Identity::from("carol"), Identity::from("bob"), 7);

        assert!(!transcript.apply_history(
            &alices,
            vec![message("private", "bob", "alice", MessageOrigin::Persisted)]
        ));
        assert!(transcript.persisted().is_empty());
        assert!(transcript.is_current(&carols));
    }

    #[test]
    fn switching_discards_previous_history() {
        let mut transcript = Transcript::default();
        let bob = transcript.select(alice(), Identity::from("bob"), 1);
        transcript.apply_history(
            &bob,
            vec![message("hi", "bob", "alice", MessageOrigin::Persisted)],
        );

        transcript.select(alice(), Identity::from("carol"), 2);
        assert!(transcript.persisted().is_empty());

        transcript.clear_selection();
        assert!(transcript.selected().is_none());
        assert!(!transcript.is_current(&bob));
    }
}
