use shared::domain::{ChatMessage, CorrelationId, Identity};

/// Input buffer for the selected conversation.
#[derive(Debug, Default)]
pub struct Composer {
    draft: String,
}

impl Composer {
    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Turns the draft into the local echo of an outgoing message and clears
    /// the buffer. Blank drafts and a missing recipient produce nothing and
    /// keep the draft as typed.
    pub fn take_outgoing(
        &mut self,
        me: &Identity,
        recipient: Option<&Identity>,
    ) -> Option<ChatMessage> {
        let recipient = recipient?;
        if self.draft.trim().is_empty() {
            return None;
        }
        let content = std::mem::take(&mut self.draft);
        Some(ChatMessage::local_echo(
            content,
            me.clone(),
            recipient.clone(),
            CorrelationId::generate(),
        ))
    }
}
