use shared::domain::{ChatMessage, ConversationKey, Identity};

/// Live messages exchanged between `me` and `peer`, in arrival order.
/// Nothing is selected when `peer` is `None`, so nothing is returned.
pub fn conversation_messages<'a, I>(
    backlog: I,
    me: &Identity,
    peer: Option<&Identity>,
) -> Vec<&'a ChatMessage>
where
    I: IntoIterator<Item = &'a ChatMessage>,
{
    let Some(peer) = peer else {
        return Vec::new();
    };
    let key = ConversationKey::new(me.clone(), peer.clone());
    backlog
        .into_iter()
        .filter(|message| key.contains(message))
        .collect()
}
