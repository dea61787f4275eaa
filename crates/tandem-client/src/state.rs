use std::collections::{BTreeMap, BTreeSet, HashMap};

use tandem_shared::{normalize_email, ChatMessage};

use crate::conversation::Conversation;

/// Everything one logged-in client knows: its conversations, unread
/// counters, and who is online or typing.
#[derive(Debug, Clone)]
pub struct ClientState {
    name: String,
    email: String,
    /// Keyed by the normalized counterpart identifier.
    conversations: HashMap<String, Conversation>,
    /// Counters owned by this client, keyed by normalized sender email.
    unread: BTreeMap<String, u32>,
    online: BTreeSet<String>,
    typing: BTreeSet<String>,
    last_error: Option<String>,
}

impl ClientState {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            conversations: HashMap::new(),
            unread: BTreeMap::new(),
            online: BTreeSet::new(),
            typing: BTreeSet::new(),
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Whether `identity` (email or display name) refers to this client.
    pub fn is_me(&self, identity: &str) -> bool {
        let id = normalize_email(identity);
        id == normalize_email(&self.email) || id == normalize_email(&self.name)
    }

    /// The other party of `msg` from this client's point of view.
    pub fn counterpart_of<'a>(&self, msg: &'a ChatMessage) -> &'a str {
        if self.is_me(&msg.sender) || msg.sender_email.as_deref().is_some_and(|e| self.is_me(e)) {
            &msg.receiver
        } else {
            &msg.sender
        }
    }

    pub fn conversation(&self, peer: &str) -> Option<&Conversation> {
        self.conversations.get(&normalize_email(peer))
    }

    /// Conversation with `peer`, created empty on first use.
    pub fn conversation_mut(&mut self, peer: &str) -> &mut Conversation {
        let me = self.email.clone();
        self.conversations
            .entry(normalize_email(peer))
            .or_insert_with(|| Conversation::new(me, peer))
    }

    pub fn conversations_mut(&mut self) -> impl Iterator<Item = &mut Conversation> {
        self.conversations.values_mut()
    }

    pub fn unread_from(&self, sender_email: &str) -> u32 {
        self.unread
            .get(&normalize_email(sender_email))
            .copied()
            .unwrap_or(0)
    }

    /// Mirror of the server counter; a reset keeps the key at zero.
    pub fn set_unread(&mut self, sender_email: &str, count: u32) {
        self.unread.insert(normalize_email(sender_email), count);
    }

    /// Counters as the server holds them, zeros included.
    pub fn unread_counts(&self) -> &BTreeMap<String, u32> {
        &self.unread
    }

    /// Replace all counters, e.g. from the REST snapshot after login.
    pub fn replace_unread(&mut self, counts: BTreeMap<String, u32>) {
        self.unread = counts
            .into_iter()
            .map(|(k, c)| (normalize_email(&k), c))
            .collect();
    }

    pub fn total_unread(&self) -> u64 {
        self.unread.values().map(|&c| u64::from(c)).sum()
    }

    pub fn is_online(&self, email: &str) -> bool {
        self.online.contains(&normalize_email(email))
    }

    pub fn set_online(&mut self, email: &str, online: bool) {
        let key = normalize_email(email);
        if online {
            self.online.insert(key);
        } else {
            self.online.remove(&key);
        }
    }

    pub fn is_typing(&self, sender: &str) -> bool {
        self.typing.contains(&normalize_email(sender))
    }

    pub fn set_typing(&mut self, sender: &str, typing: bool) {
        let key = normalize_email(sender);
        if typing {
            self.typing.insert(key);
        } else {
            self.typing.remove(&key);
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversations_are_keyed_case_insensitively() {
        let mut state = ClientState::new("U", "u@x.com");
        state.conversation_mut("Admin@Chat.com");
        state.conversation_mut("admin@chat.com");
        assert!(state.conversation("ADMIN@CHAT.COM").is_some());
        assert_eq!(state.conversations_mut().count(), 1);
    }

    #[test]
    fn reset_counters_stay_at_zero() {
        let mut state = ClientState::new("Admin", "admin@chat.com");
        state.set_unread("A@x.com", 3);
        state.set_unread("b@x.com", 2);
        assert_eq!(state.total_unread(), 5);
        assert_eq!(state.unread_from("a@x.com"), 3);

        state.set_unread("a@x.com", 0);
        assert_eq!(state.total_unread(), 2);
        assert_eq!(state.unread_counts().get("a@x.com"), Some(&0));

        state.replace_unread(BTreeMap::from([("C@x.com".to_string(), 4), ("d@x.com".to_string(), 0)]));
        assert_eq!(state.total_unread(), 4);
        assert_eq!(state.unread_from("c@x.com"), 4);
        assert_eq!(
            state.unread_counts(),
            &BTreeMap::from([("c@x.com".to_string(), 4), ("d@x.com".to_string(), 0)])
        );
    }

    #[test]
    fn identity_matches_email_or_name() {
        let state = ClientState::new("Uma", "u@x.com");
        assert!(state.is_me("U@X.com"));
        assert!(state.is_me("uma"));
        assert!(!state.is_me("admin@chat.com"));
    }
}
