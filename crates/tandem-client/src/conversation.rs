//! Local view of one conversation.
//!
//! The list only ever grows at the end (new sends and live messages) or at
//! the front (older history). Confirmations and receipts replace or update
//! entries in place, so the relative order of existing entries never
//! changes.

use chrono::{DateTime, Utc};
use tandem_shared::constants::{RECONCILE_TOLERANCE_MS, TEMP_ID_PREFIX};
use tandem_shared::protocol::SendMessage;
use tandem_shared::{normalize_email, ChatMessage, MessageId, MessageKind, MessageStatus};
use tracing::{debug, warn};
use uuid::Uuid;

/// Status as the local user sees it. Adds the two client-only states to
/// the server's `sent → delivered → read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LocalStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl From<MessageStatus> for LocalStatus {
    fn from(status: MessageStatus) -> Self {
        match status {
            MessageStatus::Sent => Self::Sent,
            MessageStatus::Delivered => Self::Delivered,
            MessageStatus::Read => Self::Read,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKey {
    /// Optimistic copy not yet confirmed by the server.
    Temporary(String),
    Stored(MessageId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: EntryKey,
    pub sender: String,
    pub receiver: String,
    pub text: String,
    pub kind: MessageKind,
    pub status: LocalStatus,
    pub timestamp: DateTime<Utc>,
}

impl Entry {
    fn from_server(msg: &ChatMessage) -> Self {
        Self {
            key: EntryKey::Stored(msg.id.clone()),
            sender: msg.sender.clone(),
            receiver: msg.receiver.clone(),
            text: msg.text.clone(),
            kind: msg.kind,
            status: msg.status.into(),
            timestamp: msg.timestamp,
        }
    }

    pub fn server_id(&self) -> Option<&MessageId> {
        match &self.key {
            EntryKey::Stored(id) => Some(id),
            EntryKey::Temporary(_) => None,
        }
    }

    pub fn temp_id(&self) -> Option<&str> {
        match &self.key {
            EntryKey::Temporary(id) => Some(id),
            EntryKey::Stored(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == LocalStatus::Sending
    }

    /// Best-effort match of a confirmed message against this optimistic
    /// copy: still awaiting the server, same sender, same body, timestamps
    /// within the tolerance. Failed copies were rejected and never match.
    fn resembles(&self, msg: &ChatMessage) -> bool {
        self.temp_id().is_some()
            && self.is_pending()
            && normalize_email(&self.sender) == normalize_email(&msg.sender)
            && self.text == msg.text
            && (msg.timestamp - self.timestamp).num_milliseconds().abs() <= RECONCILE_TOLERANCE_MS
    }
}

/// How an incoming confirmed message was merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// An entry with the same server id was refreshed.
    Refreshed(usize),
    /// The optimistic entry carrying the echoed temporary id was confirmed.
    ConfirmedExact(usize),
    /// An optimistic entry was confirmed by sender/body/time resemblance.
    ConfirmedHeuristic(usize),
    Appended(usize),
}

#[derive(Debug, Clone)]
pub struct Conversation {
    me: String,
    peer: String,
    entries: Vec<Entry>,
    has_more: bool,
}

impl Conversation {
    /// `me` and `peer` are the identifiers used as `sender`/`receiver`.
    pub fn new(me: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            me: me.into(),
            peer: peer.into(),
            entries: Vec::new(),
            has_more: true,
        }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether older history may still exist on the server.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Offset for the next older page: confirmed messages already loaded.
    pub fn next_offset(&self) -> u32 {
        self.entries
            .iter()
            .filter(|e| e.server_id().is_some())
            .count() as u32
    }

    /// Append an optimistic entry and return the event to emit for it.
    pub fn send_local(
        &mut self,
        text: impl Into<String>,
        kind: MessageKind,
        sender_email: Option<&str>,
    ) -> SendMessage {
        let temp_id = format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4());
        let text = text.into();

        self.entries.push(Entry {
            key: EntryKey::Temporary(temp_id.clone()),
            sender: self.me.clone(),
            receiver: self.peer.clone(),
            text: text.clone(),
            kind,
            status: LocalStatus::Sending,
            timestamp: Utc::now(),
        });

        SendMessage {
            sender: self.me.clone(),
            receiver: self.peer.clone(),
            text,
            kind,
            sender_email: sender_email.map(str::to_string),
            temp_id: Some(temp_id),
        }
    }

    /// Merge a message confirmed by the server.
    ///
    /// Lookup order: same server id, then the echoed temporary id, then the
    /// sender/body/time heuristic for servers that do not echo. Only when all
    /// three miss is the message appended.
    pub fn apply_server_message(&mut self, msg: &ChatMessage) -> Reconciled {
        if let Some(idx) = self.position_of(msg.id.as_str()) {
            let entry = &mut self.entries[idx];
            let status = entry.status.max(msg.status.into());
            *entry = Entry::from_server(msg);
            entry.status = status;
            return Reconciled::Refreshed(idx);
        }

        if let Some(temp) = msg.temp_id.as_deref() {
            if let Some(idx) = self.entries.iter().position(|e| e.temp_id() == Some(temp)) {
                self.confirm(idx, msg);
                return Reconciled::ConfirmedExact(idx);
            }
        }

        if let Some(idx) = self.entries.iter().position(|e| e.resembles(msg)) {
            debug!(message_id = %msg.id, "Confirmed optimistic entry by resemblance");
            self.confirm(idx, msg);
            return Reconciled::ConfirmedHeuristic(idx);
        }

        self.entries.push(Entry::from_server(msg));
        Reconciled::Appended(self.entries.len() - 1)
    }

    fn confirm(&mut self, idx: usize, msg: &ChatMessage) {
        // Receipts can race ahead of the echo; keep whichever is further.
        let status = match self.entries[idx].status {
            LocalStatus::Sending | LocalStatus::Failed => msg.status.into(),
            local => local.max(msg.status.into()),
        };
        self.entries[idx] = Entry::from_server(msg);
        self.entries[idx].status = status;
    }

    /// Move the entry with server id `id` forward to `status`. Returns
    /// `false` when the id is unknown or the status would regress.
    pub fn apply_status(&mut self, id: &str, status: MessageStatus) -> bool {
        let Some(idx) = self.position_of(id) else {
            return false;
        };
        let next = LocalStatus::from(status);
        let entry = &mut self.entries[idx];
        if next <= entry.status {
            return false;
        }
        entry.status = next;
        true
    }

    /// Prepend an older page (oldest first), skipping ids already loaded.
    /// Returns the number of entries inserted.
    pub fn prepend_history(&mut self, page: &[ChatMessage], has_more: bool) -> usize {
        let fresh: Vec<Entry> = page
            .iter()
            .filter(|m| self.position_of(m.id.as_str()).is_none())
            .map(Entry::from_server)
            .collect();
        let inserted = fresh.len();
        if inserted < page.len() {
            debug!(skipped = page.len() - inserted, "Dropped duplicate history entries");
        }

        self.entries.splice(0..0, fresh);
        self.has_more = has_more;
        inserted
    }

    /// Flag an optimistic entry as failed.
    pub fn mark_failed(&mut self, temp_id: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.temp_id() == Some(temp_id)) {
            Some(entry) if entry.is_pending() => {
                entry.status = LocalStatus::Failed;
                true
            }
            Some(_) => false,
            None => {
                warn!(temp_id, "No optimistic entry to mark failed");
                false
            }
        }
    }

    /// Oldest entry still waiting for the server, as `(sent at, temp id)`.
    pub fn oldest_pending(&self) -> Option<(DateTime<Utc>, &str)> {
        self.entries
            .iter()
            .filter(|e| e.is_pending())
            .find_map(|e| e.temp_id().map(|t| (e.timestamp, t)))
    }

    fn position_of(&self, server_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.server_id().is_some_and(|id| id.as_str() == server_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const ME: &str = "u@x.com";
    const PEER: &str = "admin@chat.com";

    fn server_copy(sender: &str, text: &str, at: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id: MessageId::generate(),
            sender: sender.into(),
            receiver: if sender == ME { PEER.into() } else { ME.into() },
            sender_email: Some(sender.into()),
            text: text.into(),
            kind: MessageKind::Text,
            status: MessageStatus::Sent,
            timestamp: at,
            delivered_at: None,
            read_at: None,
            temp_id: None,
        }
    }

    fn ids(conv: &Conversation) -> Vec<String> {
        conv.entries()
            .iter()
            .map(|e| match &e.key {
                EntryKey::Temporary(t) => t.clone(),
                EntryKey::Stored(id) => id.to_string(),
            })
            .collect()
    }

    #[test]
    fn local_send_is_optimistic_with_temporary_id() {
        let mut conv = Conversation::new(ME, PEER);
        let req = conv.send_local("hello", MessageKind::Text, Some(ME));

        let temp = req.temp_id.clone().unwrap();
        assert!(temp.starts_with(TEMP_ID_PREFIX));
        assert!(MessageId::parse(&temp).is_none());
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.entries()[0].status, LocalStatus::Sending);
        assert_eq!(req.sender_email.as_deref(), Some(ME));
    }

    #[test]
    fn echo_with_temp_id_confirms_exactly() {
        let mut conv = Conversation::new(ME, PEER);
        let req = conv.send_local("hello", MessageKind::Text, Some(ME));

        // Clock skew beyond the heuristic tolerance is irrelevant here.
        let mut echo = server_copy(ME, "hello", Utc::now() + Duration::seconds(30));
        echo.temp_id = req.temp_id;

        assert_eq!(conv.apply_server_message(&echo), Reconciled::ConfirmedExact(0));
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.entries()[0].server_id(), Some(&echo.id));
        assert_eq!(conv.entries()[0].status, LocalStatus::Sent);
    }

    // Servers that do not echo the temporary id fall back to matching on
    // sender, body and time. This path is best-effort by nature.
    #[test]
    fn echo_without_temp_id_confirms_by_resemblance() {
        let mut conv = Conversation::new(ME, PEER);
        conv.send_local("hello", MessageKind::Text, Some(ME));

        let echo = server_copy(ME, "hello", Utc::now() + Duration::milliseconds(800));
        assert_eq!(
            conv.apply_server_message(&echo),
            Reconciled::ConfirmedHeuristic(0)
        );
        assert_eq!(conv.len(), 1);

        // The same broadcast arriving again only refreshes it.
        assert_eq!(conv.apply_server_message(&echo), Reconciled::Refreshed(0));
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn resemblance_outside_tolerance_duplicates() {
        let mut conv = Conversation::new(ME, PEER);
        conv.send_local("hello", MessageKind::Text, Some(ME));

        let late = server_copy(ME, "hello", Utc::now() + Duration::seconds(6));
        assert_eq!(conv.apply_server_message(&late), Reconciled::Appended(1));
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn identical_bodies_confirm_in_send_order() {
        let mut conv = Conversation::new(ME, PEER);
        conv.send_local("ok", MessageKind::Text, Some(ME));
        conv.send_local("ok", MessageKind::Text, Some(ME));

        let first = server_copy(ME, "ok", Utc::now());
        let second = server_copy(ME, "ok", Utc::now());
        assert_eq!(
            conv.apply_server_message(&first),
            Reconciled::ConfirmedHeuristic(0)
        );
        assert_eq!(
            conv.apply_server_message(&second),
            Reconciled::ConfirmedHeuristic(1)
        );
        assert_eq!(
            ids(&conv),
            vec![first.id.to_string(), second.id.to_string()]
        );
    }

    #[test]
    fn peer_messages_append_and_order_is_stable() {
        let mut conv = Conversation::new(ME, PEER);
        let now = Utc::now();
        let a = server_copy(PEER, "hi", now);
        conv.apply_server_message(&a);
        conv.send_local("hello back", MessageKind::Text, Some(ME));
        let b = server_copy(PEER, "how are you", now);
        assert_eq!(conv.apply_server_message(&b), Reconciled::Appended(2));

        let before = ids(&conv);
        let mut refreshed = a.clone();
        refreshed.status = MessageStatus::Delivered;
        assert_eq!(conv.apply_server_message(&refreshed), Reconciled::Refreshed(0));
        assert_eq!(ids(&conv), before);
    }

    #[test]
    fn status_only_moves_forward() {
        let mut conv = Conversation::new(ME, PEER);
        let msg = server_copy(ME, "hi", Utc::now());
        conv.apply_server_message(&msg);

        assert!(conv.apply_status(msg.id.as_str(), MessageStatus::Read));
        assert!(!conv.apply_status(msg.id.as_str(), MessageStatus::Delivered));
        assert!(!conv.apply_status(msg.id.as_str(), MessageStatus::Read));
        assert_eq!(conv.entries()[0].status, LocalStatus::Read);
        assert!(!conv.apply_status("tmp-unknown", MessageStatus::Read));

        // A stale echo does not pull the status back either.
        assert_eq!(conv.apply_server_message(&msg), Reconciled::Refreshed(0));
        assert_eq!(conv.entries()[0].status, LocalStatus::Read);
    }

    #[test]
    fn history_prepends_without_duplicates() {
        let mut conv = Conversation::new(ME, PEER);
        let base = Utc::now() - Duration::minutes(10);
        let older: Vec<ChatMessage> = (0..5)
            .map(|i| server_copy(PEER, &format!("m{i}"), base + Duration::seconds(i)))
            .collect();

        conv.apply_server_message(&older[4]);
        assert_eq!(conv.next_offset(), 1);

        let inserted = conv.prepend_history(&older, false);
        assert_eq!(inserted, 4);
        assert!(!conv.has_more());
        let texts: Vec<&str> = conv.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(conv.next_offset(), 5);
    }

    #[test]
    fn failed_sends_are_flagged() {
        let mut conv = Conversation::new(ME, PEER);
        let req = conv.send_local("x", MessageKind::Text, None);
        let temp = req.temp_id.unwrap();

        assert_eq!(conv.oldest_pending().map(|(_, t)| t.to_string()), Some(temp.clone()));
        assert!(conv.mark_failed(&temp));
        assert!(!conv.mark_failed(&temp));
        assert_eq!(conv.entries()[0].status, LocalStatus::Failed);
        assert!(conv.oldest_pending().is_none());
    }

    #[test]
    fn resend_after_failure_confirms_the_live_copy() {
        let mut conv = Conversation::new(ME, PEER);
        let rejected = conv.send_local("hi", MessageKind::Text, Some(ME));
        assert!(conv.mark_failed(rejected.temp_id.as_deref().unwrap()));
        conv.send_local("hi", MessageKind::Text, Some(ME));

        let echo = server_copy(ME, "hi", Utc::now());
        assert_eq!(
            conv.apply_server_message(&echo),
            Reconciled::ConfirmedHeuristic(1)
        );
        let statuses: Vec<LocalStatus> = conv.entries().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![LocalStatus::Failed, LocalStatus::Sent]);
        assert_eq!(conv.entries()[1].server_id(), Some(&echo.id));
    }
}
