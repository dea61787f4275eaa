//! Applies server events to [`ClientState`].
//!
//! [`apply_event`] is pure with respect to I/O: it mutates local state and
//! returns the acknowledgements the client should emit in response, leaving
//! the caller to put them on the wire. [`read_receipts`] builds the events
//! for reading a conversation the same way.

use tandem_shared::protocol::{ClientEvent, ConversationRead, DeliveredAck, ReadAck, ServerEvent};
use tandem_shared::MessageStatus;
use tracing::{debug, warn};

use crate::conversation::{LocalStatus, Reconciled};
use crate::state::ClientState;

pub fn apply_event(state: &mut ClientState, event: ServerEvent) -> Vec<ClientEvent> {
    match event {
        ServerEvent::ReceiveMessage(msg) => {
            let from_me = state.is_me(&msg.sender)
                || msg.sender_email.as_deref().is_some_and(|e| state.is_me(e));
            let peer = state.counterpart_of(&msg).to_string();
            let outcome = state.conversation_mut(&peer).apply_server_message(&msg);
            debug!(message_id = %msg.id, ?outcome, "Applied message");

            if from_me {
                state.clear_error();
                return Vec::new();
            }

            state.set_typing(&msg.sender, false);
            // Only acknowledge the first sighting; refreshes were acked already.
            if matches!(outcome, Reconciled::Appended(_)) && msg.status == MessageStatus::Sent {
                vec![ClientEvent::MessageDelivered(DeliveredAck {
                    message_id: msg.id.to_string(),
                    to: Some(msg.sender_email.clone().unwrap_or(msg.sender)),
                })]
            } else {
                Vec::new()
            }
        }
        ServerEvent::MessageDelivered(delivered) => {
            update_status(state, &delivered.message_id, MessageStatus::Delivered);
            Vec::new()
        }
        ServerEvent::MessageRead(read) => {
            update_status(state, &read.message_id, MessageStatus::Read);
            Vec::new()
        }
        ServerEvent::UnreadCountUpdated(unread) | ServerEvent::UnreadCountReset(unread) => {
            if state.is_me(&unread.user_email) {
                state.set_unread(&unread.sender_email, unread.count);
            }
            Vec::new()
        }
        ServerEvent::UserOnline(presence) => {
            state.set_online(&presence.email, true);
            Vec::new()
        }
        ServerEvent::UserOffline(presence) => {
            state.set_online(&presence.email, false);
            state.set_typing(&presence.email, false);
            Vec::new()
        }
        ServerEvent::Typing(typing) => {
            if !state.is_me(&typing.sender) {
                state.set_typing(&typing.sender, true);
            }
            Vec::new()
        }
        ServerEvent::StopTyping(typing) => {
            state.set_typing(&typing.sender, false);
            Vec::new()
        }
        ServerEvent::MessageError(err) => {
            warn!(error = %err.error, event = ?err.event, "Server rejected an event");
            if err.event.as_deref() == Some("send-message") {
                fail_oldest_pending(state);
            }
            state.set_error(err.error);
            Vec::new()
        }
    }
}

fn update_status(state: &mut ClientState, message_id: &str, status: MessageStatus) {
    let updated = state
        .conversations_mut()
        .any(|conv| conv.apply_status(message_id, status));
    if !updated {
        debug!(message_id, ?status, "Status update for unknown or already-advanced message");
    }
}

/// Send rejections carry no temporary id; the server processes a
/// connection's events in order, so the oldest unconfirmed send is the one
/// rejected.
fn fail_oldest_pending(state: &mut ClientState) {
    let oldest = state
        .conversations_mut()
        .filter_map(|conv| {
            conv.oldest_pending()
                .map(|(at, temp)| (at, conv.peer().to_string(), temp.to_string()))
        })
        .min_by_key(|(at, _, _)| *at);

    if let Some((_, peer, temp)) = oldest {
        state.conversation_mut(&peer).mark_failed(&temp);
    }
}

/// Events that mark everything received from `peer` as read: one
/// `message-read` per confirmed peer message not yet read, then a
/// `mark-conversation-read` for this client's counter. The local counter is
/// cleared immediately; statuses move when the server echoes the receipts.
pub fn read_receipts(state: &mut ClientState, peer: &str) -> Vec<ClientEvent> {
    state.set_unread(peer, 0);
    let me = state.email().to_string();

    let mut events: Vec<ClientEvent> = state
        .conversation(peer)
        .map(|conv| {
            conv.entries()
                .iter()
                .filter(|e| e.status < LocalStatus::Read && !state.is_me(&e.sender))
                .filter_map(|e| {
                    e.server_id().map(|id| {
                        ClientEvent::MessageRead(ReadAck {
                            message_id: Some(id.to_string()),
                            sender: Some(e.sender.clone()),
                            receiver: Some(e.receiver.clone()),
                            ..ReadAck::default()
                        })
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    events.push(ClientEvent::MarkConversationRead(ConversationRead {
        user_email: me,
        sender_email: peer.to_string(),
    }));
    events
}
