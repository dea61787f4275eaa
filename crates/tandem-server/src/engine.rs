//! Delivery protocol engine.
//!
//! The single writer to the message and user stores. Every client event is
//! validated here, persisted through [`SharedDb`], and fanned out through
//! the [`Hub`] to the rooms of the participants it concerns.

use chrono::Utc;
use tandem_shared::protocol::{
    ClientEvent, Delivered, Presence, Read, ReadAck, SendMessage, ServerEvent, Typing, UnreadCount,
};
use tandem_shared::validation::{validate_email, validate_send};
use tandem_shared::{normalize_email, ChatMessage, MessageId, MessageStatus, ValidationError};
use tandem_store::{StatusChange, StoreError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::db::SharedDb;
use crate::hub::{ConnectionId, Hub};
use crate::rate_limit::RateLimiter;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("rate limited")]
    RateLimited,

    #[error("not found")]
    NotFound,

    #[error("upstream failure: {0}")]
    Upstream(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => EngineError::NotFound,
            other => EngineError::Upstream(other),
        }
    }
}

impl EngineError {
    /// Text shown to the originating client. Never carries store details.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(e) => format!("Invalid message: {e}"),
            Self::RateLimited => {
                "Rate limit exceeded. Please wait before sending more messages.".to_string()
            }
            Self::NotFound => "Message not found".to_string(),
            Self::Upstream(_) => "Failed to process message".to_string(),
        }
    }
}

/// Room keys of the two sides of a message or signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participants {
    pub sender: String,
    pub receiver: String,
    /// Whether the receiver resolved to a registered user.
    pub receiver_known: bool,
}

impl Participants {
    pub fn keys(&self) -> [&str; 2] {
        [self.sender.as_str(), self.receiver.as_str()]
    }
}

#[derive(Clone)]
pub struct Engine {
    db: SharedDb,
    hub: Hub,
    send_limiter: RateLimiter<String>,
}

impl Engine {
    pub fn new(db: SharedDb, hub: Hub, send_limiter: RateLimiter<String>) -> Self {
        Self {
            db,
            hub,
            send_limiter,
        }
    }

    pub fn db(&self) -> &SharedDb {
        &self.db
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    // ------------------------------------------------------------------
    // Event entry point
    // ------------------------------------------------------------------

    /// Handle one inbound event from `origin`. Failures are reported back to
    /// that connection only.
    pub async fn dispatch(&self, origin: ConnectionId, event: ClientEvent) {
        let name = event.name();
        debug!(conn = %origin, event = name, "Dispatching");

        let result = match event {
            ClientEvent::SendMessage(req) => self.send(Some(origin), req).await.map(|_| ()),
            ClientEvent::UserOnline(p) => self.set_presence(origin, p, true).await,
            ClientEvent::UserOffline(p) => self.set_presence(origin, p, false).await,
            ClientEvent::Typing(t) => {
                self.typing(Some(origin), t, true).await;
                Ok(())
            }
            ClientEvent::StopTyping(t) => {
                self.typing(Some(origin), t, false).await;
                Ok(())
            }
            ClientEvent::MessageDelivered(ack) => {
                self.mark_delivered(&ack.message_id).await.map(|_| ())
            }
            ClientEvent::MessageRead(ack) => self.mark_read(ack).await,
            ClientEvent::MarkConversationRead(req) => self
                .mark_conversation_read(&req.user_email, &req.sender_email)
                .await
                .map(|_| ()),
        };

        if let Err(err) = result {
            self.report(origin, name, err);
        }
    }

    fn report(&self, origin: ConnectionId, event: &'static str, err: EngineError) {
        match &err {
            EngineError::NotFound => {
                warn!(conn = %origin, event, "Referenced record not found, ignoring");
                return;
            }
            EngineError::Upstream(e) => {
                error!(conn = %origin, event, error = %e, "Store failure");
            }
            other => {
                warn!(conn = %origin, event, error = %other, "Rejected event");
            }
        }
        self.hub
            .send_to(origin, ServerEvent::rejected(event, err.user_message()));
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Validate, rate-limit, persist and relay a message. Returns the stored
    /// message with the client's temporary id attached.
    pub async fn send(
        &self,
        origin: Option<ConnectionId>,
        req: SendMessage,
    ) -> Result<ChatMessage, EngineError> {
        let valid = validate_send(&req)?;

        let limiter_key = normalize_email(valid.sender_email.as_deref().unwrap_or(&valid.sender));
        if !self.send_limiter.check(&limiter_key).await {
            warn!(sender = %limiter_key, "Send rate limit exceeded");
            return Err(EngineError::RateLimited);
        }

        let mut message = ChatMessage {
            id: MessageId::generate(),
            sender: valid.sender,
            receiver: valid.receiver,
            sender_email: valid.sender_email,
            text: valid.text,
            kind: valid.kind,
            status: MessageStatus::Sent,
            timestamp: Utc::now(),
            delivered_at: None,
            read_at: None,
            temp_id: None,
        };

        let stored = message.clone();
        self.db.call(move |db| db.insert_message(&stored)).await?;
        message.temp_id = valid.temp_id;

        info!(
            message_id = %message.id,
            sender = %message.sender,
            receiver = %message.receiver,
            kind = message.kind.as_str(),
            "Message persisted"
        );

        let participants = self
            .resolve(&message.sender, message.sender_email.as_deref(), &message.receiver)
            .await;
        self.route(
            origin,
            &participants,
            ServerEvent::ReceiveMessage(message.clone()),
        );

        // The message is already out; a failed counter update is only logged.
        if participants.receiver_known {
            let owner = participants.receiver.clone();
            let key = participants.sender.clone();
            match self.db.call(move |db| db.increment_unread(&owner, &key)).await {
                Ok(count) => {
                    let event = ServerEvent::UnreadCountUpdated(UnreadCount {
                        user_email: participants.receiver.clone(),
                        sender_email: participants.sender.clone(),
                        count,
                    });
                    self.hub
                        .send_to_identities(&participants.keys(), &event, None);
                }
                Err(e) => {
                    error!(message_id = %message.id, error = %e, "Failed to update unread count");
                }
            }
        } else {
            warn!(receiver = %message.receiver, "Receiver is not registered, unread count skipped");
        }

        Ok(message)
    }

    /// `sent → delivered`. Temporary ids and repeated receipts are no-ops.
    pub async fn mark_delivered(&self, message_id: &str) -> Result<Option<ChatMessage>, EngineError> {
        let Some(id) = MessageId::parse(message_id) else {
            warn!(message_id, "Ignoring delivery receipt for a non-store id");
            return Ok(None);
        };

        let change = self
            .db
            .call(move |db| db.mark_message_delivered(&id, Utc::now()))
            .await?;

        match change {
            StatusChange::Advanced(message) => {
                debug!(message_id = %message.id, "Message delivered");
                let participants = self.route_keys(&message).await;
                let event = ServerEvent::MessageDelivered(Delivered {
                    message_id: message.id.to_string(),
                });
                self.hub
                    .send_to_identities(&participants.keys(), &event, None);
                Ok(Some(message))
            }
            StatusChange::Unchanged(message) => {
                debug!(message_id = %message.id, status = message.status.as_str(), "Already delivered");
                Ok(None)
            }
        }
    }

    /// Apply a read acknowledgement. The per-message transition and the
    /// admin counter reset are independent; both run when both inputs are
    /// present, and the first failure is returned.
    pub async fn mark_read(&self, ack: ReadAck) -> Result<(), EngineError> {
        let mut failure = None;

        if let Some(id) = ack.message_id.as_deref().filter(|id| !id.is_empty()) {
            if let Err(e) = self.mark_message_read(id).await {
                failure = Some(e);
            }
        }

        if let (Some(admin), Some(user)) = (ack.admin.as_deref(), ack.user.as_deref()) {
            if let Err(e) = self.mark_conversation_read(admin, user).await {
                failure.get_or_insert(e);
            }
        }

        failure.map_or(Ok(()), Err)
    }

    /// `sent | delivered → read`. Repeating it leaves `read_at` untouched.
    pub async fn mark_message_read(
        &self,
        message_id: &str,
    ) -> Result<Option<ChatMessage>, EngineError> {
        let Some(id) = MessageId::parse(message_id) else {
            warn!(message_id, "Ignoring read receipt for a non-store id");
            return Ok(None);
        };

        let change = self
            .db
            .call(move |db| db.mark_message_read(&id, Utc::now()))
            .await?;

        let StatusChange::Advanced(message) = change else {
            debug!(message_id, "Already read");
            return Ok(None);
        };

        debug!(message_id = %message.id, "Message read");
        let participants = self.route_keys(&message).await;
        let event = ServerEvent::MessageRead(Read {
            message_id: message.id.to_string(),
            sender: message.sender.clone(),
            receiver: message.receiver.clone(),
        });
        self.hub
            .send_to_identities(&participants.keys(), &event, None);
        Ok(Some(message))
    }

    /// Zero `user`'s unread counter for `sender`, keeping the key.
    pub async fn mark_conversation_read(
        &self,
        user: &str,
        sender: &str,
    ) -> Result<UnreadCount, EngineError> {
        if user.trim().is_empty() {
            return Err(ValidationError::Missing("userEmail").into());
        }
        if sender.trim().is_empty() {
            return Err(ValidationError::Missing("senderEmail").into());
        }

        let (user, sender) = (user.to_string(), sender.to_string());
        let (owner, key) = self
            .db
            .call(move |db| {
                let owner = db.find_user(&user)?.ok_or(StoreError::NotFound)?.email;
                let key = db
                    .find_user(&sender)?
                    .map(|u| u.email)
                    .unwrap_or_else(|| normalize_email(&sender));
                db.reset_unread(&owner, &key)?;
                Ok((owner, key))
            })
            .await?;

        info!(user = %owner, sender = %key, "Conversation marked read");

        let reset = UnreadCount {
            user_email: owner,
            sender_email: key,
            count: 0,
        };
        self.hub.send_to_identities(
            &[reset.user_email.as_str(), reset.sender_email.as_str()],
            &ServerEvent::UnreadCountReset(reset.clone()),
            None,
        );
        Ok(reset)
    }

    // ------------------------------------------------------------------
    // Presence and typing
    // ------------------------------------------------------------------

    /// Record an identity coming online or going offline on `origin`.
    pub async fn set_presence(
        &self,
        origin: ConnectionId,
        presence: Presence,
        online: bool,
    ) -> Result<(), EngineError> {
        let email = validate_email(&presence.email)?;
        let name = match presence.name.trim() {
            "" => email.clone(),
            n => n.to_string(),
        };

        if online {
            let previous = self.hub.identity(origin);
            self.hub.bind(origin, &email, &name);

            let (e, n) = (email.clone(), name.clone());
            let user = self
                .db
                .call(move |db| db.set_presence(&e, &n, true, Utc::now()))
                .await?;
            info!(conn = %origin, email = %user.email, "User online");

            let event = ServerEvent::UserOnline(Presence {
                email: user.email,
                name: user.name,
            });
            self.hub.broadcast(&event, Some(origin));

            if let Some(prev) = previous.filter(|p| p.email != email) {
                if !self.hub.is_online(&prev.email) {
                    self.go_offline(&prev.email, &prev.name, Some(origin)).await?;
                }
            }
            return Ok(());
        }

        if self.hub.identity(origin).is_some_and(|i| i.email == email) {
            self.hub.unbind(origin);
        }
        if self.hub.is_online(&email) {
            debug!(email = %email, "Other connections remain, staying online");
            return Ok(());
        }
        self.go_offline(&email, &name, Some(origin)).await
    }

    /// Socket closed. Without an explicit offline event the bound identity
    /// still goes offline once its last connection is gone.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let Some((identity, last)) = self.hub.disconnect(conn) else {
            return;
        };
        if !last {
            debug!(conn = %conn, email = %identity.email, "Connection closed, identity still online");
            return;
        }
        if let Err(e) = self.go_offline(&identity.email, &identity.name, None).await {
            error!(email = %identity.email, error = %e, "Failed to record implicit offline");
        }
    }

    async fn go_offline(
        &self,
        email: &str,
        name: &str,
        except: Option<ConnectionId>,
    ) -> Result<(), EngineError> {
        let (e, n) = (email.to_string(), name.to_string());
        let user = self
            .db
            .call(move |db| db.set_presence(&e, &n, false, Utc::now()))
            .await?;
        info!(email = %user.email, "User offline");

        let event = ServerEvent::UserOffline(Presence {
            email: user.email,
            name: user.name,
        });
        self.hub.broadcast(&event, except);
        Ok(())
    }

    /// Relay a typing signal to both sides, never back to its origin.
    pub async fn typing(&self, origin: Option<ConnectionId>, signal: Typing, started: bool) {
        if signal.sender.trim().is_empty() || signal.receiver.trim().is_empty() {
            debug!("Dropping typing signal without sender or receiver");
            return;
        }

        let bound = origin.and_then(|o| self.hub.identity(o)).map(|i| i.email);
        let participants = self
            .resolve(&signal.sender, bound.as_deref(), &signal.receiver)
            .await;

        let event = if started {
            ServerEvent::Typing(signal)
        } else {
            ServerEvent::StopTyping(signal)
        };
        self.hub
            .send_to_identities(&participants.keys(), &event, origin);
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Room keys for a stored message.
    pub async fn route_keys(&self, message: &ChatMessage) -> Participants {
        self.resolve(&message.sender, message.sender_email.as_deref(), &message.receiver)
            .await
    }

    /// Map free-form identifiers (email or display name) onto room keys.
    /// Lookup failures fall back to the normalized identifier.
    async fn resolve(
        &self,
        sender: &str,
        sender_email: Option<&str>,
        receiver: &str,
    ) -> Participants {
        let fallback = Participants {
            sender: normalize_email(sender_email.unwrap_or(sender)),
            receiver: normalize_email(receiver),
            receiver_known: false,
        };

        let (s, s_email, r) = (
            sender.to_string(),
            sender_email.map(str::to_string),
            receiver.to_string(),
        );
        let lookup = self
            .db
            .call(move |db| {
                let sender_key = match s_email {
                    Some(e) => Some(normalize_email(&e)),
                    None => db.find_user(&s)?.map(|u| u.email),
                };
                let receiver_key = db.find_user(&r)?.map(|u| u.email);
                Ok((sender_key, receiver_key))
            })
            .await;

        match lookup {
            Ok((sender_key, receiver_key)) => Participants {
                sender: sender_key.unwrap_or(fallback.sender),
                receiver_known: receiver_key.is_some(),
                receiver: receiver_key.unwrap_or(fallback.receiver),
            },
            Err(e) => {
                warn!(error = %e, "Participant lookup failed, routing by raw identifiers");
                fallback
            }
        }
    }

    /// Deliver to both participants' rooms, and to `origin` even when it
    /// has not bound an identity yet, so senders always see their echo.
    fn route(&self, origin: Option<ConnectionId>, participants: &Participants, event: ServerEvent) {
        self.hub
            .send_to_identities(&participants.keys(), &event, None);

        if let Some(origin) = origin {
            let in_rooms = self
                .hub
                .identity(origin)
                .is_some_and(|i| participants.keys().contains(&i.email.as_str()));
            if !in_rooms {
                self.hub.send_to(origin, event);
            }
        }
    }
}
