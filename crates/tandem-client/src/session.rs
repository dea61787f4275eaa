use tandem_shared::protocol::{ClientEvent, Presence, ServerEvent, Typing};
use tandem_shared::MessageKind;

use crate::api::ApiClient;
use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::events::{apply_event, read_receipts};
use crate::state::ClientState;

/// A logged-in client: REST access, the live event channel and local state.
pub struct Session {
    api: ApiClient,
    connection: Connection,
    state: ClientState,
}

impl Session {
    /// Log in, open the event channel, announce presence and load the
    /// unread snapshot.
    pub async fn start(base_url: &str, name: &str, email: &str, is_admin: bool) -> Result<Self> {
        let api = ApiClient::new(base_url)?;
        let (login, created) = api.login(name, email, is_admin).await?;
        tracing::info!(email = %login.user.email, created, "Logged in");

        let connection = Connection::connect(api.base_url()).await?;
        connection.send(ClientEvent::UserOnline(Presence {
            email: login.user.email.clone(),
            name: login.user.name.clone(),
        }))?;

        let mut state = ClientState::new(login.user.name, login.user.email);
        let unread = api.unread_counts(state.email()).await?;
        state.replace_unread(unread.unread_counts);

        Ok(Self {
            api,
            connection,
            state,
        })
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    /// Optimistically append a message to the conversation with `peer` and
    /// emit it.
    pub fn send_text(&mut self, peer: &str, text: &str) -> Result<()> {
        self.send(peer, text, MessageKind::Text)
    }

    /// Upload a file and send its URL as a media message.
    pub async fn send_media(&mut self, peer: &str, file_name: &str, mimetype: &str, data: Vec<u8>) -> Result<()> {
        let kind = MessageKind::from_mime(mimetype).ok_or_else(|| ClientError::Server {
            status: 415,
            message: format!("Unsupported file type: {mimetype}"),
        })?;
        let uploaded = self.api.upload(file_name, mimetype, data).await?;
        self.send(peer, &uploaded.url, kind)
    }

    fn send(&mut self, peer: &str, text: &str, kind: MessageKind) -> Result<()> {
        let email = self.state.email().to_string();
        let req = self
            .state
            .conversation_mut(peer)
            .send_local(text, kind, Some(email.as_str()));
        self.connection.send(ClientEvent::SendMessage(req))
    }

    pub fn typing(&self, peer: &str, started: bool) -> Result<()> {
        let typing = Typing {
            sender: self.state.email().to_string(),
            receiver: peer.to_string(),
        };
        self.connection.send(if started {
            ClientEvent::Typing(typing)
        } else {
            ClientEvent::StopTyping(typing)
        })
    }

    /// Send read receipts for everything received from `sender_email` and
    /// clear this client's unread counter for it.
    pub fn read_conversation(&mut self, sender_email: &str) -> Result<()> {
        for event in read_receipts(&mut self.state, sender_email) {
            self.connection.send(event)?;
        }
        Ok(())
    }

    /// Load the next older page of the conversation with `peer`.
    pub async fn load_older(&mut self, peer: &str, page_size: u32) -> Result<usize> {
        let conv = self.state.conversation_mut(peer);
        self.api.load_older(conv, page_size).await
    }

    /// Wait for the next server event, apply it and emit any
    /// acknowledgements. Returns the event, or `None` once disconnected.
    pub async fn pump(&mut self) -> Result<Option<ServerEvent>> {
        let Some(event) = self.connection.next_event().await else {
            return Ok(None);
        };
        for ack in apply_event(&mut self.state, event.clone()) {
            self.connection.send(ack)?;
        }
        Ok(Some(event))
    }

    /// Announce going offline. The connection closes when the session drops.
    pub fn leave(&self) -> Result<()> {
        self.connection.send(ClientEvent::UserOffline(Presence {
            email: self.state.email().to_string(),
            name: self.state.name().to_string(),
        }))
    }
}
