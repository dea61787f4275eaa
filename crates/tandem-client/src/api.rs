use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tandem_shared::api::{
    ErrorBody, LoginRequest, LoginResponse, MarkReadRequest, MessagePage, SuccessResponse,
    TotalUnreadResponse, UnreadCountsResponse, UploadResponse, UserWithLastMessage, UsersPage,
};
use tracing::debug;

use crate::conversation::Conversation;
use crate::error::{ClientError, Result};

/// Thin wrapper over the server's REST surface.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/').to_string();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(base));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<bool> {
        let resp = self.http.get(self.url("/health")).send().await?;
        Ok(resp.status().is_success())
    }

    /// Returns the profile and whether it was newly created.
    pub async fn login(&self, name: &str, email: &str, is_admin: bool) -> Result<(LoginResponse, bool)> {
        let req = LoginRequest {
            name: name.to_string(),
            email: email.to_string(),
            is_admin,
        };
        let resp = self.http.post(self.url("/login")).json(&req).send().await?;
        let created = resp.status() == StatusCode::CREATED;
        Ok((decode(resp).await?, created))
    }

    /// One page of the conversation between `user1` and `user2`, oldest first.
    pub async fn messages(&self, user1: &str, user2: &str, limit: u32, offset: u32) -> Result<MessagePage> {
        let resp = self
            .http
            .get(self.url("/messages"))
            .query(&[("user1", user1), ("user2", user2)])
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        decode(resp).await
    }

    /// The admin's thread with `user_email`.
    pub async fn conversation(&self, user_email: &str, limit: u32, offset: u32) -> Result<MessagePage> {
        let resp = self
            .http
            .get(self.url(&format!("/conversation/{user_email}")))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn users(&self, limit: u32, offset: u32) -> Result<UsersPage> {
        let resp = self
            .http
            .get(self.url("/users"))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn users_with_last_message(&self) -> Result<Vec<UserWithLastMessage>> {
        let resp = self.http.get(self.url("/users-with-last-message")).send().await?;
        decode(resp).await
    }

    pub async fn unread_counts(&self, user_email: &str) -> Result<UnreadCountsResponse> {
        let resp = self
            .http
            .get(self.url(&format!("/unread-counts/{user_email}")))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn total_unread(&self, user_email: &str) -> Result<u64> {
        let resp = self
            .http
            .get(self.url(&format!("/total-unread/{user_email}")))
            .send()
            .await?;
        let body: TotalUnreadResponse = decode(resp).await?;
        Ok(body.total_unread)
    }

    pub async fn mark_read(&self, user_email: &str, sender_email: &str) -> Result<()> {
        let req = MarkReadRequest {
            user_email: user_email.to_string(),
            sender_email: sender_email.to_string(),
        };
        let resp = self.http.post(self.url("/mark-read")).json(&req).send().await?;
        let _: SuccessResponse = decode(resp).await?;
        Ok(())
    }

    /// Upload one media file. The returned `url` is what a media message
    /// carries as its text.
    pub async fn upload(&self, file_name: &str, mimetype: &str, data: Vec<u8>) -> Result<UploadResponse> {
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(mimetype)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self.http.post(self.url("/upload")).multipart(form).send().await?;
        decode(resp).await
    }

    /// Fetch the page just older than what `conv` holds and prepend it.
    /// Returns the number of new entries; zero once history is exhausted.
    pub async fn load_older(&self, conv: &mut Conversation, page_size: u32) -> Result<usize> {
        if !conv.has_more() {
            return Ok(0);
        }
        let offset = conv.next_offset();
        let page = self.messages(conv.me(), conv.peer(), page_size, offset).await?;
        let inserted = conv.prepend_history(&page.messages, page.pagination.has_more);
        debug!(peer = %conv.peer(), offset, inserted, "Loaded older history");
        Ok(inserted)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("Unknown error").to_string(),
    };
    Err(ClientError::Server {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let api = ApiClient::new("http://localhost:5000/").unwrap();
        assert_eq!(api.base_url(), "http://localhost:5000");
        assert_eq!(api.url("/health"), "http://localhost:5000/health");
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(matches!(
            ApiClient::new("ws://localhost:5000"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn exhausted_history_skips_the_request() {
        // Unroutable base: any request would fail.
        let api = ApiClient::new("http://127.0.0.1:9").unwrap();
        let mut conv = Conversation::new("u@x.com", "admin@chat.com");
        conv.prepend_history(&[], false);
        assert_eq!(api.load_older(&mut conv, 20).await.unwrap(), 0);
    }
}
