// ============================
// crates/sync-lib/src/api/http.rs
// ============================
//! reqwest implementation of [`ApiClient`].
use async_trait::async_trait;
use reqwest::{multipart, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};
use vaquerama_common::{Conversation, ConversationId, Message, MessageId, Notification, User};

use super::{
    ApiClient, ConversationsEnvelope, ErrorBody, LoginResponse, MediaUpload, MessagesEnvelope,
    NotificationsEnvelope, SendResponse, UserEnvelope,
};
use crate::auth::CredentialStore;
use crate::config::Settings;
use crate::error::SyncError;

/// JSON-over-HTTP client with bearer injection
///
/// A 401 from any endpoint clears the stored credential before the error is
/// returned, so every caller sees a signed-out state.
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
}

impl HttpApiClient {
    pub fn new(settings: &Settings, credentials: Arc<CredentialStore>) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.credentials.token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, SyncError> {
        let response = self.authorized(req).send().await?;
        let status = response.status();
        debug!("{} {}", status.as_u16(), response.url().path());

        if status == StatusCode::UNAUTHORIZED {
            if let Err(e) = self.credentials.clear().await {
                warn!("Failed to clear rejected credential: {}", e);
            }
            let message = Self::error_message(response).await;
            return Err(SyncError::Unauthorized(message));
        }
        if !status.is_success() {
            let message = Self::error_message(response).await;
            return Err(SyncError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, SyncError> {
        Ok(self.send(req).await?.json::<T>().await?)
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<ErrorBody>().await {
            Ok(ErrorBody {
                message: Some(message),
                ..
            })
            | Ok(ErrorBody {
                error: Some(message),
                ..
            }) => message,
            _ => status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
        }
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn login(&self, email: &str, password: &str) -> Result<String, SyncError> {
        let req = self
            .client
            .post(self.url("auth/login"))
            .json(&serde_json::json!({ "email": email, "password": password }));
        let resp: LoginResponse = self.send_json(req).await?;
        resp.token.ok_or_else(|| {
            SyncError::Unauthorized(resp.message.unwrap_or_else(|| "Invalid credentials".to_string()))
        })
    }

    async fn current_user(&self) -> Result<User, SyncError> {
        let env: UserEnvelope = self.send_json(self.client.get(self.url("users/me"))).await?;
        Ok(env.user)
    }

    async fn conversations(&self) -> Result<Vec<Conversation>, SyncError> {
        let env: ConversationsEnvelope =
            self.send_json(self.client.get(self.url("conversations"))).await?;
        Ok(env.conversations)
    }

    async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, SyncError> {
        let env: MessagesEnvelope = self
            .send_json(self.client.get(self.url(&format!("messages/{conversation_id}"))))
            .await?;
        Ok(env.messages)
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: Option<&str>,
        media: Option<&MediaUpload>,
    ) -> Result<MessageId, SyncError> {
        let url = self.url(&format!("messages/{conversation_id}"));
        let req = match media {
            Some(media) => {
                let part = multipart::Part::bytes(media.bytes.clone())
                    .file_name(media.filename.clone())
                    .mime_str(&media.mime)?;
                let mut form = multipart::Form::new().part("media", part);
                if let Some(content) = content {
                    form = form.text("content", content.to_string());
                }
                self.client.post(url).multipart(form)
            },
            None => self
                .client
                .post(url)
                .json(&serde_json::json!({ "content": content })),
        };
        let resp: SendResponse = self.send_json(req).await?;
        Ok(resp.message_id)
    }

    async fn notifications(&self) -> Result<Vec<Notification>, SyncError> {
        let env: NotificationsEnvelope =
            self.send_json(self.client.get(self.url("notifications"))).await?;
        Ok(env.notifications)
    }

    async fn mark_all_notifications_read(&self) -> Result<(), SyncError> {
        self.send(self.client.put(self.url("notifications/read/all")))
            .await?;
        Ok(())
    }
}
