use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};
use url::Url;

use crate::error::{RelayError, Result};
use crate::models::chat::{ChannelRef, ChatMessage, ChatUser, IndicatorEvent, NewMessage};
use crate::utils::log_helpers::truncate_log;

/// Operations the relay needs from the chat backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn upsert_user(&self, user: &ChatUser) -> Result<()>;
    async fn delete_user(&self, user_id: &str, hard_delete: bool) -> Result<()>;
    async fn add_members(&self, channel: &ChannelRef, user_ids: &[String]) -> Result<()>;
    async fn send_message(&self, channel: &ChannelRef, message: NewMessage) -> Result<ChatMessage>;
    async fn partial_update_message(&self, message_id: &str, text: &str, user_id: &str)
        -> Result<()>;
    async fn send_event(
        &self,
        channel: &ChannelRef,
        event: &IndicatorEvent,
        user_id: &str,
    ) -> Result<()>;
    fn create_token(&self, user_id: &str, expiration: i64, issued_at: i64) -> Result<String>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserTokenClaims {
    pub user_id: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Serialize)]
struct ServerTokenClaims {
    server: bool,
}

pub fn sign_user_token(secret: &str, user_id: &str, expiration: i64, issued_at: i64) -> Result<String> {
    let claims = UserTokenClaims {
        user_id: user_id.to_string(),
        exp: expiration,
        iat: issued_at,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Server-side client for the Stream Chat REST API.
#[derive(Clone)]
pub struct StreamChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    server_token: String,
}

impl StreamChatClient {
    pub fn new(api_key: &str, api_secret: &str, base_url: &str) -> Result<Self> {
        let server_token = encode(
            &Header::default(),
            &ServerTokenClaims { server: true },
            &EncodingKey::from_secret(api_secret.as_bytes()),
        )?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            server_token,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .map_err(|e| RelayError::Chat(format!("invalid url for {path}: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("api_key", &self.api_key);
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn channel_path(channel: &ChannelRef) -> String {
        format!(
            "channels/{}/{}",
            urlencoding::encode(&channel.channel_type),
            urlencoding::encode(&channel.channel_id)
        )
    }

    async fn call(&self, method: Method, url: Url, body: Option<Value>) -> Result<Value> {
        debug!("[CHAT] {} {}", method, url.path());
        let mut req = self
            .client
            .request(method.clone(), url.clone())
            .header("Authorization", &self.server_token)
            .header("stream-auth-type", "jwt");
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let raw = resp.text().await?;
        if !status.is_success() {
            let err_text = truncate_log(&raw, 2000);
            error!(
                "[CHAT] request failed: {} {} status={}, error={}",
                method,
                url.path(),
                status,
                err_text
            );
            return Err(RelayError::Chat(format!("status {}: {}", status, err_text)));
        }
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl ChatBackend for StreamChatClient {
    async fn upsert_user(&self, user: &ChatUser) -> Result<()> {
        let url = self.url("users", &[])?;
        let mut users = serde_json::Map::new();
        users.insert(user.id.clone(), serde_json::to_value(user)?);
        self.call(Method::POST, url, Some(json!({ "users": users })))
            .await
            .map(|_| ())
    }

    async fn delete_user(&self, user_id: &str, hard_delete: bool) -> Result<()> {
        let hard = if hard_delete { "true" } else { "false" };
        let url = self.url(
            &format!("users/{}", urlencoding::encode(user_id)),
            &[("hard_delete", hard)],
        )?;
        self.call(Method::DELETE, url, None).await.map(|_| ())
    }

    async fn add_members(&self, channel: &ChannelRef, user_ids: &[String]) -> Result<()> {
        let url = self.url(&Self::channel_path(channel), &[])?;
        self.call(Method::POST, url, Some(json!({ "add_members": user_ids })))
            .await
            .map(|_| ())
    }

    async fn send_message(&self, channel: &ChannelRef, message: NewMessage) -> Result<ChatMessage> {
        let url = self.url(&format!("{}/message", Self::channel_path(channel)), &[])?;
        let resp = self
            .call(Method::POST, url, Some(json!({ "message": message })))
            .await?;
        match resp.get("message") {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(ChatMessage {
                id: message.id,
                cid: Some(channel.cid()),
                text: message.text,
                user: Some(ChatUser {
                    id: message.user_id,
                    name: None,
                }),
                ai_generated: message.ai_generated,
            }),
        }
    }

    async fn partial_update_message(
        &self,
        message_id: &str,
        text: &str,
        user_id: &str,
    ) -> Result<()> {
        let url = self.url(&format!("messages/{}", urlencoding::encode(message_id)), &[])?;
        self.call(
            Method::PUT,
            url,
            Some(json!({ "set": { "text": text }, "user_id": user_id })),
        )
        .await
        .map(|_| ())
    }

    async fn send_event(
        &self,
        channel: &ChannelRef,
        event: &IndicatorEvent,
        user_id: &str,
    ) -> Result<()> {
        let url = self.url(&format!("{}/event", Self::channel_path(channel)), &[])?;
        let mut payload = serde_json::to_value(event)?;
        payload["user_id"] = Value::String(user_id.to_string());
        self.call(Method::POST, url, Some(json!({ "event": payload })))
            .await
            .map(|_| ())
    }

    fn create_token(&self, user_id: &str, expiration: i64, issued_at: i64) -> Result<String> {
        sign_user_token(&self.api_secret, user_id, expiration, issued_at)
    }
}
