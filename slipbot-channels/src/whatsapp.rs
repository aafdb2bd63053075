//! WhatsApp gateway.
//!
//! Uses WhatsApp Business Cloud API for messaging.
//! Messages are received via webhook (push-based).

use crate::message::{ChannelMessage, MessageContent, CHAT_TYPE_KEY};
use crate::traits::{ChannelError, ChannelResult, ConnectionState, MessageGateway};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use slipbot_common::WhatsAppConfig;
use std::collections::HashMap;
use tokio::sync::RwLock;

const PDF_MIME: &str = "application/pdf";

/// WhatsApp gateway using Business Cloud API.
pub struct WhatsAppChannel {
    access_token: String,
    phone_number_id: String,
    verify_token: String,
    api_base: String,
    client: Client,
    state: RwLock<ConnectionState>,
}

impl WhatsAppChannel {
    /// Create a new WhatsApp channel. It stays disconnected until [`init`](Self::init).
    pub fn new(config: &WhatsAppConfig) -> Self {
        Self {
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            verify_token: config.verify_token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client: Client::new(),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    /// Get the verify token for webhook verification.
    pub fn verify_token(&self) -> &str {
        &self.verify_token
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/{}", self.api_base, self.phone_number_id)
        } else {
            format!("{}/{}/{path}", self.api_base, self.phone_number_id)
        }
    }

    /// Verify the access token against the phone number and mark the channel connected.
    pub async fn init(&self) -> ChannelResult<()> {
        *self.state.write().await = ConnectionState::Connecting;

        let result = self
            .client
            .get(self.url(""))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ChannelError::Auth(format!("Failed to verify WhatsApp token: {e}")));

        let next = match result {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                let status = resp.status();
                let error = resp.text().await.unwrap_or_default();
                Err(ChannelError::Auth(format!(
                    "WhatsApp auth failed ({status}): {error}"
                )))
            }
            Err(e) => Err(e),
        };

        *self.state.write().await = if next.is_ok() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };

        if next.is_ok() {
            tracing::info!("WhatsApp channel initialized");
        }
        next
    }

    /// Mark the channel disconnected.
    pub async fn shutdown(&self) {
        *self.state.write().await = ConnectionState::Disconnected;
        tracing::info!("WhatsApp channel shutdown");
    }

    async fn ensure_connected(&self) -> ChannelResult<()> {
        match *self.state.read().await {
            ConnectionState::Connected => Ok(()),
            other => Err(ChannelError::NotReady(other)),
        }
    }

    /// Parse an incoming webhook payload and extract text messages.
    pub fn parse_webhook_payload(&self, payload: &serde_json::Value) -> Vec<ChannelMessage> {
        let mut messages = Vec::new();

        let Some(entries) = payload.get("entry").and_then(|e| e.as_array()) else {
            return messages;
        };

        for entry in entries {
            let Some(changes) = entry.get("changes").and_then(|c| c.as_array()) else {
                continue;
            };

            for change in changes {
                let Some(value) = change.get("value") else {
                    continue;
                };

                let Some(msgs) = value.get("messages").and_then(|m| m.as_array()) else {
                    continue;
                };

                let profile_name = value
                    .pointer("/contacts/0/profile/name")
                    .and_then(|n| n.as_str());

                for msg in msgs {
                    if let Some(parsed) = parse_message(msg, profile_name) {
                        messages.push(parsed);
                    }
                }
            }
        }

        messages
    }

    async fn post_message(&self, body: serde_json::Value) -> ChannelResult<String> {
        let resp = self
            .client
            .post(self.url("messages"))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("WhatsApp send error: {e}")))?;

        let result = check_response(resp).await?;

        Ok(result
            .pointer("/messages/0/id")
            .and_then(|id| id.as_str())
            .unwrap_or("unknown")
            .to_string())
    }

    /// Upload a document and return its media id.
    async fn upload_media(&self, document: Vec<u8>, file_name: &str) -> ChannelResult<String> {
        let part = Part::bytes(document)
            .file_name(file_name.to_string())
            .mime_str(PDF_MIME)
            .map_err(|e| ChannelError::Internal(format!("Invalid MIME type: {e}")))?;

        let form = Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", PDF_MIME)
            .part("file", part);

        let resp = self
            .client
            .post(self.url("media"))
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("WhatsApp media upload error: {e}")))?;

        let result = check_response(resp).await?;

        result
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| ChannelError::Internal("media upload returned no id".into()))
    }
}

fn parse_message(msg: &serde_json::Value, profile_name: Option<&str>) -> Option<ChannelMessage> {
    let from = msg.get("from").and_then(|f| f.as_str())?;
    let sender = from.strip_prefix('+').unwrap_or(from).to_string();

    let Some(body) = msg.pointer("/text/body").and_then(|b| b.as_str()) else {
        tracing::debug!(from = %sender, "WhatsApp: skipping non-text message");
        return None;
    };

    if body.is_empty() {
        return None;
    }

    let timestamp = msg
        .get("timestamp")
        .and_then(|t| t.as_str())
        .and_then(|t| t.parse::<i64>().ok())
        .map(|ts| ts * 1000)
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    let id = msg
        .get("id")
        .and_then(|i| i.as_str())
        .unwrap_or("unknown")
        .to_string();

    let mut metadata = HashMap::new();
    if let Some(name) = profile_name {
        metadata.insert("profile_name".to_string(), name.to_string());
    }

    let chat_id = match msg.get("group_id").and_then(|g| g.as_str()) {
        Some(group) => {
            metadata.insert(CHAT_TYPE_KEY.to_string(), "group".to_string());
            group.to_string()
        }
        None => {
            metadata.insert(CHAT_TYPE_KEY.to_string(), "direct".to_string());
            sender.clone()
        }
    };

    Some(ChannelMessage {
        id,
        channel: "whatsapp".to_string(),
        chat_id,
        sender,
        content: MessageContent::Text {
            text: body.to_string(),
        },
        metadata,
        timestamp,
        trace_id: slipbot_common::logging::generate_trace_id(),
    })
}

async fn check_response(resp: Response) -> ChannelResult<serde_json::Value> {
    let status = resp.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        return Err(ChannelError::RateLimited { retry_after_secs });
    }

    if !status.is_success() {
        let error = resp.text().await.unwrap_or_default();
        return Err(ChannelError::SendFailed(format!(
            "WhatsApp API error ({status}): {error}"
        )));
    }

    resp.json()
        .await
        .map_err(|e| ChannelError::Internal(format!("Failed to parse response: {e}")))
}

/// Strip a leading `+`; the API wants bare digits.
fn recipient(address: &str) -> &str {
    address.strip_prefix('+').unwrap_or(address)
}

#[async_trait]
impl MessageGateway for WhatsAppChannel {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn send_text(&self, address: &str, text: &str) -> ChannelResult<()> {
        self.ensure_connected().await?;

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": recipient(address),
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text
            }
        });

        let message_id = self.post_message(body).await?;
        tracing::info!(to = %address, message_id = %message_id, "text message sent");
        Ok(())
    }

    async fn send_document(
        &self,
        address: &str,
        document: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> ChannelResult<()> {
        self.ensure_connected().await?;

        let media_id = self.upload_media(document, file_name).await?;

        let mut doc = serde_json::json!({
            "id": media_id,
            "filename": file_name,
        });
        if let Some(caption) = caption {
            doc["caption"] = serde_json::Value::String(caption.to_string());
        }

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": recipient(address),
            "type": "document",
            "document": doc
        });

        let message_id = self.post_message(body).await?;
        tracing::info!(to = %address, file_name, message_id = %message_id, "document sent");
        Ok(())
    }
}
