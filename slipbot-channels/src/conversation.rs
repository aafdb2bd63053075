//! Self-registration conversation over chat.
//!
//! A contact sends the trigger keyword. If its address matches a registered
//! mobile the slip is delivered straight away. Otherwise the engine asks for an
//! employee id, registers the contact's number against it and delivers the
//! slip.
//!
//! ```text
//!            trigger, no match
//!   Idle ─────────────────────────→ AwaitingEmployeeId ──unknown id──┐
//!    ↑  ↖                                │         ↑                 │
//!    │   └──── known id (registered) ────┘         └─────────────────┘
//!    └──────── swept after max age
//! ```
//!
//! Conversation state is volatile and lost on restart.

use crate::message::ChannelMessage;
use crate::traits::MessageGateway;
use chrono::{DateTime, Utc};
use slipbot_common::{ConversationConfig, PhoneMatcher, Result};
use slipbot_directory::{DirectoryService, Employee};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;

const SLIP_UNAVAILABLE_TEXT: &str = "Your salary slip is not available yet. Please contact HR.";
const ASK_EMPLOYEE_ID_TEXT: &str = "Hello! 👋\n\nI don't have your mobile number registered.\n\nPlease share your Employee ID to proceed.";
const TRIGGER_FAILED_TEXT: &str = "Sorry, something went wrong. Please try again later.";
const EMPLOYEE_ID_FAILED_TEXT: &str =
    "Sorry, something went wrong while processing your Employee ID. Please try again.";

/// Caption sent along with a slip document.
pub fn slip_caption(employee: &Employee, sender_signature: &str) -> String {
    format!(
        "Dear {},\n\nPlease find attached your salary slip. 📄\n\nRegards,\n{sender_signature}",
        employee.display_name("Employee")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitingEmployeeId,
}

/// A tracked conversation. Contacts without one are idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
}

/// What the engine did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Group message, non-text, or idle chatter
    Ignored,
    /// Matched by mobile and the slip was sent
    SlipDelivered { employee_id: String },
    /// Matched (or registered) but no slip is indexed
    SlipUnavailable { employee_id: String },
    /// No mobile match; now waiting for an employee id
    AskedForEmployeeId,
    /// Reply was not a known employee id; still waiting
    UnknownEmployeeId { employee_id: String },
    /// Contact registered against the employee
    Registered {
        employee_id: String,
        slip_delivered: bool,
    },
    /// Handling failed; the contact got the generic failure notice
    Failed,
}

pub struct ConversationEngine {
    directory: Arc<DirectoryService>,
    gateway: Arc<dyn MessageGateway>,
    matcher: PhoneMatcher,
    trigger_keyword: String,
    max_age: Duration,
    sender_signature: String,
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl ConversationEngine {
    pub fn new(
        directory: Arc<DirectoryService>,
        gateway: Arc<dyn MessageGateway>,
        matcher: PhoneMatcher,
        config: &ConversationConfig,
    ) -> Self {
        Self {
            directory,
            gateway,
            matcher,
            trigger_keyword: config.trigger_keyword.trim().to_lowercase(),
            max_age: config.max_age(),
            sender_signature: config.sender_signature.clone(),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    /// Current conversation of a contact, if any.
    pub async fn conversation(&self, contact: &str) -> Option<Conversation> {
        self.conversations
            .lock()
            .await
            .get(&PhoneMatcher::normalize(contact))
            .cloned()
    }

    pub async fn active_conversations(&self) -> usize {
        self.conversations.lock().await.len()
    }

    /// Handle one inbound message. Never returns an error: failures are
    /// logged and answered with a generic notice.
    ///
    /// Messages from the same contact must not be handled concurrently; the
    /// dispatcher guarantees this.
    pub async fn handle_message(&self, message: &ChannelMessage) -> Outcome {
        if message.is_group() {
            tracing::debug!(chat_id = %message.chat_id, "ignoring group message");
            return Outcome::Ignored;
        }

        let Some(text) = message.text().map(str::trim).filter(|t| !t.is_empty()) else {
            return Outcome::Ignored;
        };

        let contact = PhoneMatcher::normalize(&message.sender);
        if contact.is_empty() {
            tracing::warn!(sender = %message.sender, "ignoring message without a phone number");
            return Outcome::Ignored;
        }

        let span = slipbot_common::channel_span!(message.channel.as_str(), message.trace_id, contact);

        async {
            tracing::info!(text = %text.chars().take(50).collect::<String>(), "received message");

            if text.to_lowercase() == self.trigger_keyword {
                return match self.handle_trigger(&contact).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(error = %e, "error handling trigger keyword");
                        self.notify_failure(&contact, TRIGGER_FAILED_TEXT).await
                    }
                };
            }

            let awaiting = self
                .conversations
                .lock()
                .await
                .get(&contact)
                .is_some_and(|c| c.stage == Stage::AwaitingEmployeeId);

            if !awaiting {
                return Outcome::Ignored;
            }

            match self.handle_employee_id(&contact, text).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, employee_id = %text, "error handling employee id");
                    self.notify_failure(&contact, EMPLOYEE_ID_FAILED_TEXT).await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_trigger(&self, contact: &str) -> Result<Outcome> {
        let address = self.matcher.to_address(contact);

        let Some(listing) = self.directory.find_by_contact(contact).await? else {
            self.gateway.send_text(&address, ASK_EMPLOYEE_ID_TEXT).await?;
            self.conversations.lock().await.insert(
                contact.to_string(),
                Conversation {
                    stage: Stage::AwaitingEmployeeId,
                    started_at: Utc::now(),
                },
            );
            return Ok(Outcome::AskedForEmployeeId);
        };

        self.conversations.lock().await.remove(contact);

        let employee = listing.employee;
        if listing.salary_slip_available {
            self.deliver_slip(&employee, &address).await?;
            Ok(Outcome::SlipDelivered {
                employee_id: employee.id,
            })
        } else {
            let text = format!(
                "Hello {}! ✋\n\nYour Employee ID: {}\n\n{SLIP_UNAVAILABLE_TEXT}",
                employee.display_name("there"),
                employee.id
            );
            self.gateway.send_text(&address, &text).await?;
            Ok(Outcome::SlipUnavailable {
                employee_id: employee.id,
            })
        }
    }

    async fn handle_employee_id(&self, contact: &str, employee_id: &str) -> Result<Outcome> {
        let address = self.matcher.to_address(contact);

        let record = match self.directory.get_employee(employee_id).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                let text = format!(
                    "Employee ID \"{employee_id}\" not found. ❌\n\nPlease check and send the correct Employee ID."
                );
                self.gateway.send_text(&address, &text).await?;
                return Ok(Outcome::UnknownEmployeeId {
                    employee_id: employee_id.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        let updated = self
            .directory
            .update_mobile(&record.employee.id, Some(contact))
            .await?;
        self.conversations.lock().await.remove(contact);

        let employee = updated.employee;
        tracing::info!(employee_id = %employee.id, "contact registered");

        let text = format!(
            "Thank you, {}! ✅\n\nYour mobile number has been registered.",
            employee.display_name(&employee.id)
        );
        self.gateway.send_text(&address, &text).await?;

        if updated.salary_slip_available {
            self.deliver_slip(&employee, &address).await?;
        } else {
            self.gateway.send_text(&address, SLIP_UNAVAILABLE_TEXT).await?;
        }

        Ok(Outcome::Registered {
            employee_id: employee.id,
            slip_delivered: updated.salary_slip_available,
        })
    }

    async fn deliver_slip(&self, employee: &Employee, address: &str) -> Result<()> {
        let content = self.directory.read_slip(&employee.id).await?;
        let caption = slip_caption(employee, &self.sender_signature);

        self.gateway
            .send_document(address, content.bytes, &content.slip.file_name, Some(&caption))
            .await?;

        tracing::info!(
            employee_id = %employee.id,
            file_name = %content.slip.file_name,
            "salary slip sent via chat"
        );
        Ok(())
    }

    async fn notify_failure(&self, contact: &str, text: &str) -> Outcome {
        let address = self.matcher.to_address(contact);
        if let Err(e) = self.gateway.send_text(&address, text).await {
            tracing::warn!(error = %e, "failed to send failure notice");
        }
        Outcome::Failed
    }

    /// Drop conversations older than the configured max age. No message is
    /// sent to the affected contacts.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now()).await
    }

    /// [`sweep_expired`](Self::sweep_expired) against an explicit clock.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let max_age = self.max_age;
        let mut conversations = self.conversations.lock().await;
        let before = conversations.len();

        conversations.retain(|contact, conversation| {
            let expired = (now - conversation.started_at)
                .to_std()
                .is_ok_and(|age| age > max_age);
            if expired {
                tracing::info!(contact = %contact, "cleaned up stale conversation");
            }
            !expired
        });

        before - conversations.len()
    }
}
