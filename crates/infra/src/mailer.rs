//! Notification collaborator.
//!
//! Messages are rendered from a small static template registry with `{{key}}`
//! placeholders filled from a JSON data bag. Only the deferred runner calls
//! [`Mailer::send`].

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

pub const USER_WELCOME: &str = "user_welcome";

struct Template {
    name: &'static str,
    subject: &'static str,
    body: &'static str,
}

const TEMPLATES: &[Template] = &[Template {
    name: USER_WELCOME,
    subject: "Welcome to Greenlight!",
    body: "Hi,\n\n\
Thanks for signing up for a Greenlight account. We're excited to have you on board!\n\n\
For future reference, your user ID number is {{userID}}.\n\n\
Please send a request to the `PUT /v1/users/activated` endpoint with the following JSON\n\
body to activate your account:\n\n\
{\"token\": \"{{activationToken}}\"}\n\n\
Please note that this is a one-time use token and it will expire in 3 days.\n\n\
Thanks,\n\n\
The Greenlight Team\n",
}];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailerError {
    #[error("unknown mail template '{0}'")]
    UnknownTemplate(String),

    #[error("template '{template}' needs a value for '{key}'")]
    MissingValue { template: String, key: String },
}

/// A message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Fill `{{key}}` placeholders in `text` from `data`.
fn fill(template: &str, text: &str, data: &Value) -> Result<String, MailerError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let key = rest[start + 2..start + 2 + len].trim();
        let value = match data.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                return Err(MailerError::MissingValue {
                    template: template.to_string(),
                    key: key.to_string(),
                });
            }
            Some(other) => other.to_string(),
        };

        out.push_str(&rest[..start]);
        out.push_str(&value);
        rest = &rest[start + 2 + len + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Render `template` for `recipient`.
pub fn render(from: &str, recipient: &str, template: &str, data: &Value) -> Result<Message, MailerError> {
    let tpl = TEMPLATES
        .iter()
        .find(|t| t.name == template)
        .ok_or_else(|| MailerError::UnknownTemplate(template.to_string()))?;

    Ok(Message {
        from: from.to_string(),
        to: recipient.to_string(),
        subject: fill(template, tpl.subject, data)?,
        body: fill(template, tpl.body, data)?,
    })
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, template: &str, data: &Value) -> Result<(), MailerError>;
}

/// Development transport: writes each message to the log instead of a wire.
///
/// Bodies carry one-time tokens, so they are only logged when `reveal_bodies`
/// is set.
#[derive(Debug, Clone)]
pub struct LogMailer {
    sender: String,
    reveal_bodies: bool,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>, reveal_bodies: bool) -> Self {
        Self {
            sender: sender.into(),
            reveal_bodies,
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, template: &str, data: &Value) -> Result<(), MailerError> {
        let message = render(&self.sender, recipient, template, data)?;

        if self.reveal_bodies {
            info!(
                from = %message.from,
                to = %message.to,
                subject = %message.subject,
                body = %message.body,
                "mail delivered to log"
            );
        } else {
            info!(
                from = %message.from,
                to = %message.to,
                subject = %message.subject,
                body_bytes = message.body.len(),
                "mail delivered to log"
            );
        }
        Ok(())
    }
}

/// Keeps every rendered message in memory.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sender: String,
    sent: Mutex<Vec<(Message, Value)>>,
}

impl RecordingMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Data bags of every message sent to `recipient`, oldest first.
    pub fn data_for(&self, recipient: &str) -> Vec<Value> {
        self.lock()
            .iter()
            .filter(|(m, _)| m.to == recipient)
            .map(|(_, data)| data.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Message, Value)>> {
        self.sent.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, recipient: &str, template: &str, data: &Value) -> Result<(), MailerError> {
        let message = render(&self.sender, recipient, template, data)?;
        self.lock().push((message, data.clone()));
        Ok(())
    }
}
