use serde::{Deserialize, Serialize};

use crate::wa::error::MessageError;

const USER_SERVER: &str = "s.whatsapp.net";

/// WhatsApp account information available after successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Full JID for the connected account.
    pub id: String,
    /// Optional profile display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Group metadata as reported by the protocol client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Group jid (`...@g.us`).
    pub id: String,
    /// Group subject/title.
    pub subject: String,
    /// Participant jids.
    #[serde(default)]
    pub participants: Vec<String>,
}

/// Outbound message accepted by `send_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Recipient jid or bare phone number.
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl OutgoingMessage {
    /// Validates the payload and rewrites `to` into a full jid.
    pub fn normalized(mut self) -> Result<Self, MessageError> {
        self.to = recipient_jid(&self.to)?;

        let has_text = self
            .text
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty());
        let has_media = self
            .media_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty());
        if !has_text && !has_media {
            return Err(MessageError::EmptyContent);
        }

        Ok(self)
    }
}

/// Converts a phone number or jid into the jid form expected by the bridge.
pub fn recipient_jid(raw: &str) -> Result<String, MessageError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MessageError::MissingRecipient);
    }

    if let Some((user, server)) = trimmed.split_once('@') {
        if user.is_empty() || server.is_empty() {
            return Err(MessageError::InvalidRecipient(trimmed.to_owned()));
        }
        return Ok(trimmed.to_owned());
    }

    let digits: String = trimmed
        .chars()
        .filter(|char| !matches!(char, '+' | ' ' | '-' | '(' | ')'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|char| char.is_ascii_digit()) {
        return Err(MessageError::InvalidRecipient(trimmed.to_owned()));
    }

    Ok(format!("{digits}@{USER_SERVER}"))
}
