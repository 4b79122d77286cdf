use serde::{Deserialize, Serialize};

use crate::graph_utils::ids::CorrelationId;

pub const EMPTY_TRANSCRIPT: &str = "Nothing to show!";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Response,
}

/// Delivery state of a user entry. Response entries are always `Delivered`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    #[default]
    Pending,
    Delivered,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: CorrelationId,
    pub text: String,
    pub role: Role,
    #[serde(default)]
    pub status: MessageStatus,
}

impl Message {
    pub fn user(id: CorrelationId, text: impl Into<String>) -> Self {
        Self { id, text: text.into(), role: Role::User, status: MessageStatus::Pending }
    }

    pub fn response(id: CorrelationId, text: impl Into<String>) -> Self {
        Self { id, text: text.into(), role: Role::Response, status: MessageStatus::Delivered }
    }
}

/// One rendered transcript row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptLine<'a> {
    pub text: &'a str,
    pub role: Role,
    pub failed: bool,
}

/// Append-only transcript. Position is arrival order, so a response need not
/// sit next to the prompt it answers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHistory {
    entries: Vec<Message>,
}

impl MessageHistory {
    pub fn new() -> Self { Self::default() }

    pub fn append(&mut self, message: Message) {
        self.entries.push(message);
    }

    pub fn entries(&self) -> &[Message] { &self.entries }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn user_entry(&self, id: &CorrelationId) -> Option<&Message> {
        self.entries.iter().find(|m| m.role == Role::User && &m.id == id)
    }

    pub fn response_entry(&self, id: &CorrelationId) -> Option<&Message> {
        self.entries.iter().find(|m| m.role == Role::Response && &m.id == id)
    }

    /// The prompt and (if any) answer that share `id`.
    pub fn pair(&self, id: &CorrelationId) -> (Option<&Message>, Option<&Message>) {
        (self.user_entry(id), self.response_entry(id))
    }

    /// Update the status of the user entry for `id`. Text and position stay.
    pub fn set_status(&mut self, id: &CorrelationId, status: MessageStatus) -> bool {
        match self.entries.iter_mut().find(|m| m.role == Role::User && &m.id == id) {
            Some(m) => {
                m.status = status;
                true
            }
            None => false,
        }
    }

    /// Project into display rows; an empty history yields the placeholder as
    /// a single response-styled row.
    pub fn render(&self) -> Vec<TranscriptLine<'_>> {
        if self.entries.is_empty() {
            return vec![TranscriptLine { text: EMPTY_TRANSCRIPT, role: Role::Response, failed: false }];
        }
        self.entries
            .iter()
            .map(|m| TranscriptLine { text: &m.text, role: m.role, failed: m.status == MessageStatus::Failed })
            .collect()
    }
}
