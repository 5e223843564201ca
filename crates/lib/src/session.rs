//! Chat sessions: ordered message history plus the single in-progress assistant reply.
//!
//! A session is mutated by stream events while a reply is generated: chunks append to the
//! reply, done replaces it with the authoritative text and freezes it.

use crate::llm::{HistoryEntry, Role};
use crate::stream::{ChunkKind, StreamEvent};
use serde::{Deserialize, Serialize};

/// Unique session identifier (opaque string).
pub type SessionId = String;

const DEFAULT_TITLE: &str = "New chat";
const TITLE_MAX_CHARS: usize = 40;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A single message in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Unix ms.
    pub timestamp: i64,
    /// False only for the assistant reply currently being streamed.
    #[serde(default = "default_final")]
    pub is_final: bool,
}

fn default_final() -> bool {
    true
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            timestamp: now_ms(),
            is_final: true,
        }
    }

    fn pending_reply() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            timestamp: now_ms(),
            is_final: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("a reply is already in progress")]
    ReplyInProgress,
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("only user messages can be edited: {0}")]
    NotUserMessage(String),
    #[error("message is empty")]
    EmptyMessage,
}

/// A session: id, title, and ordered message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    /// Unix ms.
    pub last_modified: i64,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    /// Empty session with a generated id; titled from its first user message.
    pub fn new() -> Self {
        Self {
            id: format!("sess-{}", uuid::Uuid::new_v4()),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            last_modified: now_ms(),
        }
    }

    fn touch(&mut self) {
        self.last_modified = now_ms();
    }

    /// Append a user message. The first one also names the session.
    pub fn push_user(&mut self, content: &str) -> Result<&ChatMessage, SessionError> {
        if content.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if self.in_progress().is_some() {
            return Err(SessionError::ReplyInProgress);
        }
        if !self.messages.iter().any(|m| m.role == Role::User) {
            self.title = title_from(content);
        }
        self.messages.push(ChatMessage::user(content));
        self.touch();
        Ok(&self.messages[self.messages.len() - 1])
    }

    /// Open the assistant reply that stream events will fill. Returns its message id.
    pub fn begin_reply(&mut self) -> Result<String, SessionError> {
        if self.in_progress().is_some() {
            return Err(SessionError::ReplyInProgress);
        }
        let reply = ChatMessage::pending_reply();
        let id = reply.id.clone();
        self.messages.push(reply);
        self.touch();
        Ok(id)
    }

    pub fn in_progress(&self) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| !m.is_final)
    }

    fn in_progress_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| !m.is_final)
    }

    /// Append a fragment to the in-progress reply. Returns false when no reply is open.
    pub fn append_chunk(&mut self, content: &str) -> bool {
        let Some(reply) = self.in_progress_mut() else {
            return false;
        };
        reply.content.push_str(content);
        self.touch();
        true
    }

    /// Replace the in-progress reply with the final text and freeze it.
    pub fn finish_reply(&mut self, text: &str) -> bool {
        let Some(reply) = self.in_progress_mut() else {
            return false;
        };
        reply.content = text.to_string();
        reply.is_final = true;
        self.touch();
        true
    }

    /// Freeze whatever has streamed so far (cancelled turn). An empty reply is removed.
    pub fn freeze_reply(&mut self) {
        if let Some(pos) = self.messages.iter().position(|m| !m.is_final) {
            if self.messages[pos].content.trim().is_empty() {
                self.messages.remove(pos);
            } else {
                let reply = &mut self.messages[pos];
                reply.content = reply.content.trim_end().to_string();
                reply.is_final = true;
            }
            self.touch();
        }
    }

    /// Drop the in-progress reply (failed turn).
    pub fn discard_reply(&mut self) {
        let before = self.messages.len();
        self.messages.retain(|m| m.is_final);
        if self.messages.len() != before {
            self.touch();
        }
    }

    /// Apply one stream event. Heading chunks carry no line break, so one is added here.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Chunk { content, kind } => {
                if *kind == ChunkKind::Heading {
                    self.append_chunk(&format!("{}\n", content));
                } else {
                    self.append_chunk(content);
                }
            }
            StreamEvent::Done { text } => {
                self.finish_reply(text);
            }
        }
    }

    /// Final, non-empty messages as gateway history.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|m| m.is_final && !m.content.trim().is_empty())
            .map(|m| HistoryEntry {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    /// Edit a user message and drop everything after it, ready to regenerate the reply.
    pub fn rewrite_from(&mut self, message_id: &str, content: &str) -> Result<(), SessionError> {
        if content.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if self.in_progress().is_some() {
            return Err(SessionError::ReplyInProgress);
        }
        let pos = self
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| SessionError::MessageNotFound(message_id.to_string()))?;
        if self.messages[pos].role != Role::User {
            return Err(SessionError::NotUserMessage(message_id.to_string()));
        }
        self.messages.truncate(pos + 1);
        let message = &mut self.messages[pos];
        message.content = content.to_string();
        message.timestamp = now_ms();
        if !self.messages[..pos].iter().any(|m| m.role == Role::User) {
            self.title = title_from(content);
        }
        self.touch();
        Ok(())
    }

    /// Freeze a reply left open by an interrupted run (e.g. the process exited mid-stream).
    pub fn recover(&mut self) {
        if self.in_progress().is_some() {
            log::debug!("session {}: recovering interrupted reply", self.id);
            self.freeze_reply();
        }
    }
}

fn title_from(content: &str) -> String {
    let line = content.lines().next().unwrap_or("").trim();
    if line.chars().count() <= TITLE_MAX_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> StreamEvent {
        StreamEvent::Chunk {
            content: content.to_string(),
            kind: ChunkKind::Text,
        }
    }

    #[test]
    fn first_user_message_names_session() {
        let mut s = ChatSession::new();
        assert_eq!(s.title, "New chat");
        s.push_user("What's the weather like?").unwrap();
        assert_eq!(s.title, "What's the weather like?");
        s.push_user("And tomorrow?").unwrap();
        assert_eq!(s.title, "What's the weather like?");
    }

    #[test]
    fn long_titles_are_truncated() {
        let mut s = ChatSession::new();
        s.push_user(&"word ".repeat(30)).unwrap();
        assert!(s.title.ends_with('…'));
        assert!(s.title.chars().count() <= TITLE_MAX_CHARS + 1);
    }

    #[test]
    fn only_one_reply_in_progress() {
        let mut s = ChatSession::new();
        s.push_user("hi").unwrap();
        s.begin_reply().unwrap();
        assert_eq!(s.begin_reply(), Err(SessionError::ReplyInProgress));
        assert_eq!(s.push_user("again").unwrap_err(), SessionError::ReplyInProgress);
    }

    #[test]
    fn chunks_append_and_done_replaces() {
        let mut s = ChatSession::new();
        s.push_user("hi").unwrap();
        s.begin_reply().unwrap();
        s.apply(&StreamEvent::Chunk {
            content: "Hi".to_string(),
            kind: ChunkKind::Heading,
        });
        s.apply(&chunk("there\n"));
        assert_eq!(s.in_progress().unwrap().content, "Hi\nthere\n");

        s.apply(&StreamEvent::Done {
            text: "## Hi\nthere".to_string(),
        });
        assert!(s.in_progress().is_none());
        let reply = s.messages.last().unwrap();
        assert_eq!(reply.content, "## Hi\nthere");
        assert!(reply.is_final);

        // Late chunks have nowhere to go.
        assert!(!s.append_chunk("stray"));
        assert_eq!(s.messages.last().unwrap().content, "## Hi\nthere");
    }

    #[test]
    fn history_skips_open_reply() {
        let mut s = ChatSession::new();
        s.push_user("hi").unwrap();
        s.begin_reply().unwrap();
        s.append_chunk("partial");
        assert_eq!(s.history(), vec![HistoryEntry::user("hi")]);
    }

    #[test]
    fn freeze_keeps_partial_and_drops_empty() {
        let mut s = ChatSession::new();
        s.push_user("hi").unwrap();
        s.begin_reply().unwrap();
        s.append_chunk("half an answer ");
        s.freeze_reply();
        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.messages[1].content, "half an answer");
        assert!(s.messages[1].is_final);

        s.push_user("more").unwrap();
        s.begin_reply().unwrap();
        s.freeze_reply();
        assert_eq!(s.messages.len(), 3);
    }

    #[test]
    fn discard_removes_open_reply() {
        let mut s = ChatSession::new();
        s.push_user("hi").unwrap();
        s.begin_reply().unwrap();
        s.append_chunk("oops");
        s.discard_reply();
        assert_eq!(s.messages.len(), 1);
    }

    #[test]
    fn rewrite_truncates_after_edited_message() {
        let mut s = ChatSession::new();
        let first = s.push_user("first question").unwrap().id.clone();
        s.begin_reply().unwrap();
        s.finish_reply("answer");
        s.push_user("follow up").unwrap();

        s.rewrite_from(&first, "better question").unwrap();
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.messages[0].content, "better question");
        assert_eq!(s.title, "better question");
    }

    #[test]
    fn rewrite_rejects_assistant_and_unknown_ids() {
        let mut s = ChatSession::new();
        s.push_user("q").unwrap();
        let reply = s.begin_reply().unwrap();
        s.finish_reply("a");
        assert_eq!(
            s.rewrite_from(&reply, "x"),
            Err(SessionError::NotUserMessage(reply.clone()))
        );
        assert!(matches!(
            s.rewrite_from("nope", "x"),
            Err(SessionError::MessageNotFound(_))
        ));
    }

    #[test]
    fn serializes_camel_case() {
        let mut s = ChatSession::new();
        s.push_user("hi").unwrap();
        let json = serde_json::to_value(&s).unwrap();
        assert!(json.get("lastModified").is_some());
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["isFinal"], true);
        let back: ChatSession = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }
}
