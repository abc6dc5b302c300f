//! Text encoding of memory and session documents.
//!
//! A document is a TOML header fenced by `+++` lines, a blank line, then the
//! free-form body:
//!
//! ```text
//! +++
//! id = "0192..."
//! tier = "long_term"
//! +++
//!
//! The body text.
//! ```
//!
//! Session bodies hold a sequence of message blocks, each opened by
//! `<!-- message: {json} -->` and closed by `<!-- /message -->`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::memory::types::{
    Category, Memory, Role, Scope, Session, SessionMessage, Status, Tier, ToolCall,
};

pub const DELIMITER: &str = "+++";

const MESSAGE_OPEN: &str = "<!-- message:";
const MESSAGE_CLOSE: &str = "<!-- /message";
const MESSAGE_CLOSE_LINE: &str = "<!-- /message -->";

/// A split document: optional raw header text and the body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub header: Option<String>,
    pub body: String,
}

impl Document {
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut lines = text.split_inclusive('\n');
        let first = match lines.next() {
            Some(line) => line,
            None => {
                return Ok(Self {
                    header: None,
                    body: String::new(),
                })
            }
        };
        if first.trim_end() != DELIMITER {
            return Ok(Self {
                header: None,
                body: text.to_string(),
            });
        }

        let mut header = String::new();
        let mut closed = false;
        let mut consumed = first.len();
        for line in lines.by_ref() {
            consumed += line.len();
            if line.trim_end() == DELIMITER {
                closed = true;
                break;
            }
            header.push_str(line);
        }
        if !closed {
            return Err("header delimiter is never closed".to_string());
        }

        let rest = &text[consumed..];
        let body = rest
            .strip_prefix("\r\n")
            .or_else(|| rest.strip_prefix('\n'))
            .unwrap_or(rest);
        Ok(Self {
            header: Some(header),
            body: body.to_string(),
        })
    }

    /// Header, delimiter, blank line, body; always newline-terminated.
    pub fn render(header: &str, body: &str) -> String {
        let mut out = String::with_capacity(header.len() + body.len() + 16);
        out.push_str(DELIMITER);
        out.push('\n');
        out.push_str(header);
        if !header.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(DELIMITER);
        out.push_str("\n\n");
        out.push_str(body);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// SHA-256 of the body with trailing whitespace removed, lowercase hex.
pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.trim_end().as_bytes());
    hex::encode(hasher.finalize())
}

// ── Memory documents ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct MemoryHeader {
    id: String,
    tier: Tier,
    scope: Scope,
    category: Category,
    title: String,
    #[serde(default)]
    status: Status,
    importance: u8,
    #[serde(default)]
    access_count: u32,
    content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    related: Vec<String>,
}

pub fn encode_memory(memory: &Memory) -> Result<String> {
    let header = MemoryHeader {
        id: memory.id.clone(),
        tier: memory.tier,
        scope: memory.scope,
        category: memory.category,
        title: memory.title.clone(),
        status: memory.status,
        importance: memory.importance,
        access_count: memory.access_count,
        content_hash: memory.content_hash.clone(),
        project_path: memory.project_path.clone(),
        expires_at: memory.expires_at,
        created_at: memory.created_at,
        updated_at: memory.updated_at,
        accessed_at: memory.accessed_at,
        tags: memory.tags.clone(),
        related: memory.related.clone(),
    };
    let header = toml::to_string(&header).map_err(|e| {
        Error::malformed("encode_memory", &memory.file_path, e.to_string())
    })?;
    Ok(Document::render(&header, &memory.content))
}

/// Decode a memory document. The stored hash is replaced by the body's hash.
pub fn decode_memory(text: &str, path: &Path) -> Result<Memory> {
    let doc = Document::parse(text).map_err(|why| Error::malformed("decode_memory", path, why))?;
    let header_text = doc
        .header
        .ok_or_else(|| Error::malformed("decode_memory", path, "missing metadata header"))?;
    let header: MemoryHeader = toml::from_str(&header_text)
        .map_err(|e| Error::malformed("decode_memory", path, e.to_string()))?;

    let content = doc.body.trim_end().to_string();
    Ok(Memory {
        id: header.id,
        tier: header.tier,
        scope: header.scope,
        category: header.category,
        title: header.title,
        content_hash: content_hash(&content),
        content,
        tags: header.tags,
        related: header.related,
        project_path: header.project_path,
        status: header.status,
        importance: header.importance.clamp(1, 5),
        access_count: header.access_count,
        expires_at: header.expires_at,
        created_at: header.created_at,
        updated_at: header.updated_at,
        accessed_at: header.accessed_at,
        file_path: path.to_path_buf(),
    })
}

/// Hash recorded in a document's header, without decoding the whole record.
pub fn recorded_hash(text: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct HashOnly {
        content_hash: String,
    }
    let doc = Document::parse(text).ok()?;
    let header: HashOnly = toml::from_str(doc.header.as_deref()?).ok()?;
    Some(header.content_hash)
}

// ── Session documents ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct SessionHeader {
    id: String,
    tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project_path: Option<String>,
    #[serde(default)]
    status: Status,
    token_count: usize,
    message_count: usize,
    content_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageMeta {
    role: Role,
    timestamp: DateTime<Utc>,
    tokens: usize,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

/// Render the message blocks that make up a session body.
pub fn render_messages(messages: &[SessionMessage]) -> Result<String> {
    let mut out = String::new();
    for (i, msg) in messages.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let meta = MessageMeta {
            role: msg.role,
            timestamp: msg.timestamp,
            tokens: msg.tokens,
            tool_call_id: msg.tool_call_id.clone(),
            tool_calls: msg.tool_calls.clone(),
        };
        out.push_str(MESSAGE_OPEN);
        out.push(' ');
        out.push_str(&serde_json::to_string(&meta)?);
        out.push_str(" -->\n");
        // Every `\n` ends a line so trailing newlines and `\r` survive.
        for line in msg.content.split('\n') {
            if is_marker(line) {
                out.push('\\');
            }
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(MESSAGE_CLOSE_LINE);
        out.push('\n');
    }
    Ok(out)
}

/// Parse message blocks back out of a session body.
pub fn parse_messages(body: &str, path: &Path) -> Result<Vec<SessionMessage>> {
    let mut messages = Vec::new();
    let mut current: Option<(MessageMeta, Vec<String>)> = None;

    for (lineno, line) in body.split('\n').enumerate() {
        if current.is_some() {
            if line.trim_end() == MESSAGE_CLOSE_LINE {
                if let Some((meta, lines)) = current.take() {
                    messages.push(SessionMessage {
                        role: meta.role,
                        content: lines.join("\n"),
                        tool_calls: meta.tool_calls,
                        tool_call_id: meta.tool_call_id,
                        timestamp: meta.timestamp,
                        tokens: meta.tokens,
                    });
                }
            } else if let Some((_, lines)) = current.as_mut() {
                lines.push(unescape_line(line));
            }
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }
        let json = line
            .strip_prefix(MESSAGE_OPEN)
            .and_then(|rest| rest.trim_end().strip_suffix("-->"))
            .ok_or_else(|| {
                Error::malformed(
                    "parse_messages",
                    path,
                    format!("line {}: expected message block", lineno + 1),
                )
            })?;
        let meta: MessageMeta = serde_json::from_str(json.trim()).map_err(|e| {
            Error::malformed("parse_messages", path, format!("line {}: {e}", lineno + 1))
        })?;
        current = Some((meta, Vec::new()));
    }

    if current.is_some() {
        return Err(Error::malformed(
            "parse_messages",
            path,
            "unterminated message block",
        ));
    }
    Ok(messages)
}

/// Lines that would read as block markers once leading backslashes are stripped.
fn is_marker(line: &str) -> bool {
    let bare = line.trim_start_matches('\\');
    bare.starts_with(MESSAGE_OPEN) || bare.starts_with(MESSAGE_CLOSE)
}

fn unescape_line(line: &str) -> String {
    if line.starts_with('\\') && is_marker(line) {
        line[1..].to_string()
    } else {
        line.to_string()
    }
}

pub fn encode_session(session: &Session) -> Result<String> {
    let body = render_messages(&session.messages)?;
    let header = SessionHeader {
        id: session.id.clone(),
        tier: Tier::Session,
        title: session.title.clone(),
        scope: session.scope,
        project_path: session.project_path.clone(),
        status: session.status,
        token_count: session.token_count,
        message_count: session.message_count,
        content_hash: content_hash(&body),
        created_at: session.created_at,
        updated_at: session.updated_at,
    };
    let header = toml::to_string(&header).map_err(|e| {
        Error::malformed("encode_session", &session.file_path, e.to_string())
    })?;
    Ok(Document::render(&header, &body))
}

pub fn decode_session(text: &str, path: &Path) -> Result<Session> {
    let doc = Document::parse(text).map_err(|why| Error::malformed("decode_session", path, why))?;
    let header_text = doc
        .header
        .ok_or_else(|| Error::malformed("decode_session", path, "missing metadata header"))?;
    let header: SessionHeader = toml::from_str(&header_text)
        .map_err(|e| Error::malformed("decode_session", path, e.to_string()))?;
    if header.tier != Tier::Session {
        return Err(Error::malformed(
            "decode_session",
            path,
            format!("expected a session document, found tier {}", header.tier),
        ));
    }

    let messages = parse_messages(&doc.body, path)?;
    let mut session = Session {
        id: header.id,
        title: header.title,
        scope: header.scope,
        project_path: header.project_path,
        status: header.status,
        token_count: header.token_count,
        message_count: header.message_count,
        content_hash: content_hash(&doc.body),
        created_at: header.created_at,
        updated_at: header.updated_at,
        file_path: path.to_path_buf(),
        messages,
    };
    session.recount();
    Ok(session)
}

/// Peek at the tier recorded in a document header.
pub fn document_tier(text: &str) -> Option<Tier> {
    #[derive(Deserialize)]
    struct TierOnly {
        tier: Tier,
    }
    let doc = Document::parse(text).ok()?;
    let header: TierOnly = toml::from_str(doc.header.as_deref()?).ok()?;
    Some(header.tier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_memory() -> Memory {
        let now = Utc::now();
        let content = "Prefers `cargo nextest` over cargo test.\n\n- fast\n- parallel".to_string();
        Memory {
            id: "0192d3a0-0000-7000-8000-000000000001".into(),
            tier: Tier::LongTerm,
            scope: Scope::Project,
            category: Category::Knowledge,
            title: "Test runner".into(),
            content_hash: content_hash(&content),
            content,
            tags: vec!["rust".into(), "cargo".into()],
            related: vec!["other-id".into()],
            project_path: Some("/work/app".into()),
            status: Status::Active,
            importance: 4,
            access_count: 7,
            expires_at: None,
            created_at: now,
            updated_at: now,
            accessed_at: Some(now),
            file_path: PathBuf::from("/work/app/.strata/long_term/knowledge/x.md"),
        }
    }

    #[test]
    fn memory_round_trip() {
        let mem = sample_memory();
        let text = encode_memory(&mem).unwrap();
        assert!(text.starts_with("+++\n"));
        assert!(text.ends_with('\n'));

        let back = decode_memory(&text, &mem.file_path).unwrap();
        assert_eq!(back.id, mem.id);
        assert_eq!(back.tier, mem.tier);
        assert_eq!(back.scope, mem.scope);
        assert_eq!(back.category, mem.category);
        assert_eq!(back.title, mem.title);
        assert_eq!(back.tags, mem.tags);
        assert_eq!(back.related, mem.related);
        assert_eq!(back.status, mem.status);
        assert_eq!(back.importance, mem.importance);
        assert_eq!(back.content_hash, mem.content_hash);
        assert_eq!(back.content, mem.content.trim_end());
        assert_eq!(back.project_path, mem.project_path);
        assert_eq!(back.created_at, mem.created_at);
    }

    #[test]
    fn body_without_header_is_plain_body() {
        let doc = Document::parse("just some notes\nmore\n").unwrap();
        assert!(doc.header.is_none());
        assert_eq!(doc.body, "just some notes\nmore\n");

        let err = decode_memory("just some notes\n", Path::new("n.md")).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn unclosed_header_is_malformed() {
        assert!(Document::parse("+++\nid = \"x\"\nbody without close\n").is_err());
        let err = decode_memory("+++\nid = \"x\"\n", Path::new("n.md")).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn render_emits_blank_line_and_trailing_newline() {
        let text = Document::render("a = 1", "body");
        assert_eq!(text, "+++\na = 1\n+++\n\nbody\n");
        let doc = Document::parse(&text).unwrap();
        assert_eq!(doc.header.as_deref(), Some("a = 1\n"));
        assert_eq!(doc.body, "body\n");
    }

    #[test]
    fn hash_ignores_header_and_trailing_whitespace() {
        assert_eq!(content_hash("hello"), content_hash("hello\n\n"));
        assert_ne!(content_hash("hello"), content_hash("hello!"));
        assert_eq!(
            content_hash("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        let mut mem = sample_memory();
        let before = decode_memory(&encode_memory(&mem).unwrap(), &mem.file_path).unwrap();
        mem.title = "Renamed".into();
        mem.access_count += 10;
        let after = decode_memory(&encode_memory(&mem).unwrap(), &mem.file_path).unwrap();
        assert_eq!(before.content_hash, after.content_hash);
    }

    #[test]
    fn recorded_hash_reads_header() {
        let mem = sample_memory();
        let text = encode_memory(&mem).unwrap();
        assert_eq!(recorded_hash(&text).as_deref(), Some(mem.content_hash.as_str()));
        assert_eq!(document_tier(&text), Some(Tier::LongTerm));
    }

    #[test]
    fn session_messages_round_trip_with_markers_in_content() {
        let now = Utc::now();
        let mut tricky = SessionMessage::new(
            Role::Assistant,
            "here is a block:\n<!-- /message -->\n\\<!-- message: {} -->\nend",
        );
        tricky.tool_calls = vec![ToolCall {
            id: "call-1".into(),
            name: "read_file".into(),
            arguments: serde_json::json!({"path": "src/main.rs"}),
        }];
        let tool = SessionMessage::new(Role::Tool, "fn main() {}").with_tool_call_id("call-1");

        let mut session = Session {
            id: "s1".into(),
            title: Some("Debugging".into()),
            scope: Scope::Global,
            project_path: None,
            status: Status::Active,
            token_count: 0,
            message_count: 0,
            content_hash: String::new(),
            created_at: now,
            updated_at: now,
            file_path: PathBuf::from("s1.md"),
            messages: vec![SessionMessage::new(Role::User, "hi"), tricky, tool],
        };
        session.recount();

        let text = encode_session(&session).unwrap();
        let back = decode_session(&text, Path::new("s1.md")).unwrap();
        assert_eq!(back.messages, session.messages);
        assert_eq!(back.token_count, session.token_count);
        assert_eq!(back.message_count, 3);
        assert_eq!(back.title.as_deref(), Some("Debugging"));
    }

    #[test]
    fn message_content_keeps_trailing_newlines_and_carriage_returns() {
        let messages = vec![
            SessionMessage::new(Role::User, "line one\r\nline two\r\n"),
            SessionMessage::new(Role::Assistant, "ends with blank lines\n\n"),
            SessionMessage::new(Role::User, ""),
        ];
        let body = render_messages(&messages).unwrap();
        let back = parse_messages(&body, Path::new("s.md")).unwrap();
        assert_eq!(back, messages);
    }

    #[test]
    fn empty_session_body_parses() {
        let msgs = parse_messages("", Path::new("s.md")).unwrap();
        assert!(msgs.is_empty());
        let err = parse_messages("<!-- message: {\"role\":\"user\"", Path::new("s.md")).unwrap_err();
        assert!(err.is_malformed());
    }
}
