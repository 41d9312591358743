//! Shared fixtures: a small message/chat hierarchy over a temp database.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use missive_store::data::DataRef;
use missive_store::{
    ChangeObserver, ColumnValues, DeleteContext, FieldValue, Model, RecordId, Result, Store,
    StoreConfig, StoreError,
};

pub const SCHEMA: &str = "
CREATE TABLE chat (id TEXT PRIMARY KEY, alias TEXT NOT NULL, last_activity INTEGER);
CREATE TABLE message (id TEXT PRIMARY KEY, chat TEXT NOT NULL, sent INTEGER, _type INTEGER NOT NULL, body TEXT, attachment TEXT);
CREATE TABLE media_message (id TEXT PRIMARY KEY, chat TEXT NOT NULL, sent INTEGER, size INTEGER);
CREATE TABLE note (id INTEGER PRIMARY KEY, body TEXT);
CREATE TABLE message_blob (id INTEGER PRIMARY KEY, data BLOB NOT NULL);
";

pub fn open_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("messages.db"), StoreConfig::default()).unwrap();
    store
        .pool()
        .with_writer(|conn| conn.execute_batch(SCHEMA).map_err(StoreError::from))
        .unwrap();
    (dir, store)
}

// ─────────────────────────────────────────────────────────────────────────────
// Message hierarchy: text + image share one table (discriminated), video has
// its own derived table.
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct TextMessage {
    pub id: RecordId,
    pub chat: String,
    pub sent: i64,
    pub body: String,
}

#[derive(Clone, Debug)]
pub struct ImageMessage {
    pub id: RecordId,
    pub chat: String,
    pub sent: i64,
    pub attachment: Option<DataRef>,
}

impl PartialEq for ImageMessage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.chat == other.chat && self.sent == other.sent
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoMessage {
    pub id: RecordId,
    pub chat: String,
    pub sent: i64,
    pub size: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Text(TextMessage),
    Image(ImageMessage),
    Video(VideoMessage),
}

const TYPE_TEXT: i64 = 1;
const TYPE_IMAGE: i64 = 2;

impl Message {
    pub fn text(id: &str, chat: &str, sent: i64, body: &str) -> Self {
        Self::Text(TextMessage {
            id: RecordId::from(id),
            chat: chat.to_owned(),
            sent,
            body: body.to_owned(),
        })
    }

    pub fn image(id: &str, chat: &str, sent: i64, attachment: Option<DataRef>) -> Self {
        Self::Image(ImageMessage {
            id: RecordId::from(id),
            chat: chat.to_owned(),
            sent,
            attachment,
        })
    }

    pub fn video(id: &str, chat: &str, sent: i64, size: i64) -> Self {
        Self::Video(VideoMessage {
            id: RecordId::from(id),
            chat: chat.to_owned(),
            sent,
            size,
        })
    }

    pub fn sent(&self) -> i64 {
        match self {
            Self::Text(m) => m.sent,
            Self::Image(m) => m.sent,
            Self::Video(m) => m.sent,
        }
    }

    pub fn with_sent(&self, sent: i64) -> Self {
        let mut copy = self.clone();
        match &mut copy {
            Self::Text(m) => m.sent = sent,
            Self::Image(m) => m.sent = sent,
            Self::Video(m) => m.sent = sent,
        }
        copy
    }

    pub fn with_chat(&self, chat: &str) -> Self {
        let mut copy = self.clone();
        match &mut copy {
            Self::Text(m) => m.chat = chat.to_owned(),
            Self::Image(m) => m.chat = chat.to_owned(),
            Self::Video(m) => m.chat = chat.to_owned(),
        }
        copy
    }
}

impl Model for Message {
    const TABLES: &'static [&'static str] = &["message", "media_message"];

    fn id(&self) -> &RecordId {
        match self {
            Self::Text(m) => &m.id,
            Self::Image(m) => &m.id,
            Self::Video(m) => &m.id,
        }
    }

    fn table_name(&self) -> &'static str {
        match self {
            Self::Text(_) | Self::Image(_) => "message",
            Self::Video(_) => "media_message",
        }
    }

    fn discriminator(&self) -> Option<i64> {
        match self {
            Self::Text(_) => Some(TYPE_TEXT),
            Self::Image(_) => Some(TYPE_IMAGE),
            Self::Video(_) => None,
        }
    }

    fn encode(&self) -> Result<ColumnValues> {
        let mut values = ColumnValues::new();
        let _ = values.insert("id".into(), FieldValue::Text(self.id().to_string()));
        match self {
            Self::Text(m) => {
                let _ = values.insert("chat".into(), FieldValue::Text(m.chat.clone()));
                let _ = values.insert("sent".into(), FieldValue::Integer(m.sent));
                let _ = values.insert("_type".into(), FieldValue::Integer(TYPE_TEXT));
                let _ = values.insert("body".into(), FieldValue::Text(m.body.clone()));
                let _ = values.insert("attachment".into(), FieldValue::Null);
            }
            Self::Image(m) => {
                let _ = values.insert("chat".into(), FieldValue::Text(m.chat.clone()));
                let _ = values.insert("sent".into(), FieldValue::Integer(m.sent));
                let _ = values.insert("_type".into(), FieldValue::Integer(TYPE_IMAGE));
                let _ = values.insert("body".into(), FieldValue::Null);
                let attachment = match &m.attachment {
                    Some(r) => FieldValue::Text(serde_json::to_string(r)?),
                    None => FieldValue::Null,
                };
                let _ = values.insert("attachment".into(), attachment);
            }
            Self::Video(m) => {
                let _ = values.insert("chat".into(), FieldValue::Text(m.chat.clone()));
                let _ = values.insert("sent".into(), FieldValue::Integer(m.sent));
                let _ = values.insert("size".into(), FieldValue::Integer(m.size));
            }
        }
        Ok(values)
    }

    fn decode(table: &str, values: &ColumnValues) -> Result<Self> {
        let text = |field: &str| -> String {
            values
                .get(field)
                .and_then(|v| v.as_text())
                .unwrap_or_default()
                .to_owned()
        };
        let integer =
            |field: &str| -> i64 { values.get(field).and_then(FieldValue::as_integer).unwrap_or(0) };
        let id = RecordId::from_string(text("id"));
        let chat = text("chat");
        let sent = integer("sent");

        match table {
            "message" => match integer("_type") {
                TYPE_TEXT => Ok(Self::Text(TextMessage {
                    id,
                    chat,
                    sent,
                    body: text("body"),
                })),
                TYPE_IMAGE => {
                    let attachment = match values.get("attachment") {
                        Some(FieldValue::Text(json)) => Some(serde_json::from_str(json)?),
                        _ => None,
                    };
                    Ok(Self::Image(ImageMessage {
                        id,
                        chat,
                        sent,
                        attachment,
                    }))
                }
                other => Err(StoreError::Codec(format!("unknown message type {other}"))),
            },
            "media_message" => Ok(Self::Video(VideoMessage {
                id,
                chat,
                sent,
                size: integer("size"),
            })),
            other => Err(StoreError::Codec(format!("unknown table {other}"))),
        }
    }

    fn after_delete(&self, cx: &mut DeleteContext<'_>) -> Result<()> {
        if let Self::Image(m) = self {
            if let Some(DataRef::Blob(blob)) = &m.attachment {
                cx.release_blob(blob.table(), blob.blob_id())?;
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat: plain single-table model.
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Chat {
    pub id: RecordId,
    pub alias: String,
    pub last_activity: Option<i64>,
}

impl Model for Chat {
    const TABLES: &'static [&'static str] = &["chat"];

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn table_name(&self) -> &'static str {
        "chat"
    }

    fn encode(&self) -> Result<ColumnValues> {
        let mut values = ColumnValues::new();
        let _ = values.insert("id".into(), FieldValue::Text(self.id.to_string()));
        let _ = values.insert("alias".into(), FieldValue::Text(self.alias.clone()));
        let _ = values.insert("last_activity".into(), FieldValue::from(self.last_activity));
        Ok(values)
    }

    fn decode(_table: &str, values: &ColumnValues) -> Result<Self> {
        Ok(Self {
            id: RecordId::from_string(
                values
                    .get("id")
                    .and_then(|v| v.as_text())
                    .unwrap_or_default()
                    .to_owned(),
            ),
            alias: values
                .get("alias")
                .and_then(|v| v.as_text())
                .unwrap_or_default()
                .to_owned(),
            last_activity: values.get("last_activity").and_then(FieldValue::as_integer),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Note: store-generated identifier (rowid alias).
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Note {
    pub id: RecordId,
    pub row_key: Option<i64>,
    pub body: String,
}

impl Note {
    pub fn new(body: &str) -> Self {
        Self {
            id: RecordId::generate(),
            row_key: None,
            body: body.to_owned(),
        }
    }
}

impl Model for Note {
    const TABLES: &'static [&'static str] = &["note"];

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn row_key(&self) -> Option<i64> {
        self.row_key
    }

    fn set_row_key(&mut self, key: i64) {
        self.row_key = Some(key);
        self.id = RecordId::from_string(key.to_string());
    }

    fn table_name(&self) -> &'static str {
        "note"
    }

    fn encode(&self) -> Result<ColumnValues> {
        let mut values = ColumnValues::new();
        let _ = values.insert("body".into(), FieldValue::Text(self.body.clone()));
        Ok(values)
    }

    fn decode(_table: &str, values: &ColumnValues) -> Result<Self> {
        let row_key = values.get("id").and_then(FieldValue::as_integer);
        Ok(Self {
            id: RecordId::from_string(row_key.unwrap_or_default().to_string()),
            row_key,
            body: values
                .get("body")
                .and_then(|v| v.as_text())
                .unwrap_or_default()
                .to_owned(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observer that records change callbacks as strings.
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl<M: Model> ChangeObserver<M> for EventLog {
    fn on_inserted(&self, record: &Arc<M>) {
        self.push(format!("inserted:{}", record.id()));
    }

    fn on_updated(&self, record: &Arc<M>) {
        self.push(format!("updated:{}", record.id()));
    }

    fn on_deleted(&self, record: &Arc<M>) {
        self.push(format!("deleted:{}", record.id()));
    }
}
