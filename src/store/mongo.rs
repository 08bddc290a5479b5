//! MongoDB counter backend.
//!
//! Command monitoring events from the driver are forwarded to a
//! [`CommandListener`], with the current request span as trace parent.

use async_trait::async_trait;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::event::command::{
    CommandEventHandler, CommandFailedEvent, CommandStartedEvent, CommandSucceededEvent,
};
use mongodb::options::{ClientOptions, UpdateOptions};
use mongodb::{Client, Collection};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::tracer::{CommandFailed, CommandListener, CommandStarted, CommandSucceeded};
use super::{Counter, CounterBackend, CounterDocument, CounterTarget, StoreError};
use crate::observability::span;

/// Reply fields that are safe to copy into span tags.
const REPLY_FIELDS: &[&str] = &["ok", "n", "nModified", "code", "codeName"];

/// Command keys that never carry statement information.
const SKIPPED_KEYS: &[&str] = &["lsid", "txnNumber", "$db", "$clusterTime", "$readPreference"];

pub struct MongoBackend {
    client: Client,
}

impl MongoBackend {
    /// Build a client for `uri`. No network traffic happens until the first
    /// command; call [`CounterBackend::ping`] to verify connectivity.
    pub async fn connect(
        uri: &str,
        connect_timeout: Duration,
        listener: Option<Arc<dyn CommandListener>>,
    ) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| StoreError::Connect(format!("invalid store uri: {}", e)))?;
        options.connect_timeout = Some(connect_timeout);
        options.server_selection_timeout = Some(connect_timeout);
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        if let Some(listener) = listener {
            options.command_event_handler = Some(Arc::new(CommandEvents { listener }));
        }

        let client = Client::with_options(options).map_err(|e| StoreError::Connect(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CounterBackend for MongoBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Connect(e.to_string()))
    }

    async fn open(&self, target: &CounterTarget) -> Result<Arc<dyn CounterDocument>, StoreError> {
        let collection = self
            .client
            .database(&target.database)
            .collection::<CounterRecord>(&target.collection);
        Ok(Arc::new(MongoDocument {
            collection,
            id: document_key(&target.document_id),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct CounterRecord {
    count: i64,
}

struct MongoDocument {
    collection: Collection<CounterRecord>,
    id: Bson,
}

#[async_trait]
impl CounterDocument for MongoDocument {
    async fn increment(&self) -> Result<(), StoreError> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": self.id.clone() },
                doc! { "$inc": { "count": 1 } },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await
            .map_err(|e| StoreError::Failure(e.to_string()))?;
        debug!(
            matched = result.matched_count,
            modified = result.modified_count,
            upserted = result.upserted_id.is_some(),
            "counter incremented"
        );
        Ok(())
    }

    async fn read(&self) -> Result<Counter, StoreError> {
        let record = self
            .collection
            .find_one(doc! { "_id": self.id.clone() }, None)
            .await
            .map_err(|e| StoreError::Failure(e.to_string()))?
            .ok_or_else(|| StoreError::Failure("counter document not found after upsert".to_string()))?;
        Ok(Counter { count: record.count })
    }
}

/// `_id` value for a configured document id: an ObjectId when the id is
/// 24 hex digits, the plain string otherwise.
pub fn document_key(document_id: &str) -> Bson {
    match ObjectId::parse_str(document_id) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(_) => Bson::String(document_id.to_string()),
    }
}

/// `uri` with any password replaced, for logging.
pub fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let rest = &uri[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return uri.to_string();
    };
    let user = rest[..at].split(':').next().unwrap_or_default();
    format!("{}{}:***{}", &uri[..scheme_end + 3], user, &rest[at..])
}

/// Summarize a command for the `db.statement` tag: top-level keys only,
/// every value replaced by `?` except the collection the command targets.
pub fn redact_command(command_name: &str, command: &Document) -> String {
    let mut summary = serde_json::Map::new();
    for (key, value) in command {
        if SKIPPED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let shown = match value {
            Bson::String(collection) if key == command_name => {
                serde_json::Value::String(collection.clone())
            }
            _ => serde_json::Value::String("?".to_string()),
        };
        summary.insert(key.clone(), shown);
    }
    serde_json::Value::Object(summary).to_string()
}

/// Summarize a reply, keeping only status and count fields.
pub fn redact_reply(reply: &Document) -> String {
    let mut summary = serde_json::Map::new();
    for (key, value) in reply {
        if SKIPPED_KEYS.contains(&key.as_str()) || key.starts_with('$') {
            continue;
        }
        let shown = if REPLY_FIELDS.contains(&key.as_str()) {
            value.clone().into_relaxed_extjson()
        } else {
            serde_json::Value::String("?".to_string())
        };
        summary.insert(key.clone(), shown);
    }
    serde_json::Value::Object(summary).to_string()
}

struct CommandEvents {
    listener: Arc<dyn CommandListener>,
}

impl CommandEventHandler for CommandEvents {
    fn handle_command_started_event(&self, event: CommandStartedEvent) {
        let parent = span::current_parent();
        self.listener.on_call_started(
            parent.as_ref(),
            CommandStarted {
                correlation_id: i64::from(event.request_id),
                statement: redact_command(&event.command_name, &event.command),
                command_name: event.command_name,
                database: event.db,
                connection_id: format!("{}#{}", event.connection.address, event.connection.id),
            },
        );
    }

    fn handle_command_succeeded_event(&self, event: CommandSucceededEvent) {
        self.listener.on_call_succeeded(CommandSucceeded {
            correlation_id: i64::from(event.request_id),
            reply: redact_reply(&event.reply),
            duration: event.duration,
        });
    }

    fn handle_command_failed_event(&self, event: CommandFailedEvent) {
        self.listener.on_call_failed(CommandFailed {
            correlation_id: i64::from(event.request_id),
            failure: event.failure.to_string(),
            duration: event.duration,
        });
    }
}
