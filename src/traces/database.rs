//! SQLite trace persistence
//!
//! Mirrors trace mutations into two tables, `traces` and `trace_spans`.
//! Events are queued and written by a dedicated thread in batched
//! transactions; rows are upserted so the last event for an id wins.
//! Write failures are logged and dropped.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

use super::processor::{TraceEvent, TraceProcessor};
use super::types::{Span, SpanKind, SpanStatus, Trace, TraceStatus};
use crate::core::{SdkError, SdkResult};

/// Default number of events written per transaction
pub const DEFAULT_BATCH_SIZE: usize = 64;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS traces (
    id TEXT PRIMARY KEY,
    workflow_name TEXT NOT NULL,
    group_id TEXT,
    session_id TEXT,
    status TEXT NOT NULL,
    metadata TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT
);

CREATE TABLE IF NOT EXISTS trace_spans (
    id TEXT PRIMARY KEY,
    trace_id TEXT NOT NULL,
    parent_id TEXT,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    content TEXT NOT NULL,
    data TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_trace_spans_trace_id ON trace_spans(trace_id);
"#;

enum Command {
    Event(TraceEvent),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Trace processor that persists to SQLite
pub struct DatabaseTraceProcessor {
    conn: Arc<Mutex<Connection>>,
    tx: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DatabaseTraceProcessor {
    /// Open (or create) the database at `path` and start the writer thread
    pub fn open(path: impl AsRef<Path>, batch_size: usize) -> SdkResult<Self> {
        let path = path.as_ref();
        if batch_size == 0 {
            return Err(SdkError::InvalidConfig(
                "trace batch size must be at least 1".into(),
            ));
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        let conn = Arc::new(Mutex::new(conn));

        let (tx, rx) = mpsc::unbounded_channel();
        let worker_conn = conn.clone();
        let worker = std::thread::Builder::new()
            .name("trace-db-writer".into())
            .spawn(move || run_writer(worker_conn, rx, batch_size))?;

        tracing::info!(
            "[TraceDb] Persisting traces to {:?} (batch size {})",
            path,
            batch_size
        );

        Ok(Self {
            conn,
            tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Wait until every event queued before this call has been written
    pub async fn flush(&self) -> SdkResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack_tx))
            .map_err(|_| SdkError::ChannelClosed)?;
        ack_rx.await.map_err(|_| SdkError::ChannelClosed)
    }

    /// Reload a persisted trace with its spans ordered by start time
    pub fn load_trace(&self, trace_id: &str) -> SdkResult<Option<Trace>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SdkError::other("trace database lock poisoned"))?;

        let trace = conn
            .query_row(
                "SELECT id, workflow_name, group_id, session_id, status, metadata, started_at, ended_at
                 FROM traces WHERE id = ?1",
                params![trace_id],
                trace_from_row,
            )
            .optional()?;

        let Some(mut trace) = trace else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT id, trace_id, parent_id, kind, name, content, data, status, started_at, ended_at
             FROM trace_spans WHERE trace_id = ?1 ORDER BY started_at, rowid",
        )?;
        trace.spans = stmt
            .query_map(params![trace_id], span_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(trace))
    }

    /// Ids of every persisted trace, newest first
    pub fn list_trace_ids(&self) -> SdkResult<Vec<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SdkError::other("trace database lock poisoned"))?;
        let mut stmt = conn.prepare("SELECT id FROM traces ORDER BY started_at DESC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

impl TraceProcessor for DatabaseTraceProcessor {
    fn on_event(&self, event: &TraceEvent) {
        if self.tx.send(Command::Event(event.clone())).is_err() {
            tracing::error!(
                "[TraceDb] Writer stopped, dropping {} for {}",
                event.name(),
                event.trace_id()
            );
        }
    }

    fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("[TraceDb] Writer thread panicked");
            }
        }
    }
}

impl Drop for DatabaseTraceProcessor {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

// ============================================================================
// Writer thread
// ============================================================================

fn run_writer(
    conn: Arc<Mutex<Connection>>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    batch_size: usize,
) {
    let mut batch: Vec<TraceEvent> = Vec::with_capacity(batch_size);

    while let Some(first) = rx.blocking_recv() {
        let mut ack = None;
        let mut shutdown = false;
        let mut next = Some(first);

        while let Some(command) = next.take() {
            match command {
                Command::Event(event) => batch.push(event),
                Command::Flush(tx) => {
                    ack = Some(tx);
                    break;
                }
                Command::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
            if batch.len() >= batch_size {
                break;
            }
            next = rx.try_recv().ok();
        }

        if !batch.is_empty() {
            if let Err(e) = write_batch(&conn, &batch) {
                tracing::error!(
                    "[TraceDb] Failed to write {} trace events: {}",
                    batch.len(),
                    e
                );
            } else {
                tracing::debug!("[TraceDb] Wrote {} trace events", batch.len());
            }
            batch.clear();
        }

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        if shutdown {
            break;
        }
    }

    tracing::debug!("[TraceDb] Writer stopped");
}

fn write_batch(conn: &Mutex<Connection>, events: &[TraceEvent]) -> SdkResult<()> {
    let mut conn = conn
        .lock()
        .map_err(|_| SdkError::other("trace database lock poisoned"))?;
    let tx = conn.transaction()?;

    for event in events {
        match event {
            TraceEvent::TraceStarted(trace) | TraceEvent::TraceEnded(trace) => {
                upsert_trace(&tx, trace)?
            }
            TraceEvent::SpanStarted(span)
            | TraceEvent::SpanUpdated(span)
            | TraceEvent::SpanEnded(span) => upsert_span(&tx, span)?,
        }
    }

    tx.commit()?;
    Ok(())
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn upsert_trace(tx: &Transaction<'_>, trace: &Trace) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO traces (id, workflow_name, group_id, session_id, status, metadata, started_at, ended_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            workflow_name = excluded.workflow_name,
            group_id = excluded.group_id,
            session_id = excluded.session_id,
            status = excluded.status,
            metadata = excluded.metadata,
            ended_at = excluded.ended_at",
        params![
            trace.id,
            trace.workflow_name,
            trace.group_id,
            trace.session_id,
            trace.status.as_str(),
            Value::Object(trace.metadata.clone()),
            format_time(&trace.started_at),
            trace.ended_at.as_ref().map(format_time),
        ],
    )?;
    Ok(())
}

fn upsert_span(tx: &Transaction<'_>, span: &Span) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO trace_spans (id, trace_id, parent_id, kind, name, content, data, status, started_at, ended_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            content = excluded.content,
            data = excluded.data,
            status = excluded.status,
            ended_at = excluded.ended_at",
        params![
            span.id,
            span.trace_id,
            span.parent_id,
            span.kind.as_str(),
            span.name,
            span.content,
            Value::Object(span.data.clone()),
            span.status.as_str(),
            format_time(&span.started_at),
            span.ended_at.as_ref().map(format_time),
        ],
    )?;
    Ok(())
}

// ============================================================================
// Row decoding
// ============================================================================

fn bad_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn time_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| bad_column(index, format!("invalid timestamp {}: {}", raw, e)))
}

fn optional_time_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| bad_column(index, format!("invalid timestamp {}: {}", raw, e)))
    })
    .transpose()
}

fn object_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Map<String, Value>> {
    match row.get::<_, Value>(index)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(bad_column(index, format!("expected JSON object, got {}", other))),
    }
}

fn trace_from_row(row: &Row<'_>) -> rusqlite::Result<Trace> {
    let status: String = row.get(4)?;
    Ok(Trace {
        id: row.get(0)?,
        workflow_name: row.get(1)?,
        group_id: row.get(2)?,
        session_id: row.get(3)?,
        status: TraceStatus::parse(&status)
            .ok_or_else(|| bad_column(4, format!("unknown trace status {}", status)))?,
        metadata: object_column(row, 5)?,
        started_at: time_column(row, 6)?,
        ended_at: optional_time_column(row, 7)?,
        spans: Vec::new(),
    })
}

fn span_from_row(row: &Row<'_>) -> rusqlite::Result<Span> {
    let kind: String = row.get(3)?;
    let status: String = row.get(7)?;
    Ok(Span {
        id: row.get(0)?,
        trace_id: row.get(1)?,
        parent_id: row.get(2)?,
        kind: SpanKind::parse(&kind)
            .ok_or_else(|| bad_column(3, format!("unknown span kind {}", kind)))?,
        name: row.get(4)?,
        content: row.get(5)?,
        data: object_column(row, 6)?,
        status: SpanStatus::parse(&status)
            .ok_or_else(|| bad_column(7, format!("unknown span status {}", status)))?,
        started_at: time_column(row, 8)?,
        ended_at: optional_time_column(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traces::{NewTrace, TraceStore};

    #[tokio::test]
    async fn test_round_trip_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DatabaseTraceProcessor::open(dir.path().join("traces.db"), 2).unwrap());
        let store = TraceStore::new().with_processor(db.clone());

        let trace = store
            .start_trace(NewTrace::new("support").with_group_id("conv-1"))
            .await;
        let mut data = Map::new();
        data.insert("name".into(), "lookup".into());
        store
            .add_trace_step(&trace.id, SpanKind::Function, "order #42", data, SpanStatus::Completed)
            .await
            .unwrap();
        let step = store
            .add_streaming_trace_step(&trace.id, SpanKind::Generation, Map::new())
            .await
            .unwrap();
        step.append("Your order ").await.unwrap();
        step.append("shipped").await.unwrap();
        step.complete().await.unwrap();
        let expected = store
            .complete_agent_trace(&trace.id, true, Some("answered"))
            .await
            .unwrap();

        db.flush().await.unwrap();
        let loaded = db.load_trace(&trace.id).unwrap().unwrap();

        assert_eq!(loaded.status, TraceStatus::Completed);
        assert_eq!(loaded.group_id.as_deref(), Some("conv-1"));
        assert_eq!(loaded.metadata["reasoning"], "answered");
        assert_eq!(loaded.started_at, expected.started_at);
        assert_eq!(loaded.ended_at, expected.ended_at);

        let ids: Vec<&str> = loaded.spans.iter().map(|s| s.id.as_str()).collect();
        let expected_ids: Vec<&str> = expected.spans.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, expected_ids);

        let kinds: Vec<SpanKind> = loaded.spans.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SpanKind::Function, SpanKind::Generation]);
        assert_eq!(loaded.spans[1].content, "Your order shipped");
        assert_eq!(loaded.spans[1].status, SpanStatus::Completed);
        assert_eq!(loaded.spans[0].name, "lookup");
    }

    #[tokio::test]
    async fn test_reopen_reads_persisted_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.db");

        let trace_id = {
            let db = Arc::new(DatabaseTraceProcessor::open(&path, DEFAULT_BATCH_SIZE).unwrap());
            let store = TraceStore::new().with_processor(db.clone());
            let trace = store.start_trace(NewTrace::new("wf")).await;
            store.complete_agent_trace(&trace.id, false, Some("boom")).await.unwrap();
            db.flush().await.unwrap();
            store.shutdown();
            trace.id
        };

        let db = DatabaseTraceProcessor::open(&path, DEFAULT_BATCH_SIZE).unwrap();
        let loaded = db.load_trace(&trace_id).unwrap().unwrap();
        assert_eq!(loaded.status, TraceStatus::Error);
        assert!(loaded.spans.is_empty());
        assert_eq!(db.list_trace_ids().unwrap(), vec![trace_id]);
    }

    #[test]
    fn test_unknown_trace_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseTraceProcessor::open(dir.path().join("t.db"), 8).unwrap();
        assert!(db.load_trace("nope").unwrap().is_none());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = DatabaseTraceProcessor::open(dir.path().join("t.db"), 0);
        assert!(matches!(result, Err(SdkError::InvalidConfig(_))));
    }
}
