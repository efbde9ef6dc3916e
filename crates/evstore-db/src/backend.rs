//! [`StorageBackend`] over a pooled SQLite database.

use std::sync::atomic::{AtomicBool, Ordering};

use evstore_types::{
    BackendError, Dc, Event, IdFilter, IdSink, Query, RawTopic, StorageBackend, TimeQuery,
};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ToSql;
use rusqlite::{params, OptionalExtension, Row};
use thiserror::Error;

use crate::error::DbError;
use crate::migrations::{run_migrations, MigrationError};
use crate::pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};

const EVENT_COLUMNS: &str = "event_id, parent_event_id, event_time, dc_id, topic_id, host, \
     user_name, tag_set, target_host_set, data, received_time";

const LIVE_TOPICS: &str = "SELECT topic_id FROM topics WHERE deleted = 0";

/// Errors raised while opening the backend.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to get a connection for migrations: {0}")]
    Connection(#[from] r2d2::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// SQLite-backed event, topic, and dc storage.
pub struct SqliteBackend {
    pool: DbPool,
    closed: AtomicBool,
}

/// Milliseconds at the start of second `secs`.
fn millis(secs: i64) -> i64 {
    secs.saturating_mul(1_000)
}

/// Collects WHERE clauses with positional parameters.
#[derive(Default)]
struct Filter {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl Filter {
    fn next_index(&self) -> usize {
        self.params.len() + 1
    }

    fn push(&mut self, clause: impl FnOnce(usize) -> String, value: Box<dyn ToSql>) {
        let clause = clause(self.next_index());
        self.clauses.push(clause);
        self.params.push(value);
    }

    fn placeholders(&mut self, values: &[String]) -> String {
        values
            .iter()
            .map(|value| {
                let index = self.next_index();
                self.params.push(Box::new(value.clone()));
                format!("?{index}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn any_of(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        let list = self.placeholders(values);
        self.clauses.push(format!("{column} IN ({list})"));
    }

    /// Matches rows whose JSON array column shares a value with `values`.
    fn overlaps(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        let list = self.placeholders(values);
        self.clauses.push(format!(
            "EXISTS (SELECT 1 FROM json_each(events.{column}) WHERE json_each.value IN ({list}))"
        ));
    }

    fn ids(&mut self, column: &str, filter: &IdFilter) {
        if let IdFilter::OneOf(ids) = filter {
            self.any_of(column, ids);
        }
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn param_refs(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| &**p).collect()
    }
}

struct EventRow {
    event_id: String,
    parent_event_id: String,
    event_time: i64,
    dc_id: String,
    topic_id: String,
    host: String,
    user: String,
    tag_set: String,
    target_host_set: String,
    data: String,
    received_time: i64,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            parent_event_id: row.get(1)?,
            event_time: row.get(2)?,
            dc_id: row.get(3)?,
            topic_id: row.get(4)?,
            host: row.get(5)?,
            user: row.get(6)?,
            tag_set: row.get(7)?,
            target_host_set: row.get(8)?,
            data: row.get(9)?,
            received_time: row.get(10)?,
        })
    }

    fn into_event(self) -> Result<Event, DbError> {
        Ok(Event {
            event_id: self.event_id,
            parent_event_id: self.parent_event_id,
            event_time: self.event_time,
            dc_id: self.dc_id,
            topic_id: self.topic_id,
            tags: serde_json::from_str(&self.tag_set)?,
            host: self.host,
            target_hosts: serde_json::from_str(&self.target_host_set)?,
            user: self.user,
            data: serde_json::from_str(&self.data)?,
            received_time: self.received_time,
        })
    }
}

impl SqliteBackend {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            closed: AtomicBool::new(false),
        }
    }

    /// Opens the database at `path` and brings its schema up to date.
    ///
    /// # Errors
    ///
    /// Fails when the pool cannot be built or a migration fails.
    pub fn open(path: &str, settings: DbRuntimeSettings) -> Result<Self, OpenError> {
        let pool = create_pool(path, settings)?;
        let applied = run_migrations(&*pool.get()?)?;
        tracing::info!(path, applied, "event database ready");
        Ok(Self::new(pool))
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, DbError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }
        Ok(self.pool.get()?)
    }

    fn insert_event(&self, event: &Event) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
            params![
                event.event_id,
                event.parent_event_id,
                event.event_time,
                event.dc_id,
                event.topic_id,
                event.host,
                event.user,
                serde_json::to_string(&event.tags)?,
                serde_json::to_string(&event.target_hosts)?,
                serde_json::to_string(&event.data)?,
                event.received_time,
            ],
        )?;
        Ok(())
    }

    fn search_events(
        &self,
        query: &Query,
        topic_ids: &IdFilter,
        dc_ids: &IdFilter,
    ) -> Result<Vec<Event>, DbError> {
        if topic_ids.matches_nothing() || dc_ids.matches_nothing() {
            return Ok(Vec::new());
        }

        let mut filter = Filter::default();
        filter.push(|i| format!("event_time >= ?{i}"), Box::new(millis(query.start_event_time)));
        filter.push(
            |i| format!("event_time < ?{i}"),
            Box::new(millis(query.end_event_time.saturating_add(1))),
        );
        if query.start_received_time != 0 {
            filter.push(
                |i| format!("received_time >= ?{i}"),
                Box::new(millis(query.start_received_time)),
            );
        }
        if query.end_received_time != 0 {
            filter.push(
                |i| format!("received_time < ?{i}"),
                Box::new(millis(query.end_received_time.saturating_add(1))),
            );
        }
        filter.clauses.push(format!("topic_id IN ({LIVE_TOPICS})"));
        filter.ids("topic_id", topic_ids);
        filter.ids("dc_id", dc_ids);
        filter.any_of("host", &query.host);
        filter.any_of("user_name", &query.user);
        filter.any_of("parent_event_id", &query.parent_event_id);
        filter.overlaps("tag_set", &query.tag_set);
        filter.overlaps("target_host_set", &query.target_host);

        let limit_index = filter.next_index();
        filter.params.push(Box::new(i64::from(query.page_size())));
        filter.params.push(Box::new(i64::from(query.from)));

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events {}
             ORDER BY event_time DESC, event_id DESC
             LIMIT ?{limit_index} OFFSET ?{}",
            filter.where_clause(),
            limit_index + 1,
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(filter.param_refs().as_slice(), EventRow::from_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }

    fn fetch_event(&self, id: &str, include_soft_deleted: bool) -> Result<Option<Event>, DbError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE event_id = ?1 AND (?2 OR topic_id IN ({LIVE_TOPICS}))"
                ),
                params![id, include_soft_deleted],
                EventRow::from_row,
            )
            .optional()?;
        row.map(EventRow::into_event).transpose()
    }

    fn insert_topic(&self, topic: &RawTopic) -> Result<(), DbError> {
        self.conn()?.execute(
            "INSERT INTO topics (topic_id, topic_name, data_schema) VALUES (?1, ?2, ?3)",
            params![topic.id, topic.name, topic.schema],
        )?;
        Ok(())
    }

    fn modify_topic(&self, topic: &RawTopic) -> Result<(), DbError> {
        let changed = self.conn()?.execute(
            "UPDATE topics SET topic_name = ?2, data_schema = ?3
             WHERE topic_id = ?1 AND deleted = 0",
            params![topic.id, topic.name, topic.schema],
        )?;
        if changed == 0 {
            return Err(DbError::Missing {
                kind: "topic",
                id: topic.id.clone(),
            });
        }
        Ok(())
    }

    fn soft_delete_topic(&self, id: &str) -> Result<(), DbError> {
        let changed = self.conn()?.execute(
            "UPDATE topics SET deleted = 1, deleted_at = datetime('now')
             WHERE topic_id = ?1 AND deleted = 0",
            [id],
        )?;
        if changed == 0 {
            return Err(DbError::Missing {
                kind: "topic",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn live_topics(&self) -> Result<Vec<RawTopic>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT topic_id, topic_name, data_schema FROM topics
             WHERE deleted = 0 ORDER BY topic_name",
        )?;
        let topics = stmt
            .query_map([], |row| {
                Ok(RawTopic {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    schema: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(topics)
    }

    fn insert_dc(&self, dc: &Dc) -> Result<(), DbError> {
        self.conn()?.execute(
            "INSERT INTO dcs (dc_id, dc_name) VALUES (?1, ?2)",
            params![dc.id, dc.name],
        )?;
        Ok(())
    }

    fn rename_dc(&self, id: &str, new_name: &str) -> Result<(), DbError> {
        let changed = self.conn()?.execute(
            "UPDATE dcs SET dc_name = ?2 WHERE dc_id = ?1",
            params![id, new_name],
        )?;
        if changed == 0 {
            return Err(DbError::Missing {
                kind: "dc",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn all_dcs(&self) -> Result<Vec<Dc>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT dc_id, dc_name FROM dcs ORDER BY dc_name")?;
        let dcs = stmt
            .query_map([], |row| {
                Ok(Dc {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dcs)
    }
}

impl StorageBackend for SqliteBackend {
    fn write_event(&self, event: &Event) -> Result<(), BackendError> {
        Ok(self.insert_event(event)?)
    }

    fn search(
        &self,
        query: &Query,
        topic_ids: &IdFilter,
        dc_ids: &IdFilter,
    ) -> Result<Vec<Event>, BackendError> {
        Ok(self.search_events(query, topic_ids, dc_ids)?)
    }

    fn fetch_by_id(
        &self,
        id: &str,
        include_soft_deleted: bool,
    ) -> Result<Option<Event>, BackendError> {
        Ok(self.fetch_event(id, include_soft_deleted)?)
    }

    fn stream_ids(&self, query: &TimeQuery, sink: &mut IdSink<'_>) -> Result<(), BackendError> {
        let order = if query.ascending { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT event_id FROM events
             WHERE event_time >= ?1 AND event_time < ?2
               AND topic_id IN ({LIVE_TOPICS})
             ORDER BY event_time {order}, event_id {order}
             LIMIT ?3"
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(DbError::from)?;
        let mut rows = stmt
            .query(params![
                millis(query.start_event_time),
                millis(query.end_event_time.saturating_add(1)),
                i64::from(query.limit),
            ])
            .map_err(DbError::from)?;
        while let Some(row) = rows.next().map_err(DbError::from)? {
            let id: String = row.get(0).map_err(DbError::from)?;
            sink(id)?;
        }
        Ok(())
    }

    fn put_topic(&self, topic: &RawTopic) -> Result<(), BackendError> {
        Ok(self.insert_topic(topic)?)
    }

    fn update_topic(&self, topic: &RawTopic) -> Result<(), BackendError> {
        Ok(self.modify_topic(topic)?)
    }

    fn delete_topic(&self, id: &str) -> Result<(), BackendError> {
        Ok(self.soft_delete_topic(id)?)
    }

    fn list_topics(&self) -> Result<Vec<RawTopic>, BackendError> {
        Ok(self.live_topics()?)
    }

    fn put_dc(&self, dc: &Dc) -> Result<(), BackendError> {
        Ok(self.insert_dc(dc)?)
    }

    fn update_dc(&self, id: &str, new_name: &str) -> Result<(), BackendError> {
        Ok(self.rename_dc(id, new_name)?)
    }

    fn list_dcs(&self) -> Result<Vec<Dc>, BackendError> {
        Ok(self.all_dcs()?)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("event database closed");
        }
    }
}
