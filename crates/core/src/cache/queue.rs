//! Durable queue of mutations awaiting replay.
//!
//! Records live in the `requests` table keyed by `id` and are never updated
//! after insertion; replay bookkeeping is kept in `replay_state`, which is
//! removed together with its record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::CacheDb;
use crate::Error;

/// A mutation captured while offline, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// A persisted mutation pending replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// `offline-<epoch-ms>`.
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Enqueue time in epoch milliseconds.
    pub timestamp: i64,
}

/// Retry bookkeeping for a queued mutation that failed to replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayState {
    pub id: String,
    pub attempts: u32,
    pub last_attempt_at: i64,
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
    /// Automatic replay is suspended until the record is released.
    pub parked: bool,
}

fn read_mutation(row: &rusqlite::Row<'_>) -> rusqlite::Result<(QueuedMutation, String)> {
    Ok((
        QueuedMutation {
            id: row.get(0)?,
            url: row.get(1)?,
            method: row.get(2)?,
            headers: BTreeMap::new(),
            body: row.get(4)?,
            timestamp: row.get(5)?,
        },
        row.get(3)?,
    ))
}

fn decode_headers((mut mutation, headers_json): (QueuedMutation, String)) -> Result<QueuedMutation, Error> {
    mutation.headers = serde_json::from_str(&headers_json)?;
    Ok(mutation)
}

fn read_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReplayState> {
    Ok(ReplayState {
        id: row.get(0)?,
        attempts: row.get::<_, i64>(1)? as u32,
        last_attempt_at: row.get(2)?,
        next_attempt_at: row.get(3)?,
        last_error: row.get(4)?,
        parked: row.get::<_, i32>(5)? == 1,
    })
}

impl CacheDb {
    /// Persist a mutation and return the stored record.
    ///
    /// The id is `offline-<epoch-ms>` of the enqueue time; if that id is
    /// already taken the timestamp moves forward one millisecond at a time
    /// within the same transaction.
    pub async fn enqueue_request(&self, pending: PendingMutation) -> Result<QueuedMutation, Error> {
        let now = chrono::Utc::now().timestamp_millis();
        let headers_json = serde_json::to_string(&pending.headers)?;
        self.conn
            .call(move |conn| -> Result<QueuedMutation, Error> {
                let tx = conn.transaction()?;
                let mut timestamp = now;
                loop {
                    let taken: bool = tx.query_row(
                        "SELECT EXISTS(SELECT 1 FROM requests WHERE id = ?1)",
                        params![format!("offline-{timestamp}")],
                        |row| row.get(0),
                    )?;
                    if !taken {
                        break;
                    }
                    timestamp += 1;
                }

                let id = format!("offline-{timestamp}");
                tx.execute(
                    "INSERT INTO requests (id, url, method, headers_json, body, timestamp)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![&id, &pending.url, &pending.method, &headers_json, &pending.body, timestamp],
                )?;
                tx.commit()?;

                Ok(QueuedMutation {
                    id,
                    url: pending.url,
                    method: pending.method,
                    headers: pending.headers,
                    body: pending.body,
                    timestamp,
                })
            })
            .await
            .map_err(Error::from)
    }

    /// All queued mutations in enqueue order.
    pub async fn list_requests(&self) -> Result<Vec<QueuedMutation>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<QueuedMutation>, Error> {
                let mut stmt = conn
                    .prepare("SELECT id, url, method, headers_json, body, timestamp FROM requests ORDER BY seq ASC")?;
                let rows = stmt.query_map([], read_mutation)?;
                let mutations = rows.map(|row| decode_headers(row?)).collect::<Result<Vec<_>, Error>>()?;
                Ok(mutations)
            })
            .await
            .map_err(Error::from)
    }

    /// Get a queued mutation by id.
    pub async fn get_request(&self, id: &str) -> Result<Option<QueuedMutation>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<QueuedMutation>, Error> {
                let result = conn.query_row(
                    "SELECT id, url, method, headers_json, body, timestamp FROM requests WHERE id = ?1",
                    params![id],
                    read_mutation,
                );
                match result {
                    Ok(row) => Ok(Some(decode_headers(row)?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Number of queued mutations.
    pub async fn pending_count(&self) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM requests", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a queued mutation if it is still present.
    ///
    /// Returns true only for the call that actually removed the record, so
    /// overlapping replays can tell which of them confirmed it.
    pub async fn delete_request(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM replay_state WHERE id = ?1", params![id])?;
                let deleted = tx.execute("DELETE FROM requests WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(deleted == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// Replay bookkeeping for one mutation.
    pub async fn get_replay_state(&self, id: &str) -> Result<Option<ReplayState>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<ReplayState>, Error> {
                let result = conn.query_row(
                    "SELECT id, attempts, last_attempt_at, next_attempt_at, last_error, parked
                    FROM replay_state WHERE id = ?1",
                    params![id],
                    read_state,
                );
                match result {
                    Ok(state) => Ok(Some(state)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Replay bookkeeping for every mutation that has failed at least once.
    pub async fn list_replay_states(&self) -> Result<Vec<ReplayState>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<ReplayState>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, attempts, last_attempt_at, next_attempt_at, last_error, parked
                    FROM replay_state ORDER BY id",
                )?;
                let rows = stmt.query_map([], read_state)?;
                let states = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(states)
            })
            .await
            .map_err(Error::from)
    }

    /// Store replay bookkeeping for a mutation.
    ///
    /// Returns false without writing anything if the mutation is no longer
    /// queued.
    pub async fn put_replay_state(&self, state: &ReplayState) -> Result<bool, Error> {
        let state = state.clone();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                let queued: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM requests WHERE id = ?1)",
                    params![&state.id],
                    |row| row.get(0),
                )?;
                if !queued {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO replay_state (id, attempts, last_attempt_at, next_attempt_at, last_error, parked)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(id) DO UPDATE SET
                        attempts = excluded.attempts,
                        last_attempt_at = excluded.last_attempt_at,
                        next_attempt_at = excluded.next_attempt_at,
                        last_error = excluded.last_error,
                        parked = excluded.parked",
                    params![
                        &state.id,
                        state.attempts as i64,
                        state.last_attempt_at,
                        state.next_attempt_at,
                        &state.last_error,
                        state.parked as i32,
                    ],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await
            .map_err(Error::from)
    }

    /// Forget the replay bookkeeping of a mutation, making it eligible again.
    ///
    /// Returns true if there was bookkeeping to clear.
    pub async fn release_request(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let cleared = conn.execute("DELETE FROM replay_state WHERE id = ?1", params![id])?;
                Ok(cleared == 1)
            })
            .await
            .map_err(Error::from)
    }
}
