//! Cache tier operations.
//!
//! A tier is a named collection of response snapshots keyed by request
//! identity. Writes are upserts, so a tier holds at most one entry per key.
//! Deleting a tier removes its entries through `ON DELETE CASCADE`.
//!
//! Every tier records the application that created it. Tiers written before
//! ownership was recorded have no owner.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;
use url::Url;

use super::connection::CacheDb;
use super::hash::compute_cache_key;
use crate::{Error, HttpRequest, HttpResponse};

/// A cached response snapshot for one request identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub key: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub stored_at: String,
}

impl CachedResponse {
    /// Snapshot a response for the identity of `request`.
    pub fn capture(request: &HttpRequest, response: &HttpResponse) -> Self {
        Self::for_identity(&request.method, &request.url, response)
    }

    /// Snapshot a response for an explicit method and URL.
    pub fn for_identity(method: &str, url: &Url, response: &HttpResponse) -> Self {
        Self {
            key: compute_cache_key(method, url),
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn into_response(self) -> HttpResponse {
        HttpResponse { status: self.status, headers: self.headers, body: self.body }
    }
}

/// Summary of a tier for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInfo {
    pub name: String,
    /// Application that created the tier.
    pub app: Option<String>,
    pub created_at: String,
    pub entries: u64,
}

fn upsert_entry(conn: &rusqlite::Connection, tier: &str, entry: &CachedResponse, headers_json: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO cache_entries (tier, key, method, url, status, headers_json, body, stored_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(tier, key) DO UPDATE SET
            method = excluded.method,
            url = excluded.url,
            status = excluded.status,
            headers_json = excluded.headers_json,
            body = excluded.body,
            stored_at = excluded.stored_at",
        params![
            tier,
            &entry.key,
            &entry.method,
            &entry.url,
            entry.status as i64,
            headers_json,
            entry.body.as_ref(),
            &entry.stored_at,
        ],
    )?;
    Ok(())
}

fn insert_tier(conn: &rusqlite::Connection, app: &str, tier: &str) -> rusqlite::Result<bool> {
    let created = conn.execute(
        "INSERT OR IGNORE INTO cache_tiers (name, created_at, app) VALUES (?1, ?2, ?3)",
        params![tier, chrono::Utc::now().to_rfc3339(), app],
    )?;
    conn.execute("UPDATE cache_tiers SET app = ?2 WHERE name = ?1 AND app IS NULL", params![tier, app])?;
    Ok(created == 1)
}

impl CacheDb {
    /// Create a tier owned by `app` if it doesn't exist.
    ///
    /// Returns true if the tier was created by this call.
    pub async fn ensure_tier(&self, app: &str, tier: &str) -> Result<bool, Error> {
        let app = app.to_string();
        let tier = tier.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> { Ok(insert_tier(conn, &app, &tier)?) })
            .await
            .map_err(Error::from)
    }

    /// Check whether a tier exists.
    pub async fn tier_exists(&self, tier: &str) -> Result<bool, Error> {
        let tier = tier.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM cache_tiers WHERE name = ?1)",
                    params![tier],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// List all tiers with their entry counts, ordered by name.
    pub async fn list_tiers(&self) -> Result<Vec<TierInfo>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<TierInfo>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT t.name, t.app, t.created_at, COUNT(e.key)
                    FROM cache_tiers t LEFT JOIN cache_entries e ON e.tier = t.name
                    GROUP BY t.name ORDER BY t.name",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(TierInfo {
                        name: row.get(0)?,
                        app: row.get(1)?,
                        created_at: row.get(2)?,
                        entries: row.get::<_, i64>(3)? as u64,
                    })
                })?;
                let tiers = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(tiers)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a tier and all its entries.
    ///
    /// Returns true if the tier existed.
    pub async fn delete_tier(&self, tier: &str) -> Result<bool, Error> {
        let tier = tier.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM cache_entries WHERE tier = ?1", params![tier])?;
                let deleted = tx.execute("DELETE FROM cache_tiers WHERE name = ?1", params![tier])?;
                tx.commit()?;
                Ok(deleted == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or overwrite an entry, creating the tier for `app` if needed.
    pub async fn put_entry(&self, app: &str, tier: &str, entry: &CachedResponse) -> Result<(), Error> {
        self.put_entries(app, tier, std::slice::from_ref(entry)).await
    }

    /// Write a batch of entries in one transaction.
    ///
    /// The tier and every entry become visible together, or nothing is
    /// written at all.
    pub async fn put_entries(&self, app: &str, tier: &str, entries: &[CachedResponse]) -> Result<(), Error> {
        let app = app.to_string();
        let tier = tier.to_string();
        let entries = entries.to_vec();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                insert_tier(&tx, &app, &tier)?;
                for entry in &entries {
                    let headers_json = serde_json::to_string(&entry.headers)?;
                    upsert_entry(&tx, &tier, entry, &headers_json)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get an entry by request identity key.
    ///
    /// Returns None if the tier or the key doesn't exist.
    pub async fn get_entry(&self, tier: &str, key: &str) -> Result<Option<CachedResponse>, Error> {
        let tier = tier.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CachedResponse>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key, method, url, status, headers_json, body, stored_at
                    FROM cache_entries WHERE tier = ?1 AND key = ?2",
                )?;

                let result = stmt.query_row(params![tier, key], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Vec<u8>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                });

                match result {
                    Ok((key, method, url, status, headers_json, body, stored_at)) => Ok(Some(CachedResponse {
                        key,
                        method,
                        url,
                        status: status as u16,
                        headers: serde_json::from_str(&headers_json)?,
                        body: Bytes::from(body),
                        stored_at,
                    })),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries in a tier.
    pub async fn entry_count(&self, tier: &str) -> Result<u64, Error> {
        let tier = tier.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM cache_entries WHERE tier = ?1", params![tier], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Drop the oldest entries of a tier until at most `max_entries` remain.
    ///
    /// Returns the number of deleted entries.
    pub async fn trim_tier(&self, tier: &str, max_entries: usize) -> Result<u64, Error> {
        let tier = tier.to_string();
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM cache_entries WHERE tier = ?1", params![tier], |row| row.get(0))?;
                if count <= max {
                    return Ok(0);
                }

                let to_delete = count - max;
                let deleted = conn.execute(
                    "DELETE FROM cache_entries WHERE tier = ?1 AND key IN (
                    SELECT key FROM cache_entries WHERE tier = ?1 ORDER BY stored_at ASC LIMIT ?2
                )",
                    params![tier, to_delete],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
