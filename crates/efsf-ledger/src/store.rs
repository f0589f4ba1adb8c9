use std::path::PathBuf;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use efsf_core::{DestructionCertificate, util::sha256_hex_concat};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerOptions {
    pub path: PathBuf,
}

impl LedgerOptions {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub seq: i64,
    pub appended_at: DateTime<Utc>,
    pub prev_hash_hex: String,
    pub hash_hex: String,
    pub certificate: DestructionCertificate,
}

#[derive(Debug, Clone)]
pub struct CertificateLedger {
    conn: Connection,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const SELECT_ENTRY: &str = "SELECT seq, appended_at, prev_hash_hex, hash_hex, certificate_json FROM certificates";

impl CertificateLedger {
    pub async fn open(opts: LedgerOptions) -> Result<Self, LedgerError> {
        if let Some(parent) = opts.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create ledger dir {}", parent.display()))?;
        }

        let conn = Connection::open(&opts.path)
            .await
            .map_err(|e| LedgerError::Other(anyhow::anyhow!(e)))?;
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS certificates (
                  seq              INTEGER PRIMARY KEY AUTOINCREMENT,
                  certificate_id   TEXT NOT NULL UNIQUE,
                  resource_id      TEXT NOT NULL,
                  method           TEXT NOT NULL,
                  appended_at      TEXT NOT NULL,
                  prev_hash_hex    TEXT NOT NULL,
                  hash_hex         TEXT NOT NULL,
                  certificate_json TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS certificates_resource_idx ON certificates(resource_id);
                "#,
            )?;
            Ok(())
        })
        .await
        .map_err(|e| LedgerError::Other(anyhow::anyhow!(e)))?;

        Ok(Self { conn })
    }

    /// Appends `cert` to the chain. Appending a certificate id that is already
    /// present returns the existing entry and leaves the chain untouched.
    pub async fn append(&self, cert: &DestructionCertificate) -> Result<LedgerEntry, LedgerError> {
        // Struct field order is fixed, so the serialized form hashes stably.
        let certificate_json = serde_json::to_string(cert)?;
        let certificate = cert.clone();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let existing = tx
                    .query_row(
                        &format!("{SELECT_ENTRY} WHERE certificate_id = ?1"),
                        params![certificate.id()],
                        entry_from_row,
                    )
                    .optional()?;
                if let Some(entry) = existing {
                    return Ok(entry);
                }

                let last: Option<String> = tx
                    .query_row(
                        "SELECT hash_hex FROM certificates ORDER BY seq DESC LIMIT 1",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;

                let prev_hash_hex = last.unwrap_or_else(|| GENESIS_HASH.to_string());
                let hash_hex = sha256_hex_concat(&prev_hash_hex, certificate_json.as_bytes());
                let appended_at = Utc::now();

                tx.execute(
                    "INSERT INTO certificates (certificate_id, resource_id, method, appended_at, prev_hash_hex, hash_hex, certificate_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        certificate.id(),
                        certificate.resource_id(),
                        certificate.method().as_str(),
                        appended_at.to_rfc3339(),
                        prev_hash_hex,
                        hash_hex,
                        certificate_json
                    ],
                )?;

                let seq = tx.last_insert_rowid();
                tx.commit()?;

                Ok(LedgerEntry {
                    seq,
                    appended_at,
                    prev_hash_hex,
                    hash_hex,
                    certificate,
                })
            })
            .await
            .map_err(|e| LedgerError::Other(anyhow::anyhow!(e)))
    }

    /// Newest first.
    pub async fn list(&self, limit: usize, offset: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("{SELECT_ENTRY} ORDER BY seq DESC LIMIT ?1 OFFSET ?2"))?;
                let rows = stmt.query_map(params![limit as i64, offset as i64], entry_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(|e| LedgerError::Other(anyhow::anyhow!(e)))
    }

    pub async fn find_by_resource(&self, resource_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let resource_id = resource_id.to_string();
        self.conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("{SELECT_ENTRY} WHERE resource_id = ?1 ORDER BY seq DESC LIMIT 1"),
                        params![resource_id],
                        entry_from_row,
                    )
                    .optional()?)
            })
            .await
            .map_err(|e| LedgerError::Other(anyhow::anyhow!(e)))
    }

    pub async fn len(&self) -> Result<u64, LedgerError> {
        self.conn
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM certificates", [], |row| row.get(0))?;
                Ok(n as u64)
            })
            .await
            .map_err(|e| LedgerError::Other(anyhow::anyhow!(e)))
    }

    pub async fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len().await? == 0)
    }

    /// Walks the chain from genesis; returns the number of verified entries.
    pub async fn verify_chain(&self) -> Result<u64, LedgerError> {
        let rows: Vec<(i64, String, String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, prev_hash_hex, hash_hex, certificate_json FROM certificates ORDER BY seq ASC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(|e| LedgerError::Other(anyhow::anyhow!(e)))?;

        let mut prev_hash_hex = GENESIS_HASH.to_string();
        let mut verified = 0u64;
        for (seq, row_prev_hash, row_hash, certificate_json) in rows {
            if row_prev_hash != prev_hash_hex {
                return Err(LedgerError::Other(anyhow::anyhow!(
                    "ledger chain broken at seq={seq}: expected prev_hash={prev_hash_hex}, got {row_prev_hash}"
                )));
            }

            let computed = sha256_hex_concat(&prev_hash_hex, certificate_json.as_bytes());
            if computed != row_hash {
                return Err(LedgerError::Other(anyhow::anyhow!(
                    "ledger hash mismatch at seq={seq}: expected hash={computed}, got {row_hash}"
                )));
            }

            prev_hash_hex = row_hash;
            verified += 1;
        }

        Ok(verified)
    }
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let seq: i64 = row.get(0)?;
    let appended_at: String = row.get(1)?;
    let appended_at = appended_at.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let prev_hash_hex: String = row.get(2)?;
    let hash_hex: String = row.get(3)?;
    let certificate_json: String = row.get(4)?;
    let certificate: DestructionCertificate =
        serde_json::from_str(&certificate_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(LedgerEntry {
        seq,
        appended_at,
        prev_hash_hex,
        hash_hex,
        certificate,
    })
}

#[cfg(test)]
mod tests {
    use efsf_core::{DestructionMethod, ResourceKind};
    use pretty_assertions::assert_eq;

    use super::*;

    fn cert(resource: &str, method: DestructionMethod) -> DestructionCertificate {
        DestructionCertificate::unsigned(resource, ResourceKind::EphemeralRecord, method, Utc::now())
    }

    async fn open_in(dir: &tempfile::TempDir) -> CertificateLedger {
        CertificateLedger::open(LedgerOptions::new(dir.path().join("ledger.sqlite")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn appends_and_verifies_chain() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_in(&dir).await;

        let first = ledger.append(&cert("r1", DestructionMethod::Explicit)).await.unwrap();
        let second = ledger.append(&cert("r2", DestructionMethod::Expired)).await.unwrap();
        assert_eq!(first.prev_hash_hex, GENESIS_HASH);
        assert_eq!(second.prev_hash_hex, first.hash_hex);

        assert_eq!(ledger.verify_chain().await.unwrap(), 2);
        let list = ledger.list(10, 0).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].certificate.resource_id(), "r2");
        assert_eq!(list[1].certificate, first.certificate);
    }

    #[tokio::test]
    async fn find_by_resource_returns_latest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_in(&dir).await;
        ledger.append(&cert("r1", DestructionMethod::Explicit)).await.unwrap();

        let hit = ledger.find_by_resource("r1").await.unwrap().unwrap();
        assert_eq!(hit.certificate.method(), DestructionMethod::Explicit);
        assert!(ledger.find_by_resource("nope").await.unwrap().is_none());
        assert_eq!(ledger.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn appending_the_same_certificate_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_in(&dir).await;
        let c = cert("r1", DestructionMethod::Explicit);

        let first = ledger.append(&c).await.unwrap();
        let again = ledger.append(&c).await.unwrap();
        assert_eq!(again.seq, first.seq);
        assert_eq!(again.hash_hex, first.hash_hex);
        assert_eq!(ledger.len().await.unwrap(), 1);
        assert_eq!(ledger.verify_chain().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reopen_continues_chain() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = open_in(&dir).await;
            ledger.append(&cert("r1", DestructionMethod::Explicit)).await.unwrap();
        }
        let ledger = open_in(&dir).await;
        ledger.append(&cert("r2", DestructionMethod::Explicit)).await.unwrap();
        assert_eq!(ledger.verify_chain().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn detects_tampered_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_in(&dir).await;
        ledger.append(&cert("r1", DestructionMethod::Explicit)).await.unwrap();
        ledger.append(&cert("r2", DestructionMethod::Explicit)).await.unwrap();

        ledger
            .conn
            .call(|conn| {
                conn.execute(
                    "UPDATE certificates SET certificate_json = replace(certificate_json, 'EXPLICIT', 'EXPIRED') WHERE seq = 1",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let err = ledger.verify_chain().await.unwrap_err();
        assert!(err.to_string().contains("hash mismatch at seq=1"), "{err}");
    }
}
