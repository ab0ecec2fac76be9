use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use crate::errors::FleetError;
use super::types::{ManifestEntry, ResultRecord, ResultStatus, StoredResult};
use super::ResultSink;

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_payload(raw: Option<String>) -> rusqlite::Result<Option<serde_json::Value>> {
    raw.map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_status(raw: &str) -> rusqlite::Result<ResultStatus> {
    raw.parse()
        .map_err(|e: FleetError| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

const SELECT_STORED: &str = "SELECT r.seq, r.job_id, r.worker, r.url, r.status, r.payload, r.received_at, m.recorded_at \
     FROM manifest m JOIN results r ON r.seq = m.result_seq";

fn stored_from_row(row: &rusqlite::Row) -> rusqlite::Result<StoredResult> {
    Ok(StoredResult {
        seq: row.get(0)?,
        record: ResultRecord {
            job_id: row.get(1)?,
            worker: row.get(2)?,
            url: row.get(3)?,
            status: parse_status(&row.get::<_, String>(4)?)?,
            payload: parse_payload(row.get(5)?)?,
            received_at: parse_timestamp(&row.get::<_, String>(6)?)?,
        },
        recorded_at: parse_timestamp(&row.get::<_, String>(7)?)?,
    })
}

impl ResultSink {
    /// Append a result and its manifest entry in one transaction. A job id
    /// already in the manifest is rejected and nothing is written.
    pub fn accept(&self, record: &ResultRecord) -> Result<ManifestEntry, FleetError> {
        let payload = record.payload.as_ref().map(serde_json::to_string).transpose()?;
        let recorded_at = Utc::now();

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| FleetError::Database(format!("Failed to begin transaction: {}", e)))?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM manifest WHERE job_id = ?1)",
                rusqlite::params![record.job_id],
                |row| row.get(0),
            )
            .map_err(|e| FleetError::Database(format!("Manifest lookup failed: {}", e)))?;
        if exists {
            return Err(FleetError::Duplicate(format!(
                "result for job '{}' already recorded", record.job_id
            )));
        }

        tx.execute(
            "INSERT INTO results (job_id, worker, url, status, payload, received_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                record.job_id,
                record.worker,
                record.url,
                record.status.as_str(),
                payload,
                record.received_at.to_rfc3339(),
            ],
        ).map_err(|e| FleetError::Database(format!("Failed to insert result: {}", e)))?;
        let result_seq = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO manifest (job_id, result_seq, recorded_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![record.job_id, result_seq, recorded_at.to_rfc3339()],
        ).map_err(|e| FleetError::Database(format!("Failed to insert manifest entry: {}", e)))?;

        tx.commit()
            .map_err(|e| FleetError::Database(format!("Failed to commit result: {}", e)))?;

        Ok(ManifestEntry {
            job_id: record.job_id.clone(),
            result_seq,
            recorded_at,
        })
    }

    pub fn contains(&self, job_id: &str) -> Result<bool, FleetError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM manifest WHERE job_id = ?1)",
            rusqlite::params![job_id],
            |row| row.get(0),
        ).map_err(|e| FleetError::Database(format!("Manifest lookup failed: {}", e)))
    }

    pub fn get(&self, job_id: &str) -> Result<Option<StoredResult>, FleetError> {
        let conn = self.lock()?;
        let sql = format!("{} WHERE m.job_id = ?1", SELECT_STORED);
        conn.query_row(&sql, rusqlite::params![job_id], stored_from_row)
            .optional()
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))
    }

    /// Most recently recorded results, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredResult>, FleetError> {
        let conn = self.lock()?;
        let sql = format!("{} ORDER BY r.seq DESC LIMIT ?1", SELECT_STORED);
        let mut stmt = conn.prepare(&sql)
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt.query_map(rusqlite::params![limit as i64], stored_from_row)
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| FleetError::Database(format!("Row error: {}", e)))?);
        }
        Ok(results)
    }

    pub fn count(&self) -> Result<u64, FleetError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM manifest", [], |row| row.get(0))
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;
        Ok(count as u64)
    }
}
