use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use crate::errors::FleetError;

/// Durable result store: the append-only `results` table and the `manifest`
/// ledger that indexes it by job id.
pub struct ResultSink {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl ResultSink {
    pub fn new(path: &str) -> Result<Self, FleetError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| FleetError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| FleetError::Database(format!("Failed to set pragmas: {}", e)))?;

        let sink = Self { conn: Arc::new(Mutex::new(conn)) };
        sink.initialize()?;
        Ok(sink)
    }

    pub fn in_memory() -> Result<Self, FleetError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FleetError::Database(format!("Failed to open in-memory db: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| FleetError::Database(format!("Failed to set pragmas: {}", e)))?;
        let sink = Self { conn: Arc::new(Mutex::new(conn)) };
        sink.initialize()?;
        Ok(sink)
    }

    fn initialize(&self) -> Result<(), FleetError> {
        let conn = self.lock()?;
        conn.execute_batch(super::schema::CREATE_TABLES)
            .map_err(|e| FleetError::Database(format!("Failed to create tables: {}", e)))?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, FleetError> {
        self.conn
            .lock()
            .map_err(|_| FleetError::Database("Result store lock poisoned".into()))
    }
}

impl Clone for ResultSink {
    fn clone(&self) -> Self {
        Self { conn: self.conn.clone() }
    }
}
