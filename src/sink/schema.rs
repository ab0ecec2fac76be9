pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS results (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    worker TEXT,
    url TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('success', 'failure')),
    payload TEXT,
    received_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS manifest (
    job_id TEXT PRIMARY KEY,
    result_seq INTEGER NOT NULL UNIQUE REFERENCES results(seq),
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_job ON results(job_id);

CREATE TRIGGER IF NOT EXISTS results_no_update BEFORE UPDATE ON results
BEGIN SELECT RAISE(ABORT, 'results are append-only'); END;

CREATE TRIGGER IF NOT EXISTS results_no_delete BEFORE DELETE ON results
BEGIN SELECT RAISE(ABORT, 'results are append-only'); END;

CREATE TRIGGER IF NOT EXISTS manifest_no_update BEFORE UPDATE ON manifest
BEGIN SELECT RAISE(ABORT, 'manifest is append-only'); END;

CREATE TRIGGER IF NOT EXISTS manifest_no_delete BEFORE DELETE ON manifest
BEGIN SELECT RAISE(ABORT, 'manifest is append-only'); END;
";
