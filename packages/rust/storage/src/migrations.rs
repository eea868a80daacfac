//! SQL migration definitions for the session store.
//!
//! Migrations are applied in order on open. The session table name is
//! configurable, so each statement is a template with a `{table}` placeholder;
//! the name is validated as a plain identifier before substitution.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    sql: &'static str,
}

impl Migration {
    /// SQL for this migration with the table name substituted.
    pub fn sql_for(&self, table: &str) -> String {
        self.sql.replace("{table}", table)
    }
}

/// DDL for the version-tracking table of a namespace.
pub(crate) fn tracking_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table}_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);"
    )
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: session turns",
            sql: r#"
CREATE TABLE IF NOT EXISTS {table} (
    session_id    TEXT NOT NULL,
    seq           INTEGER NOT NULL,
    run_id        TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    created_at_us INTEGER NOT NULL,
    report_json   TEXT NOT NULL,
    report_hash   TEXT NOT NULL,
    PRIMARY KEY (session_id, seq),
    UNIQUE (session_id, run_id)
);

INSERT INTO {table}_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Index turns by session and time for history reads",
            sql: r#"
CREATE INDEX IF NOT EXISTS idx_{table}_session_time ON {table}(session_id, created_at_us, seq);

INSERT INTO {table}_migrations (version) VALUES (2);
"#,
        },
    ]
}
