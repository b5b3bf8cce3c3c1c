//! Database schema initialization.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        -- Parsed messages, one row per (account, uid)
        CREATE TABLE IF NOT EXISTS messages (
            account_id TEXT NOT NULL,
            uid INTEGER NOT NULL,
            message_id TEXT,
            subject TEXT NOT NULL DEFAULT '',
            sender TEXT NOT NULL DEFAULT '',
            recipients TEXT NOT NULL DEFAULT '',
            date INTEGER NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            html_body TEXT,
            has_attachments INTEGER NOT NULL DEFAULT 0,
            in_reply_to TEXT,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (account_id, uid)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_account_date ON messages(account_id, date DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_message_id ON messages(message_id);

        -- Attachment metadata
        CREATE TABLE IF NOT EXISTS attachments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id TEXT NOT NULL,
            uid INTEGER NOT NULL,
            filename TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(account_id, uid);

        -- Highest processed uid per account and mailbox epoch
        CREATE TABLE IF NOT EXISTS watermarks (
            account_id TEXT PRIMARY KEY,
            uid_validity INTEGER,
            last_seen INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
