//! Message record storage.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::Cache;
use crate::mail::types::{AttachmentInfo, MessageRecord};

fn row_to_record(row: &SqliteRow, attachments: Vec<AttachmentInfo>) -> MessageRecord {
    let recipients: String = row.get("recipients");
    MessageRecord {
        uid: row.get::<i64, _>("uid") as u32,
        message_id: row.get("message_id"),
        subject: row.get("subject"),
        sender: row.get("sender"),
        recipients: recipients
            .lines()
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect(),
        timestamp: DateTime::from_timestamp(row.get::<i64, _>("date"), 0).unwrap_or_default(),
        body: row.get("body"),
        html_body: row.get("html_body"),
        attachments,
        in_reply_to: row.get("in_reply_to"),
    }
}

impl Cache {
    /// Upsert one record and raise the account's watermark to its uid.
    ///
    /// Idempotent: storing the same record twice leaves one row.
    pub async fn store_record(&self, account_id: &str, record: &MessageRecord) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO messages
            (account_id, uid, message_id, subject, sender, recipients, date, body, html_body, has_attachments, in_reply_to, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(record.uid as i64)
        .bind(&record.message_id)
        .bind(&record.subject)
        .bind(&record.sender)
        .bind(record.recipients.join("\n"))
        .bind(record.timestamp.timestamp())
        .bind(&record.body)
        .bind(&record.html_body)
        .bind(record.has_attachments())
        .bind(&record.in_reply_to)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM attachments WHERE account_id = ? AND uid = ?")
            .bind(account_id)
            .bind(record.uid as i64)
            .execute(&mut *tx)
            .await?;

        for attachment in &record.attachments {
            sqlx::query(
                "INSERT INTO attachments (account_id, uid, filename, mime_type, size) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(account_id)
            .bind(record.uid as i64)
            .bind(&attachment.filename)
            .bind(&attachment.mime_type)
            .bind(attachment.size as i64)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO watermarks (account_id, uid_validity, last_seen, updated_at)
            VALUES (?, NULL, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                last_seen = MAX(last_seen, excluded.last_seen),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id)
        .bind(record.uid as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_record(&self, account_id: &str, uid: u32) -> Result<Option<MessageRecord>> {
        let row = sqlx::query("SELECT * FROM messages WHERE account_id = ? AND uid = ?")
            .bind(account_id)
            .bind(uid as i64)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let attachments = sqlx::query(
            "SELECT filename, mime_type, size FROM attachments WHERE account_id = ? AND uid = ? ORDER BY id",
        )
        .bind(account_id)
        .bind(uid as i64)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| AttachmentInfo {
            filename: r.get("filename"),
            mime_type: r.get("mime_type"),
            size: r.get::<i64, _>("size") as usize,
        })
        .collect();

        Ok(Some(row_to_record(&row, attachments)))
    }

    pub async fn message_count(&self, account_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE account_id = ?")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
