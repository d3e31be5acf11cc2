//! Key/value settings; currently the persisted queue pause flag.

use anyhow::Result;
use sqlx::Row;

use super::db::Ledger;
use super::types::PauseState;

const QUEUE_PAUSED: &str = "queue.paused";
const QUEUE_PAUSE_REASON: &str = "queue.pause_reason";

impl Ledger {
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(r#"SELECT value FROM settings WHERE key = ?1"#)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_setting(&self, key: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM settings WHERE key = ?1"#)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_pause_state(&self) -> Result<PauseState> {
        let paused = self.get_setting(QUEUE_PAUSED).await?.as_deref() == Some("true");
        let reason = if paused {
            self.get_setting(QUEUE_PAUSE_REASON).await?
        } else {
            None
        };
        Ok(PauseState { paused, reason })
    }

    pub async fn save_pause_state(&self, state: &PauseState) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(QUEUE_PAUSED)
        .bind(if state.paused { "true" } else { "false" })
        .execute(&mut *tx)
        .await?;
        match (&state.reason, state.paused) {
            (Some(reason), true) => {
                sqlx::query(
                    r#"
                    INSERT INTO settings (key, value) VALUES (?1, ?2)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value
                    "#,
                )
                .bind(QUEUE_PAUSE_REASON)
                .bind(reason)
                .execute(&mut *tx)
                .await?;
            }
            _ => {
                sqlx::query(r#"DELETE FROM settings WHERE key = ?1"#)
                    .bind(QUEUE_PAUSE_REASON)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
