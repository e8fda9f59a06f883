use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::Database;

/// The single-row local configuration: credential, recording interval and
/// the operator history filter.
#[derive(Debug, Clone)]
pub struct AppConfigRecord {
    pub token: String,
    pub record_interval_minutes: i64,
    pub email_partial: String,
    pub filter_owner: String,
}

impl Database {
    pub async fn app_config(&self) -> Result<AppConfigRecord> {
        self.execute(|conn| {
            conn.query_row(
                "SELECT token, record_interval_minutes, email_partial, filter_owner
                 FROM app_config WHERE id = 1",
                [],
                |row| {
                    Ok(AppConfigRecord {
                        token: row.get(0)?,
                        record_interval_minutes: row.get(1)?,
                        email_partial: row.get(2)?,
                        filter_owner: row.get(3)?,
                    })
                },
            )
            .with_context(|| "failed to read app config")
        })
        .await
    }

    pub async fn set_app_token(&self, token: &str) -> Result<()> {
        let token = token.to_string();
        self.execute(move |conn| {
            conn.execute("UPDATE app_config SET token = ?1 WHERE id = 1", params![token])
                .with_context(|| "failed to store token")?;
            Ok(())
        })
        .await
    }

    pub async fn set_record_interval_minutes(&self, minutes: i64) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE app_config SET record_interval_minutes = ?1 WHERE id = 1",
                params![minutes],
            )
            .with_context(|| "failed to store record interval")?;
            Ok(())
        })
        .await
    }

    pub async fn set_email_partial(&self, partial: &str) -> Result<()> {
        let partial = partial.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE app_config SET email_partial = ?1 WHERE id = 1",
                params![partial],
            )
            .with_context(|| "failed to store email partial")?;
            Ok(())
        })
        .await
    }

    pub async fn set_filter_owner(&self, filter: &str) -> Result<()> {
        let filter = filter.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE app_config SET filter_owner = ?1 WHERE id = 1",
                params![filter],
            )
            .with_context(|| "failed to store history filter")?;
            Ok(())
        })
        .await
    }
}
