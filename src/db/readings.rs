use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{parse_datetime, Database};
use crate::models::{HistoryRecord, OwnerIdentity, Sample};

fn read_record(row: &Row<'_>) -> Result<HistoryRecord> {
    Ok(HistoryRecord {
        id: row.get(0)?,
        owner: OwnerIdentity::new(row.get::<_, String>(1)?),
        sample: Sample {
            temp: row.get(2)?,
            humidity_air: row.get(3)?,
            humidity_soil: row.get(4)?,
            gas_flammable: row.get(5)?,
            gas_toxic: row.get(6)?,
            is_raining: row.get::<_, i64>(7)? != 0,
            captured_at: parse_datetime(&row.get::<_, String>(8)?)?,
        },
    })
}

const SELECT_COLUMNS: &str =
    "id, owner, temp, humidity_air, humidity_soil, gas_flammable, gas_toxic, is_raining, captured_at";

impl Database {
    pub async fn insert_reading(&self, owner: &OwnerIdentity, sample: &Sample) -> Result<()> {
        let owner = owner.clone();
        let sample = sample.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO readings
                    (owner, temp, humidity_air, humidity_soil, gas_flammable, gas_toxic, is_raining, captured_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    owner.as_str(),
                    sample.temp,
                    sample.humidity_air,
                    sample.humidity_soil,
                    sample.gas_flammable,
                    sample.gas_toxic,
                    i64::from(sample.is_raining),
                    sample.captured_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert reading")?;
            Ok(())
        })
        .await
    }

    /// Every record for one owner, newest first.
    pub async fn readings_for_owner(&self, owner: &OwnerIdentity) -> Result<Vec<HistoryRecord>> {
        let owner = owner.clone();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM readings WHERE owner = ?1 ORDER BY captured_at DESC"
            ))?;
            let mut rows = stmt.query(params![owner.as_str()])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(read_record(row)?);
            }
            Ok(records)
        })
        .await
    }

    /// Every record regardless of owner, newest first. Operator-facing view
    /// used by the local history screen when no filter is set.
    pub async fn all_readings(&self) -> Result<Vec<HistoryRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM readings ORDER BY captured_at DESC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(read_record(row)?);
            }
            Ok(records)
        })
        .await
    }

    pub async fn purge_readings_for_owner(&self, owner: &OwnerIdentity) -> Result<usize> {
        let owner = owner.clone();
        self.execute(move |conn| {
            let deleted = conn
                .execute("DELETE FROM readings WHERE owner = ?1", params![owner.as_str()])
                .with_context(|| "failed to purge readings")?;
            Ok(deleted)
        })
        .await
    }

    pub async fn purge_all_readings(&self) -> Result<usize> {
        self.execute(|conn| {
            let deleted = conn
                .execute("DELETE FROM readings", [])
                .with_context(|| "failed to clear readings")?;
            Ok(deleted)
        })
        .await
    }
}
