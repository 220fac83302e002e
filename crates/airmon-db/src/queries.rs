//! Raw sample and aggregate queries

use crate::schema::{tables, AggregateRow, RawSampleRow};
use crate::{DbClient, DbResult};
use airmon_core::{Aggregate, RawSample, Resolution, Timestamp};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, instrument};

impl DbClient {
    /// Append one accepted sample, returning its row id
    #[instrument(skip(self, sample), fields(location = %sample.location_id))]
    pub async fn insert_raw(&self, sample: &RawSample) -> DbResult<i64> {
        let mut tx = self.pool().begin().await?;
        let id = insert_raw_tx(&mut tx, sample).await?;
        tx.commit().await?;

        debug!("Inserted raw sample at {}", sample.timestamp);
        Ok(id)
    }

    /// Append several samples in one transaction
    #[instrument(skip(self, samples), fields(count = samples.len()))]
    pub async fn insert_raw_batch(&self, samples: &[RawSample]) -> DbResult<u64> {
        let mut tx = self.pool().begin().await?;
        for sample in samples {
            insert_raw_tx(&mut tx, sample).await?;
        }
        tx.commit().await?;

        Ok(samples.len() as u64)
    }

    /// Most recent accepted sample for a location
    #[instrument(skip(self))]
    pub async fn get_latest(&self, location_id: &str) -> DbResult<Option<RawSample>> {
        let row = sqlx::query_as::<_, RawSampleRow>(&format!(
            "SELECT * FROM {} WHERE location_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
            tables::RAW_SAMPLES
        ))
        .bind(location_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(RawSample::try_from).transpose()
    }

    /// Raw samples with `start <= timestamp < end`, oldest first
    #[instrument(skip(self))]
    pub async fn get_raw_range(
        &self,
        location_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> DbResult<Vec<RawSample>> {
        let rows = sqlx::query_as::<_, RawSampleRow>(&format!(
            r#"
            SELECT * FROM {}
            WHERE location_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp ASC, id ASC
            "#,
            tables::RAW_SAMPLES
        ))
        .bind(location_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;

        debug!(
            "Retrieved {} raw samples between {} and {}",
            rows.len(),
            start,
            end
        );
        rows.into_iter().map(RawSample::try_from).collect()
    }

    /// Count of raw samples stored for a location
    #[instrument(skip(self))]
    pub async fn count_raw(&self, location_id: &str) -> DbResult<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) as count FROM {} WHERE location_id = ?",
            tables::RAW_SAMPLES
        ))
        .bind(location_id)
        .fetch_one(self.pool())
        .await?;

        Ok(row.get("count"))
    }

    /// Insert or replace the aggregate for (location, bucket).
    ///
    /// `created_at` of an existing row is preserved so that recomputing a
    /// bucket never extends its retention.
    #[instrument(skip(self, agg), fields(location = %agg.location_id, resolution = %agg.resolution))]
    pub async fn upsert_aggregate(&self, agg: &Aggregate) -> DbResult<()> {
        let row = AggregateRow::from_aggregate(agg)?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (
                location_id, bucket_start, sample_count, source_count,
                pm25_avg, best_period, worst_period, weather, air, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (location_id, bucket_start) DO UPDATE SET
                sample_count = excluded.sample_count,
                source_count = excluded.source_count,
                pm25_avg = excluded.pm25_avg,
                best_period = excluded.best_period,
                worst_period = excluded.worst_period,
                weather = excluded.weather,
                air = excluded.air
            "#,
            tables::aggregate(agg.resolution)
        ))
        .bind(&row.location_id)
        .bind(row.bucket_start)
        .bind(row.sample_count)
        .bind(row.source_count)
        .bind(row.pm25_avg)
        .bind(row.best_period)
        .bind(row.worst_period)
        .bind(&row.weather)
        .bind(&row.air)
        .bind(row.created_at)
        .execute(self.pool())
        .await?;

        debug!("Upserted aggregate bucket {}", agg.bucket_start);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_aggregate(
        &self,
        location_id: &str,
        resolution: Resolution,
        bucket_start: Timestamp,
    ) -> DbResult<Option<Aggregate>> {
        let row = sqlx::query_as::<_, AggregateRow>(&format!(
            "SELECT * FROM {} WHERE location_id = ? AND bucket_start = ?",
            tables::aggregate(resolution)
        ))
        .bind(location_id)
        .bind(bucket_start)
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| r.into_aggregate(resolution)).transpose()
    }

    /// Aggregates with `start <= bucket_start < end`, oldest first
    #[instrument(skip(self))]
    pub async fn get_range(
        &self,
        location_id: &str,
        resolution: Resolution,
        start: Timestamp,
        end: Timestamp,
    ) -> DbResult<Vec<Aggregate>> {
        let rows = sqlx::query_as::<_, AggregateRow>(&format!(
            r#"
            SELECT * FROM {}
            WHERE location_id = ? AND bucket_start >= ? AND bucket_start < ?
            ORDER BY bucket_start ASC
            "#,
            tables::aggregate(resolution)
        ))
        .bind(location_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|r| r.into_aggregate(resolution))
            .collect()
    }

    /// Delete raw samples created before `cutoff`
    #[instrument(skip(self))]
    pub async fn delete_raw_created_before(&self, cutoff: Timestamp) -> DbResult<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE created_at < ?",
            tables::RAW_SAMPLES
        ))
        .bind(cutoff)
        .execute(self.pool())
        .await?;

        let deleted = result.rows_affected();
        debug!("Deleted {} raw samples created before {}", deleted, cutoff);
        Ok(deleted)
    }

    /// Delete aggregates of one resolution created before `cutoff`
    #[instrument(skip(self))]
    pub async fn delete_aggregates_created_before(
        &self,
        resolution: Resolution,
        cutoff: Timestamp,
    ) -> DbResult<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE created_at < ?",
            tables::aggregate(resolution)
        ))
        .bind(cutoff)
        .execute(self.pool())
        .await?;

        let deleted = result.rows_affected();
        debug!(
            "Deleted {} {} aggregates created before {}",
            deleted, resolution, cutoff
        );
        Ok(deleted)
    }
}

async fn insert_raw_tx(tx: &mut Transaction<'_, Sqlite>, sample: &RawSample) -> DbResult<i64> {
    let provenance = serde_json::to_string(&sample.provenance)?;
    let secondary = serde_json::to_string(&sample.secondary)?;
    let w = &sample.weather;
    let p = &sample.pollutants;

    let result = sqlx::query(&format!(
        r#"
        INSERT INTO {} (
            location_id, timestamp,
            temperature, humidity, pressure, wind_speed, wind_direction, rain, weather_condition,
            aqi, aqi_category, aqi_level, pm25, pm10, co, no2, o3, so2, nh3,
            match_kind, provenance, secondary, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        tables::RAW_SAMPLES
    ))
    .bind(&sample.location_id)
    .bind(sample.timestamp)
    .bind(w.temperature)
    .bind(w.humidity)
    .bind(w.pressure)
    .bind(w.wind_speed)
    .bind(w.wind_direction)
    .bind(w.rain)
    .bind(w.condition.as_deref())
    .bind(p.aqi)
    .bind(p.aqi_category.map(i64::from))
    .bind(sample.aqi_level.map(|l| l.as_str()))
    .bind(p.pm25)
    .bind(p.pm10)
    .bind(p.co)
    .bind(p.no2)
    .bind(p.o3)
    .bind(p.so2)
    .bind(p.nh3)
    .bind(sample.provenance.kind.as_str())
    .bind(provenance)
    .bind(secondary)
    .bind(sample.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.last_insert_rowid())
}
