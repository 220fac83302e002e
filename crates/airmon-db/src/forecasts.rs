//! Forecast storage: each refresh replaces a location's forecast wholesale

use crate::schema::{tables, ForecastDailyRow, ForecastPointRow};
use crate::{DbClient, DbResult};
use airmon_core::{
    utc_date, ForecastDailySummary, ForecastPoint, ForecastView, Timestamp, SECS_PER_DAY,
};
use tracing::{debug, instrument};

impl DbClient {
    /// Delete every stored point and summary of the location, then insert
    /// the new set, all in one transaction. Readers see either the old or
    /// the new forecast.
    #[instrument(skip(self, points, summaries), fields(points = points.len(), days = summaries.len()))]
    pub async fn replace_forecast(
        &self,
        location_id: &str,
        points: &[ForecastPoint],
        summaries: &[ForecastDailySummary],
    ) -> DbResult<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(&format!(
            "DELETE FROM {} WHERE location_id = ?",
            tables::FORECAST_POINTS
        ))
        .bind(location_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE location_id = ?",
            tables::FORECAST_DAILY
        ))
        .bind(location_id)
        .execute(&mut *tx)
        .await?;

        for point in points {
            let weather = point.weather.as_ref().map(serde_json::to_string).transpose()?;
            let pollutants = point
                .pollutants
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(&format!(
                r#"
                INSERT INTO {} (location_id, timestamp, weather, pollutants, generated_at, valid_until)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                tables::FORECAST_POINTS
            ))
            .bind(location_id)
            .bind(point.timestamp)
            .bind(weather)
            .bind(pollutants)
            .bind(point.generated_at)
            .bind(point.valid_until)
            .execute(&mut *tx)
            .await?;
        }

        for summary in summaries {
            sqlx::query(&format!(
                "INSERT INTO {} (location_id, date, summary) VALUES (?, ?, ?)",
                tables::FORECAST_DAILY
            ))
            .bind(location_id)
            .bind(summary.date.to_string())
            .bind(serde_json::to_string(summary)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Replaced forecast for {}", location_id);
        Ok(())
    }

    /// Summaries and points for the next `days` UTC days starting at the
    /// day containing `now`
    #[instrument(skip(self))]
    pub async fn get_forecast(
        &self,
        location_id: &str,
        days: i64,
        now: Timestamp,
    ) -> DbResult<ForecastView> {
        let day_start = now - now.rem_euclid(SECS_PER_DAY);
        let horizon = day_start + days.max(0) * SECS_PER_DAY;

        let point_rows = sqlx::query_as::<_, ForecastPointRow>(&format!(
            r#"
            SELECT * FROM {}
            WHERE location_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp ASC
            "#,
            tables::FORECAST_POINTS
        ))
        .bind(location_id)
        .bind(day_start)
        .bind(horizon)
        .fetch_all(self.pool())
        .await?;

        let (first, last) = match (utc_date(day_start), utc_date(horizon)) {
            (Some(first), Some(last)) => (first.to_string(), last.to_string()),
            _ => return Ok(ForecastView::default()),
        };
        let summary_rows = sqlx::query_as::<_, ForecastDailyRow>(&format!(
            r#"
            SELECT * FROM {}
            WHERE location_id = ? AND date >= ? AND date < ?
            ORDER BY date ASC
            "#,
            tables::FORECAST_DAILY
        ))
        .bind(location_id)
        .bind(first)
        .bind(last)
        .fetch_all(self.pool())
        .await?;

        Ok(ForecastView {
            summaries: summary_rows
                .into_iter()
                .map(ForecastDailySummary::try_from)
                .collect::<DbResult<_>>()?,
            points: point_rows
                .into_iter()
                .map(ForecastPoint::try_from)
                .collect::<DbResult<_>>()?,
        })
    }
}
