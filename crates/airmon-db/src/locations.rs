//! Location registry backed by the locations table

use crate::schema::{tables, LocationRow};
use crate::{DbClient, DbError, DbResult};
use airmon_core::{haversine_m, Location, LocationRegistry, Timestamp};
use async_trait::async_trait;
use tracing::{debug, instrument};

impl DbClient {
    /// Insert a location or update its descriptive fields.
    ///
    /// Measurement counters are owned by `record_measurement` and never
    /// overwritten here.
    #[instrument(skip(self, location), fields(location = %location.id))]
    pub async fn upsert_location(&self, location: &Location) -> DbResult<()> {
        let sources = serde_json::to_string(&location.sources)?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (
                id, name, latitude, longitude, radius_m, sources,
                collection_interval_secs, active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                radius_m = excluded.radius_m,
                sources = excluded.sources,
                collection_interval_secs = excluded.collection_interval_secs,
                active = excluded.active
            "#,
            tables::LOCATIONS
        ))
        .bind(&location.id)
        .bind(&location.name)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.radius_m)
        .bind(sources)
        .bind(location.collection_interval_secs)
        .bind(location.active)
        .execute(self.pool())
        .await?;

        debug!("Upserted location {}", location.id);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_location(&self, id: &str) -> DbResult<Option<Location>> {
        let row = sqlx::query_as::<_, LocationRow>(&format!(
            "SELECT * FROM {} WHERE id = ?",
            tables::LOCATIONS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.map(Location::try_from).transpose()
    }

    #[instrument(skip(self))]
    pub async fn list_locations(&self, active_only: bool) -> DbResult<Vec<Location>> {
        let sql = if active_only {
            format!("SELECT * FROM {} WHERE active = 1 ORDER BY id", tables::LOCATIONS)
        } else {
            format!("SELECT * FROM {} ORDER BY id", tables::LOCATIONS)
        };
        let rows = sqlx::query_as::<_, LocationRow>(&sql)
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(Location::try_from).collect()
    }

    /// Count one persisted sample against the location in a single
    /// statement, so concurrent cycles never lose an increment.
    #[instrument(skip(self))]
    pub async fn increment_measurements(&self, id: &str, at: Timestamp) -> DbResult<()> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET
                total_measurements = total_measurements + 1,
                first_measurement = COALESCE(first_measurement, ?),
                last_measurement = MAX(COALESCE(last_measurement, ?), ?)
            WHERE id = ?
            "#,
            tables::LOCATIONS
        ))
        .bind(at)
        .bind(at)
        .bind(at)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Active locations whose center lies within `radius_m` of the point,
    /// closest first
    #[instrument(skip(self))]
    pub async fn find_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
    ) -> DbResult<Vec<(Location, f64)>> {
        let mut nearby: Vec<(Location, f64)> = self
            .list_locations(true)
            .await?
            .into_iter()
            .map(|loc| {
                let d = haversine_m(latitude, longitude, loc.latitude, loc.longitude);
                (loc, d)
            })
            .filter(|(_, d)| *d <= radius_m)
            .collect();
        nearby.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(nearby)
    }
}

#[async_trait]
impl LocationRegistry for DbClient {
    async fn list_active_locations(&self) -> anyhow::Result<Vec<Location>> {
        Ok(self.list_locations(true).await?)
    }

    async fn record_measurement(&self, location_id: &str, at: Timestamp) -> anyhow::Result<()> {
        Ok(self.increment_measurements(location_id, at).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(id: &str, lat: f64, lon: f64) -> Location {
        Location {
            id: id.into(),
            name: id.to_uppercase(),
            latitude: lat,
            longitude: lon,
            radius_m: 1_000.0,
            sources: vec!["openweather".into(), "waqi".into()],
            collection_interval_secs: 300,
            active: true,
            first_measurement: None,
            last_measurement: None,
            total_measurements: 0,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = DbClient::in_memory().await.unwrap();
        db.upsert_location(&location("hn-01", 21.0285, 105.8542))
            .await
            .unwrap();

        let loc = db.get_location("hn-01").await.unwrap().unwrap();
        assert_eq!(loc, location("hn-01", 21.0285, 105.8542));
        assert!(db.get_location("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counters_survive_upsert() {
        let db = DbClient::in_memory().await.unwrap();
        db.upsert_location(&location("hn-01", 21.0, 105.8)).await.unwrap();

        db.record_measurement("hn-01", 2_000).await.unwrap();
        db.record_measurement("hn-01", 1_000).await.unwrap();
        db.record_measurement("hn-01", 3_000).await.unwrap();

        let mut renamed = location("hn-01", 21.0, 105.8);
        renamed.name = "Renamed".into();
        db.upsert_location(&renamed).await.unwrap();

        let loc = db.get_location("hn-01").await.unwrap().unwrap();
        assert_eq!(loc.name, "Renamed");
        assert_eq!(loc.total_measurements, 3);
        assert_eq!(loc.first_measurement, Some(2_000));
        assert_eq!(loc.last_measurement, Some(3_000));
    }

    #[tokio::test]
    async fn test_record_measurement_unknown_location() {
        let db = DbClient::in_memory().await.unwrap();
        assert!(matches!(
            db.increment_measurements("nope", 1).await,
            Err(DbError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_inactive_locations_are_skipped() {
        let db = DbClient::in_memory().await.unwrap();
        let mut off = location("off", 10.0, 106.0);
        off.active = false;
        db.upsert_location(&off).await.unwrap();
        db.upsert_location(&location("on", 10.0, 106.0)).await.unwrap();

        let active = db.list_active_locations().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "on");
        assert_eq!(db.list_locations(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_find_nearby_sorted_by_distance() {
        let db = DbClient::in_memory().await.unwrap();
        db.upsert_location(&location("far", 21.0400, 105.8542)).await.unwrap();
        db.upsert_location(&location("near", 21.0290, 105.8542)).await.unwrap();
        db.upsert_location(&location("hcmc", 10.7769, 106.7009)).await.unwrap();

        let found = db.find_nearby(21.0285, 105.8542, 5_000.0).await.unwrap();
        let ids: Vec<_> = found.iter().map(|(l, _)| l.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
        assert!(found[0].1 < 100.0);
    }
}
