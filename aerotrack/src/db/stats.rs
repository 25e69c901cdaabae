//! Aggregate statistics queries over the durable tables.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;

use super::{Database, DbError};
use crate::model::Aircraft;

/// Distinct aircraft per hour.
#[derive(Debug, Clone, Serialize)]
pub struct HourlyStats {
    pub hour: DateTime<Utc>,
    pub count: i64,
}

/// Per-day traffic summary.
#[derive(Debug, Clone, Serialize)]
pub struct DailyStats {
    pub date: DateTime<Utc>,
    pub unique_aircraft: i64,
    pub total_positions: i64,
}

/// Aircraft-type leaderboard entry (joined against the registry).
#[derive(Debug, Clone, Serialize)]
pub struct TypeStats {
    pub aircraft_type: String,
    pub count: i64,
}

/// Operator leaderboard entry.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorStats {
    pub operator: String,
    pub count: i64,
}

/// Totals across the whole store.
#[derive(Debug, Clone, Serialize)]
pub struct OverallStats {
    pub total_unique_aircraft: i64,
    pub total_positions: i64,
    pub total_registry_records: i64,
    pub positions_last_24h: i64,
    pub aircraft_last_24h: i64,
}

/// Altitude-band histogram over the last hour of positions.
pub type AltitudeBands = HashMap<String, i64>;

/// Busiest-period summary derived from the position history.
#[derive(Debug, Clone, Serialize)]
pub struct PeakStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busiest_hour: Option<DateTime<Utc>>,
    pub busiest_hour_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busiest_day: Option<String>,
    pub busiest_day_count: i64,
    pub avg_aircraft_per_hour: f64,
    pub total_hours_tracked: i64,
}

impl Database {
    /// Distinct aircraft per hour over the trailing window.
    pub async fn hourly_stats(&self, hours: i32) -> Result<Vec<HourlyStats>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT date_trunc('hour', timestamp) AS hour, COUNT(DISTINCT icao) AS count
            FROM position_history
            WHERE timestamp > NOW() - INTERVAL '1 hour' * $1
            GROUP BY hour
            ORDER BY hour ASC
            "#,
        )
        .bind(hours)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(HourlyStats {
                    hour: row.try_get("hour")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    pub async fn daily_stats(&self, days: i32) -> Result<Vec<DailyStats>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT date_trunc('day', timestamp) AS date,
                   COUNT(DISTINCT icao) AS unique_aircraft,
                   COUNT(*) AS total_positions
            FROM position_history
            WHERE timestamp > NOW() - INTERVAL '1 day' * $1
            GROUP BY date
            ORDER BY date ASC
            "#,
        )
        .bind(days)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DailyStats {
                    date: row.try_get("date")?,
                    unique_aircraft: row.try_get("unique_aircraft")?,
                    total_positions: row.try_get("total_positions")?,
                })
            })
            .collect()
    }

    /// Most seen aircraft types over the last 24 hours.
    pub async fn top_aircraft_types(&self, limit: i64) -> Result<Vec<TypeStats>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT f.aircraft_type, COUNT(DISTINCT p.icao) AS count
            FROM position_history p
            JOIN faa_registry f ON p.icao = f.icao
            WHERE f.aircraft_type IS NOT NULL AND f.aircraft_type != ''
              AND p.timestamp > NOW() - INTERVAL '24 hours'
            GROUP BY f.aircraft_type
            ORDER BY count DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TypeStats {
                    aircraft_type: row.try_get("aircraft_type")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    /// Most seen operators over the last 24 hours.
    pub async fn top_operators(&self, limit: i64) -> Result<Vec<OperatorStats>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT f.owner, COUNT(DISTINCT p.icao) AS count
            FROM position_history p
            JOIN faa_registry f ON p.icao = f.icao
            WHERE f.owner IS NOT NULL AND f.owner != ''
              AND p.timestamp > NOW() - INTERVAL '24 hours'
            GROUP BY f.owner
            ORDER BY count DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(OperatorStats {
                    operator: row.try_get("owner")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    pub async fn overall_stats(&self) -> Result<OverallStats, DbError> {
        let total_unique_aircraft: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT icao) FROM position_history")
                .fetch_one(self.pool())
                .await?;
        let total_positions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM position_history")
            .fetch_one(self.pool())
            .await?;
        let total_registry_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM faa_registry")
            .fetch_one(self.pool())
            .await?;
        let positions_last_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM position_history WHERE timestamp > NOW() - INTERVAL '24 hours'",
        )
        .fetch_one(self.pool())
        .await?;
        let aircraft_last_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT icao) FROM position_history WHERE timestamp > NOW() - INTERVAL '24 hours'",
        )
        .fetch_one(self.pool())
        .await?;

        Ok(OverallStats {
            total_unique_aircraft,
            total_positions,
            total_registry_records,
            positions_last_24h,
            aircraft_last_24h,
        })
    }

    /// Histogram of the last hour's positions by altitude band.
    pub async fn altitude_distribution(&self) -> Result<AltitudeBands, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT CASE
                       WHEN altitude_ft < 1000 THEN 'ground'
                       WHEN altitude_ft < 10000 THEN 'low'
                       WHEN altitude_ft < 25000 THEN 'medium'
                       WHEN altitude_ft < 35000 THEN 'high'
                       ELSE 'very_high'
                   END AS band,
                   COUNT(*) AS count
            FROM position_history
            WHERE timestamp > NOW() - INTERVAL '1 hour'
              AND altitude_ft IS NOT NULL
            GROUP BY band
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        let mut bands = AltitudeBands::new();
        for row in &rows {
            bands.insert(row.try_get("band")?, row.try_get("count")?);
        }
        Ok(bands)
    }

    /// Most recently seen aircraft rows, enriched from the registry.
    pub async fn recent_aircraft(&self, limit: i64) -> Result<Vec<Aircraft>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT a.icao, a.callsign, a.lat, a.lon, a.altitude_ft, a.speed_kt, a.heading,
                   a.squawk, a.on_ground, a.last_seen,
                   f.registration, f.aircraft_type, f.owner
            FROM aircraft a
            LEFT JOIN faa_registry f ON a.icao = f.icao
            ORDER BY a.last_seen DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let mut ac = Aircraft::new(
                    row.try_get::<String, _>("icao")?,
                    row.try_get("last_seen")?,
                );
                ac.callsign = row.try_get("callsign")?;
                ac.lat = row.try_get("lat")?;
                ac.lon = row.try_get("lon")?;
                ac.alt_ft = row.try_get("altitude_ft")?;
                ac.speed_kt = row.try_get("speed_kt")?;
                ac.heading = row.try_get("heading")?;
                ac.squawk = row.try_get("squawk")?;
                ac.on_ground = row.try_get("on_ground")?;
                ac.registration = row.try_get("registration")?;
                ac.aircraft_type = row.try_get("aircraft_type")?;
                ac.operator = row.try_get("owner")?;
                Ok(ac)
            })
            .collect()
    }

    /// Busiest hour (7 days), busiest day (30 days), and the average
    /// aircraft per tracked hour.
    pub async fn peak_stats(&self) -> Result<PeakStats, DbError> {
        let hour_row = sqlx::query(
            r#"
            SELECT date_trunc('hour', timestamp) AS hour, COUNT(DISTINCT icao) AS count
            FROM position_history
            WHERE timestamp > NOW() - INTERVAL '7 days'
            GROUP BY hour
            ORDER BY count DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool())
        .await?;

        let day_row = sqlx::query(
            r#"
            SELECT date_trunc('day', timestamp)::date::text AS day, COUNT(DISTINCT icao) AS count
            FROM position_history
            WHERE timestamp > NOW() - INTERVAL '30 days'
            GROUP BY day
            ORDER BY count DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool())
        .await?;

        let avg_row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT date_trunc('hour', timestamp)) AS hours,
                   COUNT(DISTINCT icao) AS total_aircraft
            FROM position_history
            WHERE timestamp > NOW() - INTERVAL '7 days'
            "#,
        )
        .fetch_one(self.pool())
        .await?;

        let mut stats = PeakStats {
            busiest_hour: None,
            busiest_hour_count: 0,
            busiest_day: None,
            busiest_day_count: 0,
            avg_aircraft_per_hour: 0.0,
            total_hours_tracked: 0,
        };

        if let Some(row) = hour_row {
            stats.busiest_hour = Some(row.try_get("hour")?);
            stats.busiest_hour_count = row.try_get("count")?;
        }
        if let Some(row) = day_row {
            stats.busiest_day = Some(row.try_get("day")?);
            stats.busiest_day_count = row.try_get("count")?;
        }
        let hours: i64 = avg_row.try_get("hours")?;
        let total_aircraft: i64 = avg_row.try_get("total_aircraft")?;
        if hours > 0 {
            stats.total_hours_tracked = hours;
            stats.avg_aircraft_per_hour = total_aircraft as f64 / hours as f64;
        }

        Ok(stats)
    }
}
