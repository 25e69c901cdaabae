//! Flight session rows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;

use super::{Database, DbError};

/// One row of the `flights` table.
#[derive(Debug, Clone, Serialize)]
pub struct FlightRecord {
    pub id: i64,
    pub icao: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_alt_ft: Option<i32>,
    pub total_dist_nm: f64,
    pub completed: bool,
}

impl Database {
    /// Insert an open flight row, returning its id.
    pub async fn create_flight(&self, flight: &FlightRecord) -> Result<i64, DbError> {
        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO flights (icao, callsign, registration, aircraft_type, first_seen, last_seen,
                                 first_lat, first_lon, last_lat, last_lon, max_alt_ft, total_dist_nm, completed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(&flight.icao)
        .bind(&flight.callsign)
        .bind(&flight.registration)
        .bind(&flight.aircraft_type)
        .bind(flight.first_seen)
        .bind(flight.last_seen)
        .bind(flight.first_lat)
        .bind(flight.first_lon)
        .bind(flight.last_lat)
        .bind(flight.last_lon)
        .bind(flight.max_alt_ft)
        .bind(flight.total_dist_nm)
        .bind(flight.completed)
        .fetch_one(self.pool())
        .await?;
        Ok(i64::from(id))
    }

    /// Update an existing flight row; used to finalize on completion.
    pub async fn update_flight(&self, flight: &FlightRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE flights SET
                callsign = COALESCE($2, callsign),
                last_seen = $3,
                last_lat = COALESCE($4, last_lat),
                last_lon = COALESCE($5, last_lon),
                max_alt_ft = GREATEST(COALESCE(max_alt_ft, 0), COALESCE($6, 0)),
                total_dist_nm = $7,
                completed = $8
            WHERE id = $1
            "#,
        )
        .bind(flight.id as i32)
        .bind(&flight.callsign)
        .bind(flight.last_seen)
        .bind(flight.last_lat)
        .bind(flight.last_lon)
        .bind(flight.max_alt_ft)
        .bind(flight.total_dist_nm)
        .bind(flight.completed)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Completed flights, most recent first.
    pub async fn recent_flights(&self, limit: i64) -> Result<Vec<FlightRecord>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT id, icao, callsign, registration, aircraft_type, first_seen, last_seen,
                   first_lat, first_lon, last_lat, last_lon, max_alt_ft, total_dist_nm, completed
            FROM flights
            WHERE completed = TRUE
            ORDER BY last_seen DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(flight_from_row).collect()
    }

    pub async fn flight_by_id(&self, id: i64) -> Result<Option<FlightRecord>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT id, icao, callsign, registration, aircraft_type, first_seen, last_seen,
                   first_lat, first_lon, last_lat, last_lon, max_alt_ft, total_dist_nm, completed
            FROM flights
            WHERE id = $1
            "#,
        )
        .bind(id as i32)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(flight_from_row).transpose()
    }
}

fn flight_from_row(row: &sqlx::postgres::PgRow) -> Result<FlightRecord, DbError> {
    Ok(FlightRecord {
        id: i64::from(row.try_get::<i32, _>("id")?),
        icao: row.try_get("icao")?,
        callsign: row.try_get("callsign")?,
        registration: row.try_get("registration")?,
        aircraft_type: row.try_get("aircraft_type")?,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
        first_lat: row.try_get("first_lat")?,
        first_lon: row.try_get("first_lon")?,
        last_lat: row.try_get("last_lat")?,
        last_lon: row.try_get("last_lon")?,
        max_alt_ft: row.try_get("max_alt_ft")?,
        total_dist_nm: row.try_get("total_dist_nm")?,
        completed: row.try_get("completed")?,
    })
}
