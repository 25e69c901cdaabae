//! Polar coverage map.
//!
//! Tracks the maximum observed range per 10-degree bearing bucket (36
//! buckets), along with a contact counter per bucket and the all-time
//! best. Bucket maxima are merged into the durable store so coverage
//! survives restarts; the merge keeps the greatest range ever recorded.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::Database;

/// Number of bearing buckets (10 degrees each).
pub const BUCKETS: usize = 36;

/// One bucket of the polar map.
#[derive(Debug, Clone, Serialize)]
pub struct BucketStats {
    /// Bucket start bearing in degrees (0, 10, ... 350).
    pub bearing: u32,
    pub max_range_nm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_range_icao: Option<String>,
    pub contact_count: i64,
}

/// Full polar map snapshot, served by the API.
#[derive(Debug, Clone, Serialize)]
pub struct RangeStats {
    pub buckets: Vec<BucketStats>,
    pub all_time_max_nm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_time_max_icao: Option<String>,
    pub total_contacts: i64,
    pub updated_at: DateTime<Utc>,
}

struct Buckets {
    max_nm: [f64; BUCKETS],
    icao: [Option<String>; BUCKETS],
    count: [i64; BUCKETS],
    all_time_max_nm: f64,
    all_time_max_icao: Option<String>,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            max_nm: [0.0; BUCKETS],
            icao: std::array::from_fn(|_| None),
            count: [0; BUCKETS],
            all_time_max_nm: 0.0,
            all_time_max_icao: None,
        }
    }
}

/// Thread-safe polar range map.
pub struct RangeTracker {
    buckets: Mutex<Buckets>,
    db: Option<Arc<Database>>,
}

impl RangeTracker {
    pub fn new(db: Option<Arc<Database>>) -> Self {
        Self {
            buckets: Mutex::new(Buckets::default()),
            db,
        }
    }

    /// Restore per-bucket state from the durable store.
    pub async fn load(&self) {
        let Some(db) = &self.db else {
            return;
        };

        let rows = match db.load_range_stats().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to load range stats");
                return;
            }
        };

        let mut buckets = self.buckets.lock().unwrap();
        for row in rows {
            let idx = row.bearing_bucket as usize;
            if idx >= BUCKETS {
                continue;
            }
            buckets.max_nm[idx] = row.max_range_nm;
            buckets.icao[idx] = row.max_range_icao.clone();
            buckets.count[idx] = row.contact_count;

            if row.max_range_nm > buckets.all_time_max_nm {
                buckets.all_time_max_nm = row.max_range_nm;
                buckets.all_time_max_icao = row.max_range_icao;
            }
        }
        debug!("Range stats restored");
    }

    /// Record a contact at `bearing`/`distance_nm`.
    ///
    /// Always bumps the bucket's contact counter; a new bucket maximum
    /// also schedules a durable save of that bucket.
    pub fn record(&self, bearing: f64, distance_nm: f64, icao: &str) {
        if !(0.0..360.0).contains(&bearing) || distance_nm <= 0.0 {
            return;
        }

        let bucket = ((bearing / 10.0) as usize).min(BUCKETS - 1);

        let save = {
            let mut buckets = self.buckets.lock().unwrap();
            buckets.count[bucket] += 1;

            let mut save = None;
            if distance_nm > buckets.max_nm[bucket] {
                buckets.max_nm[bucket] = distance_nm;
                buckets.icao[bucket] = Some(icao.to_string());
                save = Some(buckets.count[bucket]);
            }
            if distance_nm > buckets.all_time_max_nm {
                buckets.all_time_max_nm = distance_nm;
                buckets.all_time_max_icao = Some(icao.to_string());
            }
            save
        };

        if let (Some(count), Some(db)) = (save, &self.db) {
            let db = Arc::clone(db);
            let icao = icao.to_string();
            tokio::spawn(async move {
                if let Err(e) = db
                    .save_range_bucket(bucket as i32, distance_nm, &icao, count)
                    .await
                {
                    warn!(bucket, error = %e, "Failed to save range bucket");
                }
            });
        }
    }

    /// Deep-copied snapshot of the full polar map.
    pub fn snapshot(&self) -> RangeStats {
        let buckets = self.buckets.lock().unwrap();

        let mut out = Vec::with_capacity(BUCKETS);
        let mut total = 0;
        for i in 0..BUCKETS {
            total += buckets.count[i];
            out.push(BucketStats {
                bearing: (i * 10) as u32,
                max_range_nm: buckets.max_nm[i],
                max_range_icao: buckets.icao[i].clone(),
                contact_count: buckets.count[i],
            });
        }

        RangeStats {
            buckets: out,
            all_time_max_nm: buckets.all_time_max_nm,
            all_time_max_icao: buckets.all_time_max_icao.clone(),
            total_contacts: total,
            updated_at: Utc::now(),
        }
    }

    /// All-time maximum range and the aircraft that set it.
    pub fn max_range(&self) -> (f64, Option<String>) {
        let buckets = self.buckets.lock().unwrap();
        (buckets.all_time_max_nm, buckets.all_time_max_icao.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_accumulation() {
        let t = RangeTracker::new(None);

        // Three contacts at bearing 37 with mixed ranges: the bucket keeps
        // the max and the aircraft that set it, and counts all three.
        t.record(37.0, 30.0, "AAA111");
        t.record(37.0, 50.0, "BBB222");
        t.record(37.0, 40.0, "CCC333");

        let snap = t.snapshot();
        let bucket = &snap.buckets[3];
        assert_eq!(bucket.bearing, 30);
        assert_eq!(bucket.max_range_nm, 50.0);
        assert_eq!(bucket.max_range_icao.as_deref(), Some("BBB222"));
        assert_eq!(bucket.contact_count, 3);
        assert_eq!(snap.total_contacts, 3);
        assert_eq!(snap.all_time_max_nm, 50.0);
    }

    #[test]
    fn test_bucket_max_is_monotonic() {
        let t = RangeTracker::new(None);
        t.record(100.0, 80.0, "AAA111");
        t.record(100.0, 20.0, "BBB222");

        let snap = t.snapshot();
        assert_eq!(snap.buckets[10].max_range_nm, 80.0);
        assert_eq!(snap.buckets[10].max_range_icao.as_deref(), Some("AAA111"));
    }

    #[test]
    fn test_bearing_359_lands_in_last_bucket() {
        let t = RangeTracker::new(None);
        t.record(359.9, 12.0, "AAA111");
        let snap = t.snapshot();
        assert_eq!(snap.buckets[35].contact_count, 1);
        assert_eq!(snap.buckets[35].max_range_nm, 12.0);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let t = RangeTracker::new(None);
        t.record(-1.0, 10.0, "AAA111");
        t.record(360.0, 10.0, "AAA111");
        t.record(90.0, 0.0, "AAA111");
        t.record(90.0, -5.0, "AAA111");

        assert_eq!(t.snapshot().total_contacts, 0);
    }

    #[test]
    fn test_max_range_accessor() {
        let t = RangeTracker::new(None);
        assert_eq!(t.max_range(), (0.0, None));

        t.record(10.0, 42.5, "AAA111");
        let (max, icao) = t.max_range();
        assert_eq!(max, 42.5);
        assert_eq!(icao.as_deref(), Some("AAA111"));
    }
}
