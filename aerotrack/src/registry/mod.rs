//! External aircraft-registry enrichment.
//!
//! Looks up airframe identity (registration, type, operator) by ICAO24
//! against the hexdb.io HTTP API. Results - including "not found" - are
//! cached in memory for 24 hours, and successful fetches are written
//! through to the `faa_registry` table so later runs can skip the
//! network entirely. The caller is the tracker's single enrichment
//! worker, so a miss costs one HTTP round trip off the ingest path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::db::Database;
use crate::model::RegistryInfo;

const DEFAULT_BASE_URL: &str = "https://hexdb.io";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
struct CacheEntry {
    /// `None` marks a negative result so unknown airframes are not
    /// re-fetched on every sighting.
    info: Option<RegistryInfo>,
    fetched_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < CACHE_TTL
    }
}

/// Response shape of the hexdb.io aircraft endpoint.
#[derive(Debug, Deserialize)]
struct HexDbRecord {
    #[serde(rename = "Registration", default)]
    registration: String,
    #[serde(rename = "Type", default)]
    type_name: String,
    #[serde(rename = "ICAOTypeCode", default)]
    icao_type_code: String,
    #[serde(rename = "Manufacturer", default)]
    manufacturer: String,
    #[serde(rename = "RegisteredOwners", default)]
    registered_owners: String,
}

/// Caching registry client.
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
    cache: DashMap<String, CacheEntry>,
    db: Option<Arc<Database>>,
}

impl RegistryClient {
    pub fn new(db: Option<Arc<Database>>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, db)
    }

    /// Point the client at a different endpoint; used by tests.
    pub fn with_base_url(base_url: impl Into<String>, db: Option<Arc<Database>>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
            base_url: base_url.into(),
            cache: DashMap::new(),
            db,
        }
    }

    /// Resolve registry info for an airframe.
    ///
    /// Order: fresh memory cache, durable store, then the external API
    /// (with write-through on success). Returns `None` for unknown
    /// airframes and on any fetch error.
    pub async fn lookup(&self, icao: &str) -> Option<RegistryInfo> {
        if let Some(entry) = self.cache.get(icao) {
            if entry.is_fresh() {
                return entry.info.clone();
            }
        }

        if let Some(db) = &self.db {
            match db.faa_info(icao).await {
                Ok(Some(info)) => {
                    self.cache.insert(
                        icao.to_string(),
                        CacheEntry {
                            info: Some(info.clone()),
                            fetched_at: Instant::now(),
                        },
                    );
                    return Some(info);
                }
                Ok(None) => {}
                Err(e) => warn!(icao = %icao, error = %e, "Registry store read failed"),
            }
        }

        let info = self.fetch(icao).await;

        if let (Some(info), Some(db)) = (&info, &self.db) {
            if let Err(e) = db.save_faa_info(icao, info).await {
                warn!(icao = %icao, error = %e, "Registry store write failed");
            }
        }

        self.cache.insert(
            icao.to_string(),
            CacheEntry {
                info: info.clone(),
                fetched_at: Instant::now(),
            },
        );
        info
    }

    async fn fetch(&self, icao: &str) -> Option<RegistryInfo> {
        let url = format!("{}/api/v1/aircraft/{}", self.base_url, icao);

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(icao = %icao, error = %e, "Registry lookup failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(icao = %icao, status = %response.status(), "Registry has no record");
            return None;
        }

        let record: HexDbRecord = match response.json().await {
            Ok(r) => r,
            Err(e) => {
                warn!(icao = %icao, error = %e, "Registry response decode failed");
                return None;
            }
        };

        if record.registration.is_empty() && record.type_name.is_empty() {
            return None;
        }

        Some(RegistryInfo {
            registration: non_empty(record.registration),
            aircraft_type: non_empty(record.icao_type_code),
            manufacturer: non_empty(record.manufacturer),
            model: non_empty(record.type_name),
            operator: None,
            owner: non_empty(record.registered_owners),
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP server answering every request with `body`, counting
    /// how many requests it saw.
    async fn serve_json(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let server_hits = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                server_hits.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = sock.write_all(response.as_bytes()).await;
            }
        });

        (format!("http://{}", addr), hits)
    }

    #[tokio::test]
    async fn test_lookup_parses_and_caches() {
        let (url, hits) = serve_json(
            r#"{"Registration":"N123AB","Type":"Boeing 737-823","ICAOTypeCode":"B738","Manufacturer":"Boeing","RegisteredOwners":"American Airlines"}"#,
        )
        .await;
        let client = RegistryClient::with_base_url(url, None);

        let info = client.lookup("A0A96C").await.expect("registry record");
        assert_eq!(info.registration.as_deref(), Some("N123AB"));
        assert_eq!(info.aircraft_type.as_deref(), Some("B738"));
        assert_eq!(info.model.as_deref(), Some("Boeing 737-823"));
        assert_eq!(info.owner.as_deref(), Some("American Airlines"));

        // Second lookup is served from cache.
        let again = client.lookup("A0A96C").await.unwrap();
        assert_eq!(again.registration, info.registration);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_record_cached_as_negative() {
        let (url, hits) = serve_json(r#"{"Registration":"","Type":""}"#).await;
        let client = RegistryClient::with_base_url(url, None);

        assert!(client.lookup("DEAD01").await.is_none());
        assert!(client.lookup("DEAD01").await.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1, "negative result not cached");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_returns_none() {
        // Nothing listens here; the lookup must swallow the error.
        let client = RegistryClient::with_base_url("http://127.0.0.1:1", None);
        assert!(client.lookup("ABC123").await.is_none());
    }
}
