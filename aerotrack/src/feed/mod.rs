//! Receiver feed client.
//!
//! Maintains a TCP connection to the local Mode-S decoder (dump1090 or
//! compatible), parses whichever wire format the feed speaks, and hands
//! partial aircraft records to the tracker. The client reconnects forever
//! with exponential backoff and only stops when the shutdown token fires.
//!
//! ```text
//! ┌──────────┐   TCP    ┌────────────┐   Aircraft   ┌─────────┐
//! │ receiver │ ───────► │ FeedClient │ ───────────► │ Tracker │
//! └──────────┘          │  sbs/beast │              └─────────┘
//!                       └────────────┘
//! ```

mod stats;

pub use stats::{FeedStats, FeedStatsSnapshot};

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::beast::{self, CprDecoder};
use crate::model::ReceiverLocation;
use crate::sbs::{self, SbsLine};
use crate::tracker::Tracker;

/// Soft cap on the Beast accumulation buffer.
const BEAST_BUFFER_CAP: usize = 16 * 1024;
/// Bytes retained when the cap is exceeded.
const BEAST_BUFFER_KEEP: usize = 8 * 1024;
/// How often the CPR frame cache is swept.
const CPR_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Wire format spoken by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Sbs,
    Beast,
}

impl FromStr for FeedFormat {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sbs" => Ok(Self::Sbs),
            "beast" => Ok(Self::Beast),
            other => Err(FeedError::UnknownFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sbs => write!(f, "sbs"),
            Self::Beast => write!(f, "beast"),
        }
    }
}

/// Feed client errors. All of these are retried by the reconnect loop;
/// they only surface in logs.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("unknown feed format '{0}' (expected 'sbs' or 'beast')")]
    UnknownFormat(String),

    #[error("dial {addr} timed out after {timeout:?}")]
    DialTimeout { addr: String, timeout: Duration },

    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
}

/// Feed client configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    pub format: FeedFormat,
    /// Receiver location, used as the CPR decode reference.
    pub receiver: Option<ReceiverLocation>,
    pub dial_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 30003,
            format: FeedFormat::Sbs,
            receiver: None,
            dial_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Reconnecting TCP client for the receiver feed.
pub struct FeedClient {
    config: FeedConfig,
    stats: Arc<FeedStats>,
    tracker: Arc<Tracker>,
}

impl FeedClient {
    pub fn new(config: FeedConfig, tracker: Arc<Tracker>) -> Self {
        let stats = Arc::new(FeedStats::new(
            config.host.clone(),
            config.port,
            config.format.to_string(),
        ));
        Self {
            config,
            stats,
            tracker,
        }
    }

    /// Shared statistics handle for the API.
    pub fn stats(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }

    /// Run the connect/read/reconnect loop until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!(addr = %addr, format = %self.config.format, "Feed client started");

        // Companion ticker closing out the per-second message rate window.
        let rate_stats = Arc::clone(&self.stats);
        let rate_shutdown = shutdown.clone();
        let rate_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = rate_shutdown.cancelled() => break,
                    _ = interval.tick() => rate_stats.roll_rate_window(),
                }
            }
        });

        let mut backoff = self.config.initial_backoff;
        while !shutdown.is_cancelled() {
            match self.connect_and_read(&addr, &shutdown).await {
                Ok(()) => {
                    // Clean EOF from the receiver; reconnect right away.
                    self.stats.set_connected(false, Utc::now());
                    backoff = self.config.initial_backoff;
                }
                Err(e) => {
                    self.stats.set_connected(false, Utc::now());
                    if shutdown.is_cancelled() {
                        break;
                    }
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "Feed connection error");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    self.stats.record_reconnect();
                }
            }
        }

        let _ = rate_task.await;
        info!("Feed client stopped");
    }

    async fn connect_and_read(
        &self,
        addr: &str,
        shutdown: &CancellationToken,
    ) -> Result<(), FeedError> {
        let stream = match tokio::time::timeout(self.config.dial_timeout, TcpStream::connect(addr))
            .await
        {
            Err(_) => {
                return Err(FeedError::DialTimeout {
                    addr: addr.to_string(),
                    timeout: self.config.dial_timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(FeedError::Dial {
                    addr: addr.to_string(),
                    source: e,
                })
            }
            Ok(Ok(stream)) => stream,
        };

        info!(addr = %addr, "Feed connected");
        self.stats.set_connected(true, Utc::now());

        match self.config.format {
            FeedFormat::Sbs => self.read_sbs(stream, shutdown).await,
            FeedFormat::Beast => self.read_beast(stream, shutdown).await,
        }
    }

    async fn read_sbs(
        &self,
        stream: TcpStream,
        shutdown: &CancellationToken,
    ) -> Result<(), FeedError> {
        let mut lines = BufReader::new(stream).lines();

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                line = lines.next_line() => line.map_err(FeedError::Read)?,
            };
            let Some(line) = line else {
                debug!("Feed connection closed");
                return Ok(());
            };

            let now = Utc::now();
            self.stats.record_message(now);

            match sbs::parse_line(&line, now) {
                SbsLine::Msg { aircraft, msg_type } => {
                    self.stats.record_msg_type(msg_type);
                    self.stats.record_valid();
                    if aircraft.has_position() {
                        self.stats.record_position();
                    }
                    if aircraft.speed_kt.is_some() || aircraft.heading.is_some() {
                        self.stats.record_velocity();
                    }
                    self.tracker.update(aircraft).await;
                }
                SbsLine::Ignored => {}
                SbsLine::Invalid => self.stats.record_invalid(),
            }
        }
    }

    async fn read_beast(
        &self,
        mut stream: TcpStream,
        shutdown: &CancellationToken,
    ) -> Result<(), FeedError> {
        let cpr = CprDecoder::new();
        if let Some(rx) = self.config.receiver {
            cpr.set_reference(rx.lat, rx.lon);
        }

        let mut chunk = [0u8; 4096];
        let mut buf: Vec<u8> = Vec::with_capacity(BEAST_BUFFER_CAP);
        let mut last_sweep = Instant::now();

        loop {
            let n = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                n = stream.read(&mut chunk) => n.map_err(FeedError::Read)?,
            };
            if n == 0 {
                debug!("Feed connection closed");
                return Ok(());
            }

            buf.extend_from_slice(&chunk[..n]);

            loop {
                let (frame, consumed) = beast::parse_frame(&buf);
                if consumed == 0 {
                    break;
                }
                buf.drain(..consumed);

                if let Some(frame) = frame {
                    let now = Utc::now();
                    self.stats.record_message(now);
                    if let Some(aircraft) = beast::decode(&frame, &cpr, now) {
                        self.stats.record_valid();
                        if aircraft.has_position() {
                            self.stats.record_position();
                        }
                        if aircraft.speed_kt.is_some() {
                            self.stats.record_velocity();
                        }
                        self.tracker.update(aircraft).await;
                    }
                }
            }

            // A long unparsable run (wrong port, corrupted stream) must
            // not grow the buffer without bound.
            if buf.len() > BEAST_BUFFER_CAP {
                let drop = buf.len() - BEAST_BUFFER_KEEP;
                buf.drain(..drop);
            }

            if last_sweep.elapsed() >= CPR_SWEEP_INTERVAL {
                cpr.sweep();
                last_sweep = Instant::now();
            }
        }
    }
}

/// Exponential backoff schedule used by the reconnect loop, exposed for
/// tests.
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerConfig;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_format_from_str() {
        assert_eq!("sbs".parse::<FeedFormat>().unwrap(), FeedFormat::Sbs);
        assert_eq!("BEAST".parse::<FeedFormat>().unwrap(), FeedFormat::Beast);
        assert!("uat".parse::<FeedFormat>().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let max = Duration::from_secs(30);
        let mut b = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..7 {
            b = next_backoff(b, max);
            seen.push(b.as_secs());
        }
        assert_eq!(seen, vec![2, 4, 8, 16, 30, 30, 30]);
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 3s");
    }

    #[tokio::test]
    async fn test_sbs_feed_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(
                b"MSG,3,111,11111,A0A96C,111111,2025-01-01,00:00:00.000,,,,37000,,,33.1234,-96.7890,,,,,,\r\n",
            )
            .await
            .unwrap();
            sock.write_all(b"not,an,sbs,line\r\n").await.unwrap();
            // Hold the socket open so the client does not reconnect-loop
            // against a dead listener during the test.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let tracker = Arc::new(Tracker::new(TrackerConfig::default()));
        let config = FeedConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        };
        let client = FeedClient::new(config, Arc::clone(&tracker));
        let stats = client.stats();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(client.run(shutdown.clone()));

        let t = Arc::clone(&tracker);
        wait_for(move || t.get("A0A96C").is_some()).await;

        let ac = tracker.get("A0A96C").unwrap();
        assert_eq!(ac.alt_ft, Some(37_000));
        assert_eq!(ac.lat, Some(33.1234));

        let snap = stats.snapshot();
        assert!(snap.connected);
        assert_eq!(snap.valid, 1);
        assert_eq!(snap.invalid, 1);
        assert_eq!(snap.message_types[2], 1);
        assert_eq!(snap.with_position, 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_beast_feed_end_to_end() {
        // DF17 airborne position frame for 40621D at 38000 ft, framed with
        // type '3' and a dummy timestamp.
        let payload: [u8; 14] = [
            0x8D, 0x40, 0x62, 0x1D, 0x58, 0xC3, 0x82, 0xD6, 0x90, 0xC8, 0xAC, 0x28, 0x63, 0xA7,
        ];
        let mut wire = vec![beast::ESCAPE, beast::TYPE_MODE_S_LONG, 0, 0, 0, 0, 0, 1, 200];
        wire.extend_from_slice(&payload);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&wire).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let tracker = Arc::new(Tracker::new(TrackerConfig::default()));
        let config = FeedConfig {
            host: "127.0.0.1".to_string(),
            port,
            format: FeedFormat::Beast,
            ..Default::default()
        };
        let client = FeedClient::new(config, Arc::clone(&tracker));
        let stats = client.stats();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(client.run(shutdown.clone()));

        let t = Arc::clone(&tracker);
        wait_for(move || t.get("40621D").is_some()).await;

        let ac = tracker.get("40621D").unwrap();
        assert_eq!(ac.alt_ft, Some(38_000));
        assert!(ac.rssi.is_some());
        assert_eq!(stats.snapshot().valid, 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
