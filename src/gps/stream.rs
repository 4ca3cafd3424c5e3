// src/gps/stream.rs
//! Position source over a line-oriented receiver stream: gpsd, a serial
//! NMEA device, or a recorded NMEA log

use super::{
    fix::GpsFix, gpsd, nmea, ErrorCallback, PositionSource, SampleCallback, SourceError,
    SubscriptionHandle, TaskRegistry,
};
use crate::{
    clock::{Clock, SystemClock},
    error::{Result, WalkError},
    geo::Coordinate,
    walk::PositionSample,
};
use std::{borrow::Cow, fmt, path::PathBuf, sync::Arc, time::Duration};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

type LineReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// Where the receiver data comes from
#[derive(Debug, Clone)]
pub enum StreamKind {
    Gpsd { host: String, port: u16 },
    Serial { port: String, baudrate: u32 },
    /// NMEA log file; `interval` is slept after each delivered sample.
    Replay { path: PathBuf, interval: Duration },
}

impl StreamKind {
    fn is_gpsd(&self) -> bool {
        matches!(self, StreamKind::Gpsd { .. })
    }

    async fn open(&self) -> Result<LineReader> {
        match self {
            StreamKind::Gpsd { host, port } => Ok(Box::new(gpsd::connect_gpsd(host, *port).await?)),
            StreamKind::Serial { port, baudrate } => {
                let serial = tokio_serial::new(port, *baudrate)
                    .timeout(Duration::from_millis(1000))
                    .open_native_async()
                    .map_err(|e| {
                        WalkError::Connection(format!("Failed to open serial port {}: {}", port, e))
                    })?;
                Ok(Box::new(BufReader::new(serial)))
            }
            StreamKind::Replay { path, .. } => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    WalkError::Connection(format!("Failed to open {}: {}", path.display(), e))
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }

    /// Feed one line to the matching parser. True when it carried a position.
    fn parse_line(&self, fix: &mut GpsFix, line: &str) -> bool {
        if self.is_gpsd() {
            match gpsd::parse_gpsd_json(fix, line) {
                Ok(has_position) => has_position,
                Err(e) => {
                    debug!("Skipping gpsd line: {}", e);
                    false
                }
            }
        } else {
            nmea::parse_nmea_sentence(fix, line)
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Gpsd { host, port } => write!(f, "gpsd at {}:{}", host, port),
            StreamKind::Serial { port, baudrate } => write!(f, "serial {} at {} baud", port, baudrate),
            StreamKind::Replay { path, .. } => write!(f, "replay of {}", path.display()),
        }
    }
}

/// Rate limits applied to a continuous subscription
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubscriptionOptions {
    pub min_distance_m: f64,
    pub min_interval: Duration,
    pub fastest_interval: Duration,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            min_distance_m: 5.0,
            min_interval: Duration::from_secs(5),
            fastest_interval: Duration::from_secs(2),
        }
    }
}

impl SubscriptionOptions {
    /// The interval actually enforced: never faster than `fastest_interval`.
    pub fn effective_interval(&self) -> Duration {
        self.min_interval.max(self.fastest_interval)
    }
}

/// Drops fixes that are too close in space or time to the last one let through.
#[derive(Debug, Clone)]
pub struct SampleFilter {
    min_distance_m: f64,
    min_interval: chrono::Duration,
    last: Option<PositionSample>,
}

impl SampleFilter {
    pub fn new(options: &SubscriptionOptions) -> Self {
        Self {
            min_distance_m: options.min_distance_m.max(0.0),
            min_interval: chrono::Duration::from_std(options.effective_interval())
                .unwrap_or_else(|_| chrono::Duration::zero()),
            last: None,
        }
    }

    pub fn accept(&mut self, sample: &PositionSample) -> bool {
        if let Some(last) = &self.last {
            let moved = last.coordinate.distance_to(&sample.coordinate);
            let elapsed = sample.timestamp.signed_duration_since(last.timestamp);
            if moved < self.min_distance_m || elapsed < self.min_interval {
                return false;
            }
        }
        self.last = Some(*sample);
        true
    }
}

/// Read lines until one yields a complete fix. `None` at end of stream.
///
/// Line noise is not an error: undecodable bytes are replaced and the line
/// is left to the parser to reject.
async fn next_sample(
    reader: &mut LineReader,
    kind: &StreamKind,
    fix: &mut GpsFix,
    clock: &dyn Clock,
) -> std::result::Result<Option<PositionSample>, SourceError> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| SourceError::Io(e.to_string()))?;
        if read == 0 {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&buf);
        if matches!(line, Cow::Owned(_)) {
            debug!("Replaced invalid bytes in received line");
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if kind.parse_line(fix, text) {
            if let Some(sample) = fix.to_sample(clock.now()) {
                return Ok(Some(sample));
            }
        }
    }
}

/// [`PositionSource`] backed by a receiver stream.
///
/// Permission means the receiver can be opened. Each subscription opens its
/// own connection and reports the first read failure or end of stream
/// through the error callback, after which it delivers nothing more.
pub struct StreamSource {
    kind: StreamKind,
    options: SubscriptionOptions,
    clock: Arc<dyn Clock>,
    tasks: TaskRegistry,
}

impl StreamSource {
    pub fn new(kind: StreamKind, options: SubscriptionOptions) -> Self {
        Self::with_clock(kind, options, Arc::new(SystemClock))
    }

    /// Fixes without a receiver timestamp are stamped with `clock`.
    pub fn with_clock(kind: StreamKind, options: SubscriptionOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            kind,
            options,
            clock,
            tasks: TaskRegistry::default(),
        }
    }

    pub fn kind(&self) -> &StreamKind {
        &self.kind
    }
}

impl PositionSource for StreamSource {
    async fn request_permission(&self) -> bool {
        match self.kind.open().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Position source {} is not accessible: {}", self.kind, e);
                false
            }
        }
    }

    async fn current_position(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Coordinate, SourceError> {
        let fetch = async {
            let mut reader = self
                .kind
                .open()
                .await
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;
            let mut fix = GpsFix::new();
            match next_sample(&mut reader, &self.kind, &mut fix, self.clock.as_ref()).await? {
                Some(sample) => Ok(sample.coordinate),
                None => Err(SourceError::Closed),
            }
        };

        tokio::time::timeout(timeout, fetch)
            .await
            .map_err(|_| SourceError::Timeout(timeout))?
    }

    fn subscribe(
        &self,
        on_sample: SampleCallback,
        on_error: ErrorCallback,
    ) -> std::result::Result<SubscriptionHandle, SourceError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SourceError::Unavailable(format!("no async runtime: {}", e)))?;

        let handle = self.tasks.next_handle();
        let kind = self.kind.clone();
        let options = self.options;
        let clock = Arc::clone(&self.clock);

        let task = runtime.spawn(async move {
            let mut reader = match kind.open().await {
                Ok(reader) => reader,
                Err(e) => {
                    on_error(SourceError::Unavailable(e.to_string()));
                    return;
                }
            };
            info!("Receiving positions from {}", kind);

            let mut fix = GpsFix::new();
            let mut filter = SampleFilter::new(&options);
            loop {
                match next_sample(&mut reader, &kind, &mut fix, clock.as_ref()).await {
                    Ok(Some(sample)) => {
                        if !filter.accept(&sample) {
                            continue;
                        }
                        debug!(
                            "Fix {:.6}, {:.6} ({})",
                            sample.latitude(),
                            sample.longitude(),
                            fix.get_fix_description()
                        );
                        on_sample(sample);
                        if let StreamKind::Replay { interval, .. } = &kind {
                            if !interval.is_zero() {
                                tokio::time::sleep(*interval).await;
                            }
                        }
                    }
                    Ok(None) => {
                        on_error(SourceError::Closed);
                        break;
                    }
                    Err(e) => {
                        on_error(e);
                        break;
                    }
                }
            }
        });

        self.tasks.insert(handle, task);
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        debug!("Cancelling subscription {}", handle.id());
        self.tasks.cancel(handle);
    }
}

/// List available serial ports
pub fn list_serial_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    const LOG: &str = "\
$GPRMC,120000,A,4807.000,N,01131.000,E,000.0,000.0,010124,,*11
$GPRMC,120001,A,4807.001,N,01131.000,E,000.0,000.0,010124,,*11
$GPRMC,120010,A,4807.010,N,01131.000,E,000.0,000.0,010124,,*11
not a sentence
$GPRMC,120020,V,,,,,,,010124,,*36
$GPRMC,120020,A,4807.020,N,01131.000,E,000.0,000.0,010124,,*11
";

    fn at(seconds: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::<chrono::Utc>::UNIX_EPOCH + chrono::Duration::seconds(seconds)
    }

    #[test]
    fn test_filter_distance_and_interval() {
        let mut filter = SampleFilter::new(&SubscriptionOptions::default());
        let origin = PositionSample::new(Coordinate::new(0.0, 0.0), at(0));
        assert!(filter.accept(&origin));

        // ~111 m away but only 1 s later
        let quick = PositionSample::new(Coordinate::new(0.0, 0.001), at(1));
        assert!(!filter.accept(&quick));

        // 10 s later but ~1 m away
        let close = PositionSample::new(Coordinate::new(0.0, 0.00001), at(10));
        assert!(!filter.accept(&close));

        let far = PositionSample::new(Coordinate::new(0.0, 0.001), at(10));
        assert!(filter.accept(&far));
    }

    #[test]
    fn test_fastest_interval_is_a_floor() {
        let options = SubscriptionOptions {
            min_distance_m: 0.0,
            min_interval: Duration::from_millis(500),
            fastest_interval: Duration::from_secs(2),
        };
        assert_eq!(options.effective_interval(), Duration::from_secs(2));

        let mut filter = SampleFilter::new(&options);
        assert!(filter.accept(&PositionSample::new(Coordinate::new(0.0, 0.0), at(0))));
        assert!(!filter.accept(&PositionSample::new(Coordinate::new(0.0, 0.0), at(1))));
        assert!(filter.accept(&PositionSample::new(Coordinate::new(0.0, 0.0), at(2))));
    }

    fn replay_file() -> NamedTempFile {
        replay_bytes(LOG.as_bytes())
    }

    fn replay_bytes(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    /// Subscribe and collect samples until the stream reports an error.
    async fn collect_until_error(source: &StreamSource) -> (Vec<PositionSample>, SourceError) {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let (error_tx, error_rx) = tokio::sync::oneshot::channel();
        let error_tx = Arc::new(Mutex::new(Some(error_tx)));

        let sink = Arc::clone(&samples);
        let on_sample: SampleCallback = Arc::new(move |s| sink.lock().unwrap().push(s));
        let on_error: ErrorCallback = Arc::new(move |e| {
            if let Some(tx) = error_tx.lock().unwrap().take() {
                let _ = tx.send(e);
            }
        });

        let handle = source.subscribe(on_sample, on_error).unwrap();
        let error = tokio::time::timeout(Duration::from_secs(5), error_rx)
            .await
            .unwrap()
            .unwrap();
        source.unsubscribe(handle);

        let samples = samples.lock().unwrap().clone();
        (samples, error)
    }

    fn replay_source(file: &NamedTempFile) -> StreamSource {
        StreamSource::with_clock(
            StreamKind::Replay {
                path: file.path().to_path_buf(),
                interval: Duration::ZERO,
            },
            SubscriptionOptions::default(),
            Arc::new(ManualClock::at_epoch()),
        )
    }

    #[tokio::test]
    async fn test_replay_permission_and_current_position() {
        let file = replay_file();
        let source = replay_source(&file);

        assert!(source.request_permission().await);
        let position = source.current_position(Duration::from_secs(1)).await.unwrap();
        assert!((position.latitude - (48.0 + 7.0 / 60.0)).abs() < 1e-6);

        let missing = StreamSource::new(
            StreamKind::Replay {
                path: PathBuf::from("/nonexistent/walk.nmea"),
                interval: Duration::ZERO,
            },
            SubscriptionOptions::default(),
        );
        assert!(!missing.request_permission().await);
        assert!(matches!(
            missing.current_position(Duration::from_secs(1)).await,
            Err(SourceError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_replay_subscription_filters_and_closes() {
        let file = replay_file();
        let source = replay_source(&file);

        let (samples, error) = collect_until_error(&source).await;
        assert_eq!(error, SourceError::Closed);

        // 120001 is too soon and too close, the void sentence has no fix
        assert_eq!(samples.len(), 3);
        assert!(samples
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_invalid_bytes_do_not_end_subscription() {
        let mut log = Vec::new();
        log.extend_from_slice(b"$GPRMC,120000,A,4807.000,N,01131.000,E,000.0,000.0,010124,,*11\n");
        log.extend_from_slice(b"\xff\xfe garbage\n");
        log.extend_from_slice(b"$GPRMC,120010,A,4807.010,N,01131.000,E,000.0,000.0,010124,,*11\n");
        let file = replay_bytes(&log);
        let source = replay_source(&file);

        let (samples, error) = collect_until_error(&source).await;
        assert_eq!(error, SourceError::Closed);
        assert_eq!(samples.len(), 2);
        assert!((samples[1].latitude() - (48.0 + 7.01 / 60.0)).abs() < 1e-6);
    }
}
