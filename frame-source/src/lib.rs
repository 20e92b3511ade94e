//! `FrameSource` (C1): opens a stream and produces a lazy sequence of
//! `(Frame, monotonic_ts)`, reconnecting on fault (§4.1).
//!
//! The actual demuxing/decoding of RTSP/RTMP/HTTP/file streams is an
//! external concern (§1 "out of scope"); what lives here is the
//! reconnect state machine and the contract a concrete decoder plugs
//! into via `RawSource`.

use std::time::Duration;

use tracing::{info, warn};
use vision_types::{Frame, SourceConfig, SourceError};

pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_DELAY_MS: u64 = 5000;

/// One decoded frame and its monotonic capture timestamp (milliseconds).
pub type FrameSample = (Frame, i64);

/// A concrete stream opener/decoder, e.g. an RTSP demuxer. Implementors
/// are the vendor-specific half of C1; `ReconnectingSource` is the
/// reconnect/backoff half that wraps any of them.
pub trait RawSource: Send {
    fn open(config: &SourceConfig) -> Result<Self, SourceError>
    where
        Self: Sized;

    fn read(&mut self) -> Result<FrameSample, SourceError>;

    fn close(&mut self) {}
}

/// Public C1 contract: `open` then repeated `next()`, not restartable
/// after `close()` (§4.1 "Contract").
pub trait FrameSource: Send {
    fn next(&mut self) -> Result<FrameSample, SourceError>;
    fn close(&mut self);
}

/// Wraps a `RawSource` with the reconnect policy from §4.1:
/// up to `MAX_RECONNECT_ATTEMPTS`, waiting `RECONNECT_DELAY_MS` between
/// attempts, resetting the counter on success.
pub struct ReconnectingSource<S: RawSource> {
    config: SourceConfig,
    inner: Option<S>,
    attempts: u32,
    max_attempts: u32,
    reconnect_delay: Duration,
    closed: bool,
}

impl<S: RawSource> ReconnectingSource<S> {
    pub fn open(config: SourceConfig) -> Result<Self, SourceError> {
        config
            .validate()
            .map_err(|e| SourceError::Open(format!("invalid source config: {e}")))?;
        let inner = S::open(&config)?;
        Ok(Self {
            config,
            inner: Some(inner),
            attempts: 0,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_millis(RECONNECT_DELAY_MS),
            closed: false,
        })
    }

    pub fn with_reconnect_policy(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.reconnect_delay = delay;
        self
    }

    /// Close and re-open the underlying source. Only `EndOfStream` is
    /// non-recoverable without a config change (§4.1 "Errors");
    /// callers should stop calling `reconnect` once that error is seen.
    fn reconnect(&mut self) -> Result<(), SourceError> {
        if self.attempts >= self.max_attempts {
            return Err(SourceError::Open(format!(
                "camera {}: exhausted {} reconnect attempts",
                self.config.id, self.max_attempts
            )));
        }
        self.attempts += 1;
        if let Some(mut inner) = self.inner.take() {
            inner.close();
        }
        warn!(
            camera = %self.config.id,
            attempt = self.attempts,
            "reconnecting frame source"
        );
        std::thread::sleep(self.reconnect_delay);
        let opened = S::open(&self.config)?;
        self.inner = Some(opened);
        info!(camera = %self.config.id, "frame source reconnected");
        self.attempts = 0;
        Ok(())
    }
}

impl<S: RawSource> FrameSource for ReconnectingSource<S> {
    fn next(&mut self) -> Result<FrameSample, SourceError> {
        if self.closed {
            return Err(SourceError::EndOfStream);
        }
        loop {
            let result = match self.inner.as_mut() {
                Some(inner) => inner.read(),
                None => Err(SourceError::Open("no active source".into())),
            };
            match result {
                Ok(sample) => return Ok(sample),
                Err(SourceError::EndOfStream) => return Err(SourceError::EndOfStream),
                Err(e) if e.is_recoverable() => {
                    self.reconnect()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.close();
        }
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use vision_types::{PixelFormat, Transport};

    fn cfg() -> SourceConfig {
        SourceConfig {
            id: "cam0".into(),
            url: "file:///dev/null".into(),
            protocol: Transport::File,
            username: None,
            password: None,
            width: 4,
            height: 4,
            fps: 15,
            mjpeg_port: None,
            enabled: true,
        }
    }

    struct FlakyOnceThenOk {
        reads: Arc<AtomicU32>,
        fail_first: bool,
    }

    impl RawSource for FlakyOnceThenOk {
        fn open(_config: &SourceConfig) -> Result<Self, SourceError> {
            Ok(Self {
                reads: Arc::new(AtomicU32::new(0)),
                fail_first: true,
            })
        }

        fn read(&mut self) -> Result<FrameSample, SourceError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if n == 0 && self.fail_first {
                return Err(SourceError::Read("transient glitch".into()));
            }
            let frame = Frame::new(4, 4, PixelFormat::Rgb8, vec![0u8; 4 * 4 * 3]);
            Ok((frame, n as i64))
        }
    }

    #[test]
    fn invalid_config_rejected_at_open() {
        let mut bad = cfg();
        bad.width = 0;
        let result = ReconnectingSource::<FlakyOnceThenOk>::open(bad);
        assert!(result.is_err());
    }

    #[test]
    fn recoverable_read_error_triggers_reconnect_and_resets_counter() {
        let mut source = ReconnectingSource::<FlakyOnceThenOk>::open(cfg())
            .unwrap()
            .with_reconnect_policy(5, Duration::from_millis(0));
        let (_frame, ts) = source.next().unwrap();
        assert_eq!(ts, 0);
        assert_eq!(source.attempts, 0);
    }

    struct AlwaysEof;
    impl RawSource for AlwaysEof {
        fn open(_config: &SourceConfig) -> Result<Self, SourceError> {
            Ok(Self)
        }
        fn read(&mut self) -> Result<FrameSample, SourceError> {
            Err(SourceError::EndOfStream)
        }
    }

    #[test]
    fn end_of_stream_is_not_retried() {
        let mut source = ReconnectingSource::<AlwaysEof>::open(cfg())
            .unwrap()
            .with_reconnect_policy(5, Duration::from_millis(0));
        let result = source.next();
        assert!(matches!(result, Err(SourceError::EndOfStream)));
        assert_eq!(source.attempts, 0);
    }
}
