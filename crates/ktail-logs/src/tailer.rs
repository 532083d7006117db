use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::AsyncBufReadExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use ktail_k8s::{LogRequest, LogSource, LogStream, SourceError};
use ktail_types::{ContainerSpec, LogEvent, PodInfo};

use crate::backoff::Backoff;
use crate::parser::{Fingerprint, LogParser};

/// Callback receiving every accepted line
pub type EventFn = Arc<dyn Fn(LogEvent) + Send + Sync>;

/// Non-fatal streaming errors reported to the caller
#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to open log stream: {0}")]
    Open(#[source] SourceError),

    #[error("failed to read log stream: {0}")]
    Read(#[from] io::Error),
}

/// Reconnect phase of a tailer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TailState {
    Normal,
    /// Reopened after a disconnect; replayed lines are being skipped
    Recovering,
}

/// Retry timing for a tailer
#[derive(Clone, Debug)]
pub struct TailerOptions {
    /// Backoff after open and read errors
    pub error_backoff_min: Duration,
    pub error_backoff_max: Duration,

    /// Backoff before reopening a stream that ended cleanly. Only reset once a stream
    /// yields data, so a finished container is polled less and less often.
    pub idle_backoff_min: Duration,
    pub idle_backoff_max: Duration,

    /// Backoff while the container is not ready to serve logs
    pub not_ready_backoff_min: Duration,
    pub not_ready_backoff_max: Duration,
}

impl Default for TailerOptions {
    fn default() -> Self {
        Self {
            error_backoff_min: Duration::from_millis(100),
            error_backoff_max: Duration::from_secs(10),
            idle_backoff_min: Duration::from_millis(100),
            idle_backoff_max: Duration::from_secs(30),
            not_ready_backoff_min: Duration::from_millis(100),
            not_ready_backoff_max: Duration::from_secs(2),
        }
    }
}

/// Follows one container incarnation's log, reconnecting until stopped
pub struct Tailer {
    source: Arc<dyn LogSource>,
    pod: Arc<PodInfo>,
    container: Arc<ContainerSpec>,
    on_event: EventFn,

    /// Lower time bound for the next (re)open
    since: Option<DateTime<Utc>>,
    backoff: Backoff,
    idle: Backoff,
    not_ready: Backoff,
    lines_read: u64,
    last_fingerprint: Option<Fingerprint>,
    state: TailState,
    cancel: CancellationToken,
}

impl Tailer {
    pub fn new(
        source: Arc<dyn LogSource>,
        pod: Arc<PodInfo>,
        container: Arc<ContainerSpec>,
        on_event: EventFn,
        since: Option<DateTime<Utc>>,
        options: &TailerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            pod,
            container,
            on_event,
            since,
            backoff: Backoff::new(options.error_backoff_min, options.error_backoff_max),
            idle: Backoff::new(options.idle_backoff_min, options.idle_backoff_max),
            not_ready: Backoff::new(options.not_ready_backoff_min, options.not_ready_backoff_max),
            lines_read: 0,
            last_fingerprint: None,
            state: TailState::Normal,
            cancel,
        }
    }

    /// Token that stops this tailer when cancelled
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request the run loop to exit; does not wait for it
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> TailState {
        self.state
    }

    pub fn resume_from(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    /// Stream until stopped or until the container is gone
    pub async fn run<F>(mut self, on_error: F)
    where
        F: Fn(&TailError) + Send + Sync,
    {
        self.backoff.reset();

        while !self.cancel.is_cancelled() {
            let stream = match self.open().await {
                Ok(Some(stream)) => stream,
                Ok(None) => break,
                Err(err) => {
                    on_error(&err);
                    let d = self.backoff.next_delay();
                    self.pause(d).await;
                    continue;
                }
            };

            let lines_before = self.lines_read;
            let result = self.consume(stream).await;
            if self.lines_read > lines_before {
                self.idle.reset();
            }

            let d = match result {
                Ok(()) => {
                    let d = self.idle.next_delay();
                    tracing::debug!(
                        pod = %self.pod.qualified_name(),
                        container = %self.container.name,
                        delay = ?d,
                        "log stream ended; reconnecting"
                    );
                    d
                }
                Err(err) => {
                    on_error(&err);
                    self.backoff.next_delay()
                }
            };
            self.pause(d).await;
            self.state = TailState::Recovering;
        }

        tracing::debug!(
            pod = %self.pod.qualified_name(),
            container = %self.container.name,
            "tailer exited"
        );
    }

    /// Open a stream at the resume point. `Ok(None)` means stop: the tailer was cancelled
    /// or the container no longer exists.
    async fn open(&mut self) -> Result<Option<LogStream>, TailError> {
        self.not_ready.reset();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            let request = LogRequest {
                namespace: self.pod.namespace.clone(),
                pod: self.pod.name.clone(),
                container: self.container.name.clone(),
                since: self.since,
            };

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                r = self.source.open(request) => r,
            };

            match result {
                Ok(stream) => {
                    self.backoff.reset();
                    return Ok(Some(stream));
                }
                Err(SourceError::NotFound(msg)) => {
                    tracing::debug!(
                        pod = %self.pod.qualified_name(),
                        container = %self.container.name,
                        reason = %msg,
                        "container gone; not reopening"
                    );
                    return Ok(None);
                }
                Err(SourceError::NotReady(msg)) => {
                    tracing::trace!(
                        pod = %self.pod.qualified_name(),
                        container = %self.container.name,
                        reason = %msg,
                        "container not ready for logs yet"
                    );
                    let d = self.not_ready.next_delay();
                    self.pause(d).await;
                }
                Err(err) => return Err(TailError::Open(err)),
            }
        }
    }

    /// Read lines until EOF, a read error, or cancellation. The stream is dropped on return.
    async fn consume(&mut self, mut stream: LogStream) -> Result<(), TailError> {
        let mut buf: Vec<u8> = Vec::with_capacity(8 * 1024);

        while !self.cancel.is_cancelled() {
            buf.clear();

            let read = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                r = stream.read_until(b'\n', &mut buf) => r,
            };

            if read? == 0 {
                return Ok(());
            }

            self.backoff.reset();
            self.lines_read += 1;
            let line = String::from_utf8_lossy(&buf);
            self.receive_line(&line);
        }

        Ok(())
    }

    /// Apply dedup and stale filtering to one raw line; returns whether it was emitted
    fn receive_line(&mut self, raw: &str) -> bool {
        let Some(parsed) = LogParser::parse(raw) else {
            tracing::trace!(container = %self.container.name, "dropping line without timestamp");
            return false;
        };

        let fingerprint = LogParser::fingerprint(parsed.message);

        if self.state == TailState::Recovering {
            if self.last_fingerprint == Some(fingerprint) {
                return false;
            }
            if self.since.is_some_and(|since| parsed.timestamp < since) {
                return false;
            }
        }

        self.last_fingerprint = Some(fingerprint);
        self.state = TailState::Normal;

        // Resume just past this line; the source has no finer ordering than this
        self.since = Some(parsed.timestamp + TimeDelta::milliseconds(1));

        (self.on_event)(LogEvent {
            pod: Arc::clone(&self.pod),
            container: Arc::clone(&self.container),
            timestamp: Some(parsed.timestamp),
            message: parsed.message.to_string(),
        });

        true
    }

    async fn pause(&self, d: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(d) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}
