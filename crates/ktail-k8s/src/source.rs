use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::AsyncBufRead;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use thiserror::Error;

use ktail_types::{NamespaceScope, PodEvent, PodInfo};

/// An open, following log stream with one timestamped line per entry
pub type LogStream = Pin<Box<dyn AsyncBufRead + Send>>;

/// Errors reported by pod and log sources
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The pod or container no longer exists
    #[error("not found: {0}")]
    NotFound(String),

    /// The container cannot serve logs yet (typically still being created)
    #[error("not ready: {0}")]
    NotReady(String),

    #[error("kubernetes API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<kube::Error> for SourceError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => Self::NotFound(resp.message),
                400 => Self::NotReady(resp.message),
                code => Self::Api {
                    code,
                    message: resp.message,
                },
            },
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Parameters for opening one container's log stream.
///
/// Streams are always opened in follow mode with timestamps enabled, so every line
/// arrives as `<RFC3339Nano timestamp> <message>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRequest {
    pub namespace: String,
    pub pod: String,
    pub container: String,

    /// Only return lines at or after this instant
    pub since: Option<DateTime<Utc>>,
}

/// Cluster membership: an initial snapshot plus an ordered change feed
pub trait PodSource: Send + Sync + 'static {
    /// List the pods currently present in `scope`
    fn list<'a>(
        &'a self,
        scope: &'a NamespaceScope,
    ) -> BoxFuture<'a, Result<Vec<PodInfo>, SourceError>>;

    /// Subscribe to pod changes in `scope`.
    ///
    /// `seed` is the snapshot returned by [`PodSource::list`]; pods in it are reported as
    /// `Updated` rather than `Added` when the feed first sees them. The stream is infinite;
    /// it ends or yields an error only when the subscription is lost for good.
    fn watch(
        &self,
        scope: &NamespaceScope,
        seed: Vec<PodInfo>,
    ) -> BoxStream<'static, Result<PodEvent, SourceError>>;
}

/// Opens follow-mode log streams
pub trait LogSource: Send + Sync + 'static {
    fn open(&self, request: LogRequest) -> BoxFuture<'static, Result<LogStream, SourceError>>;
}
