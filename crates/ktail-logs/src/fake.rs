//! In-memory pod and log sources for tests

use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, TimeZone, Utc};
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt, TryStreamExt};
use parking_lot::Mutex;

use ktail_k8s::{LogRequest, LogSource, LogStream, PodSource, SourceError};
use ktail_types::{
    ContainerSpec, ContainerState, ContainerStatus, NamespaceScope, PodEvent, PodInfo, PodPhase,
};

/// How a scripted stream finishes after its lines
#[derive(Clone, Debug)]
pub enum StreamEnd {
    Eof,
    Fail(String),
    Hang,
}

/// One scripted answer to `LogSource::open`
#[derive(Clone, Debug)]
pub enum Reply {
    Error(SourceError),
    Stream { lines: Vec<String>, end: StreamEnd },
}

impl Reply {
    pub fn lines(lines: &[String]) -> Self {
        Self::Stream {
            lines: lines.to_vec(),
            end: StreamEnd::Eof,
        }
    }

    pub fn lines_then_fail(lines: &[String], reason: &str) -> Self {
        Self::Stream {
            lines: lines.to_vec(),
            end: StreamEnd::Fail(reason.to_string()),
        }
    }

    pub fn lines_then_hang(lines: &[String]) -> Self {
        Self::Stream {
            lines: lines.to_vec(),
            end: StreamEnd::Hang,
        }
    }
}

fn scripted_stream(lines: Vec<String>, end: StreamEnd) -> LogStream {
    let body = stream::iter(lines.into_iter().map(|l| Ok::<_, io::Error>(l.into_bytes())));
    let tail: BoxStream<'static, io::Result<Vec<u8>>> = match end {
        StreamEnd::Eof => stream::empty().boxed(),
        StreamEnd::Fail(reason) => {
            stream::once(async move { Err(io::Error::new(io::ErrorKind::ConnectionReset, reason)) })
                .boxed()
        }
        StreamEnd::Hang => stream::pending().boxed(),
    };
    let chunks: BoxStream<'static, io::Result<Vec<u8>>> = body.chain(tail).boxed();
    Box::pin(chunks.into_async_read())
}

/// Log source answering from per-container scripts.
///
/// Scripts registered with [`FakeLogSource::script`] are keyed by `ns/pod/container`;
/// anything else is served from the shared queue. When nothing is queued the stream
/// stays open without data.
#[derive(Default)]
pub struct FakeLogSource {
    shared: Mutex<VecDeque<Reply>>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<LogRequest>>,
}

impl FakeLogSource {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            shared: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    pub fn script(self, key: &str, replies: Vec<Reply>) -> Self {
        self.scripts.lock().insert(key.to_string(), replies.into());
        self
    }

    pub fn requests(&self) -> Vec<LogRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_for(&self, container: &str) -> Vec<LogRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.container == container)
            .cloned()
            .collect()
    }

    fn next_reply(&self, request: &LogRequest) -> Option<Reply> {
        let key = format!("{}/{}/{}", request.namespace, request.pod, request.container);
        if let Some(queue) = self.scripts.lock().get_mut(&key) {
            return queue.pop_front();
        }
        self.shared.lock().pop_front()
    }
}

impl LogSource for FakeLogSource {
    fn open(&self, request: LogRequest) -> BoxFuture<'static, Result<LogStream, SourceError>> {
        let reply = self.next_reply(&request);
        self.requests.lock().push(request);

        let result = match reply {
            Some(Reply::Error(err)) => Err(err),
            Some(Reply::Stream { lines, end }) => Ok(scripted_stream(lines, end)),
            None => Ok(scripted_stream(Vec::new(), StreamEnd::Hang)),
        };
        futures::future::ready(result).boxed()
    }
}

/// Pod source with a fixed listing and a test-driven change feed per scope
#[derive(Default)]
pub struct FakePodSource {
    listings: Mutex<HashMap<NamespaceScope, Result<Vec<PodInfo>, SourceError>>>,
    feeds: Mutex<HashMap<NamespaceScope, mpsc::UnboundedReceiver<Result<PodEvent, SourceError>>>>,
}

impl FakePodSource {
    pub fn listing(self, scope: NamespaceScope, pods: Result<Vec<PodInfo>, SourceError>) -> Self {
        self.listings.lock().insert(scope, pods);
        self
    }

    /// Sender side of the watch feed for `scope`
    pub fn feed(&self, scope: NamespaceScope) -> mpsc::UnboundedSender<Result<PodEvent, SourceError>> {
        let (tx, rx) = mpsc::unbounded();
        self.feeds.lock().insert(scope, rx);
        tx
    }
}

impl PodSource for FakePodSource {
    fn list<'a>(
        &'a self,
        scope: &'a NamespaceScope,
    ) -> BoxFuture<'a, Result<Vec<PodInfo>, SourceError>> {
        let result = self
            .listings
            .lock()
            .get(scope)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()));
        futures::future::ready(result).boxed()
    }

    fn watch(
        &self,
        scope: &NamespaceScope,
        _seed: Vec<PodInfo>,
    ) -> BoxStream<'static, Result<PodEvent, SourceError>> {
        match self.feeds.lock().remove(scope) {
            Some(rx) => rx.boxed(),
            None => stream::pending().boxed(),
        }
    }
}

/// Fixed test clock: `ms` milliseconds after 2024-01-01T00:00:00Z
pub fn at(ms: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::milliseconds(ms)
}

/// A raw log line as the cluster sends it
pub fn line(ts: DateTime<Utc>, message: &str) -> String {
    format!("{} {}\n", ts.to_rfc3339_opts(SecondsFormat::Nanos, true), message)
}

/// Running pod whose containers all started at `at(0)`
pub fn running_pod(namespace: &str, name: &str, containers: &[&str]) -> PodInfo {
    let mut pod = PodInfo::new(namespace, name);
    pod.uid = format!("uid-{name}");
    pod.phase = PodPhase::Running;
    for c in containers {
        pod.containers.push(ContainerSpec::new(*c));
        let mut status = ContainerStatus::new(
            *c,
            ContainerState::Running {
                started_at: Some(at(0)),
            },
        );
        status.container_id = Some(format!("containerd://{name}-{c}-0"));
        pod.container_statuses.push(status);
    }
    pod
}

/// Poll `cond` until it holds, panicking after five seconds
pub async fn wait_for(cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
