use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use ktail_k8s::{LogSource, PodSource, SourceError};
use ktail_types::{
    ContainerSpec, ContainerState, KeyStrategy, LogEvent, NamespaceScope, PodEvent, PodInfo,
    TailerKey,
};

use crate::matcher::Admission;
use crate::tailer::{EventFn, TailError, Tailer, TailerOptions};

/// Seconds subtracted from "now" for initial adds, to cover clock skew with the nodes
pub const CLOCK_SKEW_SECS: i64 = 5;

pub type EnterFn = Arc<dyn Fn(&PodInfo, &ContainerSpec, bool) -> bool + Send + Sync>;
pub type ExitFn = Arc<dyn Fn(&PodInfo, &ContainerSpec) + Send + Sync>;
pub type ErrorFn = Arc<dyn Fn(&PodInfo, &ContainerSpec, &TailError) + Send + Sync>;
pub type NothingFn = Arc<dyn Fn() + Send + Sync>;

/// Fatal controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("no namespaces to watch")]
    NoNamespaces,

    #[error("failed to list pods in {scope}: {source}")]
    List {
        scope: String,
        #[source]
        source: SourceError,
    },

    #[error("pod watch failed: {0}")]
    Watch(#[source] SourceError),

    #[error("pod watch ended unexpectedly")]
    WatchEnded,
}

/// Hooks invoked by the controller and its tailers.
///
/// `on_enter` and `on_exit` run while the tailer table is locked and must not call back
/// into the controller.
#[derive(Clone)]
pub struct Callbacks {
    pub on_event: EventFn,
    /// Return false to veto tailing the container
    pub on_enter: EnterFn,
    pub on_exit: ExitFn,
    pub on_error: ErrorFn,
    pub on_nothing_discovered: NothingFn,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            on_event: Arc::new(|_: LogEvent| {}),
            on_enter: Arc::new(|_: &PodInfo, _: &ContainerSpec, _: bool| true),
            on_exit: Arc::new(|_: &PodInfo, _: &ContainerSpec| {}),
            on_error: Arc::new(|_: &PodInfo, _: &ContainerSpec, _: &TailError| {}),
            on_nothing_discovered: Arc::new(|| {}),
        }
    }
}

impl Callbacks {
    pub fn with_event(mut self, f: impl Fn(LogEvent) + Send + Sync + 'static) -> Self {
        self.on_event = Arc::new(f);
        self
    }

    pub fn with_enter(
        mut self,
        f: impl Fn(&PodInfo, &ContainerSpec, bool) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_enter = Arc::new(f);
        self
    }

    pub fn with_exit(mut self, f: impl Fn(&PodInfo, &ContainerSpec) + Send + Sync + 'static) -> Self {
        self.on_exit = Arc::new(f);
        self
    }

    pub fn with_error(
        mut self,
        f: impl Fn(&PodInfo, &ContainerSpec, &TailError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Arc::new(f);
        self
    }

    pub fn with_nothing_discovered(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_nothing_discovered = Arc::new(f);
        self
    }
}

/// Controller configuration
#[derive(Clone, Debug)]
pub struct ControllerOptions {
    pub namespaces: Vec<NamespaceScope>,
    pub admission: Admission,

    /// Read every container log from its beginning
    pub since_start: bool,

    /// Resume point for containers found at startup (defaults to a few seconds ago)
    pub since: Option<DateTime<Utc>>,

    pub key_strategy: KeyStrategy,
    pub tailer: TailerOptions,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            namespaces: vec![NamespaceScope::Named("default".to_string())],
            admission: Admission::everything(),
            since_start: false,
            since: None,
            key_strategy: KeyStrategy::default(),
            tailer: TailerOptions::default(),
        }
    }
}

/// Where a new tailer starts reading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartPoint {
    Beginning,
    At(DateTime<Utc>),
}

impl StartPoint {
    fn since(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Beginning => None,
            Self::At(ts) => Some(ts),
        }
    }
}

/// A running tailer task and the snapshots it was started with
pub struct TailerHandle {
    pod: Arc<PodInfo>,
    container: Arc<ContainerSpec>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TailerHandle {
    pub fn pod(&self) -> &PodInfo {
        &self.pod
    }

    pub fn container(&self) -> &ContainerSpec {
        &self.container
    }

    /// Ask the task to exit. Returns immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to exit
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}

/// Keeps one tailer per admitted container incarnation in sync with cluster membership
pub struct Controller {
    pods: Arc<dyn PodSource>,
    logs: Arc<dyn LogSource>,
    options: ControllerOptions,
    callbacks: Callbacks,
    tailers: Mutex<HashMap<TailerKey, TailerHandle>>,

    /// Parent of every tailer token; cancelled on shutdown
    root: CancellationToken,
}

impl Controller {
    pub fn new(
        pods: Arc<dyn PodSource>,
        logs: Arc<dyn LogSource>,
        options: ControllerOptions,
        callbacks: Callbacks,
    ) -> Self {
        Self {
            pods,
            logs,
            options,
            callbacks,
            tailers: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Reconcile until `cancel` fires or the pod feed fails. Every tailer is stopped and
    /// awaited before this returns; the controller cannot be reused afterwards.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        if self.options.namespaces.is_empty() {
            return Err(ControllerError::NoNamespaces);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            r = self.reconcile() => r,
        };

        self.shutdown().await;
        result
    }

    async fn reconcile(&self) -> Result<(), ControllerError> {
        let mut feeds = Vec::with_capacity(self.options.namespaces.len());
        let mut admitted = 0;

        for scope in &self.options.namespaces {
            let pods = self
                .pods
                .list(scope)
                .await
                .map_err(|source| ControllerError::List {
                    scope: scope.to_string(),
                    source,
                })?;
            tracing::debug!(namespace = %scope, pods = pods.len(), "initial pod listing");

            for pod in &pods {
                admitted += self.on_initial_add(pod);
            }
            feeds.push(self.pods.watch(scope, pods));
        }

        if admitted == 0 {
            (self.callbacks.on_nothing_discovered)();
        }

        let mut events = stream::select_all(feeds);
        while let Some(event) = events.next().await {
            match event.map_err(ControllerError::Watch)? {
                PodEvent::Added(pod) => {
                    self.on_add(&pod);
                }
                PodEvent::Updated(pod) => self.on_update(&pod),
                PodEvent::Deleted(pod) => self.on_delete(&pod),
            }
        }

        Err(ControllerError::WatchEnded)
    }

    /// Handle a pod found in the startup listing. Returns the number of containers tailed.
    pub fn on_initial_add(&self, pod: &PodInfo) -> usize {
        self.add_pod(pod, true)
    }

    /// Handle a pod that appeared after startup. Returns the number of containers tailed.
    pub fn on_add(&self, pod: &PodInfo) -> usize {
        self.add_pod(pod, false)
    }

    fn add_pod(&self, pod: &PodInfo, initial: bool) -> usize {
        pod.all_containers()
            .filter(|c| self.should_include_container(pod, c))
            .filter(|c| self.add_container(pod, c, initial))
            .count()
    }

    pub fn on_update(&self, pod: &PodInfo) {
        for status in pod.all_container_statuses() {
            let Some(container) = pod.find_container(&status.name) else {
                continue;
            };
            if self.should_include_container(pod, container) {
                self.add_container(pod, container, false);
            } else {
                self.delete_container(pod, container);
            }
        }
    }

    pub fn on_delete(&self, pod: &PodInfo) {
        for container in pod.all_containers() {
            self.delete_container(pod, container);
        }
    }

    pub fn should_include_container(&self, pod: &PodInfo, container: &ContainerSpec) -> bool {
        if !pod.phase.is_live() {
            return false;
        }

        let has_run = pod
            .all_container_statuses()
            .filter(|s| s.name == container.name)
            .any(|s| {
                s.state.has_run()
                    || matches!(
                        s.last_state,
                        Some(ContainerState::Running { .. } | ContainerState::Terminated { .. })
                    )
            });

        has_run && self.options.admission.admits(pod, container)
    }

    /// Where a tailer for this container should start; `None` defers admission until the
    /// container reports a start time.
    pub fn start_timestamp(
        &self,
        pod: &PodInfo,
        container: &ContainerSpec,
        initial: bool,
    ) -> Option<StartPoint> {
        if self.options.since_start {
            return Some(StartPoint::Beginning);
        }
        if initial {
            let since = self
                .options
                .since
                .unwrap_or_else(|| Utc::now() - TimeDelta::seconds(CLOCK_SKEW_SECS));
            return Some(StartPoint::At(since));
        }

        pod.all_container_statuses()
            .filter(|s| s.name == container.name)
            .filter_map(|s| s.running_since())
            .min()
            .map(StartPoint::At)
    }

    /// Start tailing a container unless it is already tailed. Returns true when a tailer
    /// for this incarnation is live after the call.
    pub fn add_container(&self, pod: &PodInfo, container: &ContainerSpec, initial: bool) -> bool {
        if self.root.is_cancelled() {
            return false;
        }

        let key = TailerKey::new(pod, container, self.options.key_strategy);
        let mut tailers = self.tailers.lock();

        if tailers.contains_key(&key) {
            return true;
        }

        if !(self.callbacks.on_enter)(pod, container, initial) {
            tracing::debug!(%key, "container vetoed");
            return false;
        }

        let Some(start) = self.start_timestamp(pod, container, initial) else {
            tracing::debug!(%key, "no start time yet; deferring");
            return false;
        };

        // Older incarnations of the same container
        let superseded: Vec<TailerKey> = tailers
            .iter()
            .filter(|(k, h)| {
                k.namespace == key.namespace
                    && k.pod == key.pod
                    && h.container.name == container.name
            })
            .map(|(k, _)| k.clone())
            .collect();
        for old_key in superseded {
            if let Some(old) = tailers.remove(&old_key) {
                tracing::debug!(old = %old_key, new = %key, "container restarted; replacing tailer");
                old.stop();
                (self.callbacks.on_exit)(&old.pod, &old.container);
            }
        }

        let pod = Arc::new(pod.clone());
        let container = Arc::new(container.clone());
        let cancel = self.root.child_token();

        let tailer = Tailer::new(
            Arc::clone(&self.logs),
            Arc::clone(&pod),
            Arc::clone(&container),
            Arc::clone(&self.callbacks.on_event),
            start.since(),
            &self.options.tailer,
            cancel.clone(),
        );

        let on_error = Arc::clone(&self.callbacks.on_error);
        let (err_pod, err_container) = (Arc::clone(&pod), Arc::clone(&container));
        let task = tokio::spawn(async move {
            tailer
                .run(move |err| on_error(&err_pod, &err_container, err))
                .await
        });

        tracing::debug!(%key, since = ?start, "tailer started");
        tailers.insert(
            key,
            TailerHandle {
                pod,
                container,
                cancel,
                task,
            },
        );
        true
    }

    /// Stop tailing a container. The returned handle can be joined to observe the exit.
    pub fn delete_container(
        &self,
        pod: &PodInfo,
        container: &ContainerSpec,
    ) -> Option<TailerHandle> {
        let key = TailerKey::new(pod, container, self.options.key_strategy);
        let mut tailers = self.tailers.lock();

        let handle = match tailers.remove(&key) {
            Some(handle) => handle,
            None => {
                // The pod may report a newer incarnation id than the one being tailed
                let stale = tailers
                    .iter()
                    .find(|(k, h)| {
                        k.namespace == pod.namespace
                            && k.pod == pod.name
                            && h.container.name == container.name
                    })
                    .map(|(k, _)| k.clone())?;
                tailers.remove(&stale)?
            }
        };

        tracing::debug!(%key, "tailer stopped");
        handle.stop();
        (self.callbacks.on_exit)(pod, container);
        Some(handle)
    }

    pub fn tailer_count(&self) -> usize {
        self.tailers.lock().len()
    }

    /// Keys of live tailers, sorted
    pub fn tailer_keys(&self) -> Vec<TailerKey> {
        let mut keys: Vec<_> = self.tailers.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stop every tailer and wait for the tasks to exit
    pub async fn shutdown(&self) {
        self.root.cancel();
        let handles: Vec<TailerHandle> = self.tailers.lock().drain().map(|(_, h)| h).collect();

        for handle in handles {
            let name = format!("{}:{}", handle.pod.qualified_name(), handle.container.name);
            if let Err(err) = handle.join().await {
                tracing::warn!(container = %name, error = %err, "tailer task failed");
            }
        }
    }
}
