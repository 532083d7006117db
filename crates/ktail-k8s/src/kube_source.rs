use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::{ListParams, LogParams};
use kube::runtime::{WatchStreamExt, watcher};

use ktail_types::{NamespaceScope, PodEvent, PodInfo};

use crate::convert::pod_info;
use crate::source::{LogRequest, LogSource, LogStream, PodSource, SourceError};
use crate::watch::PodEventMapper;

/// Pod and log source backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSource {
    client: kube::Client,
}

impl KubeSource {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn pods(&self, scope: &NamespaceScope) -> Api<Pod> {
        match scope {
            NamespaceScope::All => Api::all(self.client.clone()),
            NamespaceScope::Named(ns) => Api::namespaced(self.client.clone(), ns),
        }
    }
}

impl PodSource for KubeSource {
    fn list<'a>(
        &'a self,
        scope: &'a NamespaceScope,
    ) -> BoxFuture<'a, Result<Vec<PodInfo>, SourceError>> {
        let api = self.pods(scope);
        async move {
            let list = api.list(&ListParams::default()).await?;
            Ok(list.items.iter().map(pod_info).collect())
        }
        .boxed()
    }

    fn watch(
        &self,
        scope: &NamespaceScope,
        seed: Vec<PodInfo>,
    ) -> BoxStream<'static, Result<PodEvent, SourceError>> {
        let api = self.pods(scope);
        let label = scope.to_string();
        let seed = seed.into_iter().filter(|pod| match scope {
            NamespaceScope::All => true,
            NamespaceScope::Named(ns) => &pod.namespace == ns,
        });
        let mut mapper = PodEventMapper::seeded(seed);

        // Watch errors are retried with backoff here; the feed itself never fails
        watcher(api, watcher::Config::default())
            .default_backoff()
            .map(move |result| {
                let events = match result {
                    Ok(event) => mapper.apply(event),
                    Err(err) => {
                        tracing::warn!(namespace = %label, error = %err, "pod watch failed; retrying");
                        Vec::new()
                    }
                };
                stream::iter(events.into_iter().map(Ok::<_, SourceError>))
            })
            .flatten()
            .boxed()
    }
}

impl LogSource for KubeSource {
    fn open(&self, request: LogRequest) -> BoxFuture<'static, Result<LogStream, SourceError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &request.namespace);
        async move {
            let params = LogParams {
                follow: true,
                timestamps: true,
                container: Some(request.container),
                since_time: request.since,
                ..Default::default()
            };
            let stream = api.log_stream(&request.pod, &params).await?;
            Ok(Box::pin(stream) as LogStream)
        }
        .boxed()
    }
}
