use std::collections::{HashMap, HashSet};

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;

use ktail_types::{PodEvent, PodInfo};

use crate::convert::pod_info;

/// Turns raw watcher events into `Added`/`Updated`/`Deleted` notifications.
///
/// The watcher only reports "applied" objects and periodically relists; the mapper remembers
/// which pods it has already reported so that a pod is `Added` exactly once, and pods that
/// vanish from a relist are reported as `Deleted` with their last known snapshot.
#[derive(Debug, Default)]
pub struct PodEventMapper {
    known: HashMap<String, PodInfo>,
    relisted: Option<HashSet<String>>,
}

impl PodEventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a snapshot that the consumer has already seen
    pub fn seeded(seed: impl IntoIterator<Item = PodInfo>) -> Self {
        let known = seed.into_iter().map(|pod| (identity(&pod), pod)).collect();
        Self {
            known,
            relisted: None,
        }
    }

    pub fn apply(&mut self, event: watcher::Event<Pod>) -> Vec<PodEvent> {
        match event {
            watcher::Event::Apply(pod) => vec![self.applied(pod_info(&pod))],
            watcher::Event::Delete(pod) => {
                let info = pod_info(&pod);
                self.known.remove(&identity(&info));
                vec![PodEvent::Deleted(info)]
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(pod) => {
                let info = pod_info(&pod);
                if let Some(seen) = &mut self.relisted {
                    seen.insert(identity(&info));
                }
                vec![self.applied(info)]
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<String> = self
                    .known
                    .keys()
                    .filter(|id| !seen.contains(*id))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|id| self.known.remove(&id))
                    .map(PodEvent::Deleted)
                    .collect()
            }
        }
    }

    fn applied(&mut self, info: PodInfo) -> PodEvent {
        match self.known.insert(identity(&info), info.clone()) {
            Some(_) => PodEvent::Updated(info),
            None => PodEvent::Added(info),
        }
    }
}

fn identity(pod: &PodInfo) -> String {
    if pod.uid.is_empty() {
        pod.qualified_name()
    } else {
        pod.uid.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                uid: Some(format!("uid-{name}")),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn kinds(events: &[PodEvent]) -> Vec<(&'static str, String)> {
        events
            .iter()
            .map(|e| {
                let kind = match e {
                    PodEvent::Added(_) => "added",
                    PodEvent::Updated(_) => "updated",
                    PodEvent::Deleted(_) => "deleted",
                };
                (kind, e.pod().name.clone())
            })
            .collect()
    }

    #[test]
    fn test_first_apply_is_added_then_updated() {
        let mut mapper = PodEventMapper::new();
        let first = mapper.apply(watcher::Event::Apply(pod("a")));
        let second = mapper.apply(watcher::Event::Apply(pod("a")));
        assert_eq!(kinds(&first), vec![("added", "a".to_string())]);
        assert_eq!(kinds(&second), vec![("updated", "a".to_string())]);
    }

    #[test]
    fn test_seeded_pods_are_updates() {
        let mut mapper = PodEventMapper::seeded(vec![pod_info(&pod("a"))]);
        mapper.apply(watcher::Event::Init);
        let events = mapper.apply(watcher::Event::InitApply(pod("a")));
        assert_eq!(kinds(&events), vec![("updated", "a".to_string())]);
    }

    #[test]
    fn test_relist_reports_vanished_pods() {
        let mut mapper = PodEventMapper::seeded(vec![pod_info(&pod("a")), pod_info(&pod("b"))]);
        assert!(mapper.apply(watcher::Event::Init).is_empty());
        mapper.apply(watcher::Event::InitApply(pod("a")));
        let events = mapper.apply(watcher::Event::InitDone);
        assert_eq!(kinds(&events), vec![("deleted", "b".to_string())]);

        // "b" is forgotten, so seeing it again is a fresh add
        let events = mapper.apply(watcher::Event::Apply(pod("b")));
        assert_eq!(kinds(&events), vec![("added", "b".to_string())]);
    }

    #[test]
    fn test_delete_forgets_pod() {
        let mut mapper = PodEventMapper::new();
        mapper.apply(watcher::Event::Apply(pod("a")));
        let events = mapper.apply(watcher::Event::Delete(pod("a")));
        assert_eq!(kinds(&events), vec![("deleted", "a".to_string())]);
        let events = mapper.apply(watcher::Event::Apply(pod("a")));
        assert_eq!(kinds(&events), vec![("added", "a".to_string())]);
    }
}
