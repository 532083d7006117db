use k8s_openapi::api::core::v1::{Container, ContainerState as K8sState, Pod};
use k8s_openapi::api::core::v1::ContainerStatus as K8sStatus;

use ktail_types::{ContainerSpec, ContainerState, ContainerStatus, PodInfo, PodPhase};

/// Convert a k8s Pod to PodInfo
pub fn pod_info(pod: &Pod) -> PodInfo {
    let metadata = &pod.metadata;
    let mut info = PodInfo::new(
        metadata.namespace.clone().unwrap_or_default(),
        metadata.name.clone().unwrap_or_default(),
    );
    info.uid = metadata.uid.clone().unwrap_or_default();
    info.labels = metadata.labels.clone().unwrap_or_default();

    if let Some(spec) = &pod.spec {
        info.containers = spec.containers.iter().map(container_spec).collect();
        info.init_containers = spec
            .init_containers
            .iter()
            .flatten()
            .map(container_spec)
            .collect();
    }

    if let Some(status) = &pod.status {
        info.phase = status
            .phase
            .as_deref()
            .map(PodPhase::from)
            .unwrap_or(PodPhase::Unknown);
        info.container_statuses = status
            .container_statuses
            .iter()
            .flatten()
            .map(container_status)
            .collect();
        info.init_container_statuses = status
            .init_container_statuses
            .iter()
            .flatten()
            .map(container_status)
            .collect();
    }

    info
}

fn container_spec(container: &Container) -> ContainerSpec {
    ContainerSpec::new(container.name.clone())
}

fn container_status(status: &K8sStatus) -> ContainerStatus {
    ContainerStatus {
        name: status.name.clone(),
        state: status
            .state
            .as_ref()
            .map(container_state)
            .unwrap_or(ContainerState::Waiting { reason: None }),
        last_state: status.last_state.as_ref().and_then(|s| {
            // An empty last state means the container never restarted
            if s.running.is_none() && s.terminated.is_none() && s.waiting.is_none() {
                None
            } else {
                Some(container_state(s))
            }
        }),
        container_id: status.container_id.clone(),
        restart_count: status.restart_count,
    }
}

fn container_state(state: &K8sState) -> ContainerState {
    if let Some(running) = &state.running {
        return ContainerState::Running {
            started_at: running.started_at.as_ref().map(|t| t.0),
        };
    }
    if let Some(terminated) = &state.terminated {
        return ContainerState::Terminated {
            started_at: terminated.started_at.as_ref().map(|t| t.0),
            finished_at: terminated.finished_at.as_ref().map(|t| t.0),
            exit_code: terminated.exit_code,
        };
    }
    ContainerState::Waiting {
        reason: state.waiting.as_ref().and_then(|w| w.reason.clone()),
    }
}
