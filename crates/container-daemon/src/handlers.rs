//! Request handlers for the daemon

use crate::protocol::{ContainerView, ErrorInfo, Request, Response};
use container_orchestration::{OperationResult, Orchestrator, StartOptions};
use container_store::{ContainerRecord, ProjectSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Daemon state shared between connections
///
/// The orchestrator serializes operations per project internally, so
/// connections share it without further locking.
pub struct DaemonState {
    /// The orchestrator every request goes through
    pub orchestrator: Arc<Orchestrator>,
    /// Host name used in container URLs
    pub public_host: String,
}

impl DaemonState {
    fn view(&self, record: &ContainerRecord) -> ContainerView {
        ContainerView::new(record, &self.public_host)
    }

    fn container(&self, result: OperationResult<ContainerRecord>) -> Response {
        match result {
            Ok(record) => Response::Container {
                container: self.view(&record),
            },
            Err(e) => Response::from_error(&e, &self.public_host),
        }
    }
}

/// Handle a request from a client
pub async fn handle_request(request: Request, state: &DaemonState) -> Response {
    debug!("Handling request: {:?}", request);
    let orchestrator = &state.orchestrator;

    match request {
        Request::StartContainer {
            project_id,
            source_tree,
            env,
            port,
            force,
        } => {
            info!("Start requested for project {}", project_id);
            let spec = ProjectSpec {
                project_id,
                source_tree,
                env,
                port,
            };
            state.container(
                orchestrator
                    .start_container(spec, StartOptions { force })
                    .await,
            )
        }

        Request::StopContainer { id, timeout_secs } => {
            info!("Stop requested for {}", id);
            let grace = timeout_secs.map(Duration::from_secs);
            state.container(orchestrator.stop_container(&id, grace).await)
        }

        Request::RestartContainer { id } => {
            info!("Restart requested for {}", id);
            match orchestrator.restart_container(&id).await {
                Ok(outcome) => Response::Restarted {
                    container: state.view(&outcome.record),
                    stop_error: outcome.stop_error.as_ref().map(ErrorInfo::from),
                },
                Err(e) => Response::from_error(&e, &state.public_host),
            }
        }

        Request::ContainerStatus { id } => state.container(orchestrator.status(&id).await),

        Request::ProjectStatus { project_id } => {
            state.container(orchestrator.project_status(&project_id).await)
        }

        Request::ContainerLogs { id, tail } => match orchestrator.logs(&id, tail).await {
            Ok(lines) => Response::Logs { id, lines },
            Err(e) => Response::from_error(&e, &state.public_host),
        },

        Request::RemoveContainer { id } => {
            info!("Remove requested for {}", id);
            state.container(orchestrator.remove_container(&id).await)
        }

        Request::ListContainers => match orchestrator.list().await {
            Ok(records) => Response::Containers {
                containers: records.iter().map(|r| state.view(r)).collect(),
            },
            Err(e) => Response::from_error(&e, &state.public_host),
        },
    }
}
