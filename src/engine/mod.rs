//! Retry-wrapped calls to the container engine.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use bollard::Docker;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateBody, ContainerInspectResponse};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::service::ContainerSummary;
use futures_util::StreamExt;
use tokio_retry2::strategy::ExponentialBackoff;
use tokio_retry2::{Retry, RetryError};

use crate::app_error::AppError;
use crate::telemetry::{Fanout, Record};

/// Up to 5 attempts total: 1 try + 4 retries at 3s, 6s, 12s, 24s.
fn retry_strategy() -> impl Iterator<Item = std::time::Duration> {
    ExponentialBackoff::from_millis(2).factor(1_500).take(4)
}

/// A raw engine error bucketed into the two policies the component design
/// distinguishes: worth retrying, or a semantic rejection that should break
/// the caller's spawn burst immediately.
enum Classification {
    Transient(AppError),
    Permanent(AppError),
}

/// Classify a raw engine error. 5xx, connection, and hyper-transport errors
/// are transient; 4xx engine responses are semantic and not retried.
fn classify(err: DockerError) -> Classification {
    match &err {
        DockerError::DockerResponseServerError { status_code, .. } if *status_code >= 500 => {
            Classification::Transient(AppError::EngineTransient(err.to_string()))
        }
        DockerError::DockerResponseServerError { status_code, .. } if *status_code < 500 => {
            Classification::Permanent(AppError::EngineSemantic(err.to_string()))
        }
        _ => Classification::Transient(AppError::EngineTransient(err.to_string())),
    }
}

async fn with_retry<T, F, Fut>(sink: &Fanout, hostname: &str, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DockerError>>,
{
    let notified = AtomicBool::new(false);
    Retry::spawn_notify(
        retry_strategy(),
        || async {
            op().await.map_err(|e| match classify(e) {
                Classification::Transient(app_err) => RetryError::transient(app_err),
                Classification::Permanent(app_err) => RetryError::permanent(app_err),
            })
        },
        |_err, _duration| {
            if !notified.swap(true, Ordering::SeqCst) {
                sink.emit(
                    Record::new("daemon")
                        .tag("hostname", hostname.to_owned())
                        .field("status", "waiting"),
                );
            }
        },
    )
    .await
}

/// A handle on the container engine, wrapping every call with the uniform
/// retry policy described in the component design.
pub struct Engine {
    docker: Docker,
    hostname: String,
}

impl Engine {
    /// Connect to the engine's socket. `120` is the connection-idle
    /// timeout in seconds. `hostname` tags the `daemon{status=waiting}`
    /// telemetry emitted on retry, matching every other record this
    /// crate emits.
    pub fn connect(socket: &str, hostname: impl Into<String>) -> Result<Self, AppError> {
        let docker = Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|_| AppError::EngineConnect)?;
        Ok(Self {
            docker,
            hostname: hostname.into(),
        })
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|_| AppError::EngineConnect)
    }

    pub async fn list(&self, all: bool, sink: &Fanout) -> Result<Vec<ContainerSummary>, AppError> {
        with_retry(sink, &self.hostname, || {
            self.docker.list_containers(Some(ListContainersOptions {
                all,
                ..Default::default()
            }))
        })
        .await
    }

    pub async fn inspect(
        &self,
        id: &str,
        sink: &Fanout,
    ) -> Result<ContainerInspectResponse, AppError> {
        with_retry(sink, &self.hostname, || self.docker.inspect_container(id, None)).await
    }

    pub async fn create(
        &self,
        spec: ContainerCreateBody,
        name: &str,
        sink: &Fanout,
    ) -> Result<String, AppError> {
        let options = CreateContainerOptions {
            name: Some(name.to_owned()),
            ..Default::default()
        };
        with_retry(sink, &self.hostname, || {
            self.docker.create_container(Some(options.clone()), spec.clone())
        })
        .await
        .map(|resp| resp.id)
    }

    pub async fn start(&self, id: &str, sink: &Fanout) -> Result<(), AppError> {
        with_retry(sink, &self.hostname, || {
            self.docker
                .start_container(id, None::<StartContainerOptions>)
        })
        .await
    }

    pub async fn remove(&self, id: &str, force: bool, sink: &Fanout) -> Result<(), AppError> {
        with_retry(sink, &self.hostname, || {
            self.docker.remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
        })
        .await
    }

    /// Pull `repo[:tag]`, consuming the progress stream to completion.
    pub async fn pull(&self, repo: &str, tag: &str, sink: &Fanout) -> Result<(), AppError> {
        with_retry(sink, &self.hostname, || async {
            let options = CreateImageOptions {
                from_image: Some(repo.to_owned()),
                tag: Some(tag.to_owned()),
                ..Default::default()
            };
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(event) = stream.next().await {
                event?;
            }
            Ok(())
        })
        .await
        .map_err(|e| match e {
            AppError::EngineTransient(s) | AppError::EngineSemantic(s) => AppError::ImagePull(s),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_strategy_is_three_second_geometric() {
        let delays: Vec<_> = retry_strategy().collect();
        assert_eq!(delays.len(), 4);
        assert_eq!(delays[0].as_millis(), 3_000);
        assert_eq!(delays[1].as_millis(), 6_000);
        assert_eq!(delays[2].as_millis(), 12_000);
        assert_eq!(delays[3].as_millis(), 24_000);
    }

    #[test]
    fn test_classify_server_error_is_transient() {
        let err = DockerError::DockerResponseServerError {
            status_code: 503,
            message: "unavailable".to_owned(),
        };
        assert!(matches!(classify(err), Classification::Transient(_)));
    }

    #[test]
    fn test_classify_client_error_is_permanent() {
        let err = DockerError::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_owned(),
        };
        assert!(matches!(classify(err), Classification::Permanent(_)));
    }
}
