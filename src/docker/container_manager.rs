// ABOUTME: Docker container management using Bollard for creating and running minion containers

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Docker connection error: {0}")]
    Connection(#[from] bollard::errors::Error),
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Container already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Container operation failed: {0}")]
    OperationFailed(String),
}

/// Options for running a container
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub image: String,
    pub command: Vec<String>,
    pub mounts: Vec<(PathBuf, PathBuf)>, // (host_path, container_path)
    pub labels: HashMap<String, String>,
    pub remove_on_exit: bool,
}

/// Combined result of running a command inside a container. A non-zero
/// exit code is data for the caller to assert on, not an error.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).to_string()
    }
}

#[derive(Debug)]
pub struct ContainerManager {
    docker: Docker,
}

impl ContainerManager {
    pub async fn new() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults().map_err(ContainerError::Connection)?;

        // A hung daemon should fail fast rather than stall the test suite
        let ping_timeout = std::time::Duration::from_secs(30);
        tokio::time::timeout(ping_timeout, docker.ping())
            .await
            .map_err(|_| {
                ContainerError::Connection(bollard::errors::Error::DockerResponseServerError {
                    status_code: 408,
                    message: "Docker ping timeout - daemon may be unresponsive".to_string(),
                })
            })?
            .map_err(ContainerError::Connection)?;

        info!("Successfully connected to Docker daemon");
        Ok(Self { docker })
    }

    pub fn get_docker_client(&self) -> Docker {
        self.docker.clone()
    }

    /// Create a container with the given options and start it, returning
    /// the container id.
    pub async fn run_container(
        &self,
        name: &str,
        options: &RunOptions,
    ) -> Result<String, ContainerError> {
        info!("Running container: {}", name);

        if self.container_exists(name).await? {
            return Err(ContainerError::AlreadyExists(name.to_string()));
        }

        self.ensure_image_available(&options.image).await?;

        let mounts: Vec<Mount> = options
            .mounts
            .iter()
            .map(|(host_path, container_path)| Mount {
                target: Some(container_path.to_string_lossy().to_string()),
                source: Some(host_path.to_string_lossy().to_string()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(false),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            mounts: Some(mounts),
            auto_remove: Some(options.remove_on_exit),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(options.image.clone()),
            cmd: if options.command.is_empty() {
                None
            } else {
                Some(options.command.clone())
            },
            host_config: Some(host_config),
            labels: Some({
                let mut labels = HashMap::new();
                labels.insert("saltbox-managed".to_string(), "true".to_string());
                for (key, value) in &options.labels {
                    labels.insert(key.clone(), value.clone());
                }
                labels
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let create_response =
            self.docker.create_container(Some(create_options), container_config).await?;

        info!("Created container {} with ID {}", name, create_response.id);

        self.docker
            .start_container(&create_response.id, None::<StartContainerOptions<String>>)
            .await?;

        info!("Started container: {}", create_response.id);
        Ok(create_response.id)
    }

    pub async fn stop_container(&self, container_id: &str) -> Result<(), ContainerError> {
        info!("Stopping container {}", container_id);

        let stop_options = StopContainerOptions { t: 10 }; // 10 second grace period

        match self.docker.stop_container(container_id, Some(stop_options)).await {
            Ok(_) => {
                info!("Successfully stopped container {}", container_id);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Container {} was already stopped", container_id);
                Ok(())
            }
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    pub async fn remove_container(&self, container_id: &str) -> Result<(), ContainerError> {
        info!("Removing container {}", container_id);

        let remove_options = RemoveContainerOptions {
            force: true,
            v: true, // Remove associated volumes
            ..Default::default()
        };

        match self.docker.remove_container(container_id, Some(remove_options)).await {
            Ok(_) => {
                info!("Successfully removed container {}", container_id);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} was already removed", container_id);
                Ok(())
            }
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    /// Execute a command in a running container, collecting stdout and
    /// stderr interleaved along with the exit code.
    pub async fn exec_command(
        &self,
        container_id: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput, ContainerError> {
        info!(
            "Executing command in container {}: {:?}",
            container_id, command
        );

        let exec_options = CreateExecOptions {
            cmd: Some(command),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.docker.create_exec(container_id, exec_options).await?;

        let mut collected = Vec::new();
        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(Ok(msg)) = output.next().await {
                match msg {
                    LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                        collected.extend_from_slice(&message);
                    }
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(ExecOutput {
            exit_code,
            output: collected,
        })
    }

    pub async fn ensure_image_available(&self, image: &str) -> Result<(), ContainerError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                filters: {
                    let mut filters = HashMap::new();
                    filters.insert("reference".to_string(), vec![image.to_string()]);
                    filters
                },
                ..Default::default()
            }))
            .await?;

        if !images.is_empty() {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }

        info!("Pulling image {}", image);

        let create_image_options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(create_image_options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(_) => {} // Progress update
                Err(e) => {
                    error!("Failed to pull image {}: {}", image, e);
                    return Err(ContainerError::OperationFailed(format!(
                        "Failed to pull image: {}",
                        e
                    )));
                }
            }
        }

        info!("Successfully pulled image {}", image);
        Ok(())
    }

    async fn container_exists(&self, name: &str) -> Result<bool, ContainerError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters: {
                    let mut filters = HashMap::new();
                    filters.insert("name".to_string(), vec![name.to_string()]);
                    filters
                },
                ..Default::default()
            }))
            .await?;

        Ok(!containers.is_empty())
    }
}
