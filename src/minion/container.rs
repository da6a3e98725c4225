// ABOUTME: Fluent Salt minion container fixture
// Accumulates configuration, materializes it into a minion file plus bind
// mounts, and runs salt-call inside a throwaway Docker container

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use super::config::{LogLevel, MinionConfig};
use super::roots::{resolve_container_path, EnvRoots, RootEntry};
use crate::docker::{ContainerManager, ExecOutput, ImageBuilder, RunOptions};

/// In-container minion config directory.
const CONFIG_DIR: &str = "/etc/salt";
/// In-container base directory for state roots.
const BASE_DIR_STATE: &str = "/srv/salt";
/// In-container base directory for pillar roots.
const BASE_DIR_PILLAR: &str = "/srv/pillar";
/// Default SALT_VERSION build arg for the bundled Dockerfile.
const DEFAULT_SALT_VERSION: &str = "3007";

/// A throwaway Salt minion container for integration tests.
///
/// Builder methods accumulate configuration in any order; `start` then
/// materializes the minion document and the bind-mount set, builds (or
/// pulls) the image and starts the container. `exec_salt_call` runs the
/// accumulated states against it, and `stop` tears it down.
///
/// ```no_run
/// # async fn demo() -> anyhow::Result<()> {
/// use saltbox::SaltContainer;
///
/// let mut minion = SaltContainer::new()
///     .with_minion_id("httpd_test")
///     .with_file_root("tests/salt/base", "base")
///     .with_pillar_root("tests/pillar/base", "base")
///     .with_state_verbose(true);
///
/// minion.start().await?;
/// let result = minion.exec_salt_call("state.apply").await?;
/// assert!(result.success(), "{}", result.output_lossy());
/// minion.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct SaltContainer {
    config: MinionConfig,
    base_config: serde_yaml::Mapping,
    extra_config: serde_yaml::Mapping,
    file_roots: EnvRoots,
    pillar_roots: EnvRoots,
    volumes: Vec<(PathBuf, PathBuf)>,
    image: Option<String>,
    salt_version: Option<String>,
    configured: bool,
    manager: Option<ContainerManager>,
    container_id: Option<String>,
}

impl SaltContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minion's self-identifier (`id` in the minion document).
    pub fn with_minion_id(mut self, id: impl Into<String>) -> Self {
        self.config.id = Some(id.into());
        self
    }

    /// Set the default runtime environment (`saltenv`).
    pub fn with_saltenv(mut self, saltenv: impl Into<String>) -> Self {
        self.config.saltenv = Some(saltenv.into());
        self
    }

    /// Set the top file location (`state_top`).
    pub fn with_state_top(mut self, path: impl Into<String>) -> Self {
        self.config.state_top = Some(path.into());
        self
    }

    /// Set the environment the top file is served from (`state_top_saltenv`).
    pub fn with_state_top_saltenv(mut self, saltenv: impl Into<String>) -> Self {
        self.config.state_top_saltenv = Some(saltenv.into());
        self
    }

    /// Register a state root under the `base` environment.
    pub fn with_file_root(self, host_path: impl AsRef<Path>, target_path: impl AsRef<Path>) -> Self {
        self.with_file_root_in(host_path, target_path, "base")
    }

    /// Register a state root under an explicit environment. The target
    /// path is a relative suffix under `/srv/salt`; the host path must
    /// exist by the time the container starts (a missing path surfaces
    /// as a start error, not here).
    pub fn with_file_root_in(
        mut self,
        host_path: impl AsRef<Path>,
        target_path: impl AsRef<Path>,
        environ: &str,
    ) -> Self {
        let entry = root_entry(
            Path::new(BASE_DIR_STATE),
            host_path.as_ref(),
            target_path.as_ref(),
            environ,
        );
        self.file_roots.push(environ, entry);
        self
    }

    /// Register a pillar root under the `base` environment.
    pub fn with_pillar_root(
        self,
        host_path: impl AsRef<Path>,
        target_path: impl AsRef<Path>,
    ) -> Self {
        self.with_pillar_root_in(host_path, target_path, "base")
    }

    /// Register a pillar root under an explicit environment; the target
    /// path is a relative suffix under `/srv/pillar`.
    pub fn with_pillar_root_in(
        mut self,
        host_path: impl AsRef<Path>,
        target_path: impl AsRef<Path>,
        environ: &str,
    ) -> Self {
        let entry = root_entry(
            Path::new(BASE_DIR_PILLAR),
            host_path.as_ref(),
            target_path.as_ref(),
            environ,
        );
        self.pillar_roots.push(environ, entry);
        self
    }

    /// Append a fileserver backend (duplicates permitted, order kept).
    pub fn with_file_server_backend(mut self, backend: impl Into<String>) -> Self {
        self.config.file_server_backends.push(backend.into());
        self
    }

    /// Append a gitfs remote (duplicates permitted, order kept).
    pub fn with_gitfs_remote(mut self, remote: impl Into<String>) -> Self {
        self.config.gitfs_remotes.push(remote.into());
        self
    }

    pub fn with_state_verbose(mut self, verbose: bool) -> Self {
        self.config.state_verbose = verbose;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    pub fn with_log_level_logfile(mut self, level: LogLevel) -> Self {
        self.config.log_level_logfile = level;
        self
    }

    /// Load a YAML document and use it as the base config mapping. The
    /// whole base is replaced (last call wins); builder fields and extra
    /// config are still written over it at materialization time.
    pub fn with_config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        self.base_config = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(self)
    }

    /// Set the overlay mapping applied last during materialization;
    /// extra keys replace same-named base keys.
    pub fn with_extra_config(mut self, extra: serde_yaml::Mapping) -> Self {
        self.extra_config = extra;
        self
    }

    /// Use a pre-built image instead of building the bundled Dockerfile.
    pub fn with_image(mut self, tag: impl Into<String>) -> Self {
        self.image = Some(tag.into());
        self
    }

    /// Salt release to install when building the bundled Dockerfile
    /// (SALT_VERSION build arg, default "3007").
    pub fn with_salt_version(mut self, version: impl Into<String>) -> Self {
        self.salt_version = Some(version.into());
        self
    }

    /// Materialize the accumulated configuration: write the minion
    /// document to a fresh temp directory and compute the bind-mount
    /// set. Called automatically by [`start`](Self::start); calling it
    /// again is a no-op. The temp directory is left for the host's temp
    /// garbage collection, so a stopped container's config can still be
    /// inspected.
    pub fn configure(&mut self) -> Result<()> {
        if self.configured {
            return Ok(());
        }

        let staging = tempfile::tempdir()
            .context("Failed to create config staging directory")?
            .into_path();
        let config_path = staging.join("minion");

        let doc = self.config.compose(
            &self.base_config,
            self.file_roots.to_yaml(),
            self.pillar_roots.to_yaml(),
            &self.extra_config,
        );
        let rendered = serde_yaml::to_string(&doc).context("Failed to render minion config")?;
        debug!("minion config:\n{}", rendered);
        std::fs::write(&config_path, rendered)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        // Mapped file-by-file so a caller can still mount over the rest
        // of the config dir
        self.volumes.push((config_path, Path::new(CONFIG_DIR).join("minion")));

        for (host_path, container_path) in self.file_roots.mounts() {
            debug!(
                "file root mount: {} -> {}",
                host_path.display(),
                container_path.display()
            );
            self.volumes.push((host_path, container_path));
        }
        for (host_path, container_path) in self.pillar_roots.mounts() {
            debug!(
                "pillar root mount: {} -> {}",
                host_path.display(),
                container_path.display()
            );
            self.volumes.push((host_path, container_path));
        }

        self.configured = true;
        Ok(())
    }

    /// Materialize the configuration, make sure the image is available
    /// (building the bundled Dockerfile unless an image was supplied)
    /// and start the container.
    pub async fn start(&mut self) -> Result<()> {
        self.configure()?;

        let manager = ContainerManager::new().await.context("Failed to connect to Docker")?;

        let image = match &self.image {
            Some(tag) => tag.clone(),
            None => {
                let salt_version =
                    self.salt_version.as_deref().unwrap_or(DEFAULT_SALT_VERSION).to_string();
                let tag = format!("saltbox:{}", salt_version);
                let builder = ImageBuilder::new().await?;
                if !builder.image_exists(&tag).await? {
                    builder.build_salt_image(&salt_version, &tag).await?;
                }
                tag
            }
        };

        let name = format!("saltbox-{}", Uuid::new_v4());
        let options = RunOptions {
            image,
            command: Vec::new(),
            mounts: self.volumes.clone(),
            labels: Default::default(),
            remove_on_exit: false,
        };

        let container_id = manager.run_container(&name, &options).await?;
        info!("Started salt minion container {}", container_id);

        self.container_id = Some(container_id);
        self.manager = Some(manager);
        Ok(())
    }

    /// Stop and remove the container.
    pub async fn stop(&mut self) -> Result<()> {
        let manager = self.manager.as_ref().context("Container is not running")?;
        let container_id = self.container_id.take().context("Container is not running")?;

        manager.stop_container(&container_id).await?;
        manager.remove_container(&container_id).await?;
        Ok(())
    }

    /// The argument vector used to invoke salt-call inside the container.
    pub fn salt_call_args(&self, command: &str, output: &str) -> Vec<String> {
        vec![
            "salt-call".to_string(),
            "--local".to_string(),
            format!("--config-dir={}", CONFIG_DIR),
            format!("--id={}", self.config.id.as_deref().unwrap_or_default()),
            format!("--out={}", output),
            command.to_string(),
        ]
    }

    /// Run an arbitrary command inside the running container. A non-zero
    /// exit code is returned as data, not an error.
    pub async fn exec(&self, command: Vec<String>) -> Result<ExecOutput> {
        let manager = self.manager.as_ref().context("Container is not running")?;
        let container_id = self.container_id.as_deref().context("Container is not running")?;
        Ok(manager.exec_command(container_id, command).await?)
    }

    /// Run `salt-call --local <command>` with YAML output.
    pub async fn exec_salt_call(&self, command: &str) -> Result<ExecOutput> {
        self.exec(self.salt_call_args(command, "yaml")).await
    }

    /// The running container's id, if any.
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// The bind mounts registered so far (populated by `configure`).
    pub fn volume_mounts(&self) -> &[(PathBuf, PathBuf)] {
        &self.volumes
    }

    /// State roots recorded per environment.
    pub fn file_roots(&self) -> &EnvRoots {
        &self.file_roots
    }

    /// Pillar roots recorded per environment.
    pub fn pillar_roots(&self) -> &EnvRoots {
        &self.pillar_roots
    }
}

/// Resolve one builder call into a root entry: the host path becomes
/// absolute (without touching the filesystem), the target suffix becomes
/// an in-container path under `base`.
fn root_entry(base: &Path, host_path: &Path, target_path: &Path, environ: &str) -> RootEntry {
    let container_path = resolve_container_path(base, environ, target_path);
    RootEntry {
        host_path: absolutize(host_path),
        container_path,
    }
}

/// Anchor a relative host path to the current directory without touching
/// the filesystem; whether the path exists is the daemon's problem at
/// mount time.
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    }
}
