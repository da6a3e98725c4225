// ABOUTME: Docker image builder for the bundled Salt minion Dockerfile
// Tars up a build context and streams the build through bollard

use anyhow::{Context, Result};
use bollard::image::BuildImageOptions;
use bollard::Docker;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tar::{Builder, Header};
use tracing::{debug, error, info};

/// Dockerfile shipped with the crate; installs Salt onedir on Ubuntu and
/// keeps the container alive for exec.
const SALT_DOCKERFILE: &str = include_str!("../../resources/Dockerfile.ubuntu");

/// Options for building a Docker image.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub context_dir: PathBuf,
    pub dockerfile: PathBuf,
    pub build_args: Vec<(String, String)>,
    pub no_cache: bool,
    pub pull: bool,
}

pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub async fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker")?;
        docker.ping().await.context("Failed to ping Docker daemon")?;
        Ok(Self { docker })
    }

    /// Build an image with the given options, failing on the first error
    /// frame the daemon reports.
    pub async fn build_image(&self, tag: &str, options: &BuildOptions) -> Result<()> {
        use futures_util::stream::StreamExt;

        info!("Building Docker image: {}", tag);

        let tar_data = Self::create_build_context(&options.context_dir, &options.dockerfile)?;

        let build_args: HashMap<&str, &str> =
            options.build_args.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let build_options = BuildImageOptions {
            dockerfile: "Dockerfile",
            t: tag,
            pull: options.pull,
            nocache: options.no_cache,
            buildargs: build_args,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(build_options, None, Some(tar_data.into()));

        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => {
                    if let Some(stream) = output.stream {
                        debug!("Build: {}", stream.trim());
                    }
                    if let Some(error) = output.error {
                        error!("Build error: {}", error);
                        return Err(anyhow::anyhow!("Docker build failed: {}", error));
                    }
                }
                Err(e) => {
                    error!("Build stream error: {}", e);
                    return Err(e.into());
                }
            }
        }

        info!("Successfully built image: {}", tag);
        Ok(())
    }

    /// Build the bundled Salt image, passing the requested release through
    /// the SALT_VERSION build arg.
    pub async fn build_salt_image(&self, salt_version: &str, tag: &str) -> Result<()> {
        let context = tempfile::tempdir().context("Failed to create build context directory")?;
        let dockerfile = context.path().join("Dockerfile");
        std::fs::write(&dockerfile, SALT_DOCKERFILE).context("Failed to write Dockerfile")?;

        let options = BuildOptions {
            context_dir: context.path().to_path_buf(),
            dockerfile,
            build_args: vec![("SALT_VERSION".to_string(), salt_version.to_string())],
            no_cache: false,
            pull: false,
        };

        self.build_image(tag, &options).await
    }

    /// Check if an image exists locally
    pub async fn image_exists(&self, tag: &str) -> Result<bool> {
        let images = self
            .docker
            .list_images(Some(bollard::image::ListImagesOptions::<String> {
                filters: {
                    let mut filters = HashMap::new();
                    filters.insert("reference".to_string(), vec![tag.to_string()]);
                    filters
                },
                ..Default::default()
            }))
            .await?;

        Ok(!images.is_empty())
    }

    /// Remove an image
    pub async fn remove_image(&self, tag: &str) -> Result<()> {
        info!("Removing image: {}", tag);
        self.docker.remove_image(tag, None, None).await?;
        Ok(())
    }

    /// Create a tar archive holding the Dockerfile plus the context directory.
    fn create_build_context(context_dir: &Path, dockerfile: &Path) -> Result<Vec<u8>> {
        let mut tar_data = Vec::new();
        let mut builder = Builder::new(&mut tar_data);

        let mut dockerfile_file = std::fs::File::open(dockerfile)
            .with_context(|| format!("Failed to open {}", dockerfile.display()))?;
        let metadata = dockerfile_file.metadata()?;

        let mut header = Header::new_gnu();
        header.set_path("Dockerfile")?;
        header.set_size(metadata.len());
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &mut dockerfile_file)?;

        Self::add_directory_to_tar(&mut builder, context_dir, "")?;

        builder.finish()?;
        drop(builder);
        Ok(tar_data)
    }

    /// Recursively add directory contents to tar
    fn add_directory_to_tar(
        builder: &mut Builder<&mut Vec<u8>>,
        dir: &Path,
        base_path: &str,
    ) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_name = entry.file_name();
            let file_name_str = file_name.to_string_lossy();

            // The Dockerfile already went in under its canonical name
            if file_name_str.starts_with('.') || file_name_str == "Dockerfile" {
                continue;
            }

            let tar_path = if base_path.is_empty() {
                file_name_str.to_string()
            } else {
                format!("{}/{}", base_path, file_name_str)
            };

            if path.is_dir() {
                Self::add_directory_to_tar(builder, &path, &tar_path)?;
            } else {
                let mut file = std::fs::File::open(&path)?;
                let metadata = file.metadata()?;

                let mut header = Header::new_gnu();
                header.set_path(&tar_path)?;
                header.set_size(metadata.len());
                header.set_mode(0o644);
                header.set_cksum();
                builder.append(&header, &mut file)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_image_builder_creation() {
        let builder = ImageBuilder::new().await;
        assert!(builder.is_ok());
    }

    #[test]
    fn test_build_context_creation() {
        let temp_dir = TempDir::new().unwrap();
        let dockerfile = temp_dir.path().join("Dockerfile");
        std::fs::write(&dockerfile, "FROM alpine\nRUN echo hello").unwrap();
        std::fs::write(temp_dir.path().join("extra.txt"), "payload").unwrap();

        let tar_data = ImageBuilder::create_build_context(temp_dir.path(), &dockerfile).unwrap();
        assert!(!tar_data.is_empty());

        let mut archive = tar::Archive::new(tar_data.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"Dockerfile".to_string()));
        assert!(names.contains(&"extra.txt".to_string()));
    }

    #[test]
    fn test_bundled_dockerfile_takes_salt_version() {
        assert!(SALT_DOCKERFILE.contains("ARG SALT_VERSION"));
    }
}
