//! Interface to the program building the index artifact

use crate::{error::*, workspace::Workspace, Digest, ImageName};
use oci_spec::image::Descriptor;
use std::{
    path::PathBuf,
    process::{Command, Stdio},
};

/// Environment variable telling the builder program where its database is
pub const ARTIFACTS_DB_ENV: &str = "SOCI_ARTIFACTS_DB";

/// Image to be indexed, already pulled into the workspace
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTarget {
    /// Repository and digest of the image, `<registry>/<name>@<digest>`
    pub name: ImageName,
    /// Root manifest in the content store
    pub descriptor: Descriptor,
}

/// Builds the index artifact of an image
pub trait IndexBuilder {
    /// Build the index of `image` into [Workspace::artifact_store]
    ///
    /// Returns the descriptor of the index manifest, or [Error::EmptyIndex]
    /// when no layer was indexed.
    fn convert(&mut self, workspace: &Workspace, image: &ImageTarget) -> Result<Descriptor>;
}

/// Runs an external program as the index builder
///
/// The program is called as `<program> [args...] <store-dir> <image-name> <image-digest>`
/// with [ARTIFACTS_DB_ENV] set. It writes the index manifest into the OCI
/// layout at `<store-dir>` and prints its descriptor as JSON to stdout.
/// Empty stdout means the index is empty.
#[derive(Debug, Clone)]
pub struct CommandIndexBuilder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandIndexBuilder {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        CommandIndexBuilder {
            program: program.into(),
            args,
        }
    }
}

impl IndexBuilder for CommandIndexBuilder {
    fn convert(&mut self, workspace: &Workspace, image: &ImageTarget) -> Result<Descriptor> {
        log::info!("Building SOCI index");
        let store = workspace.artifact_store();
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(store.root())
            .arg(image.name.to_string())
            .arg(image.descriptor.digest())
            .env(ARTIFACTS_DB_ENV, workspace.artifacts_db_path())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                Error::BuilderFailed(format!("Cannot run {}: {}", self.program.display(), e))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            log::debug!("{}: {}", self.program.display(), line);
        }
        if !output.status.success() {
            return Err(Error::BuilderFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(Error::EmptyIndex);
        }
        let descriptor: Descriptor = serde_json::from_str(stdout.trim())?;
        let digest = Digest::from_descriptor(&descriptor)?;
        if !store.verify_blob(&digest)? {
            return Err(Error::BuilderFailed(format!(
                "Index manifest {} is not found in {}",
                digest,
                store.root().display()
            )));
        }
        Ok(descriptor)
    }
}
