use crate::{error::*, image::OciDir};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Directory of the content store, in OCI image layout
pub const STORE_DIR: &str = "store";
/// File name of the database kept by the index builder
pub const ARTIFACTS_DB: &str = "artifacts.db";

/// Transient directory holding everything one indexing run writes
///
/// Named with a random UUID under the base directory, so concurrent runs
/// never share one. It is removed when dropped, on every exit path of the
/// run. A failed removal is logged and otherwise ignored.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    store: OciDir,
}

impl Workspace {
    pub fn create(base: &Path) -> Result<Self> {
        let root = base.join(format!("soci-{}", uuid::Uuid::new_v4()));
        log::info!(
            "Creating a directory to store images and SOCI artifacts: {}",
            root.display()
        );
        fs::create_dir_all(&root)?;
        let store = match OciDir::create(root.join(STORE_DIR)) {
            Ok(store) => store,
            Err(e) => {
                remove(&root);
                return Err(e);
            }
        };
        Ok(Workspace { root, store })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store the image content is pulled into
    pub fn content_store(&self) -> &OciDir {
        &self.store
    }

    /// Store the index builder writes artifacts into
    ///
    /// This is the same layout as [Workspace::content_store], so that the
    /// index manifest can refer to image content without copying.
    pub fn artifact_store(&self) -> &OciDir {
        &self.store
    }

    pub fn artifacts_db_path(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DB)
    }
}

fn remove(root: &Path) {
    log::info!("Removing all files in {}", root.display());
    fs::remove_dir_all(root)
        .unwrap_or_else(|e| log::error!("Clean up error: {}: {}", root.display(), e));
}

impl Drop for Workspace {
    fn drop(&mut self) {
        remove(&self.root);
    }
}
