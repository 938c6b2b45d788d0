//! Copy content between a registry and the local OCI layout

use crate::{
    distribution::{is_oci_artifact_rejection, Reference, Repository},
    error::*,
    image::{Manifest, OciDir},
    media_types, Digest,
};
use oci_spec::image::Descriptor;

/// Copy the manifest `reference` points to, and everything it refers to, into `store`
///
/// Blobs already in the store are re-hashed and kept if intact, fetched
/// again otherwise. The root manifest is recorded in `index.json` under
/// `reference`.
pub fn pull<R: Repository>(repo: &mut R, reference: &Reference, store: &OciDir) -> Result<Descriptor> {
    log::info!("Pulling {}", reference);
    let (root, body) = repo.fetch_manifest(reference)?;
    store.put_blob(&Digest::from_descriptor(&root)?, &body)?;
    pull_children(repo, &body, store)?;
    store.tag(&root, &reference.to_string())?;
    Ok(root)
}

fn pull_children<R: Repository>(repo: &mut R, manifest: &[u8], store: &OciDir) -> Result<()> {
    for (media_type, digest) in Manifest::from_slice(manifest)?.references()? {
        let intact = store.verify_blob(&digest)?;
        if media_types::is_manifest(&media_type) {
            let body = if intact {
                store.get_blob(&digest)?
            } else {
                let (_, body) = repo.fetch_manifest(&Reference::Digest(digest.clone()))?;
                store.put_blob(&digest, &body)?;
                body
            };
            pull_children(repo, &body, store)?;
            continue;
        }
        if intact {
            log::debug!("{} already exists in local store", digest);
            continue;
        }
        log::debug!("Fetching {}", digest);
        let blob = repo.fetch_blob(&digest)?;
        store.put_blob(&digest, &blob)?;
    }
    Ok(())
}

/// Push `artifact` stored in `store`, and everything it refers to, to the repository
///
/// Blobs the registry already has are not uploaded again. The root manifest
/// is pushed by digest, then tagged with `tag` if given. A registry refusing
/// OCI artifacts is reported as [Error::RegistryUnsupported].
pub fn push<R: Repository>(
    store: &OciDir,
    artifact: &Descriptor,
    repo: &mut R,
    tag: Option<&Reference>,
) -> Result<()> {
    let digest = Digest::from_descriptor(artifact)?;
    log::info!("Pushing {}", digest);
    let body = store.get_blob(&digest)?;
    push_children(store, &body, repo)?;

    let media_type = artifact.media_type().to_string();
    repo.upload_manifest(&Reference::Digest(digest), &media_type, &body)
        .map_err(capability)?;
    if let Some(tag) = tag {
        log::info!("Tagging as {}", tag);
        repo.upload_manifest(tag, &media_type, &body)
            .map_err(capability)?;
    }
    Ok(())
}

fn push_children<R: Repository>(store: &OciDir, manifest: &[u8], repo: &mut R) -> Result<()> {
    for (media_type, digest) in Manifest::from_slice(manifest)?.references()? {
        let body = store.get_blob(&digest)?;
        if media_types::is_manifest(&media_type) {
            push_children(store, &body, repo)?;
            repo.upload_manifest(&Reference::Digest(digest), &media_type, &body)
                .map_err(capability)?;
            continue;
        }
        if repo.exists(&digest)? {
            log::debug!("{} already exists in registry", digest);
            continue;
        }
        repo.upload_blob(&digest, &body)?;
    }
    Ok(())
}

fn capability(e: Error) -> Error {
    if is_oci_artifact_rejection(&e) {
        Error::RegistryUnsupported(Box::new(e))
    } else {
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        distribution::{Name, Registry},
        media_types::*,
        testing::FakeRegistry,
    };
    use serde_json::json;
    use std::fs;

    const SOCI_INDEX_CONFIG: &str = "application/vnd.amazon.soci.index.v1+json";

    #[test]
    fn pull_image() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let store = OciDir::create(tmp_dir.path().to_owned())?;
        let registry = FakeRegistry::new();
        let image = registry.add_image(DOCKER_MANIFEST, DOCKER_IMAGE_CONFIG, "amd64");
        let mut repo = registry.repository(&Name::new("app")?)?;

        let reference = Reference::Digest(Digest::from_descriptor(&image)?);
        let root = pull(&mut repo, &reference, &store)?;
        assert_eq!(root.digest(), image.digest());
        assert_eq!(registry.state().blob_fetches.len(), 2);
        let manifest = Manifest::from_slice(&store.get_blob(reference.digest().unwrap())?)?;
        for (_, digest) in manifest.references()? {
            assert!(store.verify_blob(&digest)?);
        }
        assert_eq!(
            store.resolve(&reference.to_string())?.unwrap().digest(),
            image.digest()
        );

        // Intact blobs are not fetched again
        pull(&mut repo, &reference, &store)?;
        assert_eq!(registry.state().blob_fetches.len(), 2);
        Ok(())
    }

    #[test]
    fn corrupted_blob_is_fetched_again() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let store = OciDir::create(tmp_dir.path().to_owned())?;
        let registry = FakeRegistry::new();
        let image = registry.add_image(OCI_MANIFEST, OCI_IMAGE_CONFIG, "arm64");
        let mut repo = registry.repository(&Name::new("app")?)?;
        let reference = Reference::Digest(Digest::from_descriptor(&image)?);
        pull(&mut repo, &reference, &store)?;

        let manifest = Manifest::from_slice(&store.get_blob(reference.digest().unwrap())?)?;
        let layer = Digest::from_descriptor(&manifest.layers[0])?;
        fs::write(tmp_dir.path().join(layer.as_path()), b"corrupted")?;

        pull(&mut repo, &reference, &store)?;
        assert_eq!(registry.state().blob_fetches.len(), 3);
        assert_eq!(registry.state().blob_fetches[2], layer);
        assert!(store.verify_blob(&layer)?);
        Ok(())
    }

    /// Store an index manifest referring to `image` like SOCI does
    fn soci_index(store: &OciDir, image: &Descriptor) -> Result<Descriptor> {
        let config = store.add_blob(SOCI_INDEX_CONFIG, b"{}")?;
        let ztoc = store.add_blob("application/octet-stream", b"ztoc")?;
        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST,
            "config": config,
            "layers": [ztoc],
            "subject": image,
        });
        store.add_blob(OCI_MANIFEST, manifest.to_string().as_bytes())
    }

    #[test]
    fn push_index() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let store = OciDir::create(tmp_dir.path().to_owned())?;
        let registry = FakeRegistry::new();
        let image = registry.add_image(OCI_MANIFEST, OCI_IMAGE_CONFIG, "amd64");
        let mut repo = registry.repository(&Name::new("app")?)?;
        let index = soci_index(&store, &image)?;

        // Config blob already in the registry is not uploaded again
        registry.add_blob(SOCI_INDEX_CONFIG, b"{}");
        let tag = Reference::tag("soci")?;
        push(&store, &index, &mut repo, Some(&tag))?;

        let state = registry.state();
        assert_eq!(state.pushed_blobs, vec![Digest::from_buf_sha256(b"ztoc")]);
        assert_eq!(
            state.pushed_manifests,
            vec![
                (index.digest().to_string(), OCI_MANIFEST.to_string()),
                ("soci".to_string(), OCI_MANIFEST.to_string()),
            ]
        );
        assert_eq!(state.tags.get("soci"), Some(&Digest::from_descriptor(&index)?));
        Ok(())
    }

    #[test]
    fn push_to_registry_without_oci_artifacts() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let store = OciDir::create(tmp_dir.path().to_owned())?;
        let registry = FakeRegistry::new();
        registry.state().reject_oci_manifests = true;
        let image = registry.add_image(DOCKER_MANIFEST, DOCKER_IMAGE_CONFIG, "amd64");
        let mut repo = registry.repository(&Name::new("app")?)?;
        let index = soci_index(&store, &image)?;

        let err = push(&store, &index, &mut repo, None).unwrap_err();
        assert!(err.is_registry_unsupported());
        assert!(registry.state().pushed_manifests.is_empty());
        Ok(())
    }

    #[test]
    fn push_missing_artifact() -> Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let store = OciDir::create(tmp_dir.path().to_owned())?;
        let registry = FakeRegistry::new();
        let mut repo = registry.repository(&Name::new("app")?)?;
        let image = registry.add_image(OCI_MANIFEST, OCI_IMAGE_CONFIG, "amd64");

        assert!(matches!(
            push(&store, &image, &mut repo, None),
            Err(Error::MissingBlob(_))
        ));
        Ok(())
    }
}
