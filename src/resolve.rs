//! Find the image manifests to be indexed

use crate::{
    distribution::{Reference, Repository},
    error::*,
    image::Manifest,
    media_types, Digest,
};

/// Digests of the single-platform image manifests `reference` points to
///
/// - A tag is resolved to the digest it currently points to, so the result
///   does not change even if the tag is moved while indexing.
/// - A Docker manifest list yields its valid children in declared order.
///   Children which are not container images are skipped.
/// - An OCI image index is assumed to be indexed already.
pub fn get_image_digests<R: Repository>(repo: &mut R, reference: &Reference) -> Result<Vec<Digest>> {
    let digest = match reference {
        Reference::Digest(digest) => digest.clone(),
        Reference::Tag(_) => Digest::from_descriptor(&repo.resolve(reference)?)?,
    };
    log::debug!("{} resolved to {}", reference, digest);

    let (desc, body) = repo.fetch_manifest(&Reference::Digest(digest.clone()))?;
    let media_type = desc.media_type().to_string();
    match media_type.as_str() {
        media_types::OCI_INDEX => Err(Error::ImageAlreadyIndexed),
        media_types::DOCKER_MANIFEST_LIST => {
            let list = Manifest::from_slice(&body)?;
            let mut digests = Vec::new();
            for child in &list.manifests {
                let child_type = child.media_type().to_string();
                let child_digest = Digest::from_descriptor(child)?;
                if !media_types::is_image_manifest(&child_type) {
                    log::debug!("Skip {} of media type {}", child_digest, child_type);
                    continue;
                }
                match validate_image(repo, &child_digest) {
                    Ok(()) => digests.push(child_digest),
                    Err(e) if e.is_manifest_validation() => {
                        log::debug!("Skip {}: {}", child_digest, e);
                    }
                    Err(e) => return Err(e),
                }
            }
            if digests.is_empty() {
                return Err(Error::NoValidImages);
            }
            Ok(digests)
        }
        ty if media_types::is_image_manifest(ty) => {
            Manifest::from_slice(&body)?.validate_image()?;
            Ok(vec![digest])
        }
        ty => Err(Error::UnsupportedManifestMediaType(ty.to_string())),
    }
}

fn validate_image<R: Repository>(repo: &mut R, digest: &Digest) -> Result<()> {
    let (_, body) = repo.fetch_manifest(&Reference::Digest(digest.clone()))?;
    Manifest::from_slice(&body)?.validate_image()
}
