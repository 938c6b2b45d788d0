//! Media types of manifests and configs handled by the indexer
//!
//! Docker types are not covered by [oci_spec::image::MediaType] and appear
//! there as `MediaType::Other`, so everything is compared as strings.

pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

pub const DOCKER_IMAGE_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const OCI_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// Config media types of container images
pub const IMAGE_CONFIG: [&str; 2] = [DOCKER_IMAGE_CONFIG, OCI_IMAGE_CONFIG];

/// Manifest media types of a single-platform image
pub const IMAGE_MANIFEST: [&str; 2] = [DOCKER_MANIFEST, OCI_MANIFEST];

/// Manifest media types listing other manifests
pub const MANIFEST_LIST: [&str; 2] = [DOCKER_MANIFEST_LIST, OCI_INDEX];

/// Value of `Accept` header for manifest requests
pub fn manifest_accept() -> String {
    [DOCKER_MANIFEST_LIST, DOCKER_MANIFEST, OCI_INDEX, OCI_MANIFEST].join(", ")
}

pub fn is_image_config(media_type: &str) -> bool {
    IMAGE_CONFIG.contains(&media_type)
}

pub fn is_image_manifest(media_type: &str) -> bool {
    IMAGE_MANIFEST.contains(&media_type)
}

pub fn is_manifest_list(media_type: &str) -> bool {
    MANIFEST_LIST.contains(&media_type)
}

/// Any manifest type, i.e. content which has to be pushed to `/manifests/` rather than `/blobs/`
pub fn is_manifest(media_type: &str) -> bool {
    is_image_manifest(media_type) || is_manifest_list(media_type)
}
