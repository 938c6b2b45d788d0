use crate::{error::*, media_types, Digest};
use oci_spec::image::Descriptor;
use serde::{Deserialize, Serialize};

/// Manifest envelope covering both image manifests and manifest lists
///
/// [oci_spec::image::ImageManifest] and [oci_spec::image::ImageIndex] each
/// describe only one of the two shapes, and reject Docker schema
/// variations, so the indexer reads manifests through this lenient envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
}

/// `config` field of a manifest, whose media type may be missing in the wild
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDescriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: i64,
}

impl Manifest {
    pub fn from_slice(buf: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(buf)?)
    }

    /// Media type of the manifest.
    ///
    /// The `mediaType` field is optional in OCI manifests,
    /// the `Content-Type` of the response is used as a fallback.
    pub fn media_type_or<'a>(&'a self, content_type: &'a str) -> &'a str {
        match self.media_type.as_deref() {
            Some(ty) if !ty.is_empty() => ty,
            _ => content_type,
        }
    }

    pub fn config_media_type(&self) -> &str {
        self.config
            .as_ref()
            .map(|config| config.media_type.as_str())
            .unwrap_or_default()
    }

    /// Check this is a manifest of a container image
    pub fn validate_image(&self) -> Result<()> {
        let ty = self.config_media_type();
        if ty.is_empty() {
            return Err(Error::EmptyConfigMediaType);
        }
        if !media_types::is_image_config(ty) {
            return Err(Error::UnexpectedConfigMediaType(ty.to_string()));
        }
        Ok(())
    }

    /// Every content this manifest points to, as `(media type, digest)`
    ///
    /// `subject` is not included since it refers to a predecessor of the manifest.
    pub fn references(&self) -> Result<Vec<(String, Digest)>> {
        let mut out = Vec::new();
        if let Some(config) = &self.config {
            out.push((config.media_type.clone(), Digest::new(&config.digest)?));
        }
        for desc in self.layers.iter().chain(self.manifests.iter()) {
            out.push((desc.media_type().to_string(), Digest::from_descriptor(desc)?));
        }
        Ok(out)
    }
}
