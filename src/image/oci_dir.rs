use crate::{error::*, Digest};
use oci_spec::image::{Descriptor, DescriptorBuilder, ImageIndex, ImageIndexBuilder, MediaType};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Annotation naming a manifest in `index.json`
pub const REF_NAME: &str = "org.opencontainers.image.ref.name";

const OCI_LAYOUT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Content-addressable store in the form of [OCI Image Layout](https://github.com/opencontainers/image-spec/blob/v1.1.0/image-layout.md)
///
/// Blobs are stored under `blobs/<algorithm>/<encoded>`, named manifests
/// are listed in `index.json`. Blobs are written through a temporary file
/// and renamed, so a blob path either does not exist or holds the complete
/// content.
#[derive(Debug)]
pub struct OciDir {
    oci_dir_root: PathBuf,
}

impl OciDir {
    /// Create a new layout, or open the existing one at `oci_dir_root`
    pub fn create(oci_dir_root: PathBuf) -> Result<Self> {
        fs::create_dir_all(oci_dir_root.join("blobs"))?;
        let layout = oci_dir_root.join("oci-layout");
        if !layout.exists() {
            fs::write(&layout, OCI_LAYOUT)?;
        }
        let dir = Self { oci_dir_root };
        if !dir.index_path().exists() {
            dir.write_index(Vec::new())?;
        }
        Ok(dir)
    }

    pub fn open(oci_dir_root: &Path) -> Result<Self> {
        if !oci_dir_root.join("oci-layout").is_file() {
            return Err(Error::NotAnOciLayout(oci_dir_root.to_owned()));
        }
        Ok(Self {
            oci_dir_root: oci_dir_root.to_owned(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.oci_dir_root
    }

    pub fn has_blob(&self, digest: &Digest) -> bool {
        self.oci_dir_root.join(digest.as_path()).is_file()
    }

    pub fn get_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.oci_dir_root.join(digest.as_path());
        if !path.is_file() {
            return Err(Error::MissingBlob(digest.clone()));
        }
        Ok(fs::read(path)?)
    }

    /// Whether the blob exists and its content matches the digest
    pub fn verify_blob(&self, digest: &Digest) -> Result<bool> {
        if !self.has_blob(digest) {
            return Ok(false);
        }
        match digest.verify(&self.get_blob(digest)?) {
            Ok(()) => Ok(true),
            Err(Error::DigestMismatch { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Store a blob fetched by `digest` after checking its content
    pub fn put_blob(&self, digest: &Digest, data: &[u8]) -> Result<()> {
        digest.verify(data)?;
        let out = self.oci_dir_root.join(digest.as_path());
        let parent = out
            .parent()
            .expect("Blob path always has blobs/<algorithm> parent");
        fs::create_dir_all(parent)?;
        let tmp = parent.join(format!(".{}.{}", digest.encoded, uuid::Uuid::new_v4()));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &out)?;
        Ok(())
    }

    /// Store new content and return its descriptor
    pub fn add_blob(&self, media_type: &str, data: &[u8]) -> Result<Descriptor> {
        let digest = Digest::from_buf_sha256(data);
        self.put_blob(&digest, data)?;
        Ok(DescriptorBuilder::default()
            .media_type(MediaType::from(media_type))
            .digest(digest.to_string())
            .size(data.len() as i64)
            .build()?)
    }

    pub fn get_index(&self) -> Result<ImageIndex> {
        let index_json = fs::read(self.index_path())?;
        Ok(serde_json::from_slice(&index_json)?)
    }

    /// Record `descriptor` in `index.json` under `name`, replacing any manifest with the same name
    pub fn tag(&self, descriptor: &Descriptor, name: &str) -> Result<()> {
        let mut value = serde_json::to_value(descriptor)?;
        value["annotations"][REF_NAME] = serde_json::Value::String(name.to_string());
        let named: Descriptor = serde_json::from_value(value)?;

        let mut manifests: Vec<Descriptor> = self
            .get_index()?
            .manifests()
            .iter()
            .filter(|desc| ref_name(desc) != Some(name))
            .cloned()
            .collect();
        manifests.push(named);
        self.write_index(manifests)
    }

    /// Find the manifest recorded under `name`
    pub fn resolve(&self, name: &str) -> Result<Option<Descriptor>> {
        Ok(self
            .get_index()?
            .manifests()
            .iter()
            .find(|desc| ref_name(desc) == Some(name))
            .cloned())
    }

    fn index_path(&self) -> PathBuf {
        self.oci_dir_root.join("index.json")
    }

    fn write_index(&self, manifests: Vec<Descriptor>) -> Result<()> {
        let index = ImageIndexBuilder::default()
            .schema_version(2_u32)
            .manifests(manifests)
            .build()?;
        fs::write(self.index_path(), serde_json::to_string(&index)?)?;
        Ok(())
    }
}

fn ref_name(desc: &Descriptor) -> Option<&str> {
    desc.annotations()
        .as_ref()
        .and_then(|annotations| annotations.get(REF_NAME))
        .map(|name| name.as_str())
}
