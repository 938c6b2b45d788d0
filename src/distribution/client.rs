use crate::{cancel::Cancel, distribution::*, error::*, media_types, Digest};
use oci_spec::image::{Descriptor, DescriptorBuilder, MediaType};
use serde::Deserialize;
use url::Url;

/// Sent as `User-Agent` in every request for registry-side diagnostics
pub const USER_AGENT: &str = concat!("soci-indexer/", env!("CARGO_PKG_VERSION"), " (ureq)");

/// A client for `/v2/<name>/` API endpoint
pub struct Client {
    agent: ureq::Agent,
    /// URL to registry server
    url: Url,
    /// Name of repository
    name: Name,
    /// Basic credentials, sent as is or exchanged for a bearer token
    credential: Option<Credential>,
    /// Cached bearer token
    token: Option<String>,
    cancel: Cancel,
}

/// Response of `/v2/<name>/tags/list`
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<String>,
}

impl Client {
    pub fn new(
        agent: ureq::Agent,
        url: Url,
        name: Name,
        credential: Option<Credential>,
        cancel: Cancel,
    ) -> Self {
        Client {
            agent,
            url,
            name,
            credential,
            token: None,
            cancel,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    fn authorize(&self, req: ureq::Request) -> ureq::Request {
        if let Some(token) = &self.token {
            req.set("Authorization", &format!("Bearer {}", token))
        } else if let Some(credential) = &self.credential {
            req.set("Authorization", &credential.header())
        } else {
            req
        }
    }

    fn send(
        &self,
        req: ureq::Request,
        body: Option<&[u8]>,
    ) -> std::result::Result<ureq::Response, ureq::Error> {
        let mut req = self.authorize(req);
        if let Some(timeout) = self.cancel.remaining() {
            req = req.timeout(timeout);
        }
        match body {
            Some(body) => req.send_bytes(body),
            None => req.call(),
        }
    }

    /// Send a request, answering a bearer challenge once if the registry asks for it
    fn call(&mut self, req: ureq::Request, body: Option<&[u8]>) -> Result<ureq::Response> {
        self.cancel.check()?;
        let challenge = match self.send(req.clone(), body) {
            Ok(res) => return Ok(res),
            Err(ureq::Error::Status(401, res)) => {
                let header = res
                    .header("www-authenticate")
                    .ok_or(Error::MissingHeader("WWW-Authenticate"))?;
                AuthChallenge::from_header(header)?
            }
            Err(e) => return Err(e.into()),
        };
        log::debug!("Bearer challenge from {}", challenge.url);
        let token = challenge.fetch_token(&self.agent, self.credential.as_ref(), &self.cancel)?;
        self.token = Some(token);

        self.cancel.check()?;
        Ok(self.send(req, body)?)
    }

    fn get(&self, url: &Url) -> ureq::Request {
        log::debug!("GET {}", url);
        self.agent.get(url.as_str())
    }

    fn head(&self, url: &Url) -> ureq::Request {
        log::debug!("HEAD {}", url);
        self.agent.head(url.as_str())
    }

    fn put(&self, url: &Url) -> ureq::Request {
        log::debug!("PUT {}", url);
        self.agent.put(url.as_str())
    }

    fn post(&self, url: &Url) -> ureq::Request {
        log::debug!("POST {}", url);
        self.agent.post(url.as_str())
    }

    fn location(&self, res: &ureq::Response) -> Result<Url> {
        let loc = res
            .header("Location")
            .ok_or(Error::MissingHeader("Location"))?;
        Ok(Url::parse(loc).or_else(|_| self.url.join(loc))?)
    }

    /// Get tags of `<name>` repository.
    ///
    /// ```text
    /// GET /v2/<name>/tags/list
    /// ```
    ///
    /// See [corresponding OCI distribution spec document](https://github.com/opencontainers/distribution-spec/blob/main/spec.md#content-discovery) for detail.
    pub fn get_tags(&mut self) -> Result<Vec<String>> {
        let url = self.url.join(&format!("/v2/{}/tags/list", self.name))?;
        let req = self.get(&url);
        let res = self.call(req, None)?;
        let tag_list = res.into_json::<TagList>()?;
        Ok(tag_list.tags)
    }

    /// Get descriptor of a manifest without its content
    ///
    /// ```text
    /// HEAD /v2/<name>/manifests/<reference>
    /// ```
    ///
    /// Falls back to [Client::get_manifest] when the registry does not
    /// return `Docker-Content-Digest` header.
    pub fn head_manifest(&mut self, reference: &Reference) -> Result<Descriptor> {
        let url = self
            .url
            .join(&format!("/v2/{}/manifests/{}", self.name, reference))?;
        let req = self
            .head(&url)
            .set("Accept", &media_types::manifest_accept());
        let res = self.call(req, None)?;
        let digest = match res.header("Docker-Content-Digest") {
            Some(digest) => Digest::new(digest)?,
            None => return Ok(self.get_manifest(reference)?.0),
        };
        let size: i64 = res
            .header("Content-Length")
            .and_then(|len| len.parse().ok())
            .unwrap_or_default();
        let media_type = res.content_type().to_string();
        if let Some(expected) = reference.digest() {
            if &digest != expected {
                return Err(Error::DigestMismatch {
                    expected: expected.clone(),
                    actual: digest,
                });
            }
        }
        Ok(DescriptorBuilder::default()
            .media_type(MediaType::from(media_type.as_str()))
            .digest(digest.to_string())
            .size(size)
            .build()?)
    }

    /// Get manifest for given repository, with its descriptor
    ///
    /// ```text
    /// GET /v2/<name>/manifests/<reference>
    /// ```
    ///
    /// The digest of the descriptor is computed from the content and checked
    /// against the reference when it is a digest. The media type is taken
    /// from the manifest or from `Content-Type` when the manifest omits it.
    ///
    /// See [corresponding OCI distribution spec document](https://github.com/opencontainers/distribution-spec/blob/main/spec.md#pulling-manifests) for detail.
    pub fn get_manifest(&mut self, reference: &Reference) -> Result<(Descriptor, Vec<u8>)> {
        let url = self
            .url
            .join(&format!("/v2/{}/manifests/{}", self.name, reference))?;
        let req = self
            .get(&url)
            .set("Accept", &media_types::manifest_accept());
        let res = self.call(req, None)?;
        let content_type = res.content_type().to_string();
        let bytes = self.cancel.read_to_end(res.into_reader())?;
        manifest_descriptor(reference, &content_type, bytes)
    }

    /// Get blob for given digest
    ///
    /// ```text
    /// GET /v2/<name>/blobs/<digest>
    /// ```
    ///
    /// See [corresponding OCI distribution spec document](https://github.com/opencontainers/distribution-spec/blob/main/spec.md#pulling-blobs) for detail.
    pub fn get_blob(&mut self, digest: &Digest) -> Result<Vec<u8>> {
        let url = self
            .url
            .join(&format!("/v2/{}/blobs/{}", self.name, digest))?;
        let req = self.get(&url);
        let res = self.call(req, None)?;
        let bytes = self.cancel.read_to_end(res.into_reader())?;
        digest.verify(&bytes)?;
        Ok(bytes)
    }

    /// Check existence of blob
    ///
    /// ```text
    /// HEAD /v2/<name>/blobs/<digest>
    /// ```
    pub fn has_blob(&mut self, digest: &Digest) -> Result<bool> {
        let url = self
            .url
            .join(&format!("/v2/{}/blobs/{}", self.name, digest))?;
        let req = self.head(&url);
        match self.call(req, None) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Push blob to registry
    ///
    /// ```text
    /// POST /v2/<name>/blobs/uploads/
    /// ```
    ///
    /// and following `PUT` to URL obtained by `POST`.
    ///
    /// See [corresponding OCI distribution spec document](https://github.com/opencontainers/distribution-spec/blob/main/spec.md#pushing-blobs) for detail.
    pub fn push_blob(&mut self, digest: &Digest, blob: &[u8]) -> Result<Url> {
        let url = self
            .url
            .join(&format!("/v2/{}/blobs/uploads/", self.name))?;
        let req = self.post(&url);
        let res = self.call(req, Some(&[]))?;
        let upload = self.location(&res)?;

        let req = self
            .put(&upload)
            .query("digest", &digest.to_string())
            .set("Content-Type", "application/octet-stream");
        let res = self.call(req, Some(blob))?;
        self.location(&res)
    }

    /// Push manifest to registry
    ///
    /// ```text
    /// PUT /v2/<name>/manifests/<reference>
    /// ```
    ///
    /// Manifest must be pushed after blobs are updated.
    ///
    /// See [corresponding OCI distribution spec document](https://github.com/opencontainers/distribution-spec/blob/main/spec.md#pushing-manifests) for detail.
    pub fn push_manifest(
        &mut self,
        reference: &Reference,
        media_type: &str,
        manifest: &[u8],
    ) -> Result<Url> {
        let url = self
            .url
            .join(&format!("/v2/{}/manifests/{}", self.name, reference))?;
        let req = self.put(&url).set("Content-Type", media_type);
        let res = self.call(req, Some(manifest))?;
        self.location(&res).or_else(|_| Ok(url))
    }
}

/// Descriptor of manifest content fetched by `reference`
fn manifest_descriptor(
    reference: &Reference,
    content_type: &str,
    bytes: Vec<u8>,
) -> Result<(Descriptor, Vec<u8>)> {
    let digest = match reference.digest() {
        Some(digest) => {
            digest.verify(&bytes)?;
            digest.clone()
        }
        None => Digest::from_buf_sha256(&bytes),
    };
    let manifest = crate::image::Manifest::from_slice(&bytes)?;
    let media_type = manifest.media_type_or(content_type).to_string();
    let descriptor = DescriptorBuilder::default()
        .media_type(MediaType::from(media_type.as_str()))
        .digest(digest.to_string())
        .size(bytes.len() as i64)
        .build()?;
    Ok((descriptor, bytes))
}

impl Repository for Client {
    fn resolve(&mut self, reference: &Reference) -> Result<Descriptor> {
        self.head_manifest(reference)
    }

    fn fetch_manifest(&mut self, reference: &Reference) -> Result<(Descriptor, Vec<u8>)> {
        self.get_manifest(reference)
    }

    fn fetch_blob(&mut self, digest: &Digest) -> Result<Vec<u8>> {
        self.get_blob(digest)
    }

    fn exists(&mut self, digest: &Digest) -> Result<bool> {
        self.has_blob(digest)
    }

    fn upload_blob(&mut self, digest: &Digest, data: &[u8]) -> Result<()> {
        self.push_blob(digest, data).map(|_| ())
    }

    fn upload_manifest(&mut self, reference: &Reference, media_type: &str, data: &[u8]) -> Result<()> {
        self.push_manifest(reference, media_type, data).map(|_| ())
    }
}
