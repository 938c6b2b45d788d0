//! Pull and Push content to OCI registry based on [OCI distribution specification](https://github.com/opencontainers/distribution-spec)

mod auth;
mod client;
pub mod ecr;
mod name;
mod reference;

pub use auth::*;
pub use client::{Client, USER_AGENT};
pub use name::Name;
pub use reference::Reference;

use crate::{
    cancel::Cancel,
    error::*,
    image_name::{registry_url, DEFAULT_REGISTRY},
    Digest,
};
use oci_spec::{distribution::ErrorCode, image::Descriptor};
use url::Url;

/// Message ECR returns when it refuses an OCI image manifest whose config is not an image config
pub const IMAGE_MANIFEST_REJECTION: &str = "Invalid parameter at 'ImageManifest'";

/// Operations on one repository used by the indexing pipeline
pub trait Repository {
    /// Descriptor of the manifest `reference` points to
    fn resolve(&mut self, reference: &Reference) -> Result<Descriptor>;
    fn fetch_manifest(&mut self, reference: &Reference) -> Result<(Descriptor, Vec<u8>)>;
    fn fetch_blob(&mut self, digest: &Digest) -> Result<Vec<u8>>;
    fn exists(&mut self, digest: &Digest) -> Result<bool>;
    fn upload_blob(&mut self, digest: &Digest, data: &[u8]) -> Result<()>;
    fn upload_manifest(&mut self, reference: &Reference, media_type: &str, data: &[u8]) -> Result<()>;
}

/// Authenticated connection to one registry host
pub trait Registry {
    type Repository: Repository;

    fn host(&self) -> &str;
    fn repository(&self, name: &Name) -> Result<Self::Repository>;
}

/// Transport for one registry host with credentials resolved at setup
pub struct RegistryHandle {
    agent: ureq::Agent,
    host: String,
    url: Url,
    credential: Option<Credential>,
    cancel: Cancel,
}

impl std::fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("host", &self.host)
            .field("url", &self.url.as_str())
            .field("credential", &self.credential)
            .finish()
    }
}

impl RegistryHandle {
    /// Setup the transport for `host`
    ///
    /// - A non-empty `auth_token` is sent as `Basic` credentials on every request.
    /// - Otherwise an ECR host is authorized through `GetAuthorizationToken`
    ///   with ambient AWS credentials, optionally at `ecr_endpoint`.
    /// - Otherwise requests are anonymous, apart from bearer challenges.
    pub fn init(
        host: &str,
        auth_token: Option<&str>,
        ecr_endpoint: Option<&Url>,
        cancel: &Cancel,
    ) -> Result<Self> {
        let agent = ureq::AgentBuilder::new().user_agent(USER_AGENT).build();
        let url = registry_url(host)?;
        let credential = match auth_token.filter(|token| !token.is_empty()) {
            Some(token) => {
                log::debug!("Using explicit credentials for {}", host);
                Some(Credential::from_token(token))
            }
            None if ecr::is_ecr_registry(host) => {
                let authorizer = ecr::EcrAuthorizer::from_env(host, ecr_endpoint, &agent, cancel)?;
                Some(authorizer.get_authorization_token(&agent, cancel)?)
            }
            None => None,
        };
        Ok(RegistryHandle {
            agent,
            host: host.to_string(),
            url,
            credential,
            cancel: cancel.clone(),
        })
    }

    pub fn client(&self, name: &Name) -> Client {
        Client::new(
            self.agent.clone(),
            self.url.clone(),
            name.clone(),
            self.credential.clone(),
            self.cancel.clone(),
        )
    }
}

impl Registry for RegistryHandle {
    type Repository = Client;

    fn host(&self) -> &str {
        &self.host
    }

    fn repository(&self, name: &Name) -> Result<Client> {
        // Official images live under `library/` on Docker Hub
        if self.host == DEFAULT_REGISTRY && !name.as_str().contains('/') {
            let name = Name::new(&format!("library/{}", name.as_str()))?;
            return Ok(self.client(&name));
        }
        Ok(self.client(name))
    }
}

/// Registry refused a manifest because it does not accept OCI artifacts
///
/// ECR answers `405` with an `UNSUPPORTED` error naming `ImageManifest`.
/// When the body is not a structured error response, the raw body is
/// searched for the same message.
pub fn is_oci_artifact_rejection(err: &Error) -> bool {
    match err.root() {
        Error::RegistryError { status, response } => {
            *status == 405
                && response.errors().iter().any(|info| {
                    matches!(info.code(), ErrorCode::Unsupported)
                        && info
                            .message()
                            .as_deref()
                            .map_or(false, |msg| msg.contains(IMAGE_MANIFEST_REJECTION))
                })
        }
        Error::UnexpectedResponse { status, body } => {
            *status == 405 && body.contains(IMAGE_MANIFEST_REJECTION)
        }
        _ => false,
    }
}
