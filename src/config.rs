use crate::{distribution::Reference, error::*};
use std::{env, path::PathBuf, time::Duration};
use url::Url;

/// Environment variable overriding the ECR API endpoint
pub const ECR_ENDPOINT_ENV: &str = "ECR_ENDPOINT";

/// What to do when the builder indexed no layer of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyIndexPolicy {
    /// Stop without pushing and report a skip
    Skip,
    /// Fail the run
    Fail,
}

impl Default for EmptyIndexPolicy {
    fn default() -> Self {
        EmptyIndexPolicy::Skip
    }
}

/// Settings of one indexing run
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Registry credentials, `USER:PASSWORD`, sent as Basic authorization
    pub auth_token: Option<String>,
    /// Tag given to the pushed index. Pushed by digest only if `None`.
    ///
    /// Every platform of a multi-platform image is pushed to this same tag
    /// in turn, so only the index of the last platform keeps it.
    pub index_tag: Option<Reference>,
    pub empty_index: EmptyIndexPolicy,
    /// Directory under which the per-run workspace is created
    pub workspace_root: PathBuf,
    /// Limit for the whole run
    pub timeout: Option<Duration>,
    /// ECR API endpoint, regional endpoint if `None`
    pub ecr_endpoint: Option<Url>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            auth_token: None,
            index_tag: None,
            empty_index: EmptyIndexPolicy::default(),
            workspace_root: env::temp_dir(),
            timeout: None,
            ecr_endpoint: None,
        }
    }
}

impl IndexerConfig {
    /// Default settings with the endpoint override read from [ECR_ENDPOINT_ENV]
    pub fn from_env() -> Result<Self> {
        let ecr_endpoint = match env::var(ECR_ENDPOINT_ENV) {
            Ok(endpoint) if !endpoint.is_empty() => {
                log::debug!("Using ECR endpoint {}", endpoint);
                Some(Url::parse(&endpoint)?)
            }
            _ => None,
        };
        Ok(IndexerConfig {
            ecr_endpoint,
            ..Default::default()
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Tag for the pushed index. Digest-like input is rejected.
    pub fn with_index_tag(mut self, tag: &str) -> Result<Self> {
        self.index_tag = Some(Reference::tag(tag)?);
        Ok(self)
    }

    pub fn with_empty_index(mut self, policy: EmptyIndexPolicy) -> Self {
        self.empty_index = policy;
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
