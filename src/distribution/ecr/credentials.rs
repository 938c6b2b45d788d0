//! AWS credentials used to sign `GetAuthorizationToken`
//!
//! Resolved from the first configured source, in the order of the default
//! credential chain of AWS SDKs:
//!
//! 1. `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`
//! 2. Profile `AWS_PROFILE` (`default` if unset) of the shared credentials file
//! 3. Web identity token in `AWS_WEB_IDENTITY_TOKEN_FILE`, exchanged for the role
//!    `AWS_ROLE_ARN` by STS `AssumeRoleWithWebIdentity`
//! 4. Container credentials endpoint, `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` or
//!    `AWS_CONTAINER_CREDENTIALS_FULL_URI`
//! 5. EC2 instance metadata service (IMDSv2), unless `AWS_EC2_METADATA_DISABLED=true`
//!
//! A missing or incomplete shared credentials file falls through to the next
//! source. Failures of the network sources are reported as they are.

use crate::{cancel::Cancel, error::*};
use chrono::Utc;
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

const CONTAINER_HOST: &str = "http://169.254.170.2";
const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const IMDS_TOKEN_TTL: &str = "21600";
/// Instance metadata answers at once on EC2, and not at all elsewhere
const IMDS_TIMEOUT: Duration = Duration::from_secs(1);
const STS_VERSION: &str = "2011-06-15";

/// AWS credentials resolved from the execution environment
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl AwsCredentials {
    /// Resolve credentials through [CredentialSources] read from the environment
    pub fn load(agent: &ureq::Agent, region: &str, cancel: &Cancel) -> Result<Self> {
        CredentialSources::from_env()?.resolve(agent, region, cancel)
    }

    /// Parse `[profile]` section of the shared credentials file
    pub fn from_ini(content: &str, profile: &str) -> Result<Self> {
        let mut section = None;
        let mut values = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = Some(name.trim().to_string());
                continue;
            }
            if section.as_deref() != Some(profile) {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        let mut take = |key: &str| values.remove(key).filter(|v| !v.is_empty());
        match (take("aws_access_key_id"), take("aws_secret_access_key")) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(AwsCredentials {
                access_key_id,
                secret_access_key,
                session_token: take("aws_session_token"),
            }),
            _ => Err(Error::AuthorizationFailed(format!(
                "No AWS credentials for profile {}",
                profile
            ))),
        }
    }
}

/// Role assumed with a web identity token, e.g. an EKS service account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebIdentity {
    pub token_file: PathBuf,
    pub role_arn: String,
    pub session_name: String,
}

/// Credentials endpoint of ECS, EKS Pod Identity or CodeBuild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEndpoint {
    pub url: Url,
    /// Sent as `Authorization`
    pub authorization_token: Option<String>,
    /// File holding the `Authorization` value, read at every request
    pub authorization_token_file: Option<PathBuf>,
}

/// Where credentials may come from, in the order they are tried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSources {
    pub static_keys: Option<AwsCredentials>,
    pub shared_file: Option<PathBuf>,
    pub profile: String,
    pub web_identity: Option<WebIdentity>,
    /// STS endpoint, regional endpoint if `None`
    pub sts_endpoint: Option<Url>,
    pub container: Option<ContainerEndpoint>,
    /// Instance metadata endpoint, `None` if disabled
    pub imds: Option<Url>,
}

impl CredentialSources {
    pub fn from_env() -> Result<Self> {
        let home = directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
        Self::from_lookup(|key| env::var(key).ok(), home.as_deref())
    }

    /// Read the sources from variables given by `lookup`, with `home` for the shared credentials file
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, home: Option<&Path>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let static_keys = match (var("AWS_ACCESS_KEY_ID"), var("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) => Some(AwsCredentials {
                access_key_id,
                secret_access_key,
                session_token: var("AWS_SESSION_TOKEN"),
            }),
            _ => None,
        };
        let shared_file = var("AWS_SHARED_CREDENTIALS_FILE")
            .map(PathBuf::from)
            .or_else(|| home.map(|home| home.join(".aws/credentials")));
        let profile = var("AWS_PROFILE").unwrap_or_else(|| "default".to_string());

        let web_identity = match (var("AWS_WEB_IDENTITY_TOKEN_FILE"), var("AWS_ROLE_ARN")) {
            (Some(token_file), Some(role_arn)) => Some(WebIdentity {
                token_file: PathBuf::from(token_file),
                role_arn,
                session_name: var("AWS_ROLE_SESSION_NAME").unwrap_or_else(|| {
                    format!("soci-indexer-{}", Utc::now().timestamp_millis())
                }),
            }),
            _ => None,
        };
        let sts_endpoint = var("AWS_ENDPOINT_URL_STS")
            .map(|url| Url::parse(&url))
            .transpose()?;

        let container_url = match (
            var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI"),
            var("AWS_CONTAINER_CREDENTIALS_FULL_URI"),
        ) {
            (Some(relative), _) => Some(Url::parse(&format!("{}{}", CONTAINER_HOST, relative))?),
            (None, Some(full)) => Some(Url::parse(&full)?),
            (None, None) => None,
        };
        let container = container_url.map(|url| ContainerEndpoint {
            url,
            authorization_token: var("AWS_CONTAINER_AUTHORIZATION_TOKEN"),
            authorization_token_file: var("AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE")
                .map(PathBuf::from),
        });

        let imds_disabled = var("AWS_EC2_METADATA_DISABLED")
            .map_or(false, |value| value.eq_ignore_ascii_case("true"));
        let imds = if imds_disabled {
            None
        } else {
            let endpoint = var("AWS_EC2_METADATA_SERVICE_ENDPOINT")
                .unwrap_or_else(|| IMDS_ENDPOINT.to_string());
            Some(Url::parse(&endpoint)?)
        };

        Ok(CredentialSources {
            static_keys,
            shared_file,
            profile,
            web_identity,
            sts_endpoint,
            container,
            imds,
        })
    }

    pub fn resolve(&self, agent: &ureq::Agent, region: &str, cancel: &Cancel) -> Result<AwsCredentials> {
        if let Some(credentials) = &self.static_keys {
            log::debug!("Using AWS credentials from environment variables");
            return Ok(credentials.clone());
        }
        if let Some(path) = &self.shared_file {
            match fs::read_to_string(path) {
                Ok(content) => match AwsCredentials::from_ini(&content, &self.profile) {
                    Ok(credentials) => {
                        log::debug!("Using AWS credentials from {}", path.display());
                        return Ok(credentials);
                    }
                    Err(e) => log::debug!("{}: {}", path.display(), e),
                },
                Err(e) => log::debug!("Cannot read {}: {}", path.display(), e),
            }
        }
        if let Some(web_identity) = &self.web_identity {
            let endpoint = match &self.sts_endpoint {
                Some(endpoint) => endpoint.clone(),
                None => sts_endpoint(region)?,
            };
            log::debug!("Assuming {} with web identity", web_identity.role_arn);
            return web_identity.assume_role(agent, &endpoint, cancel);
        }
        if let Some(container) = &self.container {
            log::debug!("Using AWS credentials from {}", container.url);
            return container.fetch(agent, cancel);
        }
        match &self.imds {
            Some(endpoint) => {
                log::debug!("Using AWS credentials from instance metadata at {}", endpoint);
                from_instance_metadata(agent, endpoint, cancel).map_err(|e| {
                    if e.is_cancelled() {
                        return e;
                    }
                    Error::AuthorizationFailed(format!(
                        "No AWS credentials found; instance metadata unavailable: {}",
                        e
                    ))
                })
            }
            None => Err(Error::AuthorizationFailed(
                "No AWS credentials found".to_string(),
            )),
        }
    }
}

/// Regional STS endpoint
pub fn sts_endpoint(region: &str) -> Result<Url> {
    let domain = if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    };
    Ok(Url::parse(&format!("https://sts.{}.{}/", region, domain))?)
}

impl WebIdentity {
    fn assume_role(&self, agent: &ureq::Agent, endpoint: &Url, cancel: &Cancel) -> Result<AwsCredentials> {
        let token = fs::read_to_string(&self.token_file).map_err(|e| {
            Error::AuthorizationFailed(format!(
                "Cannot read web identity token {}: {}",
                self.token_file.display(),
                e
            ))
        })?;
        let req = agent
            .get(endpoint.as_str())
            .query("Action", "AssumeRoleWithWebIdentity")
            .query("Version", STS_VERSION)
            .query("RoleArn", &self.role_arn)
            .query("RoleSessionName", &self.session_name)
            .query("WebIdentityToken", token.trim());
        let body = call(req, "STS AssumeRoleWithWebIdentity", None, cancel)?.into_string()?;

        let value = |tag: &str| {
            xml_value(&body, tag).ok_or_else(|| {
                Error::AuthorizationFailed(format!(
                    "STS AssumeRoleWithWebIdentity response without {}",
                    tag
                ))
            })
        };
        Ok(AwsCredentials {
            access_key_id: value("AccessKeyId")?,
            secret_access_key: value("SecretAccessKey")?,
            session_token: xml_value(&body, "SessionToken"),
        })
    }
}

/// Text of the first `<tag>` element
fn xml_value(body: &str, tag: &str) -> Option<String> {
    let (_, rest) = body.split_once(&format!("<{}>", tag))?;
    let (value, _) = rest.split_once(&format!("</{}>", tag))?;
    Some(value.trim().to_string()).filter(|value| !value.is_empty())
}

impl ContainerEndpoint {
    fn fetch(&self, agent: &ureq::Agent, cancel: &Cancel) -> Result<AwsCredentials> {
        let authorization = match (&self.authorization_token_file, &self.authorization_token) {
            (Some(path), _) => Some(
                fs::read_to_string(path)
                    .map_err(|e| {
                        Error::AuthorizationFailed(format!(
                            "Cannot read container authorization token {}: {}",
                            path.display(),
                            e
                        ))
                    })?
                    .trim()
                    .to_string(),
            ),
            (None, token) => token.clone(),
        };
        let mut req = agent.get(self.url.as_str());
        if let Some(authorization) = &authorization {
            req = req.set("Authorization", authorization);
        }
        let res: ProviderCredentials =
            call(req, "container credentials endpoint", None, cancel)?.into_json()?;
        res.into_credentials()
    }
}

fn from_instance_metadata(agent: &ureq::Agent, endpoint: &Url, cancel: &Cancel) -> Result<AwsCredentials> {
    let token_url = endpoint.join("latest/api/token")?;
    let req = agent
        .put(token_url.as_str())
        .set("X-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL);
    let token = call(req, "instance metadata token", Some(IMDS_TIMEOUT), cancel)?.into_string()?;

    let roles_url = endpoint.join("latest/meta-data/iam/security-credentials/")?;
    let req = agent
        .get(roles_url.as_str())
        .set("X-aws-ec2-metadata-token", token.trim());
    let roles = call(req, "instance metadata role", Some(IMDS_TIMEOUT), cancel)?.into_string()?;
    let role = roles
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| {
            Error::AuthorizationFailed("No IAM role attached to the instance".to_string())
        })?;

    let req = agent
        .get(roles_url.join(role)?.as_str())
        .set("X-aws-ec2-metadata-token", token.trim());
    let res: ProviderCredentials =
        call(req, "instance metadata credentials", Some(IMDS_TIMEOUT), cancel)?.into_json()?;
    res.into_credentials()
}

/// Response of the container endpoint and of instance metadata
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProviderCredentials {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

impl ProviderCredentials {
    fn into_credentials(self) -> Result<AwsCredentials> {
        if let Some(code) = self.code.filter(|code| code != "Success") {
            return Err(Error::AuthorizationFailed(format!(
                "{}: {}",
                code,
                self.message.unwrap_or_default()
            )));
        }
        match (self.access_key_id, self.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(AwsCredentials {
                access_key_id,
                secret_access_key,
                session_token: self.token.filter(|token| !token.is_empty()),
            }),
            _ => Err(Error::AuthorizationFailed(
                "Credentials response without access keys".to_string(),
            )),
        }
    }
}

/// Send a credentials request, bounded by `timeout` and by the deadline of `cancel`
fn call(
    req: ureq::Request,
    what: &str,
    timeout: Option<Duration>,
    cancel: &Cancel,
) -> Result<ureq::Response> {
    cancel.check()?;
    let timeout = match (cancel.remaining(), timeout) {
        (Some(remaining), Some(timeout)) => Some(remaining.min(timeout)),
        (remaining, timeout) => remaining.or(timeout),
    };
    let req = match timeout {
        Some(timeout) => req.timeout(timeout),
        None => req,
    };
    match req.call() {
        Ok(res) => Ok(res),
        Err(ureq::Error::Status(status, res)) => {
            let body = res.into_string().unwrap_or_default();
            Err(Error::AuthorizationFailed(format!(
                "{} responded with status {}: {}",
                what, status, body
            )))
        }
        Err(e) => Err(e.into()),
    }
}
