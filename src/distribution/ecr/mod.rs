//! Token exchange for [Amazon ECR](https://docs.aws.amazon.com/AmazonECR/latest/APIReference/API_GetAuthorizationToken.html)
//!
//! Private ECR registries do not accept anonymous access. When no explicit
//! token is given, the registry client calls `GetAuthorizationToken` with
//! the AWS credentials found in the execution environment, signed with
//! [Signature Version 4](https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_aws-signing.html),
//! and uses the returned token as Basic credentials.

use crate::{cancel::Cancel, distribution::Credential, error::*};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use std::env;
use url::Url;

mod credentials;
pub use credentials::*;

const SERVICE: &str = "ecr";
const TARGET: &str = "AmazonEC2ContainerRegistry_V20150921.GetAuthorizationToken";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

lazy_static::lazy_static! {
    static ref ECR_HOST_RE: Regex = Regex::new(r"\d{12}\.dkr\.ecr\.(\S+)\.amazonaws\.com").unwrap();
}

/// Check if a registry host is a private ECR registry,
/// e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com`
pub fn is_ecr_registry(host: &str) -> bool {
    ECR_HOST_RE.is_match(host)
}

/// Region part of an ECR registry host
pub fn region_of(host: &str) -> Option<&str> {
    ECR_HOST_RE
        .captures(host)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
}

/// Default API endpoint of ECR in `region`
pub fn default_endpoint(region: &str) -> Result<Url> {
    let domain = if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    };
    Ok(Url::parse(&format!("https://api.ecr.{}.{}/", region, domain))?)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// Client of ECR `GetAuthorizationToken` API
#[derive(Debug, Clone)]
pub struct EcrAuthorizer {
    endpoint: Url,
    region: String,
    credentials: AwsCredentials,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetAuthorizationTokenResponse {
    #[serde(default)]
    authorization_data: Vec<AuthorizationData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizationData {
    #[serde(default)]
    authorization_token: Option<String>,
}

impl EcrAuthorizer {
    pub fn new(endpoint: Url, region: String, credentials: AwsCredentials) -> Self {
        EcrAuthorizer {
            endpoint,
            region,
            credentials,
        }
    }

    /// Setup for the registry `host` using ambient AWS configuration
    ///
    /// The region is taken from `AWS_REGION` or `AWS_DEFAULT_REGION`, or from
    /// the registry host. `endpoint` overrides the regional API endpoint.
    pub fn from_env(
        host: &str,
        endpoint: Option<&Url>,
        agent: &ureq::Agent,
        cancel: &Cancel,
    ) -> Result<Self> {
        let region = non_empty_var("AWS_REGION")
            .or_else(|| non_empty_var("AWS_DEFAULT_REGION"))
            .or_else(|| region_of(host).map(str::to_string))
            .ok_or_else(|| Error::AuthorizationFailed(format!("No AWS region for {}", host)))?;
        let endpoint = match endpoint {
            Some(endpoint) => endpoint.clone(),
            None => default_endpoint(&region)?,
        };
        let credentials = AwsCredentials::load(agent, &region, cancel)?;
        Ok(Self::new(endpoint, region, credentials))
    }

    pub fn get_authorization_token(&self, agent: &ureq::Agent, cancel: &Cancel) -> Result<Credential> {
        cancel.check()?;
        log::info!("Authorizing with ECR at {}", self.endpoint);
        let payload = b"{}";
        let headers = self.signed_headers(Utc::now(), payload)?;
        let mut req = agent.post(self.endpoint.as_str());
        for (key, value) in &headers {
            req = req.set(key, value);
        }
        if let Some(timeout) = cancel.remaining() {
            req = req.timeout(timeout);
        }
        let res = match req.send_bytes(payload) {
            Ok(res) => res,
            Err(ureq::Error::Status(status, res)) => {
                let body = res.into_string().unwrap_or_default();
                return Err(Error::AuthorizationFailed(format!(
                    "Couldn't authorize with ECR: status {}: {}",
                    status, body
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let res: GetAuthorizationTokenResponse = res.into_json()?;
        let data = res.authorization_data.into_iter().next().ok_or_else(|| {
            Error::AuthorizationFailed(
                "Couldn't authorize with ECR: empty authorization data returned".to_string(),
            )
        })?;
        let token = data
            .authorization_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                Error::AuthorizationFailed(
                    "Couldn't authorize with ECR: empty authorization token returned".to_string(),
                )
            })?;
        Ok(Credential::from_encoded(token))
    }

    /// Headers of the `GetAuthorizationToken` request including SigV4 `Authorization`
    fn signed_headers(&self, now: DateTime<Utc>, payload: &[u8]) -> Result<Vec<(String, String)>> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let host = match (self.endpoint.host_str(), self.endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::AuthorizationFailed(format!(
                    "Invalid ECR endpoint: {}",
                    self.endpoint
                )))
            }
        };

        // Sorted by lowercase name, as canonical request requires
        let mut headers = vec![
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("host".to_string(), host),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.push(("x-amz-target".to_string(), TARGET.to_string()));

        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let canonical_request = format!(
            "POST\n{}\n\n{}\n{}\n{}",
            canonical_path(&self.endpoint),
            canonical_headers,
            signed_headers,
            hex_sha256(payload)
        );

        let scope = format!("{}/{}/{}/aws4_request", date_stamp, self.region, SERVICE);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let key = signing_key(
            &self.credentials.secret_access_key,
            &date_stamp,
            &self.region,
            SERVICE,
        )?;
        let signature = base16ct::lower::encode_string(&hmac_sha256(&key, string_to_sign.as_bytes())?);

        // `host` is set by the HTTP client itself
        headers.retain(|(k, _)| k != "host");
        headers.push((
            "authorization".to_string(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
                self.credentials.access_key_id, scope, signed_headers, signature
            ),
        ));
        Ok(headers)
    }
}

fn canonical_path(url: &Url) -> &str {
    match url.path() {
        "" => "/",
        path => path,
    }
}

fn hex_sha256(buf: &[u8]) -> String {
    base16ct::lower::encode_string(&Sha256::digest(buf))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| Error::AuthorizationFailed(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    #[test]
    fn ecr_registry() {
        assert!(is_ecr_registry(
            "123456789012.dkr.ecr.us-east-1.amazonaws.com"
        ));
        assert!(is_ecr_registry(
            "123456789012.dkr.ecr.cn-north-1.amazonaws.com.cn"
        ));
        assert!(!is_ecr_registry("public.ecr.aws"));
        assert!(!is_ecr_registry("docker.io"));
        assert!(!is_ecr_registry("12345.dkr.ecr.us-east-1.amazonaws.com"));

        assert_eq!(
            region_of("123456789012.dkr.ecr.eu-west-2.amazonaws.com"),
            Some("eu-west-2")
        );
        assert_eq!(region_of("ghcr.io"), None);
    }

    #[test]
    fn endpoint() -> Result<()> {
        assert_eq!(
            default_endpoint("us-east-1")?.as_str(),
            "https://api.ecr.us-east-1.amazonaws.com/"
        );
        assert_eq!(
            default_endpoint("cn-north-1")?.as_str(),
            "https://api.ecr.cn-north-1.amazonaws.com.cn/"
        );
        Ok(())
    }

    // Example of "Deriving a signing key" in AWS SigV4 documents
    #[test]
    fn derive_signing_key() -> Result<()> {
        let key = signing_key(SECRET, "20120215", "us-east-1", "iam")?;
        assert_eq!(
            base16ct::lower::encode_string(&key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
        Ok(())
    }

    #[test]
    fn signed_headers() -> Result<()> {
        let authorizer = EcrAuthorizer::new(
            default_endpoint("us-east-1")?,
            "us-east-1".to_string(),
            AwsCredentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: SECRET.to_string(),
                session_token: Some("session".to_string()),
            },
        );
        let now = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        let mut headers: HashMap<_, _> =
            authorizer.signed_headers(now, b"{}")?.into_iter().collect();
        let auth = headers.remove("authorization").unwrap();
        assert_eq!(
            headers,
            maplit::hashmap! {
                "content-type".to_string() => CONTENT_TYPE.to_string(),
                "x-amz-date".to_string() => "20230102T030405Z".to_string(),
                "x-amz-security-token".to_string() => "session".to_string(),
                "x-amz-target".to_string() => TARGET.to_string(),
            }
        );
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20230102/us-east-1/ecr/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-amz-target, \
             Signature="
        ));

        // Deterministic for the same input
        let again: HashMap<_, _> = authorizer.signed_headers(now, b"{}")?.into_iter().collect();
        assert_eq!(auth, again["authorization"]);
        Ok(())
    }

    #[test]
    fn token_response() -> Result<()> {
        let res: GetAuthorizationTokenResponse = serde_json::from_str(
            r#"{"authorizationData":[{"authorizationToken":"QVdTOnNlY3JldA==","expiresAt":1.6E9,"proxyEndpoint":"https://123456789012.dkr.ecr.us-east-1.amazonaws.com"}]}"#,
        )?;
        assert_eq!(
            res.authorization_data[0].authorization_token.as_deref(),
            Some("QVdTOnNlY3JldA==")
        );
        let empty: GetAuthorizationTokenResponse = serde_json::from_str("{}")?;
        assert!(empty.authorization_data.is_empty());
        Ok(())
    }
}
