use crate::{cancel::Cancel, error::*};
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use url::Url;

/// Basic credentials sent to the registry
///
/// Holds the base64 encoded `USER:PASSWORD` octet used in
/// `Authorization: Basic <octet>` header.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    octet: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl Credential {
    /// From a plain `USER:PASSWORD` token
    pub fn from_token(token: &str) -> Self {
        Credential {
            octet: base64::encode(token),
        }
    }

    /// From an octet already in base64, e.g. the token issued by ECR
    pub fn from_encoded(octet: String) -> Self {
        Credential { octet }
    }

    pub fn header(&self) -> String {
        format!("Basic {}", self.octet)
    }
}

/// WWW-Authentication challenge
///
/// ```
/// use soci_indexer::distribution::AuthChallenge;
///
/// let auth = AuthChallenge::from_header(
///   r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:foo/bar:pull,push""#,
/// ).unwrap();
///
/// assert_eq!(auth, AuthChallenge {
///   url: "https://auth.docker.io/token".to_string(),
///   service: "registry.docker.io".to_string(),
///   scope: Some("repository:foo/bar:pull,push".to_string()),
/// });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub url: String,
    pub service: String,
    pub scope: Option<String>,
}

lazy_static::lazy_static! {
    // Values are quoted and may contain commas, e.g. `scope="repository:a:pull,push"`
    static ref PARAM_RE: Regex = Regex::new(r#"([A-Za-z_]+)="([^"]*)""#).unwrap();
}

impl AuthChallenge {
    pub fn from_header(header: &str) -> Result<Self> {
        let err = || Error::UnSupportedAuthHeader(header.to_string());
        let (ty, params) = header.trim().split_once(' ').ok_or_else(err)?;
        if !ty.eq_ignore_ascii_case("Bearer") {
            return Err(err());
        }

        let mut url = None;
        let mut service = None;
        let mut scope = None;
        for cap in PARAM_RE.captures_iter(params) {
            let value = cap[2].to_string();
            match &cap[1] {
                "realm" => url = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => continue,
            }
        }
        Ok(Self {
            url: url.ok_or_else(err)?,
            service: service.unwrap_or_default(),
            scope,
        })
    }

    /// Get bearer token from the realm of this challenge
    ///
    /// Credentials are sent if given, anonymous token is requested otherwise.
    pub fn fetch_token(
        &self,
        agent: &ureq::Agent,
        credential: Option<&Credential>,
        cancel: &Cancel,
    ) -> Result<String> {
        cancel.check()?;
        let token_url = Url::parse(&self.url)?;
        log::debug!("GET {}", token_url);
        let mut req = agent
            .get(token_url.as_str())
            .set("Accept", "application/json");
        if let Some(timeout) = cancel.remaining() {
            req = req.timeout(timeout);
        }
        if let Some(credential) = credential {
            req = req.set("Authorization", &credential.header());
        }
        if !self.service.is_empty() {
            req = req.query("service", &self.service);
        }
        if let Some(scope) = &self.scope {
            req = req.query("scope", scope);
        }
        match req.call() {
            Ok(res) => {
                let token = res.into_json::<Token>()?;
                token
                    .token
                    .filter(|token| !token.is_empty())
                    .ok_or_else(|| Error::AuthorizationFailed(format!("{}: empty token", token_url)))
            }
            Err(ureq::Error::Status(status, _)) => Err(Error::AuthorizationFailed(format!(
                "{}: status {}",
                token_url, status
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Deserialize)]
struct Token {
    #[serde(alias = "access_token")]
    token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential() {
        let credential = Credential::from_token("user:password");
        assert_eq!(credential.header(), "Basic dXNlcjpwYXNzd29yZA==");
        assert_eq!(format!("{:?}", credential), "Credential(<redacted>)");
        assert_eq!(
            Credential::from_encoded("QVdTOnNlY3JldA==".to_string()).header(),
            "Basic QVdTOnNlY3JldA=="
        );
    }

    #[test]
    fn challenge() -> Result<()> {
        let auth = AuthChallenge::from_header(
            r#"Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:termoshtt/ocipkg/rust-lib:pull""#,
        )?;
        assert_eq!(auth.url, "https://ghcr.io/token");
        assert_eq!(auth.service, "ghcr.io");
        assert_eq!(
            auth.scope.as_deref(),
            Some("repository:termoshtt/ocipkg/rust-lib:pull")
        );

        let auth = AuthChallenge::from_header(r#"Bearer realm="https://example.com/token""#)?;
        assert_eq!(auth.service, "");
        assert_eq!(auth.scope, None);
        Ok(())
    }

    #[test]
    fn unsupported_challenge() {
        for header in [
            r#"Basic realm="https://123456789012.dkr.ecr.us-east-1.amazonaws.com/""#,
            "Bearer",
            r#"Bearer service="ghcr.io""#,
        ] {
            assert!(
                matches!(
                    AuthChallenge::from_header(header),
                    Err(Error::UnSupportedAuthHeader(_))
                ),
                "{}",
                header
            );
        }
    }
}
