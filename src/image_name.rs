use crate::{
    distribution::{Name, Reference},
    error::*,
};
use std::fmt;
use url::Url;

/// Registry used when the image name does not specify one
pub const DEFAULT_REGISTRY: &str = "docker.io";

const DOCKER_HUB_API: &str = "registry-1.docker.io";

/// Tag used when the image name has neither a tag nor a digest
pub const DEFAULT_TAG: &str = "latest";

/// Image name in `[REGISTRY/]REPOSITORY[:TAG|@DIGEST]` form
///
/// ```
/// use soci_indexer::{distribution::Reference, ImageName};
///
/// let image = ImageName::parse("public.ecr.aws/foo/bar:version").unwrap();
/// assert_eq!(image.registry, "public.ecr.aws");
/// assert_eq!(image.name.as_str(), "foo/bar");
/// assert_eq!(image.reference, Reference::new("version").unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageName {
    /// Registry host, optionally with port
    pub registry: String,
    pub name: Name,
    pub reference: Reference,
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            Reference::Tag(tag) => write!(f, "{}/{}:{}", self.registry, self.name, tag),
            Reference::Digest(digest) => write!(f, "{}/{}@{}", self.registry, self.name, digest),
        }
    }
}

/// Whether the first path segment of an image name is a registry host
fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

impl ImageName {
    pub fn parse(input: &str) -> Result<Self> {
        let err = || Error::InvalidImageName(input.to_string());

        let (registry, rest) = match input.split_once('/') {
            Some((head, rest)) if is_registry_host(head) => (head, rest),
            _ => (DEFAULT_REGISTRY, input),
        };
        if registry.is_empty() || rest.is_empty() {
            return Err(err());
        }

        // Digest wins over tag, `name:tag@digest` is rejected below
        // since the name part cannot contain `:`.
        let (name, reference) = if let Some((name, digest)) = rest.split_once('@') {
            (name, Reference::Digest(digest.parse().map_err(|_| err())?))
        } else if let Some((name, tag)) = rest.rsplit_once(':') {
            (name, Reference::tag(tag).map_err(|_| err())?)
        } else {
            (rest, Reference::Tag(DEFAULT_TAG.to_string()))
        };
        let name = Name::new(name).map_err(|_| err())?;

        Ok(ImageName {
            registry: registry.to_string(),
            name,
            reference,
        })
    }

    /// Same image, addressed by another reference
    pub fn with_reference(&self, reference: Reference) -> Self {
        ImageName {
            reference,
            ..self.clone()
        }
    }

    /// URL of the registry API server
    pub fn registry_url(&self) -> Result<Url> {
        registry_url(&self.registry)
    }
}

/// URL of the registry API server for given host
///
/// `localhost` is accessed by plain HTTP, others by HTTPS.
/// Docker Hub serves its API on a different host than its name.
pub fn registry_url(registry: &str) -> Result<Url> {
    let url = if registry == DEFAULT_REGISTRY {
        format!("https://{}", DOCKER_HUB_API)
    } else if registry.starts_with("localhost") || registry.starts_with("127.0.0.1") {
        format!("http://{}", registry)
    } else {
        format!("https://{}", registry)
    };
    Ok(Url::parse(&url)?)
}

#[cfg(test)]
mod test {
    use super::*;

    const DIGEST: &str = "sha256:9a161b6fc2f8ef74bb368f56edcac33a91b494d082da3693a600751a1a68b7d8";

    fn check(input: &str, name: &str, reference: &str, registry: &str) -> Result<()> {
        let image = ImageName::parse(input)?;
        assert_eq!(image.name.as_str(), name, "{}", input);
        assert_eq!(image.reference.to_string(), reference, "{}", input);
        assert_eq!(image.registry, registry, "{}", input);
        Ok(())
    }

    #[test]
    fn image_name() -> Result<()> {
        check("foo/bar", "foo/bar", "latest", "docker.io")?;
        check("foo/bar:version", "foo/bar", "version", "docker.io")?;
        check(&format!("foo/bar@{}", DIGEST), "foo/bar", DIGEST, "docker.io")?;
        check("public.ecr.aws/foo/bar", "foo/bar", "latest", "public.ecr.aws")?;
        check("public.ecr.aws/foo/bar:version", "foo/bar", "version", "public.ecr.aws")?;
        check(
            &format!("public.ecr.aws/foo/bar@{}", DIGEST),
            "foo/bar",
            DIGEST,
            "public.ecr.aws",
        )?;
        check("alpine", "alpine", "latest", "docker.io")?;
        check("ubuntu:20.04", "ubuntu", "20.04", "docker.io")?;
        check("localhost:5000/test_repo:tag1", "test_repo", "tag1", "localhost:5000")?;
        check("localhost/test_repo", "test_repo", "latest", "localhost")?;
        Ok(())
    }

    #[test]
    fn digest_is_not_a_tag() -> Result<()> {
        let image = ImageName::parse(&format!("foo/bar@{}", DIGEST))?;
        assert!(image.reference.is_digest());
        assert_eq!(image.to_string(), format!("docker.io/foo/bar@{}", DIGEST));

        let image = ImageName::parse("foo/bar:version")?;
        assert!(!image.reference.is_digest());
        Ok(())
    }

    #[test]
    fn invalid() {
        for input in [
            "",
            "public.ecr.aws/",
            "foo/Bar",
            "foo/bar:",
            "foo/bar@",
            "foo/bar@sha256:xyz",
            "foo/bar:tag@sha256:9a161b6fc2f8ef74bb368f56edcac33a91b494d082da3693a600751a1a68b7d8",
            "foo/bar:ta/g",
        ] {
            assert!(
                matches!(ImageName::parse(input), Err(Error::InvalidImageName(_))),
                "{}",
                input
            );
        }
    }

    #[test]
    fn url() -> Result<()> {
        assert_eq!(
            ImageName::parse("localhost:5000/test_repo")?
                .registry_url()?
                .as_str(),
            "http://localhost:5000/"
        );
        assert_eq!(
            ImageName::parse("foo/bar")?.registry_url()?.as_str(),
            "https://registry-1.docker.io/"
        );
        assert_eq!(
            ImageName::parse("public.ecr.aws/foo/bar")?
                .registry_url()?
                .as_str(),
            "https://public.ecr.aws/"
        );
        Ok(())
    }
}
