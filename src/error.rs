use crate::Digest;
use oci_spec::{distribution::ErrorResponse, OciSpecError};
use std::{fmt, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    //
    // Invalid user input
    //
    #[error("Invalid image name: {0}")]
    InvalidImageName(String),
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),
    #[error("Invalid name for repository: {0}")]
    InvalidName(String),
    #[error("Invalid reference to image: {0}")]
    InvalidReference(String),
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
    #[error("Invalid repository image tag filter: {0}")]
    InvalidFilter(String),

    //
    // Image cannot be indexed. These end a run without failing it.
    //
    #[error("Image already indexed")]
    ImageAlreadyIndexed,
    #[error("Manifest contains no valid images")]
    NoValidImages,
    #[error("Empty config media type")]
    EmptyConfigMediaType,
    #[error("Unexpected config media type: {0}, expected one of: {:?}", crate::media_types::IMAGE_CONFIG)]
    UnexpectedConfigMediaType(String),
    #[error("Unsupported manifest media type: {0}")]
    UnsupportedManifestMediaType(String),
    #[error("No zTOCs created, all layers either skipped or produced errors")]
    EmptyIndex,

    //
    // Invalid content
    //
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },
    #[error("Blob not found in local store: {0}")]
    MissingBlob(Digest),
    #[error("Not an OCI image layout: {0}")]
    NotAnOciLayout(PathBuf),
    #[error(transparent)]
    InvalidJson(#[from] serde_json::error::Error),

    //
    // Error from OCI registry
    //
    #[error(transparent)]
    NetworkError(Box<ureq::Transport>),
    #[error("Registry responded with status {status}: {response}")]
    RegistryError { status: u16, response: ErrorResponse },
    #[error("Registry responded with status {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },
    #[error("Registry does not support OCI artifacts: {0}")]
    RegistryUnsupported(Box<Error>),
    #[error("Missing {0} header in registry response")]
    MissingHeader(&'static str),
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),
    #[error("Unsupported WWW-Authenticate header: {0}")]
    UnSupportedAuthHeader(String),

    //
    // Index builder
    //
    #[error("Index builder failed: {0}")]
    BuilderFailed(String),

    //
    // Pipeline
    //
    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    //
    // System error
    //
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    #[error(transparent)]
    UnknownIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Step of the indexing pipeline an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Workspace,
    Resolve,
    Pull,
    Build,
    Push,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Stage::Init => "Remote registry initialization error",
            Stage::Workspace => "OCI storage initialization error",
            Stage::Resolve => "Image manifest resolution error",
            Stage::Pull => "Image pull error",
            Stage::Build => "SOCI index build error",
            Stage::Push => "SOCI index push error",
        };
        f.write_str(msg)
    }
}

impl Error {
    pub fn at(self, stage: Stage) -> Self {
        Error::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Strip [Error::Stage] wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            e => e,
        }
    }

    /// The manifest exists but this tool cannot index it.
    pub fn is_manifest_validation(&self) -> bool {
        matches!(
            self.root(),
            Error::ImageAlreadyIndexed
                | Error::NoValidImages
                | Error::EmptyConfigMediaType
                | Error::UnexpectedConfigMediaType(_)
                | Error::UnsupportedManifestMediaType(_)
        )
    }

    /// Registry answered 404 for the requested manifest or blob.
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Error::RegistryError { status, .. } | Error::UnexpectedResponse { status, .. } => {
                *status == 404
            }
            _ => false,
        }
    }

    pub fn is_registry_unsupported(&self) -> bool {
        matches!(self.root(), Error::RegistryUnsupported(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled | Error::DeadlineExceeded)
    }
}

impl From<OciSpecError> for Error {
    fn from(e: OciSpecError) -> Self {
        match e {
            OciSpecError::SerDe(e) => Error::InvalidJson(e),
            OciSpecError::Io(e) => Error::UnknownIo(e),
            OciSpecError::Builder(e) => Error::InvalidReference(e.to_string()),
            OciSpecError::Other(e) => Error::InvalidReference(e),
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(status, res) => {
                let body = match res.into_string() {
                    Ok(body) => body,
                    Err(e) => return Error::UnknownIo(e),
                };
                match serde_json::from_str::<ErrorResponse>(&body) {
                    Ok(response) => Error::RegistryError { status, response },
                    Err(_) => Error::UnexpectedResponse { status, body },
                }
            }
            ureq::Error::Transport(e) => {
                let timed_out = std::error::Error::source(&e)
                    .and_then(|source| source.downcast_ref::<std::io::Error>())
                    .map_or(false, is_timeout);
                if timed_out {
                    Error::DeadlineExceeded
                } else {
                    Error::NetworkError(e.into())
                }
            }
        }
    }
}

/// Socket timeouts surface as `TimedOut`, or as `WouldBlock` from a read timeout on unix
pub(crate) fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

impl Error {
    /// I/O error while reading a response, with socket timeouts as [Error::DeadlineExceeded]
    pub(crate) fn from_read(e: std::io::Error) -> Self {
        if is_timeout(&e) {
            Error::DeadlineExceeded
        } else {
            Error::UnknownIo(e)
        }
    }
}
