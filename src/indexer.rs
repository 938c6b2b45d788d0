//! Build SOCI indices of an image and push them to its repository

use crate::{
    cancel::Cancel,
    config::{EmptyIndexPolicy, IndexerConfig},
    distribution::{Reference, Registry, RegistryHandle},
    error::*,
    index_builder::{ImageTarget, IndexBuilder},
    resolve, transfer,
    workspace::Workspace,
    Digest, ImageName,
};
use oci_spec::image::Descriptor;
use std::fmt;

pub const BUILD_AND_PUSH_SUCCESS: &str = "Successfully built and pushed SOCI index";
pub const SKIP_EMPTY_INDEX: &str = "Skipping pushing SOCI index as it does not contain any zTOCs";
pub const SKIP_MANIFEST_VALIDATION: &str = "Exited early due to manifest validation error";

/// Why a run finished without pushing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The image cannot or need not be indexed, or does not exist
    ManifestValidation,
    /// The builder indexed no layer
    EmptyIndex,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ManifestValidation => f.write_str(SKIP_MANIFEST_VALIDATION),
            SkipReason::EmptyIndex => f.write_str(SKIP_EMPTY_INDEX),
        }
    }
}

/// Result of a run which did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Descriptors of the pushed indices, one per image manifest
    Pushed(Vec<Descriptor>),
    Skipped(SkipReason),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pushed(_) => f.write_str(BUILD_AND_PUSH_SUCCESS),
            Outcome::Skipped(reason) => reason.fmt(f),
        }
    }
}

/// Fields attached to every log line of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    pub registry: String,
    pub image_digest: Option<Digest>,
    pub index_digest: Option<Digest>,
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registry={}", self.registry)?;
        if let Some(digest) = &self.image_digest {
            write!(f, " image_digest={}", digest)?;
        }
        if let Some(digest) = &self.index_digest {
            write!(f, " index_digest={}", digest)?;
        }
        Ok(())
    }
}

impl LogContext {
    pub fn new(registry: &str) -> Self {
        LogContext {
            registry: registry.to_string(),
            ..Default::default()
        }
    }

    fn fail(&self, e: Error) -> Error {
        log::error!("{} {}", e, self);
        e
    }
}

/// Index every image manifest of `image` and push the indices to its repository
///
/// Authenticates to the registry of `image`, then runs [run]. The timeout
/// of `config` bounds the whole run in addition to `cancel`.
pub fn index_and_push<B: IndexBuilder + ?Sized>(
    image: &ImageName,
    config: &IndexerConfig,
    builder: &mut B,
    cancel: &Cancel,
) -> Result<Outcome> {
    let cancel = match config.timeout {
        Some(timeout) => cancel.limited(timeout),
        None => cancel.clone(),
    };
    let ctx = LogContext::new(&image.registry);
    let registry = RegistryHandle::init(
        &image.registry,
        config.auth_token.as_deref(),
        config.ecr_endpoint.as_ref(),
        &cancel,
    )
    .map_err(|e| ctx.fail(e.at(Stage::Init)))?;
    run(&registry, image, config, builder)
}

/// Index and push through an already authenticated `registry`
///
/// - Resolve `image` to its image manifests. An image which cannot be
///   indexed, or does not exist, ends the run with [SkipReason::ManifestValidation].
/// - For each manifest in turn, pull it into a fresh workspace, build its
///   index, and push the index. An empty index ends the run with
///   [SkipReason::EmptyIndex] unless [EmptyIndexPolicy::Fail] is set.
///
/// Errors are wrapped in [Error::Stage]. The workspace is removed on every path.
pub fn run<G: Registry, B: IndexBuilder + ?Sized>(
    registry: &G,
    image: &ImageName,
    config: &IndexerConfig,
    builder: &mut B,
) -> Result<Outcome> {
    let mut ctx = LogContext::new(registry.host());
    let workspace =
        Workspace::create(&config.workspace_root).map_err(|e| ctx.fail(e.at(Stage::Workspace)))?;
    let mut repo = registry
        .repository(&image.name)
        .map_err(|e| ctx.fail(e.at(Stage::Init)))?;

    let digests = match resolve::get_image_digests(&mut repo, &image.reference) {
        Ok(digests) => digests,
        Err(e) if e.is_manifest_validation() || e.is_not_found() => {
            log::warn!("Image manifest validation error: {} {}", e, ctx);
            return Ok(Outcome::Skipped(SkipReason::ManifestValidation));
        }
        Err(e) => return Err(ctx.fail(e.at(Stage::Resolve))),
    };
    log::info!("Indexing {} image(s) of {} {}", digests.len(), image, ctx);

    let mut pushed = Vec::new();
    for digest in digests {
        ctx.image_digest = Some(digest.clone());
        ctx.index_digest = None;

        let reference = Reference::Digest(digest);
        let descriptor = transfer::pull(&mut repo, &reference, workspace.content_store())
            .map_err(|e| ctx.fail(e.at(Stage::Pull)))?;
        let target = ImageTarget {
            name: image.with_reference(reference),
            descriptor,
        };

        let index = match builder.convert(&workspace, &target) {
            Ok(index) => index,
            Err(Error::EmptyIndex) if config.empty_index == EmptyIndexPolicy::Skip => {
                log::warn!("{} {}", SKIP_EMPTY_INDEX, ctx);
                return Ok(Outcome::Skipped(SkipReason::EmptyIndex));
            }
            Err(e) => return Err(ctx.fail(e.at(Stage::Build))),
        };
        let index_digest =
            Digest::from_descriptor(&index).map_err(|e| ctx.fail(e.at(Stage::Build)))?;
        ctx.index_digest = Some(index_digest);

        transfer::push(
            workspace.artifact_store(),
            &index,
            &mut repo,
            config.index_tag.as_ref(),
        )
        .map_err(|e| {
            if e.is_registry_unsupported() {
                log::error!(
                    "Registry does not accept OCI artifacts, SOCI index cannot be stored: {}",
                    ctx
                );
            }
            ctx.fail(e.at(Stage::Push))
        })?;
        log::info!("{} {}", BUILD_AND_PUSH_SUCCESS, ctx);
        pushed.push(index);
    }
    Ok(Outcome::Pushed(pushed))
}
