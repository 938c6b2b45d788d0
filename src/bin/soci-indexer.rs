use clap::Parser;
use soci_indexer::{
    event::{ImageActionEvent, TagFilters},
    index_builder::CommandIndexBuilder,
    Cancel, EmptyIndexPolicy, ImageName, IndexerConfig,
};
use std::{fs, path::PathBuf, process, time::Duration};

/// Standalone SOCI indexer for a container image that both indexes and pushes the index
#[derive(Debug, Parser)]
#[clap(
    version,
    long_version = concat!(
        env!("CARGO_PKG_VERSION"),
        ", built at ",
        env!("VERGEN_BUILD_TIMESTAMP"),
        " by rustc ",
        env!("VERGEN_RUSTC_SEMVER")
    )
)]
struct Opt {
    /// Image to be indexed, `[REGISTRY/]REPO[:TAG|@DIGEST]`
    #[clap(required_unless_present = "event")]
    image: Option<String>,

    /// Registry authentication token (usually USER:PASSWORD)
    #[clap(short = 'a', long = "auth", default_value = "")]
    auth: String,

    /// Tag the pushed index. Pushed by digest only if not set.
    /// For a multi-platform image only the index of the last platform keeps the tag.
    #[clap(long = "tag")]
    tag: Option<String>,

    /// Fail instead of skipping when no layer is indexed
    #[clap(long = "fail-on-empty-index")]
    fail_on_empty_index: bool,

    /// Limit for the whole run in seconds
    #[clap(long = "timeout")]
    timeout: Option<u64>,

    /// Directory to create the working directory in
    #[clap(long = "workspace", parse(from_os_str))]
    workspace: Option<PathBuf>,

    /// Read the image from an "ECR Image Action" event in JSON
    #[clap(long = "event", parse(from_os_str), conflicts_with = "image")]
    event: Option<PathBuf>,

    /// Comma separated patterns on `REPO:TAG` of the event to be indexed
    #[clap(long = "filters", default_value = "*:*")]
    filters: String,

    /// Program building the index, and its leading arguments
    #[clap(long = "builder", required = true, multiple_values = true, allow_hyphen_values = true)]
    builder: Vec<String>,
}

fn image_name(opt: &Opt) -> soci_indexer::Result<Option<ImageName>> {
    let path = match &opt.event {
        Some(path) => path,
        None => {
            let image = opt.image.as_deref().unwrap_or_default();
            return Ok(Some(ImageName::parse(image)?));
        }
    };
    let event = ImageActionEvent::from_slice(&fs::read(path)?)?;
    let filters = TagFilters::parse(&opt.filters)?;
    match event.matching_filter(&filters) {
        Some(filter) => {
            log::info!(
                "Image {}:{} matched filter {}",
                event.detail.repository_name,
                event.detail.image_tag,
                filter
            );
            Ok(Some(event.image_name()?))
        }
        None => {
            log::info!(
                "Image {}:{} with digest {} did not match any filters",
                event.detail.repository_name,
                event.detail.image_tag,
                event.detail.image_digest
            );
            Ok(None)
        }
    }
}

fn config(opt: &Opt) -> soci_indexer::Result<IndexerConfig> {
    let mut config = IndexerConfig::from_env()?;
    if !opt.auth.is_empty() {
        config = config.with_auth_token(opt.auth.clone());
    }
    if let Some(tag) = &opt.tag {
        config = config.with_index_tag(tag)?;
    }
    if opt.fail_on_empty_index {
        config = config.with_empty_index(EmptyIndexPolicy::Fail);
    }
    if let Some(timeout) = opt.timeout {
        config = config.with_timeout(Duration::from_secs(timeout));
    }
    if let Some(workspace) = &opt.workspace {
        config = config.with_workspace_root(workspace);
    }
    Ok(config)
}

fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();
    let prepared = image_name(&opt).and_then(|image| Ok((image, config(&opt)?)));
    let (image, config) = match prepared {
        Ok((Some(image), config)) => (image, config),
        Ok((None, _)) => return,
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    };

    log::info!("Indexing and pushing {}", image);
    let mut builder = CommandIndexBuilder::new(&opt.builder[0], opt.builder[1..].to_vec());
    match soci_indexer::index_and_push(&image, &config, &mut builder, &Cancel::new()) {
        Ok(outcome) => log::info!("{}", outcome),
        Err(_) => process::exit(1),
    }
}
