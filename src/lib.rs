//! soci-indexer
//! =============
//!
//! Build [SOCI](https://github.com/awslabs/soci-snapshotter) indices of a
//! container image and push them to the repository of the image.

pub mod cancel;
pub mod config;
pub mod distribution;
pub mod error;
pub mod event;
pub mod image;
pub mod index_builder;
pub mod indexer;
pub mod media_types;
pub mod resolve;
pub mod transfer;
pub mod workspace;

mod digest;
mod image_name;

#[cfg(test)]
mod testing;

pub use cancel::Cancel;
pub use config::{EmptyIndexPolicy, IndexerConfig};
pub use digest::Digest;
pub use error::{Error, Result};
pub use image_name::ImageName;
pub use indexer::{index_and_push, Outcome};
