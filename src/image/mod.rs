//! Read and Write images based on [OCI image specification](https://github.com/opencontainers/image-spec)

mod manifest;
mod oci_dir;

pub use manifest::*;
pub use oci_dir::*;
