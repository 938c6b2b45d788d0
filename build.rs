#[cfg(feature = "cli")]
use vergen::{vergen, Config};

fn main() {
    // Build timestamp and rustc version shown by `soci-indexer --version`
    #[cfg(feature = "cli")]
    vergen(Config::default()).expect("Fail to generate version info");
}
