//! `diskferry adopt` command.

use std::path::PathBuf;

use clap::Args;
use diskferry_core::config::TransportConfig;
use diskferry_engine::{ImageRef, LayoutMapper};

#[derive(Args)]
pub struct AdoptArgs {
    /// Flat directory to adopt
    pub dir: PathBuf,

    /// Image reference to adopt the directory under
    pub image: String,
}

pub async fn execute(
    args: AdoptArgs,
    images_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageRef::parse(&args.image)?;

    let layout = LayoutMapper::new(&TransportConfig::new(images_path));
    layout.adopt(&args.dir, &reference)?;

    println!("Adopted {} as {}", args.dir.display(), reference);
    Ok(())
}
