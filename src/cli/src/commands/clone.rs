//! `diskferry clone` command.

use std::path::PathBuf;

use clap::Args;
use diskferry_core::config::TransportConfig;
use diskferry_engine::{ImageRef, LayoutMapper};

#[derive(Args)]
pub struct CloneArgs {
    /// Source image reference
    pub src: String,

    /// Destination image reference
    pub dst: String,
}

pub async fn execute(
    args: CloneArgs,
    images_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let src = ImageRef::parse(&args.src)?;
    let dst = ImageRef::parse(&args.dst)?;

    let layout = LayoutMapper::new(&TransportConfig::new(images_path));
    layout.clone_image(&src, &dst)?;

    println!("Cloned {} to {}", src, dst);
    Ok(())
}
