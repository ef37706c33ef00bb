//! `diskferry remove` command.

use std::path::PathBuf;

use clap::Args;
use diskferry_core::config::TransportConfig;
use diskferry_engine::{ImageRef, LayoutMapper};

#[derive(Args)]
pub struct RemoveArgs {
    /// Image reference to remove
    pub image: String,
}

pub async fn execute(
    args: RemoveArgs,
    images_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageRef::parse(&args.image)?;

    let layout = LayoutMapper::new(&TransportConfig::new(images_path));
    layout.remove(&reference)?;

    println!("Removed {}", reference);
    Ok(())
}
