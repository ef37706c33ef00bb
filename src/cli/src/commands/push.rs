//! `diskferry push` command.

use std::path::PathBuf;

use clap::Args;
use diskferry_core::config::TransportConfig;
use diskferry_engine::ImageRef;

#[derive(Args)]
pub struct PushArgs {
    /// Image reference (e.g., "registry.local:5000/vms/builder:v3")
    pub image: String,

    /// Mount blobs from this reference instead of re-uploading them
    #[arg(long)]
    pub mount: Option<String>,

    /// Number of concurrent workers for hashing and uploads
    #[arg(long, default_value_t = 8)]
    pub concurrent_workers: usize,

    /// Segment size in bytes
    #[arg(long)]
    pub chunk_size: Option<u64>,
}

pub async fn execute(
    args: PushArgs,
    images_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageRef::parse(&args.image)?;

    let mut config =
        TransportConfig::new(images_path).with_workers_count(args.concurrent_workers);
    if let Some(chunk_size) = args.chunk_size {
        config = config.with_chunk_size(chunk_size);
    }
    if let Some(mount) = args.mount {
        config = config.with_mount_ref(mount);
    }

    let transporter = super::transporter_for(&reference, config);
    transporter.push(&reference).await?;

    println!("Pushed {}", reference);
    Ok(())
}
