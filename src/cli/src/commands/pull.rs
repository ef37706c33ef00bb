//! `diskferry pull` command.

use std::path::PathBuf;

use clap::Args;
use diskferry_core::config::TransportConfig;
use diskferry_core::progress::ProgressSink;
use diskferry_engine::ImageRef;

#[derive(Args)]
pub struct PullArgs {
    /// Image reference (e.g., "registry.local:5000/vms/builder:v3")
    pub image: String,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,

    /// Number of concurrent workers for segment writes
    #[arg(long)]
    pub concurrent_workers: Option<usize>,
}

pub async fn execute(
    args: PullArgs,
    images_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageRef::parse(&args.image)?;

    let mut config = TransportConfig::new(images_path);
    config.write_workers_count = args.concurrent_workers;

    let mut transporter = super::transporter_for(&reference, config);

    let printer = if args.quiet {
        None
    } else {
        let (sink, mut rx) = ProgressSink::channel();
        transporter = transporter.with_progress(sink);
        Some(tokio::spawn(async move {
            let mut high_water = 0;
            while let Some(update) = rx.recv().await {
                if update.bytes_transferred > high_water && update.total > 0 {
                    high_water = update.bytes_transferred;
                    eprint!(
                        "\r{:>3}% of {}",
                        100 * high_water / update.total,
                        crate::output::format_bytes(update.total)
                    );
                }
            }
            eprintln!();
        }))
    };

    let result = transporter.pull(&reference).await;
    drop(transporter);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    result?;

    println!("Pulled {}", reference);
    Ok(())
}
