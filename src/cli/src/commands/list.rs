//! `diskferry list` command.

use std::path::PathBuf;

use clap::Args;
use diskferry_core::config::TransportConfig;
use diskferry_engine::LayoutMapper;

use crate::output;

#[derive(Args)]
pub struct ListArgs {
    /// Only show image references (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: ListArgs,
    images_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let layout = LayoutMapper::new(&TransportConfig::new(images_path));
    let images = if layout.root_dir().exists() {
        layout.list()?
    } else {
        Vec::new()
    };

    if args.quiet {
        for image in &images {
            println!("{}", image.reference);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["REFERENCE", "SIZE", "DISK USAGE"]);
    for image in &images {
        table.add_row(&[
            &image.reference.full_reference(),
            &output::format_bytes(image.size),
            &output::format_bytes(image.disk_usage),
        ]);
    }

    println!("{table}");
    Ok(())
}
