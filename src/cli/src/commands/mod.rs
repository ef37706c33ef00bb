//! CLI command definitions and dispatch.

mod adopt;
mod clone;
mod list;
mod pull;
mod push;
mod remove;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use diskferry_core::config::TransportConfig;
use diskferry_engine::{HttpBlobStore, ImageRef, Transporter};

/// Diskferry — ship VM disk images through OCI registries.
#[derive(Parser)]
#[command(name = "diskferry", version, about)]
pub struct Cli {
    /// Root directory for the local image layout
    #[arg(long, global = true, env = "DISKFERRY_IMAGES_PATH")]
    pub images_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Push a local image to a registry
    Push(push::PushArgs),
    /// Pull an image from a registry
    Pull(pull::PullArgs),
    /// Clone a local image under a new reference (never contacts a registry)
    Clone(clone::CloneArgs),
    /// Adopt an external flat directory as a local image
    Adopt(adopt::AdoptArgs),
    /// List local images with apparent and on-disk sizes
    List(list::ListArgs),
    /// Remove a local image
    Remove(remove::RemoveArgs),
}

/// Run the selected command.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let images_path = resolve_images_path(cli.images_path);
    match cli.command {
        Command::Push(args) => push::execute(args, images_path).await,
        Command::Pull(args) => pull::execute(args, images_path).await,
        Command::Clone(args) => clone::execute(args, images_path).await,
        Command::Adopt(args) => adopt::execute(args, images_path).await,
        Command::List(args) => list::execute(args, images_path).await,
        Command::Remove(args) => remove::execute(args, images_path).await,
    }
}

/// Layout root: the `--images-path` flag, or `~/.diskferry/images`.
pub(crate) fn resolve_images_path(flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| {
        dirs::home_dir()
            .map(|home| home.join(".diskferry"))
            .unwrap_or_else(|| PathBuf::from(".diskferry"))
            .join("images")
    })
}

/// Build a transporter talking to the registry named by `reference`.
pub(crate) fn transporter_for(reference: &ImageRef, config: TransportConfig) -> Transporter {
    let store = Arc::new(HttpBlobStore::new(&reference.registry));
    Transporter::new(config, store)
}
