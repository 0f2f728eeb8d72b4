//! CLI command definitions and dispatch.

mod copy;
mod resolve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_build_copier::{
    Copier, CopyInstruction, ExtractedImage, HttpDownloader, RejectRemote, SharedPathCache,
    Source, SourceDownloader, SourcesAndDest,
};
use a3s_build_core::{BuildError, CopyConfig};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// A3S Copy: resolve and apply COPY/ADD build steps.
#[derive(Parser)]
#[command(name = "a3s-copy", version, about)]
pub struct Cli {
    /// Configuration file (defaults to ~/.a3s/build.yaml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Resolve sources and print their fingerprints
    Resolve(resolve::ResolveArgs),
    /// Resolve sources and copy them into a root filesystem
    Copy(copy::CopyArgs),
}

/// Where sources are read from, shared by all commands.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Build context directory
    #[arg(short, long, default_value = ".")]
    pub context: PathBuf,

    /// Resolve as ADD: allow URL sources and unpack local archives
    #[arg(long)]
    pub add: bool,

    /// Read sources from an image made of these layer tarballs, in order
    #[arg(long = "layer")]
    pub layers: Vec<PathBuf>,

    /// Identity of the image given with --layer (enables the path cache)
    #[arg(long, default_value = "")]
    pub image_id: String,

    /// Source paths, patterns or URLs followed by the destination
    #[arg(required = true, num_args = 2..)]
    pub paths: Vec<String>,
}

impl SourceArgs {
    pub fn command_name(&self) -> &'static str {
        if self.add {
            "ADD"
        } else {
            "COPY"
        }
    }

    /// Split the positional paths into sources and destination.
    pub fn sources_and_dest(&self) -> SourcesAndDest {
        match self.paths.split_last() {
            Some((dest, sources)) => SourcesAndDest::new(sources.to_vec(), dest.clone()),
            None => SourcesAndDest::default(),
        }
    }
}

/// Return the path to the default configuration file (~/.a3s/build.yaml).
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".a3s"))
        .unwrap_or_else(|| PathBuf::from(".a3s"))
        .join("build.yaml")
}

/// Load the configuration from `path`, or from the default location if it
/// exists, or fall back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<CopyConfig, BuildError> {
    match path {
        Some(path) => CopyConfig::from_yaml_file(path),
        None => {
            let default = config_path();
            if default.is_file() {
                CopyConfig::from_yaml_file(&default)
            } else {
                Ok(CopyConfig::default())
            }
        }
    }
}

/// Token cancelled when the user presses Ctrl-C.
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling downloads");
            trigger.cancel();
        }
    });
    token
}

/// Build a resolver for `args` and resolve its instruction.
///
/// The returned [`Copier`] owns downloads referenced by the instruction, so
/// it must outlive any use of the instruction's sources.
pub(crate) async fn resolve_instruction(
    args: &SourceArgs,
    config: &CopyConfig,
    cancel: CancellationToken,
) -> Result<(Copier, CopyInstruction), BuildError> {
    let downloader: Arc<dyn SourceDownloader> = if args.add {
        Arc::new(HttpDownloader::new(config)?.with_cancellation(cancel))
    } else {
        Arc::new(RejectRemote::new("COPY"))
    };

    let source = Source::context(&args.context)?;
    let mut copier = Copier::new(Some(source), Arc::new(SharedPathCache::new()), downloader);
    if !args.layers.is_empty() {
        let image = ExtractedImage::new(args.image_id.clone(), args.layers.clone());
        copier = copier.with_image_source(Arc::new(image));
    }

    let cmd_name = args.command_name();
    let inst = copier
        .create_copy_instruction(&args.sources_and_dest(), cmd_name)
        .await?
        .with_local_decompression(args.add);
    Ok((copier, inst))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, config: CopyConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Resolve(args) => resolve::execute(args, config).await,
        Command::Copy(args) => copy::execute(args, config).await,
    }
}
