//! `a3s-copy copy` command.

use std::path::PathBuf;

use a3s_build_copier::{perform_copy, LchownRemapper, TarArchiver};
use a3s_build_core::CopyConfig;
use clap::Args;

use super::{cancel_on_ctrl_c, resolve_instruction, SourceArgs};

#[derive(Args)]
pub struct CopyArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Root filesystem to copy into
    #[arg(long)]
    pub target: PathBuf,

    /// Working directory that relative destinations are resolved against
    #[arg(short, long, default_value = "/")]
    pub workdir: String,

    /// Owner of the copied files (user[:group], names or ids)
    #[arg(long)]
    pub chown: Option<String>,

    /// Keep the ownership recorded in the sources
    #[arg(long, conflicts_with = "chown")]
    pub preserve_ownership: bool,
}

pub async fn execute(args: CopyArgs, config: CopyConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !args.target.is_dir() {
        return Err(format!("target {} is not a directory", args.target.display()).into());
    }

    let (mut copier, mut inst) =
        resolve_instruction(&args.source, &config, cancel_on_ctrl_c()).await?;
    if let Some(chown) = &args.chown {
        inst = inst.with_chown(chown.clone());
    }
    inst = inst.with_preserve_ownership(args.preserve_ownership);

    let archiver = TarArchiver::new(config.id_mapping.clone(), config.best_effort_xattrs);
    perform_copy(
        &inst,
        &args.target,
        &args.workdir,
        &archiver,
        &LchownRemapper,
        &config.id_mapping,
    )?;

    for info in &inst.infos {
        println!("{} {} -> {}", inst.cmd_name, info.path, inst.dest);
    }

    copier.cleanup()?;
    Ok(())
}
