//! `a3s-copy resolve` command.

use a3s_build_core::CopyConfig;
use clap::Args;

use crate::output;

use super::{cancel_on_ctrl_c, resolve_instruction, SourceArgs};

#[derive(Args)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ResolveArgs, config: CopyConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (mut copier, inst) = resolve_instruction(&args.source, &config, cancel_on_ctrl_c()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&inst.infos)?);
    } else {
        let mut table = output::new_table(&["SOURCE", "FINGERPRINT", "EXTRACT"]);
        for info in &inst.infos {
            let extract = if inst.allow_local_decompression && !info.no_decompress {
                "auto"
            } else {
                "no"
            };
            table.add_row(vec![
                info.path.clone(),
                output::short_fingerprint(&info.hash),
                extract.to_string(),
            ]);
        }
        println!("{table}");
        println!("{} {} source(s) -> {}", inst.cmd_name, inst.infos.len(), inst.dest);
    }

    copier.cleanup()?;
    Ok(())
}
