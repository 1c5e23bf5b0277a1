//! rulepack - build-time security policy compiler.
//!
//! Three independent build-step actions:
//! - `pack` compiles a rule source into the packed binary policy tree
//! - `reduce` prunes a rule source against an installed-file manifest
//! - `show` inspects a previously packed blob, surviving corruption

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rulepack::commands;

#[derive(Parser)]
#[command(name = "rulepack")]
#[command(about = "Packs access-control path rules into a binary policy tree")]
#[command(
    after_help = "TYPICAL FLOW:\n  rulepack reduce rules.txt rules.reduced image-manifest.txt\n  rulepack pack rules.reduced policy.h policy.bin\n  rulepack show policy.bin"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule source into a packed policy tree
    Pack {
        /// Rule source file
        rule_source: PathBuf,
        /// Output file for the source-embeddable array
        packed_output: PathBuf,
        /// Optional output file for the raw binary blob
        binary_output: Option<PathBuf>,
    },

    /// Drop rules for files absent from an image manifest and refresh hashes
    Reduce {
        /// Rule source file
        rule_source: PathBuf,
        /// Output file for the reduced rule source
        reduced_output: PathBuf,
        /// Installed-file manifest: `<path> <sha256> <normal|recovery>` per line
        manifest_file: PathBuf,
    },

    /// Inspect a packed policy blob
    Show {
        /// Packed binary blob
        binary_input: PathBuf,
        /// Emit the report as JSON instead of a tree dump
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Pack {
            rule_source,
            packed_output,
            binary_output,
        } => commands::cmd_pack(&rule_source, &packed_output, binary_output.as_deref()),

        Commands::Reduce {
            rule_source,
            reduced_output,
            manifest_file,
        } => commands::cmd_reduce(&rule_source, &reduced_output, &manifest_file),

        Commands::Show { binary_input, json } => commands::cmd_show(&binary_input, json),
    }
}
