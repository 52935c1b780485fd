// cli.rs — Command-line interface definitions (clap derive)
//
//   attestcheck verify   — verify attestations against a policy
//   attestcheck key-id   — print the key id of a public key

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "attestcheck")]
#[command(about = "Verify signed supply-chain attestations against a trust policy")]
#[command(version)]
pub struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Verify attestations against a policy
    Verify {
        /// Path to the policy (plain JSON, or an envelope when --policy-key is given)
        #[arg(long)]
        policy: PathBuf,

        /// PEM public key the policy envelope must be signed with
        #[arg(long)]
        policy_key: Option<PathBuf>,

        /// Attestation envelope file (repeatable)
        #[arg(short, long = "attestation")]
        attestations: Vec<PathBuf>,

        /// Artifact under verification; its digests key the archive lookup
        #[arg(long)]
        artifact: Option<PathBuf>,

        /// Directory of archived envelopes to search by artifact digest
        #[arg(long, requires = "artifact")]
        archive: Option<PathBuf>,

        /// Give up on the archive lookup after this many seconds
        #[arg(long)]
        lookup_timeout: Option<u64>,

        /// Distinct signing keys each envelope needs
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        threshold: u64,

        /// Keep statements no trusted identity signed (never satisfy a step)
        #[arg(long)]
        retain_unauthenticated: bool,
    },

    /// Print the key id of a PEM public key
    KeyId {
        /// Path to the PEM `PUBLIC KEY` file
        key: PathBuf,
    },
}
