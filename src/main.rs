// main.rs — attestcheck CLI entry point
//
// Exit codes: 0 verified, 1 policy not satisfied, 2 configuration or I/O
// error.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::time::{Duration, SystemTime};
use tracing_subscriber::EnvFilter;

use attestcheck::attest::run::{self, Verdict, VerifyOptions, VerifyRequest};
use attestcheck::crypto::PublicKey;
use cli::{Cli, Commands};

fn init_tracing(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let result = match cli.command {
        Commands::Verify {
            policy,
            policy_key,
            attestations,
            artifact,
            archive,
            lookup_timeout,
            threshold,
            retain_unauthenticated,
        } => run::run_verify(&VerifyRequest {
            policy,
            policy_key,
            attestations,
            artifact,
            archive,
            lookup_timeout: lookup_timeout.map(Duration::from_secs),
            options: VerifyOptions {
                threshold: threshold as usize,
                retain_unauthenticated,
                at: SystemTime::now(),
            },
        }),
        Commands::KeyId { key } => cmd_key_id(&key).map(|()| Verdict::Verified),
    };

    match result {
        Ok(Verdict::Verified) => ExitCode::SUCCESS,
        Ok(Verdict::Unverified(_)) => ExitCode::from(1),
        Err(e) => {
            eprintln!("[attest] error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn cmd_key_id(path: &Path) -> Result<()> {
    let pem = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let key = PublicKey::from_pem(&pem).with_context(|| format!("parsing {}", path.display()))?;
    println!("{}", key.key_id());
    Ok(())
}
