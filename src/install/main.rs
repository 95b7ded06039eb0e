//! Print environment info and install instructions for flash-attn.
//!
//! ```bash
//! cargo run --bin install_flash_attn               # print info only
//! cargo run --bin install_flash_attn -- --install  # then try install
//! ```

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use rope_compat::advisor::{self, CommandInstaller, SystemProbe};

/// Show flash-attn install info and optionally install with --no-build-isolation.
#[derive(Parser)]
#[command(name = "install_flash_attn", version, about, long_about = None)]
struct Args {
    /// Run: uv pip install flash-attn --no-build-isolation
    #[arg(long)]
    install: bool,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let code = advisor::run(args.install, &SystemProbe::new(), &CommandInstaller, &mut out)?;

    Ok(ExitCode::from(code as u8))
}
