//! Command-line interface for the sample agent binary.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "pmlink-agent", version, about = "Sample pmlink metric agent")]
pub struct Cli {
    /// Performance domain to serve.
    #[arg(short = 'd', long, default_value_t = 29)]
    pub domain: u32,

    /// Listen on a Unix-domain socket instead of serving stdio.
    #[arg(long, value_name = "PATH", conflicts_with = "port")]
    pub unix: Option<PathBuf>,

    /// Listen on a loopback TCP port instead of serving stdio.
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Bind the IPv6 loopback (with --port).
    #[arg(long, requires = "port")]
    pub ipv6: bool,

    /// Skip the credential announcement, like an agent that predates the
    /// version exchange.
    #[arg(long)]
    pub no_creds: bool,

    /// Increase log verbosity (-v, -vv, ...).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Write logs to a file instead of stderr.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    pub json_logs: bool,
}
