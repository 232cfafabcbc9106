use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use clap::Parser;
use tokio::net::{TcpListener, UnixListener};
use tracing::{error, info};

use pmlink_agent::cli::Cli;
use pmlink_agent::{serve_stdio, serve_tcp, serve_unix_listener, SampleModule, ServeConfig};
use pmlink_core::{init_logging, LogFormat};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    if let Err(e) = init_logging(cli.verbosity, cli.log_file.as_deref(), format) {
        eprintln!("pmlink-agent: logging setup failed: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!(error = %e, "agent failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> pmlink_core::Result<()> {
    let module = SampleModule::new();
    let config = ServeConfig {
        domain: cli.domain,
        announce_credentials: !cli.no_creds,
        ..ServeConfig::default()
    };

    if let Some(path) = &cli.unix {
        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "listening on unix socket");
        return serve_unix_listener(listener, module, config).await;
    }

    if let Some(port) = cli.port {
        let addr: SocketAddr = if cli.ipv6 {
            (Ipv6Addr::LOCALHOST, port).into()
        } else {
            (Ipv4Addr::LOCALHOST, port).into()
        };
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "listening on tcp");
        return serve_tcp(listener, module, config).await;
    }

    serve_stdio(module, config).await
}
