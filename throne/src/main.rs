use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    process::ExitCode,
};

use clap::Parser;
use tokio_util::sync::CancellationToken;

use args::Args;

mod args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let env = config::Env::capture();

    let config = match config::Config::from_env(&env) {
        Ok(config) => config,
        Err(err) => {
            // The logger is not up yet; configuration errors go straight to
            // stderr.
            eprintln!("throne: configuration error: {err}");
            return ExitCode::from(2);
        }
    };

    let log_filter = args.log_filter.unwrap_or_else(|| {
        if config.debug {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    });

    server::init_logger(&log_filter);

    log::info!("throne {}", env!("CARGO_PKG_VERSION"));
    log::info!("Provider: {} ({})", config.provider, config.base_url);

    let shutdown_signal = CancellationToken::new();
    {
        let shutdown_signal = shutdown_signal.clone();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupt received");
                shutdown_signal.cancel();
            }
        });
    }

    // The proxy does not authenticate downstream clients; it binds to
    // loopback only.
    let listen_address = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), config.port);

    match server::serve(server::ServeConfig {
        listen_address,
        config,
        env,
        shutdown_signal,
        bound_addr_sender: None,
    })
    .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ server::ServeError::Bind { .. }) => {
            log::error!("{err}");
            ExitCode::from(1)
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(1)
        }
    }
}
