use std::{fs::OpenOptions, io::Write, process::exit};

use backhaul::{
    client::Connector,
    endpoint::generate_private_key_pem,
    error::{Result, TunnelError},
    server,
};
use clap::Parser;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::{Cli, Command, KeygenArgs};

mod cli;
mod logging;

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start Tokio runtime: {err}");
            exit(1);
        }
    };

    if let Err(error) = LocalSet::new().block_on(&runtime, async_main(cli.command)) {
        error!("{error}");
        exit(1);
    }
}

async fn async_main(command: Command) -> Result<()> {
    match command {
        Command::Keygen(args) => keygen(&args),
        Command::Serve(args) => {
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            server::serve(args.into(), cancel).await
        }
        Command::Client(args) => {
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            Connector::new(args.into()).run(&cancel).await
        }
    }
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::task::spawn_local(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(error) => {
                warn!("Couldn't listen for Ctrl-C: {error}");
                return;
            }
        }

        cancel.cancel();
    });
}

fn keygen(args: &KeygenArgs) -> Result<()> {
    let pem = generate_private_key_pem()?;

    let mut options = OpenOptions::new();
    options.write(true);
    match args.force {
        true => options.create(true).truncate(true),
        false => options.create_new(true),
    };

    let mut file = options
        .open(&args.out)
        .map_err(|error| TunnelError::KeyMaterial(format!("Couldn't create {}: {error}", args.out.display())))?;
    file.write_all(pem.as_bytes())?;

    info!("Wrote private key to {}", args.out.display());
    Ok(())
}
