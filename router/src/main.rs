// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]

mod args;
mod config;
mod health;
mod server;

use crate::args::{CmdArgs, Parser};
use crate::server::Server;
use flow_tracker::FlowTracker;
use net::packet::SocketMode;
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(level: &str, log_file: Option<&Path>) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|e| {
        eprintln!("bad --log-level {level:?} ({e}); falling back to info");
        EnvFilter::new("info")
    });
    match log_file {
        Some(path) => {
            let file = match File::create(path) {
                Ok(file) => Arc::new(file),
                Err(e) => {
                    eprintln!("cannot open log file {path:?}: {e}");
                    exit(2);
                }
            };
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(file)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

fn main() {
    /* parse cmd line args */
    let args = CmdArgs::parse();
    init_logging(args.log_level(), args.log_file());
    info!("starting geneve router...");

    let config = match args.router_config() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            exit(2);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let (sweeper_tx, sweeper_rx) = crossbeam_channel::bounded::<()>(1);
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
            let _ = sweeper_tx.try_send(());
        })
        .expect("failed to set signal handler");
    }

    /* flow tracker + sweeper, when enabled */
    let tracker = config
        .tracker
        .clone()
        .map(|tracker_config| Arc::new(FlowTracker::new(tracker_config)));
    let sweeper = match &tracker {
        Some(tracker) => match tracker.spawn_sweeper(sweeper_rx) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("failed to start the flow sweeper: {e}");
                exit(1);
            }
        },
        None => None,
    };

    let mut server = match Server::bind(&config, tracker, Arc::clone(&shutdown)) {
        Ok(server) => server,
        Err(e) => {
            if e.kind() == io::ErrorKind::PermissionDenied
                && config.socket_mode == SocketMode::Raw
            {
                error!("raw socket mode needs root privileges; rerun with sudo or pass --udp-only");
            }
            error!("failed to bind sockets: {e}");
            exit(1);
        }
    };

    if let Err(e) = server.run() {
        error!("receive loop failed: {e}");
        exit(1);
    }

    if let Some(handle) = sweeper {
        let _ = handle.join();
    }
    info!("shut down cleanly");
}
