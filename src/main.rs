//! socketry: stream and datagram echo servers plus a stream client.
//!
//! Modes:
//! - `tcp-server`: accept loop plus one thread per connection
//! - `udp-server`: N listeners sharing a port
//! - `tcp-client`: send a message repeatedly and log the replies
//!
//! Servers run until Enter is pressed on stdin.

use socketry::client::EchoClient;
use socketry::config::{ClientRun, Config, Mode};
use socketry::server::{DatagramListenerSet, StreamServer};
use std::io::BufRead;
use std::process::ExitCode;
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match config.mode {
        Mode::TcpServer(listen) => {
            info!(
                addr = %listen.addr,
                reuseaddr = listen.reuse_addr,
                reuseport = listen.reuse_port,
                backlog = listen.backlog,
                "Starting tcp server"
            );
            run_tcp_server(StreamServer::new(listen))
        }
        Mode::UdpServer { listen, threads } => {
            info!(
                addr = %listen.addr,
                reuseaddr = listen.reuse_addr,
                reuseport = listen.reuse_port,
                threads,
                "Starting udp servers"
            );
            DatagramListenerSet::start(&listen, threads).and_then(|mut set| {
                wait_for_enter();
                set.stop();
                Ok(())
            })
        }
        Mode::TcpClient(run) => run_tcp_client(run),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "exiting");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_tcp_server(mut server: StreamServer) -> socketry::Result<()> {
    server.start()?;
    wait_for_enter();
    server.stop();
    Ok(())
}

fn run_tcp_client(run: ClientRun) -> socketry::Result<()> {
    info!(
        remote = %run.client.remote,
        local = ?run.client.local.map(|a| a.to_string()),
        count = run.count,
        "Starting tcp client"
    );

    let mut client = EchoClient::connect(&run.client)?;
    let mut sent = 0u64;
    while run.count == 0 || sent < run.count {
        let reply = client.round_trip(run.msg.as_bytes())?;
        info!(reply = %String::from_utf8_lossy(reply), "got a msg");
        sent += 1;
        thread::sleep(run.interval);
    }

    client.close();
    info!(sent, "tcp client done");
    Ok(())
}

/// Block until a line (or EOF) arrives on stdin.
fn wait_for_enter() {
    info!("press Enter to quit");
    let mut line = String::new();
    if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
        warn!(error = %e, "stdin read failed, shutting down");
    }
}
