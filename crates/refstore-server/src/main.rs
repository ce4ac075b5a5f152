//! Demonstration entry point: a framed-echo server.
//!
//! Binds the transport's listening socket, then loops accepting clients and
//! handing each connected socket to the worker pool, where the session
//! echoes every received frame back until the peer hangs up. The accept
//! thread itself never services a client.

use std::sync::Arc;

use clap::Parser;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use refstore_net::{NetError, Socket};
use refstore_pool::ThreadPool;

#[derive(Debug, Parser)]
#[command(name = "refstore-server", about = "Framed-echo demonstration server")]
struct Args {
    /// Port to listen on; 0 asks the OS for an ephemeral port.
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// IPv6 address literal to bind; omitted means the wildcard address.
    #[arg(long)]
    address: Option<String>,

    /// Number of worker threads servicing connections.
    #[arg(long, default_value_t = 4)]
    workers: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut listener = Socket::new()?;
    listener.set_reuse_address(true)?;
    listener.bind_and_listen(args.port, args.address.as_deref())?;
    let bound = listener.local_addr()?;

    // One shared lock for demo console output, so lines from concurrent
    // sessions do not interleave.
    let console = Arc::new(Mutex::new(()));
    {
        let _guard = console.lock();
        println!("refstore-server listening on [{}]:{}", bound.ip(), bound.port());
    }

    let pool = ThreadPool::new(args.workers)?;
    info!(workers = args.workers, port = bound.port(), "accepting connections");

    let mut session_id: u64 = 0;
    loop {
        let client = match listener.accept_client() {
            Ok(client) => client,
            Err(err) => {
                error!(%err, "accept failed");
                continue;
            }
        };

        session_id += 1;
        let id = session_id;
        let console = Arc::clone(&console);
        if pool.spawn(move || run_session(id, &client, &console)).is_err() {
            warn!("pool is shutting down; dropping connection");
        }
    }
}

/// Echoes frames until the peer closes the connection.
fn run_session(id: u64, client: &Socket, console: &Mutex<()>) {
    let mut frames: u64 = 0;
    loop {
        match client.recv_frame() {
            Ok(payload) => {
                frames += 1;
                if let Err(err) = client.send_frame(&payload) {
                    warn!(session = id, %err, "echo send failed");
                    break;
                }
            }
            Err(NetError::PeerClosed { .. }) => {
                info!(session = id, frames, "peer closed; session done");
                break;
            }
            Err(err) => {
                warn!(session = id, %err, "receive failed");
                break;
            }
        }
    }
    let _guard = console.lock();
    println!("session {id} finished after {frames} frame(s)");
}
