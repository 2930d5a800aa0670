//! TCP echo server
//!
//! Serves whatever bytes a client sends straight back, one response per
//! connection. Stop it with Ctrl-C or SIGTERM.
//!
//! Usage:
//!     echo [port] [threads]
//!
//! Test with:
//!     printf 'hello request' | nc localhost 8080

use log::info;
use strand::Server;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let port: u16 = args
        .next()
        .map(|p| p.parse().expect("port must be a number"))
        .unwrap_or(8080);
    let threads: usize = args
        .next()
        .map(|t| t.parse().expect("threads must be a number"))
        .unwrap_or(8);

    let server = Server::with_options(
        port,
        |request| {
            info!("request of {} bytes", request.len());
            request.to_vec()
        },
        threads,
        8192,
    );

    println!("echo server listening on port {} ({} workers)", port, threads);
    server.serve();
    println!("echo server stopped");
}
