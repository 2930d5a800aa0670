//! End-to-end reactor test: concurrent echo round trips, then a clean
//! exit on SIGTERM.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::sys::signal::{raise, Signal};
use strand_net::Server;

const PORT: u16 = 19483;

fn wait_for_listener() {
    for _ in 0..50 {
        if let Ok(probe) = TcpStream::connect(("127.0.0.1", PORT)) {
            drop(probe);
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("server did not start listening");
}

#[test]
fn test_echo_round_trips_then_signal_exit() {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = Arc::new(Server::with_options(PORT, |req| req.to_vec(), 4, 1024));
    let serving = Arc::clone(&server);
    let reactor = thread::spawn(move || serving.serve());

    wait_for_listener();

    let mut clients = Vec::new();
    for i in 0..24 {
        clients.push(thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", PORT)).unwrap();
            let payload = format!("hello request {}", i);
            stream.write_all(payload.as_bytes()).unwrap();

            // The server closes the connection after the response, so
            // read_to_end collects exactly one echo.
            let mut response = Vec::new();
            stream.read_to_end(&mut response).unwrap();
            assert_eq!(response, payload.into_bytes());
        }));
    }
    for client in clients {
        client.join().unwrap();
    }

    raise(Signal::SIGTERM).unwrap();
    reactor.join().unwrap();
}
