//! Stopping an endpoint with roughly a thousand connections still in
//! flight tears everything down cleanly, with no hung threads and no
//! panics in the acceptor/poller/worker triad.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nio_endpoint::{ConnectionWrapper, Endpoint, EndpointConfig, Handler, HandlerResult, SocketEvent};

const CONNECTIONS: usize = 1000;

struct LoadHandler {
    opened: AtomicUsize,
}

impl Handler for LoadHandler {
    fn process(&self, wrapper: &Arc<ConnectionWrapper>, event: SocketEvent) -> HandlerResult {
        if event == SocketEvent::OpenRead {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 16];
            let mut channel = wrapper.channel();
            let _ = channel.read(&mut buf);
        }
        HandlerResult::Open
    }
}

#[test]
fn shutdown_under_load_tears_down_cleanly() {
    let config = EndpointConfig::new("127.0.0.1:0".parse().unwrap())
        .poller_threads(2)
        .worker_threads(4)
        .max_connections(CONNECTIONS as i64 * 2);

    let handler = Arc::new(LoadHandler {
        opened: AtomicUsize::new(0),
    });

    let mut endpoint = Endpoint::bind(config, handler.clone()).unwrap();
    let addr = endpoint.local_addr();
    endpoint.start().unwrap();

    let client_threads: Vec<_> = (0..CONNECTIONS)
        .map(|_| {
            std::thread::spawn(move || {
                if let Ok(mut stream) = TcpStream::connect(addr) {
                    let _ = stream.set_read_timeout(Some(Duration::from_secs(10)));
                    let _ = stream.write_all(b"x");
                    let mut buf = [0u8; 1];
                    let _ = stream.read(&mut buf);
                }
            })
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(15);
    while handler.opened.load(Ordering::SeqCst) < CONNECTIONS / 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    endpoint.stop();

    for handle in client_threads {
        let _ = handle.join();
    }

    assert!(handler.opened.load(Ordering::SeqCst) > 0);
}
