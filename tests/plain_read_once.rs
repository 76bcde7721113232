//! A plain connection is read once and closed by the handler.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nio_endpoint::{ConnectionWrapper, Endpoint, EndpointConfig, Handler, HandlerResult, ReadOutcome, SocketEvent};

struct OnceHandler {
    seen: Mutex<Option<Vec<u8>>>,
    saw_open_read: AtomicBool,
}

impl Handler for OnceHandler {
    fn process(&self, wrapper: &Arc<ConnectionWrapper>, event: SocketEvent) -> HandlerResult {
        if event != SocketEvent::OpenRead {
            return HandlerResult::Open;
        }
        self.saw_open_read.store(true, Ordering::Relaxed);

        let mut buf = [0u8; 64];
        let mut channel = wrapper.channel();
        match channel.read(&mut buf) {
            Ok(ReadOutcome::Read(n)) => {
                *self.seen.lock().unwrap() = Some(buf[..n].to_vec());
                HandlerResult::Closed
            }
            _ => HandlerResult::Open,
        }
    }
}

#[test]
fn plain_read_once_closes_after_single_read() {
    let config = EndpointConfig::new("127.0.0.1:0".parse().unwrap())
        .poller_threads(1)
        .worker_threads(2);

    let handler = Arc::new(OnceHandler {
        seen: Mutex::new(None),
        saw_open_read: AtomicBool::new(false),
    });

    let mut endpoint = Endpoint::bind(config, handler.clone()).unwrap();
    let addr = endpoint.local_addr();
    endpoint.start().unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"hello").unwrap();

    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(n, 0, "server should close the connection after the handler returns Closed");

    endpoint.stop();

    assert!(handler.saw_open_read.load(Ordering::Relaxed));
    assert_eq!(handler.seen.lock().unwrap().as_deref(), Some(b"hello".as_slice()));
}
