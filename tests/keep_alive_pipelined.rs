//! A keep-alive connection serves two requests before closing, exercising
//! the re-registration path between requests.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nio_endpoint::{ConnectionWrapper, Endpoint, EndpointConfig, Handler, HandlerResult, ReadOutcome, SocketEvent};

struct PipelinedHandler {
    requests_seen: AtomicUsize,
}

impl Handler for PipelinedHandler {
    fn process(&self, wrapper: &Arc<ConnectionWrapper>, event: SocketEvent) -> HandlerResult {
        if event != SocketEvent::OpenRead {
            return HandlerResult::Open;
        }

        let mut buf = [0u8; 64];
        let mut channel = wrapper.channel();
        match channel.read(&mut buf) {
            Ok(ReadOutcome::Read(_)) => {
                let count = self.requests_seen.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = channel.write(format!("ack{count}\n").as_bytes());
                drop(channel);
                if count >= 2 {
                    HandlerResult::Closed
                } else {
                    HandlerResult::Open
                }
            }
            Ok(ReadOutcome::Eof) => HandlerResult::Closed,
            _ => HandlerResult::Open,
        }
    }
}

#[test]
fn keep_alive_serves_two_requests_then_closes() {
    let config = EndpointConfig::new("127.0.0.1:0".parse().unwrap())
        .poller_threads(1)
        .worker_threads(2);

    let handler = Arc::new(PipelinedHandler {
        requests_seen: AtomicUsize::new(0),
    });

    let mut endpoint = Endpoint::bind(config, handler.clone()).unwrap();
    let addr = endpoint.local_addr();
    endpoint.start().unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    client.write_all(b"req1\n").unwrap();
    let mut ack1 = [0u8; 5];
    client.read_exact(&mut ack1).unwrap();
    assert_eq!(&ack1, b"ack1\n");

    client.write_all(b"req2\n").unwrap();
    let mut ack2 = [0u8; 5];
    client.read_exact(&mut ack2).unwrap();
    assert_eq!(&ack2, b"ack2\n");

    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(n, 0, "connection should close once the keep-alive budget is exhausted");

    endpoint.stop();

    assert_eq!(handler.requests_seen.load(Ordering::SeqCst), 2);
}
