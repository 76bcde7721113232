//! A handler starts a zero-copy sendfile transfer of a 10 MiB file and
//! the full, uncorrupted payload arrives at the client before the
//! connection closes.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nio_endpoint::{
    ConnectionWrapper, Endpoint, EndpointConfig, Handler, HandlerResult, KeepAlivePolicy, ReadOutcome,
    SocketEvent, SocketProperties,
};

const PAYLOAD_LEN: usize = 10 * 1024 * 1024;

fn payload_byte(i: usize) -> u8 {
    (i % 251) as u8
}

fn write_payload_file() -> std::path::PathBuf {
    let unique = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let path = std::env::temp_dir().join(format!("nio-endpoint-sendfile-test-{unique}.bin"));
    let mut file = std::fs::File::create(&path).unwrap();
    let mut buf = vec![0u8; PAYLOAD_LEN];
    for (i, b) in buf.iter_mut().enumerate() {
        *b = payload_byte(i);
    }
    file.write_all(&buf).unwrap();
    path
}

struct SendfileHandler {
    payload_path: std::path::PathBuf,
    started: AtomicBool,
}

impl Handler for SendfileHandler {
    fn process(&self, wrapper: &Arc<ConnectionWrapper>, event: SocketEvent) -> HandlerResult {
        if event != SocketEvent::OpenRead {
            return HandlerResult::Open;
        }
        let mut buf = [0u8; 64];
        let mut channel = wrapper.channel();
        match channel.read(&mut buf) {
            Ok(ReadOutcome::Read(_)) => {
                drop(channel);
                if !self.started.swap(true, Ordering::SeqCst) {
                    let file = std::fs::File::open(&self.payload_path).unwrap();
                    let len = file.metadata().unwrap().len();
                    wrapper.start_sendfile(file, 0, len);
                }
                HandlerResult::Open
            }
            _ => HandlerResult::Open,
        }
    }
}

#[test]
fn sendfile_transfers_full_payload_then_closes() {
    let payload_path = write_payload_file();

    let mut socket_props = SocketProperties::default();
    socket_props.keep_alive_policy = KeepAlivePolicy::None;

    let config = EndpointConfig::new("127.0.0.1:0".parse().unwrap())
        .poller_threads(1)
        .worker_threads(2)
        .socket_properties(socket_props);

    let handler = Arc::new(SendfileHandler {
        payload_path: payload_path.clone(),
        started: AtomicBool::new(false),
    });

    let mut endpoint = Endpoint::bind(config, handler).unwrap();
    let addr = endpoint.local_addr();
    endpoint.start().unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(30))).unwrap();
    client.write_all(b"start").unwrap();

    let mut received = Vec::with_capacity(PAYLOAD_LEN);
    let mut buf = [0u8; 64 * 1024];
    loop {
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => received.extend_from_slice(&buf[..n]),
            Err(e) => panic!("read error: {e}"),
        }
        if received.len() >= PAYLOAD_LEN {
            break;
        }
    }

    endpoint.stop();
    let _ = std::fs::remove_file(&payload_path);

    assert_eq!(received.len(), PAYLOAD_LEN);
    assert!(received.iter().enumerate().all(|(i, &b)| b == payload_byte(i)));
}
