//! A TLS connection completes its handshake and exchanges one
//! request/response before the handler closes it.
//!
//! The client side drives a bare `rustls::ClientConnection` with a
//! certificate verifier that accepts the self-signed test certificate,
//! following the same "dangerous, test-only verifier" shape as
//! `other_examples/c33a3044_warpy-ai-script__src-runtime-async-tls.rs.rs`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme};

use nio_endpoint::{
    ensure_crypto_provider, ConnectionWrapper, Endpoint, EndpointConfig, Handler, HandlerResult, ReadOutcome,
    SocketEvent, TlsConfig,
};

#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

struct EchoCloseHandler;

impl Handler for EchoCloseHandler {
    fn process(&self, wrapper: &Arc<ConnectionWrapper>, event: SocketEvent) -> HandlerResult {
        if event != SocketEvent::OpenRead {
            return HandlerResult::Open;
        }
        let mut buf = [0u8; 64];
        let mut channel = wrapper.channel();
        match channel.read(&mut buf) {
            Ok(ReadOutcome::Read(n)) => {
                let _ = channel.write(&buf[..n]);
                let _ = channel.flush_outbound();
                HandlerResult::Closed
            }
            _ => HandlerResult::Open,
        }
    }
}

fn write_self_signed_cert() -> (std::path::PathBuf, std::path::PathBuf) {
    let cert_key = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let unique = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let dir = std::env::temp_dir();
    let cert_path = dir.join(format!("nio-endpoint-test-{unique}-cert.pem"));
    let key_path = dir.join(format!("nio-endpoint-test-{unique}-key.pem"));
    std::fs::write(&cert_path, cert_key.cert.pem()).unwrap();
    std::fs::write(&key_path, cert_key.key_pair.serialize_pem()).unwrap();
    (cert_path, key_path)
}

#[test]
fn tls_handshake_completes_and_echoes_one_request() {
    ensure_crypto_provider();

    let (cert_path, key_path) = write_self_signed_cert();

    let tls = TlsConfig {
        cert_chain_path: cert_path.clone(),
        private_key_path: key_path.clone(),
        require_client_auth: false,
    };

    let config = EndpointConfig::new("127.0.0.1:0".parse().unwrap())
        .poller_threads(1)
        .worker_threads(2)
        .tls_config(tls);

    let handler = Arc::new(EchoCloseHandler);
    let mut endpoint = Endpoint::bind(config, handler).unwrap();
    let addr = endpoint.local_addr();
    endpoint.start().unwrap();

    let client_config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();
    let server_name = ServerName::try_from("localhost").unwrap();
    let conn = ClientConnection::new(Arc::new(client_config), server_name).unwrap();

    let sock = TcpStream::connect(addr).unwrap();
    sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut tls_stream = rustls::StreamOwned::new(conn, sock);
    tls_stream.write_all(b"ping").unwrap();

    let mut buf = [0u8; 4];
    tls_stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    assert!(!tls_stream.conn.is_handshaking());

    // The server closed the connection after echoing; the next read should
    // observe either a clean TLS close-notify (Ok(0)) or the underlying
    // socket going away.
    let mut trailing = [0u8; 1];
    let _ = tls_stream.read(&mut trailing);

    endpoint.stop();

    let _ = std::fs::remove_file(&cert_path);
    let _ = std::fs::remove_file(&key_path);
}
