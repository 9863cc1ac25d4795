//! End-to-end test of the TLS listener with a generated self-signed
//! certificate.

use futures::{SinkExt, StreamExt};
use game_gateway::{
    AccountFactory, ChannelDispatch, DispatchEvent, FrameHeader, GatewayServer, ServerConfig,
    TlsSettings, DEFAULT_TAG,
};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::RootCertStore;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::Message;

fn pem_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn connector(cert: CertificateDer<'static>) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add(cert).unwrap();
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn next_event(events: &mut UnboundedReceiver<DispatchEvent>) -> DispatchEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no dispatch event in time")
        .expect("dispatch channel closed")
}

#[tokio::test]
async fn tls_session_dispatches_and_releases_its_slot() {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let cert_file = pem_file(&generated.cert.pem());
    let key_file = pem_file(&generated.key_pair.serialize_pem());

    let (dispatch, mut events) = ChannelDispatch::new();
    let config = ServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        max_connections: 4,
        min_capacity: 0,
        tls: Some(TlsSettings {
            cert_file: cert_file.path().to_path_buf(),
            key_file: key_file.path().to_path_buf(),
        }),
        ..Default::default()
    };
    let server =
        GatewayServer::new(config, Arc::new(dispatch), Arc::new(AccountFactory)).unwrap();
    let listener = server.bind().unwrap();
    let addr = listener.local_addr();
    tokio::spawn(listener.run());

    let tcp = TcpStream::connect(addr).await.unwrap();
    let tls = connector(generated.cert.der().clone())
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .unwrap();
    let (mut client, _) = tokio_tungstenite::client_async("ws://localhost/", tls)
        .await
        .unwrap();

    let mut bytes = FrameHeader::new(DEFAULT_TAG, 6, 77).encode().to_vec();
    bytes.extend_from_slice(b"secure");
    client.send(Message::binary(bytes)).await.unwrap();

    match next_event(&mut events).await {
        DispatchEvent::Command {
            command_id,
            payload,
            ..
        } => {
            assert_eq!(command_id, 77);
            assert_eq!(&payload[..], b"secure");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(server.admission().current_count(), 1);

    client.close(None).await.unwrap();
    // Drain until the server's close reply so the session sees the close.
    while let Ok(Some(Ok(message))) = timeout(Duration::from_secs(5), client.next()).await {
        if message.is_close() {
            break;
        }
    }

    assert!(matches!(
        next_event(&mut events).await,
        DispatchEvent::SessionClosed { .. }
    ));
    timeout(Duration::from_secs(5), async {
        while server.admission().current_count() != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("slot not released");
    assert_eq!(server.connections().connection_count(), 0);
    server.shutdown();
}
