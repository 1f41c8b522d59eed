use std::sync::Arc;
use std::time::Duration;

use cinder_engine::{EngineHandle, EngineOptions, EventHandler};
use cinder_examples::keys::{self, KeyMaterial};
use cinder_examples::{EchoServer, HELLO_RESPONSE, HelloHttpServer, TlsSettings, frame, selftest};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

const IO_TIMEOUT: Duration = Duration::from_secs(10);

fn material() -> KeyMaterial {
    keys::self_signed(&["localhost".to_owned()]).expect("self-signed certificate")
}

fn start<H: EventHandler>(handler: H, material: Option<&KeyMaterial>) -> EngineHandle {
    let tls = material.map(|m| TlsSettings::default().build(m).expect("tls config"));
    cinder_tls::start(
        handler,
        "tcp://127.0.0.1:0",
        tls,
        EngineOptions::default().with_shards(2),
    )
    .expect("server starts")
}

async fn stop(handle: EngineHandle) {
    handle.shutdown();
    tokio::task::spawn_blocking(move || handle.wait())
        .await
        .expect("join blocking task")
        .expect("engine exits cleanly");
}

async fn tls_client(
    handle: &EngineHandle,
    material: &KeyMaterial,
) -> tokio_rustls::client::TlsStream<TcpStream> {
    let config = selftest::client_config(&material.chain).expect("client config");
    let socket = TcpStream::connect(handle.local_addr()).await.expect("connect");
    let name = ServerName::try_from("localhost").expect("server name");
    timeout(IO_TIMEOUT, TlsConnector::from(config).connect(name, socket))
        .await
        .expect("handshake in time")
        .expect("handshake succeeds")
}

async fn echo_hello_world<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> Vec<u8> {
    let request = frame::encode(b"HelloWorld");
    stream.write_all(&request).await.expect("write frame");
    stream.flush().await.expect("flush");
    let mut reply = vec![0u8; request.len()];
    timeout(IO_TIMEOUT, stream.read_exact(&mut reply))
        .await
        .expect("reply in time")
        .expect("read reply");
    reply
}

#[tokio::test(flavor = "multi_thread")]
async fn hello_world_echo_over_tls() {
    let material = material();
    let handle = start(EchoServer::new(), Some(&material));

    let mut stream = tls_client(&handle, &material).await;
    let reply = echo_hello_world(&mut stream).await;
    assert_eq!(reply, frame::encode(b"HelloWorld"));
    assert_eq!(&reply[4..], b"HelloWorld");

    let second = echo_hello_world(&mut stream).await;
    assert_eq!(second, reply);
    drop(stream);
    stop(handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pass_through_without_tls_is_byte_identical() {
    let handle = start(EchoServer::new(), None);
    let mut stream = TcpStream::connect(handle.local_addr()).await.expect("connect");
    let reply = echo_hello_world(&mut stream).await;
    assert_eq!(reply, frame::encode(b"HelloWorld"));
    drop(stream);
    stop(handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn https_responder_answers_after_the_header_block() {
    let material = material();
    let handle = start(HelloHttpServer, Some(&material));
    let mut stream = tls_client(&handle, &material).await;

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n")
        .await
        .expect("write head");
    stream.flush().await.expect("flush");
    stream.write_all(b"\r\n").await.expect("write terminator");
    stream.flush().await.expect("flush");

    let mut response = vec![0u8; HELLO_RESPONSE.len()];
    timeout(IO_TIMEOUT, stream.read_exact(&mut response))
        .await
        .expect("response in time")
        .expect("read response");
    assert_eq!(response, HELLO_RESPONSE);
    drop(stream);
    stop(handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn plaintext_client_is_disconnected_by_a_tls_server() {
    let material = material();
    let handle = start(HelloHttpServer, Some(&material));
    let mut stream = TcpStream::connect(handle.local_addr()).await.expect("connect");
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .expect("write request");

    let mut received = Vec::new();
    let outcome = timeout(IO_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .expect("server closes in time");
    if outcome.is_ok() {
        assert!(!received.starts_with(b"HTTP"), "no plaintext response leaks");
    }
    drop(stream);
    stop(handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn many_clients_share_the_shards() {
    let material = Arc::new(material());
    let handle = Arc::new(start(EchoServer::new(), Some(material.as_ref())));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let handle = Arc::clone(&handle);
        let material = Arc::clone(&material);
        tasks.push(tokio::spawn(async move {
            let mut stream = tls_client(&handle, &material).await;
            echo_hello_world(&mut stream).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.expect("client task"), frame::encode(b"HelloWorld"));
    }

    let handle = Arc::into_inner(handle).expect("sole owner");
    stop(handle).await;
}
