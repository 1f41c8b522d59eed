#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use cinder_engine::{Action, CloseCause, Conn, EventHandler, MemoryConn};
use cinder_tls::{
    HandshakeState, TlsConfig, TlsConfigBuilder, TlsError, TlsWrapper, handshake_state,
};
use rustls::crypto::aws_lc_rs;
use rustls::{ClientConfig, ClientConnection, RootCertStore, SupportedProtocolVersion};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};

struct Material {
    config: TlsConfig,
    cert: CertificateDer<'static>,
    key: Vec<u8>,
}

fn material() -> &'static Material {
    static MATERIAL: OnceLock<Material> = OnceLock::new();
    MATERIAL.get_or_init(|| {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()])
            .expect("generate certificate");
        let cert = certified.cert.der().clone();
        let key = certified.key_pair.serialize_der();
        let config = TlsConfig::builder()
            .certificate(vec![cert.clone()], pkcs8(&key))
            .build()
            .expect("server config");
        Material { config, cert, key }
    })
}

fn pkcs8(der: &[u8]) -> PrivateKeyDer<'static> {
    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der.to_vec()))
}

pub fn server_config() -> TlsConfig {
    material().config.clone()
}

/// 与 [`server_config`] 共用证书的构建器，用于定制 ALPN、超时等参数。
pub fn server_builder() -> TlsConfigBuilder {
    let material = material();
    TlsConfig::builder().certificate(vec![material.cert.clone()], pkcs8(&material.key))
}

pub fn client_config(versions: &[&'static SupportedProtocolVersion]) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.add(material().cert.clone()).expect("trust anchor");
    let config = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_protocol_versions(versions)
        .expect("client versions")
        .with_root_certificates(roots)
        .with_no_client_auth();
    Arc::new(config)
}

pub fn default_client() -> Arc<ClientConfig> {
    client_config(rustls::DEFAULT_VERSIONS)
}

/// 记录明文、生命周期与关闭原因的应用；`echo` 为真时回写收到的明文。
#[derive(Default)]
pub struct RecordingApp {
    pub echo: bool,
    pub opens: AtomicUsize,
    pub received: Mutex<Vec<u8>>,
    pub closes: Mutex<Vec<Option<CloseCause>>>,
}

impl RecordingApp {
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }

    pub fn close_causes(&self) -> Vec<Option<String>> {
        self.closes
            .lock()
            .unwrap()
            .iter()
            .map(|cause| cause.as_ref().map(|c| c.to_string()))
            .collect()
    }

    /// 最近一次关闭原因对应的 TLS 错误码。
    pub fn last_close_code(&self) -> Option<&'static str> {
        let closes = self.closes.lock().unwrap();
        let cause = closes.last()?.as_ref()?;
        cause.downcast_ref::<TlsError>().map(TlsError::code)
    }
}

impl EventHandler for RecordingApp {
    fn on_open(&self, _conn: &mut dyn Conn) -> Action {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Action::None
    }

    fn on_traffic(&self, conn: &mut dyn Conn) -> Action {
        let n = conn.inbound_buffered();
        let Some(bytes) = conn.next(n) else {
            return Action::None;
        };
        self.received.lock().unwrap().extend_from_slice(&bytes);
        if self.echo {
            conn.write(&bytes).expect("echo write");
        }
        Action::None
    }

    fn on_close(&self, _conn: &mut dyn Conn, cause: Option<CloseCause>) -> Action {
        self.closes.lock().unwrap().push(cause);
        Action::None
    }
}

/// 内存中的“客户端 ↔ 包装器”对接：客户端是真实的 rustls 客户端，
/// 服务端由 `MemoryConn` 承载，字节可以按任意粒度投递。
pub struct Harness<H: EventHandler> {
    pub wrapper: TlsWrapper<H>,
    pub conn: MemoryConn,
    pub client: ClientConnection,
}

impl<H: EventHandler> Harness<H> {
    pub fn new(app: H, config: TlsConfig, client: Arc<ClientConfig>) -> Self {
        let wrapper = TlsWrapper::new(app, config);
        let mut conn = MemoryConn::memory(1);
        assert_eq!(wrapper.on_open(&mut conn), Action::None);
        let name = ServerName::try_from("localhost").expect("server name");
        let client = ClientConnection::new(client, name).expect("client connection");
        Self {
            wrapper,
            conn,
            client,
        }
    }

    pub fn app(&self) -> &H {
        self.wrapper.inner()
    }

    pub fn state(&self) -> Option<HandshakeState> {
        handshake_state(&self.conn)
    }

    /// 取出客户端待发送的全部 TLS 字节。
    pub fn client_output(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while self.client.wants_write() {
            self.client.write_tls(&mut out).expect("client write_tls");
        }
        out
    }

    /// 按 `chunk` 字节切分投递给包装器；遇到非 `None` 动作立即返回。
    pub fn deliver(&mut self, bytes: &[u8], chunk: usize) -> Action {
        for piece in bytes.chunks(chunk.max(1)) {
            self.conn.push_inbound(piece);
            let action = self.wrapper.on_traffic(&mut self.conn);
            if action != Action::None {
                return action;
            }
        }
        Action::None
    }

    /// 把服务端出站字节交给客户端处理，返回字节数。
    pub fn to_client(&mut self) -> Result<usize, rustls::Error> {
        let bytes = self.conn.take_outbound();
        let mut slice = &bytes[..];
        while !slice.is_empty() {
            self.client
                .read_tls(&mut slice)
                .expect("client read_tls");
            self.client.process_new_packets()?;
        }
        Ok(bytes.len())
    }

    /// 完成握手，每次投递 `chunk` 字节。
    pub fn handshake(&mut self, chunk: usize) {
        for _ in 0..16 {
            let out = self.client_output();
            assert_eq!(self.deliver(&out, chunk), Action::None);
            let back = self.to_client().expect("client accepts server flight");
            if out.is_empty() && back == 0 && !self.client.is_handshaking() {
                break;
            }
        }
        assert!(!self.client.is_handshaking());
        assert_eq!(self.state(), Some(HandshakeState::Complete));
    }

    pub fn client_send(&mut self, plaintext: &[u8]) -> Vec<u8> {
        self.client.writer().write_all(plaintext).expect("client write");
        self.client_output()
    }

    /// 读取客户端已解密的全部明文。
    pub fn client_plaintext(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match self.client.reader().read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => panic!("client read failed: {err}"),
            }
        }
        out
    }

    pub fn close(&mut self) {
        self.wrapper.on_close(&mut self.conn, None);
    }
}

/// 4 字节小端总长度前缀（含头部）+ 负载。
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let total = (payload.len() + 4) as u32;
    let mut out = total.to_le_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}
