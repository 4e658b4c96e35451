//! TLS Integration
//!
//! Bridges rustls with the sequenced control channel: a [`TlsSession`] is a
//! rustls client or server connection adapted to the [`SslEngine`] byte-pump
//! contract the stack engine drives.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, Connection, RootCertStore, ServerConfig, ServerConnection};

use crate::ssl::{SslEngine, SslStatus};
use crate::{ProtocolError, Result};

/// rustls-backed SSL engine for the control channel
pub struct TlsSession {
    /// Client or server connection
    conn: Connection,
    /// Ciphertext received from the peer, awaiting TLS record processing
    incoming: BytesMut,
    /// Ciphertext produced by rustls, awaiting transmission
    outgoing: BytesMut,
    /// Whether the handshake has completed
    handshake_complete: bool,
}

impl TlsSession {
    /// Create a client-side session
    pub fn client(config: Arc<ClientConfig>, server_name: &str) -> Result<Self> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| ProtocolError::Ssl(e.to_string()))?;
        let conn = ClientConnection::new(config, name)
            .map_err(|e| ProtocolError::Ssl(e.to_string()))?;
        Ok(Self::from_connection(Connection::Client(conn)))
    }

    /// Create a server-side session
    pub fn server(config: Arc<ServerConfig>) -> Result<Self> {
        let conn = ServerConnection::new(config)
            .map_err(|e| ProtocolError::Ssl(e.to_string()))?;
        Ok(Self::from_connection(Connection::Server(conn)))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            incoming: BytesMut::with_capacity(16384),
            outgoing: BytesMut::with_capacity(16384),
            handshake_complete: false,
        }
    }

    /// Whether the handshake has completed
    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// Whether the connection is still handshaking
    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// Get peer certificates if available
    pub fn peer_certificates(&self) -> Option<Vec<CertificateDer<'static>>> {
        self.conn
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
    }

    /// Get negotiated cipher suite name
    pub fn cipher_suite(&self) -> Option<&'static str> {
        self.conn
            .negotiated_cipher_suite()
            .map(|cs| cs.suite().as_str().unwrap_or("unknown"))
    }

    /// Feed buffered ciphertext through rustls record processing
    fn process_tls(&mut self) -> Result<()> {
        while !self.incoming.is_empty() {
            let mut reader = &self.incoming[..];
            match self.conn.read_tls(&mut reader) {
                Ok(0) => break,
                Ok(n) => {
                    // Remove consumed data
                    let _ = self.incoming.split_to(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(ProtocolError::Ssl(e.to_string())),
            }

            match self.conn.process_new_packets() {
                Ok(_state) => {
                    if !self.handshake_complete && !self.conn.is_handshaking() {
                        self.handshake_complete = true;
                    }
                }
                Err(e) => return Err(ProtocolError::Ssl(e.to_string())),
            }
        }
        Ok(())
    }
}

impl SslEngine for TlsSession {
    fn start_handshake(&mut self) -> Result<()> {
        // rustls begins the handshake at connection creation; the first
        // read_ciphertext pulls the initial flight
        Ok(())
    }

    fn write_cleartext(&mut self, buf: &[u8]) -> Result<SslStatus> {
        let mut writer = self.conn.writer();
        match writer.write(buf) {
            Ok(n) => Ok(SslStatus::Ready(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(SslStatus::WouldBlock),
            Err(e) => Err(ProtocolError::Ssl(e.to_string())),
        }
    }

    fn ciphertext_ready(&self) -> bool {
        self.conn.wants_write()
    }

    fn read_ciphertext(&mut self) -> Result<Option<Bytes>> {
        self.outgoing.clear();
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut VecWriter(&mut self.outgoing)) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(ProtocolError::Ssl(e.to_string())),
            }
        }
        if self.outgoing.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.outgoing.split().freeze()))
        }
    }

    fn write_ciphertext(&mut self, buf: &[u8]) -> Result<()> {
        self.incoming.extend_from_slice(buf);
        self.process_tls()
    }

    fn read_cleartext(&mut self, buf: &mut [u8]) -> Result<SslStatus> {
        let mut reader = self.conn.reader();
        match reader.read(buf) {
            Ok(n) => Ok(SslStatus::Ready(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(SslStatus::WouldBlock),
            Err(e) => Err(ProtocolError::Ssl(e.to_string())),
        }
    }
}

/// Helper to write to BytesMut
struct VecWriter<'a>(&'a mut BytesMut);

impl<'a> Write for VecWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Create TLS server config from certificates and key
pub fn create_server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_cert_verifier: Option<Arc<dyn rustls::server::danger::ClientCertVerifier>>,
) -> Result<Arc<ServerConfig>> {
    let config = if let Some(verifier) = client_cert_verifier {
        ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(cert_chain, key)
            .map_err(|e| ProtocolError::Ssl(e.to_string()))?
    } else {
        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| ProtocolError::Ssl(e.to_string()))?
    };

    Ok(Arc::new(config))
}

/// Create TLS client config trusting the given roots
pub fn create_client_config(roots: RootCertStore) -> Arc<ClientConfig> {
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Load certificate chain from PEM
pub fn load_certs_from_pem(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut certs = Vec::new();
    for cert in rustls_pemfile::certs(&mut pem.as_bytes()) {
        match cert {
            Ok(c) => certs.push(c),
            Err(e) => return Err(ProtocolError::Ssl(format!("failed to parse cert: {}", e))),
        }
    }
    Ok(certs)
}

/// Load private key from PEM
pub fn load_key_from_pem(pem: &str) -> Result<PrivateKeyDer<'static>> {
    // Try PKCS8 first, then RSA, then EC
    for item in rustls_pemfile::read_all(&mut pem.as_bytes()) {
        match item {
            Ok(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Ok(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Ok(rustls_pemfile::Item::Sec1Key(key)) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }
    Err(ProtocolError::Ssl("no private key found in PEM".into()))
}
