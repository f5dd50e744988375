//! Blocking line-oriented socket shared by the IMAP and POP3 clients.
//!
//! Everything here blocks; callers run it inside `spawn_blocking`.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;

/// Socket read timeout. A hung server releases the blocking thread after this.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Plain TCP or rustls-wrapped TCP.
pub enum MailStream {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Read for MailStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            Self::Tls(s) => s.read(buf),
        }
    }
}

impl Write for MailStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            Self::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            Self::Tls(s) => s.flush(),
        }
    }
}

/// Open a connection to `host:port`, optionally over TLS with the webpki roots.
pub fn connect_stream(host: &str, port: u16, tls: bool) -> Result<MailStream, TransportError> {
    let unreachable = |reason: String| TransportError::Connect {
        server: format!("{host}:{port}"),
        reason,
    };

    let tcp = TcpStream::connect((host, port)).map_err(|e| unreachable(e.to_string()))?;
    tcp.set_read_timeout(Some(READ_TIMEOUT))?;

    if !tls {
        return Ok(MailStream::Plain(tcp));
    }

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| unreachable(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| unreachable(e.to_string()))?;
    Ok(MailStream::Tls(Box::new(rustls::StreamOwned::new(conn, tcp))))
}

/// Buffered reader/writer over a [`MailStream`].
pub struct Wire {
    reader: BufReader<MailStream>,
}

impl Wire {
    pub fn new(stream: MailStream) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Send one command line; CRLF is appended.
    pub fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        Ok(())
    }

    /// Read one line including its terminator.
    pub fn read_line_bytes(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Err(TransportError::Closed);
        }
        Ok(buf)
    }

    /// Read one line as text, without its terminator.
    pub fn read_line(&mut self) -> Result<String, TransportError> {
        let buf = self.read_line_bytes()?;
        Ok(String::from_utf8_lossy(&buf)
            .trim_end_matches(['\r', '\n'])
            .to_string())
    }

    /// Read exactly `len` bytes of literal data.
    pub fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(e),
        })?;
        Ok(buf)
    }
}
