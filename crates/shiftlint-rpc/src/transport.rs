use rustls::pki_types::ServerName;
use rustls::{ClientConnection, RootCertStore, StreamOwned};
use shiftlint_provider::{Error, ProviderConfig, Result};
use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a remote provider is reached.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// `host:port`
    Tcp(String),
    /// `unix:/path/to.sock`
    Unix(PathBuf),
    /// Spawned child process spoken to over stdin/stdout.
    Stdio { command: String, args: Vec<String> },
}

impl Endpoint {
    /// Derive the endpoint from a provider's settings: an explicit address
    /// wins; a binary path means a stdio child; neither means in-process.
    pub fn from_config(config: &ProviderConfig) -> Result<Option<Endpoint>> {
        if let Some(address) = &config.address {
            if let Some(path) = address.strip_prefix("unix:") {
                return Ok(Some(Endpoint::Unix(PathBuf::from(path))));
            }
            if !address.contains(':') {
                return Err(Error::Config(format!(
                    "provider {:?}: address {:?} is neither host:port nor unix:path",
                    config.name, address
                )));
            }
            return Ok(Some(Endpoint::Tcp(address.clone())));
        }
        if let Some(binary) = &config.binary_path {
            let mut parts = binary.split_whitespace();
            let command = parts
                .next()
                .ok_or_else(|| Error::Config(format!("provider {:?}: empty binaryPath", config.name)))?
                .to_string();
            return Ok(Some(Endpoint::Stdio {
                command,
                args: parts.map(|s| s.to_string()).collect(),
            }));
        }
        Ok(None)
    }
}

/// An established duplex connection, split into independently-owned read
/// and write halves so a reader thread can run beside writers.
pub struct Connection {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    /// Present for stdio endpoints; must be waited on at stop.
    pub child: Option<Child>,
}

/// Open a connection to an endpoint, wrapping TCP in TLS when a CA
/// certificate is configured.
pub fn dial(endpoint: &Endpoint, tls_ca: Option<&std::path::Path>) -> Result<Connection> {
    match endpoint {
        Endpoint::Tcp(address) => {
            let stream = TcpStream::connect(address)
                .map_err(|e| Error::Transport(format!("connect {}: {}", address, e)))?;
            match tls_ca {
                Some(ca) => dial_tls(stream, address, ca),
                None => {
                    let reader = stream
                        .try_clone()
                        .map_err(|e| Error::Transport(e.to_string()))?;
                    Ok(Connection {
                        reader: Box::new(reader),
                        writer: Box::new(stream),
                        child: None,
                    })
                }
            }
        }
        Endpoint::Unix(path) => {
            #[cfg(unix)]
            {
                let stream = std::os::unix::net::UnixStream::connect(path)
                    .map_err(|e| Error::Transport(format!("connect {}: {}", path.display(), e)))?;
                let reader = stream
                    .try_clone()
                    .map_err(|e| Error::Transport(e.to_string()))?;
                Ok(Connection {
                    reader: Box::new(reader),
                    writer: Box::new(stream),
                    child: None,
                })
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                Err(Error::Transport(
                    "unix sockets are not supported on this platform".to_string(),
                ))
            }
        }
        Endpoint::Stdio { command, args } => {
            let mut child = Command::new(command)
                .args(args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .spawn()
                .map_err(|e| Error::Init(format!("spawn {:?}: {}", command, e)))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| Error::Init("child stdout unavailable".to_string()))?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| Error::Init("child stdin unavailable".to_string()))?;
            Ok(Connection {
                reader: Box::new(stdout),
                writer: Box::new(stdin),
                child: Some(child),
            })
        }
    }
}

fn dial_tls(stream: TcpStream, address: &str, ca: &std::path::Path) -> Result<Connection> {
    let mut roots = RootCertStore::empty();
    let file = std::fs::File::open(ca)
        .map_err(|e| Error::Transport(format!("read ca cert {}: {}", ca.display(), e)))?;
    for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
        let cert = cert.map_err(|e| Error::Transport(format!("bad ca cert: {}", e)))?;
        roots
            .add(cert)
            .map_err(|e| Error::Transport(format!("bad ca cert: {}", e)))?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let host = address.rsplit_once(':').map(|(h, _)| h).unwrap_or(address);
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::Transport(format!("bad server name {:?}: {}", host, e)))?;
    let conn = ClientConnection::new(Arc::new(config), server_name)
        .map_err(|e| Error::Transport(format!("tls handshake: {}", e)))?;

    // Short read timeouts let the shared-stream halves interleave without
    // a reader holding the lock across a blocking read.
    stream
        .set_read_timeout(Some(Duration::from_millis(100)))
        .map_err(|e| Error::Transport(e.to_string()))?;
    let (reader, writer) = split_shared(StreamOwned::new(conn, stream));
    Ok(Connection {
        reader,
        writer,
        child: None,
    })
}

/// Split a stream that cannot be cloned (TLS) into lock-sharing halves.
/// The underlying socket must carry a read timeout so the reader never
/// holds the lock across an indefinite block.
pub fn split_shared<S>(stream: S) -> (Box<dyn Read + Send>, Box<dyn Write + Send>)
where
    S: Read + Write + Send + 'static,
{
    let shared = Arc::new(Mutex::new(stream));
    (
        Box::new(SharedReadHalf {
            inner: shared.clone(),
        }),
        Box::new(SharedWriteHalf { inner: shared }),
    )
}

struct SharedReadHalf<S> {
    inner: Arc<Mutex<S>>,
}

impl<S: Read> Read for SharedReadHalf<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let result = {
                let mut guard = self.inner.lock().expect("shared stream poisoned");
                guard.read(buf)
            };
            match result {
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    std::thread::sleep(Duration::from_millis(2));
                }
                other => return other,
            }
        }
    }
}

struct SharedWriteHalf<S> {
    inner: Arc<Mutex<S>>,
}

impl<S: Write> Write for SharedWriteHalf<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().expect("shared stream poisoned").write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.lock().expect("shared stream poisoned").flush()
    }
}
