//! Transfer server: one acceptor task, one task per connection.
//!
//! Each connection gets a [`SessionConfig`] snapshot taken when the server
//! started, so `stop` (or a later restart with other settings) never changes
//! what an in-flight session sees. Stopping only ends the acceptor; live
//! sessions drain when their peer disconnects.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lftp_core::path::contained_path;
use lftp_core::{
    AuthHeader, Command, Credentials, Dispatch, Error, FilesystemError, ProtocolError, Result,
    Session, TransferHeader,
};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::Silent;
use super::{
    expect_header, read_auth, read_filename, read_header, receive_to_file, send_from_file,
    write_auth, write_header, write_response,
};

/// Pause after a failed accept (e.g. out of descriptors) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind: IpAddr,
    pub port: u16,
    /// Defaults to the working directory.
    pub root: Option<PathBuf>,
    /// `None` means anonymous access.
    pub credentials: Option<Credentials>,
}

impl ServerOptions {
    pub fn new(port: u16) -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            root: None,
            credentials: None,
        }
    }
}

/// Immutable view a connection handler works against.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Canonical root directory.
    pub root: PathBuf,
    pub credentials: Option<Credentials>,
}

/// What `status` reports about a running server.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub local_addr: SocketAddr,
    pub root: PathBuf,
    pub authenticated: bool,
}

struct Running {
    local_addr: SocketAddr,
    config: SessionConfig,
    cancel: CancellationToken,
    acceptor: JoinHandle<()>,
}

/// At most one running instance; start/stop serialized by one lock.
#[derive(Default)]
pub struct TransferServer {
    state: Mutex<Option<Running>>,
}

impl TransferServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate root, bind, spawn the acceptor. Returns the bound address.
    pub async fn start(&self, opts: ServerOptions) -> Result<SocketAddr> {
        let mut state = self.state.lock().await;
        if let Some(running) = state.as_ref() {
            return Err(Error::AlreadyRunning(running.local_addr.port()));
        }
        let root = resolve_root(opts.root).await?;
        let listener = TcpListener::bind((opts.bind, opts.port)).await?;
        let local_addr = listener.local_addr()?;
        let config = SessionConfig {
            root,
            credentials: opts.credentials,
        };
        let cancel = CancellationToken::new();
        let acceptor = tokio::spawn(accept_loop(listener, config.clone(), cancel.clone()));

        info!(
            "transfer server listening on {local_addr}, root {}, {}",
            config.root.display(),
            if config.credentials.is_some() {
                "authentication required"
            } else {
                "anonymous access"
            }
        );
        *state = Some(Running {
            local_addr,
            config,
            cancel,
            acceptor,
        });
        Ok(local_addr)
    }

    /// Stop accepting. Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            return false;
        };
        running.cancel.cancel();
        if let Err(e) = running.acceptor.await {
            warn!("transfer server acceptor ended abnormally: {e}");
        }
        info!("transfer server on {} stopped", running.local_addr);
        true
    }

    pub async fn status(&self) -> Option<ServerStatus> {
        self.state.lock().await.as_ref().map(|r| ServerStatus {
            local_addr: r.local_addr,
            root: r.config.root.clone(),
            authenticated: r.config.credentials.is_some(),
        })
    }
}

async fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    let root = match root {
        Some(p) => {
            match tokio::fs::metadata(&p).await {
                Ok(meta) if meta.is_dir() => {}
                _ => return Err(Error::InvalidRoot(p)),
            }
            p
        }
        None => std::env::current_dir()?,
    };
    tokio::fs::canonicalize(&root)
        .await
        .map_err(|_| Error::InvalidRoot(root))
}

async fn accept_loop(listener: TcpListener, config: SessionConfig, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            r = listener.accept() => match r {
                Ok((stream, peer)) => {
                    info!("new connection from {peer}");
                    let config = config.clone();
                    tokio::spawn(handle_connection(stream, peer, config));
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
    debug!("acceptor exiting, releasing listener");
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, config: SessionConfig) {
    match serve_session(&mut stream, &config).await {
        Ok(()) => info!("connection closed for {peer}"),
        Err(e) => warn!("session with {peer} ended: {e}"),
    }
}

/// Run the acceptor side of the protocol until the peer disconnects or the session fails.
pub async fn serve_session<S>(stream: &mut S, config: &SessionConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session::new();

    let presented = match read_auth(stream).await {
        Ok(h) => h,
        Err(e) => {
            session.fail();
            let _ = write_auth(stream, &AuthHeader::response(false)).await;
            return Err(e);
        }
    };
    let response = session.authenticate(config.credentials.as_ref(), &presented)?;
    write_auth(stream, &response).await?;
    if session.is_failed() {
        return Err(Error::Auth);
    }

    loop {
        session.await_command()?;
        let Some(header) = read_header(stream).await? else {
            return Ok(());
        };
        match session.dispatch(&header)? {
            Dispatch::Upload {
                filesize,
                filename_len,
            } => {
                let name = read_filename(stream, filename_len).await?;
                info!("receiving file: {name} ({filesize} bytes)");
                let (path, mut file) = match open_upload(&config.root, &name).await {
                    Ok(opened) => opened,
                    Err(e) => {
                        warn!("refusing upload of {name}: {e}");
                        drain(stream, u64::from(filesize)).await?;
                        write_response(stream, Command::Nak).await?;
                        session.refuse()?;
                        continue;
                    }
                };
                match receive_to_file(stream, &mut file, u64::from(filesize), &mut Silent).await {
                    Ok(()) => {
                        write_response(stream, Command::Ack).await?;
                        session.complete()?;
                        info!("file received: {}", path.display());
                    }
                    Err(e) => {
                        session.fail();
                        let _ = write_response(stream, Command::Nak).await;
                        return Err(e);
                    }
                }
            }
            Dispatch::Download { filename_len } => {
                let name = read_filename(stream, filename_len).await?;
                info!("sending file: {name}");
                let (path, mut file, size) = match open_download(&config.root, &name).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!("refusing download of {name}: {e}");
                        write_response(stream, Command::Nak).await?;
                        session.refuse()?;
                        continue;
                    }
                };
                let header = TransferHeader::new(Command::GetFile, size, name.len() as u16);
                write_header(stream, &header).await?;
                stream.write_all(name.as_bytes()).await?;
                if let Err(e) =
                    send_from_file(stream, &mut file, u64::from(size), &mut Silent).await
                {
                    session.fail();
                    return Err(e);
                }
                let reply = expect_header(stream).await.inspect_err(|_| session.fail())?;
                if reply.command != Command::Ack {
                    session.fail();
                    return Err(ProtocolError::Rejected.into());
                }
                session.complete()?;
                info!("file sent: {} ({size} bytes)", path.display());
            }
            Dispatch::Reject(command) => {
                warn!("unknown command {command:?}");
                write_response(stream, Command::Nak).await?;
            }
        }
    }
}

/// Resolve and create the destination. Parent directories inside root are created.
async fn open_upload(
    root: &Path,
    name: &str,
) -> std::result::Result<(PathBuf, File), FilesystemError> {
    let path = contained_path(root, name)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(FilesystemError::Io)?;
    }
    let file = File::create(&path).await.map_err(FilesystemError::Io)?;
    Ok((path, file))
}

async fn open_download(
    root: &Path,
    name: &str,
) -> std::result::Result<(PathBuf, File, u32), FilesystemError> {
    let path = contained_path(root, name)?;
    let meta = match tokio::fs::metadata(&path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FilesystemError::NotFound(path))
        }
        Err(e) => return Err(FilesystemError::Io(e)),
    };
    if !meta.is_file() {
        return Err(FilesystemError::NotRegularFile(path));
    }
    let size = u32::try_from(meta.len()).map_err(|_| FilesystemError::TooLarge(meta.len()))?;
    let file = File::open(&path).await.map_err(FilesystemError::Io)?;
    Ok((path, file, size))
}

/// Discard `size` bytes of a refused upload so the stream stays framed.
async fn drain<R: AsyncRead + Unpin>(stream: &mut R, size: u64) -> Result<()> {
    let mut limited = (&mut *stream).take(size);
    let copied = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
    if copied < size {
        return Err(ProtocolError::ShortRead {
            expected: size as usize,
            got: copied as usize,
        }
        .into());
    }
    Ok(())
}
