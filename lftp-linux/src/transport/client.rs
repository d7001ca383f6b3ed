//! Transfer client: one connection per operation, authenticate, one request, close.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use lftp_core::path::{contained_path, final_component};
use lftp_core::{
    Command, Credentials, Error, FilesystemError, ProtocolError, Result, Session, TransferHeader,
};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::progress::Progress;
use super::{
    expect_header, read_auth, read_filename, receive_to_file, send_from_file, write_auth,
    write_header, write_response,
};

/// Upload a local file. The peer stores it under its root by basename.
/// Returns the number of bytes sent.
pub async fn put_file(
    path: &Path,
    peer: SocketAddr,
    credentials: Option<&Credentials>,
    progress: &mut dyn Progress,
) -> Result<u64> {
    let size = local_size(path).await?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FilesystemError::NotRegularFile(path.to_path_buf()))?;
    let mut file = File::open(path).await.map_err(FilesystemError::Io)?;

    let (mut stream, mut session) = connect(peer, credentials).await?;
    let header = session.request(Command::PutFile, size, name)?;
    write_header(&mut stream, &header).await?;
    stream.write_all(name.as_bytes()).await?;
    info!("sending {name} ({size} bytes) to {peer}");
    if let Err(e) = send_from_file(&mut stream, &mut file, u64::from(size), progress).await {
        session.fail();
        return Err(e);
    }

    let reply = expect_header(&mut stream).await?;
    if reply.command != Command::Ack {
        session.fail();
        return Err(ProtocolError::Rejected.into());
    }
    session.complete()?;
    info!("upload of {name} acknowledged by {peer}");
    Ok(u64::from(size))
}

/// Download `name` from the peer's root into `dest_dir`, named after the final
/// component of the name the peer echoes back. Returns the written path.
pub async fn get_file(
    name: &str,
    peer: SocketAddr,
    credentials: Option<&Credentials>,
    dest_dir: &Path,
    progress: &mut dyn Progress,
) -> Result<PathBuf> {
    let (mut stream, mut session) = connect(peer, credentials).await?;
    let header = session.request(Command::GetFile, 0, name)?;
    write_header(&mut stream, &header).await?;
    stream.write_all(name.as_bytes()).await?;
    stream.flush().await?;

    let reply = expect_header(&mut stream).await?;
    match reply.command {
        Command::GetFile => {}
        Command::Nak => {
            session.fail();
            return Err(ProtocolError::Rejected.into());
        }
        other => {
            session.fail();
            return Err(ProtocolError::UnexpectedCommand(other).into());
        }
    }
    match receive_download(&mut stream, &reply, dest_dir, peer, progress).await {
        Ok(path) => {
            write_response(&mut stream, Command::Ack).await?;
            session.complete()?;
            Ok(path)
        }
        Err(e) => {
            session.fail();
            let _ = write_response(&mut stream, Command::Nak).await;
            Err(e)
        }
    }
}

/// Name and body following the server's `GetFile` header. Any error here is
/// answered with `Nak` by the caller.
async fn receive_download(
    stream: &mut TcpStream,
    reply: &TransferHeader,
    dest_dir: &Path,
    peer: SocketAddr,
    progress: &mut dyn Progress,
) -> Result<PathBuf> {
    let remote_name = read_filename(stream, reply.filename_len).await?;
    let local_name = final_component(&remote_name)
        .ok_or_else(|| FilesystemError::NotRegularFile(PathBuf::from(&remote_name)))?;
    let path = contained_path(dest_dir, local_name).map_err(FilesystemError::from)?;
    let mut file = File::create(&path).await.map_err(FilesystemError::Io)?;

    info!(
        "receiving {remote_name} ({} bytes) from {peer} into {}",
        reply.filesize,
        path.display()
    );
    receive_to_file(stream, &mut file, u64::from(reply.filesize), progress).await?;
    Ok(path)
}

/// Size of a local regular file, checked before any connection is made.
async fn local_size(path: &Path) -> Result<u32> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FilesystemError::NotFound(path.to_path_buf()).into())
        }
        Err(e) => return Err(FilesystemError::Io(e).into()),
    };
    if !meta.is_file() {
        return Err(FilesystemError::NotRegularFile(path.to_path_buf()).into());
    }
    u32::try_from(meta.len()).map_err(|_| FilesystemError::TooLarge(meta.len()).into())
}

/// Connect and authenticate. Without credentials, empty ones are sent.
async fn connect(
    peer: SocketAddr,
    credentials: Option<&Credentials>,
) -> Result<(TcpStream, Session)> {
    let mut stream = TcpStream::connect(peer).await?;
    let mut session = Session::new();
    let (user, pass) = credentials.map_or(("", ""), |c| (c.username.as_str(), c.password.as_str()));
    let request = session.auth_request(user, pass)?;
    write_auth(&mut stream, &request).await?;
    let response = read_auth(&mut stream).await?;
    if !session.on_auth_response(&response)? {
        debug!("authentication rejected by {peer}");
        return Err(Error::Auth);
    }
    debug!("authenticated with {peer}");
    Ok((stream, session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::progress::Silent;
    use crate::transport::server::{ServerOptions, TransferServer};
    use std::net::{IpAddr, Ipv4Addr};

    struct Fixture {
        server: TransferServer,
        addr: SocketAddr,
        root: tempfile::TempDir,
        local: tempfile::TempDir,
    }

    async fn fixture(credentials: Option<Credentials>) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let server = TransferServer::new();
        let addr = server
            .start(ServerOptions {
                bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 0,
                root: Some(root.path().to_path_buf()),
                credentials,
            })
            .await
            .unwrap();
        Fixture {
            server,
            addr,
            root,
            local,
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 253) as u8).collect()
    }

    #[tokio::test]
    async fn put_then_get_spanning_chunks() {
        let f = fixture(None).await;
        let data = pattern(200_000);
        let src = f.local.path().join("report.bin");
        std::fs::write(&src, &data).unwrap();

        let sent = put_file(&src, f.addr, None, &mut Silent).await.unwrap();
        assert_eq!(sent, 200_000);
        assert_eq!(std::fs::read(f.root.path().join("report.bin")).unwrap(), data);

        let out = tempfile::tempdir().unwrap();
        let got = get_file("report.bin", f.addr, None, out.path(), &mut Silent)
            .await
            .unwrap();
        assert_eq!(got, out.path().join("report.bin"));
        assert_eq!(std::fs::read(got).unwrap(), data);
        f.server.stop().await;
    }

    #[tokio::test]
    async fn empty_file_round_trip() {
        let f = fixture(None).await;
        let src = f.local.path().join("empty");
        std::fs::write(&src, b"").unwrap();
        assert_eq!(put_file(&src, f.addr, None, &mut Silent).await.unwrap(), 0);

        let out = tempfile::tempdir().unwrap();
        let got = get_file("empty", f.addr, None, out.path(), &mut Silent)
            .await
            .unwrap();
        assert_eq!(std::fs::metadata(got).unwrap().len(), 0);
        f.server.stop().await;
    }

    #[tokio::test]
    async fn nested_remote_name_lands_flat_locally() {
        let f = fixture(None).await;
        std::fs::create_dir(f.root.path().join("docs")).unwrap();
        std::fs::write(f.root.path().join("docs/a.txt"), b"nested").unwrap();

        let got = get_file("docs/a.txt", f.addr, None, f.local.path(), &mut Silent)
            .await
            .unwrap();
        assert_eq!(got, f.local.path().join("a.txt"));
        assert_eq!(std::fs::read(got).unwrap(), b"nested");
        f.server.stop().await;
    }

    #[tokio::test]
    async fn credentials_checked() {
        let creds = Credentials::new("admin", "s3cret");
        let f = fixture(Some(creds.clone())).await;
        let src = f.local.path().join("a.txt");
        std::fs::write(&src, b"hi").unwrap();

        put_file(&src, f.addr, Some(&creds), &mut Silent).await.unwrap();

        std::fs::remove_file(f.root.path().join("a.txt")).unwrap();
        let wrong = Credentials::new("admin", "guess");
        for attempt in [Some(&wrong), None] {
            let err = put_file(&src, f.addr, attempt, &mut Silent).await.unwrap_err();
            assert!(matches!(err, Error::Auth), "{err}");
        }
        assert!(!f.root.path().join("a.txt").exists());

        let err = get_file("a.txt", f.addr, Some(&wrong), f.local.path(), &mut Silent)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth));
        f.server.stop().await;
    }

    #[tokio::test]
    async fn anonymous_server_ignores_presented_credentials() {
        let f = fixture(None).await;
        let src = f.local.path().join("a.txt");
        std::fs::write(&src, b"hi").unwrap();
        let any = Credentials::new("whoever", "whatever");
        put_file(&src, f.addr, Some(&any), &mut Silent).await.unwrap();
        f.server.stop().await;
    }

    #[tokio::test]
    async fn local_checks_happen_before_connecting() {
        // Nothing listens on this port once the listener is gone.
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let dir = tempfile::tempdir().unwrap();

        let err = put_file(&dir.path().join("nope"), addr, None, &mut Silent)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Filesystem(FilesystemError::NotFound(_))));

        let err = put_file(dir.path(), addr, None, &mut Silent).await.unwrap_err();
        assert!(matches!(err, Error::Filesystem(FilesystemError::NotRegularFile(_))));
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let dir = tempfile::tempdir().unwrap();
        let err = get_file("x", addr, None, dir.path(), &mut Silent)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn missing_remote_file_rejected() {
        let f = fixture(None).await;
        let err = get_file("ghost.txt", f.addr, None, f.local.path(), &mut Silent)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::Rejected)));
        assert!(!f.local.path().join("ghost.txt").exists());
        f.server.stop().await;
    }

    /// Single-connection peer that answers a GET with `announced` bytes under
    /// `echo`, sends `body`, half-closes, and reports the client's final reply.
    async fn scripted_download_peer(
        echo: &'static str,
        announced: u32,
        body: &'static [u8],
    ) -> (SocketAddr, tokio::task::JoinHandle<Option<Command>>) {
        use crate::transport::read_header;
        use lftp_core::AuthHeader;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            read_auth(&mut s).await.unwrap();
            write_auth(&mut s, &AuthHeader::response(true)).await.unwrap();
            let req = expect_header(&mut s).await.unwrap();
            read_filename(&mut s, req.filename_len).await.unwrap();

            let header = TransferHeader::new(Command::GetFile, announced, echo.len() as u16);
            write_header(&mut s, &header).await.unwrap();
            s.write_all(echo.as_bytes()).await.unwrap();
            s.write_all(body).await.unwrap();
            s.shutdown().await.unwrap();
            read_header(&mut s).await.unwrap().map(|h| h.command)
        });
        (addr, task)
    }

    #[tokio::test]
    async fn truncated_download_answered_with_nak() {
        let (addr, peer) = scripted_download_peer("a.bin", 10, b"12345").await;
        let dir = tempfile::tempdir().unwrap();
        let err = get_file("a.bin", addr, None, dir.path(), &mut Silent)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::ShortRead { expected: 10, got: 5 })
        ));
        assert_eq!(peer.await.unwrap(), Some(Command::Nak));
        // Partial data stays on disk.
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"12345");
    }

    #[tokio::test]
    async fn unusable_echoed_name_answered_with_nak() {
        let (addr, peer) = scripted_download_peer("..", 0, b"").await;
        let dir = tempfile::tempdir().unwrap();
        let err = get_file("x", addr, None, dir.path(), &mut Silent)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Filesystem(_)));
        assert_eq!(peer.await.unwrap(), Some(Command::Nak));
    }

    #[tokio::test]
    async fn complete_download_answered_with_ack() {
        let (addr, peer) = scripted_download_peer("docs/ok.txt", 2, b"ok").await;
        let dir = tempfile::tempdir().unwrap();
        let path = get_file("docs/ok.txt", addr, None, dir.path(), &mut Silent)
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("ok.txt"));
        assert_eq!(peer.await.unwrap(), Some(Command::Ack));
    }

    #[tokio::test]
    async fn concurrent_sessions_independent() {
        let f = fixture(None).await;
        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let src = f.local.path().join(format!("f{i}.bin"));
            std::fs::write(&src, vec![i; 10_000 + usize::from(i)]).unwrap();
            let addr = f.addr;
            tasks.push(tokio::spawn(async move {
                put_file(&src, addr, None, &mut Silent).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        for i in 0..8u8 {
            let body = std::fs::read(f.root.path().join(format!("f{i}.bin"))).unwrap();
            assert_eq!(body, vec![i; 10_000 + usize::from(i)]);
        }
        f.server.stop().await;
    }
}
