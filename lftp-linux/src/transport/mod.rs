//! Transfer transport: header and byte-stream primitives over any async stream,
//! plus the TCP server and client built on them.

pub mod client;
pub mod progress;
pub mod server;

use lftp_core::wire::{decode_auth, decode_header, MAX_FILENAME_LEN};
use lftp_core::{
    AuthHeader, Command, Error, FilesystemError, ProtocolError, Result, TransferHeader,
    AUTH_HEADER_LEN, HEADER_LEN,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use progress::Progress;

/// Bytes moved per read/write while streaming file contents.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Read until `buf` is full or EOF. Returns bytes read.
async fn read_full<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

pub async fn write_header<W: AsyncWrite + Unpin>(w: &mut W, header: &TransferHeader) -> Result<()> {
    w.write_all(&header.encode()).await?;
    Ok(())
}

/// `Ack`/`Nak` with no size and no filename.
pub async fn write_response<W: AsyncWrite + Unpin>(w: &mut W, command: Command) -> Result<()> {
    write_header(w, &TransferHeader::response(command)).await?;
    w.flush().await?;
    Ok(())
}

/// Next header, or `None` when the peer closed cleanly between messages.
pub async fn read_header<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<TransferHeader>> {
    let mut buf = [0u8; HEADER_LEN];
    let n = read_full(r, &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(decode_header(&buf[..n])?))
}

/// Like [`read_header`] but EOF is an error.
pub async fn expect_header<R: AsyncRead + Unpin>(r: &mut R) -> Result<TransferHeader> {
    read_header(r).await?.ok_or_else(|| {
        ProtocolError::ShortRead {
            expected: HEADER_LEN,
            got: 0,
        }
        .into()
    })
}

pub async fn write_auth<W: AsyncWrite + Unpin>(w: &mut W, header: &AuthHeader) -> Result<()> {
    w.write_all(&header.encode()).await?;
    w.flush().await?;
    Ok(())
}

pub async fn read_auth<R: AsyncRead + Unpin>(r: &mut R) -> Result<AuthHeader> {
    let mut buf = [0u8; AUTH_HEADER_LEN];
    let n = read_full(r, &mut buf).await?;
    Ok(decode_auth(&buf[..n])?)
}

/// Raw filename bytes following a header; no terminator on the wire.
pub async fn read_filename<R: AsyncRead + Unpin>(r: &mut R, len: u16) -> Result<String> {
    let len = usize::from(len);
    if len == 0 || len > MAX_FILENAME_LEN {
        return Err(ProtocolError::FilenameLength(len).into());
    }
    let mut buf = vec![0u8; len];
    let n = read_full(r, &mut buf).await?;
    if n < len {
        return Err(ProtocolError::ShortRead { expected: len, got: n }.into());
    }
    String::from_utf8(buf).map_err(|_| ProtocolError::FilenameNotUtf8.into())
}

/// Copy exactly `size` bytes from the stream into `file`.
///
/// EOF before `size` bytes is a short read; the partial file stays on disk.
pub async fn receive_to_file<R, F>(
    r: &mut R,
    file: &mut F,
    size: u64,
    progress: &mut dyn Progress,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    F: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received: u64 = 0;
    while received < size {
        let want = (size - received).min(CHUNK_SIZE as u64) as usize;
        let n = r.read(&mut buf[..want]).await?;
        if n == 0 {
            let _ = file.flush().await;
            return Err(ProtocolError::ShortRead {
                expected: size as usize,
                got: received as usize,
            }
            .into());
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|e| Error::Filesystem(FilesystemError::Io(e)))?;
        received += n as u64;
        progress.advance(received, size);
    }
    file.flush()
        .await
        .map_err(|e| Error::Filesystem(FilesystemError::Io(e)))?;
    progress.finish();
    Ok(())
}

/// Stream exactly `size` bytes of `file` to the peer.
pub async fn send_from_file<W, F>(
    w: &mut W,
    file: &mut F,
    size: u64,
    progress: &mut dyn Progress,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    F: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    while sent < size {
        let want = (size - sent).min(CHUNK_SIZE as u64) as usize;
        let n = file
            .read(&mut buf[..want])
            .await
            .map_err(|e| Error::Filesystem(FilesystemError::Io(e)))?;
        if n == 0 {
            // File shrank after it was measured.
            return Err(Error::Filesystem(FilesystemError::Io(
                std::io::ErrorKind::UnexpectedEof.into(),
            )));
        }
        w.write_all(&buf[..n]).await?;
        sent += n as u64;
        progress.advance(sent, size);
    }
    w.flush().await?;
    progress.finish();
    Ok(())
}
