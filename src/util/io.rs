use std::io;

use indicatif::ProgressBar;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Copies `reader` into `writer` until end of stream, `chunk_size` bytes at
/// a time, flushing after every chunk. Returns the number of bytes copied.
pub async fn copy_chunked<R, W>(reader: &mut R, writer: &mut W, chunk_size: usize, progress: &ProgressBar) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total += n as u64;
        progress.inc(n as u64);
    }

    Ok(total)
}
