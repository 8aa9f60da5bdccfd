use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use crate::error::RunnerError;
use crate::util::RingBytes;

/// Copy `rd` into `ring` until EOF. Resolves to the number of bytes read.
pub fn pump<R>(
    mut rd: R,
    ring: Arc<RingBytes>,
    label: &'static str,
) -> JoinHandle<Result<u64, RunnerError>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        let mut total = 0u64;

        loop {
            let n = rd.read(&mut buf).await.map_err(|e| RunnerError::StreamIo {
                stream: label,
                source: e,
            })?;
            if n == 0 {
                break;
            }
            ring.push(&buf[..n]);
            total += n as u64;
        }

        tracing::trace!(stream = label, bytes = total, "stream closed");
        Ok(total)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn keeps_tail_and_counts_all_bytes() {
        let (mut wr, rd) = tokio::io::duplex(64);
        let ring = RingBytes::new(4);

        let task = pump(rd, ring.clone(), "stdout");
        wr.write_all(b"converged").await.unwrap();
        drop(wr);

        assert_eq!(task.await.unwrap().unwrap(), 9);
        assert_eq!(ring.to_string_lossy(), "rged");
    }
}
