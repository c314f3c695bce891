//! 进程内字节管道：打包端写入，上传端读取
//!
//! 基于 `tokio::io::duplex`，缓冲区写满后写端挂起，直到读端消费，
//! 因此内存占用只取决于管道容量，与对象大小无关。

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

/// 默认管道容量（1MB）
pub const DEFAULT_PIPE_CAPACITY: usize = 1024 * 1024;

/// 创建一对相连的写端和读端
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (writer, reader) = tokio::io::duplex(capacity.max(1));
    let finished = Arc::new(AtomicBool::new(false));
    (
        PipeWriter {
            inner: writer,
            finished: finished.clone(),
        },
        PipeReader {
            inner: reader,
            finished,
        },
    )
}

/// 管道写端
///
/// 必须调用 [`PipeWriter::finish`] 才算正常结束；
/// 未 finish 就被 drop 时，读端会收到错误而不是 EOF。
#[derive(Debug)]
pub struct PipeWriter {
    inner: DuplexStream,
    finished: Arc<AtomicBool>,
}

impl PipeWriter {
    /// 标记数据已完整写入并关闭写端
    pub async fn finish(mut self) -> io::Result<()> {
        self.finished.store(true, Ordering::Release);
        self.inner.shutdown().await
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// 管道读端
#[derive(Debug)]
pub struct PipeReader {
    inner: DuplexStream,
    finished: Arc<AtomicBool>,
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;

        let eof = buf.filled().len() == before && buf.remaining() > 0;
        if eof && !self.finished.load(Ordering::Acquire) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "归档流在打包完成前中断",
            )));
        }
        Poll::Ready(Ok(()))
    }
}
