//! 流式拷贝使用的缓冲区池

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// 默认缓冲区大小（256KB）
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// 有界缓冲区池
///
/// 最多保留 `max_idle` 个空闲缓冲区，超出的归还会被直接丢弃。
/// 每次借出都是独占的，直到 [`PooledBuffer`] 被 drop 才归还。
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
    buf_size: usize,
}

impl BufferPool {
    pub fn new(max_idle: usize, buf_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::with_capacity(max_idle)),
                max_idle,
                buf_size: buf_size.max(1),
            }),
        }
    }

    /// 借出一个缓冲区（长度固定为 buf_size）
    pub fn checkout(&self) -> PooledBuffer {
        let reused = self
            .inner
            .idle
            .lock()
            .map(|mut idle| idle.pop())
            .unwrap_or(None);

        let buf = reused.unwrap_or_else(|| vec![0u8; self.inner.buf_size]);

        PooledBuffer {
            buf: Some(buf),
            pool: self.inner.clone(),
        }
    }

    /// 当前空闲缓冲区数量
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(8, DEFAULT_BUFFER_SIZE)
    }
}

/// 借出的缓冲区，drop 时自动归还
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(buf) = self.buf.take() else {
            return;
        };
        if buf.len() != self.pool.buf_size {
            return;
        }
        if let Ok(mut idle) = self.pool.idle.lock() {
            if idle.len() < self.pool.max_idle {
                idle.push(buf);
            }
        }
    }
}
