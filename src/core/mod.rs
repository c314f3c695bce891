pub mod archiver;
pub mod buffer;
pub mod comparator;
pub mod engine;
pub mod pipe;
pub mod pipeline;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use archiver::{Archiver, TarArchiver};
pub use buffer::{BufferPool, PooledBuffer};
pub use comparator::{ActionSummary, DiffResult, FileComparator};
pub use engine::{SyncEngine, SyncReport};
pub use pipe::{pipe, PipeReader, PipeWriter};
pub use pipeline::{PipelineOutcome, TransferPipeline};
pub use transfer::{TransferManager, TransferStatus, TransferTask};
