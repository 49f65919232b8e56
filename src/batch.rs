//! Resend flow: cached receipts → one upload body → cleanup.
//!
//! 1. List cached receipts (newest first, bounded).
//! 2. For each: load, unpack, bump the attempt counter, re-pack and write
//!    back, then frame the new bytes as a batch element.  A receipt that
//!    fails any step is logged and left out; the others continue.
//! 3. Pack all elements into one flat array and hand it to an [`Uploader`].
//! 4. Only when the upload is accepted are the listed cache entries deleted,
//!    including any that were left out as unreadable.
//!
//! [`BatchSender::preview`] runs step 2 without writing back, so inspecting
//! the next body does not count as an attempt.
//!
//! Receipts are recorded and read back under the same nesting bound, so a
//! receipt that could never be decoded is refused at `record` instead of
//! being cached and later dropped unsent.

use thiserror::Error;

use crate::cache::{CacheError, ReceiptStore};
use crate::reader::DEFAULT_MAX_DEPTH;
use crate::receipt::{frame_cached, pack_flat_array, Receipt, ReceiptError};

/// Version of the receipt body layout, sent alongside each upload.
pub const PROTOCOL_VERSION: &str = "1.0.0";
pub const HEADER_PROTOCOL_VERSION: &str = "x-batch-protocol-version";
pub const HEADER_EXT_VERSION: &str = "x-batch-ext-version";
pub const EXT_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-rust");

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Receipt error: {0}")]
    Receipt(#[from] ReceiptError),
    #[error("Upload error: {0}")]
    Upload(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted,
    Rejected { status: u16 },
}

impl UploadOutcome {
    /// 2xx and 3xx count as accepted.
    pub fn from_status(status: u16) -> Self {
        if (200..=399).contains(&status) {
            UploadOutcome::Accepted
        } else {
            UploadOutcome::Rejected { status }
        }
    }
}

/// Transport for a packed batch body.
pub trait Uploader {
    fn upload(&self, body: &[u8]) -> Result<UploadOutcome, BatchError>;
}

/// A batch body plus the cache entries it was built from.
#[derive(Debug, Clone)]
pub struct PreparedBatch<H> {
    /// Every listed entry, readable or not.
    pub handles:  Vec<H>,
    /// Number of receipts in `body`.
    pub receipts: usize,
    pub body:     Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendReport {
    /// No readable receipt in the cache.
    Empty,
    Sent { receipts: usize, deleted: usize },
    Rejected { receipts: usize, status: u16 },
}

pub struct BatchSender<S> {
    store:     S,
    max_depth: usize,
}

impl<S: ReceiptStore> BatchSender<S> {
    pub fn new(store: S) -> Self {
        Self::with_max_depth(store, DEFAULT_MAX_DEPTH)
    }

    /// Sender whose receipts may nest up to `max_depth` containers.
    pub fn with_max_depth(store: S, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Pack a freshly received receipt into the cache.
    pub fn record(&self, receipt: &Receipt) -> Result<S::Handle, BatchError> {
        let data = receipt.pack()?;
        Receipt::ensure_readable(&data, self.max_depth)?;
        Ok(self.store.store(&data)?)
    }

    /// Build the next upload body, counting it as a send attempt.
    /// Returns `None` when nothing is readable.
    pub fn prepare(&self) -> Result<Option<PreparedBatch<S::Handle>>, BatchError> {
        self.build(true)
    }

    /// The body `prepare` would build, leaving the cache untouched.
    pub fn preview(&self) -> Result<Option<PreparedBatch<S::Handle>>, BatchError> {
        self.build(false)
    }

    fn build(&self, write_back: bool) -> Result<Option<PreparedBatch<S::Handle>>, BatchError> {
        let handles = self.store.list_cached()?;
        let mut elements = Vec::with_capacity(handles.len());

        for handle in &handles {
            match self.refresh(handle, write_back) {
                Ok(element) => elements.push(element),
                Err(e) => tracing::warn!("skipping cached receipt {handle}: {e}"),
            }
        }

        if elements.is_empty() {
            tracing::debug!("no readable receipt among {} cached", handles.len());
            return Ok(None);
        }

        let body = pack_flat_array(&elements)?;
        Ok(Some(PreparedBatch { handles, receipts: elements.len(), body }))
    }

    /// Bump one cached receipt and return its batch element.
    fn refresh(&self, handle: &S::Handle, write_back: bool) -> Result<Vec<u8>, BatchError> {
        let data = self.store.load(handle)?;
        let mut receipt = Receipt::unpack_with(&data, self.max_depth)?;
        receipt.bump_attempt();
        let packed = receipt.pack()?;
        if write_back {
            self.store.overwrite(handle, &packed)?;
        }
        Ok(frame_cached(&packed)?)
    }

    /// Delete every entry of an accepted batch.  Returns how many went.
    pub fn commit(&self, batch: &PreparedBatch<S::Handle>) -> usize {
        let mut deleted = 0;
        for handle in &batch.handles {
            match self.store.delete(handle) {
                Ok(()) => deleted += 1,
                Err(e) => tracing::warn!("failed to delete sent receipt {handle}: {e}"),
            }
        }
        deleted
    }

    /// Prepare, upload, and clean up on acceptance.
    pub fn send<U: Uploader>(&self, uploader: &U) -> Result<SendReport, BatchError> {
        let Some(batch) = self.prepare()? else {
            return Ok(SendReport::Empty);
        };

        match uploader.upload(&batch.body)? {
            UploadOutcome::Accepted => {
                let deleted = self.commit(&batch);
                tracing::info!("sent {} receipt(s), deleted {deleted} cache entries", batch.receipts);
                Ok(SendReport::Sent { receipts: batch.receipts, deleted })
            }
            UploadOutcome::Rejected { status } => {
                tracing::warn!("receipt upload rejected with status {status}, keeping cache");
                Ok(SendReport::Rejected { receipts: batch.receipts, status })
            }
        }
    }
}
