pub mod format;
pub mod value;
pub mod writer;
pub mod reader;
pub mod host;
pub mod receipt;
pub mod cache;
pub mod batch;
pub mod config;

pub use value::{Value, ValueMap};
pub use writer::{Writer, EncodeError};
pub use reader::{Reader, DecodeError, DEFAULT_MAX_DEPTH};
pub use receipt::{Receipt, ReceiptError, pack_flat_array, unpack_batch};
pub use cache::{CacheError, CacheHandle, DirStore, ReceiptStore};
pub use batch::{BatchError, BatchSender, SendReport, UploadOutcome, Uploader};
pub use config::Config;
