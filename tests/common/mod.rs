pub mod storage_harness;

pub use doubles::{CountingStore, FlakyStore, RecordingSink};
pub use storage_harness::StorageHarness;

use bytes::Bytes;
use re_storage::util::compute_digest;
use re_storage::DigestInfo;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn blob(content: &[u8]) -> (DigestInfo, Bytes) {
    (compute_digest(content), Bytes::copy_from_slice(content))
}
