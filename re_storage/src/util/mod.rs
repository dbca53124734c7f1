pub mod digest;
pub mod retry;

pub use digest::{compute_digest, verify_digest, DigestInfo};
pub use retry::{retry_with_backoff, RetryPolicy};
