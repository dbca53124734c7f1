//! Messages from `build/bazel/remote/execution/v2/remote_execution.proto`
//! that the storage engine reads or writes.
//!
//! Only the subset needed to store Action Cache entries and walk the CAS
//! digests they reference is declared here. Field tags follow the upstream
//! proto, so bytes encoded by a real Remote Execution client decode cleanly
//! and unknown fields are skipped.

pub mod build {
    pub mod bazel {
        pub mod remote {
            pub mod execution {
                pub mod v2 {
                    include!("remote_execution.rs");
                }
            }
        }
    }
}
