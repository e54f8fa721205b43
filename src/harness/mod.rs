//! Load Harness Module
//!
//! Drives many concurrent reservation attempts against one product and checks the result.
//!
//! ## How a run works
//! 1. **Seed**: the product's shards and global reserve are written in one batch.
//! 2. **Drive**: a fixed pool of workers pulls request numbers from a shared counter; each
//!    request waits a random jitter and then runs one attempt as requester `user_<n>`.
//! 3. **Watch**: a monitor samples every counter on an interval and keeps the lowest value seen.
//! 4. **Report**: outcome counts, final balances and the conservation check
//!    `initial - successes == final`.

pub mod report;
pub mod runner;

pub use report::{HarnessReport, OutcomeCounts};
pub use runner::{HarnessSettings, LoadHarness};
