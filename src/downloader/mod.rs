//! Download side of the crawl, split into focused submodules.
//!
//! - [`staging`] - The run's staging directory and relocation out of it
//! - [`task`] - One link's download with retry and existence check
//! - [`batch`] - Bounded concurrent execution of a page's links

pub mod batch;
pub mod staging;
pub mod task;

pub use batch::download_all;
pub use staging::StagingDirectory;
pub use task::{ClaimSet, DownloadContext, attempt_download};
