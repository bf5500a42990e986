//! Artifact promotion for Gantry.
//!
//! Packages a job instance's build output, compresses it into a
//! reproducible archive and attaches it to a tagged release.

pub mod archiver;
pub mod naming;
pub mod pipeline;
pub mod publisher;

pub use naming::{archive_name, artifact_name, sanitize};
pub use pipeline::{PromotionGates, PromotionPipeline, PromotionRequest};
pub use publisher::{FilesystemReleaseStore, InMemoryReleaseStore};
