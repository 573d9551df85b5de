//! Tracedown core library: turns recorded browser-automation trace archives
//! into Markdown reports plus renderable HTML snapshots.

mod archive;
mod assets;
mod config;
mod error;
mod export;
mod ingest;
mod markdown;
mod model;
mod snapshot;
mod tree;

pub use archive::*;
pub use assets::*;
pub use config::*;
pub use error::*;
pub use export::*;
pub use ingest::*;
pub use markdown::*;
pub use model::*;
pub use snapshot::*;
pub use tree::*;
