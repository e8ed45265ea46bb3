//! The harvesting engine: per-identifier workflow, multi-transport
//! downloader, OA resolution, structuring, publication and reporting.

pub mod cord19;
pub mod dispatch;
pub mod download;
pub mod lookup;
pub mod objectstore;
pub mod publish;
pub mod report;
pub mod resolve;
pub mod resources;
pub mod structure;
pub mod thumbnail;
pub mod workflow;

pub use workflow::{Harvester, HarvestOptions};
