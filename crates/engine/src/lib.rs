//! Popup decisioning core: campaign selection, impression counting and the
//! write path that mirrors the durable store into the cache.

#![warn(clippy::unwrap_used)]

pub mod decision;
pub mod impressions;
pub mod service;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use decision::DecisionEngine;
pub use impressions::ImpressionRecorder;
pub use service::PopupService;
pub use sync::CacheSynchronizer;
