#![warn(clippy::unwrap_used)]

pub mod client;
pub mod keys;
pub mod local;

pub use client::RedisCampaignCache;
pub use local::LocalCampaignCache;
