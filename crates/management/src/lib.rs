//! Campaign system of record.
//!
//! Campaigns are held in DashMap (development); swap to PostgreSQL for
//! production behind the same `CampaignStore` port.

pub mod store;

pub use store::InMemoryCampaignStore;
