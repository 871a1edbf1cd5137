//! Telegram → Discord bridge with a human approval gate, plus shift schedule queries.
//!
//! Source messages (albums reassembled) are posted to a Discord review channel; a ✅ from a
//! reviewer publishes them to the final channel. Slash commands answer from a scraped schedule.

pub mod approval;
pub mod bridge;
pub mod channels;
pub mod config;
pub mod delivery;
pub mod feed;
pub mod media;
pub mod review;
pub mod routing;
pub mod schedule;
