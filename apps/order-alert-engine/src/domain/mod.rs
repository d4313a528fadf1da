//! Domain layer - Channel-agnostic order and deduplication types.

pub mod dedup;
pub mod order;
