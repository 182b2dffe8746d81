//! Reactive query cache for Tally.
//!
//! This crate provides:
//! - A keyed, observable cache store with staleness tracking, per-key
//!   request generations, and garbage collection of unwatched entries
//! - A normalization layer that turns list-shaped remote payloads into
//!   id-indexed maps with an explicit order array
//!
//! The store is generic over key and value types and carries no domain
//! knowledge; the session layer instantiates it with its own payload enum.

pub mod normalize;
pub mod store;

pub use normalize::{Keyed, Normalized};
pub use store::{CacheEvent, CacheStore, EntrySnapshot, FetchTicket, RefetchPolicy};
