//! The `Commands` capability: uniform low-level primitives over a KV
//! substrate, with a Redis-backed implementation and an embedded one.

mod commands;
mod embedded;
mod redis_commands;
mod sorted_set;

pub use commands::Commands;
pub use embedded::EmbeddedCommands;
pub use redis_commands::RedisCommands;
