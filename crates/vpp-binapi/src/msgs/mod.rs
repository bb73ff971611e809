//! Message definitions, grouped by API module.
//!
//! Each struct is one wire message; `NAME` is the schema name without CRC.
//! Dialect differences are handled inside `encode`/`decode`.

pub mod interface;
pub mod ip;
pub mod memclnt;
pub mod punt;
