//! Backfill pipeline: scan → collect keys → resolve → update.
//!
//! Each stage lives in its own module; [`pipeline::run_backfill`] drives
//! them in order against any [`backfill_storage::DocumentStore`].

pub mod keys;
pub mod pipeline;
pub mod resolver;
pub mod scanner;
pub mod updater;

#[cfg(test)]
pub(crate) mod testing;
