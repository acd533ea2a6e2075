//! Core logic for an automated new-pages-feed reviewer.
//!
//! The bot walks a wiki's unreviewed feed, checks that pages nominated for
//! deletion discussion were actually filed on the forum's dated log page,
//! marks the complete ones reviewed, and keeps a deduplicated JSON log of
//! the incomplete ones on the wiki itself.

pub mod api;
pub mod config;
pub mod matcher;
pub mod onwiki_log;
pub mod queue;
pub mod review;
pub mod title;
pub mod verify;

#[cfg(test)]
mod testing;
