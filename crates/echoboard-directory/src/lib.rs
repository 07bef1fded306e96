//! Project/slug directory and single-use token store.
//!
//! # Purpose
//! The consistency-critical core of the echoboard backend: a directory
//! mapping human-readable slugs (subdomains and custom domains) to projects,
//! optimistically-concurrent project configuration, a safe slug-rename
//! protocol with a timed grace window, and single-use verification tokens.
//! REST resources and billing glue live elsewhere and call in through the
//! traits in [`store`].
//!
//! # Notes
//! All cross-entity consistency is pushed down to the conditional-write
//! primitives of [`echoboard_kv`]; no in-process lock is ever held across
//! two backend round-trips.
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod schema;
pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, saturating at zero on a misconfigured clock.
pub(crate) fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}
