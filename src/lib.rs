//! Scheduled importer for WhatJobs XML listings.
//!
//! Operators configure recurring searches ([`storage::Feed`]). Each run pulls
//! listings from the upstream API ([`api`]), drops those whose canonical URL
//! was already imported ([`importer`]), and reschedules the feed
//! ([`scheduler`]). Old imports are swept by [`retention`].

pub mod api;
pub mod config;
pub mod importer;
pub mod retention;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod util;
