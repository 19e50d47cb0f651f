mod content;
mod feeds;
mod schema;
mod settings;
mod store;
mod types;

pub use schema::Database;
pub use store::{ContentStore, FeedStore, SettingsStore};
pub use types::{
    ContentRecord, DatabaseError, Feed, FeedStatus, FeedValidationError, Frequency, NewFeed,
    NewRecord, PostStatus, JOB_LISTING_POST_TYPE, MAX_FEED_LIMIT,
};
