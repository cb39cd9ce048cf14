mod feeds;
mod posts;
mod schema;
mod store;
mod types;

pub use schema::Database;
pub use store::FeedStore;
pub use types::{CacheValidators, Feed, NewFeed, NewPost, Post, StoreError};
