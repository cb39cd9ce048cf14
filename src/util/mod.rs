//! Utility functions for common operations.
//!
//! - **Text processing**: HTML entity decoding and tag stripping for feed text
//! - **URL validation**: Scheme and host policy for new subscriptions
//!
//! # Examples
//!
//! ```
//! use gator::util::{html_to_text, unescape_html, validate_feed_url};
//!
//! let url = validate_feed_url("https://example.com/feed.xml", false).unwrap();
//! assert_eq!(unescape_html("Q&amp;A"), "Q&A");
//! assert_eq!(html_to_text("<p>Hi</p>"), "Hi");
//! ```

mod text;
mod url_validator;

pub use text::{html_to_text, strip_tags, unescape_html};
pub use url_validator::{validate_feed_url, UrlValidationError};
