//! Cache module for memoizing expensive calls on disk
//!
//! Results are stored as one file per call in a flat directory, named
//! `{fingerprint}_{timestamp}.cache`. The filename is the whole index: lookups
//! list the directory, and entries older than the configured TTL are deleted
//! as they are encountered.

mod codec;
mod config;
mod error;
mod key;
mod memoize;
mod store;

pub use codec::{
    decode_filename, decode_payload, decode_timestamp, encode_filename, encode_payload,
    encode_timestamp, DecodeError, EntryName, ParseError, CACHE_SUFFIX,
};
pub use config::{CacheConfig, DEFAULT_CACHE_DIR, DEFAULT_MAX_AGE};
pub use error::{CacheError, MemoError, ReadError};
pub use key::{derive_key, CallArgs, Fingerprint};
pub use memoize::{CachedValue, Memoized, Memoizer};
pub use store::{Clock, ListedEntry, ManualClock, Store, SystemClock, STALE_PARTIAL_AFTER};
