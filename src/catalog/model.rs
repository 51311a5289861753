//! Catalog records.

use std::fmt;

use serde::Serialize;

use crate::storage::{Key, Timestamp};

/// Primary key of an album: `AlbumId` is unique only within its singer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlbumKey {
    pub singer_id: i64,
    pub album_id: i64,
}

impl AlbumKey {
    pub const fn new(singer_id: i64, album_id: i64) -> Self {
        Self {
            singer_id,
            album_id,
        }
    }
}

impl fmt::Display for AlbumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.singer_id, self.album_id)
    }
}

impl From<AlbumKey> for Key {
    fn from(key: AlbumKey) -> Self {
        Key::from((key.singer_id, key.album_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Singer {
    pub singer_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub singer_info: Option<Vec<u8>>,
}

impl Singer {
    pub fn new(singer_id: i64, first_name: &str, last_name: &str) -> Self {
        Self {
            singer_id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            singer_info: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub key: AlbumKey,
    pub title: String,
}

impl Album {
    pub fn new(singer_id: i64, album_id: i64, title: &str) -> Self {
        Self {
            key: AlbumKey::new(singer_id, album_id),
            title: title.to_string(),
        }
    }
}

/// One row of the recent-albums listing.
///
/// `None` means the value is absent: a budget that was never set, or a column
/// the schema does not have yet. It is never conflated with zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlbumSummary {
    pub singer_id: i64,
    pub album_id: i64,
    pub marketing_budget: Option<i64>,
    pub last_update_time: Option<Timestamp>,
}

impl AlbumSummary {
    pub fn key(&self) -> AlbumKey {
        AlbumKey::new(self.singer_id, self.album_id)
    }
}
