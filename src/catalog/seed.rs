//! Blind writes: fixture data and marketing budget overwrites.
//!
//! Nothing here reads before writing. Each call is one atomic batch.

use super::model::{Album, AlbumKey, Singer};
use super::{
    Result, StoreContext, ALBUMS, ALBUM_ID, ALBUM_TITLE, FIRST_NAME, LAST_NAME, LAST_UPDATE_TIME,
    MARKETING_BUDGET, SINGERS, SINGER_ID, SINGER_INFO,
};
use crate::storage::{Client, Mutation, Timestamp, Value};

/// Budgets written before the startup transfer.
pub const DEFAULT_BUDGETS: [(AlbumKey, i64); 2] = [
    (AlbumKey::new(1, 1), 100_000),
    (AlbumKey::new(2, 2), 500_000),
];

pub fn fixture_singers() -> Vec<Singer> {
    vec![
        Singer::new(1, "Marc", "Richards"),
        Singer::new(2, "Catalina", "Smith"),
        Singer::new(3, "Alice", "Trentor"),
        Singer::new(4, "Lea", "Martin"),
        Singer::new(5, "David", "Lomond"),
    ]
}

pub fn fixture_albums() -> Vec<Album> {
    vec![
        Album::new(1, 1, "Total Junk"),
        Album::new(1, 2, "Go, Go, Go"),
        Album::new(2, 1, "Green"),
        Album::new(2, 2, "Forever Hold Your Peace"),
        Album::new(2, 3, "Terrified"),
    ]
}

fn singer_mutation(singer: &Singer) -> Mutation {
    let mut columns = vec![SINGER_ID, FIRST_NAME, LAST_NAME];
    let mut values = vec![
        Value::Int64(singer.singer_id),
        Value::from(singer.first_name.as_str()),
        Value::from(singer.last_name.as_str()),
    ];
    if let Some(info) = &singer.singer_info {
        columns.push(SINGER_INFO);
        values.push(Value::Bytes(info.clone()));
    }
    Mutation::insert_or_update(SINGERS, &columns, values)
}

fn album_mutation(album: &Album) -> Mutation {
    Mutation::insert_or_update(
        ALBUMS,
        &[SINGER_ID, ALBUM_ID, ALBUM_TITLE, LAST_UPDATE_TIME],
        vec![
            Value::Int64(album.key.singer_id),
            Value::Int64(album.key.album_id),
            Value::from(album.title.as_str()),
            Value::CommitTimestamp,
        ],
    )
}

/// Insert or overwrite `singers` and `albums` in one batch.
///
/// Singers precede their albums in the batch. Every album's `LastUpdateTime`
/// is the batch's commit timestamp.
pub async fn write_catalog(client: &Client, singers: &[Singer], albums: &[Album]) -> Result<Timestamp> {
    let mutations: Vec<Mutation> = singers
        .iter()
        .map(singer_mutation)
        .chain(albums.iter().map(album_mutation))
        .collect();

    let commit_timestamp = client
        .apply(mutations)
        .await
        .context(|| format!("insert {} singers and {} albums", singers.len(), albums.len()))?;

    tracing::info!(
        singers = singers.len(),
        albums = albums.len(),
        %commit_timestamp,
        "Catalog rows written"
    );
    Ok(commit_timestamp)
}

/// Write the fixture singers and albums.
pub async fn insert_fixtures(client: &Client) -> Result<Timestamp> {
    write_catalog(client, &fixture_singers(), &fixture_albums()).await
}

/// Overwrite the marketing budget of each album, all in one batch.
///
/// Only `MarketingBudget` changes; `LastUpdateTime` is left alone. A missing
/// album fails the whole batch.
pub async fn set_marketing_budgets(client: &Client, budgets: &[(AlbumKey, i64)]) -> Result<Timestamp> {
    let mutations = budgets
        .iter()
        .map(|(key, budget)| {
            Mutation::update(
                ALBUMS,
                &[SINGER_ID, ALBUM_ID, MARKETING_BUDGET],
                vec![
                    Value::Int64(key.singer_id),
                    Value::Int64(key.album_id),
                    Value::Int64(*budget),
                ],
            )
        })
        .collect();

    let commit_timestamp = client
        .apply(mutations)
        .await
        .context(|| format!("set {} marketing budgets", budgets.len()))?;

    tracing::info!(albums = budgets.len(), %commit_timestamp, "Marketing budgets set");
    Ok(commit_timestamp)
}
