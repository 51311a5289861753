//! Base schema of a catalog database.
//!
//! Albums are children of Singers: an album row cannot exist without its
//! singer, and deleting a singer deletes its albums. `MarketingBudget` is not
//! part of the base schema; it arrives through [`super::migrate`].

const CREATE_SINGERS: &str = r#"CREATE TABLE Singers (
    SingerId   INTEGER NOT NULL,
    FirstName  TEXT,
    LastName   TEXT,
    SingerInfo BLOB,
    PRIMARY KEY (SingerId)
) WITHOUT ROWID"#;

const CREATE_ALBUMS: &str = r#"CREATE TABLE Albums (
    SingerId       INTEGER NOT NULL REFERENCES Singers (SingerId) ON DELETE CASCADE,
    AlbumId        INTEGER NOT NULL,
    AlbumTitle     TEXT,
    LastUpdateTime INTEGER NOT NULL,
    PRIMARY KEY (SingerId, AlbumId)
) WITHOUT ROWID"#;

/// Statements that create the catalog tables, parent first.
pub fn base_statements() -> Vec<String> {
    vec![CREATE_SINGERS.to_string(), CREATE_ALBUMS.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_album_requires_singer_and_cascades() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        for statement in base_statements() {
            conn.execute_batch(&statement).unwrap();
        }

        let orphan = conn.execute(
            "INSERT INTO Albums (SingerId, AlbumId, AlbumTitle, LastUpdateTime) VALUES (9, 1, 'x', 0)",
            [],
        );
        assert!(orphan.is_err());

        conn.execute("INSERT INTO Singers (SingerId) VALUES (1)", [])
            .unwrap();
        conn.execute(
            "INSERT INTO Albums (SingerId, AlbumId, AlbumTitle, LastUpdateTime) VALUES (1, 1, 'x', 0)",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM Singers WHERE SingerId = 1", [])
            .unwrap();

        let albums: i64 = conn
            .query_row("SELECT COUNT(*) FROM Albums", [], |row| row.get(0))
            .unwrap();
        assert_eq!(albums, 0);
    }
}
