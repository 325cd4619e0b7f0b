use postloop_core::{ContentItem, UserId};
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use crate::{
    db::{fmt_ts, parse_ts},
    error::Result,
    store::Store,
};

/// Read access to the user's content library.
///
/// The scheduling core never writes posts; the SQLite implementation on
/// [`Store`] also offers [`Store::insert_item`] for local administration.
pub trait ContentStore: Send + Sync {
    /// Every item owned by `user`.
    fn list_items(&self, user: &UserId) -> Result<Vec<ContentItem>>;

    fn get_item(&self, id: &str) -> Result<Option<ContentItem>>;
}

type PostRow = (String, String, Option<String>, String, String, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode((id, user_id, caption, assets, texts, created_at): PostRow) -> Result<ContentItem> {
    Ok(ContentItem {
        id,
        user_id: UserId(user_id),
        caption,
        assets: serde_json::from_str(&assets)?,
        texts: serde_json::from_str(&texts)?,
        created_at: parse_ts(&created_at)?,
    })
}

impl Store {
    /// Insert or replace a content item.
    pub fn insert_item(&self, item: &ContentItem) -> Result<()> {
        let assets = serde_json::to_string(&item.assets)?;
        let texts = serde_json::to_string(&item.texts)?;
        self.db().execute(
            "INSERT INTO posts (id, user_id, caption, assets, texts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                caption = excluded.caption, assets = excluded.assets, texts = excluded.texts",
            params![
                item.id,
                item.user_id.as_str(),
                item.caption,
                assets,
                texts,
                fmt_ts(item.created_at)
            ],
        )?;
        info!(post_id = %item.id, user_id = %item.user_id, "post stored");
        Ok(())
    }
}

impl ContentStore for Store {
    fn list_items(&self, user: &UserId) -> Result<Vec<ContentItem>> {
        let rows: Vec<PostRow> = {
            let db = self.db();
            let mut stmt = db.prepare_cached(
                "SELECT id, user_id, caption, assets, texts, created_at
                 FROM posts WHERE user_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt
                .query_map([user.as_str()], read_row)?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };
        rows.into_iter().map(decode).collect()
    }

    fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        let row = self
            .db()
            .query_row(
                "SELECT id, user_id, caption, assets, texts, created_at FROM posts WHERE id = ?1",
                [id],
                read_row,
            )
            .optional()?;
        row.map(decode).transpose()
    }
}
