//! SQLite implementation of [`LocalStorage`].
//!
//! Each entity table stores the serialized entity in a JSON `body` column
//! next to the columns lookups need (`guid`, `name_key`, `scope`,
//! `parent_local_id`, `position`).

use crate::error::{LibraryError, Result};
use crate::models::{
    Guid, LinkedNotebook, LocalId, Note, Notebook, Resource, SavedSearch, SyncEntity, Tag,
};
use crate::storage::{
    apply_note_options, apply_resource_options, name_key, FetchNoteOptions, FetchResourceOptions,
    LocalStorage,
};
use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

trait SqlTable: SyncEntity {
    const TABLE: &'static str;
}

impl SqlTable for Note {
    const TABLE: &'static str = "notes";
}

impl SqlTable for Resource {
    const TABLE: &'static str = "resources";
}

impl SqlTable for Notebook {
    const TABLE: &'static str = "notebooks";
}

impl SqlTable for Tag {
    const TABLE: &'static str = "tags";
}

impl SqlTable for SavedSearch {
    const TABLE: &'static str = "saved_searches";
}

fn parse_local_id(value: &str) -> Result<LocalId> {
    LocalId::from_string(value).map_err(|e| LibraryError::InvalidInput {
        field: "local_id".to_string(),
        message: e.to_string(),
    })
}

fn decode_rows<T: SyncEntity>(rows: Vec<(String,)>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|(body,)| serde_json::from_str(&body).map_err(LibraryError::from))
        .collect()
}

async fn find_by_guid<T: SqlTable>(conn: &mut SqliteConnection, guid: &Guid) -> Result<Option<T>> {
    let row: Option<(String,)> =
        sqlx::query_as(&format!("SELECT body FROM {} WHERE guid = ?", T::TABLE))
            .bind(guid.as_str())
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.map(|(body,)| serde_json::from_str(&body)).transpose()?)
}

async fn find_by_local_id<T: SqlTable>(
    conn: &mut SqliteConnection,
    local_id: LocalId,
) -> Result<Option<T>> {
    let row: Option<(String,)> =
        sqlx::query_as(&format!("SELECT body FROM {} WHERE local_id = ?", T::TABLE))
            .bind(local_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.map(|(body,)| serde_json::from_str(&body)).transpose()?)
}

async fn find_by_name<T: SqlTable>(
    conn: &mut SqliteConnection,
    name: &str,
    scope: Option<&Guid>,
) -> Result<Option<T>> {
    let row: Option<(String,)> = sqlx::query_as(&format!(
        "SELECT body FROM {} WHERE name_key = ? AND scope IS ? LIMIT 1",
        T::TABLE
    ))
    .bind(name_key(name))
    .bind(scope.map(|guid| guid.as_str().to_string()))
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(body,)| serde_json::from_str(&body)).transpose()?)
}

async fn list_all<T: SqlTable>(conn: &mut SqliteConnection) -> Result<Vec<T>> {
    let rows: Vec<(String,)> = sqlx::query_as(&format!("SELECT body FROM {}", T::TABLE))
        .fetch_all(&mut *conn)
        .await?;
    decode_rows(rows)
}

/// Inserts or replaces `entity`; returns the local id it is stored under.
///
/// `position` of `None` keeps the stored position of an existing row.
async fn upsert<T: SqlTable>(
    conn: &mut SqliteConnection,
    mut entity: T,
    position: Option<i64>,
) -> Result<LocalId> {
    let mut stored_position = None;
    if let Some(guid) = entity.guid() {
        let existing: Option<(String, i64)> = sqlx::query_as(&format!(
            "SELECT local_id, position FROM {} WHERE guid = ?",
            T::TABLE
        ))
        .bind(guid.as_str())
        .fetch_optional(&mut *conn)
        .await?;
        if let Some((local_id, existing_position)) = existing {
            entity.set_local_id(parse_local_id(&local_id)?);
            stored_position = Some(existing_position);
        }
    }

    let local_id = entity.local_id();
    let body = serde_json::to_string(&entity)?;

    sqlx::query(&format!(
        r#"
        INSERT INTO {table} (local_id, guid, name_key, scope, parent_local_id, position, body)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(local_id) DO UPDATE SET
            guid = excluded.guid,
            name_key = excluded.name_key,
            scope = excluded.scope,
            parent_local_id = excluded.parent_local_id,
            position = excluded.position,
            body = excluded.body
        "#,
        table = T::TABLE
    ))
    .bind(local_id.to_string())
    .bind(entity.guid().map(|guid| guid.as_str().to_string()))
    .bind(entity.name().map(name_key))
    .bind(entity.linked_notebook_guid().map(|guid| guid.as_str().to_string()))
    .bind(entity.parent_local_id().map(|id| id.to_string()))
    .bind(position.or(stored_position).unwrap_or(0))
    .bind(body)
    .execute(&mut *conn)
    .await?;

    Ok(local_id)
}

async fn delete_by_local_id<T: SqlTable>(conn: &mut SqliteConnection, local_id: LocalId) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE local_id = ?", T::TABLE))
        .bind(local_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn delete_by_guid<T: SqlTable>(conn: &mut SqliteConnection, guid: &Guid) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE guid = ?", T::TABLE))
        .bind(guid.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn local_id_of<T: SqlTable>(conn: &mut SqliteConnection, guid: &Guid) -> Result<Option<LocalId>> {
    let row: Option<(String,)> =
        sqlx::query_as(&format!("SELECT local_id FROM {} WHERE guid = ?", T::TABLE))
            .bind(guid.as_str())
            .fetch_optional(&mut *conn)
            .await?;
    row.map(|(local_id,)| parse_local_id(&local_id)).transpose()
}

async fn resources_of(conn: &mut SqliteConnection, note_local_id: LocalId) -> Result<Vec<Resource>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT body FROM resources WHERE parent_local_id = ? ORDER BY position",
    )
    .bind(note_local_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    decode_rows(rows)
}

async fn expunge_note(conn: &mut SqliteConnection, note_local_id: LocalId) -> Result<()> {
    sqlx::query("DELETE FROM resources WHERE parent_local_id = ?")
        .bind(note_local_id.to_string())
        .execute(&mut *conn)
        .await?;
    delete_by_local_id::<Note>(conn, note_local_id).await
}

/// `sqlx`-backed local storage.
#[derive(Debug, Clone)]
pub struct SqliteLocalStorage {
    pool: SqlitePool,
}

impl SqliteLocalStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn assemble_note(
        &self,
        conn: &mut SqliteConnection,
        mut note: Note,
        options: FetchNoteOptions,
    ) -> Result<Note> {
        if options.with_resource_metadata {
            note.resources = resources_of(conn, note.local_id).await?;
        }
        Ok(apply_note_options(note, options))
    }
}

#[async_trait]
impl LocalStorage for SqliteLocalStorage {
    async fn find_note_by_guid(
        &self,
        guid: &Guid,
        options: FetchNoteOptions,
    ) -> Result<Option<Note>> {
        let mut conn = self.pool.acquire().await?;
        match find_by_guid::<Note>(&mut conn, guid).await? {
            Some(note) => Ok(Some(self.assemble_note(&mut conn, note, options).await?)),
            None => Ok(None),
        }
    }

    async fn find_note_by_local_id(
        &self,
        local_id: LocalId,
        options: FetchNoteOptions,
    ) -> Result<Option<Note>> {
        let mut conn = self.pool.acquire().await?;
        match find_by_local_id::<Note>(&mut conn, local_id).await? {
            Some(note) => Ok(Some(self.assemble_note(&mut conn, note, options).await?)),
            None => Ok(None),
        }
    }

    async fn put_note(&self, mut note: Note) -> Result<()> {
        let resources = std::mem::take(&mut note.resources);
        let mut tx = self.pool.begin().await?;

        let note_local_id = upsert(&mut tx, note, None).await?;
        let note_guid = find_by_local_id::<Note>(&mut tx, note_local_id)
            .await?
            .and_then(|stored| stored.guid);

        let stale: Vec<LocalId> = resources_of(&mut tx, note_local_id)
            .await?
            .into_iter()
            .map(|resource| resource.local_id)
            .collect();

        let mut kept = Vec::with_capacity(resources.len());
        for (position, mut resource) in resources.into_iter().enumerate() {
            resource.note_local_id = Some(note_local_id);
            if note_guid.is_some() {
                resource.note_guid = note_guid.clone();
            }
            let position = i64::try_from(position).unwrap_or(i64::MAX);
            kept.push(upsert(&mut tx, resource, Some(position)).await?);
        }
        for local_id in stale.into_iter().filter(|id| !kept.contains(id)) {
            delete_by_local_id::<Resource>(&mut tx, local_id).await?;
        }

        tx.commit().await?;
        debug!(local_id = %note_local_id, "Stored note");
        Ok(())
    }

    async fn expunge_note_by_guid(&self, guid: &Guid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if let Some(local_id) = local_id_of::<Note>(&mut tx, guid).await? {
            expunge_note(&mut tx, local_id).await?;
            debug!(guid = %guid, "Expunged note");
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_notes(&self, options: FetchNoteOptions) -> Result<Vec<Note>> {
        let mut conn = self.pool.acquire().await?;
        let notes = list_all::<Note>(&mut conn).await?;
        let mut assembled = Vec::with_capacity(notes.len());
        for note in notes {
            assembled.push(self.assemble_note(&mut conn, note, options).await?);
        }
        Ok(assembled)
    }

    async fn note_count(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notes")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn find_resource_by_guid(
        &self,
        guid: &Guid,
        options: FetchResourceOptions,
    ) -> Result<Option<Resource>> {
        let mut conn = self.pool.acquire().await?;
        Ok(find_by_guid::<Resource>(&mut conn, guid)
            .await?
            .map(|resource| apply_resource_options(resource, options)))
    }

    async fn put_resource(&self, mut resource: Resource) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if resource.note_local_id.is_none() {
            if let Some(note_guid) = resource.note_guid.clone() {
                resource.note_local_id = local_id_of::<Note>(&mut tx, &note_guid).await?;
            }
        }
        upsert(&mut tx, resource, None).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn expunge_resource_by_guid(&self, guid: &Guid) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        delete_by_guid::<Resource>(&mut conn, guid).await
    }

    async fn find_notebook_by_guid(&self, guid: &Guid) -> Result<Option<Notebook>> {
        let mut conn = self.pool.acquire().await?;
        find_by_guid(&mut conn, guid).await
    }

    async fn find_notebook_by_local_id(&self, local_id: LocalId) -> Result<Option<Notebook>> {
        let mut conn = self.pool.acquire().await?;
        find_by_local_id(&mut conn, local_id).await
    }

    async fn find_notebook_by_name(
        &self,
        name: &str,
        linked_notebook_guid: Option<&Guid>,
    ) -> Result<Option<Notebook>> {
        let mut conn = self.pool.acquire().await?;
        find_by_name(&mut conn, name, linked_notebook_guid).await
    }

    async fn put_notebook(&self, notebook: Notebook) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert(&mut conn, notebook, None).await?;
        Ok(())
    }

    async fn expunge_notebook_by_guid(&self, guid: &Guid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if let Some(notebook_local_id) = local_id_of::<Notebook>(&mut tx, guid).await? {
            let notes: Vec<(String,)> =
                sqlx::query_as("SELECT local_id FROM notes WHERE parent_local_id = ?")
                    .bind(notebook_local_id.to_string())
                    .fetch_all(&mut *tx)
                    .await?;
            for (note_local_id,) in notes {
                expunge_note(&mut tx, parse_local_id(&note_local_id)?).await?;
            }
            delete_by_local_id::<Notebook>(&mut tx, notebook_local_id).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_notebooks(&self) -> Result<Vec<Notebook>> {
        let mut conn = self.pool.acquire().await?;
        list_all(&mut conn).await
    }

    async fn find_tag_by_guid(&self, guid: &Guid) -> Result<Option<Tag>> {
        let mut conn = self.pool.acquire().await?;
        find_by_guid(&mut conn, guid).await
    }

    async fn find_tag_by_name(
        &self,
        name: &str,
        linked_notebook_guid: Option<&Guid>,
    ) -> Result<Option<Tag>> {
        let mut conn = self.pool.acquire().await?;
        find_by_name(&mut conn, name, linked_notebook_guid).await
    }

    async fn put_tag(&self, mut tag: Tag) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if tag.parent_local_id.is_none() {
            if let Some(parent_guid) = tag.parent_guid.clone() {
                tag.parent_local_id = local_id_of::<Tag>(&mut tx, &parent_guid).await?;
            }
        }
        upsert(&mut tx, tag, None).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn expunge_tag_by_guid(&self, guid: &Guid) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        delete_by_guid::<Tag>(&mut conn, guid).await
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        let mut conn = self.pool.acquire().await?;
        list_all(&mut conn).await
    }

    async fn find_saved_search_by_guid(&self, guid: &Guid) -> Result<Option<SavedSearch>> {
        let mut conn = self.pool.acquire().await?;
        find_by_guid(&mut conn, guid).await
    }

    async fn find_saved_search_by_name(&self, name: &str) -> Result<Option<SavedSearch>> {
        let mut conn = self.pool.acquire().await?;
        find_by_name(&mut conn, name, None).await
    }

    async fn put_saved_search(&self, search: SavedSearch) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert(&mut conn, search, None).await?;
        Ok(())
    }

    async fn expunge_saved_search_by_guid(&self, guid: &Guid) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        delete_by_guid::<SavedSearch>(&mut conn, guid).await
    }

    async fn list_saved_searches(&self) -> Result<Vec<SavedSearch>> {
        let mut conn = self.pool.acquire().await?;
        list_all(&mut conn).await
    }

    async fn find_linked_notebook_by_guid(&self, guid: &Guid) -> Result<Option<LinkedNotebook>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM linked_notebooks WHERE guid = ?")
                .bind(guid.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(body,)| serde_json::from_str(&body)).transpose()?)
    }

    async fn put_linked_notebook(&self, linked_notebook: LinkedNotebook) -> Result<()> {
        let guid = linked_notebook
            .guid
            .clone()
            .ok_or_else(|| LibraryError::InvalidInput {
                field: "linked_notebook.guid".to_string(),
                message: "linked notebooks are keyed by guid".to_string(),
            })?;
        sqlx::query(
            "INSERT INTO linked_notebooks (guid, body) VALUES (?, ?) \
             ON CONFLICT(guid) DO UPDATE SET body = excluded.body",
        )
        .bind(guid.as_str())
        .bind(serde_json::to_string(&linked_notebook)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn expunge_linked_notebook_by_guid(&self, guid: &Guid) -> Result<()> {
        sqlx::query("DELETE FROM linked_notebooks WHERE guid = ?")
            .bind(guid.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_linked_notebooks(&self) -> Result<Vec<LinkedNotebook>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT body FROM linked_notebooks")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).map_err(LibraryError::from))
            .collect()
    }
}
