//! Linked-note retrieval.
//!
//! Notes live in a separate database and point back at a resource
//! through a relation property. When that database is not configured
//! the fetch is a no-op, not an error.

use crate::docstore::facade::StoreFacade;
use crate::docstore::Record;
use crate::error::ExternalError;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Relation property on the notes database that points at the resource.
pub const NOTES_RELATION: &str = "Task";

#[derive(Debug, Clone)]
pub struct NoteEntry {
    pub id: String,
    pub title: String,
    pub kind: Option<String>,
    pub location: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl NoteEntry {
    fn from_record(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            title: record
                .title()
                .unwrap_or("Untitled note")
                .to_string(),
            kind: record.select("Type").map(str::to_string),
            location: record.text("Location").map(str::to_string),
            content: record.text("Content").map(str::to_string).unwrap_or_default(),
            tags: record.multi_select("Tags"),
            created_at: record.created_at,
        }
    }
}

/// Fetch the notes linked to a resource, oldest first. Returns an empty
/// list when no notes database is configured.
pub async fn fetch_notes(
    facade: &StoreFacade,
    notes_database_id: Option<&str>,
    resource_id: &str,
) -> Result<Vec<NoteEntry>, ExternalError> {
    let Some(database_id) = notes_database_id else {
        return Ok(Vec::new());
    };
    let records = facade
        .query_related(database_id, NOTES_RELATION, resource_id)
        .await?;
    let mut notes: Vec<NoteEntry> = records.iter().map(NoteEntry::from_record).collect();
    notes.sort_by_key(|note| note.created_at);
    debug!(resource_id, count = notes.len(), "fetched linked notes");
    Ok(notes)
}
