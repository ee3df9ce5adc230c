//! Note submission
//!
//! Composing a note is a single authenticated `notes/create` request; no
//! registry state is involved.

use std::sync::Arc;

use serde::Deserialize;

use crate::config::CredentialProvider;
use crate::error::{RequestError, Result};
use crate::note::{Note, NoteDraft};
use crate::registry::Origin;
use crate::transport::Transport;

/// API endpoint for creating a note
pub const CREATE_NOTE_ENDPOINT: &str = "notes/create";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedNote {
    created_note: Note,
}

/// Sends composed notes to a server
#[derive(Clone)]
pub struct NoteSubmitter {
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,
}

impl NoteSubmitter {
    pub fn new(credentials: impl CredentialProvider, transport: impl Transport) -> Self {
        Self::from_shared(Arc::new(credentials), Arc::new(transport))
    }

    pub(crate) fn from_shared(
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            credentials,
            transport,
        }
    }

    /// Create a note on `origin`, returning the note as stored by the server
    pub async fn submit_note(&self, origin: &Origin, draft: &NoteDraft) -> Result<Note> {
        let token = self.credentials.resolve_token(origin)?;
        let payload =
            serde_json::to_value(draft).map_err(|e| RequestError::Encode {
                endpoint: CREATE_NOTE_ENDPOINT.to_string(),
                reason: e.to_string(),
            })?;

        let reply = self
            .transport
            .request(origin, &token, CREATE_NOTE_ENDPOINT, payload)
            .await?;

        let created: CreatedNote =
            serde_json::from_value(reply).map_err(|e| RequestError::InvalidResponse {
                endpoint: CREATE_NOTE_ENDPOINT.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            origin = %origin,
            note_id = %created.created_note.id,
            visibility = ?draft.visibility,
            "Note created"
        );

        Ok(created.created_note)
    }
}
