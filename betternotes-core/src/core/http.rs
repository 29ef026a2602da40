//! [`NoteApi`] over HTTP, using the blocking reqwest client.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::core::note::{Collection, NewNote, Note, NotePatch};
use crate::core::remote::{Endpoints, NoteApi};
use crate::core::settings::ClientSettings;
use crate::{NotesError, Result};

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct RestoreBody {
    note: Note,
}

pub struct HttpNoteApi {
    client: Client,
    endpoints: Endpoints,
    bearer_token: Option<String>,
}

impl HttpNoteApi {
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotesError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoints,
            bearer_token: None,
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self> {
        Self::new(
            Endpoints::new(&settings.api_base_url)?,
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request
            .send()
            .map_err(|e| NotesError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorBody>()
            .map(|body| body.error)
            .unwrap_or_else(|_| status.to_string());
        Err(NotesError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)?
            .json()
            .map_err(|e| NotesError::Transport(e.to_string()))
    }
}

impl NoteApi for HttpNoteApi {
    fn list(&self, collection: Collection) -> Result<Vec<Note>> {
        log::debug!("GET {}", self.endpoints.list(collection));
        self.send_json(self.client.get(self.endpoints.list(collection)))
    }

    fn create(&self, note: &NewNote) -> Result<Note> {
        self.send_json(self.client.post(self.endpoints.create()).json(note))
    }

    fn update(&self, id: &str, patch: &NotePatch) -> Result<Note> {
        self.send_json(self.client.patch(self.endpoints.note(id)).json(patch))
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.send(self.client.delete(self.endpoints.note(id)))?;
        Ok(())
    }

    fn restore(&self, id: &str) -> Result<Note> {
        let body: RestoreBody = self.send_json(self.client.post(self.endpoints.restore(id)))?;
        Ok(body.note)
    }

    fn purge(&self, id: &str) -> Result<()> {
        self.send(self.client.delete(self.endpoints.purge(id)))?;
        Ok(())
    }
}
