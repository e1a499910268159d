//! HTTP client for the remote tracking service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use taskpool_core::{Note, Task, TaskKey, TaskState};

use crate::wire::{ConflictBody, ErrorBody, NoteRequest, TransitionRequest};
use crate::{StoreError, TaskStore, TransitionOutcome};

/// Client for the tracking service's HTTP API.
///
/// # Example
///
/// ```rust,no_run
/// use taskpool_store::{HttpTaskStore, TaskStore};
///
/// async fn peek() -> Result<(), Box<dyn std::error::Error>> {
///     let store = HttpTaskStore::new("https://tracker.internal/api")?
///         .with_token("secret");
///     let todo = store.list_candidates("ENG").await?;
///     println!("{} candidates", todo.len());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTaskStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpTaskStore {
    /// Create a client with a 30 second request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create a client with the given request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let raw = base_url.into();
        let base_url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| StoreError::InvalidUrl(format!("{raw}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(raw));
        }
        let client = Client::builder().timeout(timeout).build()?;
        info!(base_url = %base_url, "Tracking service client ready");
        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Builder method to authenticate with a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Base URL extended by `segments`, each percent-encoded on its own so
    /// a `/` or space inside a team name stays within its segment.
    fn url<I>(&self, segments: I) -> Url
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        Ok(self.authorize(request).send().await?)
    }
}

/// Map a non-success status to a store error.
async fn error_for(response: Response, key: Option<&TaskKey>) -> StoreError {
    let status = response.status();
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
    };

    match status {
        StatusCode::NOT_FOUND => match key {
            Some(key) => StoreError::NotFound(key.clone()),
            None => StoreError::Rejected {
                status: status.as_u16(),
                message,
            },
        },
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            StoreError::Unavailable(format!("{status}: {message}"))
        }
        s if s.is_server_error() => StoreError::Unavailable(format!("{status}: {message}")),
        s => StoreError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    response
        .json::<T>()
        .await
        .map_err(|e| StoreError::Decode(e.to_string()))
}

#[async_trait]
impl TaskStore for HttpTaskStore {
    async fn list_by_state(&self, team: &str, state: TaskState) -> Result<Vec<Task>, StoreError> {
        let request = self
            .client
            .get(self.url(["teams", team, "tasks"]))
            .query(&[("state", state.as_str())]);
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(error_for(response, None).await);
        }
        let tasks: Vec<Task> = decode(response).await?;
        debug!(team = %team, state = %state, count = tasks.len(), "Listed tasks");
        Ok(tasks)
    }

    async fn get_task(&self, key: &TaskKey) -> Result<Task, StoreError> {
        let id = key.to_string();
        let request = self.client.get(self.url(["tasks", id.as_str()]));
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(error_for(response, Some(key)).await);
        }
        decode(response).await
    }

    async fn transition(
        &self,
        key: &TaskKey,
        from: TaskState,
        to: TaskState,
    ) -> Result<TransitionOutcome, StoreError> {
        let id = key.to_string();
        let request = self
            .client
            .post(self.url(["tasks", id.as_str(), "transition"]))
            .json(&TransitionRequest { from, to });
        let response = self.send(request).await?;

        match response.status() {
            s if s.is_success() => Ok(TransitionOutcome::Applied(decode(response).await?)),
            StatusCode::CONFLICT => {
                let body: ConflictBody = decode(response).await?;
                debug!(task = %key, expected = %from, actual = %body.actual, "transition conflict");
                Ok(TransitionOutcome::Conflict {
                    actual: body.actual,
                })
            }
            _ => Err(error_for(response, Some(key)).await),
        }
    }

    async fn append_note(&self, key: &TaskKey, body: &str) -> Result<Note, StoreError> {
        let id = key.to_string();
        let request = self
            .client
            .post(self.url(["tasks", id.as_str(), "notes"]))
            .json(&NoteRequest {
                body: body.to_string(),
            });
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(error_for(response, Some(key)).await);
        }
        decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let store = HttpTaskStore::new("http://localhost:9000/api/").unwrap();
        assert_eq!(
            store.url(["tasks", "ENG-1"]).as_str(),
            "http://localhost:9000/api/tasks/ENG-1"
        );

        let bare = HttpTaskStore::new("http://localhost:9000").unwrap();
        assert_eq!(
            bare.url(["tasks", "ENG-1"]).as_str(),
            "http://localhost:9000/tasks/ENG-1"
        );
    }

    #[test]
    fn test_team_name_is_encoded_as_one_segment() {
        let store = HttpTaskStore::new("http://localhost:9000/api").unwrap();
        assert_eq!(
            store.url(["teams", "Ops Team/EU", "tasks"]).as_str(),
            "http://localhost:9000/api/teams/Ops%20Team%2FEU/tasks"
        );
        assert_eq!(
            store.url(["teams", "R&D?x#y", "tasks"]).as_str(),
            "http://localhost:9000/api/teams/R&D%3Fx%23y/tasks"
        );
    }

    #[test]
    fn test_unusable_base_url_is_rejected() {
        assert!(matches!(
            HttpTaskStore::new("not a url"),
            Err(StoreError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpTaskStore::new("mailto:ops@example.com"),
            Err(StoreError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        // Port 9 (discard) on localhost is closed in test environments.
        let store = HttpTaskStore::with_timeout("http://127.0.0.1:9", Duration::from_secs(2))
            .unwrap();
        let err = store.get_task(&TaskKey::new("ENG", 1)).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
