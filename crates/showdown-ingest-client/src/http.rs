// HTTP implementation of the replay service.
//
// Search:  GET {base}/search.json?before=..&format=..&user=..
// Fetch:   GET {base}/{id}.json

use async_trait::async_trait;
use serde::Deserialize;
use showdown_ingest_core::{ReplayRecord, ReplaySummary, SearchWindow};
use std::time::Duration;
use tracing::trace;

use crate::{ReplaySource, SourceError};

const USER_AGENT: &str = concat!("showdown-ingest/", env!("CARGO_PKG_VERSION"));

/// Replay service client over reqwest.
#[derive(Debug, Clone)]
pub struct ShowdownClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ShowdownClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T>(&self, request: reqwest::RequestBuilder) -> Result<T, SourceError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = request
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::from_reqwest(e, self.timeout))?;
        serde_json::from_slice(&body).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ReplaySource for ShowdownClient {
    async fn search(&self, window: &SearchWindow) -> Result<Vec<ReplaySummary>, SourceError> {
        let mut query = vec![("before", window.before.to_string())];
        if let Some(format) = &window.format {
            query.push(("format", format.clone()));
        }
        if let Some(user) = &window.user {
            query.push(("user", user.clone()));
        }

        trace!(chain = window.chain, before = window.before, "Searching replays");
        let request = self
            .http
            .get(format!("{}/search.json", self.base_url))
            .query(&query);
        self.get_json(request).await
    }

    async fn fetch(&self, id: &str) -> Result<ReplayRecord, SourceError> {
        trace!(replay_id = %id, "Fetching replay");
        let request = self.http.get(format!("{}/{}.json", self.base_url, id));
        let payload: ReplayPayload = self.get_json(request).await?;
        payload.into_record(id)
    }
}

/// Full replay document as served by the fetch endpoint.
#[derive(Debug, Deserialize)]
struct ReplayPayload {
    formatid: String,
    #[serde(default)]
    players: Vec<String>,
    log: String,
    uploadtime: i64,
    #[serde(default)]
    rating: Option<i64>,
}

impl ReplayPayload {
    fn into_record(self, id: &str) -> Result<ReplayRecord, SourceError> {
        let players: Vec<String> = self
            .players
            .into_iter()
            .filter(|name| !name.is_empty())
            .collect();
        if players.is_empty() {
            return Err(SourceError::InvalidRecord {
                id: id.to_string(),
                reason: "no players".to_string(),
            });
        }

        Ok(ReplayRecord {
            id: id.to_string(),
            format: self.formatid,
            players,
            log: self.log,
            uploadtime: self.uploadtime,
            // Unrated battles report 0
            rating: self.rating.filter(|rating| *rating != 0),
        })
    }
}
