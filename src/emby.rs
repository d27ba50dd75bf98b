use std::sync::Arc;

use serde_json::{json, Value};

use crate::request::{RequestError, ResilientClient};
use crate::types::{EmbyItem, EmbySession};

pub(crate) struct EmbyClient {
    http: Arc<ResilientClient>,
    base: String,
    api_key: String,
    user_id: Option<String>,
}

impl EmbyClient {
    pub(crate) fn new(
        http: Arc<ResilientClient>,
        base: &str,
        api_key: &str,
        user_id: Option<String>,
    ) -> EmbyClient {
        EmbyClient { http, base: base.to_string(), api_key: api_key.to_string(), user_id }
    }

    fn items_endpoint(&self) -> String {
        match &self.user_id {
            Some(user) => format!("{}/Users/{user}/Items", self.base),
            None => format!("{}/Items", self.base),
        }
    }

    fn parse_items(body: &Value) -> Vec<EmbyItem> {
        body.get("Items")
            .cloned()
            .and_then(|items| serde_json::from_value(items).ok())
            .unwrap_or_default()
    }

    /// Search movies and series by name, optionally filtered by a trailing
    /// year in the query ("blade runner 2017").
    pub(crate) fn search(&self, query: &str) -> Result<Vec<EmbyItem>, RequestError> {
        let (term, year) = split_trailing_year(query);
        let mut params: Vec<(&str, &str)> = vec![
            ("api_key", self.api_key.as_str()),
            ("SearchTerm", term.as_str()),
            ("IncludeItemTypes", "Movie,Series"),
            ("Recursive", "true"),
            ("Fields", "ProviderIds,Path,ProductionYear,Name"),
        ];
        if let Some(year) = year.as_deref() {
            params.push(("Years", year));
        }
        let resp = self.http.get_json("emby", &self.items_endpoint(), &params)?;
        Ok(Self::parse_items(&resp.body))
    }

    pub(crate) fn item(&self, item_id: &str) -> Result<Option<EmbyItem>, RequestError> {
        let url = match &self.user_id {
            Some(user) => format!("{}/Users/{user}/Items/{item_id}", self.base),
            None => format!("{}/Items/{item_id}", self.base),
        };
        let fields = "ProviderIds,Path,Overview,ProductionYear,MediaStreams,DateCreated,SeriesName,ParentIndexNumber,IndexNumber";
        let resp = match self.http.get_json(
            "emby",
            &url,
            &[("api_key", self.api_key.as_str()), ("Fields", fields)],
        ) {
            Ok(resp) => resp,
            Err(RequestError::Fatal { status: 404, .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(serde_json::from_value(resp.body).ok())
    }

    /// Newest episode of a series, by season/episode number.
    pub(crate) fn latest_episode(&self, series_id: &str) -> Result<Option<EmbyItem>, RequestError> {
        let resp = self.http.get_json(
            "emby",
            &self.items_endpoint(),
            &[
                ("api_key", self.api_key.as_str()),
                ("ParentId", series_id),
                ("IncludeItemTypes", "Episode"),
                ("Recursive", "true"),
                ("SortBy", "ParentIndexNumber,IndexNumber"),
                ("SortOrder", "Descending"),
                ("Limit", "1"),
                ("Fields", "ProviderIds,Path,ParentIndexNumber,IndexNumber,SeriesName,Overview,DateCreated"),
            ],
        )?;
        Ok(Self::parse_items(&resp.body).into_iter().next())
    }

    /// All episodes of one season, for building a season deletion plan.
    pub(crate) fn season_episodes(
        &self,
        series_id: &str,
        season: i32,
    ) -> Result<Vec<EmbyItem>, RequestError> {
        let season_string = season.to_string();
        let resp = self.http.get_json(
            "emby",
            &self.items_endpoint(),
            &[
                ("api_key", self.api_key.as_str()),
                ("ParentId", series_id),
                ("IncludeItemTypes", "Episode"),
                ("Recursive", "true"),
                ("ParentIndexNumber", &season_string),
                ("SortBy", "IndexNumber"),
                ("Fields", "Path,ParentIndexNumber,IndexNumber,SeriesName"),
            ],
        )?;
        Ok(Self::parse_items(&resp.body))
    }

    pub(crate) fn active_sessions(&self) -> Result<Vec<EmbySession>, RequestError> {
        let url = format!("{}/Sessions", self.base);
        let resp = self.http.get_json("emby", &url, &[("api_key", self.api_key.as_str())])?;
        let sessions: Vec<EmbySession> =
            serde_json::from_value(resp.body).unwrap_or_default();
        Ok(sessions
            .into_iter()
            .filter(|s| s.now_playing_item.is_some())
            .collect())
    }

    pub(crate) fn stop_session(&self, session_id: &str) -> Result<(), RequestError> {
        let url = format!("{}/Sessions/{session_id}/Playing/Stop", self.base);
        self.http
            .post_json("emby", &format!("{url}?api_key={}", self.api_key), &json!({}))
            .map(|_| ())
    }

    pub(crate) fn message_session(
        &self,
        session_id: &str,
        header: &str,
        text: &str,
    ) -> Result<(), RequestError> {
        let url = format!("{}/Sessions/{session_id}/Message?api_key={}", self.base, self.api_key);
        self.http
            .post_json(
                "emby",
                &url,
                &json!({ "Header": header, "Text": text, "TimeoutMs": 10_000 }),
            )
            .map(|_| ())
    }

    /// Remove an item from the library. Deleting an already-gone item
    /// reports success; the end state is what was asked for.
    pub(crate) fn delete_item(&self, item_id: &str) -> Result<(), RequestError> {
        let url = format!("{}/Items/{item_id}", self.base);
        self.http
            .delete("emby", &url, &[("api_key", self.api_key.as_str())])
            .map(|_| ())
    }

    /// Web UI deep link for "view on server" buttons.
    pub(crate) fn item_url(&self, remote_base: &str, item_id: &str, server_id: Option<&str>) -> String {
        match server_id {
            Some(server) => {
                format!("{remote_base}/web/index.html#!/item?id={item_id}&serverId={server}")
            }
            None => format!("{remote_base}/web/index.html#!/item?id={item_id}"),
        }
    }
}

/// Split a trailing 4-digit year off a search query.
fn split_trailing_year(query: &str) -> (String, Option<String>) {
    let trimmed = query.trim();
    if trimmed.len() >= 5 && trimmed.is_char_boundary(trimmed.len() - 4) {
        let (head, tail) = trimmed.split_at(trimmed.len() - 4);
        if tail.chars().all(|c| c.is_ascii_digit()) && head.ends_with(' ') {
            return (head.trim().to_string(), Some(tail.to_string()));
        }
    }
    (trimmed.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_year_is_split_off() {
        assert_eq!(
            split_trailing_year("blade runner 2049 2017"),
            ("blade runner 2049".to_string(), Some("2017".to_string()))
        );
        assert_eq!(split_trailing_year("arrival"), ("arrival".to_string(), None));
        // A bare year with nothing before it is a search term, not a filter.
        assert_eq!(split_trailing_year("1917"), ("1917".to_string(), None));
    }

    #[test]
    fn parse_items_tolerates_missing_field() {
        assert!(EmbyClient::parse_items(&json!({})).is_empty());
        let items = EmbyClient::parse_items(&json!({"Items": [{"Id": "1", "Name": "A"}]}));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "1");
    }
}
