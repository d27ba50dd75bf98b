use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::ResilientClient;

const API_BASE: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";
const POSTER_TTL_SECS: i64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PosterEntry {
    url: String,
    fetched_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SeasonProgress {
    pub total_episodes: usize,
    pub is_finale_marked: bool,
}

/// TMDB lookups. Poster URLs are cached to disk for 30 days; everything here
/// degrades to None rather than failing a notification over missing artwork.
pub(crate) struct TmdbClient {
    http: Arc<ResilientClient>,
    token: Option<String>,
    cache_path: PathBuf,
    cache: Mutex<HashMap<String, PosterEntry>>,
}

impl TmdbClient {
    pub(crate) fn new(
        http: Arc<ResilientClient>,
        token: Option<String>,
        cache_path: &Path,
    ) -> TmdbClient {
        let cache = match std::fs::read_to_string(cache_path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        TmdbClient {
            http,
            token,
            cache_path: cache_path.to_path_buf(),
            cache: Mutex::new(cache),
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn title_url(&self, media_type: &str, tmdb_id: &str) -> String {
        format!("https://www.themoviedb.org/{media_type}/{tmdb_id}")
    }

    fn get(&self, path: &str, extra: &[(&str, &str)]) -> Option<Value> {
        let token = self.token.as_deref()?;
        let url = format!("{API_BASE}{path}");
        let mut params: Vec<(&str, &str)> = vec![("api_key", token)];
        params.extend_from_slice(extra);
        match self.http.get_json("tmdb", &url, &params) {
            Ok(resp) => Some(resp.body),
            Err(err) => {
                eprintln!("[tmdb] GET {path} failed: {err}");
                None
            }
        }
    }

    /// Poster URL for a movie or tv entry, via the on-disk cache.
    pub(crate) fn poster_url(&self, media_type: &str, tmdb_id: &str) -> Option<String> {
        let key = format!("{media_type}:{tmdb_id}");
        let now = chrono::Utc::now().timestamp();
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(&key) {
                if now - entry.fetched_at < POSTER_TTL_SECS {
                    return Some(entry.url.clone());
                }
            }
        }
        let body = self.get(&format!("/{media_type}/{tmdb_id}"), &[])?;
        let poster_path = body.get("poster_path")?.as_str()?;
        let url = format!("{IMAGE_BASE}{poster_path}");
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, PosterEntry { url: url.clone(), fetched_at: now });
        if let Err(err) = persist(&self.cache_path, &cache) {
            eprintln!("[tmdb] poster cache write failed: {err}");
        }
        Some(url)
    }

    /// Find a series id by name when the library has no TMDB provider id.
    /// Prefers an exact name match, falls back to the most popular result.
    pub(crate) fn search_tv_id(&self, name: &str, year: Option<i32>) -> Option<String> {
        let year_string;
        let mut extra: Vec<(&str, &str)> = vec![("query", name)];
        if let Some(year) = year {
            year_string = year.to_string();
            extra.push(("first_air_date_year", &year_string));
        }
        let body = self.get("/search/tv", &extra)?;
        let results = body.get("results")?.as_array()?;
        let exact = results.iter().find(|r| {
            r.get("name").and_then(Value::as_str).is_some_and(|n| n.eq_ignore_ascii_case(name))
        });
        let hit = exact.or_else(|| results.first())?;
        hit.get("id").map(|id| id.to_string().trim_matches('"').to_string())
    }

    /// Episode count and finale marker for one season.
    pub(crate) fn season_progress(
        &self,
        series_tmdb_id: &str,
        season: i32,
    ) -> Option<SeasonProgress> {
        let body = self.get(&format!("/tv/{series_tmdb_id}/season/{season}"), &[])?;
        let episodes = body.get("episodes")?.as_array()?;
        if episodes.is_empty() {
            return None;
        }
        let is_finale_marked = episodes
            .last()
            .and_then(|e| e.get("episode_type"))
            .and_then(Value::as_str)
            .is_some_and(|t| t == "finale");
        Some(SeasonProgress { total_episodes: episodes.len(), is_finale_marked })
    }
}

fn persist(
    path: &Path,
    cache: &HashMap<String, PosterEntry>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(cache)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_round_trips_through_disk() {
        let path = std::env::temp_dir()
            .join(format!("telemby-posters-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut cache = HashMap::new();
        cache.insert(
            "movie:603".to_string(),
            PosterEntry { url: format!("{IMAGE_BASE}/abc.jpg"), fetched_at: 100 },
        );
        persist(&path, &cache).unwrap();
        let loaded: HashMap<String, PosterEntry> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded["movie:603"].url, format!("{IMAGE_BASE}/abc.jpg"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn fresh_entry_is_served_without_network() {
        // No token: any cache miss would return None, so a Some proves the
        // cache answered.
        let http = Arc::new(ResilientClient::new(0, 0.1, 0.1));
        let path = std::env::temp_dir()
            .join(format!("telemby-posters-fresh-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let client = TmdbClient::new(http, None, &path);
        {
            let mut cache = client.cache.lock().unwrap();
            cache.insert(
                "tv:999".to_string(),
                PosterEntry {
                    url: "u".to_string(),
                    fetched_at: chrono::Utc::now().timestamp(),
                },
            );
        }
        assert_eq!(client.poster_url("tv", "999").as_deref(), Some("u"));
        assert_eq!(client.poster_url("tv", "998"), None);
    }
}
