use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Telegram wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TelegramUser {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

/// One inline-keyboard button. Exactly one of `callback_data` / `url` is set.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct InlineButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineButton {
    pub(crate) fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        InlineButton { text: text.into(), callback_data: Some(data.into()), url: None }
    }

    pub(crate) fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        InlineButton { text: text.into(), callback_data: None, url: Some(url.into()) }
    }
}

pub(crate) type Keyboard = Vec<Vec<InlineButton>>;

// ---------------------------------------------------------------------------
// Emby wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EmbyItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub production_year: Option<i32>,
    #[serde(default)]
    pub series_name: Option<String>,
    #[serde(default)]
    pub parent_index_number: Option<i32>,
    #[serde(default)]
    pub index_number: Option<i32>,
    #[serde(default)]
    pub run_time_ticks: Option<i64>,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub provider_ids: Option<serde_json::Value>,
    #[serde(default)]
    pub media_streams: Option<Vec<MediaStream>>,
}

impl EmbyItem {
    pub(crate) fn tmdb_id(&self) -> Option<String> {
        let ids = self.provider_ids.as_ref()?.as_object()?;
        ids.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("tmdb"))
            .and_then(|(_, v)| match v {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    pub(crate) fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(unnamed)")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct MediaStream {
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub display_title: Option<String>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EmbySession {
    pub id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub remote_end_point: Option<String>,
    #[serde(default)]
    pub now_playing_item: Option<EmbyItem>,
    #[serde(default)]
    pub play_state: Option<PlayState>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct PlayState {
    #[serde(default)]
    pub position_ticks: Option<i64>,
    #[serde(default)]
    pub is_paused: Option<bool>,
}

// ---------------------------------------------------------------------------
// Internal records
// ---------------------------------------------------------------------------

/// One search result held behind a cache handle. A pared-down EmbyItem: only
/// what list pages and detail views need to re-render without refetching.
#[derive(Debug, Clone)]
pub(crate) struct SearchHit {
    pub item_id: String,
    pub name: String,
    pub kind: String,
    pub year: Option<i32>,
    pub series_name: Option<String>,
}

impl SearchHit {
    pub(crate) fn from_item(item: &EmbyItem) -> Self {
        SearchHit {
            item_id: item.id.clone(),
            name: item.display_name().to_string(),
            kind: item.r#type.clone().unwrap_or_else(|| "Unknown".to_string()),
            year: item.production_year,
            series_name: item.series_name.clone(),
        }
    }

    pub(crate) fn label(&self) -> String {
        let mut label = match self.kind.as_str() {
            "Series" => format!("[TV] {}", self.name),
            "Episode" => match &self.series_name {
                Some(series) => format!("[EP] {series} - {}", self.name),
                None => format!("[EP] {}", self.name),
            },
            _ => format!("[Movie] {}", self.name),
        };
        if let Some(year) = self.year {
            label.push_str(&format!(" ({year})"));
        }
        label
    }
}

/// A destructive batch awaiting confirmation: every target it will remove.
#[derive(Debug, Clone)]
pub(crate) struct DeletionPlan {
    pub title: String,
    pub targets: Vec<PlanTarget>,
}

#[derive(Debug, Clone)]
pub(crate) struct PlanTarget {
    pub item_id: String,
    pub label: String,
}

/// A pending move awaiting confirmation. Paths routinely exceed the callback
/// payload ceiling, which is why this lives behind a handle.
#[derive(Debug, Clone)]
pub(crate) struct RelocationPlan {
    pub from: String,
    pub to: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmdb_id_reads_provider_ids_case_insensitively() {
        let item: EmbyItem = serde_json::from_value(serde_json::json!({
            "Id": "abc",
            "ProviderIds": {"Tmdb": "603"}
        }))
        .unwrap();
        assert_eq!(item.tmdb_id().as_deref(), Some("603"));

        let item: EmbyItem = serde_json::from_value(serde_json::json!({
            "Id": "abc",
            "ProviderIds": {"tmdb": 603}
        }))
        .unwrap();
        assert_eq!(item.tmdb_id().as_deref(), Some("603"));
    }

    #[test]
    fn search_hit_labels_by_kind() {
        let hit = SearchHit {
            item_id: "1".into(),
            name: "Pilot".into(),
            kind: "Episode".into(),
            year: None,
            series_name: Some("Severance".into()),
        };
        assert_eq!(hit.label(), "[EP] Severance - Pilot");

        let hit = SearchHit {
            item_id: "2".into(),
            name: "Arrival".into(),
            kind: "Movie".into(),
            year: Some(2016),
            series_name: None,
        };
        assert_eq!(hit.label(), "[Movie] Arrival (2016)");
    }

    #[test]
    fn inline_button_serializes_one_action() {
        let b = InlineButton::callback("Close", "c_1");
        let v = serde_json::to_value(&b).unwrap();
        assert_eq!(v["callback_data"], "c_1");
        assert!(v.get("url").is_none());
    }
}
