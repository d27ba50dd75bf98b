use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::router::App;
use crate::types::{EmbyItem, InlineButton, Keyboard, MediaStream};
use crate::util::{clip_text, escape_markdown, now_display, program_type_from_path};

const AUTO_DELETE_DELAY: Duration = Duration::from_secs(60);
const MOVIE_ANALYSIS_DELAY: Duration = Duration::from_secs(30);
const PLAYBACK_DEBOUNCE_WINDOW: Duration = Duration::from_secs(10);

/// Collapses the duplicate webhook bursts Emby emits for one playback action
/// into a single notification.
pub(crate) struct Debouncer {
    seen: Mutex<HashMap<String, Instant>>,
    window: Duration,
}

impl Debouncer {
    pub(crate) fn new(window: Duration) -> Debouncer {
        Debouncer { seen: Mutex::new(HashMap::new()), window }
    }

    pub(crate) fn standard() -> Debouncer {
        Debouncer::new(PLAYBACK_DEBOUNCE_WINDOW)
    }

    /// True when this key has not fired within the window.
    pub(crate) fn pass(&self, key: &str) -> bool {
        self.pass_at(key, Instant::now())
    }

    fn pass_at(&self, key: &str, now: Instant) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.retain(|_, last| now.duration_since(*last) < self.window);
        match seen.get(key) {
            Some(_) => false,
            None => {
                seen.insert(key.to_string(), now);
                true
            }
        }
    }
}

/// Coarse "where is this stream coming from" labels. LAN addresses are
/// answered locally; public addresses go through ip-api.com once per process.
pub(crate) struct GeoCache {
    entries: Mutex<HashMap<String, String>>,
}

impl GeoCache {
    pub(crate) fn new() -> GeoCache {
        GeoCache { entries: Mutex::new(HashMap::new()) }
    }
}

fn is_lan(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => true,
    }
}

pub(crate) fn location_label(app: &App, endpoint: &str) -> String {
    let ip = endpoint.split(':').next().unwrap_or(endpoint);
    if is_lan(ip) {
        return "LAN".to_string();
    }
    {
        let entries = app.geo.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(label) = entries.get(ip) {
            return label.clone();
        }
    }
    // A location line is decoration; one attempt, no backoff schedule.
    let label = match app.http.get_json_with_retries(
        "geoip",
        &format!("http://ip-api.com/json/{ip}"),
        &[],
        0,
    ) {
        Ok(resp) => {
            let city = resp.body.get("city").and_then(Value::as_str).unwrap_or("");
            let country = resp.body.get("country").and_then(Value::as_str).unwrap_or("");
            match (city.is_empty(), country.is_empty()) {
                (false, false) => format!("{city}, {country}"),
                (true, false) => country.to_string(),
                _ => ip.to_string(),
            }
        }
        Err(err) => {
            eprintln!("[geoip] lookup for {ip} failed: {err}");
            ip.to_string()
        }
    };
    let mut entries = app.geo.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.insert(ip.to_string(), label.clone());
    label
}

/// Entry point for a parsed webhook payload.
pub(crate) fn dispatch_event(app: &Arc<App>, payload: &Value) {
    let event = payload.get("Event").and_then(Value::as_str).unwrap_or("");
    match event {
        "library.new" => on_library_new(app, payload),
        "library.deleted" => on_library_deleted(app, payload),
        "playback.start" | "playback.unpause" => on_playback(app, payload, PlaybackKind::Start),
        "playback.pause" => on_playback(app, payload, PlaybackKind::Pause),
        "playback.stop" => on_playback(app, payload, PlaybackKind::Stop),
        other => eprintln!("[webhook] ignoring event {other:?}"),
    }
}

fn payload_item(payload: &Value) -> Option<EmbyItem> {
    serde_json::from_value(payload.get("Item")?.clone()).ok()
}

// ---------------------------------------------------------------------------
// library.new
// ---------------------------------------------------------------------------

fn on_library_new(app: &Arc<App>, payload: &Value) {
    let to_group = app.config.get_bool("settings.notification_management.library_new.to_group");
    let to_channel = app.config.get_bool("settings.notification_management.library_new.to_channel");
    let to_private = app.config.get_bool("settings.notification_management.library_new.to_private");
    if !to_group && !to_channel && !to_private {
        eprintln!("[notify] new-item notifications disabled, skipping");
        return;
    }
    let item = match payload_item(payload) {
        Some(item) => item,
        None => {
            eprintln!("[notify] library.new without a usable Item, skipping");
            return;
        }
    };
    if item.r#type.as_deref() == Some("Movie") {
        // The server is still probing streams right after import; fetch the
        // full record once analysis has had time to finish.
        let worker = app.clone();
        let item_id = item.id.clone();
        app.tasks.schedule("new-movie detail", MOVIE_ANALYSIS_DELAY, move || {
            let full = worker
                .emby
                .item(&item_id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("item {item_id} vanished before notification"))?;
            send_new_item(&worker, &full);
            Ok(())
        });
    } else {
        // Episodes and series carry enough in the webhook payload, but the
        // full record has streams and provider ids.
        let full = app.emby.item(&item.id).ok().flatten().unwrap_or(item);
        send_new_item(app, &full);
    }
}

fn send_new_item(app: &Arc<App>, item: &EmbyItem) {
    let prefix = "settings.content_settings.new_library_notification";
    let on = |leaf: &str| app.config.get_bool(&format!("{prefix}.{leaf}"));

    let mut lines: Vec<String> = Vec::new();
    let title = item_headline(item);
    if on("show_media_detail") {
        lines.push(format!("🎬 *{}*", linked_title(app, item, &title, on("media_detail_has_tmdb_link"))));
    } else {
        lines.push(format!("🎬 *{}*", escape_markdown(&title)));
    }
    if on("show_media_type") {
        if let Some(kind) = media_type_label(app, item) {
            lines.push(format!("📁 Category: {}", escape_markdown(&kind)));
        }
    }
    if on("show_overview") {
        if let Some(overview) = item.overview.as_deref().filter(|o| !o.is_empty()) {
            lines.push(format!("📝 {}", escape_markdown(&clip_text(overview, 200))));
        }
    }
    if on("show_video_spec") {
        if let Some(spec) = stream_spec(item, "Video") {
            lines.push(format!("🎞 Video: {}", escape_markdown(&spec)));
        }
    }
    if on("show_audio_spec") {
        if let Some(spec) = stream_spec(item, "Audio") {
            lines.push(format!("🔊 Audio: {}", escape_markdown(&spec)));
        }
    }
    if on("show_timestamp") {
        lines.push(format!("🕐 {}", escape_markdown(&now_display())));
    }
    let text = lines.join("\n");

    let poster = if on("show_poster") { poster_for(app, item) } else { None };
    let keyboard = if on("show_view_on_server_button") { view_button(app, item) } else { None };

    for (chat_id, enabled, delete_path) in destination_matrix(app, "new_library") {
        if !enabled {
            continue;
        }
        let auto_delete = app.config.get_bool(&delete_path);
        deliver(app, chat_id, &text, poster.as_deref(), keyboard.as_ref(), auto_delete);
    }
}

/// (chat, gated-on, auto-delete path) for each configured destination of a
/// class-routed event.
fn destination_matrix(app: &Arc<App>, event: &str) -> Vec<(i64, bool, String)> {
    let gate = |class: &str| {
        app.config
            .get_bool(&format!("settings.notification_management.library_new.to_{class}"))
    };
    let mut out = Vec::new();
    for &chat in &app.settings.group_chat_ids {
        out.push((chat, gate("group"), format!("settings.auto_delete_settings.{event}.to_group")));
    }
    for &chat in &app.settings.channel_chat_ids {
        out.push((chat, gate("channel"), format!("settings.auto_delete_settings.{event}.to_channel")));
    }
    for &chat in &app.settings.private_chat_ids {
        out.push((chat, gate("private"), format!("settings.auto_delete_settings.{event}.to_private")));
    }
    out
}

// ---------------------------------------------------------------------------
// library.deleted
// ---------------------------------------------------------------------------

fn on_library_deleted(app: &Arc<App>, payload: &Value) {
    if !app.config.get_bool("settings.notification_management.library_deleted") {
        eprintln!("[notify] deleted-item notifications disabled, skipping");
        return;
    }
    let item = match payload_item(payload) {
        Some(item) => item,
        None => return,
    };
    let prefix = "settings.content_settings.library_deleted_notification";
    let on = |leaf: &str| app.config.get_bool(&format!("{prefix}.{leaf}"));

    let mut lines: Vec<String> = Vec::new();
    let title = item_headline(&item);
    if on("show_media_detail") {
        lines.push(format!("🗑 *{}*", linked_title(app, &item, &title, on("media_detail_has_tmdb_link"))));
    } else {
        lines.push(format!("🗑 *{}*", escape_markdown(&title)));
    }
    lines.push("Removed from the library".to_string());
    if on("show_media_type") {
        if let Some(kind) = media_type_label(app, &item) {
            lines.push(format!("📁 Category: {}", escape_markdown(&kind)));
        }
    }
    if on("show_overview") {
        if let Some(overview) = item.overview.as_deref().filter(|o| !o.is_empty()) {
            lines.push(format!("📝 {}", escape_markdown(&clip_text(overview, 200))));
        }
    }
    if on("show_timestamp") {
        lines.push(format!("🕐 {}", escape_markdown(&now_display())));
    }
    let text = lines.join("\n");
    let poster = if on("show_poster") { poster_for(app, &item) } else { None };
    let auto_delete = app.config.get_bool("settings.auto_delete_settings.library_deleted");

    for &chat in app
        .settings
        .group_chat_ids
        .iter()
        .chain(&app.settings.channel_chat_ids)
    {
        deliver(app, chat, &text, poster.as_deref(), None, auto_delete);
    }
}

// ---------------------------------------------------------------------------
// playback.*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlaybackKind {
    Start,
    Pause,
    Stop,
}

impl PlaybackKind {
    fn gate(self) -> &'static str {
        match self {
            PlaybackKind::Start => "settings.notification_management.playback_start",
            PlaybackKind::Pause => "settings.notification_management.playback_pause",
            PlaybackKind::Stop => "settings.notification_management.playback_stop",
        }
    }

    fn delete_gate(self) -> &'static str {
        match self {
            PlaybackKind::Start => "settings.auto_delete_settings.playback_start",
            PlaybackKind::Pause => "settings.auto_delete_settings.playback_pause",
            PlaybackKind::Stop => "settings.auto_delete_settings.playback_stop",
        }
    }

    fn headline(self) -> &'static str {
        match self {
            PlaybackKind::Start => "▶️ Playback started",
            PlaybackKind::Pause => "⏸ Playback paused",
            PlaybackKind::Stop => "⏹ Playback stopped",
        }
    }
}

fn on_playback(app: &Arc<App>, payload: &Value, kind: PlaybackKind) {
    if !app.config.get_bool(kind.gate()) {
        return;
    }
    let item = match payload_item(payload) {
        Some(item) => item,
        None => return,
    };
    let user_name = payload
        .pointer("/User/Name")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let debounce_key = format!("{user_name}:{}:{kind:?}", item.id);
    if !app.playback_debounce.pass(&debounce_key) {
        return;
    }

    let prefix = "settings.content_settings.playback_action";
    let on = |leaf: &str| app.config.get_bool(&format!("{prefix}.{leaf}"));

    let mut lines = vec![kind.headline().to_string()];
    let title = item_headline(&item);
    if on("show_media_detail") {
        lines.push(format!("*{}*", linked_title(app, &item, &title, on("media_detail_has_tmdb_link"))));
    } else {
        lines.push(format!("*{}*", escape_markdown(&title)));
    }
    if on("show_user") {
        lines.push(format!("👤 {}", escape_markdown(user_name)));
    }
    if on("show_player") {
        if let Some(client) = payload.pointer("/Session/Client").and_then(Value::as_str) {
            lines.push(format!("📱 Player: {}", escape_markdown(client)));
        }
    }
    if on("show_device") {
        if let Some(device) = payload.pointer("/Session/DeviceName").and_then(Value::as_str) {
            lines.push(format!("💻 Device: {}", escape_markdown(device)));
        }
    }
    if on("show_location") {
        if let Some(endpoint) = payload.pointer("/Session/RemoteEndPoint").and_then(Value::as_str)
        {
            lines.push(format!("🌐 From: {}", escape_markdown(&location_label(app, endpoint))));
        }
    }
    if on("show_progress") {
        let position = payload
            .pointer("/PlaybackInfo/PositionTicks")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if let Some(runtime) = item.run_time_ticks.filter(|&t| t > 0) {
            lines.push(format!(
                "⏳ Progress: {} / {}",
                crate::util::format_ticks_to_hms(position),
                crate::util::format_ticks_to_hms(runtime)
            ));
        }
    }
    if on("show_video_spec") {
        if let Some(spec) = stream_spec(&item, "Video") {
            lines.push(format!("🎞 Video: {}", escape_markdown(&spec)));
        }
    }
    if on("show_audio_spec") {
        if let Some(spec) = stream_spec(&item, "Audio") {
            lines.push(format!("🔊 Audio: {}", escape_markdown(&spec)));
        }
    }
    if on("show_media_type") {
        if let Some(kind_label) = media_type_label(app, &item) {
            lines.push(format!("📁 Category: {}", escape_markdown(&kind_label)));
        }
    }
    if on("show_overview") {
        if let Some(overview) = item.overview.as_deref().filter(|o| !o.is_empty()) {
            lines.push(format!("📝 {}", escape_markdown(&clip_text(overview, 150))));
        }
    }
    if on("show_timestamp") {
        lines.push(format!("🕐 {}", escape_markdown(&now_display())));
    }
    let text = lines.join("\n");
    let poster = if on("show_poster") { poster_for(app, &item) } else { None };
    let keyboard = if on("show_view_on_server_button") { view_button(app, &item) } else { None };
    let auto_delete = app.config.get_bool(kind.delete_gate());

    for &chat in &app.settings.group_chat_ids {
        deliver(app, chat, &text, poster.as_deref(), keyboard.as_ref(), auto_delete);
    }
}

// ---------------------------------------------------------------------------
// Shared formatting helpers
// ---------------------------------------------------------------------------

pub(crate) fn item_headline(item: &EmbyItem) -> String {
    match item.r#type.as_deref() {
        Some("Episode") => {
            let series = item.series_name.as_deref().unwrap_or("Unknown series");
            match (item.parent_index_number, item.index_number) {
                (Some(s), Some(e)) => format!("{series} S{s:02}E{e:02} {}", item.display_name()),
                _ => format!("{series} - {}", item.display_name()),
            }
        }
        _ => {
            let year = item.production_year.map(|y| y.to_string()).or_else(|| {
                item.path.as_deref().and_then(crate::util::extract_year_from_path)
            });
            match year {
                Some(year) => format!("{} ({year})", item.display_name()),
                None => item.display_name().to_string(),
            }
        }
    }
}

/// Headline with an optional TMDB link wrapped around it.
pub(crate) fn linked_title(app: &App, item: &EmbyItem, title: &str, want_link: bool) -> String {
    if want_link {
        if let Some(url) = tmdb_title_url(app, item) {
            return format!("[{}]({url})", escape_markdown(title));
        }
    }
    escape_markdown(title)
}

fn tmdb_media_type(item: &EmbyItem) -> &'static str {
    match item.r#type.as_deref() {
        Some("Movie") => "movie",
        _ => "tv",
    }
}

pub(crate) fn tmdb_title_url(app: &App, item: &EmbyItem) -> Option<String> {
    if !app.tmdb.enabled() {
        return None;
    }
    let id = item.tmdb_id()?;
    Some(app.tmdb.title_url(tmdb_media_type(item), &id))
}

pub(crate) fn poster_for(app: &App, item: &EmbyItem) -> Option<String> {
    let id = item.tmdb_id().or_else(|| {
        // Series without provider ids can still be matched by name.
        match item.r#type.as_deref() {
            Some("Series") => app
                .tmdb
                .search_tv_id(item.display_name(), item.production_year),
            _ => None,
        }
    })?;
    app.tmdb.poster_url(tmdb_media_type(item), &id)
}

pub(crate) fn media_type_label(app: &App, item: &EmbyItem) -> Option<String> {
    program_type_from_path(app.settings.media_base_path.as_deref(), item.path.as_deref())
        .or_else(|| item.r#type.clone())
}

pub(crate) fn stream_spec(item: &EmbyItem, kind: &str) -> Option<String> {
    let streams = item.media_streams.as_ref()?;
    let stream: &MediaStream = streams
        .iter()
        .find(|s| s.r#type.as_deref() == Some(kind))?;
    if let Some(display) = stream.display_title.as_deref() {
        return Some(display.to_string());
    }
    let codec = stream.codec.as_deref().unwrap_or("?");
    match (stream.width, stream.height) {
        (Some(w), Some(h)) => Some(format!("{codec} {w}x{h}")),
        _ => Some(codec.to_string()),
    }
}

pub(crate) fn view_button(app: &App, item: &EmbyItem) -> Option<Keyboard> {
    let remote = app.settings.emby_remote_url.as_deref()?;
    let url = app.emby.item_url(remote, &item.id, None);
    Some(vec![vec![InlineButton::link("▶️ View on server", url)]])
}

/// Send a notification and, when asked, schedule its deletion after the
/// linger window.
pub(crate) fn deliver(
    app: &Arc<App>,
    chat_id: i64,
    text: &str,
    poster: Option<&str>,
    keyboard: Option<&Keyboard>,
    auto_delete: bool,
) {
    let sent = match poster {
        Some(url) => app.telegram.send_photo(chat_id, url, text, keyboard),
        None => app.telegram.send_message(chat_id, text, keyboard),
    };
    match sent {
        Ok(Some(message_id)) if auto_delete => {
            let worker = app.clone();
            app.tasks.schedule(
                format!("auto-delete {chat_id}/{message_id}"),
                AUTO_DELETE_DELAY,
                move || {
                    worker
                        .telegram
                        .delete_message(chat_id, message_id)
                        .map_err(|e| e.to_string())
                },
            );
        }
        Ok(_) => {}
        Err(err) => eprintln!("[notify] send to {chat_id} failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lan_addresses_never_hit_the_network() {
        assert!(is_lan("192.168.1.20"));
        assert!(is_lan("10.0.0.7"));
        assert!(is_lan("127.0.0.1"));
        assert!(is_lan("::1"));
        // Unparseable input is treated as local rather than leaked upstream.
        assert!(is_lan("not-an-ip"));
        assert!(!is_lan("8.8.8.8"));
    }

    #[test]
    fn debouncer_blocks_within_window_only() {
        let debounce = Debouncer::new(Duration::from_secs(10));
        let start = Instant::now();
        assert!(debounce.pass_at("alice:42:Start", start));
        assert!(!debounce.pass_at("alice:42:Start", start + Duration::from_secs(3)));
        // A different key is unaffected.
        assert!(debounce.pass_at("bob:42:Start", start + Duration::from_secs(3)));
        // Past the window the key fires again.
        assert!(debounce.pass_at("alice:42:Start", start + Duration::from_secs(11)));
    }

    #[test]
    fn episode_headline_has_season_episode_numbers() {
        let item: EmbyItem = serde_json::from_value(serde_json::json!({
            "Id": "1",
            "Name": "The We We Are",
            "Type": "Episode",
            "SeriesName": "Severance",
            "ParentIndexNumber": 1,
            "IndexNumber": 9,
        }))
        .unwrap();
        assert_eq!(item_headline(&item), "Severance S01E09 The We We Are");
    }

    #[test]
    fn stream_spec_prefers_display_title() {
        let item: EmbyItem = serde_json::from_value(serde_json::json!({
            "Id": "1",
            "MediaStreams": [
                {"Type": "Video", "DisplayTitle": "4K HEVC", "Codec": "hevc"},
                {"Type": "Audio", "Codec": "eac3"}
            ]
        }))
        .unwrap();
        assert_eq!(stream_spec(&item, "Video").as_deref(), Some("4K HEVC"));
        assert_eq!(stream_spec(&item, "Audio").as_deref(), Some("eac3"));
        assert_eq!(stream_spec(&item, "Subtitle"), None);
    }
}
