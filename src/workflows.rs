use std::sync::Arc;
use std::time::Duration;

use crate::callback::{encode, Verb};
use crate::cache::HandlePayload;
use crate::conversation::AwaitReason;
use crate::notify;
use crate::router::App;
use crate::types::{DeletionPlan, EmbyItem, InlineButton, Keyboard, PlanTarget, RelocationPlan, SearchHit};
use crate::util::{clip_text, escape_markdown};

const PAGE_SIZE: usize = 10;
pub(crate) const STATUS_LINGER: Duration = Duration::from_secs(60);
const DETAIL_LINGER: Duration = Duration::from_secs(90);

type Outcome = Result<(), Box<dyn std::error::Error>>;

pub(crate) fn schedule_delete(app: &Arc<App>, chat_id: i64, message_id: i64, delay: Duration) {
    let worker = app.clone();
    app.tasks.schedule(
        format!("expire message {chat_id}/{message_id}"),
        delay,
        move || {
            worker
                .telegram
                .delete_message(chat_id, message_id)
                .map_err(|e| e.to_string())
        },
    );
}

pub(crate) fn send_transient(app: &Arc<App>, chat_id: i64, text: &str, linger: Duration) -> Outcome {
    if let Some(message_id) = app.telegram.send_message(chat_id, text, None)? {
        schedule_delete(app, chat_id, message_id, linger);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings menu
// ---------------------------------------------------------------------------

pub(crate) fn send_settings_menu(
    app: &Arc<App>,
    chat_id: i64,
    initiator: i64,
    menu_key: &str,
    message_id: Option<i64>,
) -> Outcome {
    let (text, keyboard) =
        app.menu
            .render(menu_key, initiator, |path| app.config.get_bool(path))?;
    match message_id {
        Some(message_id) => app.telegram.edit_message(chat_id, message_id, &text, Some(&keyboard))?,
        None => {
            app.telegram.send_message(chat_id, &text, Some(&keyboard))?;
        }
    }
    Ok(())
}

pub(crate) fn toggle_setting(
    app: &Arc<App>,
    chat_id: i64,
    message_id: Option<i64>,
    initiator: i64,
    index: usize,
) -> Outcome {
    let path = match app.menu.toggle_path(index) {
        Some(path) => path,
        None => {
            // Button minted by an older build; the index no longer exists.
            return send_transient(app, chat_id, "That switch is gone, reopen the menu", STATUS_LINGER);
        }
    };
    app.config.toggle(path)?;
    let menu_key = app.menu.toggle_parent(index).unwrap_or_else(|| app.menu.root_key());
    send_settings_menu(app, chat_id, initiator, menu_key, message_id)
}

pub(crate) fn close_menu(app: &Arc<App>, chat_id: i64, message_id: i64) -> Outcome {
    app.telegram.delete_message(chat_id, message_id)?;
    send_transient(app, chat_id, "☑️ Settings saved", STATUS_LINGER)
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

pub(crate) fn prompt_search(app: &Arc<App>, chat_id: i64, initiator: i64) -> Outcome {
    app.pending.begin(chat_id, initiator, AwaitReason::SearchQuery);
    let keyboard = cancel_row(initiator)?;
    app.telegram
        .send_message(chat_id, "🔍 What should I look for?", Some(&keyboard))?;
    Ok(())
}

pub(crate) fn run_search(app: &Arc<App>, chat_id: i64, user_id: i64, query: &str) -> Outcome {
    let query = query.trim();
    if query.is_empty() {
        return send_transient(app, chat_id, "Empty search, try a title", STATUS_LINGER);
    }
    let items = app.emby.search(query)?;
    if items.is_empty() {
        return send_transient(
            app,
            chat_id,
            &format!("Nothing in the library matches {}", escape_markdown(query)),
            STATUS_LINGER,
        );
    }
    let hits: Vec<SearchHit> = items.iter().map(SearchHit::from_item).collect();
    let handle = app.handles.put(HandlePayload::Search(hits));
    send_results_page(app, chat_id, user_id, &handle, 1, None)
}

pub(crate) fn send_results_page(
    app: &Arc<App>,
    chat_id: i64,
    initiator: i64,
    handle: &str,
    page: usize,
    message_id: Option<i64>,
) -> Outcome {
    let hits = match app.handles.search(handle) {
        Some(hits) => hits,
        None => return expired_notice(app, chat_id, message_id),
    };
    let show_kind = app
        .config
        .get_bool("settings.content_settings.search_display.show_media_type_in_list");
    let (page, pages, start, end) = page_bounds(hits.len(), page);
    let slice = &hits[start..end];

    let text = format!(
        "🔍 *Search results*\nFound {}, page {page} of {pages}",
        hits.len()
    );
    let mut keyboard: Keyboard = Vec::new();
    for (offset, hit) in slice.iter().enumerate() {
        let label = if show_kind { hit.label() } else { hit.name.clone() };
        keyboard.push(vec![InlineButton::callback(
            label,
            encode(
                &Verb::SearchDetail { handle: handle.to_string(), index: start + offset },
                initiator,
            )?,
        )]);
    }
    let mut nav = Vec::new();
    if page > 1 {
        nav.push(InlineButton::callback(
            "◀️ Prev",
            encode(&Verb::SearchPage { handle: handle.to_string(), page: page - 1 }, initiator)?,
        ));
    }
    if page < pages {
        nav.push(InlineButton::callback(
            "Next ▶️",
            encode(&Verb::SearchPage { handle: handle.to_string(), page: page + 1 }, initiator)?,
        ));
    }
    nav.push(InlineButton::callback("✖️ Close", encode(&Verb::Cancel, initiator)?));
    keyboard.push(nav);

    match message_id {
        Some(message_id) => {
            app.telegram.edit_message(chat_id, message_id, &text, Some(&keyboard))?
        }
        None => {
            app.telegram.send_message(chat_id, &text, Some(&keyboard))?;
        }
    }
    Ok(())
}

/// Clamp a requested page into range and return (page, pages, start, end).
fn page_bounds(total: usize, requested: usize) -> (usize, usize, usize, usize) {
    let pages = total.div_ceil(PAGE_SIZE).max(1);
    let page = requested.clamp(1, pages);
    let start = (page - 1) * PAGE_SIZE;
    (page, pages, start, (start + PAGE_SIZE).min(total))
}

fn expired_notice(app: &Arc<App>, chat_id: i64, message_id: Option<i64>) -> Outcome {
    let text = "These results have expired, run the search again";
    match message_id {
        Some(message_id) => app.telegram.edit_message(chat_id, message_id, text, None)?,
        None => {
            send_transient(app, chat_id, text, STATUS_LINGER)?;
        }
    }
    Ok(())
}

pub(crate) fn send_search_detail(
    app: &Arc<App>,
    chat_id: i64,
    initiator: i64,
    handle: &str,
    index: usize,
) -> Outcome {
    let hits = match app.handles.search(handle) {
        Some(hits) => hits,
        None => return expired_notice(app, chat_id, None),
    };
    let hit = match hits.get(index) {
        Some(hit) => hit,
        None => return expired_notice(app, chat_id, None),
    };
    let item = app
        .emby
        .item(&hit.item_id)?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "item vanished"))?;

    let is_series = item.r#type.as_deref() == Some("Series");
    let prefix = if is_series {
        "settings.content_settings.search_display.series"
    } else {
        "settings.content_settings.search_display.movie"
    };
    let on = |leaf: &str| app.config.get_bool(&format!("{prefix}.{leaf}"));

    let title = notify::item_headline(&item);
    let mut lines = vec![format!(
        "{} *{}*",
        if is_series { "📺" } else { "🎬" },
        notify::linked_title(app, &item, &title, on("title_has_tmdb_link"))
    )];
    if on("show_type") {
        if let Some(kind) = item.r#type.as_deref() {
            lines.push(format!("🏷 Type: {}", escape_markdown(kind)));
        }
    }
    if on("show_category") {
        if let Some(category) = notify::media_type_label(app, &item) {
            lines.push(format!("📁 Category: {}", escape_markdown(&category)));
        }
    }
    if on("show_overview") {
        if let Some(overview) = item.overview.as_deref().filter(|o| !o.is_empty()) {
            lines.push(format!("📝 {}", escape_markdown(&clip_text(overview, 300))));
        }
    }
    if is_series {
        series_detail_lines(app, &item, &mut lines);
    } else {
        if on("show_video_spec") {
            if let Some(spec) = notify::stream_spec(&item, "Video") {
                lines.push(format!("🎞 Video: {}", escape_markdown(&spec)));
            }
        }
        if on("show_audio_spec") {
            if let Some(spec) = notify::stream_spec(&item, "Audio") {
                lines.push(format!("🔊 Audio: {}", escape_markdown(&spec)));
            }
        }
        if on("show_added_time") {
            if let Some(added) = item.date_created.as_deref() {
                lines.push(format!("📥 Added: {}", escape_markdown(&clip_text(added, 10))));
            }
        }
    }
    let text = lines.join("\n");

    let poster = if on("show_poster") { notify::poster_for(app, &item) } else { None };
    let mut keyboard: Keyboard = Vec::new();
    if on("show_view_on_server_button") {
        if let Some(mut rows) = notify::view_button(app, &item) {
            keyboard.append(&mut rows);
        }
    }
    keyboard.push(vec![
        InlineButton::callback(
            "◀️ Results",
            encode(
                &Verb::SearchPage { handle: handle.to_string(), page: index / PAGE_SIZE + 1 },
                initiator,
            )?,
        ),
        InlineButton::callback("✖️ Close", encode(&Verb::Cancel, initiator)?),
    ]);

    let sent = match poster.as_deref() {
        Some(url) => app.telegram.send_photo(chat_id, url, &text, Some(&keyboard))?,
        None => app.telegram.send_message(chat_id, &text, Some(&keyboard))?,
    };
    if let Some(message_id) = sent {
        schedule_delete(app, chat_id, message_id, DETAIL_LINGER);
    }
    Ok(())
}

fn series_detail_lines(app: &Arc<App>, item: &EmbyItem, lines: &mut Vec<String>) {
    let prefix = "settings.content_settings.search_display.series";
    let on = |leaf: &str| app.config.get_bool(&format!("{prefix}.{leaf}"));
    let latest = match app.emby.latest_episode(&item.id) {
        Ok(latest) => latest,
        Err(err) => {
            eprintln!("[search] latest episode lookup failed: {err}");
            None
        }
    };
    let latest = match latest {
        Some(latest) => latest,
        None => return,
    };
    if on("update_progress.show_latest_episode") {
        let line = notify::item_headline(&latest);
        lines.push(format!(
            "📡 Updated to: {}",
            notify::linked_title(app, item, &line, on("update_progress.latest_episode_has_tmdb_link"))
        ));
    }
    if on("update_progress.show_overview") {
        if let Some(overview) = latest.overview.as_deref().filter(|o| !o.is_empty()) {
            lines.push(format!("📝 {}", escape_markdown(&clip_text(overview, 200))));
        }
    }
    if on("update_progress.show_added_time") {
        if let Some(added) = latest.date_created.as_deref() {
            lines.push(format!("📥 Added: {}", escape_markdown(&clip_text(added, 10))));
        }
    }
    if on("update_progress.show_progress_status") {
        if let (Some(tmdb_id), Some(season), Some(episode)) =
            (item.tmdb_id(), latest.parent_index_number, latest.index_number)
        {
            if let Some(progress) = app.tmdb.season_progress(&tmdb_id, season) {
                let state = if episode as usize >= progress.total_episodes
                    && progress.is_finale_marked
                {
                    "complete".to_string()
                } else {
                    format!("{episode} of {} aired", progress.total_episodes)
                };
                lines.push(format!("📈 Season {season}: {}", escape_markdown(&state)));
            }
        }
    }
    if on("season_specs.show_video_spec") {
        if let Some(spec) = notify::stream_spec(&latest, "Video") {
            lines.push(format!("🎞 Video: {}", escape_markdown(&spec)));
        }
    }
    if on("season_specs.show_audio_spec") {
        if let Some(spec) = notify::stream_spec(&latest, "Audio") {
            lines.push(format!("🔊 Audio: {}", escape_markdown(&spec)));
        }
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub(crate) fn send_status(app: &Arc<App>, chat_id: i64, initiator: i64) -> Outcome {
    let sessions = app.emby.active_sessions()?;
    if sessions.is_empty() {
        return send_transient(app, chat_id, "😴 Nothing is playing right now", STATUS_LINGER);
    }
    let prefix = "settings.content_settings.status_feedback";
    let on = |leaf: &str| app.config.get_bool(&format!("{prefix}.{leaf}"));

    for session in &sessions {
        let item = match &session.now_playing_item {
            Some(item) => item,
            None => continue,
        };
        let user = session.user_name.as_deref().unwrap_or("unknown");
        let paused = session
            .play_state
            .as_ref()
            .and_then(|p| p.is_paused)
            .unwrap_or(false);
        let title = notify::item_headline(item);
        let mut lines = vec![format!(
            "👤 {} is {}",
            escape_markdown(user),
            if paused { "paused on" } else { "watching" }
        )];
        if on("show_media_detail") {
            lines.push(format!(
                "*{}*",
                notify::linked_title(app, item, &title, on("media_detail_has_tmdb_link"))
            ));
        } else {
            lines.push(format!("*{}*", escape_markdown(&title)));
        }
        if on("show_player") {
            if let Some(client) = session.client.as_deref() {
                lines.push(format!("📱 Player: {}", escape_markdown(client)));
            }
        }
        if on("show_device") {
            if let Some(device) = session.device_name.as_deref() {
                lines.push(format!("💻 Device: {}", escape_markdown(device)));
            }
        }
        if on("show_location") {
            if let Some(endpoint) = session.remote_end_point.as_deref() {
                lines.push(format!(
                    "🌐 From: {}",
                    escape_markdown(&notify::location_label(app, endpoint))
                ));
            }
        }
        let position = session
            .play_state
            .as_ref()
            .and_then(|p| p.position_ticks)
            .unwrap_or(0);
        if let Some(runtime) = item.run_time_ticks.filter(|&t| t > 0) {
            lines.push(format!(
                "⏳ {} / {}",
                crate::util::format_ticks_to_hms(position),
                crate::util::format_ticks_to_hms(runtime)
            ));
        }
        if on("show_media_type") {
            if let Some(kind) = notify::media_type_label(app, item) {
                lines.push(format!("📁 Category: {}", escape_markdown(&kind)));
            }
        }
        if on("show_overview") {
            if let Some(overview) = item.overview.as_deref().filter(|o| !o.is_empty()) {
                lines.push(format!("📝 {}", escape_markdown(&clip_text(overview, 150))));
            }
        }
        if on("show_timestamp") {
            lines.push(format!("🕐 {}", escape_markdown(&crate::util::now_display())));
        }
        let text = lines.join("\n");

        let poster = if on("show_poster") { notify::poster_for(app, item) } else { None };
        let mut keyboard: Keyboard = Vec::new();
        if on("show_view_on_server_button") {
            if let Some(mut rows) = notify::view_button(app, item) {
                keyboard.append(&mut rows);
            }
        }
        let mut controls = Vec::new();
        if on("show_terminate_session_button") {
            controls.push(InlineButton::callback(
                "⏹ Terminate",
                encode(&Verb::TerminateSession { session_id: session.id.clone() }, initiator)?,
            ));
        }
        if on("show_send_message_button") {
            controls.push(InlineButton::callback(
                "✉️ Message",
                encode(&Verb::MessageSession { session_id: session.id.clone() }, initiator)?,
            ));
        }
        if !controls.is_empty() {
            keyboard.push(controls);
        }
        let keyboard = (!keyboard.is_empty()).then_some(keyboard);
        let sent = match poster.as_deref() {
            Some(url) => app.telegram.send_photo(chat_id, url, &text, keyboard.as_ref())?,
            None => app.telegram.send_message(chat_id, &text, keyboard.as_ref())?,
        };
        if let Some(message_id) = sent {
            schedule_delete(app, chat_id, message_id, STATUS_LINGER);
        }
    }

    let mut fleet = Vec::new();
    if on("show_broadcast_button") {
        fleet.push(InlineButton::callback("📢 Broadcast", encode(&Verb::Broadcast, initiator)?));
    }
    if on("show_terminate_all_button") {
        fleet.push(InlineButton::callback(
            "🛑 Terminate all",
            encode(&Verb::TerminateAll, initiator)?,
        ));
    }
    if !fleet.is_empty() {
        let text = format!("🎛 {} active sessions", sessions.len());
        if let Some(message_id) =
            app.telegram.send_message(chat_id, &text, Some(&vec![fleet]))?
        {
            schedule_delete(app, chat_id, message_id, STATUS_LINGER);
        }
    }
    Ok(())
}

pub(crate) fn terminate_session(app: &Arc<App>, chat_id: i64, session_id: &str) -> Outcome {
    app.emby.stop_session(session_id)?;
    send_transient(app, chat_id, "⏹ Session terminated", STATUS_LINGER)
}

pub(crate) fn prompt_session_message(
    app: &Arc<App>,
    chat_id: i64,
    initiator: i64,
    session_id: &str,
) -> Outcome {
    app.pending.begin(
        chat_id,
        initiator,
        AwaitReason::SessionMessage { session_id: session_id.to_string() },
    );
    let keyboard = cancel_row(initiator)?;
    app.telegram.send_message(
        chat_id,
        "✉️ Send the text to show on that screen",
        Some(&keyboard),
    )?;
    Ok(())
}

pub(crate) fn send_session_message(
    app: &Arc<App>,
    chat_id: i64,
    session_id: &str,
    text: &str,
) -> Outcome {
    app.emby.message_session(session_id, "Message from the operator", text)?;
    send_transient(app, chat_id, "✉️ Delivered", STATUS_LINGER)
}

pub(crate) fn prompt_broadcast(app: &Arc<App>, chat_id: i64, initiator: i64) -> Outcome {
    app.pending.begin(chat_id, initiator, AwaitReason::BroadcastMessage);
    let keyboard = cancel_row(initiator)?;
    app.telegram.send_message(
        chat_id,
        "📢 Send the text to broadcast to every active session",
        Some(&keyboard),
    )?;
    Ok(())
}

pub(crate) fn broadcast(app: &Arc<App>, chat_id: i64, text: &str) -> Outcome {
    let sessions = app.emby.active_sessions()?;
    let mut delivered = 0usize;
    for session in &sessions {
        match app.emby.message_session(&session.id, "Message from the operator", text) {
            Ok(()) => delivered += 1,
            Err(err) => eprintln!("[sessions] broadcast to {} failed: {err}", session.id),
        }
    }
    send_transient(
        app,
        chat_id,
        &format!("📢 Delivered to {delivered} of {} sessions", sessions.len()),
        STATUS_LINGER,
    )
}

pub(crate) fn prompt_terminate_all(app: &Arc<App>, chat_id: i64, initiator: i64) -> Outcome {
    let keyboard = vec![vec![
        InlineButton::callback("🛑 Yes, stop everything", encode(&Verb::TerminateAllConfirm, initiator)?),
        InlineButton::callback("✖️ Cancel", encode(&Verb::Cancel, initiator)?),
    ]];
    app.telegram.send_message(
        chat_id,
        "⚠️ Terminate every active session?",
        Some(&keyboard),
    )?;
    Ok(())
}

pub(crate) fn terminate_all(app: &Arc<App>, chat_id: i64) -> Outcome {
    let sessions = app.emby.active_sessions()?;
    let mut stopped = 0usize;
    for session in &sessions {
        match app.emby.stop_session(&session.id) {
            Ok(()) => stopped += 1,
            Err(err) => eprintln!("[sessions] stop {} failed: {err}", session.id),
        }
    }
    send_transient(
        app,
        chat_id,
        &format!("🛑 Stopped {stopped} of {} sessions", sessions.len()),
        STATUS_LINGER,
    )
}

// ---------------------------------------------------------------------------
// Destructive batches
// ---------------------------------------------------------------------------

pub(crate) fn start_prune(app: &Arc<App>, chat_id: i64, initiator: i64, query: &str) -> Outcome {
    let items = app.emby.search(query)?;
    let item = match items.first() {
        Some(item) => item,
        None => {
            return send_transient(
                app,
                chat_id,
                &format!("No library match for {}", escape_markdown(query)),
                STATUS_LINGER,
            )
        }
    };
    match item.r#type.as_deref() {
        Some("Series") => {
            app.pending.begin(
                chat_id,
                initiator,
                AwaitReason::SeasonSelection {
                    series_id: item.id.clone(),
                    series_name: item.display_name().to_string(),
                },
            );
            let keyboard = cancel_row(initiator)?;
            app.telegram.send_message(
                chat_id,
                &format!(
                    "📺 *{}*\nReply with a season number to prune, or 0 for the whole series",
                    escape_markdown(item.display_name())
                ),
                Some(&keyboard),
            )?;
            Ok(())
        }
        _ => {
            let plan = DeletionPlan {
                title: notify::item_headline(item),
                targets: vec![PlanTarget {
                    item_id: item.id.clone(),
                    label: notify::item_headline(item),
                }],
            };
            propose_deletion(app, chat_id, initiator, plan)
        }
    }
}

pub(crate) fn prune_season_reply(
    app: &Arc<App>,
    chat_id: i64,
    initiator: i64,
    series_id: &str,
    series_name: &str,
    reply: &str,
) -> Outcome {
    let season: i32 = match reply.trim().parse() {
        Ok(season) => season,
        Err(_) => {
            return send_transient(
                app,
                chat_id,
                "That was not a season number, prune cancelled",
                STATUS_LINGER,
            )
        }
    };
    let plan = if season == 0 {
        DeletionPlan {
            title: series_name.to_string(),
            targets: vec![PlanTarget {
                item_id: series_id.to_string(),
                label: format!("{series_name} and every episode"),
            }],
        }
    } else {
        let episodes = app.emby.season_episodes(series_id, season)?;
        if episodes.is_empty() {
            return send_transient(
                app,
                chat_id,
                &format!("Season {season} has no episodes here"),
                STATUS_LINGER,
            );
        }
        DeletionPlan {
            title: format!("{series_name} season {season}"),
            targets: episodes
                .iter()
                .map(|e| PlanTarget {
                    item_id: e.id.clone(),
                    label: notify::item_headline(e),
                })
                .collect(),
        }
    };
    propose_deletion(app, chat_id, initiator, plan)
}

fn propose_deletion(app: &Arc<App>, chat_id: i64, initiator: i64, plan: DeletionPlan) -> Outcome {
    let mut lines = vec![format!(
        "🗑 *Delete plan: {}*\n{} target{}",
        escape_markdown(&plan.title),
        plan.targets.len(),
        if plan.targets.len() == 1 { "" } else { "s" }
    )];
    for target in plan.targets.iter().take(15) {
        lines.push(format!("• {}", escape_markdown(&target.label)));
    }
    if plan.targets.len() > 15 {
        lines.push(format!("… and {} more", plan.targets.len() - 15));
    }
    let handle = app.handles.put(HandlePayload::Deletion(plan));
    let keyboard = vec![vec![
        InlineButton::callback(
            "🗑 Delete",
            encode(&Verb::ConfirmDeletion { handle: handle.clone() }, initiator)?,
        ),
        InlineButton::callback("✖️ Cancel", encode(&Verb::Cancel, initiator)?),
    ]];
    app.telegram
        .send_message(chat_id, &lines.join("\n"), Some(&keyboard))?;
    Ok(())
}

/// Run every target of a plan through `delete`, collecting one result per
/// target. One failure never aborts the rest and nothing is retried across
/// targets; the caller reports the per-target outcome.
pub(crate) fn execute_plan_targets<F>(
    targets: &[PlanTarget],
    mut delete: F,
) -> Vec<(String, Result<(), String>)>
where
    F: FnMut(&PlanTarget) -> Result<(), String>,
{
    targets
        .iter()
        .map(|target| (target.label.clone(), delete(target)))
        .collect()
}

pub(crate) fn confirm_deletion(app: &Arc<App>, chat_id: i64, handle: &str) -> Outcome {
    let plan = match app.handles.deletion(handle) {
        Some(plan) => plan,
        None => {
            return send_transient(app, chat_id, "That plan has expired, start over", STATUS_LINGER)
        }
    };
    app.handles.discard(handle);
    let report = execute_plan_targets(&plan.targets, |target| {
        app.emby.delete_item(&target.item_id).map_err(|e| e.to_string())
    });
    let ok = report.iter().filter(|(_, r)| r.is_ok()).count();
    let mut lines = vec![format!(
        "🗑 *{}*\nRemoved {ok} of {} targets",
        escape_markdown(&plan.title),
        report.len()
    )];
    for (label, result) in &report {
        match result {
            Ok(()) => lines.push(format!("✅ {}", escape_markdown(label))),
            Err(err) => lines.push(format!(
                "❌ {}: {}",
                escape_markdown(label),
                escape_markdown(&clip_text(err, 80))
            )),
        }
    }
    app.telegram.send_message(chat_id, &lines.join("\n"), None)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Relocation
// ---------------------------------------------------------------------------

pub(crate) fn start_relocation(
    app: &Arc<App>,
    chat_id: i64,
    initiator: i64,
    from: &str,
    to: &str,
) -> Outcome {
    if let Some(base) = app.settings.media_base_path.as_deref() {
        if !from.starts_with(base) {
            return send_transient(
                app,
                chat_id,
                "Source is outside the library root, refusing",
                STATUS_LINGER,
            );
        }
    }
    let plan = RelocationPlan { from: from.to_string(), to: to.to_string() };
    let text = format!(
        "🗂 *Move*\nFrom: {}\nTo: {}",
        escape_markdown(&plan.from),
        escape_markdown(&plan.to)
    );
    let handle = app.handles.put(HandlePayload::Relocation(plan));
    let keyboard = vec![vec![
        InlineButton::callback(
            "🗂 Move",
            encode(&Verb::ConfirmRelocation { handle: handle.clone() }, initiator)?,
        ),
        InlineButton::callback("✖️ Cancel", encode(&Verb::Cancel, initiator)?),
    ]];
    app.telegram.send_message(chat_id, &text, Some(&keyboard))?;
    Ok(())
}

pub(crate) fn confirm_relocation(app: &Arc<App>, chat_id: i64, handle: &str) -> Outcome {
    let plan = match app.handles.relocation(handle) {
        Some(plan) => plan,
        None => {
            return send_transient(app, chat_id, "That move has expired, start over", STATUS_LINGER)
        }
    };
    app.handles.discard(handle);
    match std::fs::rename(&plan.from, &plan.to) {
        Ok(()) => send_transient(
            app,
            chat_id,
            &format!("🗂 Moved to {}", escape_markdown(&plan.to)),
            STATUS_LINGER,
        ),
        Err(err) => {
            app.telegram.send_message(
                chat_id,
                &format!("❌ Move failed: {}", escape_markdown(&err.to_string())),
                None,
            )?;
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

pub(crate) fn cancel_action(app: &Arc<App>, chat_id: i64, message_id: Option<i64>) -> Outcome {
    app.pending.clear(chat_id);
    if let Some(message_id) = message_id {
        app.telegram.delete_message(chat_id, message_id)?;
    }
    Ok(())
}

fn cancel_row(initiator: i64) -> Result<Keyboard, crate::callback::CodecError> {
    Ok(vec![vec![InlineButton::callback(
        "✖️ Cancel",
        encode(&Verb::Cancel, initiator)?,
    )]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str) -> PlanTarget {
        PlanTarget { item_id: id.to_string(), label: format!("episode {id}") }
    }

    #[test]
    fn results_paginate_ten_at_a_time() {
        assert_eq!(page_bounds(23, 1), (1, 3, 0, 10));
        assert_eq!(page_bounds(23, 2), (2, 3, 10, 20));
        assert_eq!(page_bounds(23, 3), (3, 3, 20, 23));
        // Out-of-range requests clamp instead of erroring.
        assert_eq!(page_bounds(23, 0), (1, 3, 0, 10));
        assert_eq!(page_bounds(23, 9), (3, 3, 20, 23));
        assert_eq!(page_bounds(0, 1), (1, 1, 0, 0));
    }

    #[test]
    fn batch_continues_past_failures() {
        let targets = vec![target("1"), target("2"), target("3")];
        let report = execute_plan_targets(&targets, |t| {
            if t.item_id == "2" {
                Err("backend said no".to_string())
            } else {
                Ok(())
            }
        });
        assert_eq!(report.len(), 3);
        assert!(report[0].1.is_ok());
        assert_eq!(report[1].1.clone().unwrap_err(), "backend said no");
        assert!(report[2].1.is_ok());
    }

    #[test]
    fn batch_runs_each_target_once() {
        let targets = vec![target("1"), target("2"), target("3")];
        let mut calls = Vec::new();
        let _ = execute_plan_targets(&targets, |t| {
            calls.push(t.item_id.clone());
            Err("down".to_string())
        });
        assert_eq!(calls, vec!["1", "2", "3"]);
    }
}
