use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::cache::HandleCache;
use crate::callback::{CallbackAction, CodecRegistry, Verb};
use crate::config::{RuntimeConfig, Settings};
use crate::conversation::{AwaitReason, ConversationStore};
use crate::emby::EmbyClient;
use crate::menu::MenuTree;
use crate::notify::{Debouncer, GeoCache};
use crate::request::ResilientClient;
use crate::tasks::TaskQueue;
use crate::telegram::TelegramApi;
use crate::tmdb::TmdbClient;
use crate::types::{TelegramCallbackQuery, TelegramMessage, TelegramUpdate};
use crate::workflows;

const MEMBER_CACHE_TTL: Duration = Duration::from_secs(3600);
const COMMAND_LINGER: Duration = Duration::from_secs(60);

/// Everything the event handlers share. One instance behind an Arc, owned
/// jointly by the poll loop, the webhook server and the task worker.
pub(crate) struct App {
    pub settings: Settings,
    pub config: RuntimeConfig,
    pub menu: MenuTree,
    pub codec: CodecRegistry,
    pub handles: HandleCache,
    pub pending: ConversationStore,
    pub http: Arc<ResilientClient>,
    pub telegram: TelegramApi,
    pub emby: EmbyClient,
    pub tmdb: TmdbClient,
    pub tasks: TaskQueue,
    pub members: MemberCache,
    pub playback_debounce: Debouncer,
    pub geo: GeoCache,
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// Caches group-membership verdicts so each user costs one API round trip
/// per hour, not one per message.
pub(crate) struct MemberCache {
    entries: Mutex<HashMap<i64, (bool, Instant)>>,
    ttl: Duration,
}

impl MemberCache {
    pub(crate) fn new() -> MemberCache {
        MemberCache { entries: Mutex::new(HashMap::new()), ttl: MEMBER_CACHE_TTL }
    }

    fn cached(&self, user_id: i64) -> Option<bool> {
        self.cached_at(user_id, Instant::now())
    }

    fn cached_at(&self, user_id: i64, now: Instant) -> Option<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&user_id) {
            Some(&(verdict, stored)) if now.duration_since(stored) < self.ttl => Some(verdict),
            Some(_) => {
                entries.remove(&user_id);
                None
            }
            None => None,
        }
    }

    fn store(&self, user_id: i64, verdict: bool) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(user_id, (verdict, Instant::now()));
    }
}

/// Whether a user may talk to the bot at all: operators always, otherwise
/// members of a configured group. A failed membership lookup admits the user
/// without caching the verdict; a flaky API must not lock members out.
pub(crate) fn is_authorized(app: &App, user_id: i64) -> bool {
    if app.settings.is_admin(user_id) {
        return true;
    }
    if let Some(verdict) = app.members.cached(user_id) {
        return verdict;
    }
    if app.settings.group_chat_ids.is_empty() {
        return false;
    }
    let mut lookup_failed = false;
    for &chat in &app.settings.group_chat_ids {
        match app.telegram.chat_member_status(chat, user_id) {
            Ok(Some(status))
                if matches!(status.as_str(), "member" | "administrator" | "creator") =>
            {
                app.members.store(user_id, true);
                return true;
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("[auth] membership lookup for {user_id} failed: {err}");
                lookup_failed = true;
            }
        }
    }
    if lookup_failed {
        return true;
    }
    app.members.store(user_id, false);
    false
}

// ---------------------------------------------------------------------------
// Click decisions
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ClickDecision {
    /// Answer quietly; the button is stale or garbled.
    Toast(&'static str),
    /// Answer with a popup; the click was understood but refused.
    Alert(&'static str),
    Dispatch(CallbackAction),
}

/// Pure decision phase of a button click: decode, bind to the initiator,
/// gate on privilege. No I/O, so the whole policy is table-testable.
pub(crate) fn decide_click(
    codec: &CodecRegistry,
    raw: &str,
    clicker: i64,
    clicker_is_admin: bool,
) -> ClickDecision {
    let action = match codec.decode(raw) {
        Ok(action) => action,
        Err(_) => return ClickDecision::Toast("This button is no longer valid"),
    };
    if action.initiator != clicker {
        return ClickDecision::Alert("This panel belongs to someone else");
    }
    if action.verb.requires_admin() && !clicker_is_admin {
        return ClickDecision::Alert("Operators only");
    }
    ClickDecision::Dispatch(action)
}

fn handle_callback(app: &Arc<App>, query: TelegramCallbackQuery) {
    let raw = match query.data.as_deref() {
        Some(raw) => raw,
        None => {
            let _ = app.telegram.answer_callback(&query.id, None, false);
            return;
        }
    };
    let chat_id = query.message.as_ref().map(|m| m.chat.id);
    let message_id = query.message.as_ref().map(|m| m.message_id);
    let clicker = query.from.id;
    match decide_click(&app.codec, raw, clicker, app.settings.is_admin(clicker)) {
        ClickDecision::Toast(text) => {
            let _ = app.telegram.answer_callback(&query.id, Some(text), false);
        }
        ClickDecision::Alert(text) => {
            let _ = app.telegram.answer_callback(&query.id, Some(text), true);
        }
        ClickDecision::Dispatch(action) => {
            let _ = app.telegram.answer_callback(&query.id, None, false);
            let chat_id = match chat_id {
                Some(chat_id) => chat_id,
                None => return,
            };
            if let Err(err) = dispatch_verb(app, chat_id, message_id, action) {
                eprintln!("[router] callback {raw:?} failed: {err}");
                let _ = workflows::send_transient(
                    app,
                    chat_id,
                    "⚠️ That action failed, try again",
                    workflows::STATUS_LINGER,
                );
            }
        }
    }
}

fn dispatch_verb(
    app: &Arc<App>,
    chat_id: i64,
    message_id: Option<i64>,
    action: CallbackAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let initiator = action.initiator;
    match action.verb {
        Verb::Navigate { key } => {
            workflows::send_settings_menu(app, chat_id, initiator, &key, message_id)
        }
        Verb::ToggleSetting { index } => {
            workflows::toggle_setting(app, chat_id, message_id, initiator, index)
        }
        Verb::CloseMenu => match message_id {
            Some(message_id) => workflows::close_menu(app, chat_id, message_id),
            None => Ok(()),
        },
        Verb::SearchPage { handle, page } => {
            workflows::send_results_page(app, chat_id, initiator, &handle, page, message_id)
        }
        Verb::SearchDetail { handle, index } => {
            workflows::send_search_detail(app, chat_id, initiator, &handle, index)
        }
        Verb::TerminateSession { session_id } => {
            workflows::terminate_session(app, chat_id, &session_id)
        }
        Verb::MessageSession { session_id } => {
            workflows::prompt_session_message(app, chat_id, initiator, &session_id)
        }
        Verb::Broadcast => workflows::prompt_broadcast(app, chat_id, initiator),
        Verb::TerminateAll => workflows::prompt_terminate_all(app, chat_id, initiator),
        Verb::TerminateAllConfirm => {
            if let Some(message_id) = message_id {
                let _ = app.telegram.delete_message(chat_id, message_id);
            }
            workflows::terminate_all(app, chat_id)
        }
        Verb::ConfirmDeletion { handle } => {
            if let Some(message_id) = message_id {
                let _ = app.telegram.delete_message(chat_id, message_id);
            }
            workflows::confirm_deletion(app, chat_id, &handle)
        }
        Verb::ConfirmRelocation { handle } => {
            if let Some(message_id) = message_id {
                let _ = app.telegram.delete_message(chat_id, message_id);
            }
            workflows::confirm_relocation(app, chat_id, &handle)
        }
        Verb::Cancel => workflows::cancel_action(app, chat_id, message_id),
    }
}

// ---------------------------------------------------------------------------
// Messages and commands
// ---------------------------------------------------------------------------

/// Commands that act on the server or its settings; members without operator
/// rights get a refusal instead of silence.
fn command_requires_admin(command: &str) -> bool {
    matches!(command, "status" | "settings" | "prune" | "relocate")
}

/// In a private chat any text answers a waiting prompt; in a group it must be
/// an actual reply, or ordinary chatter would be captured as the answer.
fn should_consume_text(is_group_chat: bool, is_reply: bool) -> bool {
    !is_group_chat || is_reply
}

fn command_failure_text(command: &str) -> String {
    format!("⚠️ /{} failed, try again", crate::util::escape_markdown(command))
}

/// Split "/search@MyBot blade runner" into ("search", "blade runner").
pub(crate) fn parse_command(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (token, args) = match rest.split_once(char::is_whitespace) {
        Some((token, args)) => (token, args.trim()),
        None => (rest, ""),
    };
    let command = token.split('@').next().unwrap_or(token);
    if command.is_empty() {
        return None;
    }
    Some((command, args))
}

fn handle_message(app: &Arc<App>, message: TelegramMessage) {
    let user = match &message.from {
        Some(user) => user,
        None => return,
    };
    let text = match message.text.as_deref() {
        Some(text) => text,
        None => return,
    };
    let chat_id = message.chat.id;

    if let Some((command, args)) = parse_command(text) {
        // Drop strangers before touching any state; an unauthorized /command
        // must not disturb a prompt someone else is answering.
        if !is_authorized(app, user.id) {
            eprintln!("[router] dropping command from unauthorized user {}", user.id);
            return;
        }
        // A fresh command always wins over a waiting prompt.
        app.pending.clear(chat_id);
        let admin = app.settings.is_admin(user.id);
        if command_requires_admin(command) && !admin {
            let _ = workflows::send_transient(
                app,
                chat_id,
                "Operators only",
                workflows::STATUS_LINGER,
            );
            return;
        }
        let result = match command {
            "search" if args.is_empty() => workflows::prompt_search(app, chat_id, user.id),
            "search" => workflows::run_search(app, chat_id, user.id, args),
            "status" => workflows::send_status(app, chat_id, user.id),
            "settings" => {
                workflows::send_settings_menu(app, chat_id, user.id, app.menu.root_key(), None)
            }
            "prune" if !args.is_empty() => workflows::start_prune(app, chat_id, user.id, args),
            "relocate" => {
                let parts: Vec<&str> = args.split_whitespace().collect();
                match parts.as_slice() {
                    [from, to] => workflows::start_relocation(app, chat_id, user.id, from, to),
                    _ => {
                        eprintln!("[router] relocate wants exactly a source and a destination");
                        Ok(())
                    }
                }
            }
            _ => Ok(()),
        };
        if let Err(err) = result {
            eprintln!("[router] command /{command} failed: {err}");
            let _ = workflows::send_transient(
                app,
                chat_id,
                &command_failure_text(command),
                workflows::STATUS_LINGER,
            );
        }
        // Keep group chats tidy: the command message itself goes away too.
        if app.settings.group_chat_ids.contains(&chat_id) {
            workflows::schedule_delete(app, chat_id, message.message_id, COMMAND_LINGER);
        }
        return;
    }

    // Plain text only matters while a prompt armed for this user is waiting.
    let is_group = app.settings.group_chat_ids.contains(&chat_id);
    if !should_consume_text(is_group, message.reply_to_message.is_some()) {
        return;
    }
    let pending = match app.pending.consume(chat_id, user.id) {
        Some(pending) => pending,
        None => return,
    };
    let result = match pending.reason {
        AwaitReason::SearchQuery => workflows::run_search(app, chat_id, user.id, text),
        AwaitReason::BroadcastMessage => workflows::broadcast(app, chat_id, text),
        AwaitReason::SessionMessage { session_id } => {
            workflows::send_session_message(app, chat_id, &session_id, text)
        }
        AwaitReason::SeasonSelection { series_id, series_name } => workflows::prune_season_reply(
            app,
            chat_id,
            user.id,
            &series_id,
            &series_name,
            text,
        ),
    };
    if let Err(err) = result {
        eprintln!("[router] reply handling failed: {err}");
        let _ = workflows::send_transient(
            app,
            chat_id,
            "⚠️ Handling that reply failed, try again",
            workflows::STATUS_LINGER,
        );
    }
}

// ---------------------------------------------------------------------------
// Per-chat workers
// ---------------------------------------------------------------------------

/// One worker thread per chat: events from different chats run concurrently,
/// events within a chat stay in arrival order.
pub(crate) struct ChatWorkers {
    senders: Mutex<HashMap<i64, mpsc::Sender<TelegramUpdate>>>,
}

impl ChatWorkers {
    pub(crate) fn new() -> ChatWorkers {
        ChatWorkers { senders: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn dispatch(&self, app: &Arc<App>, update: TelegramUpdate) {
        let chat_id = chat_of(&update).unwrap_or(0);
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        let send_result = senders
            .entry(chat_id)
            .or_insert_with(|| spawn_worker(app.clone()))
            .send(update);
        if let Err(mpsc::SendError(update)) = send_result {
            // Worker died; replace it and retry once.
            let fresh = spawn_worker(app.clone());
            let _ = fresh.send(update);
            senders.insert(chat_id, fresh);
        }
    }
}

fn spawn_worker(app: Arc<App>) -> mpsc::Sender<TelegramUpdate> {
    let (tx, rx) = mpsc::channel::<TelegramUpdate>();
    thread::spawn(move || {
        for update in rx {
            process_update(&app, update);
        }
    });
    tx
}

fn chat_of(update: &TelegramUpdate) -> Option<i64> {
    if let Some(message) = &update.message {
        return Some(message.chat.id);
    }
    update
        .callback_query
        .as_ref()
        .and_then(|q| q.message.as_ref())
        .map(|m| m.chat.id)
}

fn process_update(app: &Arc<App>, update: TelegramUpdate) {
    if let Some(query) = update.callback_query {
        handle_callback(app, query);
    } else if let Some(message) = update.message {
        handle_message(app, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HANDLE_TTL;
    use crate::callback::encode;
    use crate::menu::DECLARATIONS;
    use crate::types::{TelegramChat, TelegramUser};

    /// An App wired to unroutable endpoints. Only paths that never leave the
    /// process are exercised through it.
    fn test_app(group_chat_ids: Vec<i64>) -> Arc<App> {
        let settings = Settings {
            telegram_token: "t".into(),
            emby_server_url: "http://127.0.0.1:9".into(),
            emby_api_key: "k".into(),
            emby_user_id: None,
            emby_remote_url: None,
            tmdb_api_token: None,
            admin_user_ids: vec![1],
            group_chat_ids,
            channel_chat_ids: vec![],
            private_chat_ids: vec![],
            media_base_path: None,
            http_max_retries: 0,
        };
        let tree = MenuTree::build(DECLARATIONS).unwrap();
        let config_path = std::env::temp_dir().join("telemby-router-test-absent.json");
        let config = RuntimeConfig::load(&config_path, tree.defaults());
        let http = Arc::new(ResilientClient::new(0, 0.01, 0.02));
        Arc::new(App {
            telegram: TelegramApi::new(http.clone(), "t"),
            emby: EmbyClient::new(http.clone(), "http://127.0.0.1:9", "k", None),
            tmdb: TmdbClient::new(
                http.clone(),
                None,
                &std::env::temp_dir().join("telemby-router-test-posters.json"),
            ),
            settings,
            config,
            menu: tree,
            codec: CodecRegistry::new(),
            handles: HandleCache::new(HANDLE_TTL),
            pending: ConversationStore::new(),
            http,
            tasks: TaskQueue::start(4),
            members: MemberCache::new(),
            playback_debounce: Debouncer::standard(),
            geo: GeoCache::new(),
        })
    }

    fn text_message(from: i64, chat: i64, text: &str) -> TelegramMessage {
        TelegramMessage {
            message_id: 5,
            from: Some(TelegramUser { id: from }),
            chat: TelegramChat { id: chat },
            text: Some(text.into()),
            reply_to_message: None,
        }
    }

    #[test]
    fn stranger_command_leaves_pending_prompt_armed() {
        let app = test_app(vec![]);
        app.pending.begin(10, 1, AwaitReason::SearchQuery);
        // No groups are configured, so user 999 is refused without any
        // lookup; the operator's waiting prompt must survive that.
        handle_message(&app, text_message(999, 10, "/status"));
        assert!(app.pending.peek(10).is_some());
    }

    #[test]
    fn group_chatter_does_not_answer_a_prompt() {
        let app = test_app(vec![10]);
        app.pending.begin(10, 1, AwaitReason::SearchQuery);
        // Plain group-chat text that is not a reply is ordinary conversation.
        handle_message(&app, text_message(1, 10, "anyone seen my keys"));
        assert!(app.pending.peek(10).is_some());
    }

    #[test]
    fn prompt_consumption_requires_a_reply_in_groups() {
        assert!(should_consume_text(false, false));
        assert!(should_consume_text(false, true));
        assert!(!should_consume_text(true, false));
        assert!(should_consume_text(true, true));
    }

    #[test]
    fn server_commands_are_operator_only() {
        for command in ["status", "settings", "prune", "relocate"] {
            assert!(command_requires_admin(command), "{command}");
        }
        assert!(!command_requires_admin("search"));
    }

    #[test]
    fn failure_notice_names_the_command() {
        assert_eq!(command_failure_text("status"), "⚠️ /status failed, try again");
    }

    #[test]
    fn click_is_bound_to_its_initiator() {
        let codec = CodecRegistry::new();
        let wire = encode(&Verb::ToggleSetting { index: 3 }, 100).unwrap();
        // The initiator, as an operator, gets through.
        assert!(matches!(
            decide_click(&codec, &wire, 100, true),
            ClickDecision::Dispatch(_)
        ));
        // Anyone else is refused even as an operator.
        assert!(matches!(decide_click(&codec, &wire, 200, true), ClickDecision::Alert(_)));
    }

    #[test]
    fn privileged_verbs_need_an_operator() {
        let codec = CodecRegistry::new();
        let toggle = encode(&Verb::ToggleSetting { index: 3 }, 100).unwrap();
        assert!(matches!(decide_click(&codec, &toggle, 100, false), ClickDecision::Alert(_)));
        // Browsing search results does not.
        let page = encode(&Verb::SearchPage { handle: "h1".into(), page: 2 }, 100).unwrap();
        assert!(matches!(
            decide_click(&codec, &page, 100, false),
            ClickDecision::Dispatch(_)
        ));
    }

    #[test]
    fn garbage_payload_gets_a_toast() {
        let codec = CodecRegistry::new();
        assert!(matches!(decide_click(&codec, "??", 1, true), ClickDecision::Toast(_)));
        assert!(matches!(
            decide_click(&codec, "zz_handle_1", 1, true),
            ClickDecision::Toast(_)
        ));
    }

    #[test]
    fn command_parsing_strips_bot_mention() {
        assert_eq!(parse_command("/search@MyBot blade runner"), Some(("search", "blade runner")));
        assert_eq!(parse_command("/status"), Some(("status", "")));
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn member_cache_expires() {
        let cache = MemberCache::new();
        cache.store(42, true);
        let now = Instant::now();
        assert_eq!(cache.cached_at(42, now), Some(true));
        assert_eq!(cache.cached_at(42, now + Duration::from_secs(3601)), None);
        // The stale entry is gone after the miss.
        assert_eq!(cache.cached_at(42, now), None);
    }
}
