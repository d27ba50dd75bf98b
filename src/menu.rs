use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::callback::{encode, CodecError, Verb};
use crate::types::{InlineButton, Keyboard};

/// One node of the settings menu as declared. Internal nodes carry children,
/// leaves carry a config path with its shipped default. Declaration order is
/// load-bearing: toggle indices are assigned by walking this table top to
/// bottom, so appending new leaves keeps existing buttons valid.
pub(crate) struct MenuDecl {
    pub key: &'static str,
    pub label: &'static str,
    pub parent: Option<&'static str>,
    pub children: &'static [&'static str],
    pub setting: Option<(&'static str, bool)>,
}

const fn submenu(
    key: &'static str,
    label: &'static str,
    parent: Option<&'static str>,
    children: &'static [&'static str],
) -> MenuDecl {
    MenuDecl { key, label, parent, children, setting: None }
}

const fn toggle(
    key: &'static str,
    label: &'static str,
    parent: &'static str,
    path: &'static str,
    default: bool,
) -> MenuDecl {
    MenuDecl { key, label, parent: Some(parent), children: &[], setting: Some((path, default)) }
}

#[rustfmt::skip]
pub(crate) const DECLARATIONS: &[MenuDecl] = &[
    submenu("root", "⚙️ Settings", None,
        &["content_settings", "notification_management", "auto_delete_settings"]),
    submenu("content_settings", "Notification content", Some("root"),
        &["status_feedback", "playback_action", "library_deleted_content",
          "new_library_content_settings", "search_display"]),

    submenu("new_library_content_settings", "New item notifications", Some("content_settings"),
        &["new_library_show_poster", "new_library_show_media_detail",
          "new_library_media_detail_has_tmdb_link", "new_library_show_overview",
          "new_library_show_media_type", "new_library_show_video_spec",
          "new_library_show_audio_spec", "new_library_show_timestamp",
          "new_library_show_view_on_server_button"]),
    toggle("new_library_show_poster", "Show poster", "new_library_content_settings",
        "settings.content_settings.new_library_notification.show_poster", true),
    toggle("new_library_show_media_detail", "Show media detail", "new_library_content_settings",
        "settings.content_settings.new_library_notification.show_media_detail", true),
    toggle("new_library_media_detail_has_tmdb_link", "TMDB link in detail", "new_library_content_settings",
        "settings.content_settings.new_library_notification.media_detail_has_tmdb_link", true),
    toggle("new_library_show_overview", "Show overview", "new_library_content_settings",
        "settings.content_settings.new_library_notification.show_overview", true),
    toggle("new_library_show_media_type", "Show media type", "new_library_content_settings",
        "settings.content_settings.new_library_notification.show_media_type", true),
    toggle("new_library_show_video_spec", "Show video spec", "new_library_content_settings",
        "settings.content_settings.new_library_notification.show_video_spec", false),
    toggle("new_library_show_audio_spec", "Show audio spec", "new_library_content_settings",
        "settings.content_settings.new_library_notification.show_audio_spec", false),
    toggle("new_library_show_timestamp", "Show timestamp", "new_library_content_settings",
        "settings.content_settings.new_library_notification.show_timestamp", true),
    toggle("new_library_show_view_on_server_button", "Show view-on-server button", "new_library_content_settings",
        "settings.content_settings.new_library_notification.show_view_on_server_button", true),

    submenu("status_feedback", "Status reports", Some("content_settings"),
        &["status_show_poster", "status_show_player", "status_show_device",
          "status_show_location", "status_show_media_detail", "status_media_detail_has_tmdb_link",
          "status_show_media_type", "status_show_overview", "status_show_timestamp",
          "status_show_view_on_server_button", "status_show_terminate_session_button",
          "status_show_send_message_button", "status_show_broadcast_button",
          "status_show_terminate_all_button"]),
    toggle("status_show_poster", "Show poster", "status_feedback",
        "settings.content_settings.status_feedback.show_poster", true),
    toggle("status_show_player", "Show player", "status_feedback",
        "settings.content_settings.status_feedback.show_player", true),
    toggle("status_show_device", "Show device", "status_feedback",
        "settings.content_settings.status_feedback.show_device", true),
    toggle("status_show_location", "Show location", "status_feedback",
        "settings.content_settings.status_feedback.show_location", true),
    toggle("status_show_media_detail", "Show media detail", "status_feedback",
        "settings.content_settings.status_feedback.show_media_detail", true),
    toggle("status_media_detail_has_tmdb_link", "TMDB link in detail", "status_feedback",
        "settings.content_settings.status_feedback.media_detail_has_tmdb_link", true),
    toggle("status_show_media_type", "Show media type", "status_feedback",
        "settings.content_settings.status_feedback.show_media_type", true),
    toggle("status_show_overview", "Show overview", "status_feedback",
        "settings.content_settings.status_feedback.show_overview", false),
    toggle("status_show_timestamp", "Show timestamp", "status_feedback",
        "settings.content_settings.status_feedback.show_timestamp", true),
    toggle("status_show_view_on_server_button", "Show view-on-server button", "status_feedback",
        "settings.content_settings.status_feedback.show_view_on_server_button", true),
    toggle("status_show_terminate_session_button", "Show terminate-session button", "status_feedback",
        "settings.content_settings.status_feedback.show_terminate_session_button", true),
    toggle("status_show_send_message_button", "Show send-message button", "status_feedback",
        "settings.content_settings.status_feedback.show_send_message_button", true),
    toggle("status_show_broadcast_button", "Show broadcast button", "status_feedback",
        "settings.content_settings.status_feedback.show_broadcast_button", true),
    toggle("status_show_terminate_all_button", "Show terminate-all button", "status_feedback",
        "settings.content_settings.status_feedback.show_terminate_all_button", true),

    submenu("playback_action", "Playback notifications", Some("content_settings"),
        &["playback_show_poster", "playback_show_media_detail",
          "playback_media_detail_has_tmdb_link", "playback_show_user", "playback_show_player",
          "playback_show_device", "playback_show_location", "playback_show_progress",
          "playback_show_video_spec", "playback_show_audio_spec", "playback_show_media_type",
          "playback_show_overview", "playback_show_timestamp",
          "playback_show_view_on_server_button"]),
    toggle("playback_show_poster", "Show poster", "playback_action",
        "settings.content_settings.playback_action.show_poster", true),
    toggle("playback_show_media_detail", "Show media detail", "playback_action",
        "settings.content_settings.playback_action.show_media_detail", true),
    toggle("playback_media_detail_has_tmdb_link", "TMDB link in detail", "playback_action",
        "settings.content_settings.playback_action.media_detail_has_tmdb_link", true),
    toggle("playback_show_user", "Show user", "playback_action",
        "settings.content_settings.playback_action.show_user", true),
    toggle("playback_show_player", "Show player", "playback_action",
        "settings.content_settings.playback_action.show_player", true),
    toggle("playback_show_device", "Show device", "playback_action",
        "settings.content_settings.playback_action.show_device", true),
    toggle("playback_show_location", "Show location", "playback_action",
        "settings.content_settings.playback_action.show_location", true),
    toggle("playback_show_progress", "Show progress", "playback_action",
        "settings.content_settings.playback_action.show_progress", true),
    toggle("playback_show_video_spec", "Show video spec", "playback_action",
        "settings.content_settings.playback_action.show_video_spec", false),
    toggle("playback_show_audio_spec", "Show audio spec", "playback_action",
        "settings.content_settings.playback_action.show_audio_spec", false),
    toggle("playback_show_media_type", "Show media type", "playback_action",
        "settings.content_settings.playback_action.show_media_type", true),
    toggle("playback_show_overview", "Show overview", "playback_action",
        "settings.content_settings.playback_action.show_overview", true),
    toggle("playback_show_timestamp", "Show timestamp", "playback_action",
        "settings.content_settings.playback_action.show_timestamp", true),
    toggle("playback_show_view_on_server_button", "Show view-on-server button", "playback_action",
        "settings.content_settings.playback_action.show_view_on_server_button", true),

    submenu("library_deleted_content", "Deleted item notifications", Some("content_settings"),
        &["deleted_show_poster", "deleted_show_media_detail", "deleted_media_detail_has_tmdb_link",
          "deleted_show_overview", "deleted_show_media_type", "deleted_show_timestamp"]),
    toggle("deleted_show_poster", "Show poster", "library_deleted_content",
        "settings.content_settings.library_deleted_notification.show_poster", true),
    toggle("deleted_show_media_detail", "Show media detail", "library_deleted_content",
        "settings.content_settings.library_deleted_notification.show_media_detail", true),
    toggle("deleted_media_detail_has_tmdb_link", "TMDB link in detail", "library_deleted_content",
        "settings.content_settings.library_deleted_notification.media_detail_has_tmdb_link", true),
    toggle("deleted_show_overview", "Show overview", "library_deleted_content",
        "settings.content_settings.library_deleted_notification.show_overview", true),
    toggle("deleted_show_media_type", "Show media type", "library_deleted_content",
        "settings.content_settings.library_deleted_notification.show_media_type", true),
    toggle("deleted_show_timestamp", "Show timestamp", "library_deleted_content",
        "settings.content_settings.library_deleted_notification.show_timestamp", true),

    submenu("search_display", "Search results", Some("content_settings"),
        &["search_show_media_type_in_list", "search_movie", "search_series"]),
    toggle("search_show_media_type_in_list", "Show media type in list", "search_display",
        "settings.content_settings.search_display.show_media_type_in_list", true),
    submenu("search_movie", "Movie detail", Some("search_display"),
        &["movie_show_poster", "movie_title_has_tmdb_link", "movie_show_type",
          "movie_show_category", "movie_show_overview", "movie_show_video_spec",
          "movie_show_audio_spec", "movie_show_added_time", "movie_show_view_on_server_button"]),
    toggle("movie_show_poster", "Show poster", "search_movie",
        "settings.content_settings.search_display.movie.show_poster", true),
    toggle("movie_title_has_tmdb_link", "TMDB link on title", "search_movie",
        "settings.content_settings.search_display.movie.title_has_tmdb_link", true),
    toggle("movie_show_type", "Show type", "search_movie",
        "settings.content_settings.search_display.movie.show_type", true),
    toggle("movie_show_category", "Show category", "search_movie",
        "settings.content_settings.search_display.movie.show_category", true),
    toggle("movie_show_overview", "Show overview", "search_movie",
        "settings.content_settings.search_display.movie.show_overview", true),
    toggle("movie_show_video_spec", "Show video spec", "search_movie",
        "settings.content_settings.search_display.movie.show_video_spec", true),
    toggle("movie_show_audio_spec", "Show audio spec", "search_movie",
        "settings.content_settings.search_display.movie.show_audio_spec", true),
    toggle("movie_show_added_time", "Show added time", "search_movie",
        "settings.content_settings.search_display.movie.show_added_time", true),
    toggle("movie_show_view_on_server_button", "Show view-on-server button", "search_movie",
        "settings.content_settings.search_display.movie.show_view_on_server_button", true),
    submenu("search_series", "Series detail", Some("search_display"),
        &["series_show_poster", "series_title_has_tmdb_link", "series_show_type",
          "series_show_category", "series_show_overview", "series_season_specs",
          "series_update_progress", "series_show_view_on_server_button"]),
    toggle("series_show_poster", "Show poster", "search_series",
        "settings.content_settings.search_display.series.show_poster", true),
    toggle("series_title_has_tmdb_link", "TMDB link on title", "search_series",
        "settings.content_settings.search_display.series.title_has_tmdb_link", true),
    toggle("series_show_type", "Show type", "search_series",
        "settings.content_settings.search_display.series.show_type", true),
    toggle("series_show_category", "Show category", "search_series",
        "settings.content_settings.search_display.series.show_category", true),
    toggle("series_show_overview", "Show overview", "search_series",
        "settings.content_settings.search_display.series.show_overview", true),
    toggle("series_show_view_on_server_button", "Show view-on-server button", "search_series",
        "settings.content_settings.search_display.series.show_view_on_server_button", true),
    submenu("series_season_specs", "Per-season specs", Some("search_series"),
        &["series_season_show_video_spec", "series_season_show_audio_spec"]),
    toggle("series_season_show_video_spec", "Show video spec", "series_season_specs",
        "settings.content_settings.search_display.series.season_specs.show_video_spec", true),
    toggle("series_season_show_audio_spec", "Show audio spec", "series_season_specs",
        "settings.content_settings.search_display.series.season_specs.show_audio_spec", true),
    submenu("series_update_progress", "Update progress", Some("search_series"),
        &["series_progress_show_latest_episode", "series_progress_latest_episode_has_tmdb_link",
          "series_progress_show_overview", "series_progress_show_added_time",
          "series_progress_show_progress_status"]),
    toggle("series_progress_show_latest_episode", "Show latest episode", "series_update_progress",
        "settings.content_settings.search_display.series.update_progress.show_latest_episode", true),
    toggle("series_progress_latest_episode_has_tmdb_link", "TMDB link on latest episode", "series_update_progress",
        "settings.content_settings.search_display.series.update_progress.latest_episode_has_tmdb_link", true),
    toggle("series_progress_show_overview", "Show overview", "series_update_progress",
        "settings.content_settings.search_display.series.update_progress.show_overview", false),
    toggle("series_progress_show_added_time", "Show added time", "series_update_progress",
        "settings.content_settings.search_display.series.update_progress.show_added_time", true),
    toggle("series_progress_show_progress_status", "Show progress status", "series_update_progress",
        "settings.content_settings.search_display.series.update_progress.show_progress_status", true),

    submenu("notification_management", "Notifications", Some("root"),
        &["notify_library_new", "notify_playback_start", "notify_playback_pause",
          "notify_playback_stop", "notify_library_deleted"]),
    submenu("notify_library_new", "New items", Some("notification_management"),
        &["new_to_group", "new_to_channel", "new_to_private"]),
    toggle("new_to_group", "To group", "notify_library_new",
        "settings.notification_management.library_new.to_group", true),
    toggle("new_to_channel", "To channel", "notify_library_new",
        "settings.notification_management.library_new.to_channel", true),
    toggle("new_to_private", "To private chat", "notify_library_new",
        "settings.notification_management.library_new.to_private", false),
    toggle("notify_playback_start", "Playback start/resume", "notification_management",
        "settings.notification_management.playback_start", true),
    toggle("notify_playback_pause", "Playback pause", "notification_management",
        "settings.notification_management.playback_pause", false),
    toggle("notify_playback_stop", "Playback stop", "notification_management",
        "settings.notification_management.playback_stop", true),
    toggle("notify_library_deleted", "Deleted items", "notification_management",
        "settings.notification_management.library_deleted", true),

    submenu("auto_delete_settings", "Auto-delete messages", Some("root"),
        &["delete_new_library", "delete_library_deleted", "delete_playback_status"]),
    submenu("delete_new_library", "New item messages", Some("auto_delete_settings"),
        &["delete_new_library_group", "delete_new_library_channel", "delete_new_library_private"]),
    toggle("delete_new_library_group", "In group", "delete_new_library",
        "settings.auto_delete_settings.new_library.to_group", false),
    toggle("delete_new_library_channel", "In channel", "delete_new_library",
        "settings.auto_delete_settings.new_library.to_channel", false),
    toggle("delete_new_library_private", "In private chat", "delete_new_library",
        "settings.auto_delete_settings.new_library.to_private", true),
    toggle("delete_library_deleted", "Deleted item messages", "auto_delete_settings",
        "settings.auto_delete_settings.library_deleted", true),
    submenu("delete_playback_status", "Playback messages", Some("auto_delete_settings"),
        &["delete_playback_start", "delete_playback_pause", "delete_playback_stop"]),
    toggle("delete_playback_start", "Start/resume messages", "delete_playback_status",
        "settings.auto_delete_settings.playback_start", true),
    toggle("delete_playback_pause", "Pause messages", "delete_playback_status",
        "settings.auto_delete_settings.playback_pause", true),
    toggle("delete_playback_stop", "Stop messages", "delete_playback_status",
        "settings.auto_delete_settings.playback_stop", true),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum MenuError {
    #[error("menu has no root node")]
    NoRoot,
    #[error("menu declares more than one root: {0} and {1}")]
    MultipleRoots(String, String),
    #[error("duplicate menu key {0}")]
    DuplicateKey(String),
    #[error("node {parent} lists unknown child {child}")]
    UnknownChild { parent: String, child: String },
    #[error("node {child} is listed under {listed_by} but declares parent {declares}")]
    ParentMismatch { child: String, listed_by: String, declares: String },
    #[error("node {0} is both a submenu and a toggle")]
    LeafWithChildren(String),
    #[error("node {0} has neither children nor a setting")]
    EmptyNode(String),
    #[error("node {0} is referenced more than once")]
    RereferencedNode(String),
    #[error("node {0} is unreachable from the root")]
    Unreachable(String),
    #[error("node {key} has malformed config path {path:?}")]
    BadConfigPath { key: String, path: String },
}

#[derive(Debug)]
pub(crate) struct MenuNode {
    pub key: &'static str,
    pub label: &'static str,
    pub parent: Option<&'static str>,
    pub children: &'static [&'static str],
    pub setting: Option<(&'static str, bool)>,
    /// Dense toggle index; present exactly on leaves.
    pub toggle_index: Option<usize>,
}

/// The validated settings tree. Built once at startup; construction fails on
/// any structural defect rather than surfacing broken buttons at click time.
#[derive(Debug)]
pub(crate) struct MenuTree {
    nodes: HashMap<&'static str, MenuNode>,
    root: &'static str,
    toggle_paths: Vec<&'static str>,
    toggle_leaves: Vec<&'static str>,
}

impl MenuTree {
    pub(crate) fn build(decls: &'static [MenuDecl]) -> Result<MenuTree, MenuError> {
        let mut nodes: HashMap<&'static str, MenuNode> = HashMap::new();
        let mut root: Option<&'static str> = None;
        let mut toggle_paths: Vec<&'static str> = Vec::new();
        let mut toggle_leaves: Vec<&'static str> = Vec::new();

        for decl in decls {
            match (decl.children.is_empty(), decl.setting) {
                (false, Some(_)) => return Err(MenuError::LeafWithChildren(decl.key.to_string())),
                (true, None) => return Err(MenuError::EmptyNode(decl.key.to_string())),
                _ => {}
            }
            let toggle_index = match decl.setting {
                Some((path, _)) => {
                    if path.is_empty() || path.split('.').any(|seg| seg.is_empty()) {
                        return Err(MenuError::BadConfigPath {
                            key: decl.key.to_string(),
                            path: path.to_string(),
                        });
                    }
                    toggle_paths.push(path);
                    toggle_leaves.push(decl.key);
                    Some(toggle_paths.len() - 1)
                }
                None => None,
            };
            if decl.parent.is_none() {
                if let Some(existing) = root {
                    return Err(MenuError::MultipleRoots(
                        existing.to_string(),
                        decl.key.to_string(),
                    ));
                }
                root = Some(decl.key);
            }
            let node = MenuNode {
                key: decl.key,
                label: decl.label,
                parent: decl.parent,
                children: decl.children,
                setting: decl.setting,
                toggle_index,
            };
            if nodes.insert(decl.key, node).is_some() {
                return Err(MenuError::DuplicateKey(decl.key.to_string()));
            }
        }

        let root = root.ok_or(MenuError::NoRoot)?;

        // Walk from the root. Every node must be reached exactly once, which
        // also rules out cycles and cross-links between submenus.
        let mut visited: HashSet<&'static str> = HashSet::new();
        let mut stack = vec![root];
        visited.insert(root);
        while let Some(key) = stack.pop() {
            let node = &nodes[key];
            for &child in node.children {
                let child_node = nodes.get(child).ok_or_else(|| MenuError::UnknownChild {
                    parent: key.to_string(),
                    child: child.to_string(),
                })?;
                if child_node.parent != Some(key) {
                    return Err(MenuError::ParentMismatch {
                        child: child.to_string(),
                        listed_by: key.to_string(),
                        declares: child_node.parent.unwrap_or("<none>").to_string(),
                    });
                }
                if !visited.insert(child) {
                    return Err(MenuError::RereferencedNode(child.to_string()));
                }
                stack.push(child);
            }
        }
        if let Some(key) = nodes.keys().find(|k| !visited.contains(*k)) {
            return Err(MenuError::Unreachable(key.to_string()));
        }

        Ok(MenuTree { nodes, root, toggle_paths, toggle_leaves })
    }

    pub(crate) fn node(&self, key: &str) -> Option<&MenuNode> {
        self.nodes.get(key)
    }

    pub(crate) fn root_key(&self) -> &'static str {
        self.root
    }

    /// Config path behind a toggle button, if the index is still valid.
    pub(crate) fn toggle_path(&self, index: usize) -> Option<&'static str> {
        self.toggle_paths.get(index).copied()
    }

    /// Submenu key holding a given toggle, for re-rendering after a flip.
    pub(crate) fn toggle_parent(&self, index: usize) -> Option<&'static str> {
        let leaf = self.toggle_leaves.get(index)?;
        self.nodes.get(leaf)?.parent
    }

    /// Every (config path, default) pair, used to seed the defaults document.
    pub(crate) fn defaults(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        DECLARATIONS.iter().filter_map(|d| d.setting)
    }

    /// Render one screen of the menu. `current` reads the live value of a
    /// config path so leaf rows can show their state.
    pub(crate) fn render(
        &self,
        key: &str,
        initiator: i64,
        current: impl Fn(&str) -> bool,
    ) -> Result<(String, Keyboard), CodecError> {
        let node = self.nodes.get(key).unwrap_or(&self.nodes[self.root]);
        let mut text = format!("*{}*", crate::util::escape_markdown(node.label));
        if node.key == self.root {
            text.push_str("\nManage notifications and message behavior\\.");
        }
        let mut rows: Keyboard = Vec::new();
        for &child_key in node.children {
            let child = &self.nodes[child_key];
            if child.children.is_empty() {
                let (path, _) = child.setting.unwrap_or(("", false));
                let icon = if current(path) { "✅" } else { "❌" };
                let index = child.toggle_index.unwrap_or_default();
                rows.push(vec![InlineButton::callback(
                    format!("{icon} {}", child.label),
                    encode(&Verb::ToggleSetting { index }, initiator)?,
                )]);
            } else {
                rows.push(vec![InlineButton::callback(
                    format!("➡️ {}", child.label),
                    encode(&Verb::Navigate { key: child_key.to_string() }, initiator)?,
                )]);
            }
        }
        let mut nav = Vec::new();
        if let Some(parent) = node.parent {
            nav.push(InlineButton::callback(
                "◀️ Back",
                encode(&Verb::Navigate { key: parent.to_string() }, initiator)?,
            ));
        }
        nav.push(InlineButton::callback("☑️ Done", encode(&Verb::CloseMenu, initiator)?));
        rows.push(nav);
        Ok((text, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_declarations_build() {
        let tree = MenuTree::build(DECLARATIONS).unwrap();
        assert_eq!(tree.root_key(), "root");
        // Indices are dense over leaves in declaration order.
        let leaf_count = DECLARATIONS.iter().filter(|d| d.setting.is_some()).count();
        assert_eq!(tree.toggle_path(0), Some("settings.content_settings.new_library_notification.show_poster"));
        assert!(tree.toggle_path(leaf_count - 1).is_some());
        assert!(tree.toggle_path(leaf_count).is_none());
    }

    #[test]
    fn rejects_orphan_node() {
        static DECLS: &[MenuDecl] = &[
            submenu("root", "Root", None, &["a"]),
            toggle("a", "A", "root", "x.a", true),
            toggle("stray", "Stray", "root", "x.stray", true),
        ];
        match MenuTree::build(DECLS) {
            Err(MenuError::Unreachable(key)) => assert_eq!(key, "stray"),
            other => panic!("expected Unreachable, got {other:?}"),
        }
    }

    #[test]
    fn rejects_leaf_with_children() {
        static DECLS: &[MenuDecl] = &[
            submenu("root", "Root", None, &["a"]),
            MenuDecl {
                key: "a",
                label: "A",
                parent: Some("root"),
                children: &["b"],
                setting: Some(("x.a", true)),
            },
            toggle("b", "B", "a", "x.b", true),
        ];
        match MenuTree::build(DECLS) {
            Err(MenuError::LeafWithChildren(key)) => assert_eq!(key, "a"),
            other => panic!("expected LeafWithChildren, got {other:?}"),
        }
    }

    #[test]
    fn rejects_cycle() {
        static DECLS: &[MenuDecl] = &[
            submenu("root", "Root", None, &["a"]),
            submenu("a", "A", Some("root"), &["b"]),
            MenuDecl { key: "b", label: "B", parent: Some("a"), children: &["a"], setting: None },
        ];
        match MenuTree::build(DECLS) {
            Err(MenuError::ParentMismatch { child, .. }) => assert_eq!(child, "a"),
            other => panic!("expected ParentMismatch, got {other:?}"),
        }
    }

    #[test]
    fn rejects_second_root() {
        static DECLS: &[MenuDecl] = &[
            submenu("root", "Root", None, &["a"]),
            toggle("a", "A", "root", "x.a", true),
            submenu("root2", "Root2", None, &["a"]),
        ];
        match MenuTree::build(DECLS) {
            Err(MenuError::MultipleRoots(a, b)) => {
                assert_eq!((a.as_str(), b.as_str()), ("root", "root2"));
            }
            other => panic!("expected MultipleRoots, got {other:?}"),
        }
    }

    #[test]
    fn toggle_flip_changes_exactly_one_row() {
        let tree = MenuTree::build(DECLARATIONS).unwrap();
        let all_on = |_: &str| true;
        let one_off = |path: &str| path != "settings.notification_management.playback_pause";
        let (_, before) = tree.render("notification_management", 7, all_on).unwrap();
        let (_, after) = tree.render("notification_management", 7, one_off).unwrap();
        let flat = |kb: &Keyboard| {
            kb.iter().flatten().map(|b| b.text.clone()).collect::<Vec<_>>()
        };
        let before = flat(&before);
        let after = flat(&after);
        assert_eq!(before.len(), after.len());
        let diffs: Vec<_> = before.iter().zip(&after).filter(|(a, b)| a != b).collect();
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].1.starts_with("❌"));
    }
}
