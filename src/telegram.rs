use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::request::{RequestError, ResilientClient};
use crate::router::{self, App};
use crate::types::{Keyboard, TelegramUpdate};

const POLL_TIMEOUT_SECS: u64 = 30;

pub(crate) struct TelegramApi {
    http: Arc<ResilientClient>,
    base: String,
}

impl TelegramApi {
    pub(crate) fn new(http: Arc<ResilientClient>, token: &str) -> TelegramApi {
        TelegramApi { http, base: format!("https://api.telegram.org/bot{token}") }
    }

    fn call(&self, method: &str, body: &Value) -> Result<Option<Value>, RequestError> {
        let url = format!("{}/{method}", self.base);
        let resp = self.http.post_json("telegram", &url, body)?;
        if resp.no_effect {
            return Ok(None);
        }
        Ok(Some(resp.body.get("result").cloned().unwrap_or(Value::Null)))
    }

    /// Send a message, MarkdownV2 first with a plain-text fallback when the
    /// escaping turns out to be unbalanced. Returns the new message id.
    pub(crate) fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<Option<i64>, RequestError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "MarkdownV2",
            "disable_web_page_preview": true,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = json!({ "inline_keyboard": kb });
        }
        match self.call("sendMessage", &body) {
            Ok(result) => Ok(result.and_then(|r| r.get("message_id").and_then(Value::as_i64))),
            Err(RequestError::Fatal { .. }) => {
                if let Some(obj) = body.as_object_mut() {
                    obj.remove("parse_mode");
                }
                let result = self.call("sendMessage", &body)?;
                Ok(result.and_then(|r| r.get("message_id").and_then(Value::as_i64)))
            }
            Err(err) => Err(err),
        }
    }

    /// Send a photo with caption; falls back to a plain message when the
    /// photo URL is rejected.
    pub(crate) fn send_photo(
        &self,
        chat_id: i64,
        photo_url: &str,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<Option<i64>, RequestError> {
        let mut body = json!({
            "chat_id": chat_id,
            "photo": photo_url,
            "caption": caption,
            "parse_mode": "MarkdownV2",
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = json!({ "inline_keyboard": kb });
        }
        match self.call("sendPhoto", &body) {
            Ok(result) => Ok(result.and_then(|r| r.get("message_id").and_then(Value::as_i64))),
            Err(RequestError::Fatal { .. }) => self.send_message(chat_id, caption, keyboard),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), RequestError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "MarkdownV2",
            "disable_web_page_preview": true,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = json!({ "inline_keyboard": kb });
        }
        self.call("editMessageText", &body).map(|_| ())
    }

    pub(crate) fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), RequestError> {
        self.call(
            "deleteMessage",
            &json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .map(|_| ())
    }

    pub(crate) fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), RequestError> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
            body["show_alert"] = json!(show_alert);
        }
        // Telegram only honors an ack for a few seconds; a retried one
        // arrives too late to stop the spinner, so spend one attempt on it.
        let url = format!("{}/answerCallbackQuery", self.base);
        self.http.post_json_with_retries("telegram", &url, &body, 0).map(|_| ())
    }

    /// Membership status of a user in a chat ("member", "administrator", ...).
    pub(crate) fn chat_member_status(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<Option<String>, RequestError> {
        let result = self.call(
            "getChatMember",
            &json!({ "chat_id": chat_id, "user_id": user_id }),
        )?;
        Ok(result
            .and_then(|r| r.get("status").and_then(Value::as_str).map(str::to_string)))
    }

    pub(crate) fn get_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>, RequestError> {
        let url = format!("{}/getUpdates", self.base);
        let offset_param = offset.to_string();
        let timeout_param = POLL_TIMEOUT_SECS.to_string();
        let resp = self.http.get_json(
            "telegram",
            &url,
            &[
                ("offset", offset_param.as_str()),
                ("timeout", timeout_param.as_str()),
                ("allowed_updates", r#"["message","callback_query"]"#),
            ],
        )?;
        let updates = resp
            .body
            .get("result")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(updates).unwrap_or_default())
    }
}

/// Long-poll loop. Runs forever; transient API failures back off and resume
/// from the last acknowledged update.
pub(crate) fn run_poll_loop(app: Arc<App>) {
    eprintln!("[telegram] long-poll loop started");
    let workers = router::ChatWorkers::new();
    let mut offset: i64 = 0;
    loop {
        let updates = match app.telegram.get_updates(offset) {
            Ok(updates) => updates,
            Err(err) => {
                eprintln!("[telegram] getUpdates failed: {err}");
                std::thread::sleep(Duration::from_secs(2));
                continue;
            }
        };
        for update in updates {
            offset = offset.max(update.update_id + 1);
            workers.dispatch(&app, update);
        }
    }
}
