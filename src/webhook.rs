use std::io;
use std::io::Read;
use std::sync::Arc;
use std::thread;

use tiny_http::{Method, Response, Server};

use crate::notify;
use crate::router::App;

/// Read a webhook body. Emby posts either raw JSON or a form-encoded
/// `data=<json>` field depending on the notification plugin in use.
pub(crate) fn parse_event_body(request: &mut tiny_http::Request) -> Result<serde_json::Value, String> {
    let mut body = String::new();
    request
        .as_reader()
        .read_to_string(&mut body)
        .map_err(|e| format!("read body: {e}"))?;
    let body = body.trim();
    if body.is_empty() {
        return Ok(serde_json::json!({}));
    }
    if let Some(rest) = body.strip_prefix("data=") {
        let decoded = url_decode(rest);
        return serde_json::from_str(&decoded).map_err(|e| format!("form json: {e}"));
    }
    serde_json::from_str(body).map_err(|e| format!("json: {e}"))
}

fn url_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            byte => out.push(byte),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Accept Emby webhook posts and hand each one to its own worker thread, so
/// a slow notification (poster lookup, retry backoff) never blocks the next
/// event from being accepted.
pub(crate) fn run_webhook_server(
    app: Arc<App>,
    bind: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{bind}:{port}");
    let server = Server::http(&addr)
        .map_err(|e| io::Error::other(format!("webhook server: {e}")))?;
    eprintln!("[webhook] listening on http://{addr}");

    for mut request in server.incoming_requests() {
        if *request.method() != Method::Post {
            let _ = request.respond(Response::from_string("ok"));
            continue;
        }
        let payload = match parse_event_body(&mut request) {
            Ok(payload) => payload,
            Err(err) => {
                eprintln!("[webhook] unreadable payload: {err}");
                let _ = request.respond(Response::from_string("bad request").with_status_code(400));
                continue;
            }
        };
        let _ = request.respond(Response::from_string("ok"));
        let app = app.clone();
        thread::spawn(move || notify::dispatch_event(&app, &payload));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_form_escapes() {
        assert_eq!(url_decode("a+b"), "a b");
        assert_eq!(url_decode("%7B%22Event%22%3A1%7D"), r#"{"Event":1}"#);
        assert_eq!(url_decode("100%"), "100%");
    }
}
