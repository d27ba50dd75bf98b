use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::util::{jitter_ratio, parse_retry_after};

#[derive(Debug, Error)]
pub(crate) enum RequestError {
    #[error("{service} request failed ({status}): {detail}")]
    Fatal { service: &'static str, status: u16, detail: String },
    #[error("{service} request still failing after {attempts} attempts: {detail}")]
    Exhausted { service: &'static str, attempts: u32, detail: String },
}

/// What a non-2xx response means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Classification {
    /// The requested end state already holds. Report success, change nothing.
    NoEffect,
    /// Transient. Worth another attempt after backoff.
    Retry,
    /// Will not succeed by repetition. Surface immediately.
    Fatal,
}

const RETRYABLE: [u16; 6] = [429, 500, 502, 503, 504, 529];

/// Classify a failed response. Pure so the table is directly testable; the
/// same (method, status, body) always maps to the same outcome.
pub(crate) fn classify(method: &str, status: u16, body: &str) -> Classification {
    if body.contains("message is not modified") || body.contains("message to delete not found") {
        return Classification::NoEffect;
    }
    if method.eq_ignore_ascii_case("DELETE") && status == 404 {
        return Classification::NoEffect;
    }
    if RETRYABLE.contains(&status) {
        return Classification::Retry;
    }
    Classification::Fatal
}

#[derive(Debug)]
pub(crate) struct ServiceResponse {
    pub body: Value,
    /// True when the call was absorbed as an already-satisfied request.
    pub no_effect: bool,
}

impl ServiceResponse {
    fn of(body: Value) -> Self {
        ServiceResponse { body, no_effect: false }
    }

    fn absorbed() -> Self {
        ServiceResponse { body: Value::Null, no_effect: true }
    }
}

/// Blocking HTTP client shared by every outbound integration. Retries
/// transient failures with exponential backoff, honors Retry-After, and
/// absorbs harmless no-op rejections.
pub(crate) struct ResilientClient {
    agent: ureq::Agent,
    max_retries: u32,
    retry_base: f64,
    retry_max: f64,
}

impl ResilientClient {
    pub(crate) fn new(max_retries: u32, retry_base: f64, retry_max: f64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(60))
            .build();
        ResilientClient { agent, max_retries, retry_base, retry_max }
    }

    pub(crate) fn get_json(
        &self,
        service: &'static str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<ServiceResponse, RequestError> {
        self.execute(service, "GET", url, query, None, self.max_retries)
    }

    /// `get_json` with a per-call attempt cap, for lookups whose value decays
    /// too fast to be worth the full backoff schedule.
    pub(crate) fn get_json_with_retries(
        &self,
        service: &'static str,
        url: &str,
        query: &[(&str, &str)],
        max_retries: u32,
    ) -> Result<ServiceResponse, RequestError> {
        self.execute(service, "GET", url, query, None, max_retries)
    }

    pub(crate) fn post_json(
        &self,
        service: &'static str,
        url: &str,
        body: &Value,
    ) -> Result<ServiceResponse, RequestError> {
        self.execute(service, "POST", url, &[], Some(body), self.max_retries)
    }

    pub(crate) fn post_json_with_retries(
        &self,
        service: &'static str,
        url: &str,
        body: &Value,
        max_retries: u32,
    ) -> Result<ServiceResponse, RequestError> {
        self.execute(service, "POST", url, &[], Some(body), max_retries)
    }

    pub(crate) fn delete(
        &self,
        service: &'static str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<ServiceResponse, RequestError> {
        self.execute(service, "DELETE", url, query, None, self.max_retries)
    }

    fn execute(
        &self,
        service: &'static str,
        method: &str,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        max_retries: u32,
    ) -> Result<ServiceResponse, RequestError> {
        let mut last_detail = String::new();
        for attempt in 0..=max_retries {
            let mut req = self.agent.request(method, url);
            for (key, value) in query {
                req = req.query(key, value);
            }
            let result = match body {
                Some(json) => req.send_json(json.clone()),
                None => req.call(),
            };
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status == 204 {
                        return Ok(ServiceResponse::of(Value::Null));
                    }
                    let parsed = resp.into_json::<Value>().unwrap_or(Value::Null);
                    return Ok(ServiceResponse::of(parsed));
                }
                Err(ureq::Error::Status(status, resp)) => {
                    let retry_after = parse_retry_after(&resp);
                    let detail = resp.into_string().unwrap_or_default();
                    match classify(method, status, &detail) {
                        Classification::NoEffect => return Ok(ServiceResponse::absorbed()),
                        Classification::Fatal => {
                            return Err(RequestError::Fatal { service, status, detail });
                        }
                        Classification::Retry => {
                            last_detail = format!("status {status}: {}", detail.trim());
                            if attempt < max_retries {
                                let delay = self.backoff(attempt, retry_after);
                                eprintln!(
                                    "[http] {service} {method} retry {}/{} in {delay:.1}s ({last_detail})",
                                    attempt + 1,
                                    max_retries
                                );
                                std::thread::sleep(Duration::from_secs_f64(delay));
                            }
                        }
                    }
                }
                Err(ureq::Error::Transport(err)) => {
                    last_detail = err.to_string();
                    if attempt < max_retries {
                        let delay = self.backoff(attempt, None);
                        eprintln!(
                            "[http] {service} {method} retry {}/{} in {delay:.1}s (transport: {last_detail})",
                            attempt + 1,
                            max_retries
                        );
                        std::thread::sleep(Duration::from_secs_f64(delay));
                    }
                }
            }
        }
        Err(RequestError::Exhausted {
            service,
            attempts: max_retries + 1,
            detail: last_detail,
        })
    }

    fn backoff(&self, attempt: u32, retry_after: Option<f64>) -> f64 {
        let mut delay = (self.retry_base * 2.0f64.powi(attempt as i32)).min(self.retry_max);
        if let Some(after) = retry_after {
            delay = delay.max(after);
        }
        delay + delay * jitter_ratio() * 0.2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_without_change_is_absorbed() {
        let body = r#"{"ok":false,"description":"Bad Request: message is not modified"}"#;
        assert_eq!(classify("POST", 400, body), Classification::NoEffect);
        // Classification is stable under repetition.
        assert_eq!(classify("POST", 400, body), Classification::NoEffect);
    }

    #[test]
    fn delete_of_missing_message_is_absorbed() {
        let body = r#"{"ok":false,"description":"Bad Request: message to delete not found"}"#;
        assert_eq!(classify("POST", 400, body), Classification::NoEffect);
        assert_eq!(classify("DELETE", 404, "Not Found"), Classification::NoEffect);
    }

    #[test]
    fn transient_statuses_retry() {
        for status in [429, 500, 502, 503, 504, 529] {
            assert_eq!(classify("GET", status, ""), Classification::Retry);
        }
    }

    #[test]
    fn per_call_retry_cap_overrides_client_default() {
        // Nothing listens on the discard port; the connection is refused
        // immediately, so a zero-retry call must fail on its one attempt even
        // though the client would normally retry five times.
        let client = ResilientClient::new(5, 0.01, 0.02);
        match client.get_json_with_retries("test", "http://127.0.0.1:9/x", &[], 0) {
            Err(RequestError::Exhausted { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[test]
    fn malformed_requests_are_fatal() {
        let body = r#"{"ok":false,"description":"Bad Request: BUTTON_DATA_INVALID"}"#;
        assert_eq!(classify("POST", 400, body), Classification::Fatal);
        assert_eq!(classify("GET", 401, "unauthorized"), Classification::Fatal);
        assert_eq!(classify("GET", 404, "missing"), Classification::Fatal);
    }
}
