use std::collections::HashMap;

use thiserror::Error;

/// Telegram rejects callback payloads above this size with BUTTON_DATA_INVALID
/// at send time. Encoding fails loudly instead of shipping a doomed button.
pub(crate) const MAX_PAYLOAD_BYTES: usize = 64;

/// Every action a button can carry. Bulky state (search results, deletion
/// plans, paths) never rides in the payload; it stays behind a cache handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verb {
    Navigate { key: String },
    ToggleSetting { index: usize },
    CloseMenu,
    SearchPage { handle: String, page: usize },
    SearchDetail { handle: String, index: usize },
    TerminateSession { session_id: String },
    MessageSession { session_id: String },
    Broadcast,
    TerminateAll,
    TerminateAllConfirm,
    ConfirmDeletion { handle: String },
    ConfirmRelocation { handle: String },
    Cancel,
}

impl Verb {
    fn tag(&self) -> &'static str {
        match self {
            Verb::Navigate { .. } => "n",
            Verb::ToggleSetting { .. } => "t",
            Verb::CloseMenu => "c",
            Verb::SearchPage { .. } => "sp",
            Verb::SearchDetail { .. } => "sd",
            Verb::TerminateSession { .. } => "st",
            Verb::MessageSession { .. } => "sm",
            Verb::Broadcast => "sb",
            Verb::TerminateAll => "sa",
            Verb::TerminateAllConfirm => "sc",
            Verb::ConfirmDeletion { .. } => "dp",
            Verb::ConfirmRelocation { .. } => "rp",
            Verb::Cancel => "x",
        }
    }

    fn subject(&self) -> String {
        match self {
            Verb::Navigate { key } => key.clone(),
            Verb::ToggleSetting { index } => index.to_string(),
            Verb::SearchPage { handle, page } => format!("{handle}_{page}"),
            Verb::SearchDetail { handle, index } => format!("{handle}_{index}"),
            Verb::TerminateSession { session_id } | Verb::MessageSession { session_id } => {
                session_id.clone()
            }
            Verb::ConfirmDeletion { handle } | Verb::ConfirmRelocation { handle } => handle.clone(),
            Verb::CloseMenu
            | Verb::Broadcast
            | Verb::TerminateAll
            | Verb::TerminateAllConfirm
            | Verb::Cancel => String::new(),
        }
    }

    /// Whether dispatching this verb needs operator privileges. Browsing
    /// search results and cancelling one's own prompt stay open to any
    /// authorized user.
    pub(crate) fn requires_admin(&self) -> bool {
        !matches!(self, Verb::SearchPage { .. } | Verb::SearchDetail { .. } | Verb::Cancel)
    }
}

/// A decoded button click: the verb plus the user the button was minted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallbackAction {
    pub verb: Verb,
    pub initiator: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum CodecError {
    #[error("callback payload is {len} bytes, over the {MAX_PAYLOAD_BYTES}-byte limit")]
    TooLong { len: usize },
    #[error("unrecognized callback verb {0:?}")]
    UnknownVerb(String),
    #[error("malformed callback payload: {0}")]
    Malformed(String),
}

/// Encode a verb into wire form: `tag_subject_initiator`, subject omitted
/// when empty. Fails when the result would exceed the payload ceiling.
pub(crate) fn encode(verb: &Verb, initiator: i64) -> Result<String, CodecError> {
    let subject = verb.subject();
    let payload = if subject.is_empty() {
        format!("{}_{initiator}", verb.tag())
    } else {
        format!("{}_{subject}_{initiator}", verb.tag())
    };
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(CodecError::TooLong { len: payload.len() });
    }
    Ok(payload)
}

type SubjectParser = fn(&str) -> Option<Verb>;

/// Per-verb sub-parsers keyed by wire tag. Adding a verb means registering
/// one entry; decode itself never grows another match arm.
pub(crate) struct CodecRegistry {
    parsers: HashMap<&'static str, SubjectParser>,
}

impl CodecRegistry {
    pub(crate) fn new() -> Self {
        let mut parsers: HashMap<&'static str, SubjectParser> = HashMap::new();
        parsers.insert("n", |s| {
            (!s.is_empty()).then(|| Verb::Navigate { key: s.to_string() })
        });
        parsers.insert("t", |s| s.parse().ok().map(|index| Verb::ToggleSetting { index }));
        parsers.insert("c", |s| s.is_empty().then_some(Verb::CloseMenu));
        parsers.insert("sp", |s| {
            let (handle, page) = s.rsplit_once('_')?;
            (!handle.is_empty())
                .then(|| Some(Verb::SearchPage { handle: handle.to_string(), page: page.parse().ok()? }))
                .flatten()
        });
        parsers.insert("sd", |s| {
            let (handle, index) = s.rsplit_once('_')?;
            (!handle.is_empty())
                .then(|| Some(Verb::SearchDetail { handle: handle.to_string(), index: index.parse().ok()? }))
                .flatten()
        });
        parsers.insert("st", |s| {
            (!s.is_empty()).then(|| Verb::TerminateSession { session_id: s.to_string() })
        });
        parsers.insert("sm", |s| {
            (!s.is_empty()).then(|| Verb::MessageSession { session_id: s.to_string() })
        });
        parsers.insert("sb", |s| s.is_empty().then_some(Verb::Broadcast));
        parsers.insert("sa", |s| s.is_empty().then_some(Verb::TerminateAll));
        parsers.insert("sc", |s| s.is_empty().then_some(Verb::TerminateAllConfirm));
        parsers.insert("dp", |s| {
            (!s.is_empty()).then(|| Verb::ConfirmDeletion { handle: s.to_string() })
        });
        parsers.insert("rp", |s| {
            (!s.is_empty()).then(|| Verb::ConfirmRelocation { handle: s.to_string() })
        });
        parsers.insert("x", |s| s.is_empty().then_some(Verb::Cancel));
        CodecRegistry { parsers }
    }

    pub(crate) fn decode(&self, raw: &str) -> Result<CallbackAction, CodecError> {
        if raw.len() > MAX_PAYLOAD_BYTES {
            return Err(CodecError::TooLong { len: raw.len() });
        }
        let (tag, rest) = raw
            .split_once('_')
            .ok_or_else(|| CodecError::Malformed(raw.to_string()))?;
        let parser = self
            .parsers
            .get(tag)
            .ok_or_else(|| CodecError::UnknownVerb(tag.to_string()))?;
        let (subject, initiator) = match rest.rsplit_once('_') {
            Some((subject, id)) => (subject, id),
            None => ("", rest),
        };
        let initiator: i64 = initiator
            .parse()
            .map_err(|_| CodecError::Malformed(raw.to_string()))?;
        let verb = parser(subject).ok_or_else(|| CodecError::Malformed(raw.to_string()))?;
        Ok(CallbackAction { verb, initiator })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CodecRegistry {
        CodecRegistry::new()
    }

    #[test]
    fn round_trips_every_verb() {
        let verbs = [
            Verb::Navigate { key: "content_settings".into() },
            Verb::ToggleSetting { index: 42 },
            Verb::CloseMenu,
            Verb::SearchPage { handle: "h1a".into(), page: 2 },
            Verb::SearchDetail { handle: "h1a".into(), index: 17 },
            Verb::TerminateSession { session_id: "f3a09c2d77".into() },
            Verb::MessageSession { session_id: "f3a09c2d77".into() },
            Verb::Broadcast,
            Verb::TerminateAll,
            Verb::TerminateAllConfirm,
            Verb::ConfirmDeletion { handle: "h2b".into() },
            Verb::ConfirmRelocation { handle: "h2c".into() },
            Verb::Cancel,
        ];
        let reg = registry();
        for verb in verbs {
            let wire = encode(&verb, 123456789).unwrap();
            assert!(wire.len() <= MAX_PAYLOAD_BYTES, "{wire}");
            let action = reg.decode(&wire).unwrap();
            assert_eq!(action.verb, verb, "{wire}");
            assert_eq!(action.initiator, 123456789);
        }
    }

    #[test]
    fn encode_refuses_oversized_payload() {
        let verb = Verb::Navigate { key: "k".repeat(80) };
        match encode(&verb, 1) {
            Err(CodecError::TooLong { len }) => assert!(len > MAX_PAYLOAD_BYTES),
            other => panic!("expected TooLong, got {other:?}"),
        }
    }

    #[test]
    fn subject_with_underscores_survives() {
        let verb = Verb::Navigate { key: "new_library_content_settings".into() };
        let wire = encode(&verb, 7).unwrap();
        assert_eq!(registry().decode(&wire).unwrap().verb, verb);
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        let reg = registry();
        assert!(matches!(reg.decode("zz_1"), Err(CodecError::UnknownVerb(_))));
        assert!(matches!(reg.decode("nopayload"), Err(CodecError::Malformed(_))));
        assert!(matches!(reg.decode("t_notanumber_5"), Err(CodecError::Malformed(_))));
        assert!(matches!(reg.decode("n_5"), Err(CodecError::Malformed(_)))); // empty key
    }

    #[test]
    fn admin_gating_splits_browse_from_control() {
        assert!(Verb::ToggleSetting { index: 0 }.requires_admin());
        assert!(Verb::TerminateAll.requires_admin());
        assert!(!Verb::SearchPage { handle: "h1".into(), page: 0 }.requires_admin());
        assert!(!Verb::Cancel.requires_admin());
    }
}
