//! Inline-keyboard payloads. Telegram caps callback data at 64 bytes, so the
//! encoding is a short `|`-separated string.

const ANSWER: &str = "a";
const FINISH: &str = "f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Answer { tag: String, step: usize, key: String },
    Finish { tag: String },
}

impl CallbackAction {
    pub fn tag(&self) -> &str {
        match self {
            CallbackAction::Answer { tag, .. } | CallbackAction::Finish { tag } => tag,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            CallbackAction::Answer { tag, step, key } => format!("{ANSWER}|{tag}|{step}|{key}"),
            CallbackAction::Finish { tag } => format!("{FINISH}|{tag}"),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.split('|');
        let action = match parts.next()? {
            ANSWER => {
                let tag = parts.next()?.to_string();
                let step = parts.next()?.parse().ok()?;
                let key = parts.next()?.to_string();
                CallbackAction::Answer { tag, step, key }
            }
            FINISH => CallbackAction::Finish {
                tag: parts.next()?.to_string(),
            },
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(action)
    }
}
