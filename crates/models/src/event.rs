use serde::{Deserialize, Serialize};

/// What happened to a tenant row in the central registry.
///
/// The numeric values are the wire format shared with every publisher on the
/// invalidation channel; do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ChangeKind {
    Added = 1,
    Removed = 2,
    Updated = 3,
}

impl From<ChangeKind> for u8 {
    fn from(kind: ChangeKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for ChangeKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ChangeKind::Added),
            2 => Ok(ChangeKind::Removed),
            3 => Ok(ChangeKind::Updated),
            other => Err(format!("unknown change category: {}", other)),
        }
    }
}

/// A tenant change notification, published on the invalidation channel as a
/// small JSON object: `{"AppKey": "...", "Category": 1|2|3}`.
///
/// Consumers treat the payload as a hint only and re-fetch the authoritative
/// record when reconciling, so a stale or reordered event self-heals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "AppKey")]
    pub app_key: String,
    #[serde(rename = "Category")]
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(app_key: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            app_key: app_key.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = ChangeEvent::new("A1", ChangeKind::Removed);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"AppKey":"A1","Category":2}"#);
    }

    #[test]
    fn test_event_decode() {
        let event: ChangeEvent =
            serde_json::from_str(r#"{"AppKey":"game-7","Category":3}"#).unwrap();
        assert_eq!(event.app_key, "game-7");
        assert_eq!(event.kind, ChangeKind::Updated);
    }

    #[test]
    fn test_unknown_category_rejected() {
        let result = serde_json::from_str::<ChangeEvent>(r#"{"AppKey":"x","Category":9}"#);
        assert!(result.is_err());
    }
}
