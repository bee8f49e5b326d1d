use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: String,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            kind: "ephemeral".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text, .. } => text,
        }
    }

    pub fn has_cache_control(&self) -> bool {
        match self {
            Self::Text { cache_control, .. } => cache_control.is_some(),
        }
    }

    pub fn set_cache_control(&mut self, value: Option<CacheControl>) {
        match self {
            Self::Text { cache_control, .. } => *cache_control = value,
        }
    }
}

/// Plain text, or a list of parts when individual pieces need markers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
        }
    }

    /// Flattened text; parts are joined with a single space.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(ContentPart::as_text)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        match &self.content {
            MessageContent::Text(t) => t.contains(needle),
            MessageContent::Parts(parts) => parts.iter().any(|p| p.as_text().contains(needle)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_wire_shape() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn parts_round_trip_with_cache_control() {
        let mut part = ContentPart::text("cached");
        part.set_cache_control(Some(CacheControl::ephemeral()));
        let msg = Message::with_parts(Role::Assistant, vec![part]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"][0]["cache_control"]["type"], "ephemeral");
        let parsed: Message = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn text_joins_parts_with_space() {
        let msg = Message::with_parts(
            Role::User,
            vec![ContentPart::text("a"), ContentPart::text("b")],
        );
        assert_eq!(msg.text(), "a b");
        assert!(msg.contains("b"));
    }
}
