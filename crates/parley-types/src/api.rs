use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Reaction;

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the live-channel upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Messages --

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl SendMessageRequest {
    /// Text with surrounding whitespace removed; blank text counts as absent.
    pub fn normalized_text(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    pub fn normalized_image(&self) -> Option<String> {
        self.image
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .map(str::to_string)
    }
}

// -- Reactions --

/// `emoji: null` (or a missing field) removes the caller's reaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactRequest {
    #[serde(default)]
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactResponse {
    pub message_id: Uuid,
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_counts_as_absent() {
        let req = SendMessageRequest {
            text: Some("   ".into()),
            image: None,
        };
        assert_eq!(req.normalized_text(), None);

        let req = SendMessageRequest {
            text: Some(" hi ".into()),
            image: Some("".into()),
        };
        assert_eq!(req.normalized_text().as_deref(), Some("hi"));
        assert_eq!(req.normalized_image(), None);
    }

    #[test]
    fn react_request_accepts_null_emoji() {
        let req: ReactRequest = serde_json::from_str(r#"{"emoji":null}"#).unwrap();
        assert!(req.emoji.is_none());
        let req: ReactRequest = serde_json::from_str(r#"{"emoji":"😮"}"#).unwrap();
        assert_eq!(req.emoji.as_deref(), Some("😮"));
    }
}
