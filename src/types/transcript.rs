use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable transcript chunk delivered by the meeting-bot webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transcript {
    pub id: i64,
    pub bot_id: String,
    pub user_id: String,
    pub transcript_text: String,
    pub created_at: DateTime<Utc>,
}

/// Webhook envelope: `{"data": {"bot_id", "text", "metadata": {"user_id"}}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptWebhook {
    #[serde(default)]
    pub data: TranscriptWebhookData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptWebhookData {
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: TranscriptMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptMetadata {
    #[serde(default, deserialize_with = "user_id_as_string")]
    pub user_id: Option<String>,
}

// Bots echo back whatever metadata they were given, so numeric ids show up too.
fn user_id_as_string<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(de)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl TranscriptWebhook {
    /// The (bot_id, user_id, text) triple, when both correlators are present.
    pub fn into_parts(self) -> Option<(String, String, String)> {
        let data = self.data;
        let bot_id = data.bot_id.filter(|s| !s.is_empty())?;
        let user_id = data.metadata.user_id.filter(|s| !s.is_empty())?;
        Some((bot_id, user_id, data.text))
    }
}
