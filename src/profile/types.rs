use std::time::{SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};

/**
 * Languages translations can be shown in, as (code, name).
 */
pub const LANGUAGES: [(&str, &str); 6] = [
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
];

/**
 * Recognition accuracy (percent) assumed for a profile that was never calibrated.
 */
pub const DEFAULT_GESTURE_ACCURACY: f64 = 85.0;

pub fn language_name(code: &str) -> Option<&'static str> {
    LANGUAGES.iter().find(|(known, _)| *known == code).map(|(_, name)| *name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomGesture {
    pub id: String,
    pub name: String,
    pub description: String,
    pub accuracy: f64,
    pub times_used: u64,
    pub created_at: String,
    // raw sensor samples, opaque to us
    #[serde(default)]
    pub gesture_data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    // creation time in unix milliseconds, as a string
    pub id: String,
    pub name: String,
    pub email: String,
    pub preferred_language: String,
    pub gesture_accuracy: f64,
    pub total_translations: u64,
    pub average_session_length: f64,
    #[serde(default)]
    pub custom_gestures: Vec<CustomGesture>,
    // RFC 3339
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl UserProfile {
    pub fn new(created: SystemTime) -> Self {
        let id = created
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_millis())
            .unwrap_or(0);

        UserProfile {
            id: id.to_string(),
            name: String::new(),
            email: String::new(),
            preferred_language: "en".to_string(),
            gesture_accuracy: DEFAULT_GESTURE_ACCURACY,
            total_translations: 0,
            average_session_length: 0.0,
            custom_gestures: Vec::new(),
            created_at: humantime::format_rfc3339_millis(created).to_string(),
            last_updated: None,
        }
    }

    /// Apply `key=value` from the command line. Only the user-editable fields can be set.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let value = value.trim();

        match key {
            "name" => self.name = value.to_string(),
            "email" => {
                if !value.is_empty() && !value.contains('@') {
                    return Err(format!("not an email address: {:?}", value));
                }
                self.email = value.to_string();
            },
            "preferredLanguage" => {
                if language_name(value).is_none() {
                    let codes: Vec<&str> = LANGUAGES.iter().map(|(code, _)| *code).collect();
                    return Err(format!("unsupported language {:?}, expected one of {}", value, codes.join(", ")));
                }
                self.preferred_language = value.to_string();
            },
            _ => return Err(format!("unknown or read-only profile field {:?}", key)),
        }

        Ok(())
    }
}
