use std::sync::{Arc, RwLock, PoisonError};
use serde::{Deserialize, Serialize};

pub const MAX_CONFIDENCE: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub speech_enabled: bool,
    pub haptic_feedback: bool,
    pub high_contrast_mode: bool,
    pub text_size: u8,
    pub dark_mode: bool,
    pub notifications: bool,
    pub offline_mode: bool,
    pub auto_save: bool,
    // seconds
    pub gesture_timeout: u8,
    // minimum confidence [0, 100] a gesture needs to be shown
    pub confidence_threshold: u8,
}

impl Settings {
    /// Bring values read from disk back into range.
    pub fn sanitize(&mut self) {
        self.confidence_threshold = self.confidence_threshold.min(MAX_CONFIDENCE);
        if self.text_size == 0 {
            self.text_size = Settings::default().text_size;
        }
    }

    /// Apply `key=value` from the command line. Keys use the on-disk (camelCase) names.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        fn flag(value: &str) -> Result<bool, String> {
            value.parse::<bool>().map_err(|_| format!("expected true/false, got {:?}", value))
        }
        fn number(value: &str) -> Result<u8, String> {
            value.parse::<u8>().map_err(|_| format!("expected a number 0-255, got {:?}", value))
        }

        match key {
            "speechEnabled" => self.speech_enabled = flag(value)?,
            "hapticFeedback" => self.haptic_feedback = flag(value)?,
            "highContrastMode" => self.high_contrast_mode = flag(value)?,
            "textSize" => self.text_size = number(value)?,
            "darkMode" => self.dark_mode = flag(value)?,
            "notifications" => self.notifications = flag(value)?,
            "offlineMode" => self.offline_mode = flag(value)?,
            "autoSave" => self.auto_save = flag(value)?,
            "gestureTimeout" => self.gesture_timeout = number(value)?,
            "confidenceThreshold" => {
                let threshold = number(value)?;
                if threshold > MAX_CONFIDENCE {
                    return Err(format!("confidence threshold must be 0-100, got {}", threshold));
                }
                self.confidence_threshold = threshold;
            },
            _ => return Err(format!("unknown setting {:?}", key)),
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            speech_enabled: true,
            haptic_feedback: true,
            high_contrast_mode: false,
            text_size: 18,
            dark_mode: false,
            notifications: true,
            offline_mode: false,
            auto_save: true,
            gesture_timeout: 3,
            confidence_threshold: 75,
        }
    }
}

/// Settings shared between the core (which only reads) and whoever edits them.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        SharedSettings { inner: Arc::new(RwLock::new(settings)) }
    }

    pub fn get(&self) -> Settings {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn update<F: FnOnce(&mut Settings)>(&self, change: F) -> Settings {
        let mut settings = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        change(&mut settings);
        settings.sanitize();
        settings.clone()
    }

    pub fn confidence_threshold(&self) -> u8 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).confidence_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_app() {
        let settings = Settings::default();
        assert!(settings.speech_enabled);
        assert!(settings.haptic_feedback);
        assert_eq!(settings.text_size, 18);
        assert_eq!(settings.gesture_timeout, 3);
        assert_eq!(settings.confidence_threshold, 75);
    }

    #[test]
    fn json_uses_camel_case_and_fills_missing_fields() {
        let settings: Settings = serde_json::from_str(r#"{"confidenceThreshold": 60, "speechEnabled": false}"#).unwrap();
        assert_eq!(settings.confidence_threshold, 60);
        assert!(!settings.speech_enabled);
        assert!(settings.haptic_feedback);

        let json = serde_json::to_string(&Settings::default()).unwrap();
        assert!(json.contains("\"hapticFeedback\":true"));
    }

    #[test]
    fn sanitize_clamps_threshold() {
        let mut settings = Settings { confidence_threshold: 180, text_size: 0, ..Settings::default() };
        settings.sanitize();
        assert_eq!(settings.confidence_threshold, 100);
        assert_eq!(settings.text_size, 18);
    }

    #[test]
    fn set_by_key() {
        let mut settings = Settings::default();
        settings.set("confidenceThreshold", "90").unwrap();
        settings.set("speechEnabled", "false").unwrap();
        assert_eq!(settings.confidence_threshold, 90);
        assert!(!settings.speech_enabled);

        assert!(settings.set("confidenceThreshold", "101").is_err());
        assert!(settings.set("darkMode", "yes").is_err());
        assert!(settings.set("volume", "3").is_err());
    }

    #[test]
    fn shared_settings_update() {
        let shared = SharedSettings::new(Settings::default());
        let other = shared.clone();
        other.update(|settings| settings.confidence_threshold = 200);
        assert_eq!(shared.confidence_threshold(), 100);
    }
}
