use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};

/**
 * Width of the rule under the export header.
 */
pub const EXPORT_RULE_WIDTH: usize = 50;

/**
 * How many words `ConversationStats::most_used_words` keeps.
 */
pub const MOST_USED_WORDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    // creation time in unix milliseconds, doubles as identity
    pub id: u64,
    // RFC 3339
    pub date: String,
    pub messages: Vec<String>,
}

impl Conversation {
    pub fn new(messages: Vec<String>, created: SystemTime) -> Self {
        let id = created
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_millis() as u64)
            .unwrap_or(0);

        Conversation {
            id,
            date: humantime::format_rfc3339_millis(created).to_string(),
            messages,
        }
    }

    /// Case-insensitive match against the messages, or a prefix of the date (`2026-10-19`).
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }

        let needle = query.to_lowercase();
        self.date.starts_with(query)
            || self.messages.iter().any(|message| message.to_lowercase().contains(&needle))
    }

    /// Plain-text rendering used for sharing.
    pub fn export_text(&self) -> String {
        format!(
            "Sign Language Translation Conversation\nDate: {}\n{}\n\n{}",
            self.date,
            "=".repeat(EXPORT_RULE_WIDTH),
            self.messages.join("\n\n"),
        )
    }

    pub fn export_file_name(&self) -> String {
        let day = self.date.split('T').next().unwrap_or("unknown");
        format!("conversation_{}.txt", day)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordCount {
    pub word: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStats {
    pub total_conversations: usize,
    pub total_messages: usize,
    pub average_messages_per_conversation: f64,
    pub most_used_words: Vec<WordCount>,
}

// "[12:01:02] Thank you" -> "Thank you"
fn message_text(message: &str) -> &str {
    match (message.starts_with('['), message.find("] ")) {
        (true, Some(end)) => &message[end + 2..],
        _ => message,
    }
}

impl ConversationStats {
    pub fn from_conversations(conversations: &[Conversation]) -> Self {
        let total_conversations = conversations.len();
        let total_messages: usize = conversations.iter().map(|c| c.messages.len()).sum();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for message in conversations.iter().flat_map(|c| c.messages.iter()) {
            for word in message_text(message).split_whitespace() {
                let word: String = word
                    .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                    .to_lowercase();
                if !word.is_empty() {
                    *counts.entry(word).or_insert(0) += 1;
                }
            }
        }

        let mut most_used_words: Vec<WordCount> = counts
            .into_iter()
            .map(|(word, count)| WordCount { word, count })
            .collect();
        most_used_words.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
        most_used_words.truncate(MOST_USED_WORDS);

        ConversationStats {
            total_conversations,
            total_messages,
            average_messages_per_conversation: if total_conversations == 0 {
                0.0
            } else {
                total_messages as f64 / total_conversations as f64
            },
            most_used_words,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn conversation(messages: &[&str]) -> Conversation {
        Conversation::new(
            messages.iter().map(|m| m.to_string()).collect(),
            UNIX_EPOCH + Duration::from_millis(1_760_000_000_123),
        )
    }

    #[test]
    fn id_and_date_come_from_creation_time() {
        let c = conversation(&[]);
        assert_eq!(c.id, 1_760_000_000_123);
        assert_eq!(c.date, "2025-10-09T08:53:20.123Z");
        assert_eq!(c.export_file_name(), "conversation_2025-10-09.txt");
    }

    #[test]
    fn search_matches_messages_and_date() {
        let c = conversation(&["[08:53:20] Thank you", "[08:53:30] Good morning"]);
        assert!(c.matches("thank"));
        assert!(c.matches("GOOD"));
        assert!(c.matches("2025-10-09"));
        assert!(c.matches("  "));
        assert!(!c.matches("help"));
    }

    #[test]
    fn export_layout() {
        let c = conversation(&["[08:53:20] Hello", "[08:53:30] Please"]);
        let text = c.export_text();
        let expected = format!(
            "Sign Language Translation Conversation\nDate: 2025-10-09T08:53:20.123Z\n{}\n\n[08:53:20] Hello\n\n[08:53:30] Please",
            "=".repeat(50)
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn stats() {
        let conversations = vec![
            conversation(&["[08:00:00] Thank you", "[08:00:05] Thank you!"]),
            conversation(&["[09:00:00] Hello", "[09:00:01] How are you?", "[09:00:02] you"]),
        ];
        let stats = ConversationStats::from_conversations(&conversations);

        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.total_messages, 5);
        assert!((stats.average_messages_per_conversation - 2.5).abs() < f64::EPSILON);
        assert_eq!(stats.most_used_words[0], WordCount { word: "you".to_string(), count: 4 });
        assert_eq!(stats.most_used_words[1], WordCount { word: "thank".to_string(), count: 2 });
    }

    #[test]
    fn stats_of_nothing() {
        let stats = ConversationStats::from_conversations(&[]);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.average_messages_per_conversation, 0.0);
        assert!(stats.most_used_words.is_empty());
    }
}
