use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How urgent a task is. Anything that is not one of the three known
/// names ends up as `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Parse a user supplied priority, falling back to `Medium`.
    pub fn from_input(input: &str) -> Priority {
        Priority::parse(input).unwrap_or_default()
    }

    /// Strict variant, used when we need to know whether a word names a
    /// priority at all.
    pub fn parse(input: &str) -> Option<Priority> {
        match input.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

// Stored documents may carry priorities we never wrote ourselves.
impl From<String> for Priority {
    fn from(value: String) -> Self {
        Priority::from_input(&value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single task, saved as one record of the tasks document.
///
/// Older documents may lack `tags`, `notes` or `priority`; those load with
/// their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u32,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    /// Build a fresh, pending task stamped with the current local time.
    pub fn new(id: u32, description: String, priority: Priority, tags: Vec<String>, notes: String) -> Task {
        Task {
            id,
            description,
            priority,
            tags: dedup_tags(tags),
            notes,
            created_at: Local::now().naive_local(),
            completed: false,
        }
    }

    /// Whether the task carries `tag`, ignoring case and a leading `#`.
    pub fn has_tag(&self, tag: &str) -> bool {
        let wanted = normalize_tag(tag);
        self.tags.iter().any(|t| normalize_tag(t) == wanted)
    }

    /// Case-insensitive substring match on the description or the notes.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.description.to_lowercase().contains(&keyword)
            || self.notes.to_lowercase().contains(&keyword)
    }

    /// Append tags that are not already present, compared by exact text.
    /// Returns how many were added.
    pub fn add_tags(&mut self, tags: &[String]) -> usize {
        let mut added = 0;
        for tag in tags {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
                added += 1;
            }
        }
        added
    }

    /// Drop tags by exact text. Missing tags are ignored.
    pub fn remove_tags(&mut self, tags: &[String]) -> usize {
        let before = self.tags.len();
        self.tags.retain(|t| !tags.contains(t));
        before - self.tags.len()
    }
}

/// Comparison form of a tag: no leading `#`, lower case.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim_start_matches('#').to_lowercase()
}

/// Remove repeated tags by exact text, keeping first occurrences in order.
fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !unique.contains(&tag) {
            unique.push(tag);
        }
    }
    unique
}
