//! Scenario context for the recogniser's initial prompt
//!
//! Team names, player rosters and keywords bias the recogniser towards the
//! proper nouns of a broadcast. The prompt window of the recogniser is small,
//! so the rendered prompt is cut at `MAX_PROMPT_CHARS`.

use serde::{Deserialize, Serialize};

/// Upper bound on the rendered prompt, in characters
pub const MAX_PROMPT_CHARS: usize = 600;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioContext {
    pub title: Option<String>,
    pub teams: Vec<String>,
    pub roster: Vec<String>,
    pub keywords: Vec<String>,
    pub extra_prompt: Option<String>,
}

impl ScenarioContext {
    /// Read the `scenario` object of a job payload; absent or malformed means empty
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        match payload.get("scenario") {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed scenario context: {}", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.initial_prompt().is_none()
    }

    /// Render the prompt: title, teams, roster, keywords, then free text
    pub fn initial_prompt(&self) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();

        if let Some(title) = non_blank(self.title.as_deref()) {
            parts.push(format!("{}.", title));
        }

        let teams = clean_list(&self.teams);
        if !teams.is_empty() {
            parts.push(format!("{}.", teams.join(" vs ")));
        }

        let roster = clean_list(&self.roster);
        if !roster.is_empty() {
            parts.push(format!("{}.", roster.join(", ")));
        }

        let keywords = clean_list(&self.keywords);
        if !keywords.is_empty() {
            parts.push(format!("{}.", keywords.join(", ")));
        }

        if let Some(extra) = non_blank(self.extra_prompt.as_deref()) {
            parts.push(extra.to_string());
        }

        if parts.is_empty() {
            return None;
        }

        Some(truncate_chars(&parts.join(" "), MAX_PROMPT_CHARS))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Trimmed, non-empty, first occurrence wins
fn clean_list(items: &[String]) -> Vec<&str> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].trim_end().to_string(),
        None => text.to_string(),
    }
}
