//! AI Query Expansion
//!
//! Asks an LLM provider for additional search terms to widen the lexical
//! leg's recall. Degrades to nothing rather than failing: stub providers,
//! transport errors, and malformed responses all yield an empty term list.

use std::time::Duration;

use crate::config::Settings;

/// Maximum expansion terms returned.
pub const MAX_TERMS: usize = 10;

/// Maximum length of a single expansion term, in characters.
pub const MAX_TERM_LENGTH: usize = 50;

const DEFAULT_ANTHROPIC_MODEL: &str = "claude-haiku-4-5-20251001";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ANTHROPIC_BASE: &str = "https://api.anthropic.com";
const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

fn expansion_prompt(query: &str) -> String {
    format!(
        "Given the search query below, generate up to {MAX_TERMS} additional search terms \
         that would help find relevant results. Return ONLY the terms, one per line, no \
         numbering or bullets. Each term should be under {MAX_TERM_LENGTH} characters. Focus \
         on synonyms, related concepts, and alternative phrasings. Do not repeat the \
         original query.\n\nQuery: {query}"
    )
}

/// Expansion error (internal; the public surface absorbs these).
#[derive(Debug, thiserror::Error)]
enum ExpansionError {
    #[error("expansion request failed: {0}")]
    Http(String),
    #[error("expansion response malformed: {0}")]
    Malformed(String),
}

/// Supported expansion providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionProvider {
    Anthropic,
    OpenAi,
    /// `stub`/`none`/`local`/unknown: expansion disabled
    Stub,
}

impl ExpansionProvider {
    pub fn parse(s: &str) -> Self {
        match s {
            "anthropic" => ExpansionProvider::Anthropic,
            "openai" => ExpansionProvider::OpenAi,
            _ => ExpansionProvider::Stub,
        }
    }
}

/// Service for AI-powered query expansion.
pub struct QueryExpansionService {
    provider: ExpansionProvider,
    model: String,
    api_key: String,
    api_base: String,
    agent: ureq::Agent,
}

impl QueryExpansionService {
    pub fn new(provider: ExpansionProvider, model: &str, api_key: &str, api_base: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(20))
            .build();
        Self {
            provider,
            model: model.to_string(),
            api_key: api_key.to_string(),
            api_base: api_base.to_string(),
            agent,
        }
    }

    /// Wire up from settings. None when the configured provider is a stub,
    /// which disables expansion silently.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let provider = ExpansionProvider::parse(&settings.ai_provider);
        if provider == ExpansionProvider::Stub {
            return None;
        }
        Some(Self::new(
            provider,
            &settings.ai_model,
            &settings.ai_api_key,
            &settings.ai_api_base,
        ))
    }

    /// Generate additional search terms for the query. Empty on blank
    /// input, stub provider, or any provider failure.
    pub fn expand(&self, query: &str) -> Vec<String> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        if self.provider == ExpansionProvider::Stub {
            return Vec::new();
        }

        match self.call_provider(query) {
            Ok(terms) => terms,
            Err(e) => {
                tracing::warn!("Query expansion failed: {}", e);
                Vec::new()
            }
        }
    }

    fn call_provider(&self, query: &str) -> Result<Vec<String>, ExpansionError> {
        let prompt = expansion_prompt(query);
        let text = match self.provider {
            ExpansionProvider::Anthropic => self.call_anthropic(&prompt)?,
            ExpansionProvider::OpenAi => self.call_openai(&prompt)?,
            ExpansionProvider::Stub => return Ok(Vec::new()),
        };
        Ok(parse_terms(&text))
    }

    fn call_anthropic(&self, prompt: &str) -> Result<String, ExpansionError> {
        let base = if self.api_base.is_empty() {
            DEFAULT_ANTHROPIC_BASE
        } else {
            &self.api_base
        };
        let model = if self.model.is_empty() {
            DEFAULT_ANTHROPIC_MODEL
        } else {
            &self.model
        };

        let response = self
            .agent
            .post(&format!("{}/v1/messages", base.trim_end_matches('/')))
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", "2023-06-01")
            .send_json(serde_json::json!({
                "model": model,
                "max_tokens": 256,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .map_err(|e| ExpansionError::Http(e.to_string()))?;

        let body: serde_json::Value = response
            .into_json()
            .map_err(|e| ExpansionError::Malformed(e.to_string()))?;
        body["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExpansionError::Malformed("missing content[0].text".into()))
    }

    fn call_openai(&self, prompt: &str) -> Result<String, ExpansionError> {
        let base = if self.api_base.is_empty() {
            DEFAULT_OPENAI_BASE
        } else {
            &self.api_base
        };
        let model = if self.model.is_empty() {
            DEFAULT_OPENAI_MODEL
        } else {
            &self.model
        };

        let response = self
            .agent
            .post(&format!("{}/chat/completions", base.trim_end_matches('/')))
            .set("authorization", &format!("Bearer {}", self.api_key))
            .send_json(serde_json::json!({
                "model": model,
                "max_tokens": 256,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .map_err(|e| ExpansionError::Http(e.to_string()))?;

        let body: serde_json::Value = response
            .into_json()
            .map_err(|e| ExpansionError::Malformed(e.to_string()))?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExpansionError::Malformed("missing choices[0].message.content".into()))
    }
}

/// Parse an LLM response into clean search terms: strip bullet/numbering
/// prefixes, drop blanks and over-length terms, cap at [`MAX_TERMS`].
pub(crate) fn parse_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for line in text.trim().lines() {
        let term = line
            .trim()
            .trim_start_matches(|c: char| matches!(c, '\u{2022}' | '-' | '*' | '0'..='9' | '.' | ')' | ' '));
        if !term.is_empty() && term.chars().count() <= MAX_TERM_LENGTH {
            terms.push(term.to_string());
        }
        if terms.len() >= MAX_TERMS {
            break;
        }
    }
    terms
}
