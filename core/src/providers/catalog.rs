//! Seeded provider catalog: routing keys, chat endpoints, and model lists.
//!
//! The seeds are the source of truth for provider base URLs; the SQLite
//! mirror exists so the settings surface can enumerate models without
//! recompiling.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy)]
pub struct ProviderSeed {
    pub key: &'static str,
    pub display: &'static str,
    pub base_url: &'static str,
    pub default_model: &'static str,
    pub models: &'static [&'static str],
    pub requires_api_key: bool,
}

pub const PROVIDER_SEEDS: &[ProviderSeed] = &[
    ProviderSeed {
        key: "openai",
        display: "OpenAI",
        base_url: "https://api.openai.com",
        default_model: "gpt-4o",
        models: &[
            "gpt-4o",
            "gpt-4o-mini",
            "gpt-4-turbo",
            "gpt-4",
            "gpt-3.5-turbo",
            "gpt-3.5-turbo-16k",
        ],
        requires_api_key: true,
    },
    ProviderSeed {
        key: "claude",
        display: "Claude",
        base_url: "https://api.anthropic.com",
        default_model: "claude-sonnet-4-20250514",
        models: &[
            "claude-sonnet-4-20250514",
            "claude-opus-4-20250514",
            "claude-3-5-sonnet-20241022",
            "claude-3-opus-20240229",
            "claude-3-sonnet-20240229",
            "claude-3-haiku-20240307",
        ],
        requires_api_key: true,
    },
    ProviderSeed {
        key: "cohere",
        display: "Cohere",
        base_url: "https://api.cohere.ai",
        default_model: "command-r-plus",
        models: &["command-r-plus", "command-r", "command", "command-light"],
        requires_api_key: true,
    },
    ProviderSeed {
        key: "copilot",
        display: "Copilot",
        base_url: "https://api.openai.com",
        default_model: "gpt-4-turbo",
        models: &["gpt-4-turbo", "gpt-4"],
        requires_api_key: true,
    },
    ProviderSeed {
        key: "deepseek",
        display: "DeepSeek",
        base_url: "https://api.deepseek.com",
        default_model: "deepseek-chat",
        models: &["deepseek-chat", "deepseek-coder"],
        requires_api_key: true,
    },
    ProviderSeed {
        key: "gemini",
        display: "Gemini",
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        default_model: "gemini-2.0-flash-exp",
        models: &[
            "gemini-2.0-flash-exp",
            "gemini-1.5-pro",
            "gemini-1.5-flash",
            "gemini-1.0-pro",
        ],
        requires_api_key: true,
    },
    ProviderSeed {
        key: "grok",
        display: "Grok",
        base_url: "https://api.x.ai",
        default_model: "grok-beta",
        models: &["grok-beta", "grok-vision-beta"],
        requires_api_key: true,
    },
    ProviderSeed {
        key: "llama",
        display: "Llama",
        base_url: "https://api.together.xyz",
        default_model: "llama-3.3-70b-instruct",
        models: &[
            "llama-3.3-70b-instruct",
            "llama-3.1-405b-instruct",
            "llama-3.1-70b-instruct",
            "llama-3.1-8b-instruct",
            "llama-3-70b-instruct",
            "llama-3-8b-instruct",
        ],
        requires_api_key: true,
    },
    ProviderSeed {
        key: "mistral",
        display: "Mistral",
        base_url: "https://api.mistral.ai",
        default_model: "mistral-large-latest",
        models: &[
            "mistral-large-latest",
            "mistral-medium-latest",
            "mistral-small-latest",
            "mixtral-8x7b-instruct",
            "mixtral-8x22b-instruct",
        ],
        requires_api_key: true,
    },
    ProviderSeed {
        key: "qwen",
        display: "Qwen",
        base_url: "https://dashscope.aliyuncs.com",
        default_model: "qwen-turbo",
        models: &[
            "qwen-turbo",
            "qwen-plus",
            "qwen-max",
            "qwen2.5-72b-instruct",
            "qwen2.5-7b-instruct",
        ],
        requires_api_key: true,
    },
];

pub fn seed_for(key: &str) -> Option<&'static ProviderSeed> {
    PROVIDER_SEEDS.iter().find(|seed| seed.key == key)
}

/// Canonical model record. Catalog responses and settings payloads may carry
/// a model either as a bare string or as an object with a `name` field; both
/// shapes are normalised into this one immediately on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelName {
    pub name: String,
}

impl ModelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelShape {
    Plain(String),
    Tagged { name: String },
}

impl<'de> Deserialize<'de> for ModelName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let shape = ModelShape::deserialize(deserializer)?;
        let name = match shape {
            ModelShape::Plain(name) => name,
            ModelShape::Tagged { name } => name,
        };
        Ok(ModelName { name })
    }
}

pub fn seed_defaults(conn: &Connection) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    for seed in PROVIDER_SEEDS {
        let models_json = serde_json::to_string(seed.models)?;
        conn.execute(
            "INSERT INTO ai_providers (id, display_name, base_url, default_model, models_json, requires_api_key, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 base_url = excluded.base_url,
                 default_model = excluded.default_model,
                 models_json = excluded.models_json,
                 requires_api_key = excluded.requires_api_key,
                 updated_at = excluded.updated_at",
            params![
                seed.key,
                seed.display,
                seed.base_url,
                seed.default_model,
                models_json,
                seed.requires_api_key as i32,
                now,
            ],
        )?;
    }
    Ok(())
}

/// Enumerate the models offered for a provider. Unknown providers yield an
/// empty list rather than an error, mirroring the catalog contract.
pub fn list_models(conn: &Connection, provider: &str) -> Result<Vec<ModelName>> {
    let mut stmt = conn.prepare("SELECT models_json FROM ai_providers WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![provider], |row| row.get::<_, String>(0))?;
    let Some(models_json) = rows.next().transpose()? else {
        return Ok(Vec::new());
    };
    let models: Vec<ModelName> = serde_json::from_str(&models_json).unwrap_or_default();
    Ok(models)
}
