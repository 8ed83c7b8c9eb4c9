//! Persona prompt book: role name -> system prompt.

use std::{collections::HashMap, fs, path::Path};

use anyhow::Context;
use tracing::{info, warn};

pub const DEFAULT_ROLE: &str = "default";

const BUILTIN_PROMPTS: &[(&str, &str)] = &[
    (DEFAULT_ROLE, "You are a helpful assistant."),
    (
        "professional",
        "You are a professional assistant with expertise in various fields.",
    ),
    (
        "creative",
        "You are a creative assistant that helps with brainstorming.",
    ),
    ("code", "You are a coding assistant that helps with programming."),
    (
        "儿童心理专家",
        "你是一个儿童心理专家，擅长儿童心理健康和发展指导。",
    ),
    ("知心大姐姐", "你是一个知心大姐姐，擅长心理疗愈和心理疏导。"),
];

#[derive(Debug, Clone)]
pub struct RoleBook {
    prompts: HashMap<String, String>,
}

impl Default for RoleBook {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RoleBook {
    pub fn builtin() -> Self {
        let prompts = BUILTIN_PROMPTS
            .iter()
            .map(|(role, prompt)| (role.to_string(), prompt.to_string()))
            .collect();
        Self { prompts }
    }

    /// Load `{ "<role>": "<system prompt>", ... }`. A file without a
    /// `default` entry gets the built-in one.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to load {}", path.as_ref().display()))?;
        let mut prompts: HashMap<String, String> =
            serde_json::from_str(&text).with_context(|| "prompt file is not a JSON object of strings")?;
        if prompts.is_empty() {
            return Err(anyhow::anyhow!("prompt file is empty"));
        }
        prompts
            .entry(DEFAULT_ROLE.to_string())
            .or_insert_with(|| BUILTIN_PROMPTS[0].1.to_string());
        Ok(Self { prompts })
    }

    /// Like [`RoleBook::from_file`], falling back to the built-in prompts.
    pub fn load_or_builtin<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(book) => {
                info!("Loaded {} persona prompts from {}", book.prompts.len(), path.as_ref().display());
                book
            }
            Err(e) => {
                warn!("Could not load persona prompts: {e:#}, using built-in prompts.");
                Self::builtin()
            }
        }
    }

    pub fn contains(&self, role: &str) -> bool {
        self.prompts.contains_key(role)
    }

    /// System prompt for `role`, or the default prompt for unknown roles.
    pub fn prompt_for(&self, role: &str) -> &str {
        self.prompts
            .get(role)
            .or_else(|| self.prompts.get(DEFAULT_ROLE))
            .map(String::as_str)
            .unwrap_or(BUILTIN_PROMPTS[0].1)
    }

    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.prompts.keys().cloned().collect();
        roles.sort();
        roles
    }
}
