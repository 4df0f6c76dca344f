//! Persona instructions and prompt assembly.
//!
//! The assistant's behaviour is one versioned template with named
//! parameters, rendered once at startup:
//!
//! ```toml
//! [persona]
//! version = "2"
//! template = "You are the portfolio assistant for {owner}. ..."
//!
//! [persona.parameters]
//! owner = "Ritik"
//! ```
//!
//! Placeholders are `{name}` where `name` is ASCII alphanumeric or `_`.
//! Rendering fails if the template references a parameter that is not
//! supplied, so a typo surfaces at startup instead of leaking `{owner}`
//! into every reply.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::Message;
use crate::{HuginnError, Result};

const DEFAULT_TEMPLATE: &str = "\
You are the official AI portfolio assistant for {owner}.
You were created by {owner} to represent them on their portfolio website.

Persona:
- You are helpful, smart and witty.
- You are primarily here to showcase {owner}'s work, but you are also a capable general-purpose assistant.
- Questions about maths, physics, coding or science get a correct answer.
- Personal questions about unrelated people are politely redirected to {owner}.

Profile:
- Role: {role}
- Specialty: {specialty}
- Projects: {projects}

Guidelines:
1. Be concise: keep answers under 4-5 sentences unless asked for a long explanation.
2. General topics: if asked for a script or an explanation, provide it.
3. Identity: if asked who made you, answer: \"{identity}\"
";

/// Versioned persona template plus the values substituted into it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_parameters")]
    pub parameters: BTreeMap<String, String>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            template: default_template(),
            parameters: default_parameters(),
        }
    }
}

fn default_version() -> String {
    "1".to_string()
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_parameters() -> BTreeMap<String, String> {
    [
        ("owner", "Ritik"),
        ("role", "Full-Stack Developer & Software Engineer"),
        (
            "specialty",
            "Web apps (React, Next.js), backends (FastAPI, Node.js) and Minecraft development (Java/Kotlin)",
        ),
        ("projects", "Quantum Anti-Cheat, AI Portfolio, Discord bots"),
        (
            "identity",
            "I was built by Ritik using Python and the Gemini API.",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl PersonaConfig {
    /// Substitute every `{name}` placeholder.
    ///
    /// Returns `Configuration` if a placeholder has no matching parameter.
    pub fn render(&self) -> Result<Persona> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let name_len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            let name = &after[..name_len];

            if name.is_empty() || !after[name_len..].starts_with('}') {
                // not a placeholder, keep the brace literally
                out.push('{');
                rest = after;
                continue;
            }

            let value = self.parameters.get(name).ok_or_else(|| {
                HuginnError::Configuration(format!(
                    "persona template v{} references unknown parameter '{name}'",
                    self.version
                ))
            })?;
            out.push_str(value);
            rest = &after[name_len + 1..];
        }
        out.push_str(rest);

        Ok(Persona {
            version: self.version.clone(),
            instructions: out.trim().to_string(),
        })
    }
}

/// Rendered persona instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    version: String,
    instructions: String,
}

impl Persona {
    /// Persona with the given instructions, used as-is.
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            version: "custom".to_string(),
            instructions: instructions.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Assemble the prompt for one request.
    pub fn prompt(&self, history: &[Message], message: &str) -> Prompt {
        let mut body = String::new();
        if !history.is_empty() {
            body.push_str("Conversation context:\n");
            for turn in history {
                body.push_str(turn.role.label());
                body.push_str(": ");
                body.push_str(&turn.content);
                body.push('\n');
            }
            body.push('\n');
        }
        body.push_str("User: ");
        body.push_str(message.trim());
        body.push_str("\nAssistant:");

        Prompt {
            system: self.instructions.clone(),
            body,
        }
    }
}

impl Default for Persona {
    fn default() -> Self {
        // The built-in template only references built-in parameters.
        PersonaConfig::default()
            .render()
            .unwrap_or_else(|_| Persona::new(DEFAULT_TEMPLATE))
    }
}

/// Prompt sent to the backend: system instructions plus the rendered turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub body: String,
}

impl Prompt {
    /// Single-string form for backends without a system-instruction slot.
    pub fn full_text(&self) -> String {
        format!("{}\n\n{}", self.system, self.body)
    }
}
