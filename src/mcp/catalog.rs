//! Resource and prompt registries owned by a session.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A readable resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Lookup key (e.g., "server://info")
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// Resource body; omitted from listings
    #[serde(default, skip_serializing)]
    pub text: String,
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

impl Resource {
    pub fn new(uri: impl Into<String>, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: String::new(),
            mime_type: default_mime_type(),
            text: text.into(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// Resources keyed by URI
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, Resource>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: Resource) -> Option<Resource> {
        self.resources.insert(resource.uri.clone(), resource)
    }

    /// Look up by URI, falling back to the display name
    pub fn get(&self, key: &str) -> Option<&Resource> {
        self.resources
            .get(key)
            .or_else(|| self.resources.values().find(|r| r.name == key))
    }

    pub fn list(&self) -> Vec<Resource> {
        self.resources.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// A declared prompt variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// A prompt template using `{{name}}` placeholders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
    #[serde(default, skip_serializing)]
    pub template: String,
}

/// The template still had required placeholders after substitution
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("missing required prompt arguments: {}", .0.join(", "))]
pub struct MissingArguments(pub Vec<String>);

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("valid regex"))
}

impl Prompt {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            arguments: Vec::new(),
            template: template.into(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn argument(mut self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.arguments.push(PromptArgument {
            name: name.into(),
            description: description.into(),
            required,
        });
        self
    }

    /// Substitute `{{name}}` placeholders with the supplied values.
    ///
    /// Placeholders with no supplied value are left as written. Declared
    /// required arguments must all be supplied.
    pub fn render(&self, values: &HashMap<String, String>) -> Result<String, MissingArguments> {
        let missing: Vec<String> = self
            .arguments
            .iter()
            .filter(|a| a.required && !values.contains_key(&a.name))
            .map(|a| a.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(MissingArguments(missing));
        }

        let rendered = placeholder_pattern().replace_all(&self.template, |caps: &regex::Captures| {
            match values.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        });
        Ok(rendered.into_owned())
    }
}

/// Prompts keyed by name
#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, Prompt>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, prompt: Prompt) -> Option<Prompt> {
        self.prompts.insert(prompt.name.clone(), prompt)
    }

    pub fn get(&self, name: &str) -> Option<&Prompt> {
        self.prompts.get(name)
    }

    pub fn list(&self) -> Vec<Prompt> {
        self.prompts.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}
