//! Agent definitions and the registry that stores them.
//!
//! Four builtin roles ship with the crate: Coder, Executor, FileSurfer and WebSurfer. Their
//! prompts and descriptions are fixed; they can be removed from a registry and brought back
//! with [`AgentRegistry::restore_defaults`], but never edited. Custom agents carry a
//! user-written system prompt and description. Retrieval agents answer questions from a named
//! search index.
//!
//! ```rust
//! use dreamteam::registry::{AgentRegistry, AgentSpec};
//!
//! let mut registry = AgentRegistry::new();
//! registry.restore_defaults();
//! registry
//!     .add(AgentSpec::retrieval("PolicyBot", "docs-index"))
//!     .unwrap();
//! assert_eq!(registry.specs().len(), 5);
//! ```

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::path::Path;

/// Emoji a new custom agent may be given.
pub const CUSTOM_AGENT_ICONS: [&str; 9] = ["🤖", "🔄", "😊", "🚀", "🌟", "🔥", "💡", "🎉", "👍"];
pub const RETRIEVAL_AGENT_ICON: &str = "🔍";

pub const RETRIEVAL_AGENT_DESCRIPTION: &str = "An agent that has access to internal search index and can handle RAG tasks, call this agent if you are getting questions on your internal search index.";

pub const RETRIEVAL_AGENT_SYSTEM_PROMPT: &str = "You are a helpful AI Assistant.\nWhen given a user query, use available tools to help the user with their request.\nReply \"TERMINATE\" in the end when everything is done.";

const CODER_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.\n\
Solve tasks using your coding and language skills.\n\
In the following cases, suggest python code (in a python coding block) or shell script (in a sh coding block) for the user to execute.\n\
    1. When you need to collect info, use the code to output the info you need, for example, browse or search the web, download/read a file, print the content of a webpage or a file, check the operating system. After sufficient info is printed and the task is ready to be solved based on your language skill, you can solve the task by yourself.\n\
    2. When you need to perform some task with code, use the code to perform the task and output the result. Finish the task smartly.\n\
Solve the task step by step if you need to. If a plan is not provided, explain your plan first. Be clear which step uses code, and which step uses your language skill.\n\
When using code, you must indicate the script type in the code block. The user cannot provide any other feedback or perform any other action beyond executing the code you suggest. The user can't modify your code. So do not suggest incomplete code which requires users to modify. Don't use a code block if it's not intended to be executed by the user.\n\
Don't include multiple code blocks in one response. Do not ask users to copy and paste the result. Instead, use the 'print' function for the output when relevant. Check the execution result returned by the user.\n\
If the result indicates there is an error, fix the error and output the code again. Suggest the full code instead of partial code or code changes.\n\
When you find an answer, verify the answer carefully. Include verifiable evidence in your response if possible.";

const CODER_DESCRIPTION: &str = "A helpful and general-purpose AI assistant that has strong language skills, Python skills, and Linux command line skills.";

const EXECUTOR_DESCRIPTION: &str = "A computer terminal that performs no other action than running Python scripts (provided to it quoted in ```python code blocks), or sh shell scripts (provided to it quoted in ```sh code blocks).";

const FILE_SURFER_SYSTEM_PROMPT: &str = "You are a helpful AI Assistant.\nWhen given a user query, use available functions to help the user with their request.\nYou can list directories and open text files inside the team's working directory.";

const FILE_SURFER_DESCRIPTION: &str = "An agent that can handle local files.";

const WEB_SURFER_SYSTEM_PROMPT: &str = "You are a helpful assistant that can browse the web.\nWhen given a request, use the visit_url tool to open pages, read their text and follow links found in them.\nSummarise what you found and quote the page address you relied on.";

const WEB_SURFER_DESCRIPTION: &str = "A helpful assistant with access to a web browser. Ask them to open pages, read their content and follow links. It can also summarize the entire page, or answer questions based on the content of the page.";

/// The closed set of agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    BuiltinCoder,
    BuiltinExecutor,
    BuiltinFileBrowser,
    BuiltinWebBrowser,
    Custom,
    Retrieval,
}

impl AgentKind {
    pub fn is_builtin(&self) -> bool {
        matches!(
            self,
            AgentKind::BuiltinCoder
                | AgentKind::BuiltinExecutor
                | AgentKind::BuiltinFileBrowser
                | AgentKind::BuiltinWebBrowser
        )
    }

    /// Label shown next to the agent in listings.
    pub fn label(&self) -> &'static str {
        if self.is_builtin() {
            "Builtin"
        } else if *self == AgentKind::Retrieval {
            "RAG"
        } else {
            "Custom"
        }
    }
}

/// Definition of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub kind: AgentKind,
    pub name: String,
    pub system_prompt: String,
    pub description: String,
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
}

impl AgentSpec {
    /// The four builtin roles in their canonical order.
    pub fn builtin_defaults() -> Vec<AgentSpec> {
        vec![
            Self::builtin(
                "0001",
                AgentKind::BuiltinCoder,
                "Coder",
                CODER_SYSTEM_PROMPT,
                CODER_DESCRIPTION,
                "👨‍💻",
            ),
            Self::builtin(
                "0002",
                AgentKind::BuiltinExecutor,
                "Executor",
                "",
                EXECUTOR_DESCRIPTION,
                "💻",
            ),
            Self::builtin(
                "0003",
                AgentKind::BuiltinFileBrowser,
                "FileSurfer",
                FILE_SURFER_SYSTEM_PROMPT,
                FILE_SURFER_DESCRIPTION,
                "📂",
            ),
            Self::builtin(
                "0004",
                AgentKind::BuiltinWebBrowser,
                "WebSurfer",
                WEB_SURFER_SYSTEM_PROMPT,
                WEB_SURFER_DESCRIPTION,
                "🏄‍♂️",
            ),
        ]
    }

    fn builtin(
        id: &str,
        kind: AgentKind,
        name: &str,
        system_prompt: &str,
        description: &str,
        icon: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            kind,
            name: name.to_string(),
            system_prompt: system_prompt.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
            index_name: None,
        }
    }

    /// A user-authored agent with a random icon.
    pub fn custom(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let icon = CUSTOM_AGENT_ICONS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("🤖");
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: AgentKind::Custom,
            name: name.into(),
            system_prompt: system_prompt.into(),
            description: description.into(),
            icon: icon.to_string(),
            index_name: None,
        }
    }

    /// An agent answering from `index_name`, with the stock retrieval prompt and description.
    pub fn retrieval(name: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: AgentKind::Retrieval,
            name: name.into(),
            system_prompt: RETRIEVAL_AGENT_SYSTEM_PROMPT.to_string(),
            description: RETRIEVAL_AGENT_DESCRIPTION.to_string(),
            icon: RETRIEVAL_AGENT_ICON.to_string(),
            index_name: Some(index_name.into()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Field-level checks that do not depend on other specs.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::Validation(
                "Agent name must not be blank".to_string(),
            ));
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(RegistryError::Validation(format!(
                "Agent name '{}' must not contain whitespace",
                self.name
            )));
        }
        if self.kind == AgentKind::Retrieval
            && self
                .index_name
                .as_deref()
                .map_or(true, |index| index.trim().is_empty())
        {
            return Err(RegistryError::Validation(format!(
                "Retrieval agent '{}' needs an index name",
                self.name
            )));
        }
        Ok(())
    }
}

/// Changes requested for an existing spec. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct AgentChanges {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    pub description: Option<String>,
    pub index_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    Validation(String),
    /// Builtin agents cannot be edited, only deleted.
    ImmutableAgent(String),
    NotFound(String),
    Persistence(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Validation(msg) => write!(f, "Validation error: {}", msg),
            RegistryError::ImmutableAgent(name) => {
                write!(f, "{} cannot be edited. Only deleted.", name)
            }
            RegistryError::NotFound(id) => write!(f, "Agent not found: {}", id),
            RegistryError::Persistence(msg) => write!(f, "Could not persist agents: {}", msg),
        }
    }
}

impl Error for RegistryError {}

/// Ordered collection of agent specs with unique names.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    specs: Vec<AgentSpec>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn specs(&self) -> &[AgentSpec] {
        &self.specs
    }

    pub fn get(&self, id: &str) -> Option<&AgentSpec> {
        self.specs.iter().find(|s| s.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&AgentSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Validate and append `spec`.
    pub fn add(&mut self, spec: AgentSpec) -> Result<(), RegistryError> {
        spec.validate()?;
        if self.find_by_name(&spec.name).is_some() {
            return Err(RegistryError::Validation(format!(
                "An agent named '{}' already exists",
                spec.name
            )));
        }
        if self.get(&spec.id).is_some() {
            return Err(RegistryError::Validation(format!(
                "An agent with id '{}' already exists",
                spec.id
            )));
        }
        log::info!("dreamteam::registry: added {} ({})", spec.name, spec.kind.label());
        self.specs.push(spec);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<AgentSpec, RegistryError> {
        let position = self
            .specs
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        Ok(self.specs.remove(position))
    }

    /// Apply `changes` to a custom or retrieval spec. Builtins are rejected untouched.
    pub fn edit(&mut self, id: &str, changes: AgentChanges) -> Result<&AgentSpec, RegistryError> {
        let position = self
            .specs
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let current = &self.specs[position];
        if current.kind.is_builtin() {
            return Err(RegistryError::ImmutableAgent(current.name.clone()));
        }

        let mut updated = current.clone();
        if let Some(name) = changes.name {
            updated.name = name;
        }
        if let Some(system_prompt) = changes.system_prompt {
            updated.system_prompt = system_prompt;
        }
        if let Some(description) = changes.description {
            updated.description = description;
        }
        if let Some(index_name) = changes.index_name {
            updated.index_name = Some(index_name);
        }
        updated.validate()?;
        if self
            .specs
            .iter()
            .any(|s| s.id != updated.id && s.name == updated.name)
        {
            return Err(RegistryError::Validation(format!(
                "An agent named '{}' already exists",
                updated.name
            )));
        }

        self.specs[position] = updated;
        Ok(&self.specs[position])
    }

    /// Replace the contents with exactly the four builtin roles.
    pub fn restore_defaults(&mut self) {
        self.specs = AgentSpec::builtin_defaults();
    }

    /// Write the specs as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(&self.specs)
            .map_err(|e| RegistryError::Persistence(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| RegistryError::Persistence(e.to_string()))
    }

    /// Load specs saved by [`save_to`](AgentRegistry::save_to), re-validating each one.
    pub fn load_from(path: &Path) -> Result<Self, RegistryError> {
        let json =
            std::fs::read_to_string(path).map_err(|e| RegistryError::Persistence(e.to_string()))?;
        let specs: Vec<AgentSpec> =
            serde_json::from_str(&json).map_err(|e| RegistryError::Persistence(e.to_string()))?;
        let mut registry = Self::new();
        for spec in specs {
            registry.add(spec)?;
        }
        Ok(registry)
    }
}
