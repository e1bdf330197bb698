//! Builtin tools the LLM-backed members call through a [`CustomToolProtocol`].
//!
//! - [`retrieval`]: top-1 vector search over a named index
//! - [`file_browser`]: read-only browsing below a root directory
//! - [`web_browser`]: fetch a page (or image) and return its text
//!
//! [`CustomToolProtocol`]: crate::tool_protocols::CustomToolProtocol

pub mod file_browser;
pub mod retrieval;
pub mod web_browser;

pub use file_browser::FileBrowser;
pub use retrieval::{AzureSearchBackend, Passage, RetrievalError, RetrievalTool, SearchBackend};
pub use web_browser::WebBrowser;
