//! Read-only file access for the file surfer, confined to one root directory.

use crate::dreamteam::tool_protocol::{
    ToolMetadata, ToolParameter, ToolParameterType, ToolResult,
};
use crate::dreamteam::tool_protocols::CustomToolProtocol;
use serde_json::json;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Longest file excerpt handed back to the model, in bytes.
pub const MAX_FILE_BYTES: usize = 32 * 1024;

#[derive(Debug)]
pub enum FileBrowserError {
    /// The path resolves outside the root.
    OutsideRoot(String),
    NotFound(String),
    NotAFile(String),
    NotADirectory(String),
    Io(String),
}

impl fmt::Display for FileBrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileBrowserError::OutsideRoot(p) => write!(f, "Path '{}' is outside the allowed root", p),
            FileBrowserError::NotFound(p) => write!(f, "No such file or directory: {}", p),
            FileBrowserError::NotAFile(p) => write!(f, "'{}' is not a file", p),
            FileBrowserError::NotADirectory(p) => write!(f, "'{}' is not a directory", p),
            FileBrowserError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl Error for FileBrowserError {}

#[derive(Debug, Clone)]
pub struct FileBrowser {
    root: PathBuf,
}

impl FileBrowser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` against the root and refuse anything that escapes it, symlinks
    /// included.
    async fn resolve(&self, relative: &str) -> Result<PathBuf, FileBrowserError> {
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| FileBrowserError::Io(format!("cannot resolve root: {}", e)))?;
        let trimmed = relative.trim().trim_start_matches('/');
        let candidate = if trimmed.is_empty() || trimmed == "." {
            root.clone()
        } else {
            root.join(trimmed)
        };
        let resolved = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| FileBrowserError::NotFound(relative.to_string()))?;
        if !resolved.starts_with(&root) {
            return Err(FileBrowserError::OutsideRoot(relative.to_string()));
        }
        Ok(resolved)
    }

    /// Entries of a directory, sorted, directories suffixed with `/`.
    pub async fn list_directory(&self, relative: &str) -> Result<Vec<String>, FileBrowserError> {
        let dir = self.resolve(relative).await?;
        if !dir.is_dir() {
            return Err(FileBrowserError::NotADirectory(relative.to_string()));
        }
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| FileBrowserError::Io(e.to_string()))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FileBrowserError::Io(e.to_string()))?
        {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.path().is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Text of a file, lossily decoded and cut at [`MAX_FILE_BYTES`].
    pub async fn open_file(&self, relative: &str) -> Result<String, FileBrowserError> {
        let path = self.resolve(relative).await?;
        if !path.is_file() {
            return Err(FileBrowserError::NotAFile(relative.to_string()));
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| FileBrowserError::Io(e.to_string()))?;
        let truncated = bytes.len() > MAX_FILE_BYTES;
        let mut text = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_FILE_BYTES)]).to_string();
        if truncated {
            text.push_str("\n[... truncated]");
        }
        Ok(text)
    }

    /// Register `list_directory` and `open_file` on `protocol`.
    pub async fn register(&self, protocol: &CustomToolProtocol) {
        let browser = self.clone();
        protocol
            .register_async_tool(
                ToolMetadata::new(
                    "list_directory",
                    "List the files and folders in a directory of the working area.",
                )
                .with_parameter(
                    ToolParameter::new("path", ToolParameterType::String)
                        .with_description("Directory relative to the working area, '.' for its top"),
                ),
                Arc::new(move |params| {
                    let browser = browser.clone();
                    Box::pin(async move {
                        let path = params["path"].as_str().unwrap_or(".").to_string();
                        Ok(match browser.list_directory(&path).await {
                            Ok(names) => ToolResult::success(json!(names.join("\n"))),
                            Err(e) => ToolResult::failure(e.to_string()),
                        })
                    })
                }),
            )
            .await;

        let browser = self.clone();
        protocol
            .register_async_tool(
                ToolMetadata::new("open_file", "Open a text file and return its content.")
                    .with_parameter(
                        ToolParameter::new("path", ToolParameterType::String)
                            .with_description("File relative to the working area")
                            .required(),
                    ),
                Arc::new(move |params| {
                    let browser = browser.clone();
                    Box::pin(async move {
                        let Some(path) = params["path"].as_str().map(str::to_string) else {
                            return Ok(ToolResult::failure("'path' must be a string".to_string()));
                        };
                        Ok(match browser.open_file(&path).await {
                            Ok(text) => ToolResult::success(json!(text)),
                            Err(e) => ToolResult::failure(e.to_string()),
                        })
                    })
                }),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dreamteam::tool_protocol::ToolProtocol;

    #[tokio::test]
    async fn test_list_and_open_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let browser = FileBrowser::new(dir.path());
        assert_eq!(
            browser.list_directory(".").await.unwrap(),
            vec!["notes.txt".to_string(), "sub/".to_string()]
        );
        assert_eq!(browser.open_file("notes.txt").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_path_traversal_is_refused() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "s").unwrap();

        let browser = FileBrowser::new(&root);
        assert!(matches!(
            browser.open_file("../secret.txt").await,
            Err(FileBrowserError::OutsideRoot(_))
        ));
        assert!(matches!(
            browser.open_file("missing.txt").await,
            Err(FileBrowserError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tools_are_registered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# title").unwrap();
        let protocol = CustomToolProtocol::new();
        FileBrowser::new(dir.path()).register(&protocol).await;

        let names: Vec<String> = protocol
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["list_directory", "open_file"]);

        let opened = protocol
            .execute("open_file", json!({"path": "a.md"}))
            .await
            .unwrap();
        assert_eq!(opened.content_text(), "# title");
    }
}
