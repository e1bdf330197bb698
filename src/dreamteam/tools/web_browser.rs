//! Text-mode web browsing for the web surfer.
//!
//! `visit_url` fetches a page through the shared HTTP client pool. HTML is reduced to its
//! title, visible text and a short list of links; images come back as an
//! [`ImageContent`] in the tool result's metadata so the member can put them in the
//! transcript. With `save_screenshots` on, every received image is also written to the logs
//! directory.

use crate::dreamteam::http_client_pool;
use crate::dreamteam::tool_protocol::{
    ToolMetadata, ToolParameter, ToolParameterType, ToolResult, IMAGE_METADATA_KEY,
};
use crate::dreamteam::tool_protocols::CustomToolProtocol;
use crate::dreamteam::transcript::ImageContent;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::json;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Longest page text handed back to the model, in characters.
pub const MAX_PAGE_CHARS: usize = 8_000;
const MAX_LINKS: usize = 20;

#[derive(Debug)]
pub enum WebBrowserError {
    InvalidUrl(String),
    Http { status: u16, url: String },
    Transport(String),
    Io(String),
}

impl fmt::Display for WebBrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebBrowserError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            WebBrowserError::Http { status, url } => write!(f, "HTTP {} from {}", status, url),
            WebBrowserError::Transport(msg) => write!(f, "Request failed: {}", msg),
            WebBrowserError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl Error for WebBrowserError {}

/// What a visit produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PageContent {
    Text {
        url: String,
        title: Option<String>,
        text: String,
        links: Vec<String>,
    },
    Image {
        url: String,
        image: ImageContent,
    },
}

impl PageContent {
    /// Rendering handed back to the model.
    pub fn summary(&self) -> String {
        match self {
            PageContent::Text {
                url,
                title,
                text,
                links,
            } => {
                let mut out = format!("Address: {}\n", url);
                if let Some(title) = title {
                    out.push_str(&format!("Title: {}\n", title));
                }
                out.push('\n');
                out.push_str(text);
                if !links.is_empty() {
                    out.push_str("\n\nLinks:\n");
                    for link in links {
                        out.push_str(&format!("- {}\n", link));
                    }
                }
                out
            }
            PageContent::Image { url, image } => {
                format!("Address: {}\nThe page is an image ({}).", url, image.mime_type)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebBrowser {
    start_page: String,
    logs_dir: PathBuf,
    save_screenshots: bool,
}

impl WebBrowser {
    pub fn new(start_page: impl Into<String>, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            start_page: start_page.into(),
            logs_dir: logs_dir.into(),
            save_screenshots: false,
        }
    }

    pub fn with_save_screenshots(mut self, save: bool) -> Self {
        self.save_screenshots = save;
        self
    }

    pub fn start_page(&self) -> &str {
        &self.start_page
    }

    /// The address to open: `requested` if given, the start page otherwise. Bare hosts get
    /// `https://`.
    fn target(&self, requested: Option<&str>) -> Result<url::Url, WebBrowserError> {
        let raw = requested
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(self.start_page.as_str());
        let candidate = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{}", raw)
        };
        let url =
            url::Url::parse(&candidate).map_err(|e| WebBrowserError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(WebBrowserError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                other
            ))),
        }
    }

    pub async fn visit(&self, requested: Option<&str>) -> Result<PageContent, WebBrowserError> {
        let url = self.target(requested)?;
        log::info!("dreamteam::tools::web_browser: visiting {}", url);

        let response = http_client_pool::get_or_create_client(&http_client_pool::base_url_of(
            url.as_str(),
        ))
        .get(url.clone())
        .send()
        .await
        .map_err(|e| WebBrowserError::Transport(e.to_string()))?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(WebBrowserError::Http {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| WebBrowserError::Transport(e.to_string()))?;

        let page = page_from_body(&final_url, &content_type, &bytes);
        if let PageContent::Image { image, .. } = &page {
            if self.save_screenshots {
                self.save_image(image, &bytes).await?;
            }
        }
        Ok(page)
    }

    /// Write `bytes` to `screenshot_<uuid>.<ext>` under the logs directory.
    pub async fn save_image(
        &self,
        image: &ImageContent,
        bytes: &[u8],
    ) -> Result<PathBuf, WebBrowserError> {
        tokio::fs::create_dir_all(&self.logs_dir)
            .await
            .map_err(|e| WebBrowserError::Io(e.to_string()))?;
        let extension = image
            .mime_type
            .strip_prefix("image/")
            .map(|s| s.split('+').next().unwrap_or(s))
            .unwrap_or("png");
        let path = self.logs_dir.join(format!(
            "screenshot_{}.{}",
            uuid::Uuid::new_v4().simple(),
            extension
        ));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| WebBrowserError::Io(e.to_string()))?;
        log::debug!("dreamteam::tools::web_browser: saved {:?}", path);
        Ok(path)
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Register `visit_url` on `protocol`.
    pub async fn register(&self, protocol: &CustomToolProtocol) {
        let browser = self.clone();
        protocol
            .register_async_tool(
                ToolMetadata::new(
                    "visit_url",
                    format!(
                        "Open a web page and read its text. Without a url, opens {}.",
                        self.start_page
                    ),
                )
                .with_parameter(
                    ToolParameter::new("url", ToolParameterType::String)
                        .with_description("Absolute address of the page to open"),
                ),
                Arc::new(move |params| {
                    let browser = browser.clone();
                    Box::pin(async move {
                        let requested = params["url"].as_str().map(str::to_string);
                        let page = match browser.visit(requested.as_deref()).await {
                            Ok(page) => page,
                            Err(e) => return Ok(ToolResult::failure(e.to_string())),
                        };
                        let mut result = ToolResult::success(json!(page.summary()));
                        if let PageContent::Image { image, .. } = &page {
                            result = result.with_metadata(IMAGE_METADATA_KEY, json!(image));
                        }
                        Ok(result)
                    })
                }),
            )
            .await;
    }
}

/// Interpret a fetched body by its content type.
pub fn page_from_body(url: &str, content_type: &str, body: &[u8]) -> PageContent {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_lowercase();
    if mime.starts_with("image/") {
        return PageContent::Image {
            url: url.to_string(),
            image: ImageContent::from_bytes(mime, body),
        };
    }

    let raw = String::from_utf8_lossy(body);
    let (title, text, links) = if mime.contains("html") || mime.is_empty() {
        let document = Html::parse_document(&raw);
        (
            extract_title(&document),
            visible_text(&document),
            extract_links(&document),
        )
    } else {
        (None, raw.trim().to_string(), Vec::new())
    };
    PageContent::Text {
        url: url.to_string(),
        title,
        text: truncate_chars(&text, MAX_PAGE_CHARS),
        links,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n[... truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

const HIDDEN_ELEMENTS: [&str; 5] = ["head", "script", "style", "noscript", "template"];
const BLOCK_ELEMENTS: [&str; 30] = [
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav",
    "ol", "p", "pre", "section", "table", "tr", "ul",
];

/// Visible text of an HTML document, one line per block element.
pub fn strip_html(html: &str) -> String {
    visible_text(&Html::parse_document(html))
}

fn visible_text(document: &Html) -> String {
    let mut raw = String::new();
    push_visible_text(document.root_element(), &mut raw);
    raw.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_visible_text(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if HIDDEN_ELEMENTS.contains(&name) {
        return;
    }
    let block = BLOCK_ELEMENTS.contains(&name);
    if block {
        out.push('\n');
    }
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            push_visible_text(child_element, out);
        } else if let Node::Text(text) = child.value() {
            out.push_str(text);
        }
    }
    if block {
        out.push('\n');
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let element = document.select(&selector).next()?;
    let title = element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

fn extract_links(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let mut links: Vec<String> = Vec::new();
    for href in document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
    {
        if href.starts_with("http") && !links.iter().any(|l| l == href) {
            links.push(href.to_string());
            if links.len() == MAX_LINKS {
                break;
            }
        }
    }
    links
}
