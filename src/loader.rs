//! Corpus discovery and conversion of source files into plain-text documents.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use scraper::{ElementRef, Html, Node};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::LoadError;

/// Extensions the loader understands (lowercase, without the dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "html", "htm"];

/// Default root of the course site; a page stem is appended.
pub const DEFAULT_COURSE_BASE_URL: &str = "https://tds.s-anand.net/#/";
/// Default discourse forum root.
pub const DEFAULT_DISCOURSE_BASE_URL: &str = "https://discourse.onlinedegree.iitm.ac.in";
/// Default directory holding raw discourse thread JSON.
pub const DEFAULT_DISCOURSE_THREADS_DIR: &str = "data/raw_discourse_threads";

/// Plain text of one source file together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Canonical URL, or the file path when no URL can be derived.
    pub source_id: String,
    /// Markup-free text.
    pub text: String,
}

/// Derives a citable source identifier for a corpus file.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    /// Prefix for files under a `course_content` directory.
    pub course_base_url: String,
    /// Forum root for files under a `discourse_posts` directory.
    pub discourse_base_url: String,
    /// Where `{stem}.json` thread descriptors (`slug`, `id`) live.
    pub discourse_threads_dir: PathBuf,
}

impl Default for SourceResolver {
    fn default() -> Self {
        Self {
            course_base_url: DEFAULT_COURSE_BASE_URL.to_string(),
            discourse_base_url: DEFAULT_DISCOURSE_BASE_URL.to_string(),
            discourse_threads_dir: PathBuf::from(DEFAULT_DISCOURSE_THREADS_DIR),
        }
    }
}

#[derive(Deserialize)]
struct ThreadRef {
    slug: String,
    id: u64,
}

impl SourceResolver {
    /// Canonical source for `path`, falling back to the path itself.
    pub fn resolve(&self, path: &Path) -> String {
        let parent = path.parent().and_then(Path::file_name).and_then(OsStr::to_str);
        let stem = path.file_stem().and_then(OsStr::to_str);
        match (parent, stem) {
            (Some("course_content"), Some(stem)) => format!("{}{}", self.course_base_url, stem),
            (Some("discourse_posts"), Some(stem)) => self
                .discourse_url(stem)
                .unwrap_or_else(|| path_string(path)),
            _ => path_string(path),
        }
    }

    fn discourse_url(&self, stem: &str) -> Option<String> {
        let descriptor = self.discourse_threads_dir.join(format!("{stem}.json"));
        let raw = match fs::read(&descriptor) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!("no thread descriptor at {descriptor:?}: {err}");
                return None;
            }
        };
        match serde_json::from_slice::<ThreadRef>(&raw) {
            Ok(thread) => Some(format!(
                "{}/t/{}/{}",
                self.discourse_base_url.trim_end_matches('/'),
                thread.slug,
                thread.id
            )),
            Err(err) => {
                tracing::warn!("malformed thread descriptor {descriptor:?}: {err}");
                None
            }
        }
    }
}

/// Reads supported files and strips their markup.
#[derive(Debug, Clone, Default)]
pub struct SourceLoader {
    resolver: SourceResolver,
}

impl SourceLoader {
    /// Loader using `resolver` for provenance.
    pub fn new(resolver: SourceResolver) -> Self {
        Self { resolver }
    }

    /// Supported files under `root`, in sorted traversal order.
    ///
    /// Entries that cannot be read are logged and left out.
    pub fn discover(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("skipping unreadable entry under {root:?}: {err}");
                    continue;
                }
            };
            if entry.file_type().is_file() && is_supported(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files
    }

    /// Loads one file as a [`Document`].
    pub fn load(&self, path: &Path) -> Result<Document, LoadError> {
        let kind = extension(path).ok_or_else(|| LoadError::Unsupported(path.to_path_buf()))?;
        let raw = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = match kind.as_str() {
            "txt" => raw,
            "md" => markdown_to_text(&raw),
            "html" | "htm" => html_to_text(&raw),
            _ => return Err(LoadError::Unsupported(path.to_path_buf())),
        };
        Ok(Document {
            source_id: self.resolver.resolve(path),
            text,
        })
    }
}

fn extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

fn is_supported(path: &Path) -> bool {
    extension(path).is_some()
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Renders Markdown to HTML and strips the result.
pub fn markdown_to_text(markdown: &str) -> String {
    let parser = pulldown_cmark::Parser::new(markdown);
    let mut html = String::with_capacity(markdown.len() * 3 / 2);
    pulldown_cmark::html::push_html(&mut html, parser);
    html_to_text(&html)
}

/// Text nodes of an HTML document, one per line, skipping non-content elements.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut pieces = Vec::new();
    collect_text(document.root_element(), &mut pieces);
    pieces.join("\n")
}

fn collect_text(element: ElementRef<'_>, pieces: &mut Vec<String>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    pieces.push(trimmed.to_string());
                }
            }
            Node::Element(el) => {
                if matches!(el.name(), "script" | "style" | "noscript" | "template") {
                    continue;
                }
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, pieces);
                }
            }
            _ => {}
        }
    }
}
