//! Document loader: a local directory tree and a list of URLs.
//!
//! Files are selected with `include_globs` / `exclude_globs` relative to
//! `loader.root`; `.git`, `target`, and `node_modules` are always
//! excluded. PDF and DOCX files are run through [`crate::extract`]. URLs
//! are fetched over HTTP and HTML pages are reduced to their visible text.
//!
//! A file or URL that cannot be read is reported as a
//! [`RagError::Ingest`] and the rest of the set still loads.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ragchat_core::models::Document;
use ragchat_core::RagError;
use walkdir::WalkDir;

use crate::config::LoaderConfig;
use crate::extract::{binary_content_type, extract_text};

/// URLs fetched at once. Results keep the configured order.
const URL_CONCURRENCY: usize = 4;

/// Documents that loaded, plus the sources that failed.
#[derive(Debug, Default)]
pub struct Loaded {
    pub documents: Vec<Document>,
    pub failures: Vec<RagError>,
}

/// Load every configured source.
///
/// # Errors
///
/// `InvalidConfig` when no source is configured or nothing loads; an error
/// when `root` does not exist or a glob is invalid.
pub async fn load_documents(config: &LoaderConfig) -> Result<Loaded> {
    if config.root.is_none() && config.urls.is_empty() {
        return Err(RagError::InvalidConfig(
            "no document sources configured: set loader.root or loader.urls".to_string(),
        )
        .into());
    }

    let mut loaded = Loaded::default();
    if let Some(root) = &config.root {
        let files = scan_directory(root, config)?;
        loaded.documents.extend(files.documents);
        loaded.failures.extend(files.failures);
    }
    if !config.urls.is_empty() {
        let pages = fetch_urls(&config.urls, config.timeout_secs).await?;
        loaded.documents.extend(pages.documents);
        loaded.failures.extend(pages.failures);
    }

    if loaded.documents.is_empty() {
        return Err(RagError::InvalidConfig("no documents found".to_string()).into());
    }

    tracing::info!(
        documents = loaded.documents.len(),
        failed = loaded.failures.len(),
        "loaded documents"
    );
    Ok(loaded)
}

pub fn scan_directory(root: &Path, config: &LoaderConfig) -> Result<Loaded> {
    if !root.exists() {
        bail!("loader.root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut loaded = Loaded::default();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Dangling symlinks, loops, and unreadable directories.
                let source = e
                    .path()
                    .map(|p| relative_source(root, p))
                    .unwrap_or_else(|| root.display().to_string());
                if exclude_set.is_match(&source) {
                    continue;
                }
                tracing::warn!(source = %source, error = %e, "skipping unreadable entry");
                loaded.failures.push(RagError::ingest(source, e));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = relative_source(root, path);

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match read_file(path) {
            Ok(text) => {
                let title = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                loaded.documents.push(
                    Document::new(rel_str, text)
                        .with_metadata("source_type", "file")
                        .with_metadata("title", title),
                );
            }
            Err(e) => {
                tracing::warn!(source = %rel_str, error = %e, "skipping unreadable file");
                loaded.failures.push(RagError::ingest(rel_str, e));
            }
        }
    }

    // Sort for deterministic ordering
    loaded.documents.sort_by(|a, b| a.source.cmp(&b.source));

    Ok(loaded)
}

/// `path` relative to `root`, with forward slashes.
fn relative_source(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}

fn read_file(path: &Path) -> Result<String> {
    match binary_content_type(path) {
        Some(content_type) => {
            let bytes = std::fs::read(path)?;
            Ok(extract_text(&bytes, content_type)?)
        }
        None => std::fs::read_to_string(path).context("not valid UTF-8 text"),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

async fn fetch_urls(urls: &[String], timeout_secs: u64) -> Result<Loaded> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;

    let results: Vec<(&String, Result<Document>)> = stream::iter(urls)
        .map(|url| {
            let client = &client;
            async move { (url, fetch_url(client, url).await) }
        })
        .buffered(URL_CONCURRENCY)
        .collect()
        .await;

    let mut loaded = Loaded::default();
    for (url, result) in results {
        match result {
            Ok(doc) => loaded.documents.push(doc),
            Err(e) => {
                tracing::warn!(source = %url, error = %e, "skipping URL");
                loaded.failures.push(RagError::ingest(url.as_str(), e));
            }
        }
    }
    Ok(loaded)
}

async fn fetch_url(client: &reqwest::Client, url: &str) -> Result<Document> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        bail!("HTTP {}", status);
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/plain")
        .to_ascii_lowercase();

    let doc = if content_type.starts_with(crate::extract::MIME_PDF) {
        let bytes = response.bytes().await?;
        Document::new(url, extract_text(&bytes, crate::extract::MIME_PDF)?)
    } else {
        let body = response.text().await?;
        if content_type.contains("html") || looks_like_html(&body) {
            let mut doc = Document::new(url, html_to_text(&body));
            if let Some(title) = html_title(&body) {
                doc = doc.with_metadata("title", title);
            }
            doc
        } else {
            Document::new(url, body)
        }
    };
    Ok(doc.with_metadata("source_type", "url"))
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(64).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

fn html_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<title")?;
    let open_end = start + lower[start..].find('>')? + 1;
    let close = open_end + lower[open_end..].find("</title")?;
    let title = decode_entities(html[open_end..close].trim());
    (!title.is_empty()).then_some(title)
}

/// Elements whose content is never visible text.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "head", "template"];
/// Elements that start a new line of text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "table",
    "section", "article", "header", "footer", "pre", "blockquote",
];

/// Reduce an HTML page to its visible text, one block per paragraph.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut skip_until: Option<String> = None;
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        if skip_until.is_none() {
            out.push_str(&rest[..lt]);
        }
        let after = &rest[lt + 1..];
        let Some(gt) = after.find('>') else {
            rest = "";
            break;
        };
        let tag = &after[..gt];
        rest = &after[gt + 1..];

        if tag.starts_with("!--") {
            // Comments may contain '>'; skip to the real terminator.
            if let Some(end) = rest.find("-->").filter(|_| !tag.ends_with("--")) {
                rest = &rest[end + 3..];
            }
            continue;
        }

        let closing = tag.starts_with('/');
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        if let Some(skipping) = &skip_until {
            if closing && *skipping == name {
                skip_until = None;
            }
            continue;
        }
        if !closing && SKIPPED_ELEMENTS.contains(&name.as_str()) && !tag.ends_with('/') {
            skip_until = Some(name);
            continue;
        }
        if BLOCK_ELEMENTS.contains(&name.as_str()) {
            out.push('\n');
        }
    }
    if skip_until.is_none() {
        out.push_str(rest);
    }

    let text = decode_entities(&out);
    let mut paragraphs: Vec<String> = Vec::new();
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            paragraphs.push(collapsed);
        }
    }
    paragraphs.join("\n\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(root: &Path) -> LoaderConfig {
        LoaderConfig {
            root: Some(root.to_path_buf()),
            ..LoaderConfig::default()
        }
    }

    #[test]
    fn test_html_to_text_drops_markup_and_scripts() {
        let html = r#"<!DOCTYPE html><html><head><title>Guide</title>
<style>p { color: red; }</style></head>
<body><h1>Install</h1><p>Run <code>make</code> &amp; wait.</p>
<script>var x = "<p>hidden</p>";</script><!-- note --><p>Done</p></body></html>"#;
        assert_eq!(html_to_text(html), "Install\n\nRun make & wait.\n\nDone");
        assert_eq!(html_title(html).as_deref(), Some("Guide"));
    }

    #[test]
    fn test_scan_directory_applies_globs_and_default_excludes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("guide")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("guide/b.md"), "# B").unwrap();
        std::fs::write(root.join("a.txt"), "A").unwrap();
        std::fs::write(root.join("skip.rs"), "fn main() {}").unwrap();
        std::fs::write(root.join("node_modules/pkg/readme.md"), "dep").unwrap();

        let loaded = scan_directory(root, &loader(root)).unwrap();
        let sources: Vec<&str> = loaded.documents.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["a.txt", "guide/b.md"]);
        assert_eq!(loaded.documents[1].metadata["title"], "b.md");
        assert!(loaded.failures.is_empty());
    }

    #[test]
    fn test_unreadable_file_is_reported_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("good.md"), "fine").unwrap();
        std::fs::write(root.join("bad.md"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let loaded = scan_directory(root, &loader(root)).unwrap();
        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.failures.len(), 1);
        assert!(loaded.failures[0].to_string().contains("bad.md"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_reported_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("good.md"), "fine").unwrap();
        std::os::unix::fs::symlink(root.join("missing.md"), root.join("broken.md")).unwrap();

        let cfg = LoaderConfig {
            follow_symlinks: true,
            ..loader(root)
        };
        let loaded = scan_directory(root, &cfg).unwrap();
        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.documents[0].source, "good.md");
        assert_eq!(loaded.failures.len(), 1);
        assert!(loaded.failures[0].to_string().contains("broken.md"));
    }

    #[tokio::test]
    async fn test_no_documents_is_invalid_config() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_documents(&loader(tmp.path())).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::InvalidConfig(_))
        ));

        let err = load_documents(&LoaderConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("no document sources"));
    }
}
