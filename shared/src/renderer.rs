//! Static, SEO-oriented HTML pages for generated documents.
//!
//! Markdown is rendered with pulldown-cmark. Fenced `mermaid` blocks are
//! repaired (LLM output often mixes tabs, stray indentation and
//! non-breaking spaces) and emitted as `<div class="mermaid">` for
//! client-side rendering; other code blocks keep a `language-*` class for
//! highlight.js.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dto::{Language, TemplateVersion};
use crate::error::{AppError, Result};
use crate::store::TemplateStore;

const MERMAID_LANG: &str = "mermaid";

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Repair whitespace in a mermaid diagram body.
pub fn normalize_mermaid(src: &str) -> String {
    let cleaned = src
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\t', "    ")
        .replace(['\u{00A0}', '\u{3000}'], " ")
        .replace(['\u{200B}', '\u{FEFF}'], "");

    let lines: Vec<&str> = cleaned.lines().map(str::trim_end).collect();
    let indent = lines
        .iter()
        .filter(|l| !l.is_empty())
        .map(|l| l.len() - l.trim_start_matches(' ').len())
        .min()
        .unwrap_or(0);

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    for line in &lines {
        if line.is_empty() {
            // collapse runs of blank lines, drop leading ones
            if out.last().map_or(true, |l| l.is_empty()) {
                continue;
            }
            out.push("");
        } else {
            out.push(&line[indent..]);
        }
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

fn code_block_html(lang: &str, code: &str) -> String {
    if lang.eq_ignore_ascii_case(MERMAID_LANG) {
        return format!(
            "<div class=\"mermaid\">\n{}\n</div>\n",
            escape_html(&normalize_mermaid(code))
        );
    }
    if lang.is_empty() {
        format!("<pre><code>{}</code></pre>\n", escape_html(code))
    } else {
        format!(
            "<pre><code class=\"language-{}\">{}</code></pre>\n",
            escape_html(lang),
            escape_html(code)
        )
    }
}

/// Render Markdown to an HTML fragment.
pub fn render_markdown(md: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut events: Vec<Event> = Vec::new();
    let mut code: Option<(String, String)> = None;

    for event in Parser::new_ext(md, options) {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().unwrap_or("").to_string()
                    }
                    CodeBlockKind::Indented => String::new(),
                };
                code = Some((lang, String::new()));
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((lang, body)) = code.take() {
                    events.push(Event::Html(CowStr::from(code_block_html(&lang, &body))));
                }
            }
            Event::Text(text) if code.is_some() => {
                if let Some((_, body)) = code.as_mut() {
                    body.push_str(&text);
                }
            }
            other => events.push(other),
        }
    }

    let mut out = String::with_capacity(md.len() * 3 / 2);
    html::push_html(&mut out, events.into_iter());
    out
}

#[derive(Debug, Clone)]
pub struct PageMeta {
    pub title: String,
    pub description: String,
    pub language: Language,
    pub canonical_url: Option<String>,
}

/// First ~160 chars of plain text for the meta description.
fn summarize(md: &str) -> String {
    let text: String = md
        .lines()
        .map(|l| l.trim_start_matches(['#', '>', '-', '*', ' ']))
        .filter(|l| !l.is_empty() && !l.starts_with("```") && !l.starts_with('|'))
        .collect::<Vec<_>>()
        .join(" ");
    text.chars().take(160).collect()
}

/// Wrap a rendered fragment in the standalone page template.
pub fn render_page(meta: &PageMeta, body_html: &str) -> String {
    let canonical = meta
        .canonical_url
        .as_deref()
        .map(|u| format!("\n    <link rel=\"canonical\" href=\"{}\">", escape_html(u)))
        .unwrap_or_default();
    format!(
        r#"<!DOCTYPE html>
<html lang="{lang}">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} | ProductMind AI</title>
    <meta name="description" content="{description}">
    <meta property="og:title" content="{title}">
    <meta property="og:description" content="{description}">
    <meta property="og:type" content="article">{canonical}
    <link rel="stylesheet" href="https://cdnjs.cloudflare.com/ajax/libs/highlight.js/11.9.0/styles/github.min.css">
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'PingFang SC', sans-serif; max-width: 880px; margin: 0 auto; padding: 2rem; line-height: 1.7; color: #1f2937; }}
        h1, h2, h3 {{ color: #111827; line-height: 1.3; }}
        pre {{ background: #f6f8fa; padding: 1rem; overflow-x: auto; border-radius: 6px; }}
        code {{ background: #f6f8fa; padding: 0.2rem 0.4rem; border-radius: 4px; }}
        pre code {{ background: none; padding: 0; }}
        table {{ border-collapse: collapse; width: 100%; }}
        th, td {{ border: 1px solid #e5e7eb; padding: 0.5rem; text-align: left; }}
        .mermaid {{ text-align: center; margin: 1.5rem 0; }}
        footer {{ margin-top: 3rem; color: #6b7280; font-size: 0.875rem; }}
    </style>
</head>
<body>
<article>
{body}
</article>
<footer>Generated with ProductMind AI</footer>
<script src="https://cdnjs.cloudflare.com/ajax/libs/highlight.js/11.9.0/highlight.min.js"></script>
<script src="https://cdn.jsdelivr.net/npm/mermaid@10/dist/mermaid.min.js"></script>
<script>
    hljs.highlightAll();
    mermaid.initialize({{ startOnLoad: true, theme: 'default', securityLevel: 'loose' }});
</script>
</body>
</html>
"#,
        lang = meta.language.html_lang(),
        title = escape_html(&meta.title),
        description = escape_html(&meta.description),
        canonical = canonical,
        body = body_html,
    )
}

/// File name suffix per language; Chinese pages carry none.
fn language_suffix(lang: Language) -> &'static str {
    match lang {
        Language::Zh => "",
        Language::En => "en",
    }
}

pub fn page_path(root: &Path, project_id: Uuid, version_id: Uuid, lang: Language) -> PathBuf {
    root.join(project_id.to_string())
        .join(format!("{}{}.html", version_id, language_suffix(lang)))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishedPages {
    pub version_id: Uuid,
    pub cn_html_path: Option<String>,
    pub en_html_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishSummary {
    pub processed: usize,
    pub published: usize,
    pub failed: usize,
    pub pages: Vec<PublishedPages>,
}

/// Writes pages under `root` and records their paths on the version rows.
pub struct PageGenerator {
    root: PathBuf,
    base_url: Option<String>,
    store: Arc<dyn TemplateStore>,
}

impl PageGenerator {
    pub fn new(root: impl Into<PathBuf>, base_url: Option<String>, store: Arc<dyn TemplateStore>) -> Self {
        Self {
            root: root.into(),
            base_url,
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn meta_for(&self, record: &TemplateVersion, lang: Language) -> Result<PageMeta> {
        let template = self.store.get_template(record.template_id).await?;
        let project = self.store.get_project(record.project_id).await?;
        let title = match (&template, &project) {
            (Some(t), Some(p)) => format!("{} - {}", p.display_name(lang), t.name(lang)),
            (Some(t), None) => t.name(lang).to_string(),
            (None, Some(p)) => p.display_name(lang).to_string(),
            (None, None) => "ProductMind AI".to_string(),
        };
        let canonical_url = self.base_url.as_deref().map(|base| {
            format!(
                "{}/{}/{}{}.html",
                base.trim_end_matches('/'),
                record.project_id,
                record.id,
                language_suffix(lang)
            )
        });
        Ok(PageMeta {
            title,
            description: summarize(record.content_for(lang)),
            language: lang,
            canonical_url,
        })
    }

    /// Render one language of `record` and write it to disk.
    pub async fn generate(&self, record: &TemplateVersion, lang: Language) -> Result<PathBuf> {
        let content = record.content_for(lang);
        if content.trim().is_empty() {
            return Err(AppError::EmptyContent(lang.to_string()));
        }
        let meta = self.meta_for(record, lang).await?;
        let page = render_page(&meta, &render_markdown(content));

        let path = page_path(&self.root, record.project_id, record.id, lang);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, page).await?;
        info!(version_id = %record.id, %lang, path = %path.display(), "page written");
        Ok(path)
    }

    /// Render every language that has content and store the paths on the row.
    pub async fn publish(&self, version_id: Uuid) -> Result<PublishedPages> {
        let record = self
            .store
            .get_version(version_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("template version {version_id}")))?;

        let mut published = PublishedPages {
            version_id,
            ..Default::default()
        };
        let mut failure = None;
        for lang in [Language::Zh, Language::En] {
            if record.content_for(lang).trim().is_empty() {
                continue;
            }
            let path = match self.generate(&record, lang).await {
                Ok(path) => path.display().to_string(),
                Err(e) => {
                    warn!(%version_id, %lang, %e, "page could not be written");
                    failure.get_or_insert(e);
                    continue;
                }
            };
            match lang {
                Language::Zh => published.cn_html_path = Some(path),
                Language::En => published.en_html_path = Some(path),
            }
        }
        if published.cn_html_path.is_none() && published.en_html_path.is_none() {
            return Err(failure.unwrap_or_else(|| AppError::EmptyContent("any".into())));
        }
        // pages already on disk are recorded even when the other language failed
        self.store
            .set_html_paths(
                version_id,
                published.cn_html_path.as_deref(),
                published.en_html_path.as_deref(),
            )
            .await?;
        match failure {
            Some(e) => Err(e),
            None => Ok(published),
        }
    }

    /// Publish active versions that have content but no page yet.
    pub async fn publish_missing(&self, limit: i64) -> Result<PublishSummary> {
        let pending = self.store.versions_missing_html(limit).await?;
        let mut summary = PublishSummary {
            processed: pending.len(),
            ..Default::default()
        };
        for version in pending {
            match self.publish(version.id).await {
                Ok(pages) => {
                    summary.published += 1;
                    summary.pages.push(pages);
                }
                Err(e) => {
                    warn!(version_id = %version.id, %e, "publishing failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mermaid_blocks_are_normalized_and_wrapped() {
        let md = "# Flow\n\n```mermaid\n\t\tgraph TD\n\t\t  A-->B  \n\n\n\t\t  B-->C\n```\n";
        let html = render_markdown(md);
        assert!(html.contains("<h1>Flow</h1>"));
        assert!(html.contains("<div class=\"mermaid\">\ngraph TD\n  A--&gt;B\n\n  B--&gt;C\n</div>"));
        assert!(!html.contains("<pre><code class=\"language-mermaid\""));
    }

    #[test]
    fn other_code_blocks_keep_language_class() {
        let html = render_markdown("```rust\nfn main() {}\n```\n");
        assert!(html.contains("<pre><code class=\"language-rust\">fn main() {}\n</code></pre>"));
    }

    #[test]
    fn normalize_strips_invisible_characters() {
        let src = "\u{FEFF}graph LR\r\n\u{00A0}\u{00A0}A --> B\r\n";
        assert_eq!(normalize_mermaid(src), "graph LR\n  A --> B");
    }

    #[test]
    fn tables_render() {
        let html = render_markdown("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<table>"));
        assert!(html.contains("<td>1</td>"));
    }

    #[test]
    fn page_escapes_metadata() {
        let meta = PageMeta {
            title: "A <b> & B".into(),
            description: "\"quoted\"".into(),
            language: Language::Zh,
            canonical_url: Some("https://example.com/p/v.html".into()),
        };
        let page = render_page(&meta, "<p>x</p>");
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<html lang=\"zh-CN\">"));
        assert!(page.contains("<title>A &lt;b&gt; &amp; B | ProductMind AI</title>"));
        assert!(page.contains("content=\"&quot;quoted&quot;\""));
        assert!(page.contains("<link rel=\"canonical\" href=\"https://example.com/p/v.html\">"));
        assert!(page.contains("<p>x</p>"));
    }

    #[test]
    fn page_paths_use_language_suffix() {
        let project = Uuid::from_u128(1);
        let version = Uuid::from_u128(2);
        let root = Path::new("/srv/pdhtml");
        assert_eq!(
            page_path(root, project, version, Language::Zh),
            root.join(project.to_string()).join(format!("{version}.html"))
        );
        assert_eq!(
            page_path(root, project, version, Language::En),
            root.join(project.to_string()).join(format!("{version}en.html"))
        );
    }

    #[test]
    fn summary_skips_markup() {
        let s = summarize("# Title\n\n```mermaid\ngraph\n```\n- first point\n| a | b |\n");
        assert_eq!(s, "Title graph first point");
    }
}
