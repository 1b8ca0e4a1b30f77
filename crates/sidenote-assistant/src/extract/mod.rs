//! Page content extraction.
//!
//! Turns a captured DOM subtree into a markdown-flavoured linearization of
//! the page's visible text (headings, lists, quotes, code fences) plus an
//! appended comments section when a discussion-shaped subtree is found.
//! Extraction never fails hard: a page with no recognizable content root
//! degrades to a placeholder string.

pub mod comments;
pub mod node;

pub use comments::{extract_comments, Comment};
pub use node::{DomNode, Element, Selector};

/// Placeholder content for pages where no content root was found.
pub const EXTRACTION_FAILED: &str = "Could not extract clean content from this page.";

/// Text nodes at or below this length are treated as presentational noise.
const TEXT_NODE_THRESHOLD: usize = 3;

/// Descending-priority content roots. `body` last: a page without even a
/// body is the soft-failure case.
const CONTENT_ROOT_SELECTORS: &[&str] = &[
    "main",
    "[role=main]",
    ".post-content",
    ".article-content",
    ".entry-content",
    ".article-body",
    ".markdown-body",
    "#content",
    ".content",
    "article",
    "body",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub title: String,
    pub content: String,
}

/// Extract a structure-preserving text rendition of the page.
pub fn extract_page(title: &str, document: Option<&DomNode>) -> ExtractedPage {
    let root = match document {
        Some(DomNode::Element(el)) => el,
        Some(DomNode::Text(_)) | None => {
            return ExtractedPage {
                title: title.to_string(),
                content: EXTRACTION_FAILED.to_string(),
            }
        }
    };

    let Some(content_root) = find_content_root(root) else {
        return ExtractedPage {
            title: title.to_string(),
            content: EXTRACTION_FAILED.to_string(),
        };
    };

    let mut lines = Vec::new();
    let mut buffer = Vec::new();
    walk(content_root, &mut lines, &mut buffer);
    flush_buffer(&mut buffer, &mut lines);

    // Comments are searched from the document root, not the content root:
    // discussion threads commonly live outside the article element.
    let comments = extract_comments(root);
    if !comments.is_empty() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(render_comments(&comments));
    }

    let content = lines.join("\n").trim().to_string();
    tracing::debug!(
        title = %title,
        lines = lines.len(),
        comments = comments.len(),
        "page extraction complete"
    );

    ExtractedPage {
        title: title.to_string(),
        content,
    }
}

fn find_content_root(root: &Element) -> Option<&Element> {
    for raw in CONTENT_ROOT_SELECTORS {
        if let Some(el) = root.find(&Selector::parse(raw)) {
            return Some(el);
        }
    }
    None
}

fn walk(el: &Element, lines: &mut Vec<String>, buffer: &mut Vec<String>) {
    for child in &el.children {
        match child {
            DomNode::Text(t) => {
                let t = node::normalize_whitespace(t);
                if t.len() > TEXT_NODE_THRESHOLD {
                    buffer.push(t);
                }
            }
            DomNode::Element(e) => visit_element(e, lines, buffer),
        }
    }
}

fn visit_element(el: &Element, lines: &mut Vec<String>, buffer: &mut Vec<String>) {
    match el.tag.as_str() {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            flush_buffer(buffer, lines);
            let level = el.tag[1..].parse::<usize>().unwrap_or(1);
            let text = el.text();
            if !text.is_empty() {
                lines.push(format!("{} {}", "#".repeat(level), text));
                lines.push(String::new());
            }
        }
        "li" => {
            flush_buffer(buffer, lines);
            let text = el.text();
            if !text.is_empty() {
                lines.push(format!("- {}", text));
            }
        }
        "p" => {
            flush_buffer(buffer, lines);
            let text = el.text();
            if !text.is_empty() {
                lines.push(text);
                lines.push(String::new());
            }
        }
        "blockquote" => {
            flush_buffer(buffer, lines);
            let text = el.text();
            if !text.is_empty() {
                lines.push(format!("> {}", text));
                lines.push(String::new());
            }
        }
        "pre" | "code" => {
            flush_buffer(buffer, lines);
            let text = el.text_raw();
            if !text.is_empty() {
                lines.push("```".to_string());
                lines.push(text);
                lines.push("```".to_string());
                lines.push(String::new());
            }
        }
        // Chrome, scripts and hidden scaffolding carry no page content.
        "script" | "style" | "noscript" | "nav" | "header" | "footer" | "aside" | "svg"
        | "iframe" | "button" | "form" => {}
        _ => walk(el, lines, buffer),
    }
}

fn flush_buffer(buffer: &mut Vec<String>, lines: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    lines.push(buffer.join(" "));
    lines.push(String::new());
    buffer.clear();
}

/// Serialize found comments as a tagged block appended to the content.
fn render_comments(comments: &[Comment]) -> String {
    let mut out = String::from("<comments-section>\n");
    for comment in comments {
        render_comment(comment, &mut out);
    }
    out.push_str("</comments-section>");
    out
}

fn render_comment(comment: &Comment, out: &mut String) {
    out.push_str("<user-comment");
    if let Some(ref author) = comment.author {
        out.push_str(&format!(" author=\"{}\"", author));
    }
    if let Some(ref timestamp) = comment.timestamp {
        out.push_str(&format!(" timestamp=\"{}\"", timestamp));
    }
    if let Some(votes) = comment.votes {
        out.push_str(&format!(" votes=\"{}\"", votes));
    }
    out.push_str(">\n");
    out.push_str(&comment.content);
    out.push('\n');
    if !comment.replies.is_empty() {
        out.push_str("<replies>\n");
        for reply in &comment.replies {
            render_comment(reply, out);
        }
        out.push_str("</replies>\n");
    }
    out.push_str("</user-comment>\n");
}
