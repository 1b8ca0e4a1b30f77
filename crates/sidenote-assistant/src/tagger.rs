//! Semantic tagging of extracted page text.
//!
//! Wraps line-oriented content in structural markers (heading, list,
//! quote, code-block, ...) so the completion backend sees document
//! structure instead of a flat wall of text. The output is advisory, a
//! prompt-engineering aid rather than a grammar; there is no parse-back
//! path.

use std::sync::LazyLock;

use regex::Regex;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*)$").expect("heading regex is valid"));
static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+]|\d+\.)\s+(.*)$").expect("list regex is valid"));
static METADATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w ./-]{1,40}:\s+\S").expect("metadata regex is valid"));

/// Plain-text runs longer than this flush as `<content-section>`.
const CONTENT_SECTION_THRESHOLD: usize = 200;

/// Tag `content` line by line, prepending a `<page-title>` block when a
/// title is supplied. Pure: identical input always yields identical
/// output.
pub fn tag(content: &str, title: &str) -> String {
    let mut tagger = Tagger::default();

    if !title.trim().is_empty() {
        tagger.emit(format!("<page-title>{}</page-title>", title.trim()));
    }

    for line in content.lines() {
        tagger.line(line);
    }
    tagger.finish()
}

/// Single-pass line classifier. State is exactly what the format needs:
/// the pending plain-text buffer, fenced-code mode, and whether a list
/// block is open.
#[derive(Default)]
struct Tagger {
    blocks: Vec<String>,
    buffer: Vec<String>,
    code_lines: Vec<String>,
    in_code_block: bool,
    in_list: bool,
}

impl Tagger {
    fn line(&mut self, raw: &str) {
        let line = raw.trim();

        if self.in_code_block {
            if line.starts_with("```") {
                self.in_code_block = false;
                let body = self.code_lines.join("\n");
                self.code_lines.clear();
                self.emit(format!("<code-block>\n{}\n</code-block>", body));
            } else {
                self.code_lines.push(raw.trim_end().to_string());
            }
            return;
        }

        if line.is_empty() {
            // Separator only: flush the running buffer, keep any open list.
            self.flush_buffer();
            return;
        }

        if line.starts_with("```") {
            self.flush_buffer();
            self.close_list();
            self.in_code_block = true;
            return;
        }

        if let Some(caps) = HEADING_RE.captures(line) {
            self.flush_buffer();
            self.close_list();
            let level = caps[1].len();
            self.emit(format!(
                "<heading level=\"{}\">{}</heading>",
                level,
                caps[2].trim()
            ));
            return;
        }

        if let Some(caps) = LIST_ITEM_RE.captures(line) {
            self.flush_buffer();
            if !self.in_list {
                self.blocks.push("<list>".to_string());
                self.in_list = true;
            }
            self.blocks
                .push(format!("<list-item>{}</list-item>", caps[1].trim()));
            return;
        }

        // Any other line closes an open list.
        self.close_list();

        if is_comment_like(line) {
            self.flush_buffer();
            self.emit(format!("<code-comment>{}</code-comment>", line));
            return;
        }

        if let Some(quoted) = line.strip_prefix('>') {
            self.flush_buffer();
            self.emit(format!("<quote>{}</quote>", quoted.trim()));
            return;
        }

        if is_table_row(line) {
            self.flush_buffer();
            self.emit(format!("<table-row>{}</table-row>", line));
            return;
        }

        self.buffer.push(line.to_string());
    }

    fn finish(mut self) -> String {
        if self.in_code_block && !self.code_lines.is_empty() {
            // Unterminated fence: keep what was captured.
            let body = self.code_lines.join("\n");
            self.emit(format!("<code-block>\n{}\n</code-block>", body));
        }
        self.flush_buffer();
        self.close_list();
        self.blocks.join("\n")
    }

    /// Classify and emit the pending plain-text run.
    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = self.buffer.join(" ");
        self.buffer.clear();

        let block = if text.len() > CONTENT_SECTION_THRESHOLD {
            format!("<content-section>{}</content-section>", text)
        } else if looks_like_metadata(&text) {
            format!("<metadata>{}</metadata>", text)
        } else {
            format!("<text>{}</text>", text)
        };
        self.emit(block);
    }

    fn close_list(&mut self) {
        if self.in_list {
            self.blocks.push("</list>".to_string());
            self.in_list = false;
        }
    }

    fn emit(&mut self, block: String) {
        self.blocks.push(block);
    }
}

fn is_comment_like(line: &str) -> bool {
    line.starts_with("<!--")
        || line.starts_with("//")
        || line.starts_with("/*")
        // A `#` that is not a markdown heading (no space after the run).
        || (line.starts_with('#') && !HEADING_RE.is_match(line))
}

fn is_table_row(line: &str) -> bool {
    if !line.contains('|') {
        return false;
    }
    let segments = line
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .count();
    segments >= 3
}

fn looks_like_metadata(text: &str) -> bool {
    METADATA_RE.is_match(text) || text.contains('=')
}
