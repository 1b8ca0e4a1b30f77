//! Best-effort comment-thread extraction.
//!
//! Discussion UIs have no shared markup contract, so extraction is an
//! ordered list of strategies tried against the document root with
//! first-non-empty-result-wins semantics. Each strategy is a pure function
//! over the node tree and can be exercised in isolation with synthetic
//! fixtures.

use std::sync::LazyLock;

use regex::Regex;

use super::node::{Element, Selector};

static DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digits regex is valid"));

/// Minimum body length for a subtree to count as a comment.
const MIN_COMMENT_LEN: usize = 10;
/// Prefix length used by the containment de-dup heuristic.
const DEDUP_PREFIX_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub author: Option<String>,
    pub timestamp: Option<String>,
    pub votes: Option<u64>,
    pub content: String,
    pub replies: Vec<Comment>,
}

/// One extraction strategy: root in, comments out (empty = no match).
pub type CommentStrategy = fn(&Element) -> Vec<Comment>;

/// Strategies in descending priority. Platform-specific selectors go
/// first so a generic `*comment*` class on a wrapper does not shadow the
/// real per-comment markup.
pub const STRATEGIES: &[CommentStrategy] = &[
    known_platform_comments,
    generic_class_comments,
];

/// Run the strategy chain; the first strategy that finds anything wins.
pub fn extract_comments(root: &Element) -> Vec<Comment> {
    for strategy in STRATEGIES {
        let found = strategy(root);
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

/// Selectors for sites whose comment markup is known.
fn known_platform_comments(root: &Element) -> Vec<Comment> {
    const PLATFORM_SELECTORS: &[&str] = &[
        "[data-testid*=comment]",
        ".commtext",
        ".js-comment-body",
        ".comment-body",
    ];
    for raw in PLATFORM_SELECTORS {
        let found = collect_for_selector(root, &Selector::parse(raw));
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

/// Generic fallback: anything whose class or id mentions "comment".
fn generic_class_comments(root: &Element) -> Vec<Comment> {
    collect_for_selector(root, &Selector::parse("[class*=comment]"))
}

fn collect_for_selector(root: &Element, selector: &Selector) -> Vec<Comment> {
    let mut comments: Vec<Comment> = Vec::new();
    let matched = root.select(selector);
    // Drop matches nested inside another match; the outermost element is
    // the comment, inner hits are its own markup.
    let top_level: Vec<&Element> = matched
        .iter()
        .filter(|el| {
            !matched
                .iter()
                .any(|other| !std::ptr::eq(*other, **el) && contains(other, el))
        })
        .copied()
        .collect();

    for el in top_level {
        let Some(comment) = build_comment(el, true) else {
            continue;
        };
        if is_duplicate(&comments, &comment.content) {
            continue;
        }
        comments.push(comment);
    }
    comments
}

fn build_comment(el: &Element, with_replies: bool) -> Option<Comment> {
    let content = comment_body(el);
    if content.len() < MIN_COMMENT_LEN {
        return None;
    }
    let replies = if with_replies {
        extract_replies(el)
    } else {
        Vec::new()
    };
    Some(Comment {
        author: extract_author(el),
        timestamp: extract_timestamp(el),
        votes: extract_votes(el),
        content,
        replies,
    })
}

/// Body text: a dedicated text/body child when present, else the whole
/// subtree minus nothing (metadata then rides along, which the de-dup and
/// length checks tolerate).
fn comment_body(el: &Element) -> String {
    const BODY_SELECTORS: &[&str] = &["[class*=text]", "[class*=body]", "[class*=content]", "p"];
    for raw in BODY_SELECTORS {
        if let Some(body) = el.select(&Selector::parse(raw)).into_iter().next() {
            let text = body.text();
            if text.len() >= MIN_COMMENT_LEN {
                return text;
            }
        }
    }
    el.text()
}

fn extract_author(el: &Element) -> Option<String> {
    const AUTHOR_SELECTORS: &[&str] = &[
        "[rel=author]",
        "[class*=author]",
        "[class*=username]",
        "[class*=user]",
        "a[href*=user]",
        "a[href*=profile]",
        "[class*=name]",
    ];
    for raw in AUTHOR_SELECTORS {
        let selector = Selector::parse(raw);
        if let Some(found) = el.select(&selector).into_iter().next() {
            let name = found.text();
            let name = name.trim();
            if !name.is_empty() && name.len() <= 80 {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn extract_timestamp(el: &Element) -> Option<String> {
    if let Some(time) = el.find(&Selector::parse("time")) {
        if let Some(datetime) = time.attr("datetime") {
            return Some(datetime.to_string());
        }
        let text = time.text();
        if !text.is_empty() {
            return Some(text);
        }
    }
    for raw in ["[class*=date]", "[class*=timestamp]", "[class*=ago]"] {
        if let Some(found) = el.select(&Selector::parse(raw)).into_iter().next() {
            let text = found.text();
            if !text.is_empty() && text.len() <= 60 {
                return Some(text);
            }
        }
    }
    None
}

/// First run of digits inside a vote/score-shaped descendant.
fn extract_votes(el: &Element) -> Option<u64> {
    for raw in ["[class*=vote]", "[class*=score]", "[class*=point]", "[class*=karma]"] {
        for found in el.select(&Selector::parse(raw)) {
            let text = found.text();
            if let Some(m) = DIGITS_RE.find(&text) {
                if let Ok(n) = m.as_str().parse() {
                    return Some(n);
                }
            }
        }
    }
    None
}

/// One level of nesting only: reply containers inside a comment yield
/// child comments whose own replies are not descended into.
fn extract_replies(el: &Element) -> Vec<Comment> {
    let Some(container) = el
        .select(&Selector::parse("[class*=repl]"))
        .into_iter()
        .next()
    else {
        return Vec::new();
    };

    let mut replies = Vec::new();
    for child in container.child_elements() {
        if let Some(reply) = build_comment(child, false) {
            if !is_duplicate(&replies, &reply.content) {
                replies.push(reply);
            }
        }
    }
    replies
}

/// Exact match first, then 50-char-prefix containment either way; the
/// first heuristic that fires decides.
fn is_duplicate(existing: &[Comment], content: &str) -> bool {
    existing.iter().any(|c| {
        if c.content == content {
            return true;
        }
        let old_prefix = prefix(&c.content);
        let new_prefix = prefix(content);
        c.content.contains(new_prefix) || content.contains(old_prefix)
    })
}

fn prefix(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(DEDUP_PREFIX_LEN)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..end]
}

fn contains(ancestor: &Element, needle: &Element) -> bool {
    ancestor.descendants().any(|e| std::ptr::eq(e, needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::node::Element;

    fn comment(author: &str, body: &str) -> Element {
        Element::new("div")
            .with_class("comment")
            .with_child(Element::new("span").with_class("author").with_text(author))
            .with_child(Element::new("p").with_class("comment-text").with_text(body))
            .with_child(Element::new("span").with_class("score").with_text("42 points"))
    }

    #[test]
    fn test_generic_extraction_with_metadata() {
        let root = Element::new("body")
            .with_child(comment("alice", "This is the first comment on the page."))
            .with_child(comment("bob", "A different observation entirely, worth keeping."));

        let comments = extract_comments(&root);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].author.as_deref(), Some("alice"));
        assert_eq!(comments[0].votes, Some(42));
        assert!(comments[0].content.contains("first comment"));
    }

    #[test]
    fn test_platform_selector_wins_over_generic() {
        let root = Element::new("body").with_child(
            Element::new("div")
                .with_class("comment")
                .with_child(
                    Element::new("span")
                        .with_class("commtext")
                        .with_text("Platform-specific body, long enough to count."),
                ),
        );
        let comments = extract_comments(&root);
        assert_eq!(comments.len(), 1);
        assert_eq!(
            comments[0].content,
            "Platform-specific body, long enough to count."
        );
    }

    #[test]
    fn test_duplicate_content_is_dropped() {
        let body = "Exactly the same comment body rendered twice by the page.";
        let root = Element::new("body")
            .with_child(comment("alice", body))
            .with_child(comment("mirror", body));
        let comments = extract_comments(&root);
        assert_eq!(comments.len(), 1);
    }

    #[test]
    fn test_prefix_containment_dedup() {
        let long = "A shared fifty-character-plus prefix that identifies this comment, \
                    with extra trailing detail.";
        let quoted = format!("{long} — quoted again inside a collapsed wrapper");
        let root = Element::new("body")
            .with_child(comment("alice", long))
            .with_child(comment("bob", &quoted));
        let comments = extract_comments(&root);
        assert_eq!(comments.len(), 1);
    }

    #[test]
    fn test_replies_one_level_only() {
        let nested_reply = Element::new("div")
            .with_class("comment")
            .with_child(Element::new("p").with_class("comment-text").with_text(
                "Reply body that is long enough to be kept around.",
            ))
            .with_child(
                Element::new("div").with_class("replies").with_child(
                    Element::new("div").with_class("comment").with_child(
                        Element::new("p")
                            .with_class("comment-text")
                            .with_text("A deeper reply that must not be descended into."),
                    ),
                ),
            );
        let root = Element::new("body").with_child(
            Element::new("div")
                .with_class("comment")
                .with_child(
                    Element::new("p")
                        .with_class("comment-text")
                        .with_text("Top level comment body with sufficient length."),
                )
                .with_child(Element::new("div").with_class("replies").with_child(nested_reply)),
        );

        let comments = extract_comments(&root);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].replies.len(), 1);
        assert!(comments[0].replies[0].replies.is_empty());
    }

    #[test]
    fn test_short_fragments_are_ignored() {
        let root = Element::new("body").with_child(
            Element::new("div").with_class("comment").with_text("ok"),
        );
        assert!(extract_comments(&root).is_empty());
    }
}
