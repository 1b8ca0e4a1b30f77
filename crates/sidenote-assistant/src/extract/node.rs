//! Serialized DOM subtree and selector matching.
//!
//! Content scripts ship the page as a plain JSON tree: text nodes are
//! strings, elements are objects. The selector grammar covers exactly the
//! subset the extraction heuristics need: tag names, `#id`, `.class`,
//! `[attr]`, `[attr=value]` and the substring form `[class*=frag]`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomNode {
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attrs: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DomNode>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(DomNode::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(DomNode::Element(child));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Direct element children, skipping text nodes.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            DomNode::Element(e) => Some(e),
            DomNode::Text(_) => None,
        })
    }

    /// All descendant elements in document (pre-)order, self excluded.
    pub fn descendants(&self) -> Descendants<'_> {
        let mut stack = Vec::new();
        for child in self.children.iter().rev() {
            if let DomNode::Element(e) = child {
                stack.push(e);
            }
        }
        Descendants { stack }
    }

    /// Whitespace-normalized text of this subtree.
    pub fn text(&self) -> String {
        let mut parts = Vec::new();
        collect_text(self, &mut parts);
        parts.join(" ")
    }

    /// Subtree text with line structure preserved (for code blocks).
    pub fn text_raw(&self) -> String {
        let mut out = String::new();
        collect_text_raw(self, &mut out);
        out.trim_end().to_string()
    }

    /// First descendant (or self) matching the selector, document order.
    pub fn find(&self, selector: &Selector) -> Option<&Element> {
        if selector.matches(self) {
            return Some(self);
        }
        self.descendants().find(|e| selector.matches(e))
    }

    /// All descendants (self excluded) matching the selector.
    pub fn select(&self, selector: &Selector) -> Vec<&Element> {
        self.descendants().filter(|e| selector.matches(e)).collect()
    }
}

fn collect_text(el: &Element, parts: &mut Vec<String>) {
    for child in &el.children {
        match child {
            DomNode::Text(t) => {
                let t = normalize_whitespace(t);
                if !t.is_empty() {
                    parts.push(t);
                }
            }
            DomNode::Element(e) => collect_text(e, parts),
        }
    }
}

fn collect_text_raw(el: &Element, out: &mut String) {
    for child in &el.children {
        match child {
            DomNode::Text(t) => out.push_str(t),
            DomNode::Element(e) => {
                if e.tag == "br" {
                    out.push('\n');
                }
                collect_text_raw(e, out);
            }
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let el = self.stack.pop()?;
        for child in el.children.iter().rev() {
            if let DomNode::Element(e) = child {
                self.stack.push(e);
            }
        }
        Some(el)
    }
}

/// One compound selector: every present component must match.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    /// `[class*=frag]`: any class (or the id) contains the fragment.
    class_fragment: Option<String>,
    /// `[name]` or `[name=value]`; `[name*=frag]` for substring values.
    attrs: Vec<AttrMatch>,
}

#[derive(Debug, Clone)]
enum AttrMatch {
    Present(String),
    Equals(String, String),
    Contains(String, String),
}

impl Selector {
    /// Parse the supported selector subset. Unsupported syntax yields a
    /// selector that matches nothing rather than an error; the heuristic
    /// lists this feeds are best-effort by design.
    pub fn parse(input: &str) -> Self {
        let mut sel = Selector::default();
        let mut rest = input.trim();

        let tag_end = rest
            .find(|c| c == '.' || c == '#' || c == '[')
            .unwrap_or(rest.len());
        if tag_end > 0 {
            let tag = &rest[..tag_end];
            if tag != "*" {
                sel.tag = Some(tag.to_ascii_lowercase());
            }
            rest = &rest[tag_end..];
        }

        while !rest.is_empty() {
            let (head, tail) = split_component(rest);
            match head.chars().next() {
                Some('.') => sel.classes.push(head[1..].to_string()),
                Some('#') => sel.id = Some(head[1..].to_string()),
                Some('[') => {
                    let body = head.trim_start_matches('[').trim_end_matches(']');
                    if let Some((name, value)) = body.split_once("*=") {
                        let value = value.trim_matches(|c| c == '"' || c == '\'').to_string();
                        if name == "class" {
                            sel.class_fragment = Some(value);
                        } else {
                            sel.attrs.push(AttrMatch::Contains(name.to_string(), value));
                        }
                    } else if let Some((name, value)) = body.split_once('=') {
                        let value = value.trim_matches(|c| c == '"' || c == '\'').to_string();
                        sel.attrs.push(AttrMatch::Equals(name.to_string(), value));
                    } else {
                        sel.attrs.push(AttrMatch::Present(body.to_string()));
                    }
                }
                _ => break,
            }
            rest = tail;
        }

        sel
    }

    pub fn matches(&self, el: &Element) -> bool {
        if let Some(ref tag) = self.tag {
            if el.tag != *tag {
                return false;
            }
        }
        if let Some(ref id) = self.id {
            if el.id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        for class in &self.classes {
            if !el.classes.iter().any(|c| c == class) {
                return false;
            }
        }
        if let Some(ref frag) = self.class_fragment {
            let frag = frag.to_ascii_lowercase();
            let in_classes = el
                .classes
                .iter()
                .any(|c| c.to_ascii_lowercase().contains(&frag));
            let in_id = el
                .id
                .as_deref()
                .map(|id| id.to_ascii_lowercase().contains(&frag))
                .unwrap_or(false);
            if !in_classes && !in_id {
                return false;
            }
        }
        for attr in &self.attrs {
            let ok = match attr {
                AttrMatch::Present(name) => el.attr(name).is_some(),
                AttrMatch::Equals(name, value) => el.attr(name) == Some(value.as_str()),
                AttrMatch::Contains(name, value) => el
                    .attr(name)
                    .map(|v| v.contains(value.as_str()))
                    .unwrap_or(false),
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

fn split_component(input: &str) -> (&str, &str) {
    debug_assert!(!input.is_empty());
    if input.starts_with('[') {
        match input.find(']') {
            Some(end) => (&input[..=end], &input[end + 1..]),
            None => (input, ""),
        }
    } else {
        let end = input[1..]
            .find(|c| c == '.' || c == '#' || c == '[')
            .map(|i| i + 1)
            .unwrap_or(input.len());
        (&input[..end], &input[end..])
    }
}
