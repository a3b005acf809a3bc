//! Text highlighting over passage/question HTML.
//!
//! Highlights are stored as `{id, text, occurrence}` and re-applied to the
//! pristine HTML on every render, so the stored content is never mutated.
//! `occurrence` is the index of the match among all matches of `text` in the
//! pristine text nodes (document order), which keeps repeated phrases apart
//! and stays stable when other highlights are removed.
//!
//! Matching never crosses markup: a selection spanning two text nodes cannot
//! be highlighted. Text inside existing `<mark>`, `<script>` and `<style>`
//! elements is ignored.

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::util::{escape_html, unescape_html, Decoded};

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Highlight {
  pub id: String,
  pub text: String,
  pub occurrence: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HighlightError {
  #[error("highlight text is empty")]
  Empty,
  #[error("occurrence {occurrence} of '{text}' not found")]
  NotFound { text: String, occurrence: usize },
  #[error("selection overlaps highlight {0}")]
  Overlaps(String),
  #[error("unknown highlight: {0}")]
  UnknownId(String),
}

/// Result of re-applying highlights to a rendering.
#[derive(Debug, Serialize)]
pub struct Applied {
  pub html: String,
  pub applied: Vec<String>,
  pub dropped: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct HighlightLayer {
  items: Vec<Highlight>,
}

impl HighlightLayer {
  pub fn items(&self) -> &[Highlight] {
    &self.items
  }

  /// Register a highlight after checking it resolves in `html` and does not
  /// overlap an existing one.
  pub fn add(&mut self, html: &str, text: &str, occurrence: usize) -> Result<Highlight, HighlightError> {
    if text.trim().is_empty() {
      return Err(HighlightError::Empty);
    }
    let nodes = text_nodes(html);
    let (node, start) = locate(&nodes, text, occurrence)
      .ok_or_else(|| HighlightError::NotFound { text: text.to_string(), occurrence })?;
    let end = start + text.len();
    for h in &self.items {
      if let Some((n, s)) = locate(&nodes, &h.text, h.occurrence) {
        if n == node && s < end && start < s + h.text.len() {
          return Err(HighlightError::Overlaps(h.id.clone()));
        }
      }
    }
    let h = Highlight { id: Uuid::new_v4().to_string(), text: text.to_string(), occurrence };
    self.items.push(h.clone());
    Ok(h)
  }

  pub fn remove(&mut self, id: &str) -> Result<Highlight, HighlightError> {
    let pos = self
      .items
      .iter()
      .position(|h| h.id == id)
      .ok_or_else(|| HighlightError::UnknownId(id.to_string()))?;
    Ok(self.items.remove(pos))
  }

  /// Wrap every resolvable highlight in a `<mark>`. Text nodes without a
  /// highlight are emitted byte-for-byte.
  pub fn apply(&self, html: &str) -> Applied {
    let tokens = tokenize(html);
    let mut nodes = text_nodes_from(&tokens);
    let mut applied = Vec::new();
    let mut dropped = Vec::new();

    for h in &self.items {
      let placed = locate(&nodes, &h.text, h.occurrence)
        .map(|(ni, start)| nodes[ni].mark(start, start + h.text.len(), &h.id))
        .unwrap_or(false);
      if placed {
        applied.push(h.id.clone());
      } else {
        warn!(target: "session", id = %h.id, occurrence = h.occurrence, "Highlight could not be re-applied");
        dropped.push(h.id.clone());
      }
    }

    let mut out = String::with_capacity(html.len() + applied.len() * 64);
    let mut next_text = 0usize;
    for t in &tokens {
      match t {
        Token::Markup(raw) => out.push_str(raw),
        Token::Text { raw, skip: true } => out.push_str(raw),
        Token::Text { raw, skip: false } => {
          let node = &nodes[next_text];
          next_text += 1;
          if node.marks.is_empty() {
            out.push_str(raw);
          } else {
            node.write_marked(&mut out);
          }
        }
      }
    }

    Applied { html: out, applied, dropped }
  }
}

#[derive(Debug)]
enum Token<'a> {
  Markup(&'a str),
  Text { raw: &'a str, skip: bool },
}

/// Split HTML into markup (tags, comments) and text runs. Text inside
/// `<mark>`, `<script>` and `<style>` is flagged as skipped.
fn tokenize(html: &str) -> Vec<Token<'_>> {
  let mut tokens = Vec::new();
  let mut skip_depth = 0usize;
  let mut rest = html;

  while !rest.is_empty() {
    if rest.starts_with("<!--") {
      let end = rest.find("-->").map(|i| i + 3).unwrap_or(rest.len());
      tokens.push(Token::Markup(&rest[..end]));
      rest = &rest[end..];
      continue;
    }
    if starts_tag(rest) {
      let end = tag_end(rest);
      let tag = &rest[..end];
      let (name, closing) = tag_name(tag);
      if matches!(name.as_str(), "mark" | "script" | "style") && !tag.ends_with("/>") {
        if closing {
          skip_depth = skip_depth.saturating_sub(1);
        } else {
          skip_depth += 1;
        }
      }
      tokens.push(Token::Markup(tag));
      rest = &rest[end..];
      continue;
    }
    let end = next_tag(rest);
    tokens.push(Token::Text { raw: &rest[..end], skip: skip_depth > 0 });
    rest = &rest[end..];
  }
  tokens
}

/// `<` only opens markup when followed by a tag name, `/` or `!`.
fn starts_tag(s: &str) -> bool {
  let mut chars = s.chars();
  chars.next() == Some('<') && chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
}

/// Offset of the first markup start after position 0 (or the end of `s`).
fn next_tag(s: &str) -> usize {
  s.char_indices()
    .skip(1)
    .find(|(i, c)| *c == '<' && starts_tag(&s[*i..]))
    .map(|(i, _)| i)
    .unwrap_or(s.len())
}

/// End of the tag opening `s`; `>` inside quoted attribute values does not close it.
fn tag_end(s: &str) -> usize {
  let mut quote: Option<char> = None;
  for (i, c) in s.char_indices() {
    match (quote, c) {
      (Some(q), c) if c == q => quote = None,
      (Some(_), _) => {}
      (None, '"' | '\'') => quote = Some(c),
      (None, '>') => return i + 1,
      _ => {}
    }
  }
  s.len()
}

fn tag_name(tag: &str) -> (String, bool) {
  let inner = tag.trim_start_matches('<');
  let (closing, inner) = match inner.strip_prefix('/') {
    Some(s) => (true, s),
    None => (false, inner),
  };
  let name: String = inner
    .chars()
    .take_while(|c| c.is_ascii_alphanumeric())
    .collect::<String>()
    .to_ascii_lowercase();
  (name, closing)
}

#[derive(Debug)]
struct TextNode<'a> {
  raw: &'a str,
  decoded: Decoded,
  // (start, end, id) in decoded offsets, sorted by start, non-overlapping
  marks: Vec<(usize, usize, String)>,
}

impl TextNode<'_> {
  fn text(&self) -> &str {
    &self.decoded.text
  }

  fn mark(&mut self, start: usize, end: usize, id: &str) -> bool {
    if self.marks.iter().any(|(s, e, _)| *s < end && start < *e) {
      return false;
    }
    let at = self.marks.iter().position(|(s, _, _)| *s > start).unwrap_or(self.marks.len());
    self.marks.insert(at, (start, end, id.to_string()));
    true
  }

  /// Splice `<mark>` wrappers into the raw text; the source bytes (entities
  /// included) are copied through unchanged.
  fn write_marked(&self, out: &mut String) {
    let mut cursor = 0usize;
    for (s, e, id) in &self.marks {
      let (rs, re) = (self.decoded.raw_offset(*s), self.decoded.raw_offset(*e));
      out.push_str(&self.raw[cursor..rs]);
      out.push_str("<mark class=\"ielts-highlight\" data-highlight-id=\"");
      out.push_str(&escape_html(id));
      out.push_str("\">");
      out.push_str(&self.raw[rs..re]);
      out.push_str("</mark>");
      cursor = re;
    }
    out.push_str(&self.raw[cursor..]);
  }
}

fn text_nodes_from<'a>(tokens: &[Token<'a>]) -> Vec<TextNode<'a>> {
  tokens
    .iter()
    .filter_map(|t| match t {
      Token::Text { raw, skip: false } => Some(TextNode { raw: *raw, decoded: unescape_html(raw), marks: Vec::new() }),
      _ => None,
    })
    .collect()
}

fn text_nodes(html: &str) -> Vec<TextNode<'_>> {
  text_nodes_from(&tokenize(html))
}

/// Find the `occurrence`-th match of `needle` across text nodes in document
/// order. Returns (node index, byte offset in the decoded text).
fn locate(nodes: &[TextNode], needle: &str, occurrence: usize) -> Option<(usize, usize)> {
  if needle.is_empty() {
    return None;
  }
  let mut seen = 0usize;
  for (ni, node) in nodes.iter().enumerate() {
    for (start, _) in node.text().match_indices(needle) {
      if seen == occurrence {
        return Some((ni, start));
      }
      seen += 1;
    }
  }
  None
}

/// Number of highlightable matches of `text` in `html`.
pub fn count_occurrences(html: &str, text: &str) -> usize {
  if text.is_empty() {
    return 0;
  }
  text_nodes(html).iter().map(|n| n.text().matches(text).count()).sum()
}
