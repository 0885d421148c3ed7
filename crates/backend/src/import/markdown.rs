//! Markdown importer - frontmatter, section tree, tags, links, inline fields.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use serde_json::Value;

use super::{DocumentParser, ParseError};
use crate::{
  actor::message::ImportMetadata,
  domain::document::{FORMAT_MARKDOWN, InlineField, Link, ParsedMetadata, Section},
};

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})[ \t]+(.+)$").expect("heading regex"));

static TAG: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?:^|[\s(,])#([\p{L}\p{N}_/-]+)").expect("tag regex"));

static WIKILINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(!?)\[\[([^\[\]]+?)\]\]").expect("wikilink regex"));

static MDLINK: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r#"(!?)\[([^\]]*)\]\(([^)\s]+)(?:\s+"[^"]*")?\)"#).expect("markdown link regex"));

static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`[^`]*`").expect("inline code regex"));

static LINE_FIELD: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^\s*([\p{L}\p{N}_][\p{L}\p{N}_ \-]*?)::\s*(.*?)\s*$").expect("field regex"));

static BRACKET_FIELD: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\[([\p{L}\p{N}_][\p{L}\p{N}_ \-]*?)::\s*([^\]]*?)\s*\]").expect("bracket field regex"));

/// Parser for markdown notes
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownImporter;

impl MarkdownImporter {
  pub fn new() -> Self {
    Self
  }
}

impl DocumentParser for MarkdownImporter {
  fn format(&self) -> &'static str {
    FORMAT_MARKDOWN
  }

  fn parse(&self, _path: &str, content: &str, metadata: &ImportMetadata) -> Result<ParsedMetadata, ParseError> {
    if content.contains('\0') {
      return Err(ParseError::Malformed("content contains NUL bytes".to_string()));
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut parsed = ParsedMetadata::default();

    let body_start = match frontmatter_bounds(&lines) {
      Some((start, end)) => {
        parsed.frontmatter = parse_frontmatter(&lines[start..end], start)?;
        for tag in frontmatter_tags(&parsed.frontmatter) {
          parsed.tags.insert(tag);
        }
        end + 1
      }
      None => 0,
    };

    let mut headings = Vec::new();
    let mut in_fence = false;

    for (line_no, raw) in lines.iter().enumerate().skip(body_start) {
      let trimmed = raw.trim_start();
      if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
        in_fence = !in_fence;
        continue;
      }
      if in_fence {
        continue;
      }

      if let Some(caps) = HEADING.captures(raw) {
        let title = heading_title(&caps[2]);
        if !title.is_empty() {
          headings.push((caps[1].len() as u8, title, line_no));
        }
      }

      let scan = INLINE_CODE.replace_all(raw, "");
      collect_tags(&scan, &mut parsed);
      collect_links(&scan, line_no, &metadata.folder, &mut parsed);

      if metadata.index_inline_fields {
        collect_inline_fields(&scan, line_no, &mut parsed);
      }
    }

    let last_line = lines.len().saturating_sub(1);
    parsed.sections = build_section_tree(headings, last_line);

    Ok(parsed)
  }
}

// ============================================================================
// Frontmatter
// ============================================================================

/// Locate the frontmatter block: returns (first content line, closing fence line).
fn frontmatter_bounds(lines: &[&str]) -> Option<(usize, usize)> {
  if lines.first().map(|l| l.trim_end()) != Some("---") {
    return None;
  }
  lines
    .iter()
    .enumerate()
    .skip(1)
    .find(|(_, l)| matches!(l.trim_end(), "---" | "..."))
    .map(|(end, _)| (1, end))
}

fn parse_frontmatter(lines: &[&str], first_line: usize) -> Result<BTreeMap<String, Value>, ParseError> {
  let mut map = BTreeMap::new();
  let mut list_key: Option<String> = None;

  for (offset, raw) in lines.iter().enumerate() {
    let line_no = first_line + offset;
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
      continue;
    }

    if let Some(item) = trimmed.strip_prefix('-').filter(|_| list_key.is_some()) {
      if let Some(key) = &list_key {
        let entry = map.entry(key.clone()).or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
          *entry = Value::Array(Vec::new());
        }
        if let Value::Array(items) = entry {
          items.push(parse_scalar(item.trim()));
        }
      }
      continue;
    }

    let Some((key, value)) = raw.split_once(':') else {
      return Err(ParseError::Frontmatter {
        line: line_no,
        reason: "expected `key: value`".to_string(),
      });
    };

    if key.trim().is_empty() {
      return Err(ParseError::Frontmatter {
        line: line_no,
        reason: "missing key".to_string(),
      });
    }

    let value = value.trim();
    if key.starts_with(char::is_whitespace) {
      // Nested mappings flatten into one object under the enclosing key.
      if let Some(parent) = &list_key {
        let entry = map.entry(parent.clone()).or_insert(Value::Null);
        if !entry.is_object() {
          *entry = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(fields) = entry
          && !value.is_empty()
        {
          fields.insert(key.trim().to_string(), parse_value(value));
        }
      }
      continue;
    }

    let key = key.trim().to_string();
    if value.is_empty() {
      map.insert(key.clone(), Value::Null);
      list_key = Some(key);
    } else {
      map.insert(key, parse_value(value));
      list_key = None;
    }
  }

  Ok(map)
}

fn parse_value(raw: &str) -> Value {
  if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
    let items = inner
      .split(',')
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(parse_scalar)
      .collect();
    return Value::Array(items);
  }
  parse_scalar(raw)
}

fn parse_scalar(raw: &str) -> Value {
  let raw = raw.trim();
  for quote in ['"', '\''] {
    if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
      return Value::String(raw[1..raw.len() - 1].to_string());
    }
  }

  match raw {
    "true" => return Value::Bool(true),
    "false" => return Value::Bool(false),
    "null" | "~" => return Value::Null,
    _ => {}
  }

  if let Ok(int) = raw.parse::<i64>() {
    return Value::from(int);
  }
  if let Ok(float) = raw.parse::<f64>()
    && let Some(number) = serde_json::Number::from_f64(float)
  {
    return Value::Number(number);
  }

  Value::String(raw.to_string())
}

fn frontmatter_tags(frontmatter: &BTreeMap<String, Value>) -> Vec<String> {
  let mut tags = Vec::new();
  for key in ["tags", "tag"] {
    match frontmatter.get(key) {
      Some(Value::String(s)) => {
        tags.extend(
          s.split([',', ' '])
            .filter_map(normalize_tag),
        );
      }
      Some(Value::Array(items)) => {
        tags.extend(items.iter().filter_map(|v| match v {
          Value::String(s) => normalize_tag(s),
          Value::Number(n) => normalize_tag(&n.to_string()),
          _ => None,
        }));
      }
      _ => {}
    }
  }
  tags
}

fn normalize_tag(raw: &str) -> Option<String> {
  let tag = raw.trim().trim_start_matches('#');
  if tag.is_empty() {
    None
  } else {
    Some(format!("#{}", tag))
  }
}

// ============================================================================
// Body scanning
// ============================================================================

fn heading_title(raw: &str) -> String {
  // Strip an optional closing sequence: "## Title ##"
  let trimmed = raw.trim();
  let without_closing = trimmed.trim_end_matches('#');
  if without_closing.len() != trimmed.len() && without_closing.ends_with([' ', '\t']) {
    without_closing.trim().to_string()
  } else {
    trimmed.to_string()
  }
}

fn collect_tags(line: &str, parsed: &mut ParsedMetadata) {
  for caps in TAG.captures_iter(line) {
    let tag = &caps[1];
    if tag.chars().all(|c| c.is_ascii_digit()) {
      continue;
    }
    if let Some(tag) = normalize_tag(tag) {
      parsed.tags.insert(tag);
    }
  }
}

fn collect_links(line: &str, line_no: usize, folder: &str, parsed: &mut ParsedMetadata) {
  for caps in WIKILINK.captures_iter(line) {
    let embed = !caps[1].is_empty();
    let inner = &caps[2];
    let (target_part, display) = match inner.split_once('|') {
      Some((t, d)) => (t, Some(d.trim().to_string())),
      None => (inner, None),
    };
    let (target, anchor) = split_anchor(target_part);
    if target.is_empty() {
      continue;
    }
    parsed.links.push(Link {
      resolved: resolve_link(folder, target, true),
      target: target.to_string(),
      anchor,
      display,
      embed,
      line: line_no,
    });
  }

  for caps in MDLINK.captures_iter(line) {
    let embed = !caps[1].is_empty();
    let raw_target = &caps[3];
    if is_external(raw_target) {
      continue;
    }
    let decoded = raw_target.replace("%20", " ");
    let (target, anchor) = split_anchor(&decoded);
    if target.is_empty() {
      continue;
    }
    let display = Some(caps[2].trim().to_string()).filter(|d| !d.is_empty());
    parsed.links.push(Link {
      resolved: resolve_link(folder, target, false),
      target: target.to_string(),
      anchor,
      display,
      embed,
      line: line_no,
    });
  }
}

fn collect_inline_fields(line: &str, line_no: usize, parsed: &mut ParsedMetadata) {
  let mut bracketed = false;
  for caps in BRACKET_FIELD.captures_iter(line) {
    bracketed = true;
    parsed.inline_fields.push(InlineField {
      key: caps[1].trim().to_string(),
      value: caps[2].to_string(),
      line: line_no,
    });
  }

  if !bracketed && let Some(caps) = LINE_FIELD.captures(line) {
    parsed.inline_fields.push(InlineField {
      key: caps[1].trim().to_string(),
      value: caps[2].to_string(),
      line: line_no,
    });
  }
}

fn split_anchor(target: &str) -> (&str, Option<String>) {
  match target.split_once('#') {
    Some((t, a)) => (t.trim(), Some(a.trim().to_string()).filter(|a| !a.is_empty())),
    None => (target.trim(), None),
  }
}

fn is_external(target: &str) -> bool {
  target.contains("://") || target.starts_with("mailto:")
}

/// Resolve a link target against the folder of the linking document.
///
/// Wiki links are corpus-relative unless they start with `./` or `../`;
/// markdown links are folder-relative unless they start with `/`.
/// Targets without an extension are assumed to be markdown notes.
fn resolve_link(folder: &str, target: &str, wiki: bool) -> String {
  let relative = target.starts_with("./") || target.starts_with("../");
  let base = if target.starts_with('/') || (wiki && !relative) {
    ""
  } else {
    folder
  };

  let mut segments: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
  for segment in target.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        segments.pop();
      }
      other => segments.push(other),
    }
  }

  let mut resolved = segments.join("/");
  let has_extension = segments
    .last()
    .and_then(|name| name.rsplit_once('.'))
    .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty());
  if !has_extension && !resolved.is_empty() {
    resolved.push_str(".md");
  }
  resolved
}

// ============================================================================
// Sections
// ============================================================================

fn build_section_tree(headings: Vec<(u8, String, usize)>, last_line: usize) -> Vec<Section> {
  fn close(stack: &mut Vec<Section>, roots: &mut Vec<Section>, end_line: usize) {
    if let Some(mut section) = stack.pop() {
      section.end_line = end_line.max(section.start_line);
      match stack.last_mut() {
        Some(parent) => parent.children.push(section),
        None => roots.push(section),
      }
    }
  }

  let mut roots = Vec::new();
  let mut stack: Vec<Section> = Vec::new();

  for (level, title, line) in headings {
    while stack.last().is_some_and(|open| open.level >= level) {
      close(&mut stack, &mut roots, line.saturating_sub(1));
    }
    stack.push(Section {
      title,
      level,
      start_line: line,
      end_line: last_line,
      children: Vec::new(),
    });
  }

  while !stack.is_empty() {
    close(&mut stack, &mut roots, last_line);
  }

  roots
}
