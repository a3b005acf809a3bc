//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Whitespace-delimited word count, as shown under the essay box.
pub fn word_count(text: &str) -> usize {
  text.split_whitespace().count()
}

/// Escape text for inclusion in HTML text or attribute context.
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

/// Text with HTML entities decoded, plus where each decoded byte came from in
/// the raw input. `raw_at` has one entry per decoded byte and a final entry
/// equal to the raw length, so any decoded char boundary maps to a raw one.
#[derive(Debug)]
pub struct Decoded {
  pub text: String,
  pub raw_at: Vec<usize>,
}

impl Decoded {
  pub fn raw_offset(&self, decoded: usize) -> usize {
    self.raw_at[decoded.min(self.raw_at.len() - 1)]
  }
}

fn decode_entity(ent: &str) -> Option<char> {
  match ent {
    "amp" => Some('&'),
    "lt" => Some('<'),
    "gt" => Some('>'),
    "quot" => Some('"'),
    "apos" => Some('\''),
    "nbsp" => Some('\u{00A0}'),
    _ => {
      let num = ent.strip_prefix('#')?;
      let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => num.parse::<u32>().ok()?,
      };
      char::from_u32(code)
    }
  }
}

/// Decode the entities authoring tools emit into passage HTML (the basic
/// named ones plus decimal and hex references). Unknown entities are kept
/// verbatim.
pub fn unescape_html(s: &str) -> Decoded {
  let mut text = String::with_capacity(s.len());
  let mut raw_at = Vec::with_capacity(s.len() + 1);
  let mut i = 0usize;
  while i < s.len() {
    let tail = &s[i..];
    let entity = tail
      .strip_prefix('&')
      .and_then(|t| t.find(';').filter(|end| *end <= 32).map(|end| (&t[..end], end + 2)))
      .and_then(|(ent, consumed)| decode_entity(ent).map(|c| (c, consumed)));
    let (ch, consumed) = match entity {
      Some(found) => found,
      None => match tail.chars().next() {
        Some(c) => (c, c.len_utf8()),
        None => break,
      },
    };
    text.push(ch);
    raw_at.extend(std::iter::repeat(i).take(ch.len_utf8()));
    i += consumed;
  }
  raw_at.push(s.len());
  Decoded { text, raw_at }
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) { cut -= 1; }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_template_replaces_all_keys() {
    let out = fill_template("Task: {task}\nMin: {min}", &[("task", "Describe"), ("min", "150")]);
    assert_eq!(out, "Task: Describe\nMin: 150");
  }

  #[test]
  fn word_count_ignores_repeated_whitespace() {
    assert_eq!(word_count("  The chart   shows\n two trends. "), 5);
    assert_eq!(word_count(""), 0);
  }

  #[test]
  fn escape_then_unescape_is_identity() {
    let s = r#"Tom & "Jerry" <3 'cheese'"#;
    assert_eq!(unescape_html(&escape_html(s)).text, s);
  }

  #[test]
  fn unescape_keeps_unknown_entities() {
    assert_eq!(unescape_html("a &bogus; b &#65;").text, "a &bogus; b A");
    assert_eq!(unescape_html("fish & chips").text, "fish & chips");
    assert_eq!(unescape_html("x &#x2014; y").text, "x \u{2014} y");
  }

  #[test]
  fn decoded_offsets_point_into_raw() {
    let d = unescape_html("Caf&eacute; &#x2014; bees");
    let at = d.text.find("bees").unwrap();
    assert_eq!(d.raw_offset(at), "Caf&eacute; &#x2014; ".len());
    assert_eq!(d.raw_offset(d.text.len()), "Caf&eacute; &#x2014; bees".len());
    // the em dash is one decoded char that spans the whole reference
    let dash = d.text.find('\u{2014}').unwrap();
    assert_eq!(d.raw_offset(dash), "Caf&eacute; ".len());
    assert_eq!(d.raw_offset(dash + '\u{2014}'.len_utf8()), "Caf&eacute; &#x2014;".len());
  }

  #[test]
  fn trunc_for_log_respects_char_boundaries() {
    let s = "ééééé";
    let t = trunc_for_log(s, 3);
    assert!(t.starts_with('é'));
    assert!(t.contains("10 bytes total"));
  }
}
