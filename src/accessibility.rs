//! Display settings shared by the test-taking screens: contrast mode and text size.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Contrast {
  #[default]
  Standard,
  High,
  YellowOnBlack,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextSize {
  #[default]
  Standard,
  Large,
  ExtraLarge,
}

impl TextSize {
  pub fn scale(&self) -> f32 {
    match self {
      TextSize::Standard => 1.0,
      TextSize::Large => 1.25,
      TextSize::ExtraLarge => 1.5,
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DisplaySettings {
  #[serde(default)] pub contrast: Contrast,
  #[serde(default)] pub text_size: TextSize,
}

impl DisplaySettings {
  pub fn css_classes(&self) -> Vec<&'static str> {
    let contrast = match self.contrast {
      Contrast::Standard => "contrast-standard",
      Contrast::High => "contrast-high",
      Contrast::YellowOnBlack => "contrast-yellow-on-black",
    };
    let size = match self.text_size {
      TextSize::Standard => "text-standard",
      TextSize::Large => "text-large",
      TextSize::ExtraLarge => "text-extra-large",
    };
    vec![contrast, size]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn settings_default_and_partial_json() {
    let s: DisplaySettings = serde_json::from_str(r#"{"text_size":"extra_large"}"#).unwrap();
    assert_eq!(s.contrast, Contrast::Standard);
    assert_eq!(s.text_size.scale(), 1.5);
    assert_eq!(s.css_classes(), vec!["contrast-standard", "text-extra-large"]);
  }
}
