//! Loading service configuration from TOML.
//!
//! `IELTS_CONFIG_PATH` points at the file. Every field has a default, so a
//! missing or broken file just means defaults (the error is logged).

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
  #[serde(default)]
  pub server: ServerCfg,
  #[serde(default)]
  pub uploads: UploadCfg,
  #[serde(default)]
  pub pagination: PaginationCfg,
  #[serde(default)]
  pub session: SessionCfg,
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default = "default_true")]
  pub seed_demo_content: bool,
}

fn default_true() -> bool { true }

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      server: ServerCfg::default(),
      uploads: UploadCfg::default(),
      pagination: PaginationCfg::default(),
      session: SessionCfg::default(),
      prompts: Prompts::default(),
      seed_demo_content: true,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerCfg {
  pub port: u16,
  pub static_dir: String,
}

impl Default for ServerCfg {
  fn default() -> Self {
    Self { port: 3000, static_dir: "./static".into() }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UploadCfg {
  pub dir: String,
  /// Prefix of the URLs handed back to the authoring forms.
  pub public_base_url: String,
  pub max_audio_bytes: u64,
  pub max_image_bytes: u64,
  pub max_transcript_bytes: u64,
}

impl Default for UploadCfg {
  fn default() -> Self {
    Self {
      dir: "./uploads".into(),
      public_base_url: "/files".into(),
      max_audio_bytes: 100 * 1024 * 1024,
      max_image_bytes: 10 * 1024 * 1024,
      max_transcript_bytes: 10 * 1024 * 1024,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PaginationCfg {
  pub page_size: usize,
  pub max_page_size: usize,
}

impl Default for PaginationCfg {
  fn default() -> Self {
    Self { page_size: 10, max_page_size: 100 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionCfg {
  /// Vertical offset applied when scrolling to a question (sticky header).
  pub scroll_offset_px: i32,
  pub default_reading_minutes: u32,
  pub default_writing_minutes: u32,
  /// Review/transfer time after the recording ends.
  pub listening_review_minutes: u32,
  /// Sessions untouched for this long are evicted.
  pub idle_ttl_minutes: u64,
  /// Submitted sessions stay readable for this long after their last use.
  pub submitted_ttl_minutes: u64,
  /// How often the eviction sweep runs.
  pub sweep_interval_secs: u64,
  /// Newest submissions kept in memory.
  pub max_submissions: usize,
}

impl Default for SessionCfg {
  fn default() -> Self {
    Self {
      scroll_offset_px: -120,
      default_reading_minutes: 60,
      default_writing_minutes: 60,
      listening_review_minutes: 10,
      idle_ttl_minutes: 6 * 60,
      submitted_ttl_minutes: 30,
      sweep_interval_secs: 60,
      max_submissions: 1000,
    }
  }
}

/// Prompts used by the writing assessor. Override in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub essay_system: String,
  pub essay_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      essay_system: "You are an experienced IELTS Writing examiner. Respond ONLY with strict JSON.".into(),
      essay_user_template: "Task ({task_title}):\n{task_prompt}\n\nMinimum words: {min_words}\n\nCandidate response:\n{essay}\n\nReturn JSON {\"band\": number, \"feedback\": string}. Band 0-9 in steps of 0.5, judged on Task Achievement, Coherence and Cohesion, Lexical Resource, Grammatical Range and Accuracy. Keep feedback under 120 words.".into(),
    }
  }
}

impl AppConfig {
  /// Load from IELTS_CONFIG_PATH (if set) and apply the PORT override.
  pub fn from_env() -> Self {
    let mut cfg = load_config_from_env().unwrap_or_default();
    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
      cfg.server.port = port;
    }
    cfg
  }
}

/// Attempt to load `AppConfig` from IELTS_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("IELTS_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AppConfig>(&s) {
      Ok(cfg) => {
        info!(target: "ielts_backend", %path, "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "ielts_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "ielts_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
