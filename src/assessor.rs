//! Writing assessment: an optional OpenAI examiner plus a local fallback.
//!
//! Only chat.completions with a strict JSON object response is used. Calls log
//! model name, latency and token usage, never essay contents or the API key.
//! When no key is configured, or the model call fails, the local fallback
//! reports the word count against the task minimum and leaves the band empty.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::Prompts;
use crate::domain::{Modality, Part};
use crate::util::{fill_template, word_count};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AssessError {
  #[error("part {0} is not a writing task")]
  NotWriting(String),
  #[error("essay is empty")]
  EmptyEssay,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssessedBy {
  Model,
  WordCount,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct EssayAssessment {
  pub part_id: String,
  pub band: Option<f32>,
  pub feedback: String,
  pub word_count: usize,
  pub min_words: Option<u32>,
  pub meets_min_words: bool,
  pub assessed_by: AssessedBy,
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string(), model })
  }

  /// JSON-object chat completion. Generic over the target type T.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_json<T: for<'a> Deserialize<'a>>(
    &self,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<T, String> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "ielts-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(format!("OpenAI HTTP {}: {}", status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage {
      info!(target: "ielts_backend", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();

    serde_json::from_str::<T>(&text).map_err(|e| format!("JSON parse error: {}", e))
  }

  async fn examine(&self, prompts: &Prompts, part: &Part, essay: &str) -> Result<(f32, String), String> {
    #[derive(Deserialize)]
    struct Exam { band: f32, feedback: String }

    let min_words = part.min_words.map(|m| m.to_string()).unwrap_or_else(|| "none".into());
    let user = fill_template(
      &prompts.essay_user_template,
      &[
        ("task_title", part.title.as_str()),
        ("task_prompt", part.instructions.as_str()),
        ("min_words", min_words.as_str()),
        ("essay", essay),
      ],
    );
    let e: Exam = self.chat_json(&prompts.essay_system, &user, 0.2).await?;
    Ok((clamp_band(e.band), e.feedback.trim().to_string()))
  }
}

/// Round to the nearest half band within 0..=9.
fn clamp_band(b: f32) -> f32 {
  if !b.is_finite() {
    return 0.0;
  }
  ((b.clamp(0.0, 9.0)) * 2.0).round() / 2.0
}

fn local_assessment(part: &Part, words: usize) -> EssayAssessment {
  let meets = part.min_words.map_or(true, |m| words >= m as usize);
  let feedback = match part.min_words {
    Some(m) if !meets => format!(
      "{words} words written; this task needs at least {m}. Responses under the minimum lose marks for task achievement."
    ),
    Some(m) => format!("{words} words written; the minimum of {m} is met."),
    None => format!("{words} words written."),
  };
  EssayAssessment {
    part_id: part.id.clone(),
    band: None,
    feedback,
    word_count: words,
    min_words: part.min_words,
    meets_min_words: meets,
    assessed_by: AssessedBy::WordCount,
  }
}

/// Assess one writing task. Model failures fall back to the word-count report.
#[instrument(level = "info", skip(ai, prompts, part, essay), fields(part_id = %part.id, essay_len = essay.len(), has_model = ai.is_some()))]
pub async fn assess_essay(
  ai: Option<&OpenAI>,
  prompts: &Prompts,
  part: &Part,
  essay: &str,
) -> Result<EssayAssessment, AssessError> {
  if part.modality != Modality::Writing {
    return Err(AssessError::NotWriting(part.id.clone()));
  }
  let essay = essay.trim();
  if essay.is_empty() {
    return Err(AssessError::EmptyEssay);
  }
  let words = word_count(essay);
  let mut report = local_assessment(part, words);

  let Some(ai) = ai else {
    return Ok(report);
  };

  let start = std::time::Instant::now();
  match ai.examine(prompts, part, essay).await {
    Ok((band, feedback)) => {
      info!(target: "ielts_backend", elapsed = ?start.elapsed(), band, "Essay assessed by model");
      report.band = Some(band);
      if !report.meets_min_words {
        report.feedback = format!("{feedback}\n\n{}", report.feedback);
      } else {
        report.feedback = feedback;
      }
      report.assessed_by = AssessedBy::Model;
    }
    Err(e) => {
      error!(target: "ielts_backend", elapsed = ?start.elapsed(), error = %e, "Essay assessment failed");
      warn!(target: "ielts_backend", "Falling back to word-count assessment");
    }
  }
  Ok(report)
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
