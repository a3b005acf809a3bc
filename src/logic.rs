//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Starting sessions (timer length, audio, mode) from a section outline
//!   - Applying runner events and recording submissions
//!   - Rendering a part with highlights and question groups
//!   - Highlights, display settings, reports and writing assessment

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::accessibility::DisplaySettings;
use crate::assessor::{assess_essay, AssessError, EssayAssessment};
use crate::config::SessionCfg;
use crate::domain::{Modality, Part, QuestionGroup, Test, TestMode};
use crate::error::ApiError;
use crate::grading::{grade, GradeReport};
use crate::highlight::{count_occurrences, Highlight, HighlightError};
use crate::pagination::{paginate, Page};
use crate::protocol::{
  AssessIn, HighlightIn, PartView, ReportOut, SessionOut, SettingsOut, StartSessionIn, TestListQuery,
};
use crate::questions::render_group;
use crate::session::{Phase, Session, SessionConfig, SessionEffect, SessionEvent, SessionSnapshot};
use crate::state::AppState;
use crate::store::{StoreError, TestFilter};
use crate::submission::Submission;
use crate::util::{trunc_for_log, word_count};

/// Highlight layer key: `part:<id>` for a part's passage, `group:<id>` for
/// the text of one question group (notes, summaries, tables).
pub fn panel_key(part_id: &str, group_id: Option<&str>) -> String {
  match group_id {
    Some(g) => format!("group:{g}"),
    None => format!("part:{part_id}"),
  }
}

/// Section timer in seconds. Reading and writing use the sum of part limits
/// (config default when none are set); listening gets the review window.
pub fn timer_seconds(cfg: &SessionCfg, modality: Modality, parts: &[Part]) -> u32 {
  let minutes = match modality {
    Modality::Listening => cfg.listening_review_minutes,
    Modality::Reading | Modality::Writing => {
      let sum: u32 = parts.iter().map(|p| p.time_limit_minutes).sum();
      match (sum, modality) {
        (0, Modality::Reading) => cfg.default_reading_minutes,
        (0, _) => cfg.default_writing_minutes,
        (s, _) => s,
      }
    }
  };
  minutes.saturating_mul(60)
}

#[instrument(level = "info", skip(state, q))]
pub async fn list_tests(state: &AppState, q: TestListQuery) -> Page<Test> {
  let filter = TestFilter { status: q.status, mode: q.mode, category: q.category, q: q.q };
  let tests = state.store.list_tests(&filter).await;
  let cfg = &state.config.pagination;
  paginate(&tests, q.page.unwrap_or(1), q.page_size.unwrap_or(cfg.page_size), cfg.max_page_size)
}

#[instrument(level = "info", skip(state, input), fields(section_id = %input.section_id))]
pub async fn start_session(state: &AppState, input: StartSessionIn) -> Result<SessionOut, ApiError> {
  let outline = state.store.outline(&input.section_id).await?;
  let modality = outline.section.modality;
  let mode = input
    .mode
    .or_else(|| outline.test.as_ref().map(|t| t.mode))
    .unwrap_or(TestMode::Practice);
  // one recording per part, played in part order
  let audio_urls: Vec<String> = if modality == Modality::Listening {
    outline.parts.iter().filter_map(|p| p.audio_url.clone()).collect()
  } else {
    Vec::new()
  };
  if modality == Modality::Listening && audio_urls.is_empty() {
    warn!(target: "session", section_id = %input.section_id, "Listening section has no audio; review timer starts immediately");
  }

  let cfg = SessionConfig {
    test_id: outline.section.test_id.clone(),
    section_id: outline.section.id.clone(),
    modality,
    mode,
    timer_seconds: timer_seconds(&state.config.session, modality, &outline.parts),
    audio_urls,
    scroll_offset_px: state.config.session.scroll_offset_px,
  };
  let (session, effects) = Session::open(Uuid::new_v4().to_string(), outline.outline, cfg);
  let snapshot = session.snapshot();
  state.insert_session(session).await;
  Ok(SessionOut { session: snapshot, effects })
}

pub async fn session_snapshot(state: &AppState, id: &str) -> Result<SessionSnapshot, ApiError> {
  state.with_session(id, |s| Ok(s.snapshot())).await
}

/// Apply one event. When it ends the session the submission is graded and
/// recorded; the grade report is returned alongside.
#[instrument(level = "debug", skip(state, event), fields(%id))]
pub async fn apply_event(
  state: &AppState,
  id: &str,
  event: SessionEvent,
) -> Result<(SessionOut, Option<GradeReport>), ApiError> {
  let (effects, snapshot, finished) = state
    .with_session(id, |s| {
      let effects = s.apply(event)?;
      let finished = effects.iter().find_map(|e| match e {
        SessionEffect::Submitted { reason } => Some(Submission {
          session_id: s.id.clone(),
          test_id: s.test_id.clone(),
          section_id: s.section_id.clone(),
          reason: *reason,
          answers: s.answers().clone(),
          essays: s.essays().clone(),
          report: None,
        }),
        _ => None,
      });
      Ok((effects, s.snapshot(), finished))
    })
    .await?;

  let mut report = None;
  if let Some(mut sub) = finished {
    report = grade_section(state, snapshot.modality, &sub.section_id, &sub.answers).await;
    sub.report = report.clone();
    state.submissions.record(sub).await;
  }
  Ok((SessionOut { session: snapshot, effects }, report))
}

async fn grade_section(
  state: &AppState,
  modality: Modality,
  section_id: &str,
  answers: &BTreeMap<u32, String>,
) -> Option<GradeReport> {
  if modality == Modality::Writing {
    return None;
  }
  match state.store.groups_for_section(section_id).await {
    Ok(groups) => Some(grade(modality, &groups, answers)),
    Err(e) => {
      warn!(target: "session", %section_id, error = %e, "Grading skipped: section unavailable");
      None
    }
  }
}

/// Render part `index` of the session: highlighted passage, question groups
/// (answers revealed after submission) and the essay for writing tasks.
#[instrument(level = "debug", skip(state), fields(%id, index))]
pub async fn render_part(state: &AppState, id: &str, index: usize) -> Result<PartView, ApiError> {
  let (part_id, answers, reveal, layer, essay) = state
    .with_session(id, |s| {
      let outline = s
        .parts()
        .get(index)
        .ok_or(crate::session::SessionError::PartIndexOutOfRange(index))?;
      let layer = s.highlights.get(&panel_key(&outline.part_id, None)).cloned().unwrap_or_default();
      Ok((
        outline.part_id.clone(),
        s.answers().clone(),
        s.phase() == Phase::Submitted,
        layer,
        s.essays().get(&outline.part_id).cloned(),
      ))
    })
    .await?;

  let part = state.store.get_part(&part_id).await?;
  let groups = state.store.groups_for_part(&part_id).await?;
  let group_layers = state
    .with_session(id, |s| {
      Ok(
        groups
          .iter()
          .filter_map(|g| s.highlights.get(&panel_key(&part_id, Some(&g.id))).map(|l| (g.id.clone(), l.clone())))
          .collect::<BTreeMap<_, _>>(),
      )
    })
    .await?;

  let applied = layer.apply(&part.content_html);
  let mut dropped = applied.dropped;
  let mut group_highlights = BTreeMap::new();
  let mut rendered = Vec::with_capacity(groups.len());
  for g in &groups {
    match group_layers.get(&g.id) {
      Some(gl) if !gl.items().is_empty() => {
        let ga = gl.apply(&g.content_html);
        dropped.extend(ga.dropped);
        group_highlights.insert(g.id.clone(), gl.items().to_vec());
        let marked = QuestionGroup { content_html: ga.html, ..g.clone() };
        rendered.push(render_group(&marked, &answers, reveal));
      }
      _ => rendered.push(render_group(g, &answers, reveal)),
    }
  }
  if !dropped.is_empty() {
    warn!(target: "session", session_id = %id, %part_id, ?dropped, "Highlights no longer match their panel");
  }

  let word_count = (part.modality == Modality::Writing).then(|| essay.as_deref().map(word_count).unwrap_or(0));
  Ok(PartView {
    index,
    content_html: applied.html,
    highlights: layer.items().to_vec(),
    group_highlights,
    dropped_highlights: dropped,
    groups: rendered,
    essay,
    word_count,
    reveal,
    part,
  })
}

async fn session_part(state: &AppState, id: &str, part_id: &str) -> Result<Part, ApiError> {
  let belongs = state.with_session(id, |s| Ok(s.parts().iter().any(|p| p.part_id == part_id))).await?;
  if !belongs {
    return Err(crate::session::SessionError::UnknownPart(part_id.to_string()).into());
  }
  Ok(state.store.get_part(part_id).await?)
}

/// Layer key and source HTML of the panel a highlight targets. A group panel
/// must belong to the part.
async fn session_panel(state: &AppState, id: &str, part_id: &str, group_id: Option<&str>) -> Result<(String, String), ApiError> {
  let part = session_part(state, id, part_id).await?;
  match group_id {
    None => Ok((panel_key(&part.id, None), part.content_html)),
    Some(gid) => {
      let group = state.store.get_group(gid).await?;
      if group.part_id != part.id {
        return Err(StoreError::NotFound { kind: "question group", id: gid.to_string() }.into());
      }
      Ok((panel_key(&part.id, Some(&group.id)), group.content_html))
    }
  }
}

#[instrument(level = "info", skip(state, input), fields(%id, part_id = %input.part_id, group_id = ?input.group_id, occurrence = input.occurrence))]
pub async fn add_highlight(state: &AppState, id: &str, input: HighlightIn) -> Result<Highlight, ApiError> {
  let (key, html) = session_panel(state, id, &input.part_id, input.group_id.as_deref()).await?;
  let added = state
    .with_session(id, |s| {
      let layer = s.highlights.entry(key.clone()).or_default();
      Ok(layer.add(&html, &input.text, input.occurrence))
    })
    .await?;
  match added {
    Ok(h) => {
      info!(target: "session", session_id = %id, panel = %key, highlight_id = %h.id, text = %trunc_for_log(&h.text, 40), "Highlight added");
      Ok(h)
    }
    Err(e @ HighlightError::NotFound { .. }) => {
      let matches = count_occurrences(&html, &input.text);
      debug!(target: "session", session_id = %id, panel = %key, matches, "Highlight selection not found");
      Err(e.into())
    }
    Err(e) => Err(e.into()),
  }
}

pub async fn remove_highlight(
  state: &AppState,
  id: &str,
  part_id: &str,
  group_id: Option<&str>,
  highlight_id: &str,
) -> Result<Highlight, ApiError> {
  let key = panel_key(part_id, group_id);
  state
    .with_session(id, |s| {
      let layer = s
        .highlights
        .get_mut(&key)
        .ok_or_else(|| HighlightError::UnknownId(highlight_id.to_string()))?;
      Ok(layer.remove(highlight_id)?)
    })
    .await
}

pub async fn save_settings(state: &AppState, id: &str, settings: DisplaySettings) -> Result<SettingsOut, ApiError> {
  state
    .with_session(id, |s| {
      s.display = settings;
      Ok(SettingsOut {
        settings: s.display,
        css_classes: s.display.css_classes(),
        font_scale: s.display.text_size.scale(),
      })
    })
    .await
}

/// Results after submission. Objective sections are graded; writing reports
/// word counts only. Once the session itself has been evicted the report is
/// served from the recorded submission.
#[instrument(level = "info", skip(state), fields(%id))]
pub async fn session_report(state: &AppState, id: &str) -> Result<ReportOut, ApiError> {
  let snap = match session_snapshot(state, id).await {
    Ok(snap) => snap,
    Err(ApiError::SessionNotFound(_)) => {
      let sub = state.submissions.for_session(id).await.ok_or_else(|| ApiError::SessionNotFound(id.to_string()))?;
      return Ok(ReportOut {
        session_id: sub.session_id,
        phase: Phase::Submitted,
        submit_reason: Some(sub.reason),
        report: sub.report,
        word_counts: sub.essays.iter().map(|(k, v)| (k.clone(), word_count(v))).collect(),
      });
    }
    Err(e) => return Err(e),
  };
  if snap.phase != Phase::Submitted {
    return Err(ApiError::NotSubmitted(id.to_string()));
  }
  let report = match state.submissions.for_session(id).await {
    Some(sub) => sub.report,
    None => grade_section(state, snap.modality, &snap.section_id, &snap.answers).await,
  };
  Ok(ReportOut {
    session_id: snap.id,
    phase: snap.phase,
    submit_reason: snap.submit_reason,
    report,
    word_counts: snap.word_counts,
  })
}

/// Assess one writing task of the session. The essay comes from the request
/// or, when absent, from what the student typed into the session.
#[instrument(level = "info", skip(state, input), fields(%id, %part_id))]
pub async fn assess_writing(state: &AppState, id: &str, part_id: &str, input: AssessIn) -> Result<EssayAssessment, ApiError> {
  let part = session_part(state, id, part_id).await?;
  let essay = match input.essay {
    Some(e) => e,
    None => state
      .with_session(id, |s| Ok(s.essays().get(part_id).cloned()))
      .await?
      .ok_or(AssessError::EmptyEssay)?,
  };
  Ok(assess_essay(state.openai.as_ref(), &state.config.prompts, &part, &essay).await?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assessor::AssessedBy;
  use crate::config::AppConfig;
  use crate::seeds::seed_demo_content;
  use crate::session::SubmitReason;

  async fn seeded() -> (AppState, crate::store::TestDetail) {
    let state = AppState::for_tests(AppConfig::default());
    let test = seed_demo_content(&state.store).await.unwrap();
    let detail = state.store.load_test_detail(&test.id).await.unwrap();
    (state, detail)
  }

  async fn start(state: &AppState, section_id: &str, mode: Option<TestMode>) -> SessionOut {
    start_session(state, StartSessionIn { section_id: section_id.into(), mode }).await.unwrap()
  }

  fn answer(number: u32, value: &str) -> SessionEvent {
    SessionEvent::Answer { number, value: value.into() }
  }

  #[test]
  fn timer_uses_part_limits_or_defaults() {
    let cfg = SessionCfg::default();
    assert_eq!(timer_seconds(&cfg, Modality::Listening, &[]), 600);
    assert_eq!(timer_seconds(&cfg, Modality::Reading, &[]), 3600);
    assert_eq!(timer_seconds(&cfg, Modality::Writing, &[]), 3600);
  }

  #[tokio::test]
  async fn reading_session_grades_on_submit() {
    let (state, detail) = seeded().await;
    let section_id = detail.readings[0].section.id.clone();
    let out = start(&state, &section_id, None).await;
    assert_eq!(out.session.phase, Phase::NotStarted);
    assert_eq!(out.session.remaining_secs, 20 * 60);
    let id = out.session.id;

    apply_event(&state, &id, SessionEvent::Start).await.unwrap();
    for (n, v) in [(1, "false"), (2, "TRUE"), (4, "i"), (7, "B"), (8, " Nutrition ")] {
      apply_event(&state, &id, answer(n, v)).await.unwrap();
    }
    assert!(matches!(session_report(&state, &id).await, Err(ApiError::NotSubmitted(_))));

    let (out, report) = apply_event(&state, &id, SessionEvent::Submit).await.unwrap();
    assert_eq!(out.effects, vec![SessionEffect::Submitted { reason: SubmitReason::Manual }]);
    let report = report.unwrap();
    assert_eq!(report.total, 9);
    assert_eq!(report.correct, 5);
    assert_eq!(state.submissions.len().await, 1);

    let r = session_report(&state, &id).await.unwrap();
    assert_eq!(r.report.map(|g| g.correct), Some(5));

    let view = render_part(&state, &id, 0).await.unwrap();
    assert!(view.reveal);
    assert_eq!(view.groups.len(), 4);

    // evicted from memory, still reportable from the submission log
    state.sessions.write().await.remove(&id);
    let r = session_report(&state, &id).await.unwrap();
    assert_eq!(r.submit_reason, Some(SubmitReason::Manual));
    assert_eq!(r.report.map(|g| g.correct), Some(5));
    assert!(matches!(session_report(&state, "gone").await, Err(ApiError::SessionNotFound(_))));
  }

  #[tokio::test]
  async fn mock_listening_plays_each_part_recording() {
    let (state, detail) = seeded().await;
    let out = start(&state, &detail.listenings[0].section.id, Some(TestMode::Mock)).await;
    let id = out.session.id.clone();
    assert_eq!(out.session.phase, Phase::Started);
    assert_eq!(out.session.audio_tracks, 2);
    assert_eq!(out.effects, vec![SessionEffect::PlayAudio { url: "/files/audio/demo-listening-part1.mp3".into() }]);
    assert_eq!(out.session.remaining_secs, 600);

    // no ticks count down while the recordings play
    let (tick, _) = apply_event(&state, &id, SessionEvent::Tick).await.unwrap();
    assert!(tick.effects.is_empty());
    let (next, _) = apply_event(&state, &id, SessionEvent::AudioEnded).await.unwrap();
    assert_eq!(next.effects, vec![SessionEffect::PlayAudio { url: "/files/audio/demo-listening-part2.mp3".into() }]);
    let (ended, _) = apply_event(&state, &id, SessionEvent::AudioEnded).await.unwrap();
    assert_eq!(ended.effects, vec![SessionEffect::TimerStarted { remaining: 600 }]);
  }

  #[tokio::test]
  async fn highlights_render_into_passage() {
    let (state, detail) = seeded().await;
    let part_id = detail.readings[0].parts[0].id.clone();
    let id = start(&state, &detail.readings[0].section.id, None).await.session.id;

    let h = add_highlight(&state, &id, HighlightIn { part_id: part_id.clone(), group_id: None, text: "pesticides".into(), occurrence: 1 })
      .await
      .unwrap();
    let view = render_part(&state, &id, 0).await.unwrap();
    assert_eq!(view.content_html.matches("<mark").count(), 1);
    assert!(view.content_html.contains(&h.id));
    assert!(!view.reveal);

    let missing =
      add_highlight(&state, &id, HighlightIn { part_id: part_id.clone(), group_id: None, text: "giraffe".into(), occurrence: 0 }).await;
    assert!(matches!(missing, Err(ApiError::Highlight(_))));

    remove_highlight(&state, &id, &part_id, None, &h.id).await.unwrap();
    let view = render_part(&state, &id, 0).await.unwrap();
    assert!(!view.content_html.contains("<mark"));
  }

  #[tokio::test]
  async fn question_group_text_takes_its_own_highlights() {
    let (state, detail) = seeded().await;
    let listening = &detail.listenings[0];
    let part_id = listening.parts[0].id.clone();
    let notes = state.store.groups_for_part(&part_id).await.unwrap()[0].clone();
    let id = start(&state, &listening.section.id, None).await.session.id;

    let input = |text: &str| HighlightIn { part_id: part_id.clone(), group_id: Some(notes.id.clone()), text: text.into(), occurrence: 0 };
    let h = add_highlight(&state, &id, input("Monthly fee")).await.unwrap();
    assert!(matches!(
      add_highlight(&state, &id, input("fee")).await,
      Err(ApiError::Highlight(HighlightError::Overlaps(_)))
    ));

    let view = render_part(&state, &id, 0).await.unwrap();
    let group = serde_json::to_value(&view.groups[0]).unwrap();
    let html = group["content_html"].as_str().unwrap();
    assert!(html.contains(&format!("data-highlight-id=\"{}\">Monthly fee</mark>", h.id)), "{html}");
    assert_eq!(view.group_highlights.get(&notes.id).map(Vec::len), Some(1));
    assert!(view.highlights.is_empty());

    // a group from another part is not a panel of this part
    let other_part = listening.parts[1].id.clone();
    let wrong = HighlightIn { part_id: other_part, group_id: Some(notes.id.clone()), text: "fee".into(), occurrence: 0 };
    assert!(matches!(add_highlight(&state, &id, wrong).await, Err(ApiError::Store(StoreError::NotFound { .. }))));

    remove_highlight(&state, &id, &part_id, Some(&notes.id), &h.id).await.unwrap();
    let view = render_part(&state, &id, 0).await.unwrap();
    assert!(view.group_highlights.is_empty());
    assert!(!serde_json::to_string(&view.groups).unwrap().contains("<mark"));
  }

  #[tokio::test]
  async fn writing_assessment_uses_session_essay() {
    let (state, detail) = seeded().await;
    let part_id = detail.writings[0].parts[0].id.clone();
    let out = start(&state, &detail.writings[0].section.id, None).await;
    assert_eq!(out.session.remaining_secs, 60 * 60);
    let id = out.session.id;

    assert!(matches!(
      assess_writing(&state, &id, &part_id, AssessIn::default()).await,
      Err(ApiError::Assess(AssessError::EmptyEssay))
    ));
    apply_event(&state, &id, SessionEvent::Start).await.unwrap();
    apply_event(&state, &id, SessionEvent::Essay { part_id: part_id.clone(), text: "Colonies fell sharply.".into() })
      .await
      .unwrap();
    let a = assess_writing(&state, &id, &part_id, AssessIn::default()).await.unwrap();
    assert_eq!(a.word_count, 3);
    assert_eq!(a.assessed_by, AssessedBy::WordCount);
    assert!(!a.meets_min_words);

    let view = render_part(&state, &id, 0).await.unwrap();
    assert_eq!(view.word_count, Some(3));
  }

  #[tokio::test]
  async fn settings_and_unknown_sessions() {
    let (state, detail) = seeded().await;
    let id = start(&state, &detail.readings[0].section.id, None).await.session.id;
    let s = save_settings(
      &state,
      &id,
      DisplaySettings { contrast: crate::accessibility::Contrast::YellowOnBlack, text_size: crate::accessibility::TextSize::Large },
    )
    .await
    .unwrap();
    assert!(s.css_classes.contains(&"contrast-yellow-on-black"));
    assert!(matches!(session_snapshot(&state, "nope").await, Err(ApiError::SessionNotFound(_))));
  }

  #[tokio::test]
  async fn list_tests_paginates() {
    let (state, _) = seeded().await;
    let page = list_tests(&state, TestListQuery { page_size: Some(5), ..Default::default() }).await;
    assert_eq!(page.total_items, 1);
    assert_eq!(page.items[0].title, "Academic Practice Test 1");
  }
}
