//! Test-session state machine for the student runner.
//!
//! A session moves `NotStarted → Started → Submitted`. Time only advances
//! through `Tick` events (one per second, driven by the WebSocket loop), so the
//! machine itself is synchronous and deterministic.
//!
//! Listening sessions play their recordings first, one track per part in
//! order; each `AudioEnded` moves to the next track and the review timer
//! starts after the last one. The timer never runs while audio is playing. Mock tests open already
//! started (timer or audio), practice tests wait for the student.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::accessibility::DisplaySettings;
use crate::domain::{Modality, TestMode};
use crate::highlight::HighlightLayer;
use crate::questions::anchor_id;
use crate::util::word_count;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    Started,
    Submitted,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AudioState {
    Idle,
    Playing,
    Ended,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    Manual,
    TimeUp,
}

/// Question numbers of one part, already sorted.
#[derive(Clone, Debug, Serialize)]
pub struct PartOutline {
    pub part_id: String,
    pub title: String,
    pub question_numbers: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub test_id: Option<String>,
    pub section_id: String,
    pub modality: Modality,
    pub mode: TestMode,
    /// 0 means untimed.
    pub timer_seconds: u32,
    /// Listening recordings in play order.
    pub audio_urls: Vec<String>,
    pub scroll_offset_px: i32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Start,
    PlayAudio,
    AudioEnded,
    Tick,
    Answer { number: u32, value: String },
    Essay { part_id: String, text: String },
    Next,
    Prev,
    JumpTo { number: u32 },
    SelectPart { index: usize },
    Submit,
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::Start => "start",
            SessionEvent::PlayAudio => "play_audio",
            SessionEvent::AudioEnded => "audio_ended",
            SessionEvent::Tick => "tick",
            SessionEvent::Answer { .. } => "answer",
            SessionEvent::Essay { .. } => "essay",
            SessionEvent::Next => "next",
            SessionEvent::Prev => "prev",
            SessionEvent::JumpTo { .. } => "jump_to",
            SessionEvent::SelectPart { .. } => "select_part",
            SessionEvent::Submit => "submit",
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEffect {
    TimerStarted { remaining: u32 },
    PlayAudio { url: String },
    TimerTick { remaining: u32 },
    ScrollTo { part_index: usize, anchor: String, offset_px: i32 },
    Submitted { reason: SubmitReason },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SessionError {
    #[error("session has not started")]
    NotStarted,
    #[error("session already started")]
    AlreadyStarted,
    #[error("session already submitted")]
    AlreadySubmitted,
    #[error("'{event}' is not valid for a {modality} session")]
    WrongModality { event: &'static str, modality: &'static str },
    #[error("audio is not playing")]
    AudioNotPlaying,
    #[error("unknown question number: {0}")]
    UnknownQuestion(u32),
    #[error("unknown part: {0}")]
    UnknownPart(String),
    #[error("part index out of range: {0}")]
    PartIndexOutOfRange(usize),
}

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub test_id: Option<String>,
    pub section_id: String,
    pub modality: Modality,
    pub mode: TestMode,
    phase: Phase,
    remaining_secs: u32,
    timer_running: bool,
    audio: AudioState,
    audio_urls: Vec<String>,
    audio_track: usize,
    scroll_offset_px: i32,
    parts: Vec<PartOutline>,
    current_part: usize,
    current_question: Option<u32>,
    answers: BTreeMap<u32, String>,
    essays: HashMap<String, String>,
    submit_reason: Option<SubmitReason>,
    pub display: DisplaySettings,
    /// Highlight layers keyed by panel id (`part:<id>` or `group:<id>`).
    pub highlights: HashMap<String, HighlightLayer>,
}

/// Client-facing view of the session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub test_id: Option<String>,
    pub section_id: String,
    pub modality: Modality,
    pub mode: TestMode,
    pub phase: Phase,
    pub remaining_secs: u32,
    pub timer_running: bool,
    pub audio: AudioState,
    /// Track currently playing (or last played).
    pub audio_url: Option<String>,
    pub audio_track: usize,
    pub audio_tracks: usize,
    pub parts: Vec<PartOutline>,
    pub current_part: usize,
    pub current_question: Option<u32>,
    pub answers: BTreeMap<u32, String>,
    pub word_counts: BTreeMap<String, usize>,
    pub submit_reason: Option<SubmitReason>,
    pub display: DisplaySettings,
    pub css_classes: Vec<&'static str>,
}

impl Session {
    /// Create a session. Mock tests come back already running.
    pub fn open(id: String, parts: Vec<PartOutline>, cfg: SessionConfig) -> (Self, Vec<SessionEffect>) {
        let current_question = parts.first().and_then(|p| p.question_numbers.first().copied());
        let mut s = Self {
            id,
            test_id: cfg.test_id,
            section_id: cfg.section_id,
            modality: cfg.modality,
            mode: cfg.mode,
            phase: Phase::NotStarted,
            remaining_secs: cfg.timer_seconds,
            timer_running: false,
            audio: AudioState::Idle,
            audio_urls: cfg.audio_urls.into_iter().filter(|u| !u.trim().is_empty()).collect(),
            audio_track: 0,
            scroll_offset_px: cfg.scroll_offset_px,
            parts,
            current_part: 0,
            current_question,
            answers: BTreeMap::new(),
            essays: HashMap::new(),
            submit_reason: None,
            display: DisplaySettings::default(),
            highlights: HashMap::new(),
        };

        let effects = match (s.mode, s.modality) {
            (TestMode::Practice, _) => Vec::new(),
            (TestMode::Mock, Modality::Listening) => s.play_audio(),
            (TestMode::Mock, _) => s.start_timer(),
        };
        info!(target: "session", id = %s.id, modality = s.modality.as_str(), mode = ?s.mode, auto_started = !effects.is_empty(), "Session opened");
        (s, effects)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn answers(&self) -> &BTreeMap<u32, String> {
        &self.answers
    }

    pub fn essays(&self) -> &HashMap<String, String> {
        &self.essays
    }

    pub fn parts(&self) -> &[PartOutline] {
        &self.parts
    }

    pub fn submit_reason(&self) -> Option<SubmitReason> {
        self.submit_reason
    }

    pub fn is_timer_running(&self) -> bool {
        self.timer_running
    }

    /// Display-only word counts per writing task.
    pub fn word_counts(&self) -> BTreeMap<String, usize> {
        self.essays.iter().map(|(k, v)| (k.clone(), word_count(v))).collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            test_id: self.test_id.clone(),
            section_id: self.section_id.clone(),
            modality: self.modality,
            mode: self.mode,
            phase: self.phase,
            remaining_secs: self.remaining_secs,
            timer_running: self.timer_running,
            audio: self.audio,
            audio_url: self.audio_urls.get(self.audio_track).cloned(),
            audio_track: self.audio_track,
            audio_tracks: self.audio_urls.len(),
            parts: self.parts.clone(),
            current_part: self.current_part,
            current_question: self.current_question,
            answers: self.answers.clone(),
            word_counts: self.word_counts(),
            submit_reason: self.submit_reason,
            display: self.display,
            css_classes: self.display.css_classes(),
        }
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<Vec<SessionEffect>, SessionError> {
        if !matches!(event, SessionEvent::Tick) {
            debug!(target: "session", id = %self.id, event = event.name(), phase = ?self.phase, "Session event");
        }
        match event {
            SessionEvent::Start => {
                if self.modality == Modality::Listening {
                    return Err(self.wrong_modality("start"));
                }
                self.require_not_started()?;
                Ok(self.start_timer())
            }
            SessionEvent::PlayAudio => {
                if self.modality != Modality::Listening {
                    return Err(self.wrong_modality("play_audio"));
                }
                self.require_not_started()?;
                Ok(self.play_audio())
            }
            SessionEvent::AudioEnded => {
                if self.audio != AudioState::Playing {
                    return Err(SessionError::AudioNotPlaying);
                }
                if let Some(url) = self.audio_urls.get(self.audio_track + 1).cloned() {
                    self.audio_track += 1;
                    info!(target: "session", id = %self.id, track = self.audio_track, "Audio track ended; playing next");
                    return Ok(vec![SessionEffect::PlayAudio { url }]);
                }
                self.audio = AudioState::Ended;
                info!(target: "session", id = %self.id, "Audio ended; review timer starting");
                Ok(self.run_timer())
            }
            SessionEvent::Tick => Ok(self.tick()),
            SessionEvent::Answer { number, value } => {
                self.require_started()?;
                if !self.parts.iter().any(|p| p.question_numbers.contains(&number)) {
                    return Err(SessionError::UnknownQuestion(number));
                }
                if value.trim().is_empty() {
                    self.answers.remove(&number);
                } else {
                    self.answers.insert(number, value);
                }
                Ok(Vec::new())
            }
            SessionEvent::Essay { part_id, text } => {
                if self.modality != Modality::Writing {
                    return Err(self.wrong_modality("essay"));
                }
                self.require_started()?;
                if !self.parts.iter().any(|p| p.part_id == part_id) {
                    return Err(SessionError::UnknownPart(part_id));
                }
                self.essays.insert(part_id, text);
                Ok(Vec::new())
            }
            SessionEvent::Next => Ok(self.step(1)),
            SessionEvent::Prev => Ok(self.step(-1)),
            SessionEvent::JumpTo { number } => {
                let part_index = self
                    .parts
                    .iter()
                    .position(|p| p.question_numbers.contains(&number))
                    .ok_or(SessionError::UnknownQuestion(number))?;
                Ok(self.focus(part_index, Some(number)))
            }
            SessionEvent::SelectPart { index } => {
                let first = self
                    .parts
                    .get(index)
                    .ok_or(SessionError::PartIndexOutOfRange(index))?
                    .question_numbers
                    .first()
                    .copied();
                Ok(self.focus(index, first))
            }
            SessionEvent::Submit => {
                if self.phase == Phase::Submitted {
                    return Err(SessionError::AlreadySubmitted);
                }
                Ok(self.submit(SubmitReason::Manual))
            }
        }
    }

    fn wrong_modality(&self, event: &'static str) -> SessionError {
        SessionError::WrongModality { event, modality: self.modality.as_str() }
    }

    fn require_not_started(&self) -> Result<(), SessionError> {
        match self.phase {
            Phase::NotStarted => Ok(()),
            Phase::Started => Err(SessionError::AlreadyStarted),
            Phase::Submitted => Err(SessionError::AlreadySubmitted),
        }
    }

    fn require_started(&self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Started => Ok(()),
            Phase::NotStarted => Err(SessionError::NotStarted),
            Phase::Submitted => Err(SessionError::AlreadySubmitted),
        }
    }

    fn start_timer(&mut self) -> Vec<SessionEffect> {
        self.phase = Phase::Started;
        self.run_timer()
    }

    fn run_timer(&mut self) -> Vec<SessionEffect> {
        if self.remaining_secs == 0 {
            return Vec::new();
        }
        self.timer_running = true;
        vec![SessionEffect::TimerStarted { remaining: self.remaining_secs }]
    }

    fn play_audio(&mut self) -> Vec<SessionEffect> {
        self.phase = Phase::Started;
        self.audio_track = 0;
        match self.audio_urls.first().cloned() {
            Some(url) => {
                self.audio = AudioState::Playing;
                vec![SessionEffect::PlayAudio { url }]
            }
            // Nothing to play: go straight to the review timer.
            None => {
                self.audio = AudioState::Ended;
                self.run_timer()
            }
        }
    }

    fn tick(&mut self) -> Vec<SessionEffect> {
        if self.phase != Phase::Started || !self.timer_running {
            return Vec::new();
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        let mut effects = vec![SessionEffect::TimerTick { remaining: self.remaining_secs }];
        if self.remaining_secs == 0 {
            effects.extend(self.submit(SubmitReason::TimeUp));
        }
        effects
    }

    fn submit(&mut self, reason: SubmitReason) -> Vec<SessionEffect> {
        self.phase = Phase::Submitted;
        self.timer_running = false;
        if self.audio == AudioState::Playing {
            self.audio = AudioState::Ended;
        }
        self.submit_reason = Some(reason);
        info!(target: "session", id = %self.id, ?reason, answered = self.answers.len(), essays = self.essays.len(), "Session submitted");
        vec![SessionEffect::Submitted { reason }]
    }

    /// Walk the flattened (part, number) list. Sessions without numbered
    /// questions (writing) step between parts instead.
    fn step(&mut self, dir: i64) -> Vec<SessionEffect> {
        let flat: Vec<(usize, u32)> = self
            .parts
            .iter()
            .enumerate()
            .flat_map(|(pi, p)| p.question_numbers.iter().map(move |n| (pi, *n)))
            .collect();

        if flat.is_empty() {
            let target = self.current_part as i64 + dir;
            if target < 0 || target as usize >= self.parts.len() {
                return Vec::new();
            }
            self.current_part = target as usize;
            return Vec::new();
        }

        let pos = self
            .current_question
            .and_then(|q| flat.iter().position(|(pi, n)| *pi == self.current_part && *n == q));
        let target = match pos {
            Some(i) => i as i64 + dir,
            // Nothing focused yet: land on the first question of the current part.
            None => flat.iter().position(|(pi, _)| *pi >= self.current_part).unwrap_or(0) as i64,
        };
        if target < 0 || target as usize >= flat.len() {
            return Vec::new();
        }
        let (pi, n) = flat[target as usize];
        self.focus(pi, Some(n))
    }

    fn focus(&mut self, part_index: usize, number: Option<u32>) -> Vec<SessionEffect> {
        self.current_part = part_index;
        self.current_question = number;
        match number {
            Some(n) => vec![SessionEffect::ScrollTo { part_index, anchor: anchor_id(n), offset_px: self.scroll_offset_px }],
            None => Vec::new(),
        }
    }
}
