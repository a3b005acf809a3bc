//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Authoring inputs reuse the store drafts; runner views wrap session types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::accessibility::DisplaySettings;
use crate::domain::{Modality, Part, TestMode, TestStatus};
use crate::grading::GradeReport;
use crate::highlight::Highlight;
use crate::questions::RenderedGroup;
use crate::session::{Phase, SessionEffect, SessionEvent, SessionSnapshot, SubmitReason};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    /// Ask for the current snapshot.
    Sync,
    Event {
        event: SessionEvent,
    },
    RenderPart {
        index: usize,
    },
    AddHighlight {
        part_id: String,
        /// Highlight inside this question group's text instead of the passage.
        #[serde(default)]
        group_id: Option<String>,
        text: String,
        #[serde(default)]
        occurrence: usize,
    },
    RemoveHighlight {
        part_id: String,
        #[serde(default)]
        group_id: Option<String>,
        highlight_id: String,
    },
    SaveSettings {
        settings: DisplaySettings,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Snapshot {
        session: SessionSnapshot,
    },
    Effects {
        effects: Vec<SessionEffect>,
    },
    Timer {
        remaining: u32,
    },
    Submitted {
        reason: SubmitReason,
        report: Option<GradeReport>,
    },
    Part {
        part: PartView,
    },
    HighlightAdded {
        part_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
        highlight: Highlight,
    },
    HighlightRemoved {
        part_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
        highlight_id: String,
    },
    Settings {
        settings: DisplaySettings,
        css_classes: Vec<&'static str>,
    },
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    /// Live runner sessions held in memory.
    pub sessions: usize,
    /// Submissions held in memory.
    pub submissions: usize,
}

#[derive(Serialize)]
pub struct DeletedOut {
    pub deleted: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TestListQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub status: Option<TestStatus>,
    pub mode: Option<TestMode>,
    pub category: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SectionListQuery {
    pub test_id: Option<String>,
    pub modality: Option<Modality>,
    #[serde(default)]
    pub unlinked: bool,
}

#[derive(Debug, Deserialize)]
pub struct StartSessionIn {
    pub section_id: String,
    /// Overrides the owning test's mode.
    #[serde(default)]
    pub mode: Option<TestMode>,
}

/// A session view plus the effects the last operation produced.
#[derive(Debug, Serialize)]
pub struct SessionOut {
    pub session: SessionSnapshot,
    pub effects: Vec<SessionEffect>,
}

/// One part as the runner shows it: highlighted passage plus question groups.
#[derive(Debug, Serialize)]
pub struct PartView {
    pub index: usize,
    pub part: Part,
    pub content_html: String,
    pub highlights: Vec<Highlight>,
    /// Highlights inside question group text, by group id.
    pub group_highlights: BTreeMap<String, Vec<Highlight>>,
    /// Highlights that no longer resolve against their panel.
    pub dropped_highlights: Vec<String>,
    pub groups: Vec<RenderedGroup>,
    pub essay: Option<String>,
    pub word_count: Option<usize>,
    pub reveal: bool,
}

#[derive(Debug, Deserialize)]
pub struct HighlightIn {
    pub part_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub occurrence: usize,
}

#[derive(Debug, Deserialize)]
pub struct PartQuery {
    pub part_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SettingsOut {
    pub settings: DisplaySettings,
    pub css_classes: Vec<&'static str>,
    /// Multiplier applied to the base font size.
    pub font_scale: f32,
}

#[derive(Debug, Serialize)]
pub struct ReportOut {
    pub session_id: String,
    pub phase: Phase,
    pub submit_reason: Option<SubmitReason>,
    /// None for writing sections.
    pub report: Option<GradeReport>,
    pub word_counts: std::collections::BTreeMap<String, usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssessIn {
    /// Falls back to the essay stored in the session.
    #[serde(default)]
    pub essay: Option<String>,
}
