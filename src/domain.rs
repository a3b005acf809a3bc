//! Domain models for authored content: tests, sections, parts/tasks, question groups.

use serde::{Deserialize, Serialize};

/// How a test is delivered to the student.
/// Mock tests start their timers (or audio) as soon as the session opens.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
  #[default]
  Practice,
  Mock,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
  #[default]
  Draft,
  Published,
}

/// The three IELTS sections this app delivers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
  Reading,
  Listening,
  Writing,
}

impl Modality {
  pub fn as_str(&self) -> &'static str {
    match self {
      Modality::Reading => "reading",
      Modality::Listening => "listening",
      Modality::Writing => "writing",
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  #[default]
  Medium,
  Hard,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Test {
  pub id: String,
  pub title: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub mode: TestMode,
  #[serde(default)] pub status: TestStatus,
  #[serde(default)] pub category: String,
}

/// A Reading, Listening or Writing section. Sections may exist unlinked
/// and get attached to a test later.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Section {
  pub id: String,
  #[serde(default)] pub test_id: Option<String>,
  pub modality: Modality,
  pub title: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub position: u32,
}

/// Reading part, listening part or writing task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Part {
  pub id: String,
  pub section_id: String,
  pub modality: Modality,
  pub number: u32,
  pub title: String,
  #[serde(default)] pub instructions: String,
  #[serde(default)] pub difficulty: Difficulty,
  #[serde(default)] pub time_limit_minutes: u32,
  // reading passage / listening transcript / writing prompt
  #[serde(default)] pub content_html: String,
  #[serde(default)] pub audio_url: Option<String>,
  #[serde(default)] pub image_url: Option<String>,
  // writing only
  #[serde(default)] pub min_words: Option<u32>,
}

/// The 17 IELTS question types.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
  MultipleChoice,
  MultipleChoiceMultiple,
  TrueFalseNotGiven,
  YesNoNotGiven,
  MatchingHeadings,
  MatchingInformation,
  MatchingFeatures,
  MatchingSentenceEndings,
  SentenceCompletion,
  SummaryCompletion,
  SummaryCompletionDragDrop,
  NoteCompletion,
  TableCompletion,
  FlowChartCompletion,
  DiagramLabelling,
  MapLabelling,
  ShortAnswer,
}

impl QuestionType {
  pub const ALL: [QuestionType; 17] = [
    QuestionType::MultipleChoice,
    QuestionType::MultipleChoiceMultiple,
    QuestionType::TrueFalseNotGiven,
    QuestionType::YesNoNotGiven,
    QuestionType::MatchingHeadings,
    QuestionType::MatchingInformation,
    QuestionType::MatchingFeatures,
    QuestionType::MatchingSentenceEndings,
    QuestionType::SentenceCompletion,
    QuestionType::SummaryCompletion,
    QuestionType::SummaryCompletionDragDrop,
    QuestionType::NoteCompletion,
    QuestionType::TableCompletion,
    QuestionType::FlowChartCompletion,
    QuestionType::DiagramLabelling,
    QuestionType::MapLabelling,
    QuestionType::ShortAnswer,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      QuestionType::MultipleChoice => "multiple_choice",
      QuestionType::MultipleChoiceMultiple => "multiple_choice_multiple",
      QuestionType::TrueFalseNotGiven => "true_false_not_given",
      QuestionType::YesNoNotGiven => "yes_no_not_given",
      QuestionType::MatchingHeadings => "matching_headings",
      QuestionType::MatchingInformation => "matching_information",
      QuestionType::MatchingFeatures => "matching_features",
      QuestionType::MatchingSentenceEndings => "matching_sentence_endings",
      QuestionType::SentenceCompletion => "sentence_completion",
      QuestionType::SummaryCompletion => "summary_completion",
      QuestionType::SummaryCompletionDragDrop => "summary_completion_drag_drop",
      QuestionType::NoteCompletion => "note_completion",
      QuestionType::TableCompletion => "table_completion",
      QuestionType::FlowChartCompletion => "flow_chart_completion",
      QuestionType::DiagramLabelling => "diagram_labelling",
      QuestionType::MapLabelling => "map_labelling",
      QuestionType::ShortAnswer => "short_answer",
    }
  }

  /// Parse a wire name. Unknown names yield `None`.
  pub fn parse(s: &str) -> Option<Self> {
    let s = s.trim().to_ascii_lowercase();
    Self::ALL.iter().copied().find(|t| t.as_str() == s)
  }
}

/// One numbered item inside a group (a blank, a statement, a heading slot...).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubQuestion {
  pub number: u32,
  #[serde(default)] pub text: String,
  #[serde(default)] pub correct_answer: String,
  #[serde(default)] pub explanation: String,
}

/// A choice / heading / sentence ending shared by the group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestionOption {
  pub key: String,
  pub text: String,
  #[serde(default)] pub is_correct: bool,
  #[serde(default)] pub order: u32,
}

/// A typed cluster of sub-questions sharing instructions and options,
/// e.g. one "Matching Headings" block covering questions 14–17.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestionGroup {
  pub id: String,
  pub part_id: String,
  pub question_type: QuestionType,
  #[serde(default)] pub number: Option<u32>,
  #[serde(default)] pub title: String,
  #[serde(default)] pub instructions: String,
  #[serde(default)] pub content_html: String,
  #[serde(default)] pub image_url: Option<String>,
  #[serde(default)] pub max_choices: Option<u32>,
  #[serde(default)] pub position: u32,
  #[serde(default)] pub sub_questions: Vec<SubQuestion>,
  #[serde(default)] pub options: Vec<QuestionOption>,
}
