//! Question-type dispatch: which renderer a group uses, which question numbers
//! it covers, and how a given answer is judged.
//!
//! The renderer table is static. A type without an entry is still accepted by
//! the store, but renders as a visible warning box instead of a form.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{QuestionGroup, QuestionType};

/// Kind of form control the client draws for a group.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputControl {
  TextBlank,
  Select,
  Radio,
  Checkbox,
  DragDrop,
  ImageLabel,
}

#[derive(Debug)]
pub struct Renderer {
  pub component: &'static str,
  pub control: InputControl,
  /// Whether the group's own options are the answer choices.
  pub uses_options: bool,
  /// Built-in answer choices for judgement-style questions.
  pub fixed_choices: &'static [&'static str],
}

const TFNG: &[&str] = &["TRUE", "FALSE", "NOT GIVEN"];
const YNNG: &[&str] = &["YES", "NO", "NOT GIVEN"];

const fn r(component: &'static str, control: InputControl, uses_options: bool) -> Renderer {
  Renderer { component, control, uses_options, fixed_choices: &[] }
}

static RENDERERS: [(QuestionType, Renderer); 16] = [
  (QuestionType::MultipleChoice, r("MultipleChoice", InputControl::Radio, true)),
  (QuestionType::MultipleChoiceMultiple, r("MultipleChoiceMulti", InputControl::Checkbox, true)),
  (
    QuestionType::TrueFalseNotGiven,
    Renderer { component: "TrueFalseNotGiven", control: InputControl::Radio, uses_options: false, fixed_choices: TFNG },
  ),
  (
    QuestionType::YesNoNotGiven,
    Renderer { component: "YesNoNotGiven", control: InputControl::Radio, uses_options: false, fixed_choices: YNNG },
  ),
  (QuestionType::MatchingHeadings, r("MatchingHeadings", InputControl::Select, true)),
  (QuestionType::MatchingInformation, r("MatchingInformation", InputControl::Select, true)),
  (QuestionType::MatchingFeatures, r("MatchingFeatures", InputControl::Select, true)),
  (QuestionType::MatchingSentenceEndings, r("MatchingSentenceEndings", InputControl::Select, true)),
  (QuestionType::SentenceCompletion, r("SentenceCompletion", InputControl::TextBlank, false)),
  (QuestionType::SummaryCompletion, r("SummaryCompletion", InputControl::TextBlank, false)),
  (QuestionType::SummaryCompletionDragDrop, r("DragDropSummary", InputControl::DragDrop, true)),
  (QuestionType::NoteCompletion, r("NoteCompletion", InputControl::TextBlank, false)),
  (QuestionType::TableCompletion, r("TableCompletion", InputControl::TextBlank, false)),
  (QuestionType::DiagramLabelling, r("DiagramLabelling", InputControl::ImageLabel, false)),
  (QuestionType::MapLabelling, r("MapLabelling", InputControl::ImageLabel, true)),
  (QuestionType::ShortAnswer, r("ShortAnswer", InputControl::TextBlank, false)),
];

pub fn renderer_for(t: QuestionType) -> Option<&'static Renderer> {
  RENDERERS.iter().find(|(k, _)| *k == t).map(|(_, r)| r)
}

/// DOM anchor the runner scrolls to for a question number.
pub fn anchor_id(number: u32) -> String {
  format!("question-{number}")
}

/// Inclusive question-number range of a group: its own number when it has no
/// sub-questions, otherwise min/max of the sub-question numbers.
pub fn number_range(group: &QuestionGroup) -> Option<(u32, u32)> {
  if group.sub_questions.is_empty() {
    return group.number.map(|n| (n, n));
  }
  let min = group.sub_questions.iter().map(|s| s.number).min()?;
  let max = group.sub_questions.iter().map(|s| s.number).max()?;
  Some((min, max))
}

/// "Questions 14–17" / "Question 5".
pub fn range_label(range: Option<(u32, u32)>) -> String {
  match range {
    Some((a, b)) if a == b => format!("Question {a}"),
    Some((a, b)) => format!("Questions {a}–{b}"),
    None => String::new(),
  }
}

/// A gradable item, whether it comes from a sub-question or from a group that
/// carries a single number of its own.
#[derive(Clone, Debug)]
pub struct Item<'a> {
  pub number: u32,
  pub text: &'a str,
  pub expected: String,
  pub explanation: &'a str,
}

pub fn items(group: &QuestionGroup) -> Vec<Item<'_>> {
  if group.sub_questions.is_empty() {
    return group
      .number
      .map(|n| Item { number: n, text: group.title.as_str(), expected: option_key_answer(group), explanation: "" })
      .into_iter()
      .collect();
  }
  let mut out: Vec<Item<'_>> = group
    .sub_questions
    .iter()
    .map(|s| Item {
      number: s.number,
      text: s.text.as_str(),
      expected: if s.correct_answer.trim().is_empty() { option_key_answer(group) } else { s.correct_answer.clone() },
      explanation: s.explanation.as_str(),
    })
    .collect();
  out.sort_by_key(|i| i.number);
  out
}

fn option_key_answer(group: &QuestionGroup) -> String {
  let mut keys: Vec<&str> = group.options.iter().filter(|o| o.is_correct).map(|o| o.key.as_str()).collect();
  keys.sort_unstable();
  keys.join(",")
}

/// Sorted, de-duplicated question numbers across groups.
pub fn all_question_numbers(groups: &[QuestionGroup]) -> Vec<u32> {
  let mut nums: Vec<u32> = groups.iter().flat_map(|g| items(g).into_iter().map(|i| i.number)).collect();
  nums.sort_unstable();
  nums.dedup();
  nums
}

pub fn normalize_answer(s: &str) -> String {
  s.trim().to_lowercase()
}

/// Exact match after trim + lowercase. Multi-select answers compare as sorted
/// comma-separated key lists.
pub fn is_correct(question_type: QuestionType, expected: &str, given: &str) -> bool {
  if expected.trim().is_empty() {
    return false;
  }
  if question_type == QuestionType::MultipleChoiceMultiple {
    return key_list(expected) == key_list(given);
  }
  normalize_answer(expected) == normalize_answer(given)
}

fn key_list(s: &str) -> Vec<String> {
  let mut keys: Vec<String> = s.split(',').map(normalize_answer).filter(|k| !k.is_empty()).collect();
  keys.sort();
  keys
}

#[derive(Debug, Serialize)]
pub struct RenderedChoice {
  pub key: String,
  pub text: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_correct: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct RenderedItem {
  pub number: u32,
  pub anchor: String,
  pub text: String,
  pub answer: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expected: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub correct: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub explanation: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderedGroup {
  Group {
    group_id: String,
    question_type: QuestionType,
    component: &'static str,
    control: InputControl,
    label: String,
    range: Option<(u32, u32)>,
    title: String,
    instructions: String,
    content_html: String,
    image_url: Option<String>,
    max_choices: Option<u32>,
    choices: Vec<RenderedChoice>,
    items: Vec<RenderedItem>,
  },
  Unsupported {
    group_id: String,
    question_type: QuestionType,
    warning: String,
  },
}

/// Build the client view of a group. Correct answers and explanations are only
/// included when `reveal` is set (after submission).
pub fn render_group(group: &QuestionGroup, answers: &BTreeMap<u32, String>, reveal: bool) -> RenderedGroup {
  let Some(renderer) = renderer_for(group.question_type) else {
    return RenderedGroup::Unsupported {
      group_id: group.id.clone(),
      question_type: group.question_type,
      warning: format!("Question type '{}' is not supported yet.", group.question_type.as_str()),
    };
  };

  let choices = if renderer.uses_options {
    let mut opts: Vec<_> = group.options.iter().collect();
    opts.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.key.cmp(&b.key)));
    opts
      .into_iter()
      .map(|o| RenderedChoice { key: o.key.clone(), text: o.text.clone(), is_correct: reveal.then_some(o.is_correct) })
      .collect()
  } else {
    renderer
      .fixed_choices
      .iter()
      .map(|c| RenderedChoice { key: (*c).to_string(), text: (*c).to_string(), is_correct: None })
      .collect()
  };

  let items = items(group)
    .into_iter()
    .map(|it| {
      let answer = answers.get(&it.number).cloned();
      let (expected, correct, explanation) = if reveal {
        let ok = answer.as_deref().map(|a| is_correct(group.question_type, &it.expected, a)).unwrap_or(false);
        (Some(it.expected.clone()), Some(ok), Some(it.explanation.to_string()))
      } else {
        (None, None, None)
      };
      RenderedItem {
        number: it.number,
        anchor: anchor_id(it.number),
        text: it.text.to_string(),
        answer,
        expected,
        correct,
        explanation,
      }
    })
    .collect();

  let range = number_range(group);
  RenderedGroup::Group {
    group_id: group.id.clone(),
    question_type: group.question_type,
    component: renderer.component,
    control: renderer.control,
    label: range_label(range),
    range,
    title: group.title.clone(),
    instructions: group.instructions.clone(),
    content_html: group.content_html.clone(),
    image_url: group.image_url.clone(),
    max_choices: group.max_choices,
    choices,
    items,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{QuestionOption, SubQuestion};

  fn sub(number: u32, answer: &str) -> SubQuestion {
    SubQuestion { number, text: format!("Q{number}"), correct_answer: answer.into(), explanation: String::new() }
  }

  fn group(t: QuestionType, subs: Vec<SubQuestion>) -> QuestionGroup {
    QuestionGroup {
      id: "g1".into(),
      part_id: "p1".into(),
      question_type: t,
      number: None,
      title: String::new(),
      instructions: String::new(),
      content_html: String::new(),
      image_url: None,
      max_choices: None,
      position: 0,
      sub_questions: subs,
      options: vec![],
    }
  }

  #[test]
  fn renderer_table_covers_all_but_flow_chart() {
    let missing: Vec<_> = QuestionType::ALL.iter().filter(|t| renderer_for(**t).is_none()).collect();
    assert_eq!(missing, vec![&QuestionType::FlowChartCompletion]);
  }

  #[test]
  fn all_question_numbers_sorted_and_unique_for_every_type() {
    for t in QuestionType::ALL {
      let g = group(t, vec![sub(9, "a"), sub(7, "b"), sub(8, "c")]);
      let nums = all_question_numbers(std::slice::from_ref(&g));
      assert_eq!(nums, vec![7, 8, 9], "type {}", t.as_str());
    }
  }

  #[test]
  fn all_question_numbers_dedups_across_groups() {
    let a = group(QuestionType::ShortAnswer, vec![sub(1, "x"), sub(2, "y")]);
    let b = group(QuestionType::NoteCompletion, vec![sub(2, "y"), sub(3, "z")]);
    assert_eq!(all_question_numbers(&[b, a]), vec![1, 2, 3]);
  }

  #[test]
  fn number_range_prefers_sub_questions_then_group_number() {
    let g = group(QuestionType::ShortAnswer, vec![sub(15, ""), sub(14, ""), sub(17, "")]);
    assert_eq!(number_range(&g), Some((14, 17)));
    assert_eq!(range_label(number_range(&g)), "Questions 14–17");

    let mut single = group(QuestionType::MultipleChoice, vec![]);
    single.number = Some(5);
    assert_eq!(number_range(&single), Some((5, 5)));
    assert_eq!(range_label(number_range(&single)), "Question 5");

    assert_eq!(number_range(&group(QuestionType::MultipleChoice, vec![])), None);
  }

  #[test]
  fn short_answer_is_case_and_whitespace_insensitive() {
    assert!(is_correct(QuestionType::ShortAnswer, "Paris", " paris "));
    assert!(!is_correct(QuestionType::ShortAnswer, "Paris", "parris"));
  }

  #[test]
  fn empty_expected_never_matches() {
    assert!(!is_correct(QuestionType::ShortAnswer, "  ", ""));
  }

  #[test]
  fn multi_select_compares_key_sets() {
    assert!(is_correct(QuestionType::MultipleChoiceMultiple, "A,C", "c, a"));
    assert!(!is_correct(QuestionType::MultipleChoiceMultiple, "A,C", "A"));
    assert!(!is_correct(QuestionType::MultipleChoiceMultiple, "A,C", "A,C,D"));
  }

  #[test]
  fn single_numbered_group_takes_answer_from_correct_options() {
    let mut g = group(QuestionType::MultipleChoice, vec![]);
    g.number = Some(5);
    g.options = vec![
      QuestionOption { key: "A".into(), text: "one".into(), is_correct: false, order: 0 },
      QuestionOption { key: "B".into(), text: "two".into(), is_correct: true, order: 1 },
    ];
    let its = items(&g);
    assert_eq!(its.len(), 1);
    assert_eq!(its[0].expected, "B");
  }

  #[test]
  fn render_hides_answers_until_revealed() {
    let g = group(QuestionType::ShortAnswer, vec![sub(1, "Paris")]);
    let mut answers = BTreeMap::new();
    answers.insert(1, "paris".to_string());

    let hidden = serde_json::to_value(render_group(&g, &answers, false)).unwrap();
    assert_eq!(hidden["kind"], "group");
    assert!(hidden["items"][0].get("expected").is_none());
    assert_eq!(hidden["items"][0]["answer"], "paris");
    assert_eq!(hidden["items"][0]["anchor"], "question-1");

    let shown = serde_json::to_value(render_group(&g, &answers, true)).unwrap();
    assert_eq!(shown["items"][0]["expected"], "Paris");
    assert_eq!(shown["items"][0]["correct"], true);
  }

  #[test]
  fn render_uses_fixed_choices_for_true_false() {
    let g = group(QuestionType::TrueFalseNotGiven, vec![sub(1, "TRUE")]);
    let v = serde_json::to_value(render_group(&g, &BTreeMap::new(), false)).unwrap();
    let keys: Vec<_> = v["choices"].as_array().unwrap().iter().map(|c| c["key"].as_str().unwrap().to_string()).collect();
    assert_eq!(keys, vec!["TRUE", "FALSE", "NOT GIVEN"]);
  }

  #[test]
  fn unsupported_type_renders_warning() {
    let g = group(QuestionType::FlowChartCompletion, vec![sub(1, "x")]);
    match render_group(&g, &BTreeMap::new(), false) {
      RenderedGroup::Unsupported { warning, .. } => assert!(warning.contains("flow_chart_completion")),
      other => panic!("expected warning, got {other:?}"),
    }
  }
}
