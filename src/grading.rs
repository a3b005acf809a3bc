//! Grading of a submitted answer map against a section's question groups,
//! plus the raw-score → band conversion used for Listening and Academic Reading.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{Modality, QuestionGroup};
use crate::questions::{is_correct, items};

#[derive(Clone, Debug, Serialize)]
pub struct QuestionResult {
  pub number: u32,
  pub given: Option<String>,
  pub expected: String,
  pub correct: bool,
  pub explanation: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct GradeReport {
  pub results: Vec<QuestionResult>,
  pub correct: u32,
  pub total: u32,
  pub band: Option<f32>,
}

/// Grade every item in `groups`. Unanswered items count as incorrect.
pub fn grade(modality: Modality, groups: &[QuestionGroup], answers: &BTreeMap<u32, String>) -> GradeReport {
  let mut results: Vec<QuestionResult> = Vec::new();
  for g in groups {
    for it in items(g) {
      let given = answers.get(&it.number).cloned();
      let correct = given.as_deref().map(|a| is_correct(g.question_type, &it.expected, a)).unwrap_or(false);
      results.push(QuestionResult {
        number: it.number,
        given,
        expected: it.expected,
        correct,
        explanation: it.explanation.to_string(),
      });
    }
  }
  results.sort_by_key(|r| r.number);
  results.dedup_by_key(|r| r.number);

  let total = results.len() as u32;
  let correct = results.iter().filter(|r| r.correct).count() as u32;
  GradeReport { band: band_score(modality, correct, total), results, correct, total }
}

// (minimum raw score out of 40, band), highest first
const LISTENING_BANDS: &[(u32, f32)] = &[
  (39, 9.0), (37, 8.5), (35, 8.0), (32, 7.5), (30, 7.0), (26, 6.5), (23, 6.0),
  (18, 5.5), (16, 5.0), (13, 4.5), (10, 4.0), (8, 3.5), (6, 3.0), (4, 2.5),
];
const READING_BANDS: &[(u32, f32)] = &[
  (39, 9.0), (37, 8.5), (35, 8.0), (33, 7.5), (30, 7.0), (27, 6.5), (23, 6.0),
  (19, 5.5), (15, 5.0), (13, 4.5), (10, 4.0), (8, 3.5), (6, 3.0), (4, 2.5),
];

/// Band for a raw score. Totals other than 40 are scaled to 40 first.
/// Writing has no automatic band.
pub fn band_score(modality: Modality, correct: u32, total: u32) -> Option<f32> {
  if total == 0 {
    return None;
  }
  let table = match modality {
    Modality::Listening => LISTENING_BANDS,
    Modality::Reading => READING_BANDS,
    Modality::Writing => return None,
  };
  let raw = if total == 40 {
    correct.min(40)
  } else {
    ((correct.min(total) as f64) * 40.0 / (total as f64)).round() as u32
  };
  Some(table.iter().find(|(min, _)| raw >= *min).map(|(_, band)| *band).unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{QuestionType, SubQuestion};

  fn short_answer_group(answers: &[(u32, &str)]) -> QuestionGroup {
    QuestionGroup {
      id: "g".into(),
      part_id: "p".into(),
      question_type: QuestionType::ShortAnswer,
      number: None,
      title: String::new(),
      instructions: String::new(),
      content_html: String::new(),
      image_url: None,
      max_choices: None,
      position: 0,
      sub_questions: answers
        .iter()
        .map(|(n, a)| SubQuestion { number: *n, text: String::new(), correct_answer: (*a).into(), explanation: format!("because {n}") })
        .collect(),
      options: vec![],
    }
  }

  #[test]
  fn grade_counts_correct_and_unanswered() {
    let g = short_answer_group(&[(1, "Paris"), (2, "London"), (3, "Rome")]);
    let mut answers = BTreeMap::new();
    answers.insert(1, " paris ".to_string());
    answers.insert(2, "Londres".to_string());

    let report = grade(Modality::Reading, &[g], &answers);
    assert_eq!(report.total, 3);
    assert_eq!(report.correct, 1);
    assert!(report.results[0].correct);
    assert!(!report.results[1].correct);
    assert_eq!(report.results[2].given, None);
    assert_eq!(report.results[2].explanation, "because 3");
  }

  #[test]
  fn band_tables_match_published_boundaries() {
    assert_eq!(band_score(Modality::Listening, 40, 40), Some(9.0));
    assert_eq!(band_score(Modality::Listening, 30, 40), Some(7.0));
    assert_eq!(band_score(Modality::Reading, 30, 40), Some(7.0));
    assert_eq!(band_score(Modality::Reading, 29, 40), Some(6.5));
    assert_eq!(band_score(Modality::Listening, 29, 40), Some(6.5));
    assert_eq!(band_score(Modality::Reading, 2, 40), Some(0.0));
  }

  #[test]
  fn band_scales_short_sections() {
    // 10/13 scales to 31/40
    assert_eq!(band_score(Modality::Reading, 10, 13), Some(7.0));
    assert_eq!(band_score(Modality::Writing, 10, 13), None);
    assert_eq!(band_score(Modality::Reading, 0, 0), None);
  }
}
