//! In-memory content store backing the Test Builder: tests, sections,
//! parts/tasks and question groups.
//!
//! All tables sit behind one `RwLock` so cascading deletes and cross-table
//! validation (question numbers unique within a section) see a consistent view.
//!
//! Sections can exist on their own and be linked to a test later. Deleting a
//! test deletes its linked sections, their parts and their question groups.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    Difficulty, Modality, Part, QuestionGroup, QuestionOption, QuestionType, Section, SubQuestion, Test, TestMode,
    TestStatus,
};
use crate::questions::{all_question_numbers, items};
use crate::session::PartOutline;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },
}

fn not_found(kind: &'static str, id: &str) -> StoreError {
    StoreError::NotFound { kind, id: id.to_string() }
}

fn invalid(kind: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::Invalid { kind, reason: reason.into() }
}

// ---- Drafts accepted by create/update ----

#[derive(Clone, Debug, Deserialize)]
pub struct TestDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: TestMode,
    #[serde(default)]
    pub status: TestStatus,
    #[serde(default)]
    pub category: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SectionDraft {
    #[serde(default)]
    pub test_id: Option<String>,
    pub modality: Modality,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub position: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PartDraft {
    pub section_id: String,
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub time_limit_minutes: u32,
    #[serde(default)]
    pub content_html: String,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub min_words: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct QuestionGroupDraft {
    pub part_id: String,
    /// Wire name; validated here so an unknown type is a 400, not a decode error.
    pub question_type: String,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub content_html: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub max_choices: Option<u32>,
    #[serde(default)]
    pub position: u32,
    #[serde(default)]
    pub sub_questions: Vec<SubQuestion>,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TestFilter {
    #[serde(default)]
    pub status: Option<TestStatus>,
    #[serde(default)]
    pub mode: Option<TestMode>,
    #[serde(default)]
    pub category: Option<String>,
    /// Case-insensitive title search.
    #[serde(default)]
    pub q: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SectionDetail {
    pub section: Section,
    pub parts: Vec<Part>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TestDetail {
    pub test: Test,
    pub readings: Vec<SectionDetail>,
    pub listenings: Vec<SectionDetail>,
    pub writings: Vec<SectionDetail>,
}

/// Everything a session needs about a section.
#[derive(Clone, Debug)]
pub struct SectionOutline {
    pub section: Section,
    pub test: Option<Test>,
    pub parts: Vec<Part>,
    pub outline: Vec<PartOutline>,
}

#[derive(Default)]
struct Tables {
    tests: HashMap<String, Test>,
    sections: HashMap<String, Section>,
    parts: HashMap<String, Part>,
    groups: HashMap<String, QuestionGroup>,
}

impl Tables {
    fn parts_of(&self, section_id: &str) -> Vec<Part> {
        let mut v: Vec<Part> = self.parts.values().filter(|p| p.section_id == section_id).cloned().collect();
        v.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.id.cmp(&b.id)));
        v
    }

    fn groups_of(&self, part_id: &str) -> Vec<QuestionGroup> {
        let mut v: Vec<QuestionGroup> = self.groups.values().filter(|g| g.part_id == part_id).cloned().collect();
        v.sort_by_key(|g| (g.position, items(g).first().map(|i| i.number).unwrap_or(0)));
        v
    }

    fn remove_part_cascade(&mut self, part_id: &str) {
        self.parts.remove(part_id);
        self.groups.retain(|_, g| g.part_id != part_id);
    }

    fn remove_section_cascade(&mut self, section_id: &str) {
        self.sections.remove(section_id);
        let part_ids: Vec<String> =
            self.parts.values().filter(|p| p.section_id == section_id).map(|p| p.id.clone()).collect();
        for pid in part_ids {
            self.remove_part_cascade(&pid);
        }
    }

    /// Question numbers used by other groups of the same section.
    fn numbers_taken(&self, section_id: &str, except_group: Option<&str>) -> HashSet<u32> {
        let part_ids: HashSet<&str> = self
            .parts
            .values()
            .filter(|p| p.section_id == section_id)
            .map(|p| p.id.as_str())
            .collect();
        self.groups
            .values()
            .filter(|g| part_ids.contains(g.part_id.as_str()) && Some(g.id.as_str()) != except_group)
            .flat_map(|g| items(g).into_iter().map(|i| i.number))
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct ContentStore {
    inner: Arc<RwLock<Tables>>,
}

fn require_title(kind: &'static str, title: &str) -> Result<String, StoreError> {
    let t = title.trim();
    if t.is_empty() {
        return Err(invalid(kind, "title must not be empty"));
    }
    Ok(t.to_string())
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- Tests ----

    #[instrument(level = "debug", skip(self, d), fields(title = %d.title))]
    pub async fn create_test(&self, d: TestDraft) -> Result<Test, StoreError> {
        let t = Test {
            id: Uuid::new_v4().to_string(),
            title: require_title("test", &d.title)?,
            description: d.description,
            mode: d.mode,
            status: d.status,
            category: d.category.trim().to_string(),
        };
        self.inner.write().await.tests.insert(t.id.clone(), t.clone());
        info!(target: "content", id = %t.id, title = %t.title, "Test created");
        Ok(t)
    }

    pub async fn get_test(&self, id: &str) -> Result<Test, StoreError> {
        self.inner.read().await.tests.get(id).cloned().ok_or_else(|| not_found("test", id))
    }

    pub async fn update_test(&self, id: &str, d: TestDraft) -> Result<Test, StoreError> {
        let title = require_title("test", &d.title)?;
        let mut tables = self.inner.write().await;
        let t = tables.tests.get_mut(id).ok_or_else(|| not_found("test", id))?;
        t.title = title;
        t.description = d.description;
        t.mode = d.mode;
        t.status = d.status;
        t.category = d.category.trim().to_string();
        Ok(t.clone())
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn delete_test(&self, id: &str) -> Result<(), StoreError> {
        let mut tables = self.inner.write().await;
        tables.tests.remove(id).ok_or_else(|| not_found("test", id))?;
        let section_ids: Vec<String> = tables
            .sections
            .values()
            .filter(|s| s.test_id.as_deref() == Some(id))
            .map(|s| s.id.clone())
            .collect();
        for sid in &section_ids {
            tables.remove_section_cascade(sid);
        }
        info!(target: "content", %id, sections = section_ids.len(), "Test deleted");
        Ok(())
    }

    /// Filtered tests ordered by title. Pagination is applied by the caller.
    pub async fn list_tests(&self, f: &TestFilter) -> Vec<Test> {
        let q = f.q.as_deref().map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
        let category = f.category.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let tables = self.inner.read().await;
        let mut v: Vec<Test> = tables
            .tests
            .values()
            .filter(|t| f.status.map_or(true, |s| t.status == s))
            .filter(|t| f.mode.map_or(true, |m| t.mode == m))
            .filter(|t| category.map_or(true, |c| t.category.eq_ignore_ascii_case(c)))
            .filter(|t| q.as_deref().map_or(true, |q| t.title.to_lowercase().contains(q)))
            .cloned()
            .collect();
        v.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()).then_with(|| a.id.cmp(&b.id)));
        v
    }

    // ---- Sections ----

    pub async fn create_section(&self, d: SectionDraft) -> Result<Section, StoreError> {
        let title = require_title("section", &d.title)?;
        let mut tables = self.inner.write().await;
        if let Some(tid) = &d.test_id {
            if !tables.tests.contains_key(tid) {
                return Err(not_found("test", tid));
            }
        }
        let s = Section {
            id: Uuid::new_v4().to_string(),
            test_id: d.test_id,
            modality: d.modality,
            title,
            description: d.description,
            position: d.position,
        };
        tables.sections.insert(s.id.clone(), s.clone());
        info!(target: "content", id = %s.id, modality = s.modality.as_str(), "Section created");
        Ok(s)
    }

    pub async fn get_section(&self, id: &str) -> Result<Section, StoreError> {
        self.inner.read().await.sections.get(id).cloned().ok_or_else(|| not_found("section", id))
    }

    /// Updates title/description/position. Modality is fixed once parts exist.
    pub async fn update_section(&self, id: &str, d: SectionDraft) -> Result<Section, StoreError> {
        let title = require_title("section", &d.title)?;
        let mut tables = self.inner.write().await;
        if let Some(tid) = &d.test_id {
            if !tables.tests.contains_key(tid) {
                return Err(not_found("test", tid));
            }
        }
        let has_parts = tables.parts.values().any(|p| p.section_id == id);
        let s = tables.sections.get_mut(id).ok_or_else(|| not_found("section", id))?;
        if has_parts && s.modality != d.modality {
            return Err(invalid("section", "cannot change modality of a section that has parts"));
        }
        s.test_id = d.test_id;
        s.modality = d.modality;
        s.title = title;
        s.description = d.description;
        s.position = d.position;
        Ok(s.clone())
    }

    pub async fn delete_section(&self, id: &str) -> Result<(), StoreError> {
        let mut tables = self.inner.write().await;
        if !tables.sections.contains_key(id) {
            return Err(not_found("section", id));
        }
        tables.remove_section_cascade(id);
        info!(target: "content", %id, "Section deleted");
        Ok(())
    }

    /// Sections filtered by owning test and/or modality; `unlinked` lists only
    /// sections not attached to any test (the linking picker).
    pub async fn list_sections(&self, test_id: Option<&str>, modality: Option<Modality>, unlinked: bool) -> Vec<Section> {
        let tables = self.inner.read().await;
        let mut v: Vec<Section> = tables
            .sections
            .values()
            .filter(|s| test_id.map_or(true, |t| s.test_id.as_deref() == Some(t)))
            .filter(|s| modality.map_or(true, |m| s.modality == m))
            .filter(|s| !unlinked || s.test_id.is_none())
            .cloned()
            .collect();
        v.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.title.cmp(&b.title)));
        v
    }

    pub async fn link_section(&self, test_id: &str, section_id: &str) -> Result<Section, StoreError> {
        let mut tables = self.inner.write().await;
        if !tables.tests.contains_key(test_id) {
            return Err(not_found("test", test_id));
        }
        let s = tables.sections.get_mut(section_id).ok_or_else(|| not_found("section", section_id))?;
        match s.test_id.as_deref() {
            Some(other) if other != test_id => {
                return Err(invalid("section", format!("already linked to test {other}")));
            }
            _ => s.test_id = Some(test_id.to_string()),
        }
        info!(target: "content", %test_id, %section_id, "Section linked");
        Ok(s.clone())
    }

    pub async fn unlink_section(&self, test_id: &str, section_id: &str) -> Result<Section, StoreError> {
        let mut tables = self.inner.write().await;
        let s = tables.sections.get_mut(section_id).ok_or_else(|| not_found("section", section_id))?;
        if s.test_id.as_deref() != Some(test_id) {
            return Err(invalid("section", format!("not linked to test {test_id}")));
        }
        s.test_id = None;
        info!(target: "content", %test_id, %section_id, "Section unlinked");
        Ok(s.clone())
    }

    /// Sections of one modality for a test, with their parts.
    pub async fn sections_with_parts(&self, test_id: &str, modality: Modality) -> Result<Vec<SectionDetail>, StoreError> {
        let tables = self.inner.read().await;
        if !tables.tests.contains_key(test_id) {
            return Err(not_found("test", test_id));
        }
        let mut sections: Vec<&Section> = tables
            .sections
            .values()
            .filter(|s| s.test_id.as_deref() == Some(test_id) && s.modality == modality)
            .collect();
        sections.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.title.cmp(&b.title)));
        Ok(sections
            .into_iter()
            .map(|s| SectionDetail { section: s.clone(), parts: tables.parts_of(&s.id) })
            .collect())
    }

    /// Load a test with its reading/listening/writing sections. The three
    /// loads run concurrently; a failing one is logged and comes back empty.
    #[instrument(level = "info", skip(self))]
    pub async fn load_test_detail(&self, test_id: &str) -> Result<TestDetail, StoreError> {
        let test = self.get_test(test_id).await?;
        let (readings, listenings, writings) = tokio::join!(
            self.sections_with_parts(test_id, Modality::Reading),
            self.sections_with_parts(test_id, Modality::Listening),
            self.sections_with_parts(test_id, Modality::Writing),
        );
        let or_empty = |modality: Modality, r: Result<Vec<SectionDetail>, StoreError>| {
            r.unwrap_or_else(|e| {
                warn!(target: "content", %test_id, modality = modality.as_str(), error = %e, "Section load failed; showing none");
                Vec::new()
            })
        };
        Ok(TestDetail {
            test,
            readings: or_empty(Modality::Reading, readings),
            listenings: or_empty(Modality::Listening, listenings),
            writings: or_empty(Modality::Writing, writings),
        })
    }

    // ---- Parts ----

    pub async fn create_part(&self, d: PartDraft) -> Result<Part, StoreError> {
        let title = require_title("part", &d.title)?;
        let mut tables = self.inner.write().await;
        let modality = tables
            .sections
            .get(&d.section_id)
            .map(|s| s.modality)
            .ok_or_else(|| not_found("section", &d.section_id))?;
        let p = build_part(Uuid::new_v4().to_string(), modality, title, d)?;
        tables.parts.insert(p.id.clone(), p.clone());
        info!(target: "content", id = %p.id, section_id = %p.section_id, number = p.number, "Part created");
        Ok(p)
    }

    pub async fn get_part(&self, id: &str) -> Result<Part, StoreError> {
        self.inner.read().await.parts.get(id).cloned().ok_or_else(|| not_found("part", id))
    }

    pub async fn update_part(&self, id: &str, d: PartDraft) -> Result<Part, StoreError> {
        let title = require_title("part", &d.title)?;
        let mut tables = self.inner.write().await;
        let current = tables.parts.get(id).ok_or_else(|| not_found("part", id))?;
        if current.section_id != d.section_id {
            return Err(invalid("part", "parts cannot move between sections"));
        }
        let p = build_part(id.to_string(), current.modality, title, d)?;
        tables.parts.insert(p.id.clone(), p.clone());
        Ok(p)
    }

    pub async fn delete_part(&self, id: &str) -> Result<(), StoreError> {
        let mut tables = self.inner.write().await;
        if !tables.parts.contains_key(id) {
            return Err(not_found("part", id));
        }
        tables.remove_part_cascade(id);
        info!(target: "content", %id, "Part deleted");
        Ok(())
    }

    pub async fn parts_for_section(&self, section_id: &str) -> Result<Vec<Part>, StoreError> {
        let tables = self.inner.read().await;
        if !tables.sections.contains_key(section_id) {
            return Err(not_found("section", section_id));
        }
        Ok(tables.parts_of(section_id))
    }

    // ---- Question groups ----

    pub async fn create_group(&self, d: QuestionGroupDraft) -> Result<QuestionGroup, StoreError> {
        let mut tables = self.inner.write().await;
        let g = validate_group(&tables, Uuid::new_v4().to_string(), d, None)?;
        tables.groups.insert(g.id.clone(), g.clone());
        info!(target: "content", id = %g.id, part_id = %g.part_id, question_type = g.question_type.as_str(), "Question group created");
        Ok(g)
    }

    pub async fn get_group(&self, id: &str) -> Result<QuestionGroup, StoreError> {
        self.inner.read().await.groups.get(id).cloned().ok_or_else(|| not_found("question group", id))
    }

    pub async fn update_group(&self, id: &str, d: QuestionGroupDraft) -> Result<QuestionGroup, StoreError> {
        let mut tables = self.inner.write().await;
        if !tables.groups.contains_key(id) {
            return Err(not_found("question group", id));
        }
        let g = validate_group(&tables, id.to_string(), d, Some(id))?;
        tables.groups.insert(g.id.clone(), g.clone());
        Ok(g)
    }

    pub async fn delete_group(&self, id: &str) -> Result<(), StoreError> {
        let mut tables = self.inner.write().await;
        tables.groups.remove(id).ok_or_else(|| not_found("question group", id))?;
        Ok(())
    }

    pub async fn groups_for_part(&self, part_id: &str) -> Result<Vec<QuestionGroup>, StoreError> {
        let tables = self.inner.read().await;
        if !tables.parts.contains_key(part_id) {
            return Err(not_found("part", part_id));
        }
        Ok(tables.groups_of(part_id))
    }

    /// All groups of a section in part order (for grading).
    pub async fn groups_for_section(&self, section_id: &str) -> Result<Vec<QuestionGroup>, StoreError> {
        let tables = self.inner.read().await;
        if !tables.sections.contains_key(section_id) {
            return Err(not_found("section", section_id));
        }
        Ok(tables.parts_of(section_id).iter().flat_map(|p| tables.groups_of(&p.id)).collect())
    }

    /// Section, owning test, parts and per-part question numbers for a session.
    pub async fn outline(&self, section_id: &str) -> Result<SectionOutline, StoreError> {
        let tables = self.inner.read().await;
        let section = tables.sections.get(section_id).cloned().ok_or_else(|| not_found("section", section_id))?;
        let test = section.test_id.as_ref().and_then(|t| tables.tests.get(t)).cloned();
        let parts = tables.parts_of(section_id);
        let outline = parts
            .iter()
            .map(|p| PartOutline {
                part_id: p.id.clone(),
                title: p.title.clone(),
                question_numbers: all_question_numbers(&tables.groups_of(&p.id)),
            })
            .collect();
        Ok(SectionOutline { section, test, parts, outline })
    }
}

fn build_part(id: String, modality: Modality, title: String, d: PartDraft) -> Result<Part, StoreError> {
    if d.number == 0 {
        return Err(invalid("part", "number must start at 1"));
    }
    if modality == Modality::Writing && d.audio_url.is_some() {
        return Err(invalid("part", "writing tasks do not take audio"));
    }
    Ok(Part {
        id,
        section_id: d.section_id,
        modality,
        number: d.number,
        title,
        instructions: d.instructions,
        difficulty: d.difficulty,
        time_limit_minutes: d.time_limit_minutes,
        content_html: d.content_html,
        audio_url: d.audio_url.filter(|u| !u.trim().is_empty()),
        image_url: d.image_url.filter(|u| !u.trim().is_empty()),
        min_words: if modality == Modality::Writing { d.min_words } else { None },
    })
}

fn validate_group(
    tables: &Tables,
    id: String,
    d: QuestionGroupDraft,
    except: Option<&str>,
) -> Result<QuestionGroup, StoreError> {
    const KIND: &str = "question group";
    let question_type =
        QuestionType::parse(&d.question_type).ok_or_else(|| invalid(KIND, format!("unknown type '{}'", d.question_type)))?;
    let part = tables.parts.get(&d.part_id).ok_or_else(|| not_found("part", &d.part_id))?;
    if part.modality == Modality::Writing {
        return Err(invalid(KIND, "writing tasks have no question groups"));
    }

    let mut numbers = HashSet::new();
    for s in &d.sub_questions {
        if s.number == 0 {
            return Err(invalid(KIND, "question numbers start at 1"));
        }
        if !numbers.insert(s.number) {
            return Err(invalid(KIND, format!("duplicate question number {}", s.number)));
        }
    }
    if d.sub_questions.is_empty() {
        match d.number {
            Some(n) if n > 0 => {
                numbers.insert(n);
            }
            _ => return Err(invalid(KIND, "needs sub-questions or a question number")),
        }
    }

    let mut keys = HashSet::new();
    for o in &d.options {
        let k = o.key.trim();
        if k.is_empty() {
            return Err(invalid(KIND, "option key must not be empty"));
        }
        if !keys.insert(k.to_ascii_uppercase()) {
            return Err(invalid(KIND, format!("duplicate option key {k}")));
        }
    }

    let taken = tables.numbers_taken(&part.section_id, except);
    let mut clash: Vec<u32> = numbers.intersection(&taken).copied().collect();
    if !clash.is_empty() {
        clash.sort_unstable();
        return Err(invalid(KIND, format!("question numbers already used in this section: {clash:?}")));
    }

    Ok(QuestionGroup {
        id,
        part_id: d.part_id,
        question_type,
        number: d.number,
        title: d.title,
        instructions: d.instructions,
        content_html: d.content_html,
        image_url: d.image_url,
        max_choices: d.max_choices,
        position: d.position,
        sub_questions: d.sub_questions,
        options: d.options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_draft(title: &str) -> TestDraft {
        TestDraft {
            title: title.into(),
            description: String::new(),
            mode: TestMode::Practice,
            status: TestStatus::Draft,
            category: "academic".into(),
        }
    }

    fn section_draft(test_id: Option<&str>, modality: Modality) -> SectionDraft {
        SectionDraft { test_id: test_id.map(str::to_string), modality, title: "Section".into(), description: String::new(), position: 0 }
    }

    fn part_draft(section_id: &str, number: u32) -> PartDraft {
        PartDraft {
            section_id: section_id.into(),
            number,
            title: format!("Part {number}"),
            instructions: String::new(),
            difficulty: Difficulty::Medium,
            time_limit_minutes: 20,
            content_html: "<p>text</p>".into(),
            audio_url: None,
            image_url: None,
            min_words: None,
        }
    }

    fn group_draft(part_id: &str, t: &str, numbers: &[u32]) -> QuestionGroupDraft {
        QuestionGroupDraft {
            part_id: part_id.into(),
            question_type: t.into(),
            number: None,
            title: String::new(),
            instructions: String::new(),
            content_html: String::new(),
            image_url: None,
            max_choices: None,
            position: 0,
            sub_questions: numbers
                .iter()
                .map(|n| SubQuestion { number: *n, text: String::new(), correct_answer: "x".into(), explanation: String::new() })
                .collect(),
            options: vec![],
        }
    }

    #[tokio::test]
    async fn create_validates_titles() {
        let store = ContentStore::new();
        let err = store.create_test(test_draft("  ")).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { kind: "test", .. }));
    }

    #[tokio::test]
    async fn list_filters_and_sorts() {
        let store = ContentStore::new();
        store.create_test(test_draft("Cambridge 18 Test 2")).await.unwrap();
        let mut d = test_draft("academic mock");
        d.mode = TestMode::Mock;
        d.status = TestStatus::Published;
        store.create_test(d).await.unwrap();
        store.create_test(test_draft("Cambridge 18 Test 1")).await.unwrap();

        let all = store.list_tests(&TestFilter::default()).await;
        let titles: Vec<_> = all.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["academic mock", "Cambridge 18 Test 1", "Cambridge 18 Test 2"]);

        let mocks = store.list_tests(&TestFilter { mode: Some(TestMode::Mock), ..Default::default() }).await;
        assert_eq!(mocks.len(), 1);
        let search = store.list_tests(&TestFilter { q: Some("cambridge".into()), ..Default::default() }).await;
        assert_eq!(search.len(), 2);
        let published = store.list_tests(&TestFilter { status: Some(TestStatus::Published), ..Default::default() }).await;
        assert_eq!(published[0].title, "academic mock");
    }

    #[tokio::test]
    async fn delete_test_cascades() {
        let store = ContentStore::new();
        let t = store.create_test(test_draft("T")).await.unwrap();
        let s = store.create_section(section_draft(Some(&t.id), Modality::Reading)).await.unwrap();
        let p = store.create_part(part_draft(&s.id, 1)).await.unwrap();
        let g = store.create_group(group_draft(&p.id, "short_answer", &[1, 2])).await.unwrap();
        let loose = store.create_section(section_draft(None, Modality::Reading)).await.unwrap();

        store.delete_test(&t.id).await.unwrap();
        assert!(store.get_section(&s.id).await.is_err());
        assert!(store.get_part(&p.id).await.is_err());
        assert!(store.get_group(&g.id).await.is_err());
        assert!(store.get_section(&loose.id).await.is_ok());
        assert_eq!(store.delete_test(&t.id).await, Err(StoreError::NotFound { kind: "test", id: t.id.clone() }));
    }

    #[tokio::test]
    async fn link_and_unlink_sections() {
        let store = ContentStore::new();
        let a = store.create_test(test_draft("A")).await.unwrap();
        let b = store.create_test(test_draft("B")).await.unwrap();
        let s = store.create_section(section_draft(None, Modality::Listening)).await.unwrap();
        assert_eq!(store.list_sections(None, None, true).await.len(), 1);

        store.link_section(&a.id, &s.id).await.unwrap();
        assert!(store.list_sections(None, None, true).await.is_empty());
        assert!(matches!(store.link_section(&b.id, &s.id).await, Err(StoreError::Invalid { .. })));
        assert!(matches!(store.unlink_section(&b.id, &s.id).await, Err(StoreError::Invalid { .. })));
        let s = store.unlink_section(&a.id, &s.id).await.unwrap();
        assert!(s.test_id.is_none());
    }

    #[tokio::test]
    async fn group_validation_rules() {
        let store = ContentStore::new();
        let s = store.create_section(section_draft(None, Modality::Reading)).await.unwrap();
        let p1 = store.create_part(part_draft(&s.id, 1)).await.unwrap();
        let p2 = store.create_part(part_draft(&s.id, 2)).await.unwrap();

        let err = store.create_group(group_draft(&p1.id, "essay", &[1])).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { ref reason, .. } if reason.contains("unknown type")));
        assert!(store.create_group(group_draft(&p1.id, "short_answer", &[1, 1])).await.is_err());
        assert!(store.create_group(group_draft(&p1.id, "short_answer", &[])).await.is_err());

        let g = store.create_group(group_draft(&p1.id, "short_answer", &[1, 2, 3])).await.unwrap();
        // numbers are unique per section, across parts
        let err = store.create_group(group_draft(&p2.id, "note_completion", &[3, 4])).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { ref reason, .. } if reason.contains("[3]")));
        // updating a group may keep its own numbers
        store.update_group(&g.id, group_draft(&p1.id, "sentence_completion", &[1, 2, 3])).await.unwrap();

        let mut dup_opts = group_draft(&p2.id, "matching_headings", &[14]);
        dup_opts.options = vec![
            QuestionOption { key: "i".into(), text: "a".into(), is_correct: false, order: 0 },
            QuestionOption { key: "I".into(), text: "b".into(), is_correct: false, order: 1 },
        ];
        assert!(store.create_group(dup_opts).await.is_err());
    }

    #[tokio::test]
    async fn writing_parts_reject_groups_and_audio() {
        let store = ContentStore::new();
        let s = store.create_section(section_draft(None, Modality::Writing)).await.unwrap();
        let mut bad = part_draft(&s.id, 1);
        bad.audio_url = Some("a.mp3".into());
        assert!(store.create_part(bad).await.is_err());

        let mut task = part_draft(&s.id, 1);
        task.min_words = Some(150);
        let p = store.create_part(task).await.unwrap();
        assert_eq!(p.min_words, Some(150));
        assert!(store.create_group(group_draft(&p.id, "short_answer", &[1])).await.is_err());
    }

    #[tokio::test]
    async fn outline_sorts_parts_and_numbers() {
        let store = ContentStore::new();
        let s = store.create_section(section_draft(None, Modality::Reading)).await.unwrap();
        let p2 = store.create_part(part_draft(&s.id, 2)).await.unwrap();
        let p1 = store.create_part(part_draft(&s.id, 1)).await.unwrap();
        store.create_group(group_draft(&p2.id, "short_answer", &[15, 14])).await.unwrap();
        store.create_group(group_draft(&p1.id, "true_false_not_given", &[3, 1, 2])).await.unwrap();

        let o = store.outline(&s.id).await.unwrap();
        assert_eq!(o.outline[0].part_id, p1.id);
        assert_eq!(o.outline[0].question_numbers, vec![1, 2, 3]);
        assert_eq!(o.outline[1].question_numbers, vec![14, 15]);
        assert_eq!(store.groups_for_section(&s.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_detail_groups_sections_by_modality() {
        let store = ContentStore::new();
        let t = store.create_test(test_draft("T")).await.unwrap();
        let r = store.create_section(section_draft(Some(&t.id), Modality::Reading)).await.unwrap();
        store.create_part(part_draft(&r.id, 1)).await.unwrap();
        store.create_section(section_draft(Some(&t.id), Modality::Writing)).await.unwrap();

        let d = store.load_test_detail(&t.id).await.unwrap();
        assert_eq!(d.readings.len(), 1);
        assert_eq!(d.readings[0].parts.len(), 1);
        assert!(d.listenings.is_empty());
        assert_eq!(d.writings.len(), 1);
        assert!(store.load_test_detail("missing").await.is_err());
    }
}
