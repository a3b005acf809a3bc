//! HTTP endpoint handlers. These are thin wrappers that forward to the store
//! and to core logic. Each handler is instrumented; errors map through `ApiError`.

use std::sync::Arc;
use axum::{
  extract::{Multipart, Path, Query, State},
  http::HeaderMap,
  response::IntoResponse,
  Json,
};
use tracing::{info, instrument};

use crate::assessor::EssayAssessment;
use crate::accessibility::DisplaySettings;
use crate::domain::{Part, QuestionGroup, Section, Test};
use crate::error::ApiError;
use crate::highlight::Highlight;
use crate::logic::*;
use crate::pagination::Page;
use crate::protocol::*;
use crate::session::{SessionEvent, SessionSnapshot};
use crate::state::AppState;
use crate::store::{PartDraft, QuestionGroupDraft, SectionDraft, TestDetail, TestDraft};
use crate::upload::{ProgressSteps, StoredFile, UploadKind};

type ApiResult<T> = Result<Json<T>, ApiError>;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut {
    ok: true,
    sessions: state.session_count().await,
    submissions: state.submissions.len().await,
  })
}

// ---- Tests ----

#[instrument(level = "info", skip(state))]
pub async fn http_list_tests(State(state): State<Arc<AppState>>, Query(q): Query<TestListQuery>) -> Json<Page<Test>> {
  Json(list_tests(&state, q).await)
}

#[instrument(level = "info", skip(state, body), fields(title = %body.title))]
pub async fn http_create_test(State(state): State<Arc<AppState>>, Json(body): Json<TestDraft>) -> ApiResult<Test> {
  Ok(Json(state.store.create_test(body).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_test(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Test> {
  Ok(Json(state.store.get_test(&id).await?))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_update_test(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<TestDraft>,
) -> ApiResult<Test> {
  Ok(Json(state.store.update_test(&id, body).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_test(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<DeletedOut> {
  state.store.delete_test(&id).await?;
  Ok(Json(DeletedOut { deleted: id }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_test_detail(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<TestDetail> {
  Ok(Json(state.store.load_test_detail(&id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_link_section(
  State(state): State<Arc<AppState>>,
  Path((id, section_id)): Path<(String, String)>,
) -> ApiResult<Section> {
  Ok(Json(state.store.link_section(&id, &section_id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_unlink_section(
  State(state): State<Arc<AppState>>,
  Path((id, section_id)): Path<(String, String)>,
) -> ApiResult<Section> {
  Ok(Json(state.store.unlink_section(&id, &section_id).await?))
}

// ---- Sections ----

#[instrument(level = "info", skip(state))]
pub async fn http_list_sections(State(state): State<Arc<AppState>>, Query(q): Query<SectionListQuery>) -> Json<Vec<Section>> {
  Json(state.store.list_sections(q.test_id.as_deref(), q.modality, q.unlinked).await)
}

#[instrument(level = "info", skip(state, body), fields(title = %body.title))]
pub async fn http_create_section(State(state): State<Arc<AppState>>, Json(body): Json<SectionDraft>) -> ApiResult<Section> {
  Ok(Json(state.store.create_section(body).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_section(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Section> {
  Ok(Json(state.store.get_section(&id).await?))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_update_section(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<SectionDraft>,
) -> ApiResult<Section> {
  Ok(Json(state.store.update_section(&id, body).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_section(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<DeletedOut> {
  state.store.delete_section(&id).await?;
  Ok(Json(DeletedOut { deleted: id }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_section_parts(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Vec<Part>> {
  Ok(Json(state.store.parts_for_section(&id).await?))
}

// ---- Parts ----

#[instrument(level = "info", skip(state, body), fields(section_id = %body.section_id, number = body.number))]
pub async fn http_create_part(State(state): State<Arc<AppState>>, Json(body): Json<PartDraft>) -> ApiResult<Part> {
  Ok(Json(state.store.create_part(body).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_part(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Part> {
  Ok(Json(state.store.get_part(&id).await?))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_update_part(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<PartDraft>,
) -> ApiResult<Part> {
  Ok(Json(state.store.update_part(&id, body).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_part(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<DeletedOut> {
  state.store.delete_part(&id).await?;
  Ok(Json(DeletedOut { deleted: id }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_part_questions(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Vec<QuestionGroup>> {
  Ok(Json(state.store.groups_for_part(&id).await?))
}

// ---- Question groups ----

#[instrument(level = "info", skip(state, body), fields(part_id = %body.part_id, question_type = %body.question_type))]
pub async fn http_create_group(State(state): State<Arc<AppState>>, Json(body): Json<QuestionGroupDraft>) -> ApiResult<QuestionGroup> {
  Ok(Json(state.store.create_group(body).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_group(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<QuestionGroup> {
  Ok(Json(state.store.get_group(&id).await?))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_update_group(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<QuestionGroupDraft>,
) -> ApiResult<QuestionGroup> {
  Ok(Json(state.store.update_group(&id, body).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_group(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<DeletedOut> {
  state.store.delete_group(&id).await?;
  Ok(Json(DeletedOut { deleted: id }))
}

// ---- Uploads ----

/// Multipart upload; the first field carrying a file name is stored.
/// `X-Upload-Size` (optional) is the declared file size.
#[instrument(level = "info", skip(state, headers, multipart))]
pub async fn http_upload(
  State(state): State<Arc<AppState>>,
  Path(kind): Path<String>,
  headers: HeaderMap,
  mut multipart: Multipart,
) -> ApiResult<StoredFile> {
  let kind = UploadKind::parse(&kind).ok_or_else(|| ApiError::BadRequest(format!("unknown upload kind '{kind}'")))?;
  let declared = headers
    .get("x-upload-size")
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.parse::<u64>().ok());

  while let Some(mut field) = multipart.next_field().await.map_err(|e| ApiError::BadRequest(e.to_string()))? {
    let Some(filename) = field.file_name().map(str::to_string) else {
      continue;
    };
    let content_type = field.content_type().map(str::to_string);
    let mut steps = ProgressSteps::default();
    let stored = state
      .uploads
      .save(kind, &filename, content_type.as_deref(), declared, &mut field, |p| {
        if let Some(percent) = steps.crossed(p) {
          info!(target: "upload", %filename, percent, received = p.received, "Upload progress");
        }
      })
      .await?;
    return Ok(Json(stored));
  }
  Err(ApiError::BadRequest("multipart body has no file field".into()))
}

// ---- Sessions ----

#[instrument(level = "info", skip(state, body), fields(section_id = %body.section_id))]
pub async fn http_start_session(State(state): State<Arc<AppState>>, Json(body): Json<StartSessionIn>) -> ApiResult<SessionOut> {
  let out = start_session(&state, body).await?;
  info!(target: "session", id = %out.session.id, "HTTP session started");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<SessionSnapshot> {
  Ok(Json(session_snapshot(&state, &id).await?))
}

#[instrument(level = "info", skip(state, event))]
pub async fn http_session_event(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(event): Json<SessionEvent>,
) -> ApiResult<SessionOut> {
  let (out, _) = apply_event(&state, &id, event).await?;
  Ok(Json(out))
}

#[instrument(level = "info", skip(state))]
pub async fn http_session_part(
  State(state): State<Arc<AppState>>,
  Path((id, index)): Path<(String, usize)>,
) -> ApiResult<PartView> {
  Ok(Json(render_part(&state, &id, index).await?))
}

#[instrument(level = "info", skip(state, body), fields(part_id = %body.part_id))]
pub async fn http_add_highlight(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<HighlightIn>,
) -> ApiResult<Highlight> {
  Ok(Json(add_highlight(&state, &id, body).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_remove_highlight(
  State(state): State<Arc<AppState>>,
  Path((id, hid)): Path<(String, String)>,
  Query(q): Query<PartQuery>,
) -> ApiResult<Highlight> {
  Ok(Json(remove_highlight(&state, &id, &q.part_id, q.group_id.as_deref(), &hid).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_save_settings(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<DisplaySettings>,
) -> ApiResult<SettingsOut> {
  Ok(Json(save_settings(&state, &id, body).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_session_report(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<ReportOut> {
  Ok(Json(session_report(&state, &id).await?))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_assess_writing(
  State(state): State<Arc<AppState>>,
  Path((id, part_id)): Path<(String, String)>,
  body: Option<Json<AssessIn>>,
) -> ApiResult<EssayAssessment> {
  let input = body.map(|Json(b)| b).unwrap_or_default();
  let a = assess_writing(&state, &id, &part_id, input).await?;
  info!(target: "session", session_id = %id, %part_id, band = ?a.band, words = a.word_count, "Writing assessed");
  Ok(Json(a))
}
