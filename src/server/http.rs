//! HTTP endpoints for the web UI.

use super::error::ServerError;
use super::{ws, AppState};
use crate::commands::{apply_clean_where, CleanAction, GroupView};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

const INDEX_HTML: &str = include_str!("index.html");

/// Build the router with every endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/groups", get(list_groups))
        .route("/api/clean", post(clean_paths))
        .route("/api/image", get(serve_image))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

// ── Request / Response types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CleanRequest {
    pub paths: Vec<PathBuf>,
    /// Move into this folder instead of the trash.
    #[serde(default)]
    pub move_to: Option<PathBuf>,
    /// Delete instead of moving to the trash.
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanStatus {
    Moved,
    Trashed,
    Deleted,
    /// Already gone from disk; dropped from the database.
    NotFound,
    /// Not a Remove member of any group, so left alone.
    Skipped,
    Failed,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanResult {
    pub path: PathBuf,
    pub status: CleanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanResponse {
    pub results: Vec<CleanResult>,
    pub processed: usize,
    pub reclaimed_bytes: u64,
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub path: Option<PathBuf>,
}

// ── Handlers ────────────────────────────────────────────────────────

async fn index(State(state): State<AppState>) -> Html<&'static str> {
    state.activity.touch();
    Html(INDEX_HTML)
}

async fn list_groups(State(state): State<AppState>) -> Result<Response, ServerError> {
    state.activity.touch();
    let groups = state.storage.lock().await.get_duplicate_groups()?;
    let views: Vec<GroupView<'_>> = groups.iter().map(GroupView::from).collect();
    Ok(Json(views).into_response())
}

/// Cull the requested paths. Only Remove members are touched; a Keep member
/// or an unknown path comes back as `skipped`.
async fn clean_paths(
    State(state): State<AppState>,
    Json(req): Json<CleanRequest>,
) -> Result<Json<CleanResponse>, ServerError> {
    state.activity.touch();
    if req.paths.is_empty() {
        return Err(ServerError::BadRequest("paths must not be empty".into()));
    }
    let action = match (req.move_to, req.permanent) {
        (Some(_), true) => {
            return Err(ServerError::BadRequest(
                "move_to and permanent are mutually exclusive".into(),
            ));
        }
        (Some(dir), false) => CleanAction::MoveTo(dir),
        (None, true) => CleanAction::Delete,
        (None, false) => CleanAction::Trash,
    };
    if let CleanAction::MoveTo(dir) = &action {
        std::fs::create_dir_all(dir)?;
    }

    let storage = state.storage.lock().await;
    let groups = storage.get_duplicate_groups()?;
    let requested: HashSet<&Path> = req.paths.iter().map(PathBuf::as_path).collect();
    let removable: HashSet<&Path> = groups
        .iter()
        .flat_map(|group| group.remove())
        .map(|image| image.path.as_path())
        .collect();

    let report = apply_clean_where(&storage, &groups, &action, |image| {
        requested.contains(image.path.as_path())
    });
    state.history.append(&report.records)?;

    let culled: HashMap<&Path, Option<&PathBuf>> = report
        .records
        .iter()
        .flat_map(|record| &record.culled)
        .map(|file| (file.from.as_path(), file.to.as_ref()))
        .collect();
    let failures: HashMap<&Path, &str> = report
        .failures
        .iter()
        .map(|(path, reason)| (path.as_path(), reason.as_str()))
        .collect();
    let done_status = match action {
        CleanAction::Trash => CleanStatus::Trashed,
        CleanAction::Delete => CleanStatus::Deleted,
        CleanAction::MoveTo(_) => CleanStatus::Moved,
    };

    let mut results = Vec::with_capacity(req.paths.len());
    for path in &req.paths {
        let mut result = CleanResult {
            path: path.clone(),
            status: CleanStatus::Skipped,
            to: None,
            error: None,
        };
        if let Some(to) = culled.get(path.as_path()) {
            result.status = done_status;
            result.to = (*to).cloned();
        } else if let Some(reason) = failures.get(path.as_path()) {
            result.status = CleanStatus::Failed;
            result.error = Some((*reason).to_string());
        } else if removable.contains(path.as_path()) {
            // A Remove member that was not pending is missing on disk.
            storage.delete_image(path)?;
            result.status = CleanStatus::NotFound;
        }
        results.push(result);
    }

    Ok(Json(CleanResponse {
        results,
        processed: report.processed,
        reclaimed_bytes: report.reclaimed_bytes,
    }))
}

/// Raw bytes of an image the database knows about. Other paths are refused
/// so the endpoint cannot read arbitrary files.
async fn serve_image(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ServerError> {
    state.activity.touch();
    let Some(path) = query.path else {
        return Err(ServerError::BadRequest("path required".into()));
    };

    let known = state.storage.lock().await.get_image(&path)?.is_some();
    if !known {
        return Err(ServerError::NotFound(format!(
            "{} is not a scanned image",
            path.display()
        )));
    }

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            ServerError::NotFound(format!("{} no longer exists", path.display()))
        }
        _ => ServerError::Io(e),
    })?;
    let content_type = image::ImageFormat::from_path(&path)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::duplicate::tests::image;
    use crate::core::duplicate::{DuplicateGroup, DuplicateType};
    use crate::database::Storage;
    use crate::history::{CullAction, CullHistory};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt; // for oneshot

    /// State over an in-memory store holding one group of real files under
    /// `dir`: `keep.png` is the keeper, `dup1.png` and `dup2.png` are removable.
    fn state_with_group(dir: &Path) -> (AppState, Vec<PathBuf>) {
        let mut images = Vec::new();
        let mut paths = Vec::new();
        for (i, name) in ["keep.png", "dup1.png", "dup2.png"].iter().enumerate() {
            let path = dir.join(name);
            fs::write(&path, vec![1u8; 50 * (i + 1)]).unwrap();
            let mut info = image(path.to_str().unwrap(), 0);
            info.file_size = 50 * (i as u64 + 1);
            info.score = if i == 0 { 1e9 } else { 1.0 };
            images.push(info);
            paths.push(path);
        }
        let group = DuplicateGroup::new(1, DuplicateType::Similar, images).unwrap();

        let mut storage = Storage::open_in_memory().unwrap();
        storage.save_images(group.images()).unwrap();
        storage.update_groups(std::slice::from_ref(&group)).unwrap();

        let history = CullHistory::new(dir.join("cull-history.jsonl"));
        (AppState::new(storage, history), paths)
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap()
            .to_vec()
    }

    fn clean_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/clean")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_groups_endpoint() {
        let temp_dir = TempDir::new().unwrap();
        let (state, paths) = state_with_group(temp_dir.path());

        let req = Request::builder()
            .uri("/api/groups")
            .body(Body::empty())
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let groups: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(groups.as_array().unwrap().len(), 1);
        assert_eq!(groups[0]["id"], 1);
        assert_eq!(groups[0]["group_type"], "similar");
        assert_eq!(groups[0]["keep"]["path"], paths[0].to_str().unwrap());
        assert_eq!(groups[0]["remove"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clean_touches_only_remove_members() {
        let temp_dir = TempDir::new().unwrap();
        let (state, paths) = state_with_group(temp_dir.path());
        let dest = temp_dir.path().join("culled");
        fs::remove_file(&paths[2]).unwrap();

        let req = clean_request(serde_json::json!({
            "paths": [&paths[0], &paths[1], &paths[2], "/not/scanned.jpg"],
            "move_to": &dest,
        }));
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body: CleanResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        let statuses: Vec<CleanStatus> = body.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                CleanStatus::Skipped,
                CleanStatus::Moved,
                CleanStatus::NotFound,
                CleanStatus::Skipped,
            ]
        );
        assert_eq!(body.processed, 1);
        assert_eq!(body.results[1].to, Some(dest.join("dup1.png")));

        assert!(paths[0].exists());
        assert!(dest.join("dup1.png").exists());

        let storage = state.storage.lock().await;
        assert!(storage.get_image(&paths[0]).unwrap().is_some());
        assert!(storage.get_image(&paths[1]).unwrap().is_none());
        assert!(storage.get_image(&paths[2]).unwrap().is_none());

        let records = state.history.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, CullAction::Moved);
        assert_eq!(records[0].retained, paths[0]);
    }

    #[tokio::test]
    async fn test_clean_rejects_bad_requests() {
        let temp_dir = TempDir::new().unwrap();
        let (state, paths) = state_with_group(temp_dir.path());

        let empty = clean_request(serde_json::json!({ "paths": [] }));
        let resp = router(state.clone()).oneshot(empty).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let conflicting = clean_request(serde_json::json!({
            "paths": [&paths[1]],
            "move_to": temp_dir.path().join("x"),
            "permanent": true,
        }));
        let resp = router(state).oneshot(conflicting).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(paths[1].exists());
    }

    #[tokio::test]
    async fn test_image_endpoint_serves_only_scanned_files() {
        let temp_dir = TempDir::new().unwrap();
        let (state, paths) = state_with_group(temp_dir.path());

        let uri = format!("/api/image?path={}", paths[1].to_str().unwrap());
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(body_bytes(resp).await, vec![1u8; 100]);

        let stray = temp_dir.path().join("stray.png");
        fs::write(&stray, b"secret").unwrap();
        let uri = format!("/api/image?path={}", stray.to_str().unwrap());
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = Request::builder()
            .uri("/api/image")
            .body(Body::empty())
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_index_page() {
        let temp_dir = TempDir::new().unwrap();
        let (state, _) = state_with_group(temp_dir.path());

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let html = String::from_utf8(body_bytes(resp).await).unwrap();
        assert!(html.contains("/api/groups"));
    }
}
