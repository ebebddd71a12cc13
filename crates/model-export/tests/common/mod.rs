use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use model_export::Config;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-process stand-in for the model hub's `/{repo}/resolve/{revision}/{file}` route.
pub struct MockHub {
    pub endpoint: String,
    hits: Arc<HubState>,
}

struct HubState {
    files: HashMap<String, Vec<u8>>,
    requests: AtomicUsize,
    /// `Authorization` header of each request, in arrival order
    authorization: Mutex<Vec<Option<String>>>,
    /// Answer every request with this status instead of serving files
    status: Option<StatusCode>,
}

impl MockHub {
    /// Serve every file under `model_dir` as `repo_id` at revision `main`.
    pub async fn serve(repo_id: &str, model_dir: &Path) -> Self {
        let mut files = HashMap::new();
        for relative in walk(model_dir, model_dir) {
            let bytes = std::fs::read(model_dir.join(&relative)).expect("Failed to read fixture file");
            files.insert(format!("{}/resolve/main/{}", repo_id, relative), bytes);
        }
        Self::start(files, None).await
    }

    /// A hub with no repositories at all.
    pub async fn empty() -> Self {
        Self::start(HashMap::new(), None).await
    }

    /// A hub that answers every request with `status`.
    pub async fn failing(status: StatusCode) -> Self {
        Self::start(HashMap::new(), Some(status)).await
    }

    async fn start(files: HashMap<String, Vec<u8>>, status: Option<StatusCode>) -> Self {
        let state = Arc::new(HubState {
            files,
            requests: AtomicUsize::new(0),
            authorization: Mutex::new(Vec::new()),
            status,
        });

        let app = Router::new()
            .route("/{*path}", get(resolve))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock hub");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            endpoint: format!("http://{}", addr),
            hits: state,
        }
    }

    /// Number of file requests served so far, including 404s.
    pub fn requests(&self) -> usize {
        self.hits.requests.load(Ordering::SeqCst)
    }

    /// `Authorization` headers received so far.
    pub fn authorization(&self) -> Vec<Option<String>> {
        self.hits.authorization.lock().unwrap().clone()
    }

    pub fn config(&self, cache_dir: &Path) -> Config {
        Config {
            endpoint: self.endpoint.clone(),
            revision: "main".to_string(),
            cache_dir: Some(cache_dir.to_path_buf()),
            token: None,
        }
    }
}

async fn resolve(
    State(state): State<Arc<HubState>>,
    UrlPath(path): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.authorization.lock().unwrap().push(authorization);

    if let Some(status) = state.status {
        return status.into_response();
    }
    match state.files.get(&path) {
        Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
        // The real hub answers 401 for repositories that do not exist
        None if !state.files.keys().any(|k| k.starts_with(repo_prefix(&path))) => {
            StatusCode::UNAUTHORIZED.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn repo_prefix(path: &str) -> &str {
    path.split("/resolve/").next().unwrap_or(path)
}

/// Relative paths of every file under `dir`.
fn walk(root: &Path, dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).expect("Failed to read fixture dir") {
        let path: PathBuf = entry.unwrap().path();
        if path.is_dir() {
            files.extend(walk(root, &path));
        } else {
            let relative = path.strip_prefix(root).unwrap();
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    files
}

/// Lines of a `model_info.txt` file.
pub fn info_lines(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join(model_export::MODEL_INFO_FILE))
        .expect("model_info.txt should exist")
        .lines()
        .map(str::to_string)
        .collect()
}
