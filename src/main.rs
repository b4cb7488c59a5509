use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    BoxError, Router,
};
use caruso::adapters::drawtext::FfmpegOverlayRenderer;
use caruso::adapters::ffmpeg::FfmpegMedia;
use caruso::adapters::fs_jobs::FsJobStore;
use caruso::adapters::whisper::WhisperCliFactory;
use caruso::application::compositing::CompositingPipeline;
use caruso::application::scheduler::{ArtifactError, SubmitError, WorkerScheduler};
use caruso::application::transcription::TranscriptionPipeline;
use caruso::config::Config;
use caruso::domain::jobs::JobPayload;
use caruso::ports::repository::{JobStore, StoreError};
use caruso::resources::model_pool::ModelPool;
use caruso::resources::monitor::ResourceMonitor;
use caruso::resources::policy::worker_count;
use dotenv::dotenv;
use futures::{Stream, TryStreamExt};
use serde::Deserialize;
use serde_json::json;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::{fs::File, io::BufWriter};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::info;

type Scheduler = WorkerScheduler<FfmpegMedia, FfmpegOverlayRenderer>;

#[derive(Clone)]
struct AppState {
    scheduler: Arc<Scheduler>,
    monitor: Arc<ResourceMonitor>,
    upload_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    for dir in [&config.output_dir, &config.upload_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .expect("Failed to create working directory");
    }

    let monitor = Arc::new(ResourceMonitor::new(config.thresholds));
    monitor.spawn_background(Duration::from_secs(config.monitor_interval_secs));

    let factory = Arc::new(WhisperCliFactory::new(&config.whisper_bin, &config.model_dir));
    let pool = Arc::new(ModelPool::new(factory, config.unload_model_after_use));
    monitor.register_reclaimer(pool.clone());

    let store: Arc<dyn JobStore> = Arc::new(
        FsJobStore::open(&config.jobs_dir)
            .await
            .expect("Failed to open job store"),
    );

    let media = Arc::new(FfmpegMedia::new());
    let renderer = Arc::new(FfmpegOverlayRenderer::new());
    let transcription = TranscriptionPipeline::new(
        Arc::clone(&media),
        pool,
        Arc::clone(&monitor),
        config.policy(),
        config.chunk_failure,
    );
    let compositing =
        CompositingPipeline::new(Arc::clone(&media), renderer, Arc::clone(&monitor));

    let workers = config.workers_override.unwrap_or_else(|| {
        worker_count(monitor.total_memory_bytes(), monitor.physical_cores())
    });
    info!(workers, "starting worker pool");

    let scheduler = Arc::new(Scheduler::start(
        store,
        transcription,
        compositing,
        media,
        config.output_dir.clone(),
        workers,
    ));

    let state = AppState {
        scheduler,
        monitor,
        upload_dir: config.upload_dir.clone(),
    };

    let app = Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/artifacts/:name", get(download_artifact))
        .route("/upload", post(upload_media))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::disable())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.addr, config.port))
        .await
        .expect("Failed to bind TCP listener");
    info!(addr = %config.addr, port = %config.port, "listening");
    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}

async fn create_job(
    State(state): State<AppState>,
    Json(payload): Json<JobPayload>,
) -> Result<(StatusCode, Json<caruso::domain::jobs::Job>), (StatusCode, String)> {
    match state.scheduler.submit(payload).await {
        Ok(job) => Ok((StatusCode::ACCEPTED, Json(job))),
        Err(SubmitError::InvalidPayload(reason)) => Err((StatusCode::BAD_REQUEST, reason)),
        Err(SubmitError::Store(StoreError::DuplicateJob(id))) => {
            Err((StatusCode::CONFLICT, format!("job {} already exists", id)))
        }
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<caruso::domain::jobs::Job>>, (StatusCode, String)> {
    state
        .scheduler
        .list(params.limit)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<caruso::domain::jobs::Job>, (StatusCode, String)> {
    match state.scheduler.status(&id).await {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("job {} not found", id))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn download_artifact(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, (StatusCode, String)> {
    let path = state.scheduler.artifact(&id, &name).await.map_err(|e| {
        let status = match &e {
            ArtifactError::UnknownJob
            | ArtifactError::UnknownArtifact(_)
            | ArtifactError::Missing(_) => StatusCode::NOT_FOUND,
            ArtifactError::NotCompleted(_) => StatusCode::CONFLICT,
            ArtifactError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, e.to_string())
    })?;

    let file = File::open(&path)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| name.clone());

    let body = Body::from_stream(ReaderStream::new(file));
    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        )
        .body(body)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.monitor.snapshot();
    let level = state.monitor.observe(&snapshot);
    let stats = state.monitor.stats();

    Json(json!({
        "status": "ok",
        "pressure": format!("{:?}", level).to_lowercase(),
        "memory_used_fraction": snapshot.memory_used_fraction,
        "memory_available_bytes": snapshot.memory_available_bytes,
        "cpu_used_fraction": snapshot.cpu_used_fraction,
        "peak_memory_fraction": stats.peak_memory_fraction,
        "average_cpu_fraction": stats.average_cpu_fraction,
        "samples": stats.samples,
    }))
}

// Handler that accepts a multipart form upload and streams each field to a
// file under the upload directory. Returns the stored paths so a job
// submission can reference them.
async fn upload_media(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut saved = Vec::new();

    while let Ok(Some(field)) = multipart.next_field().await {
        let file_name = if let Some(file_name) = field.file_name() {
            file_name.to_owned()
        } else {
            continue;
        };

        if !path_is_valid(&PathBuf::from(&file_name)) {
            return Err((StatusCode::BAD_REQUEST, "Invalid file name".to_owned()));
        }

        let path = state.upload_dir.join(&file_name);
        info!(path = %path.display(), "saving upload");
        stream_to_file(&path, field).await?;
        saved.push(path);
    }

    Ok((StatusCode::CREATED, Json(json!({ "files": saved }))))
}

// Save a `Stream` to a file
async fn stream_to_file<S, E>(path: &PathBuf, stream: S) -> Result<(), (StatusCode, String)>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    async {
        let body_with_io_error = stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        let body_reader = StreamReader::new(body_with_io_error);
        futures::pin_mut!(body_reader);

        let mut file = BufWriter::new(File::create(path).await?);
        tokio::io::copy(&mut body_reader, &mut file).await?;

        Ok::<_, io::Error>(())
    }
    .await
    .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}

// An uploaded file name must be a single path component: no separators, no
// parent references, nothing absolute.
fn path_is_valid(path: &PathBuf) -> bool {
    let mut components = path.components();
    let Some(first) = components.next() else {
        return false;
    };
    components.next().is_none() && matches!(first, std::path::Component::Normal(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_stream_to_file() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("test_file.txt");

        type E = std::io::Error;

        let test_data = "Hello, world!";
        let mock_stream = stream::iter(vec![Ok::<Bytes, E>(Bytes::from(test_data))]);

        let result = stream_to_file(&file_path, mock_stream).await;
        assert!(result.is_ok());

        let file_contents = fs::read_to_string(file_path).unwrap();
        assert_eq!(file_contents, test_data);
    }

    #[tokio::test]
    async fn test_stream_to_file_error() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("test_file.txt");

        let mock_stream = stream::iter(vec![Err("Test error")]);

        let result = stream_to_file(&file_path, mock_stream).await;
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err(),
            (StatusCode::INTERNAL_SERVER_ERROR, "Test error".to_string())
        );
    }

    #[test]
    fn test_valid_path() {
        let valid_path = PathBuf::from("valid_file.mp4");
        assert!(path_is_valid(&valid_path));
    }

    #[test]
    fn test_invalid_path_with_parent() {
        let invalid_path = PathBuf::from("../invalid_directory");
        assert!(!path_is_valid(&invalid_path));
    }

    #[test]
    fn test_invalid_path_with_multiple_components() {
        let invalid_path = PathBuf::from("dir1/dir2");
        assert!(!path_is_valid(&invalid_path));
    }

    #[test]
    fn test_invalid_path_with_root() {
        let invalid_path = PathBuf::from("/root_directory");
        assert!(!path_is_valid(&invalid_path));
    }
}
