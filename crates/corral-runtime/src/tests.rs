use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use corral_bus::{Messenger, ProcessBus};
use corral_store::{Backend, Catalog, Job, Model, Pool, BACKEND_TYPE_OLLAMA};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::backend::{BackendApi, BackendConnector, BackendError, PullUpdate, RemoteModel};
use crate::state::RuntimeState;
use crate::{DownloadStatus, RuntimeError, SUBJECT_MODEL_DOWNLOAD, SUBJECT_QUEUE_CANCEL};

#[derive(Clone, Copy, PartialEq)]
enum PullMode {
    Succeed,
    Fail,
    WaitForCancel,
}

struct MockBackend {
    hosted: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    fail_list: AtomicBool,
    pull_mode: Mutex<PullMode>,
}

impl MockBackend {
    fn new(models: &[&str]) -> Self {
        Self {
            hosted: Mutex::new(models.iter().map(|m| (*m).to_owned()).collect()),
            deleted: Mutex::new(Vec::new()),
            fail_list: AtomicBool::new(false),
            pull_mode: Mutex::new(PullMode::Succeed),
        }
    }

    fn hosted(&self) -> Vec<String> {
        let mut models = self.hosted.lock().expect("lock").clone();
        models.sort();
        models
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().expect("lock").clone()
    }

    fn set_pull_mode(&self, mode: PullMode) {
        *self.pull_mode.lock().expect("lock") = mode;
    }
}

#[async_trait::async_trait]
impl BackendApi for MockBackend {
    async fn list(&self) -> Result<Vec<RemoteModel>, BackendError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(BackendError::Protocol("connection refused".to_owned()));
        }
        Ok(self
            .hosted
            .lock()
            .expect("lock")
            .iter()
            .map(|m| RemoteModel {
                name: m.clone(),
                model: m.clone(),
                size: 0,
                digest: String::new(),
                modified_at: None,
            })
            .collect())
    }

    async fn pull(
        &self,
        token: &CancellationToken,
        model: &str,
        progress: mpsc::Sender<PullUpdate>,
    ) -> Result<(), BackendError> {
        let mode = *self.pull_mode.lock().expect("lock");
        match mode {
            PullMode::Succeed => {
                let _ = progress
                    .send(PullUpdate {
                        status: "pulling manifest".to_owned(),
                        ..Default::default()
                    })
                    .await;
                let _ = progress
                    .send(PullUpdate {
                        status: "success".to_owned(),
                        total: Some(100),
                        completed: Some(100),
                        ..Default::default()
                    })
                    .await;
                self.hosted.lock().expect("lock").push(model.to_owned());
                Ok(())
            }
            PullMode::Fail => Err(BackendError::Protocol("manifest not found".to_owned())),
            PullMode::WaitForCancel => {
                let _ = progress
                    .send(PullUpdate {
                        status: "downloading".to_owned(),
                        ..Default::default()
                    })
                    .await;
                token.cancelled().await;
                Err(BackendError::Cancelled)
            }
        }
    }

    async fn delete(&self, model: &str) -> Result<(), BackendError> {
        self.hosted.lock().expect("lock").retain(|m| m != model);
        self.deleted.lock().expect("lock").push(model.to_owned());
        Ok(())
    }
}

#[derive(Default)]
struct MockConnector {
    backends: Mutex<HashMap<String, Arc<MockBackend>>>,
}

impl MockConnector {
    fn register(&self, base_url: &str, models: &[&str]) -> Arc<MockBackend> {
        let key = Url::parse(base_url).expect("valid url").as_str().to_owned();
        let backend = Arc::new(MockBackend::new(models));
        self.backends
            .lock()
            .expect("lock")
            .insert(key, Arc::clone(&backend));
        backend
    }
}

impl BackendConnector for MockConnector {
    fn connect(&self, base_url: &Url) -> Arc<dyn BackendApi> {
        let mut backends = self.backends.lock().expect("lock");
        let entry = backends
            .entry(base_url.as_str().to_owned())
            .or_insert_with(|| Arc::new(MockBackend::new(&[])));
        Arc::clone(entry) as Arc<dyn BackendApi>
    }
}

const B1_URL: &str = "http://b1:11434";

fn backend(id: &str, base_url: &str) -> Backend {
    let now = Utc::now();
    Backend {
        id: id.to_owned(),
        name: format!("{id}-name"),
        base_url: base_url.to_owned(),
        backend_type: BACKEND_TYPE_OLLAMA.to_owned(),
        created_at: now,
        updated_at: now,
    }
}

fn model(name: &str) -> Model {
    let now = Utc::now();
    Model {
        id: format!("id-{name}"),
        model: name.to_owned(),
        created_at: now,
        updated_at: now,
    }
}

async fn setup() -> (Arc<Catalog>, Arc<ProcessBus>, Arc<MockConnector>, Arc<RuntimeState>) {
    let catalog = Arc::new(Catalog::connect_in_memory().await.expect("connect"));
    let bus = Arc::new(ProcessBus::new());
    let connector = Arc::new(MockConnector::default());
    let runtime = Arc::new(RuntimeState::new(
        Arc::clone(&catalog),
        Arc::clone(&bus) as Arc<dyn Messenger>,
        Arc::clone(&connector) as Arc<dyn BackendConnector>,
    ));
    (catalog, bus, connector, runtime)
}

fn pulled_names(state: &crate::LlmState) -> Vec<String> {
    let mut names: Vec<String> = state.pulled_models.iter().map(|m| m.model.clone()).collect();
    names.sort();
    names
}

// ── Reconciliation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn diff_queues_missing_and_deletes_undeclared() {
    let (catalog, _bus, connector, runtime) = setup().await;
    catalog.create_backend(&backend("b1", B1_URL)).await.expect("backend");
    catalog.append_model(&model("modelA")).await.expect("modelA");
    catalog.append_model(&model("modelB")).await.expect("modelB");
    let mock = connector.register(B1_URL, &["modelB", "modelC"]);

    runtime.run_backend_cycle().await.expect("cycle");

    // One download job for the missing modelA, keyed by the backend URL.
    let jobs = catalog
        .get_jobs_for_type(crate::TASK_TYPE_MODEL_DOWNLOAD)
        .await
        .expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, "http://b1:11434/");
    let item = Catalog::decode_queue_item(&jobs[0]).expect("payload");
    assert_eq!(item.model, "modelA");

    // The undeclared modelC was deleted.
    assert_eq!(mock.deleted(), vec!["modelC".to_owned()]);

    // The snapshot reflects the post-action observation.
    let snapshot = runtime.get().await;
    let state = snapshot.get("b1").expect("state for b1");
    assert_eq!(pulled_names(state), vec!["modelB".to_owned()]);
    assert!(state.error.is_none());
    let mut declared = state.models.clone();
    declared.sort();
    assert_eq!(declared, vec!["modelA".to_owned(), "modelB".to_owned()]);
}

#[tokio::test]
async fn cycle_is_idempotent() {
    let (catalog, _bus, connector, runtime) = setup().await;
    catalog.create_backend(&backend("b1", B1_URL)).await.expect("backend");
    catalog.append_model(&model("modelA")).await.expect("modelA");
    connector.register(B1_URL, &["modelB"]);

    runtime.run_backend_cycle().await.expect("first cycle");
    let first = runtime.get().await;
    let jobs_after_first = catalog
        .get_jobs_for_type(crate::TASK_TYPE_MODEL_DOWNLOAD)
        .await
        .expect("jobs");

    runtime.run_backend_cycle().await.expect("second cycle");
    let second = runtime.get().await;
    let jobs_after_second = catalog
        .get_jobs_for_type(crate::TASK_TYPE_MODEL_DOWNLOAD)
        .await
        .expect("jobs");

    assert_eq!(first, second);
    assert_eq!(jobs_after_first.len(), 1);
    assert_eq!(jobs_after_second.len(), 1, "re-running must not grow the queue");
}

#[tokio::test]
async fn repeated_cycles_converge_on_declared_set() {
    let (catalog, _bus, connector, runtime) = setup().await;
    catalog.create_backend(&backend("b1", B1_URL)).await.expect("backend");
    catalog.append_model(&model("modelA")).await.expect("modelA");
    catalog.append_model(&model("modelB")).await.expect("modelB");
    let mock = connector.register(B1_URL, &[]);
    let token = CancellationToken::new();

    // |declared \ observed| + 1 cycles suffice: each cycle queues one
    // missing model, each download tick pulls it.
    for _ in 0..3 {
        runtime.run_backend_cycle().await.expect("backend cycle");
        runtime.run_download_cycle(&token).await.expect("download cycle");
    }

    assert_eq!(mock.hosted(), vec!["modelA".to_owned(), "modelB".to_owned()]);
    runtime.run_backend_cycle().await.expect("final cycle");
    let snapshot = runtime.get().await;
    assert_eq!(
        pulled_names(snapshot.get("b1").expect("state")),
        vec!["modelA".to_owned(), "modelB".to_owned()]
    );
}

#[tokio::test]
async fn pool_cleanup_spares_backends_in_any_pool() {
    let (catalog, bus, connector, _) = setup().await;
    let runtime = Arc::new(
        RuntimeState::new(
            Arc::clone(&catalog),
            bus as Arc<dyn Messenger>,
            connector.clone() as Arc<dyn BackendConnector>,
        )
        .with_pools(),
    );

    let now = Utc::now();
    for id in ["b1", "b2", "b3", "b4"] {
        let url = format!("http://{id}:11434");
        catalog.create_backend(&backend(id, &url)).await.expect("backend");
        connector.register(&url, &[]);
    }
    for (pool_id, members) in [("p1", vec!["b1", "b2"]), ("p2", vec!["b2", "b3"]), ("p3", vec!["b4"])] {
        catalog
            .create_pool(&Pool {
                id: pool_id.to_owned(),
                name: pool_id.to_owned(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("pool");
        for backend_id in members {
            catalog.assign_backend(pool_id, backend_id).await.expect("assign");
        }
    }

    runtime.run_backend_cycle().await.expect("first cycle");
    assert_eq!(runtime.get().await.len(), 4);

    // b4's pool disappears; cleanup must remove exactly b4.  b2 appears in
    // two pools and must survive the aggregated cleanup.
    catalog.delete_pool("p3").await.expect("delete pool");
    runtime.run_backend_cycle().await.expect("second cycle");

    let snapshot = runtime.get().await;
    let mut ids: Vec<&str> = snapshot.keys().map(String::as_str).collect();
    ids.sort();
    assert_eq!(ids, vec!["b1", "b2", "b3"]);
}

#[tokio::test]
async fn pool_mode_uses_pool_scoped_model_sets() {
    let (catalog, bus, connector, _) = setup().await;
    let runtime = RuntimeState::new(
        Arc::clone(&catalog),
        bus as Arc<dyn Messenger>,
        connector.clone() as Arc<dyn BackendConnector>,
    )
    .with_pools();

    let now = Utc::now();
    catalog.create_backend(&backend("b1", B1_URL)).await.expect("backend");
    connector.register(B1_URL, &[]);
    let m = model("pool-model");
    catalog.append_model(&m).await.expect("model");
    // A second, global-only model must not leak into the pool's declared set.
    catalog.append_model(&model("global-model")).await.expect("model");
    catalog
        .create_pool(&Pool {
            id: "p1".to_owned(),
            name: "p1".to_owned(),
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("pool");
    catalog.assign_backend("p1", "b1").await.expect("assign backend");
    catalog.assign_model("p1", &m.id).await.expect("assign model");

    runtime.run_backend_cycle().await.expect("cycle");

    let snapshot = runtime.get().await;
    assert_eq!(
        snapshot.get("b1").expect("state").models,
        vec!["pool-model".to_owned()]
    );
}

#[tokio::test]
async fn unsupported_backend_type_records_error_state() {
    let (catalog, _bus, _connector, runtime) = setup().await;
    let mut b = backend("b1", B1_URL);
    b.backend_type = "vllm".to_owned();
    catalog.create_backend(&b).await.expect("backend");

    runtime.run_backend_cycle().await.expect("cycle");

    let snapshot = runtime.get().await;
    let state = snapshot.get("b1").expect("state");
    assert_eq!(
        state.error.as_deref(),
        Some("Unsupported backend type: vllm")
    );
    assert!(state.pulled_models.is_empty());
}

#[tokio::test]
async fn invalid_base_url_records_error_state() {
    let (catalog, _bus, _connector, runtime) = setup().await;
    catalog
        .create_backend(&backend("b1", "not a url"))
        .await
        .expect("backend");

    runtime.run_backend_cycle().await.expect("cycle");

    let snapshot = runtime.get().await;
    let error = snapshot.get("b1").expect("state").error.clone().expect("error");
    assert!(error.starts_with("Invalid URL:"), "got {error}");
}

#[tokio::test]
async fn list_failure_records_error_but_cycle_succeeds() {
    let (catalog, _bus, connector, runtime) = setup().await;
    catalog.create_backend(&backend("b1", B1_URL)).await.expect("backend");
    let mock = connector.register(B1_URL, &["modelA"]);
    mock.fail_list.store(true, Ordering::SeqCst);

    runtime.run_backend_cycle().await.expect("cycle must not fail");

    let snapshot = runtime.get().await;
    let state = snapshot.get("b1").expect("state");
    assert_eq!(state.error.as_deref(), Some("backend error: connection refused"));
    assert!(state.pulled_models.is_empty());
}

#[tokio::test]
async fn removed_backend_is_cleaned_from_snapshot() {
    let (catalog, _bus, connector, runtime) = setup().await;
    catalog.create_backend(&backend("b1", B1_URL)).await.expect("b1");
    catalog
        .create_backend(&backend("b2", "http://b2:11434"))
        .await
        .expect("b2");
    connector.register(B1_URL, &[]);
    connector.register("http://b2:11434", &[]);

    runtime.run_backend_cycle().await.expect("cycle");
    assert_eq!(runtime.get().await.len(), 2);

    catalog.delete_backend("b2").await.expect("delete");
    runtime.run_backend_cycle().await.expect("cycle");

    let snapshot = runtime.get().await;
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.contains_key("b1"));
}

#[tokio::test]
async fn snapshots_are_isolated_from_callers() {
    let (catalog, _bus, connector, runtime) = setup().await;
    catalog.create_backend(&backend("b1", B1_URL)).await.expect("backend");
    connector.register(B1_URL, &[]);
    runtime.run_backend_cycle().await.expect("cycle");

    let mut first = runtime.get().await;
    first
        .get_mut("b1")
        .expect("state")
        .models
        .push("injected".to_owned());

    let second = runtime.get().await;
    assert!(second.get("b1").expect("state").models.is_empty());
}

// ── Download worker ──────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_queue_download_cycle_is_a_noop() {
    let (_catalog, _bus, _connector, runtime) = setup().await;
    let token = CancellationToken::new();
    runtime.run_download_cycle(&token).await.expect("empty queue is ok");
}

#[tokio::test]
async fn successful_download_publishes_progress() {
    let (_catalog, bus, connector, runtime) = setup().await;
    let mock = connector.register(B1_URL, &[]);
    let url = Url::parse(B1_URL).expect("url");
    runtime.queue.add(&url, "modelA").await.expect("enqueue");

    let mut sub = bus.subscribe(SUBJECT_MODEL_DOWNLOAD).await.expect("subscribe");
    let token = CancellationToken::new();
    runtime.run_download_cycle(&token).await.expect("download");

    let first = sub.recv().await.expect("progress message");
    let status: DownloadStatus = serde_json::from_slice(&first).expect("decode");
    assert_eq!(status.base_url, "http://b1:11434/");
    assert_eq!(status.model, "modelA");
    assert!(!status.status.is_empty());

    assert_eq!(mock.hosted(), vec!["modelA".to_owned()]);
}

#[tokio::test]
async fn failed_download_returns_wrapped_error() {
    let (_catalog, _bus, connector, runtime) = setup().await;
    let mock = connector.register(B1_URL, &[]);
    mock.set_pull_mode(PullMode::Fail);
    let url = Url::parse(B1_URL).expect("url");
    runtime.queue.add(&url, "modelA").await.expect("enqueue");

    let token = CancellationToken::new();
    let err = runtime.run_download_cycle(&token).await.unwrap_err();
    match err {
        RuntimeError::Download { model, .. } => assert_eq!(model, "modelA"),
        other => panic!("unexpected error: {other:?}"),
    }
}

async fn cancel_mid_download(cancel_id: &str) -> RuntimeError {
    let (_catalog, bus, connector, runtime) = setup().await;
    let mock = connector.register(B1_URL, &[]);
    mock.set_pull_mode(PullMode::WaitForCancel);
    let url = Url::parse(B1_URL).expect("url");
    runtime.queue.add(&url, "modelA").await.expect("enqueue");

    let mut progress = bus.subscribe(SUBJECT_MODEL_DOWNLOAD).await.expect("subscribe");
    let token = CancellationToken::new();
    let worker = tokio::spawn({
        let runtime = Arc::clone(&runtime);
        let token = token.clone();
        async move { runtime.run_download_cycle(&token).await }
    });

    // The first progress record means the pull is underway and the cancel
    // watcher is subscribed.
    progress.recv().await.expect("download should have started");

    let cancel = Job {
        id: cancel_id.to_owned(),
        task_type: String::new(),
        payload: String::new(),
        scheduled_for: 0,
        valid_until: 0,
        created_at: Utc::now(),
    };
    bus.publish(
        SUBJECT_QUEUE_CANCEL,
        &serde_json::to_vec(&cancel).expect("encode"),
    )
    .await
    .expect("publish cancel");

    tokio::time::timeout(std::time::Duration::from_secs(5), worker)
        .await
        .expect("worker must finish after cancel")
        .expect("join")
        .unwrap_err()
}

#[tokio::test]
async fn cancel_by_model_aborts_the_pull() {
    let err = cancel_mid_download("modelA").await;
    match err {
        RuntimeError::Download { model, source } => {
            assert_eq!(model, "modelA");
            assert!(matches!(source, crate::BackendError::Cancelled));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn cancel_by_backend_url_aborts_the_pull() {
    let err = cancel_mid_download("http://b1:11434/").await;
    assert!(matches!(err, RuntimeError::Download { .. }));
}

#[tokio::test]
async fn unrelated_cancel_does_not_abort_the_pull() {
    let (_catalog, bus, connector, runtime) = setup().await;
    let mock = connector.register(B1_URL, &[]);
    mock.set_pull_mode(PullMode::WaitForCancel);
    let url = Url::parse(B1_URL).expect("url");
    runtime.queue.add(&url, "modelA").await.expect("enqueue");

    let mut progress = bus.subscribe(SUBJECT_MODEL_DOWNLOAD).await.expect("subscribe");
    let token = CancellationToken::new();
    let worker = tokio::spawn({
        let runtime = Arc::clone(&runtime);
        let token = token.clone();
        async move { runtime.run_download_cycle(&token).await }
    });
    progress.recv().await.expect("download should have started");

    let unrelated = Job {
        id: "some-other-model".to_owned(),
        task_type: String::new(),
        payload: String::new(),
        scheduled_for: 0,
        valid_until: 0,
        created_at: Utc::now(),
    };
    bus.publish(
        SUBJECT_QUEUE_CANCEL,
        &serde_json::to_vec(&unrelated).expect("encode"),
    )
    .await
    .expect("publish");

    // Still running: the unrelated cancel must not have aborted it.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!worker.is_finished(), "unrelated cancel must not stop the pull");

    // The caller's token still aborts the download.
    token.cancel();
    let err = tokio::time::timeout(std::time::Duration::from_secs(5), worker)
        .await
        .expect("worker must finish")
        .expect("join")
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Download { .. }));
}
