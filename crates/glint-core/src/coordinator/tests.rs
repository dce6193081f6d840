use super::*;
use crate::client_info::LANGUAGE_BINDING_NAME;
use crate::memory::InMemoryCore;
use crate::metrics_core::UploadResult;
use crate::upload::MockPingUploader;
use glint_dispatch::{Job, JobHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

fn accepting_uploader() -> Arc<dyn PingUploader> {
    let mut uploader = MockPingUploader::new();
    uploader
        .expect_upload()
        .returning(|_| UploadResult::HttpStatus(200));
    Arc::new(uploader)
}

fn coordinator_for(core: &Arc<InMemoryCore>) -> Coordinator {
    Coordinator::builder(core.clone())
        .uploader(accepting_uploader())
        .build()
        .unwrap()
}

fn options(data_dir: &std::path::Path) -> InitOptions {
    InitOptions::new("org.example.app", "1.0.0", true).with_data_dir(data_dir)
}

#[test]
fn test_initialize_without_data_dir_fails_before_core_call() {
    let core = Arc::new(InMemoryCore::new());
    let coordinator = coordinator_for(&core);

    let result = coordinator.initialize(InitOptions::new("org.example.app", "1.0.0", true));

    assert!(matches!(result, Err(Error::MissingDataDir)));
    assert_eq!(core.initialize_calls(), 0);
    assert_eq!(coordinator.state(), LifecycleState::Uninitialized);
    assert!(coordinator.session().is_none());
}

#[test]
fn test_initialize_hands_session_to_core() {
    let dir = tempfile::tempdir().unwrap();
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);
    let configuration = Configuration::default()
        .with_channel("beta")
        .with_max_events(25);

    coordinator
        .initialize(options(dir.path()).with_configuration(configuration.clone()))
        .unwrap();

    let config = core.config().unwrap();
    assert_eq!(config.data_path, dir.path());
    assert_eq!(config.application_id, "org.example.app");
    assert_eq!(config.language_binding_name, LANGUAGE_BINDING_NAME);
    assert_eq!(config.max_events, Some(25));
    assert_eq!(config.app_build, UNKNOWN);

    let client_info = core.client_info().unwrap();
    assert_eq!(client_info.app_display_version, "1.0.0");
    assert_eq!(client_info.channel.as_deref(), Some("beta"));

    assert_eq!(coordinator.configuration(), Some(configuration));
}

#[test]
fn test_build_id_is_propagated() {
    let dir = tempfile::tempdir().unwrap();
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);

    coordinator
        .initialize(options(dir.path()).with_build_id("2024.1"))
        .unwrap();

    assert_eq!(core.config().unwrap().app_build, "2024.1");
    assert_eq!(core.client_info().unwrap().app_build, "2024.1");
    assert_eq!(
        coordinator.session().unwrap().build_id.as_deref(),
        Some("2024.1")
    );
}

#[test]
fn test_second_initialize_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let other = tempfile::tempdir().unwrap();
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);

    coordinator.initialize(options(dir.path())).unwrap();
    let session = coordinator.session();
    coordinator
        .initialize(InitOptions::new("org.example.other", "2.0.0", false).with_data_dir(other.path()))
        .unwrap();

    assert_eq!(core.initialize_calls(), 1);
    assert_eq!(coordinator.session(), session);
}

#[test]
fn test_synchronous_completion_reaches_ready() {
    let dir = tempfile::tempdir().unwrap();
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);

    coordinator.initialize(options(dir.path())).unwrap();

    assert!(coordinator.is_initialized());
    assert_eq!(coordinator.state(), LifecycleState::Ready);
}

#[test]
fn test_asynchronous_completion_reaches_ready() {
    let dir = tempfile::tempdir().unwrap();
    let core = Arc::new(InMemoryCore::new());
    let coordinator = coordinator_for(&core);

    coordinator.initialize(options(dir.path())).unwrap();
    assert!(coordinator.is_initialized());

    let deadline = Instant::now() + Duration::from_secs(5);
    while coordinator.state() != LifecycleState::Ready {
        assert!(Instant::now() < deadline, "core never finished initializing");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_invalid_configuration_leaves_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let core = Arc::new(InMemoryCore::new());
    let coordinator = coordinator_for(&core);
    let configuration = Configuration::default().with_server_endpoint("not a url");

    let result = coordinator.initialize(options(dir.path()).with_configuration(configuration));

    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    assert!(!coordinator.is_initialized());
    assert_eq!(core.initialize_calls(), 0);
}

#[test]
fn test_default_uploader_is_built_from_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = Coordinator::new(core.clone()).unwrap();

    coordinator
        .initialize(
            InitOptions::new("org.example.app", "1.0.0", false)
                .with_data_dir(dir.path())
                .with_log_level(Level::DEBUG),
        )
        .unwrap();

    assert!(coordinator.is_initialized());
    assert!(!core.is_upload_enabled());
}

#[test]
fn test_testing_directory_is_created_and_removed() {
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);

    coordinator
        .initialize_for_testing(InitOptions::new("org.example.app", "1.0.0", true))
        .unwrap();
    let data_dir = coordinator.session().unwrap().data_dir;
    assert!(data_dir.is_dir());

    coordinator.reset().unwrap();

    assert!(!data_dir.exists());
    assert!(!coordinator.is_initialized());
}

#[test]
fn test_redundant_testing_initialize_creates_no_directory() {
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);
    let dir = tempfile::tempdir().unwrap();

    coordinator.initialize(options(dir.path())).unwrap();
    coordinator
        .initialize_for_testing(InitOptions::new("org.example.app", "1.0.0", true))
        .unwrap();

    assert_eq!(coordinator.session().unwrap().data_dir, dir.path());
    assert_eq!(core.initialize_calls(), 1);
}

#[test]
fn test_reset_keeps_directory_it_does_not_own() {
    let dir = tempfile::tempdir().unwrap();
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);

    coordinator.initialize(options(dir.path())).unwrap();
    coordinator.reset().unwrap();

    assert!(dir.path().is_dir());
    assert_eq!(core.destroy_calls(), 1);
    assert_eq!(coordinator.state(), LifecycleState::Uninitialized);
}

#[test]
fn test_reset_clears_testing_mode() {
    let dir = tempfile::tempdir().unwrap();
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);
    coordinator.initialize(options(dir.path())).unwrap();

    coordinator.set_testing_mode(true).unwrap();
    assert!(coordinator.is_testing_mode());
    assert!(core.is_test_mode());

    coordinator.reset().unwrap();

    assert!(!coordinator.is_testing_mode());
    assert!(!core.is_test_mode());
}

#[test]
fn test_ping_types_are_replayed_after_initialize() {
    let dir = tempfile::tempdir().unwrap();
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);

    coordinator
        .register_ping_type(PingType::new("custom", true, false))
        .unwrap();
    assert!(core.ping_type_names().is_empty());

    coordinator.initialize(options(dir.path())).unwrap();
    assert_eq!(core.ping_type_names(), vec!["custom".to_string()]);

    coordinator
        .register_ping_type(PingType::new("usage", false, true))
        .unwrap();
    assert_eq!(
        core.ping_type_names(),
        vec!["custom".to_string(), "usage".to_string()]
    );
}

#[test]
fn test_shutdown_runs_once_per_session() {
    let dir = tempfile::tempdir().unwrap();
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);
    coordinator.initialize(options(dir.path())).unwrap();

    coordinator.shutdown().unwrap();
    coordinator.shutdown().unwrap();

    assert_eq!(core.destroy_calls(), 1);
    assert!(!coordinator.is_initialized());
}

#[test]
fn test_drop_runs_teardown_for_active_session() {
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);
    coordinator
        .initialize_for_testing(InitOptions::new("org.example.app", "1.0.0", true))
        .unwrap();
    let data_dir = coordinator.session().unwrap().data_dir;

    drop(coordinator);

    assert_eq!(core.destroy_calls(), 1);
    assert!(!data_dir.exists());
}

#[test]
fn test_drop_without_session_leaves_core_alone() {
    let core = Arc::new(InMemoryCore::new());
    drop(coordinator_for(&core));

    assert_eq!(core.destroy_calls(), 0);
}

/// Accepts a fixed number of jobs, then refuses as if closed.
struct RefusingDispatcher {
    inner: glint_dispatch::SerialDispatcher,
    remaining: AtomicUsize,
}

impl JobDispatcher for RefusingDispatcher {
    fn submit(&self, job: Job) -> glint_dispatch::Result<JobHandle> {
        let accepted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if accepted {
            self.inner.submit(job)
        } else {
            Err(glint_dispatch::Error::Closed)
        }
    }
}

#[test]
fn test_failed_directory_removal_is_a_teardown_error() {
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let dispatcher = Arc::new(RefusingDispatcher {
        inner: glint_dispatch::SerialDispatcher::new().unwrap(),
        remaining: AtomicUsize::new(1),
    });
    let coordinator = Coordinator::builder(core.clone())
        .dispatcher(dispatcher)
        .uploader(accepting_uploader())
        .build()
        .unwrap();
    coordinator
        .initialize_for_testing(InitOptions::new("org.example.app", "1.0.0", false))
        .unwrap();
    let data_dir = coordinator.session().unwrap().data_dir;

    let result = coordinator.reset();

    match result {
        Err(Error::Teardown { path, .. }) => assert_eq!(path, data_dir),
        other => panic!("expected a teardown error, got {other:?}"),
    }
    assert!(!coordinator.is_initialized());
    std::fs::remove_dir_all(&data_dir).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_drop_inside_multi_thread_runtime_runs_teardown() {
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);
    coordinator
        .initialize_for_testing(InitOptions::new("org.example.app", "1.0.0", true))
        .unwrap();
    let data_dir = coordinator.session().unwrap().data_dir;

    drop(coordinator);

    assert_eq!(core.destroy_calls(), 1);
    assert!(!data_dir.exists());
}

#[tokio::test]
async fn test_reset_inside_current_thread_runtime() {
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);
    coordinator
        .initialize_for_testing(InitOptions::new("org.example.app", "1.0.0", true))
        .unwrap();
    let data_dir = coordinator.session().unwrap().data_dir;

    coordinator.reset().unwrap();
    drop(coordinator);

    assert!(!data_dir.exists());
    assert_eq!(core.destroy_calls(), 1);
}

#[test]
fn test_unusable_data_dir_rolls_back_initialize() {
    let core = Arc::new(InMemoryCore::with_synchronous_callbacks());
    let coordinator = coordinator_for(&core);
    let file = tempfile::NamedTempFile::new().unwrap();

    let result = coordinator.start(
        InitOptions::new("org.example.app", "1.0.0", true),
        file.path().join("data"),
        true,
    );

    assert!(matches!(result, Err(Error::Io(_))));
    assert!(!coordinator.is_initialized());
    assert!(coordinator.session().is_none());
    assert_eq!(core.initialize_calls(), 0);

    coordinator
        .initialize_for_testing(InitOptions::new("org.example.app", "1.0.0", true))
        .unwrap();
    assert!(coordinator.is_initialized());
}
