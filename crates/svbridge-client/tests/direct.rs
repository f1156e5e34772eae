//! The in-process backend against a scripted engine and a recording device.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use svbridge_audio::testing::RecordingOutput;
use svbridge_audio::{AudioError, OutputDevice};
use svbridge_client::{ClientError, DirectBackend, OutputFactory, SessionOptions, SpeechBackend};
use svbridge_core::testing::{EngineProbe, ScriptedEngine, ScriptedLoader};
use svbridge_core::{BridgeConfig, EngineError, EngineManager, EngineParam, UtteranceOutcome};

const WAIT: Duration = Duration::from_secs(5);

fn recording(device: &Arc<RecordingOutput>) -> OutputFactory {
    let output: Arc<dyn OutputDevice> = device.clone();
    Box::new(move |_format| Ok(output))
}

fn session(device: &Arc<RecordingOutput>) -> (SessionOptions, Arc<AtomicUsize>) {
    let done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&done);
    let options = SessionOptions::new(recording(device)).on_done(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    (options, done)
}

fn config() -> BridgeConfig {
    BridgeConfig {
        consumer_poll_ms: 10,
        ..BridgeConfig::default()
    }
}

fn manager(engine: ScriptedEngine) -> (Arc<EngineManager>, EngineProbe) {
    let loader = ScriptedLoader::new(engine);
    let probe = loader.probe();
    (Arc::new(EngineManager::new(Box::new(loader))), probe)
}

async fn eventually(cond: impl Fn() -> bool) -> bool {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn speak_renders_and_completes_once() {
    let (manager, probe) = manager(ScriptedEngine::new());
    let device = Arc::new(RecordingOutput::new());
    let (options, done) = session(&device);
    let backend = DirectBackend::start(manager, &config(), options).unwrap();

    let outcome = backend.speak("hello").await.unwrap();
    assert_eq!(outcome, UtteranceOutcome::Completed);

    assert!(eventually(|| done.load(Ordering::SeqCst) == 1).await);
    let mut expected = vec![0x10; 32];
    expected.extend_from_slice(&[0x20; 32]);
    assert_eq!(device.rendered(), expected);
    assert_eq!(probe.spoken(), vec!["hello"]);
}

#[tokio::test]
async fn withdrawn_utterance_never_reaches_the_engine() {
    let (manager, probe) = manager(ScriptedEngine::new());
    let device = Arc::new(RecordingOutput::new());
    let (options, done) = session(&device);
    let backend = DirectBackend::start(manager, &config(), options).unwrap();

    let outcome = backend.speak_unless("stale", &|| true).await.unwrap();
    assert_eq!(outcome, UtteranceOutcome::Cancelled);
    assert!(probe.spoken().is_empty());

    // The next utterance is unaffected, and only it completes.
    backend.speak("fresh").await.unwrap();
    assert!(eventually(|| done.load(Ordering::SeqCst) == 1).await);
    assert_eq!(probe.spoken(), vec!["fresh"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_cancels_an_endless_utterance() {
    let (manager, probe) = manager(ScriptedEngine::new().with_script(vec![]).endless(vec![9; 64]));
    let device = Arc::new(RecordingOutput::new());
    let (options, done) = session(&device);
    let backend = Arc::new(DirectBackend::start(manager, &config(), options).unwrap());

    let speaking = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move { backend.speak("never ends").await })
    };
    assert!(eventually(|| device.feed_count() > 0).await);

    backend.stop().await;
    let outcome = tokio::time::timeout(WAIT, speaking)
        .await
        .expect("stop did not end the utterance")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, UtteranceOutcome::Cancelled);
    assert!(probe.stops() >= 1);

    // Nothing more is rendered once the stop has landed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = device.rendered().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(device.rendered().len(), settled);
    assert_eq!(done.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn shutdown_frees_the_engine_once() {
    let (manager, probe) = manager(ScriptedEngine::new());
    let device = Arc::new(RecordingOutput::new());
    let (options, _done) = session(&device);
    let backend = DirectBackend::start(Arc::clone(&manager), &config(), options).unwrap();

    backend.shutdown().await.unwrap();
    backend.shutdown().await.unwrap();
    assert_eq!(probe.frees(), 1);
    assert_eq!(manager.ref_count(), 0);
    assert!(matches!(backend.speak("late").await, Err(ClientError::Closed)));
}

#[tokio::test]
async fn sessions_share_one_engine() {
    let (manager, probe) = manager(ScriptedEngine::new());
    let first_device = Arc::new(RecordingOutput::new());
    let second_device = Arc::new(RecordingOutput::new());
    let first =
        DirectBackend::start(Arc::clone(&manager), &config(), session(&first_device).0).unwrap();
    let second =
        DirectBackend::start(Arc::clone(&manager), &config(), session(&second_device).0).unwrap();
    assert_eq!(probe.loads(), 1);
    assert_eq!(manager.ref_count(), 2);

    first.shutdown().await.unwrap();
    assert_eq!(probe.frees(), 0);
    second.shutdown().await.unwrap();
    assert_eq!(probe.frees(), 1);
}

#[tokio::test]
async fn device_failure_gives_the_engine_back() {
    let (manager, probe) = manager(ScriptedEngine::new());
    let failing: OutputFactory = Box::new(|_format| Err(AudioError::Closed));

    let err = DirectBackend::start(Arc::clone(&manager), &config(), SessionOptions::new(failing))
        .unwrap_err();
    assert!(matches!(err, ClientError::Audio(AudioError::Closed)));
    assert_eq!(manager.ref_count(), 0);
    assert_eq!(probe.frees(), 1);
}

#[tokio::test]
async fn unsupported_parameter_is_reported() {
    let (manager, probe) = manager(ScriptedEngine::new().with_supported(&[EngineParam::Rate]));
    let device = Arc::new(RecordingOutput::new());
    let backend = DirectBackend::start(manager, &config(), session(&device).0).unwrap();

    backend.set_parameter(EngineParam::Rate, 180).await.unwrap();
    let err = backend
        .set_parameter(EngineParam::PauseFactor, 40)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Engine(EngineError::Unsupported(EngineParam::PauseFactor))
    ));
    assert_eq!(probe.params(), vec![(EngineParam::Rate, 180)]);
    assert!(!backend.capabilities().has_pause_factor);
}
