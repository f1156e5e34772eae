//! The session facade over a direct backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use svbridge_audio::OutputDevice;
use svbridge_audio::testing::RecordingOutput;
use svbridge_client::{DirectBackend, OutputFactory, SessionOptions, Synth};
use svbridge_core::testing::{EngineProbe, ScriptedEngine, ScriptedLoader};
use svbridge_core::{BridgeConfig, BridgeMode, EngineManager, EngineParam};

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    synth: Synth,
    probe: EngineProbe,
    device: Arc<RecordingOutput>,
    done: Arc<AtomicUsize>,
}

fn fixture(engine: ScriptedEngine) -> Fixture {
    let loader = ScriptedLoader::new(engine);
    let probe = loader.probe();
    let manager = Arc::new(EngineManager::new(Box::new(loader)));

    let device = Arc::new(RecordingOutput::new());
    let output: Arc<dyn OutputDevice> = device.clone();
    let factory: OutputFactory = Box::new(move |_format| Ok(output));
    let done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&done);
    let session = SessionOptions::new(factory).on_done(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let config = BridgeConfig {
        consumer_poll_ms: 10,
        ..BridgeConfig::default()
    };
    let backend = DirectBackend::start(manager, &config, session).unwrap();
    Fixture {
        synth: Synth::with_backend(BridgeMode::Direct, Arc::new(backend)),
        probe,
        device,
        done,
    }
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
async fn queued_utterances_are_spoken_in_order() {
    let f = fixture(ScriptedEngine::new());

    f.synth.speak("first").await.unwrap();
    f.synth.speak("second").await.unwrap();

    let done = Arc::clone(&f.done);
    assert!(eventually(|| done.load(Ordering::SeqCst) == 2).await);
    assert_eq!(f.probe.spoken(), vec!["first", "second"]);
    assert_eq!(f.synth.mode(), BridgeMode::Direct);
    f.synth.shutdown().await.unwrap();
}

#[tokio::test]
async fn pause_factor_sets_engine_values() {
    let f = fixture(ScriptedEngine::new());

    f.synth.set_pause_factor(30).await.unwrap();
    f.synth.set_percent(EngineParam::Rate, 100).await.unwrap();
    f.synth.set_percent(EngineParam::Voice, 2).await.unwrap();

    assert_eq!(
        f.probe.params(),
        vec![
            (EngineParam::PauseFactor, 70),
            (EngineParam::TrimSilence, 1),
            (EngineParam::Rate, 500),
            (EngineParam::Voice, 2),
        ]
    );
    f.synth.shutdown().await.unwrap();
}

#[tokio::test]
async fn pause_factor_skips_missing_exports() {
    let f = fixture(ScriptedEngine::new().with_supported(&[EngineParam::Rate]));

    f.synth.set_pause_factor(80).await.unwrap();
    assert!(f.probe.params().is_empty());
    f.synth.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_clears_the_queue_and_silences_speech() {
    let f = fixture(ScriptedEngine::new().with_script(vec![]).endless(vec![3; 32]));

    f.synth.speak("endless").await.unwrap();
    f.synth.speak("queued behind it").await.unwrap();
    let device = Arc::clone(&f.device);
    assert!(eventually(|| device.feed_count() > 0).await);

    f.synth.stop().await;
    tokio::time::timeout(WAIT, f.synth.shutdown())
        .await
        .expect("shutdown hung after stop")
        .unwrap();

    assert_eq!(f.probe.spoken(), vec!["endless"]);
    assert_eq!(f.done.load(Ordering::SeqCst), 0);
    assert_eq!(f.probe.frees(), 1);
}

#[tokio::test]
async fn markers_and_idle_pass_through() {
    let f = fixture(ScriptedEngine::new());
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = Arc::clone(&fired);
        f.synth
            .feed_marker(Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
    }
    f.synth.pause(true);
    f.synth.pause(false);
    f.synth.player_idle();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(f.device.idle_count(), 1);
    f.synth.shutdown().await.unwrap();
}
