//! The dispatcher driven over an in-memory channel.

use std::time::Duration;

use serde_json::json;
use svbridge_core::EngineParam;
use svbridge_core::testing::{EngineProbe, ScriptedEngine, ScriptedLoader};
use svbridge_host::{Dispatcher, DispatcherOptions, ServeError};
use svbridge_ipc::{
    AudioEvent, Envelope, FrameReceiver, FrameSender, Payload, codes, commands, events,
    from_payload,
};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct Caller {
    sender: FrameSender,
    receiver: FrameReceiver,
    next_id: u64,
    server: JoinHandle<Result<(), ServeError>>,
}

/// Everything received up to and including one response.
#[derive(Debug, Default)]
struct Exchange {
    payload: Payload,
    error: Option<String>,
    events: Vec<(String, Payload)>,
}

fn start(loader: ScriptedLoader) -> Caller {
    let (caller_end, host_end) = tokio::io::duplex(1 << 20);
    let (host_read, host_write) = tokio::io::split(host_end);
    let (caller_read, caller_write) = tokio::io::split(caller_end);

    let dispatcher = Dispatcher::new(Box::new(loader), DispatcherOptions::default());
    let server = tokio::spawn(async move {
        dispatcher
            .serve(FrameSender::new(host_write), FrameReceiver::new(host_read))
            .await
    });

    Caller {
        sender: FrameSender::new(caller_write),
        receiver: FrameReceiver::new(caller_read),
        next_id: 1,
        server,
    }
}

fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn init_payload() -> Payload {
    payload(json!({"wrapperPath": "softvoice_wrapper.dll", "enginePath": "tibase32.dll"}))
}

impl Caller {
    async fn send(&mut self, command: &str, payload: Payload) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.sender
            .send(&Envelope::command(id, command, payload))
            .await
            .unwrap();
        id
    }

    async fn next(&mut self) -> Envelope {
        tokio::time::timeout(WAIT, self.receiver.recv())
            .await
            .expect("host went quiet")
            .unwrap()
    }

    /// Read frames until the response to `id`, keeping events seen on the way.
    async fn response_to(&mut self, id: u64) -> Exchange {
        let mut exchange = Exchange::default();
        loop {
            match self.next().await {
                Envelope::Response {
                    id: got,
                    payload,
                    error,
                } if got == id => {
                    exchange.payload = payload;
                    exchange.error = error;
                    return exchange;
                }
                Envelope::Event { event, payload } => exchange.events.push((event, payload)),
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    async fn call(&mut self, command: &str, payload: Payload) -> Exchange {
        let id = self.send(command, payload).await;
        self.response_to(id).await
    }

    async fn initialize(&mut self) -> Exchange {
        let exchange = self.call(commands::INITIALIZE, init_payload()).await;
        assert_eq!(exchange.error, None);
        exchange
    }
}

fn audio_events(events: &[(String, Payload)]) -> Vec<AudioEvent> {
    events
        .iter()
        .filter(|(name, _)| name == events::AUDIO)
        .map(|(_, payload)| from_payload(payload.clone()).unwrap())
        .collect()
}

fn scripted() -> (ScriptedLoader, EngineProbe) {
    let loader = ScriptedLoader::new(ScriptedEngine::new());
    let probe = loader.probe();
    (loader, probe)
}

#[tokio::test]
async fn unknown_command_gets_an_explicit_error() {
    let (loader, _probe) = scripted();
    let mut caller = start(loader);

    let exchange = caller.call("sing", Payload::new()).await;
    assert_eq!(exchange.error.as_deref(), Some(codes::UNKNOWN_COMMAND));

    // The channel is still usable.
    let exchange = caller.call(commands::GET_FORMAT, Payload::new()).await;
    assert_eq!(exchange.error.as_deref(), Some(codes::NOT_INITIALIZED));
}

#[tokio::test]
async fn initialize_reports_capabilities() {
    let (loader, probe) = scripted();
    let mut caller = start(loader);

    let exchange = caller.initialize().await;
    assert_eq!(exchange.payload["sampleRate"], 22_050);
    assert_eq!(exchange.payload["channels"], 1);
    assert_eq!(exchange.payload["bitsPerSample"], 16);
    assert_eq!(exchange.payload["hasPauseFactor"], true);

    // A second initialize reuses the engine.
    caller.initialize().await;
    assert_eq!(probe.loads(), 1);

    let format = caller.call(commands::GET_FORMAT, Payload::new()).await;
    assert_eq!(format.payload["sampleRate"], 22_050);
}

#[tokio::test]
async fn failed_initialize_is_reported() {
    let mut caller = start(ScriptedLoader::failing("no such file"));

    let exchange = caller.call(commands::INITIALIZE, init_payload()).await;
    let error = exchange.error.unwrap();
    assert!(error.starts_with(codes::ENGINE_ERROR), "{error}");
}

#[tokio::test]
async fn speak_streams_audio_then_exactly_one_final() {
    let (loader, probe) = scripted();
    let mut caller = start(loader);
    caller.initialize().await;

    let exchange = caller
        .call(commands::SPEAK, payload(json!({"text": "hello", "sequence": 7})))
        .await;
    assert_eq!(exchange.error, None);
    assert_eq!(exchange.payload["outcome"], "completed");

    let audio = audio_events(&exchange.events);
    assert_eq!(audio.len(), 3);
    assert!(audio.iter().all(|e| e.sequence == Some(7)));
    assert_eq!(audio[0].data, vec![0x10; 32]);
    assert_eq!(audio.iter().filter(|e| e.is_final).count(), 1);
    assert!(audio.last().unwrap().is_final);
    assert!(audio.last().unwrap().data.is_empty());
    assert_eq!(probe.spoken(), vec!["hello"]);
}

#[tokio::test]
async fn speak_then_stop_never_deadlocks() {
    let loader = ScriptedLoader::new(
        ScriptedEngine::new()
            .with_script(vec![])
            .endless(vec![1; 64]),
    );
    let probe = loader.probe();
    let mut caller = start(loader);
    caller.initialize().await;

    let speak = caller
        .send(commands::SPEAK, payload(json!({"text": "a very long utterance", "sequence": 2})))
        .await;
    let stop = caller.send(commands::STOP, Payload::new()).await;

    let mut seen = Vec::new();
    let mut speak_outcome = None;
    let mut stop_ok = false;
    tokio::time::timeout(WAIT, async {
        while speak_outcome.is_none() || !stop_ok {
            match caller.next().await {
                Envelope::Event { event, payload } => seen.push((event, payload)),
                Envelope::Response { id, payload, error } if id == speak => {
                    assert_eq!(error, None);
                    speak_outcome = payload["outcome"].as_str().map(str::to_string);
                }
                Envelope::Response { id, error, .. } if id == stop => {
                    assert_eq!(error, None);
                    stop_ok = true;
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
    })
    .await
    .expect("speak/stop deadlocked");

    assert_eq!(speak_outcome.as_deref(), Some("cancelled"));
    assert!(seen.iter().any(|(name, _)| name == events::STOPPED));
    let audio = audio_events(&seen);
    assert_eq!(audio.iter().filter(|e| e.is_final).count(), 1);
    assert!(probe.stops() >= 1);
}

#[tokio::test]
async fn setters_are_allow_listed() {
    let (loader, probe) = scripted();
    let mut caller = start(loader);
    caller.initialize().await;

    let rejected = caller
        .call(
            commands::SET_PARAMETER,
            payload(json!({"name": "__import__", "value": 1})),
        )
        .await;
    assert_eq!(rejected.error.as_deref(), Some(codes::DISALLOWED_PARAMETER));

    let accepted = caller
        .call(
            commands::DLL_CALL,
            payload(json!({"funcName": "sv_setRate", "value": 200})),
        )
        .await;
    assert_eq!(accepted.error, None);
    assert_eq!(probe.params(), vec![(EngineParam::Rate, 200)]);
}

#[tokio::test]
async fn initialize_applies_the_callers_stream_settings() {
    let (loader, probe) = scripted();
    let mut caller = start(loader);

    let init = payload(json!({
        "wrapperPath": "softvoice_wrapper.dll",
        "enginePath": "tibase32.dll",
        "stream": {"maxUtteranceChars": 9},
    }));
    assert_eq!(caller.call(commands::INITIALIZE, init).await.error, None);

    let exchange = caller
        .call(commands::SPEAK, payload(json!({"text": "one two three four"})))
        .await;
    assert_eq!(exchange.payload["outcome"], "completed");
    assert_eq!(probe.spoken(), vec!["one two", "three", "four"]);
    assert_eq!(audio_events(&exchange.events).iter().filter(|e| e.is_final).count(), 1);
}

#[tokio::test]
async fn invalid_stream_settings_are_refused() {
    let (loader, probe) = scripted();
    let mut caller = start(loader);

    let init = payload(json!({
        "wrapperPath": "softvoice_wrapper.dll",
        "enginePath": "tibase32.dll",
        "stream": {"readBackoff": {"factor": 1e300}},
    }));
    let exchange = caller.call(commands::INITIALIZE, init).await;
    assert_eq!(exchange.error.as_deref(), Some(codes::BAD_PAYLOAD));
    assert_eq!(probe.loads(), 0);
}

#[tokio::test]
async fn commands_before_initialize_are_refused() {
    let (loader, _probe) = scripted();
    let mut caller = start(loader);

    let exchange = caller
        .call(commands::SPEAK, payload(json!({"text": "hello"})))
        .await;
    assert_eq!(exchange.error.as_deref(), Some(codes::NOT_INITIALIZED));
}

#[tokio::test]
async fn malformed_payload_is_reported() {
    let (loader, _probe) = scripted();
    let mut caller = start(loader);
    caller.initialize().await;

    let exchange = caller.call(commands::SPEAK, Payload::new()).await;
    assert_eq!(exchange.error.as_deref(), Some(codes::BAD_PAYLOAD));
}

#[tokio::test]
async fn shutdown_frees_the_engine_and_ends_serving() {
    let (loader, probe) = scripted();
    let mut caller = start(loader);
    caller.initialize().await;

    let exchange = caller.call(commands::DELETE, Payload::new()).await;
    assert_eq!(exchange.error, None);

    let served = tokio::time::timeout(WAIT, caller.server)
        .await
        .expect("serve did not return")
        .unwrap();
    assert!(served.is_ok());
    assert_eq!(probe.frees(), 1);
}

#[tokio::test]
async fn caller_hangup_releases_the_engine() {
    let (loader, probe) = scripted();
    let mut caller = start(loader);
    caller.initialize().await;

    caller.sender.close().await;
    let served = tokio::time::timeout(WAIT, caller.server)
        .await
        .expect("serve did not return")
        .unwrap();
    assert!(served.is_ok());
    assert_eq!(probe.frees(), 1);
}

#[tokio::test]
async fn stray_events_are_ignored() {
    let (loader, _probe) = scripted();
    let mut caller = start(loader);

    caller
        .sender
        .send(&Envelope::event("noise", Payload::new()))
        .await
        .unwrap();
    let exchange = caller.call("sing", Payload::new()).await;
    assert_eq!(exchange.error.as_deref(), Some(codes::UNKNOWN_COMMAND));
}
