//! End-to-end conversation test.
//!
//! Real stream reader, speech client, filesystem store and playback queue
//! wired through a session, with wiremock standing in for the providers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use vibecast::audio::{NullPlayer, PlaybackQueue};
use vibecast::config::{ProviderConfig, VibecastConfig};
use vibecast::llm::{ChatEndpoint, ChatStreamClient, Speaker};
use vibecast::pipeline::{
    ConversationEvent, ConversationProfile, ConversationSession, StoreClipSink, TurnOrchestrator,
    event_channel,
};
use vibecast::speech::{SpeechClient, SynthesisDispatcher};
use vibecast::storage::FsConversationStore;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_reply(deltas: &[&str]) -> String {
    let mut body: String = deltas
        .iter()
        .map(|d| format!("data: {}\n\n", json!({"choices": [{"delta": {"content": d}}]})))
        .collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn config_for(server: &MockServer) -> VibecastConfig {
    let mut config = VibecastConfig::default();
    config.providers.0.insert(
        "mock".into(),
        ProviderConfig {
            chat_model: "guest-model".into(),
            tts_model: "tts-test".into(),
            inference_url: format!("{}/v1/chat/completions", server.uri()),
            tts_url: format!("{}/v1/audio/speech", server.uri()),
            api_key: "key".into(),
            ..ProviderConfig::default()
        },
    );
    config.ai.conversation_provider = "mock".into();
    config.ai.tts_provider = "mock".into();
    config
}

async fn next_utterance(events: &mut broadcast::Receiver<ConversationEvent>) -> (String, bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let ConversationEvent::GuestUtterance { text, fallback, .. } =
                events.recv().await.unwrap()
            {
                return (text, fallback);
            }
        }
    })
    .await
    .expect("no guest utterance")
}

#[tokio::test]
async fn guest_turn_is_voiced_and_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_reply(&[
            "Hi",
            " there<speech>",
            "Welcome",
            " to",
            " the",
            " show</speech>",
            "!",
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(body_partial_json(json!({"input": "Welcome to the show", "voice": "nova"})))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(&b"RIFFclip"[..]))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = config_for(&server);
    let store = Arc::new(FsConversationStore::new(tmp.path()));
    store.create_conversation("ep1").await.unwrap();

    let endpoint = ChatEndpoint::from_config(&config, "mock").unwrap();
    let streamer = ChatStreamClient::new(endpoint, &config.stream).unwrap();
    let speech = SpeechClient::new(config.providers.clone(), config.tts.clone()).unwrap();
    let playback = PlaybackQueue::spawn(Arc::new(NullPlayer), 8);
    let (events_tx, mut events) = event_channel();
    let sink = StoreClipSink::new("ep1", store.clone(), playback.clone(), events_tx.clone());
    let dispatcher = SynthesisDispatcher::new(Arc::new(speech), Arc::new(sink), "nova", "mock");
    let orchestrator = TurnOrchestrator::new(
        ConversationProfile {
            conversation_id: "ep1".into(),
            persona: "a radio veteran".into(),
            topic: "live shows".into(),
        },
        Arc::new(streamer),
        dispatcher,
        store.clone(),
        events_tx.clone(),
    );
    let handle = ConversationSession::spawn(orchestrator, playback.clone(), events_tx);

    handle.start_guest().await.unwrap();
    let (text, fallback) = next_utterance(&mut events).await;
    assert_eq!(text, "Hi thereWelcome to the show!");
    assert!(!fallback);

    handle.exit().await.unwrap();
    assert_eq!(playback.pending(), 0);
    assert_eq!(store.list_audio_files("ep1").await.unwrap(), ["001.wav"]);

    let messages = store.load_messages("ep1").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].speaker, Speaker::Guest);
    assert_eq!(messages[0].content, "Hi thereWelcome to the show!");
}

#[tokio::test]
async fn unreachable_model_records_fallback_line() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(&b"RIFF"[..]))
        .expect(0)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = config_for(&server);
    let store = Arc::new(FsConversationStore::new(tmp.path()));
    store.create_conversation("ep2").await.unwrap();

    let endpoint = ChatEndpoint::from_config(&config, "mock").unwrap();
    let streamer = ChatStreamClient::new(endpoint, &config.stream).unwrap();
    let speech = SpeechClient::new(config.providers.clone(), config.tts.clone()).unwrap();
    let playback = PlaybackQueue::spawn(Arc::new(NullPlayer), 8);
    let (events_tx, mut events) = event_channel();
    let sink = StoreClipSink::new("ep2", store.clone(), playback.clone(), events_tx.clone());
    let dispatcher = SynthesisDispatcher::new(Arc::new(speech), Arc::new(sink), "nova", "mock");
    let orchestrator = TurnOrchestrator::new(
        ConversationProfile {
            conversation_id: "ep2".into(),
            persona: "a radio veteran".into(),
            topic: "live shows".into(),
        },
        Arc::new(streamer),
        dispatcher,
        store.clone(),
        events_tx.clone(),
    );
    let handle = ConversationSession::spawn(orchestrator, playback, events_tx);

    handle.host_message("Are you there?").await.unwrap();
    let (text, fallback) = next_utterance(&mut events).await;
    assert!(fallback);
    handle.exit().await.unwrap();

    let messages = store.load_messages("ep2").await.unwrap();
    let speakers: Vec<_> = messages.iter().map(|m| m.speaker).collect();
    assert_eq!(speakers, [Speaker::Host, Speaker::Guest]);
    assert_eq!(messages[1].content, text);
    assert!(store.list_audio_files("ep2").await.unwrap().is_empty());
}
