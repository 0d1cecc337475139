//! Speech synthesis contract tests.
//!
//! Verify the request sent to an OpenAI-compatible `/audio/speech`
//! endpoint, error mapping, and the optional speech-prep rewrite.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use serde_json::json;
use vibecast::PipelineError;
use vibecast::config::{ProviderConfig, ProvidersConfig, TtsConfig, VibecastConfig};
use vibecast::llm::{ChatClient, ChatEndpoint, PromptLibrary};
use vibecast::speech::{SpeechClient, SpeechPreparer, SpeechSynthesizer, SynthesisJob};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAV: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt ";

fn providers_for(server: &MockServer) -> ProvidersConfig {
    let mut providers = ProvidersConfig::default();
    providers.0.insert(
        "mock".into(),
        ProviderConfig {
            chat_model: "prep-model".into(),
            tts_model: "tts-test".into(),
            inference_url: format!("{}/v1/chat/completions", server.uri()),
            tts_url: format!("{}/v1/audio/speech", server.uri()),
            api_key: "tts-key".into(),
            ..ProviderConfig::default()
        },
    );
    providers
}

fn client_for(server: &MockServer) -> SpeechClient {
    SpeechClient::new(providers_for(server), TtsConfig::default()).unwrap()
}

#[tokio::test]
async fn synthesis_posts_normalized_text_with_voice_and_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(header("authorization", "Bearer tts-key"))
        .and(body_partial_json(json!({
            "model": "tts-test",
            "voice": "nova",
            "input": "Welcome to the show. Glad you are here.",
            "response_format": "wav"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WAV))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let job = SynthesisJob::new(
        "<b>Welcome</b> to the   show.Glad you are here.",
        "nova",
        "mock",
    );
    let audio = client.synthesize(&job).await.unwrap();
    assert_eq!(&audio[..], WAV);
}

#[tokio::test]
async fn blank_voice_uses_configured_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"voice": "alloy"})))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WAV))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .synthesize(&SynthesisJob::new("Hello there.", " ", "mock"))
        .await
        .unwrap();
}

#[tokio::test]
async fn http_error_is_a_synthesis_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .synthesize(&SynthesisJob::new("Hello.", "alloy", "mock"))
        .await
        .unwrap_err();
    match err {
        PipelineError::Synthesis(msg) => {
            assert!(msg.contains("429"), "{msg}");
            assert!(msg.contains("rate limited"), "{msg}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn empty_audio_is_a_synthesis_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .synthesize(&SynthesisJob::new("Hello.", "alloy", "mock"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Synthesis(_)), "{err:?}");
}

#[tokio::test]
async fn markup_only_block_is_not_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WAV))
        .expect(0)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .synthesize(&SynthesisJob::new("<break/> <pause>", "alloy", "mock"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Synthesis(_)), "{err:?}");
}

fn preparer_for(server: &MockServer) -> SpeechPreparer {
    let mut config = VibecastConfig::default();
    config.providers = providers_for(server);
    let endpoint = ChatEndpoint::from_config(&config, "mock").unwrap();
    let chat = ChatClient::new(endpoint, Duration::from_secs(5)).unwrap();
    SpeechPreparer::new(chat, PromptLibrary::builtin(), "a baker", "sourdough")
}

#[tokio::test]
async fn speech_prep_rewrite_replaces_block_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "prep-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Well, hi there, folks."}}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(body_partial_json(json!({"input": "Well, hi there, folks."})))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WAV))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).with_preparer(preparer_for(&server));
    client
        .synthesize(&SynthesisJob::new("Hi folks.", "alloy", "mock"))
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_speech_prep_falls_back_to_normalized_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(body_partial_json(json!({"input": "Hi folks."})))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(WAV))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).with_preparer(preparer_for(&server));
    client
        .synthesize(&SynthesisJob::new("Hi folks.", "alloy", "mock"))
        .await
        .unwrap();
}
