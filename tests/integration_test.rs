use mockall::predicate::eq;
use mockito::Matcher;
use speechd_hub::backends::{apply_voice_settings, Capabilities, DebugInfo, FragmentKind};
use speechd_hub::{
    registry, EngineKind, RequestOverrides, SessionState, Settings, SpeechError, StreamingSession,
    TextToSpeech, Voice,
};
use tokio::sync::mpsc;

mockall::mock! {
    pub Tts {}
    #[async_trait::async_trait]
    impl TextToSpeech for Tts {
        fn id(&self) -> &'static str;
        async fn synthesize(&self, text: &str) -> speechd_hub::Result<Vec<u8>>;
        fn list_voices(&self) -> Vec<Voice>;
        fn set_voice(&mut self, voice_id: &str);
        fn current_voice(&self) -> String;
        fn set_speed(&mut self, factor: f32);
        fn capabilities(&self) -> Capabilities;
        fn debug_info(&self) -> DebugInfo;
    }
}

#[test]
fn test_voice_and_speed_applied_when_supported() {
    let mut tts = MockTts::new();
    tts.expect_set_voice()
        .with(eq("pt-BR-ElzaNeural"))
        .times(1)
        .returning(|_| ());
    tts.expect_capabilities().returning(|| Capabilities {
        debug_info: true,
        set_speed: true,
    });
    tts.expect_set_speed().with(eq(1.5f32)).times(1).returning(|_| ());

    apply_voice_settings(&mut tts, "pt-BR-ElzaNeural", 1.5);
}

#[test]
fn test_speed_skipped_when_unsupported() {
    let mut tts = MockTts::new();
    tts.expect_set_voice().times(0);
    tts.expect_capabilities().returning(Capabilities::default);
    tts.expect_id().return_const("mock");
    tts.expect_set_speed().times(0);

    apply_voice_settings(&mut tts, "", 2.0);
}

#[test]
fn test_default_speed_never_touches_engine() {
    let mut tts = MockTts::new();
    tts.expect_set_voice().with(eq("x")).times(1).returning(|_| ());
    tts.expect_capabilities().times(0);
    tts.expect_set_speed().times(0);

    apply_voice_settings(&mut tts, "x", 1.0);
}

#[test]
fn test_settings_to_engine() {
    let settings = Settings {
        tts_engine: "gtts".to_string(),
        tts_voice: "en-us-slow".to_string(),
        ..Settings::default()
    };
    let params = settings.tts_params(&RequestOverrides::default()).unwrap();
    let tts = registry::resolve_tts(&settings.tts_engine, &params).unwrap();
    assert_eq!(tts.id(), "gtts");
    assert_eq!(tts.current_voice(), "en-us-slow");

    let ids: Vec<String> = tts.list_voices().into_iter().map(|v| v.id).collect();
    assert_eq!(ids[..2], ["pt-br-slow", "pt-br-normal"]);
}

#[test]
fn test_default_settings_need_azure_credentials() {
    let settings = Settings::default();
    let params = settings.tts_params(&RequestOverrides::default()).unwrap();
    let err = registry::resolve(EngineKind::Tts, &settings.tts_engine, &params).unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(err, SpeechError::MissingCredentials { engine: "azure_tts", .. }));
}

#[tokio::test]
async fn test_cloud_stream_commits_once_per_threshold() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/openai/deployments/whisper/audio/transcriptions")
        .match_query(Matcher::Any)
        .match_header("api-key", "test-key")
        .with_status(200)
        .with_body(r#"{"text":" olá mundo "}"#)
        .expect(1)
        .create_async()
        .await;

    let settings = Settings {
        stt_engine: "azure_openai".to_string(),
        azure_openai_api_key: "test-key".to_string(),
        azure_openai_endpoint: server.url(),
        ..Settings::default()
    };
    let params = settings.stt_params(&RequestOverrides::default());
    let stt = registry::resolve_stt(&settings.stt_engine, &params).unwrap();

    let mut session = StreamingSession::new(stt);
    session.start().await.unwrap();
    assert!(session.push_chunk(&[0u8; 12_000]).await.is_empty());
    assert!(session.push_chunk(&[0u8; 12_000]).await.is_empty());
    let fragments = session.push_chunk(&[0u8; 10_000]).await;
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].kind, FragmentKind::Committed);
    assert_eq!(fragments[0].text, "olá mundo");

    // Discard policy: nothing left to flush.
    assert_eq!(session.close().await, None);
    assert_eq!(session.state(), SessionState::Closed);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_cloud_failures_do_not_end_the_session() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/openai/deployments/whisper/audio/transcriptions")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let settings = Settings {
        azure_openai_api_key: "k".to_string(),
        azure_openai_endpoint: server.url(),
        stream_threshold_bytes: 100,
        ..Settings::default()
    };
    let stt = registry::resolve_stt(
        "azure_openai_stt",
        &settings.stt_params(&RequestOverrides::default()),
    )
    .unwrap();

    let (chunk_tx, chunk_rx) = mpsc::channel(4);
    let (fragment_tx, mut fragment_rx) = mpsc::channel(4);
    let task = tokio::spawn(StreamingSession::new(stt).drive(chunk_rx, fragment_tx));
    for _ in 0..3 {
        chunk_tx.send(vec![0u8; 60]).await.unwrap();
    }
    drop(chunk_tx);

    assert!(fragment_rx.recv().await.is_none());
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.chunks_received, 3);
    // chunks 2 and 3 crossed the threshold and failed
    assert_eq!(report.dropped_chunks, 2);
    assert_eq!(report.fragments_emitted, 0);
    assert_eq!(report.final_text, "");
}
