mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use common::{spawn_fake_ollama, FakeOllama};
use ragdesk::app::App;
use ragdesk::config::{Config, RebuildPolicy, DEFAULT_FALLBACK_PHRASE};
use ragdesk::embedding::OllamaEmbedder;
use ragdesk::error::QaErrorKind;
use ragdesk::index::{build_index, BuildOutcome, Retriever};
use ragdesk::llm::ModelUnavailable;
use ragdesk::session::{NoopSink, TurnState};

fn write_docs(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("handbook.md"),
        "# Employee handbook\n\nEvery employee receives twenty five vacation days per year.\n\n\
         Vacation requests go to your manager two weeks ahead.",
    )
    .unwrap();
    fs::write(
        dir.join("kitchen.txt"),
        "The office kitchen has a coffee machine and a dishwasher.\n\n\
         Please empty the dishwasher every morning.",
    )
    .unwrap();
    fs::write(
        dir.join("travel.csv"),
        "city,hotel\nBerlin,Adlon\nLisbon,Avenida Palace\n",
    )
    .unwrap();
}

fn test_config(root: &Path, fake: &FakeOllama) -> Config {
    let mut config = Config::default();
    config.ingest.dir = root.join("documents");
    config.index.dir = root.join("index");
    config.llm.url = fake.url.clone();
    config.llm.startup_attempts = 3;
    config.llm.poll_interval_ms = 10;
    config.embedding.provider = "ollama".to_string();
    config.embedding.max_retries = 0;
    config.chunking.chunk_size = 200;
    config.chunking.chunk_overlap = 20;
    config
}

async fn setup() -> (TempDir, FakeOllama, Config) {
    let tmp = TempDir::new().unwrap();
    let fake = spawn_fake_ollama().await;
    write_docs(&tmp.path().join("documents"));
    let config = test_config(tmp.path(), &fake);
    (tmp, fake, config)
}

#[tokio::test]
async fn presence_policy_skips_build_when_index_exists() {
    let (_tmp, fake, mut config) = setup().await;
    config.index.rebuild = RebuildPolicy::Presence;
    let embedder = OllamaEmbedder::new(&config).unwrap();

    let first = build_index(&config, &embedder).await.unwrap();
    assert_eq!(first.outcome, BuildOutcome::Built);
    let calls = fake.embed_calls();
    assert!(calls > 0);

    // Source changes are ignored under this policy.
    fs::write(config.ingest.dir.join("new.md"), "A brand new document.").unwrap();
    let second = build_index(&config, &embedder).await.unwrap();
    assert_eq!(second.outcome, BuildOutcome::Reused);
    assert_eq!(second.chunks, first.chunks);
    assert_eq!(fake.embed_calls(), calls);
}

#[tokio::test]
async fn fingerprint_policy_rebuilds_only_on_change() {
    let (_tmp, fake, config) = setup().await;
    assert_eq!(config.index.rebuild, RebuildPolicy::Fingerprint);
    let embedder = OllamaEmbedder::new(&config).unwrap();

    let first = build_index(&config, &embedder).await.unwrap();
    assert_eq!(first.outcome, BuildOutcome::Built);

    let calls = fake.embed_calls();
    let unchanged = build_index(&config, &embedder).await.unwrap();
    assert_eq!(unchanged.outcome, BuildOutcome::Reused);
    assert_eq!(fake.embed_calls(), calls);

    fs::write(config.ingest.dir.join("new.md"), "Parking spots are assigned yearly.").unwrap();
    let changed = build_index(&config, &embedder).await.unwrap();
    assert_eq!(changed.outcome, BuildOutcome::Built);
    assert_eq!(changed.files, 4);
    assert!(changed.chunks > first.chunks);
    assert!(fake.embed_calls() > calls);
}

#[tokio::test]
async fn retrieval_is_deterministic_and_bounded() {
    let (_tmp, _fake, config) = setup().await;
    let app = App::start(config).await.unwrap();
    assert!(!app.index.is_empty());

    let query = "how many vacation days per year";
    let first = app.index.retrieve(query, 3, 10).await.unwrap();
    let second = app.index.retrieve(query, 3, 10).await.unwrap();

    assert!(!first.is_empty() && first.len() <= 3);
    let ids: Vec<&str> = first.iter().map(|c| c.id.as_str()).collect();
    let ids_again: Vec<&str> = second.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ids_again);
    assert!(first.iter().all(|c| !c.text.trim().is_empty()));
    assert_eq!(first[0].source, "handbook.md");
    assert!(first[0].text.contains("vacation"));
}

#[tokio::test]
async fn answers_with_sources_and_falls_back_when_absent() {
    let (_tmp, fake, config) = setup().await;
    let app = App::start(config).await.unwrap();
    let id = app.sessions.create_session();

    let turn = app
        .sessions
        .ask(&id, "How many vacation days do employees get?", &NoopSink)
        .await
        .unwrap();
    match &turn.state {
        TurnState::Answered { answer, sources } => {
            assert!(answer.starts_with("Based on the documents:"));
            assert!(sources.contains("handbook.md"));
        }
        other => panic!("expected an answer, got {:?}", other),
    }

    let turn = app
        .sessions
        .ask(&id, "Who painted the ceiling?", &NoopSink)
        .await
        .unwrap();
    match &turn.state {
        TurnState::Answered { answer, .. } => assert_eq!(answer, DEFAULT_FALLBACK_PHRASE),
        other => panic!("expected the fallback answer, got {:?}", other),
    }
    assert_eq!(fake.chat_calls(), 2);
}

#[tokio::test]
async fn generation_failure_stays_in_its_turn() {
    let (_tmp, _fake, config) = setup().await;
    let app = App::start(config).await.unwrap();
    let id = app.sessions.create_session();

    let failed = app
        .sessions
        .ask(&id, "Will the dishwasher explode?", &NoopSink)
        .await
        .unwrap();
    match &failed.state {
        TurnState::Failed { kind, message } => {
            assert_eq!(*kind, QaErrorKind::Generation);
            assert!(message.contains("500"));
        }
        other => panic!("expected a failed turn, got {:?}", other),
    }

    let ok = app
        .sessions
        .ask(&id, "When should the dishwasher be emptied?", &NoopSink)
        .await
        .unwrap();
    assert!(matches!(ok.state, TurnState::Answered { .. }));
    assert_eq!(app.sessions.transcript(&id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_sessions_share_the_index() {
    let (_tmp, _fake, config) = setup().await;
    let app = App::start(config).await.unwrap();
    let sessions = app.sessions.clone();

    let mut handles = Vec::new();
    for question in ["vacation days?", "dishwasher rules?", "hotel in Lisbon?"] {
        let sessions = Arc::clone(&sessions);
        handles.push(tokio::spawn(async move {
            let id = sessions.create_session();
            sessions.ask(&id, question, &NoopSink).await.unwrap();
            (id, question)
        }));
    }
    for handle in handles {
        let (id, question) = handle.await.unwrap();
        let transcript = sessions.transcript(&id).await.unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].question, question);
    }
}

#[tokio::test]
async fn unreachable_model_is_fatal_at_startup() {
    let tmp = TempDir::new().unwrap();
    write_docs(&tmp.path().join("documents"));
    let mut config = Config::default();
    config.ingest.dir = tmp.path().join("documents");
    config.index.dir = tmp.path().join("index");
    config.llm.url = "http://127.0.0.1:9".to_string();
    config.llm.startup_attempts = 2;
    config.llm.poll_interval_ms = 10;
    config.llm.timeout_secs = Some(2);

    let err = App::start(config).await.err().unwrap();
    let unavailable = err.downcast_ref::<ModelUnavailable>().unwrap();
    assert_eq!(unavailable.attempts, 2);
}
