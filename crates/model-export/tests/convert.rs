mod common;

use axum::http::StatusCode;
use common::{info_lines, MockHub};
use model_export::{Converter, ExportError, ModelInfo, MODEL_INFO_FILE};
use semantic_embeddings::fixtures::{self, TinyModel};
use semantic_embeddings::SemanticEmbeddings;
use tempfile::TempDir;

const REPO: &str = "tiny-org/tiny-bert";

/// A fixture model on disk plus a converter whose cache lives in a temp dir.
struct Setup {
    model_dir: TempDir,
    cache_dir: TempDir,
    out_root: TempDir,
}

impl Setup {
    fn new(fixture: TinyModel) -> Self {
        let model_dir = TempDir::new().unwrap();
        fixture.write(model_dir.path()).expect("Failed to write fixture model");
        Self {
            model_dir,
            cache_dir: TempDir::new().unwrap(),
            out_root: TempDir::new().unwrap(),
        }
    }

    fn model_name(&self) -> &str {
        self.model_dir.path().to_str().unwrap()
    }

    fn output(&self) -> std::path::PathBuf {
        self.out_root.path().join("models").join("tiny-bert")
    }

    fn local_converter(&self) -> Converter {
        let config = model_export::Config {
            endpoint: "http://127.0.0.1:9".to_string(),
            revision: "main".to_string(),
            cache_dir: Some(self.cache_dir.path().to_path_buf()),
            token: None,
        };
        Converter::new(&config).unwrap()
    }
}

#[tokio::test]
async fn test_local_model_writes_info_file() {
    let setup = Setup::new(TinyModel::default());
    let output = setup.output();

    let info = setup
        .local_converter()
        .convert(setup.model_name(), &output)
        .await
        .expect("Export should succeed");

    assert!(output.is_dir());
    assert!(output.join(MODEL_INFO_FILE).is_file());
    assert_eq!(info.version, "1.0.0");
    assert_eq!(info.dimension, fixtures::HIDDEN_SIZE);
    assert_eq!(info.max_seq_length, fixtures::MAX_SEQ_LENGTH);

    assert_eq!(
        info_lines(&output),
        vec![
            format!("name={}", setup.model_name()),
            "version=1.0.0".to_string(),
            format!("dimension={}", fixtures::HIDDEN_SIZE),
            format!("max_seq_length={}", fixtures::MAX_SEQ_LENGTH),
        ]
    );
}

#[tokio::test]
async fn test_info_matches_loaded_model() {
    let setup = Setup::new(TinyModel {
        dense_out_features: Some(4),
        ..TinyModel::default()
    });
    let output = setup.output();

    let info = setup
        .local_converter()
        .convert(setup.model_name(), &output)
        .await
        .unwrap();

    // The saved directory loads as the same model the info file describes
    let saved = SemanticEmbeddings::load_from_dir(&output).expect("Saved model should load");
    assert_eq!(info.dimension, 4);
    assert_eq!(saved.sentence_embedding_dimension(), info.dimension);
    assert_eq!(saved.max_seq_length(), info.max_seq_length);
    assert_eq!(ModelInfo::read_from(&output).await.unwrap(), info);
}

#[tokio::test]
async fn test_rerun_overwrites_with_identical_content() {
    let setup = Setup::new(TinyModel::default());
    let output = setup.output();
    let converter = setup.local_converter();

    converter.convert(setup.model_name(), &output).await.unwrap();
    let first = std::fs::read(output.join(MODEL_INFO_FILE)).unwrap();

    converter.convert(setup.model_name(), &output).await.unwrap();
    let second = std::fs::read(output.join(MODEL_INFO_FILE)).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_existing_output_dir_is_reused() {
    let setup = Setup::new(TinyModel::default());
    let output = setup.output();
    std::fs::create_dir_all(&output).unwrap();
    std::fs::write(output.join("unrelated.txt"), "keep me").unwrap();

    setup
        .local_converter()
        .convert(setup.model_name(), &output)
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(output.join("unrelated.txt")).unwrap(), "keep me");
    assert!(output.join(MODEL_INFO_FILE).is_file());
}

#[tokio::test]
async fn test_invalid_local_model_writes_nothing() {
    let setup = Setup::new(TinyModel::default());
    std::fs::remove_file(setup.model_dir.path().join("model.safetensors")).unwrap();
    let output = setup.output();

    let err = setup
        .local_converter()
        .convert(setup.model_name(), &output)
        .await
        .expect_err("Export should fail without weights");

    assert!(matches!(err, ExportError::Model(_)), "unexpected error: {}", err);
    assert!(!output.exists(), "output dir must not be created when loading fails");
}

#[tokio::test]
async fn test_empty_model_name_is_rejected() {
    let setup = Setup::new(TinyModel::default());
    let err = setup
        .local_converter()
        .convert("", &setup.output())
        .await
        .expect_err("Empty name should fail");
    assert!(matches!(err, ExportError::Config(_)));
}

#[tokio::test]
async fn test_hub_model_is_downloaded_and_cached() {
    let setup = Setup::new(TinyModel::default());
    let hub = MockHub::serve(REPO, setup.model_dir.path()).await;
    let converter = Converter::new(&hub.config(setup.cache_dir.path())).unwrap();
    let output = setup.output();

    let info = converter.convert(REPO, &output).await.expect("Hub export should succeed");

    assert_eq!(info.name, REPO);
    assert_eq!(info.dimension, fixtures::HIDDEN_SIZE);
    assert_eq!(info_lines(&output)[0], format!("name={}", REPO));

    let cached = setup
        .cache_dir
        .path()
        .join("tiny-org--tiny-bert")
        .join("main");
    for file in ["config.json", "tokenizer.json", "model.safetensors", "modules.json", "1_Pooling/config.json"] {
        assert!(cached.join(file).is_file(), "{} should be cached", file);
    }
    assert!(!cached.join("model.safetensors.part").exists());

    // Second run only asks again for optional files the repo does not have
    let first_run = hub.requests();
    converter.convert(REPO, &output).await.unwrap();
    let second_run = hub.requests() - first_run;
    assert!(
        second_run < first_run,
        "cached files should not be downloaded again ({} then {} requests)",
        first_run,
        second_run
    );
    for file in ["config.json", "tokenizer.json", "model.safetensors", "modules.json"] {
        let body = std::fs::read(cached.join(file)).unwrap();
        assert!(!body.is_empty());
    }
}

#[tokio::test]
async fn test_hub_plain_checkpoint() {
    let setup = Setup::new(TinyModel {
        sentence_files: false,
        ..TinyModel::default()
    });
    let hub = MockHub::serve(REPO, setup.model_dir.path()).await;
    let converter = Converter::new(&hub.config(setup.cache_dir.path())).unwrap();
    let output = setup.output();

    let info = converter.convert(REPO, &output).await.unwrap();

    // min(max_position_embeddings, tokenizer model_max_length)
    assert_eq!(info.max_seq_length, 24);
    assert_eq!(info.dimension, fixtures::HIDDEN_SIZE);
    assert!(output.join("modules.json").is_file());
    assert!(output.join("1_Pooling/config.json").is_file());
}

#[tokio::test]
async fn test_unknown_hub_model_writes_no_info() {
    let setup = Setup::new(TinyModel::default());
    let hub = MockHub::empty().await;
    let converter = Converter::new(&hub.config(setup.cache_dir.path())).unwrap();
    let output = setup.output();

    let err = converter
        .convert("nobody/does-not-exist", &output)
        .await
        .expect_err("Unknown model should fail");

    assert!(matches!(err, ExportError::ModelNotFound(ref name) if name == "nobody/does-not-exist"));
    assert!(!output.join(MODEL_INFO_FILE).exists());
}

#[tokio::test]
async fn test_hub_repo_without_tokenizer() {
    let setup = Setup::new(TinyModel::default());
    std::fs::remove_file(setup.model_dir.path().join("tokenizer.json")).unwrap();
    let hub = MockHub::serve(REPO, setup.model_dir.path()).await;
    let converter = Converter::new(&hub.config(setup.cache_dir.path())).unwrap();

    let err = converter
        .convert(REPO, &setup.output())
        .await
        .expect_err("Missing tokenizer should fail");

    assert!(
        matches!(err, ExportError::MissingFile { ref file, .. } if file == "tokenizer.json"),
        "unexpected error: {}",
        err
    );
}

#[tokio::test]
async fn test_hub_token_is_sent_as_bearer() {
    let setup = Setup::new(TinyModel::default());
    let hub = MockHub::serve(REPO, setup.model_dir.path()).await;
    let mut config = hub.config(setup.cache_dir.path());
    config.token = Some("hf_test_token".to_string());

    Converter::new(&config)
        .unwrap()
        .convert(REPO, &setup.output())
        .await
        .unwrap();

    let headers = hub.authorization();
    assert!(!headers.is_empty());
    assert!(
        headers.iter().all(|h| h.as_deref() == Some("Bearer hf_test_token")),
        "every request should carry the token: {:?}",
        headers
    );
}

#[tokio::test]
async fn test_no_token_sends_no_authorization() {
    let setup = Setup::new(TinyModel::default());
    let hub = MockHub::serve(REPO, setup.model_dir.path()).await;

    Converter::new(&hub.config(setup.cache_dir.path()))
        .unwrap()
        .convert(REPO, &setup.output())
        .await
        .unwrap();

    assert!(hub.authorization().iter().all(Option::is_none));
}

#[tokio::test]
async fn test_hub_server_error_is_reported() {
    let setup = Setup::new(TinyModel::default());
    let hub = MockHub::failing(StatusCode::INTERNAL_SERVER_ERROR).await;
    let output = setup.output();

    let err = Converter::new(&hub.config(setup.cache_dir.path()))
        .unwrap()
        .convert(REPO, &output)
        .await
        .expect_err("A 500 should fail the export");

    assert!(
        matches!(err, ExportError::Http { status, ref url } if status.as_u16() == 500 && url.contains(REPO)),
        "unexpected error: {}",
        err
    );
    assert!(!output.exists());
}

#[tokio::test]
async fn test_unsupported_architecture_writes_nothing() {
    let setup = Setup::new(TinyModel::default());
    let config_path = setup.model_dir.path().join("config.json");
    let config = std::fs::read_to_string(&config_path).unwrap();
    let roberta = config.replace(r#""model_type":"bert""#, r#""model_type":"roberta""#);
    assert_ne!(config, roberta);
    std::fs::write(&config_path, roberta).unwrap();
    let output = setup.output();

    let err = setup
        .local_converter()
        .convert(setup.model_name(), &output)
        .await
        .expect_err("Only BERT models should load");

    assert!(
        matches!(err, ExportError::Model(ref e) if format!("{:#}", e).contains("roberta")),
        "unexpected error: {}",
        err
    );
    assert!(!output.exists(), "output dir must not be created for an unsupported model");
}

#[tokio::test]
async fn test_local_model_needs_no_cache_dir() {
    let setup = Setup::new(TinyModel::default());
    let config = model_export::Config {
        endpoint: "http://127.0.0.1:9".to_string(),
        revision: "main".to_string(),
        cache_dir: None,
        token: None,
    };
    let output = setup.output();

    Converter::new(&config)
        .unwrap()
        .convert(setup.model_name(), &output)
        .await
        .expect("Local export should not depend on a cache dir");

    assert!(output.join(MODEL_INFO_FILE).is_file());
}

#[tokio::test]
async fn test_hub_module_path_cannot_leave_cache() {
    let setup = Setup::new(TinyModel::default());
    std::fs::write(
        setup.model_dir.path().join("modules.json"),
        r#"[
            {"idx": 0, "name": "0", "path": "", "type": "sentence_transformers.models.Transformer"},
            {"idx": 1, "name": "1", "path": "../../escaped", "type": "sentence_transformers.models.Pooling"}
        ]"#,
    )
    .unwrap();
    let hub = MockHub::serve(REPO, setup.model_dir.path()).await;
    let output = setup.output();

    let err = Converter::new(&hub.config(setup.cache_dir.path()))
        .unwrap()
        .convert(REPO, &output)
        .await
        .expect_err("Escaping module path should fail");

    assert!(matches!(err, ExportError::Model(_)), "unexpected error: {}", err);
    assert!(!setup.cache_dir.path().join("escaped").exists());
    assert!(!output.exists());
}
