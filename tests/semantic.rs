//! Library-level tests for the indexing and search pipeline, exercising
//! idempotent re-indexing, forced rebuilds, and provider pinning with the
//! offline mock provider.

use tempfile::TempDir;

use memstack::config::Config;
use memstack::error::MemoryError;
use memstack::indexer::run_index;
use memstack::searcher::run_search;
use memstack::store::{write_metadata, IndexMetadata, Metric};

fn test_config(dir: &TempDir) -> Config {
    let root = dir.path();
    let mut config = Config::default();
    config.memory.root = root.join("memory");
    config.db.path = root.join("db/memstack.sqlite");
    config.vector.path = root.join("vectors");
    config.embedding.provider = "mock".to_string();
    config
}

fn write_session(config: &Config, name: &str, content: &str) {
    let dir = config.memory.sessions_dir();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), content).unwrap();
}

#[tokio::test]
async fn test_reindex_skips_unchanged_chunks() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_session(
        &config,
        "2026-03-01-demo.md",
        "## Accomplished\nBuilt the indexing pipeline.\n\n## Next Steps\nWire up the search command.\n",
    );

    let report = run_index(&config, false).await.unwrap();
    assert_eq!(report.chunks_indexed, 2);

    let report = run_index(&config, false).await.unwrap();
    assert_eq!(report.chunks_indexed, 0);
    assert_eq!(report.message.as_deref(), Some("All chunks already indexed"));
}

#[tokio::test]
async fn test_edited_section_is_reindexed_alone() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_session(
        &config,
        "2026-03-01-demo.md",
        "## Accomplished\nBuilt the indexing pipeline.\n\n## Next Steps\nWire up the search command.\n",
    );
    run_index(&config, false).await.unwrap();

    write_session(
        &config,
        "2026-03-01-demo.md",
        "## Accomplished\nBuilt the indexing pipeline.\n\n## Next Steps\nWire up the search command and polish it.\n",
    );
    let report = run_index(&config, false).await.unwrap();
    assert_eq!(report.chunks_indexed, 1);
}

#[tokio::test]
async fn test_force_rebuilds_everything() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_session(
        &config,
        "2026-03-01-demo.md",
        "## Accomplished\nBuilt the indexing pipeline.\n",
    );
    run_index(&config, false).await.unwrap();

    let report = run_index(&config, true).await.unwrap();
    assert_eq!(report.chunks_indexed, 1);
}

#[tokio::test]
async fn test_failed_force_rebuild_preserves_index() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    write_session(
        &config,
        "2026-03-01-demo.md",
        "## Accomplished\nBuilt the indexing pipeline.\n",
    );
    run_index(&config, false).await.unwrap();

    // A rebuild that cannot produce embeddings must leave the existing
    // index searchable.
    std::env::remove_var("OPENAI_API_KEY");
    config.embedding.provider = "openai".to_string();
    assert!(run_index(&config, true).await.is_err());

    config.embedding.provider = "mock".to_string();
    let results = run_search(&config, "indexing pipeline", 5).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].project, "demo");
}

#[tokio::test]
async fn test_search_without_index_is_store_not_found() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let err = run_search(&config, "anything", 5).await.unwrap_err();
    assert!(matches!(err, MemoryError::StoreNotFound));
}

#[tokio::test]
async fn test_search_returns_ranked_results() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_session(
        &config,
        "2026-03-01-demo.md",
        "## Accomplished\nBuilt the indexing pipeline.\n\n## Problems\nFlaky network timeouts during testing.\n",
    );
    run_index(&config, false).await.unwrap();

    let results = run_search(&config, "indexing pipeline", 5).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].score >= results[1].score);
    for result in &results {
        assert!((0.0..=1.0).contains(&result.score));
        assert_eq!(result.project, "demo");
        assert_eq!(result.date, "2026-03-01");
    }
}

#[tokio::test]
async fn test_query_provider_is_pinned_to_index_provider() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_session(
        &config,
        "2026-03-01-demo.md",
        "## Accomplished\nBuilt the indexing pipeline.\n",
    );
    run_index(&config, false).await.unwrap();

    // Pretend the index was built with OpenAI embeddings. With no
    // credential available the query must refuse to substitute.
    std::env::remove_var("OPENAI_API_KEY");
    write_metadata(
        &config.vector.path,
        &IndexMetadata {
            provider: "openai".to_string(),
            dimension: 1536,
            metric: Metric::Cosine,
        },
    )
    .unwrap();

    let err = run_search(&config, "anything", 5).await.unwrap_err();
    match err {
        MemoryError::ProviderMismatch { required } => assert_eq!(required, "openai"),
        other => panic!("expected ProviderMismatch, got {:?}", other),
    }
}
