use recall::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// Letter-frequency embeddings; deterministic and good enough to rank by overlap.
struct LetterProvider;

#[async_trait]
impl Provider for LetterProvider {
    async fn chat<'a>(
        &'a self,
        request: ChatRequest,
        mut callback: Box<dyn FnMut(ChatResponse) + Send + 'a>,
    ) -> recall::provider::Result<()> {
        callback(ChatResponse {
            model: request.model,
            content: "summary".to_string(),
            done: true,
        });
        Ok(())
    }

    async fn embed(&self, request: &EmbedRequest) -> recall::provider::Result<Vec<f32>> {
        let mut counts = vec![0.0f32; 26];
        for c in request.input[0].chars().filter(char::is_ascii_lowercase) {
            counts[(c as u8 - b'a') as usize] += 1.0;
        }
        Ok(counts)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_ingest_search_list_delete() -> anyhow::Result<()> {
    init_tracing();

    let mut config = Config::default();
    config.storage.backend = StorageMode::Memory;

    let pools = CachePools::from_settings(&config.cache);
    let sweeper = pools.spawn_sweeper(Duration::from_secs(60));

    let engine = RetrievalEngine::new(Arc::new(LetterProvider), Arc::new(MemoryStore::new()), &config)
        .with_caches(&pools);

    let mut doc = NewDocument::new("zebra zoo").with_id("z").with_title("Zebras");
    doc.extra.insert("source".to_string(), serde_json::json!("handbook"));
    engine.upsert(doc, Some("animals")).await?;
    engine
        .upsert(NewDocument::new("apple banana").with_id("fruit"), Some("animals"))
        .await?;

    let outcome = engine.search_text("zoo", Some("animals")).await?;
    assert_eq!(outcome.path, SearchPath::Fallback);
    assert_eq!(outcome.results[0].id, "z");
    assert_eq!(outcome.results[0].metadata.extra["source"], "handbook");

    let cached = engine.search_text("zoo", Some("animals")).await?;
    assert_eq!(cached.path, SearchPath::Cache);

    let listed = engine.list(Some("animals")).await?;
    assert_eq!(listed.len(), 2);

    engine.delete("z", Some("animals")).await?;
    let after = engine.search_text("zoo", Some("animals")).await?;
    assert!(after.results.iter().all(|r| r.id != "z"));

    let report = engine.research("zoo", Some("animals")).await?;
    assert_eq!(report.analysis, "summary");

    sweeper.shutdown().await;
    Ok(())
}
