//! Multi-tenant isolation: vector search never returns another user's chunks,
//! whatever filters the caller combines.

use std::sync::Arc;
use std::time::Duration;

use rag_context_engine::core::models::EmbeddingVector;
use rag_context_engine::core::store::{InMemoryVectorStore, VectorFilter, VectorRecord, VectorStore};
use rag_context_engine::retriever::VectorRetriever;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const USERS: usize = 6;
const DOCS_PER_USER: usize = 5;
const CHUNKS_PER_DOC: usize = 3;
const TOPICS: [&str; 3] = ["bou", "climate", "football"];
const DIMS: usize = 4;

fn random_vector(rng: &mut StdRng) -> Vec<f32> {
    (0..DIMS).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn user(i: usize) -> String {
    format!("user{}", i)
}

async fn seeded_store(rng: &mut StdRng) -> Arc<InMemoryVectorStore> {
    let store = Arc::new(InMemoryVectorStore::new());
    let mut records = Vec::new();
    for u in 0..USERS {
        for d in 0..DOCS_PER_USER {
            // Document ids repeat across users on purpose.
            let document_id = format!("doc{}", d);
            let topic = TOPICS[rng.random_range(0..TOPICS.len())];
            for c in 0..CHUNKS_PER_DOC {
                records.push(VectorRecord {
                    id: format!("{}:{}", document_id, c),
                    user_id: user(u),
                    topic_id: rng.random_bool(0.8).then(|| topic.to_string()),
                    document_id: document_id.clone(),
                    chunk_index: c,
                    title: format!("{} of {}", document_id, user(u)),
                    text: format!("owner={} doc={} chunk={}", user(u), document_id, c),
                    estimated_token_count: 8,
                    values: random_vector(rng),
                });
            }
        }
    }
    store.upsert(records).await.unwrap();
    store
}

#[tokio::test]
async fn test_search_never_crosses_users() {
    let mut rng = StdRng::seed_from_u64(0x5eed_1234);
    let store = seeded_store(&mut rng).await;
    let retriever = VectorRetriever::new(store.clone(), Duration::from_secs(5));

    for _ in 0..500 {
        let owner = user(rng.random_range(0..USERS));
        let topic = rng
            .random_bool(0.5)
            .then(|| TOPICS[rng.random_range(0..TOPICS.len())]);
        let documents = rng.random_bool(0.5).then(|| {
            (0..rng.random_range(0..4))
                .map(|_| format!("doc{}", rng.random_range(0..DOCS_PER_USER + 2)))
                .collect::<Vec<_>>()
        });

        let filter = VectorFilter::for_user(owner.as_str())
            .with_topic(topic)
            .with_documents(documents.clone());
        let query = EmbeddingVector::new("query", random_vector(&mut rng));
        let top_k = rng.random_range(1..40);

        let items = retriever.search(&query, &filter, top_k, 0.0).await.unwrap();

        assert!(items.len() <= top_k);
        let marker = format!("owner={} ", owner);
        for item in &items {
            assert!(
                item.snippet.starts_with(&marker),
                "user {} received {:?} with filter {}",
                owner,
                item.snippet,
                filter.summary()
            );
            if let Some(ids) = documents.as_ref().filter(|ids| !ids.is_empty()) {
                assert!(ids.iter().any(|id| Some(id.as_str()) == item.document_id.as_deref()));
            }
        }
        for pair in items.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}

#[tokio::test]
async fn test_delete_is_scoped_to_user() {
    let mut rng = StdRng::seed_from_u64(7);
    let store = seeded_store(&mut rng).await;
    let before = store.len();

    let filter = VectorFilter::for_user("user0").with_documents(Some(vec!["doc0".to_string()]));
    let removed = store.delete_by_filter(&filter).await.unwrap();

    assert_eq!(removed, CHUNKS_PER_DOC);
    assert_eq!(store.len(), before - CHUNKS_PER_DOC);

    let retriever = VectorRetriever::new(store, Duration::from_secs(5));
    let query = EmbeddingVector::new("query", random_vector(&mut rng));
    let other = VectorFilter::for_user("user1").with_documents(Some(vec!["doc0".to_string()]));
    let items = retriever.search(&query, &other, 10, 0.0).await.unwrap();
    assert_eq!(items.len(), CHUNKS_PER_DOC);
}
