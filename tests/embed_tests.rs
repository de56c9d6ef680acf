use llama_runtime::{MockEngine, MockEvent, MockModel};
use llama_session::{Embedding, Runtime, Session, SessionConfig, FALLBACK_DIM};

fn open(model: MockModel) -> (Runtime<MockEngine>, Session<MockEngine>) {
    let runtime = Runtime::new(MockEngine::new().with_default_model(model));
    let session = Session::open(&runtime, "model.gguf").unwrap();
    (runtime, session)
}

#[test]
fn pooled_embedding_has_model_width() {
    let (_runtime, mut session) = open(MockModel::new().with_n_embd(96));
    let embedding = session.embed("hello world").unwrap();
    assert!(!embedding.is_fallback());
    assert_eq!(embedding.dimension(), 96);
    assert_eq!(embedding.dimension(), session.n_embd());
}

#[test]
fn fallback_is_truncated_logits() {
    let (_runtime, mut session) = open(MockModel::new().with_vocab_size(1000).without_pooling());
    let embedding = session.embed("hello world").unwrap();
    assert!(embedding.is_fallback());
    assert_eq!(embedding.dimension(), FALLBACK_DIM);
}

#[test]
fn fallback_is_clamped_to_small_vocabularies() {
    let (_runtime, mut session) = open(MockModel::new().with_vocab_size(300).without_pooling());
    let embedding = session.embed("hi").unwrap();
    assert!(matches!(embedding, Embedding::Fallback(ref v) if v.len() == 300));
}

#[test]
fn context_without_embeddings_falls_back() {
    let runtime = Runtime::new(MockEngine::new());
    let config = SessionConfig::new("model.gguf").with_embeddings(false);
    let mut session = Session::load(&runtime, &config).unwrap();
    assert!(session.embed("hi").unwrap().is_fallback());
}

#[test]
fn embedding_is_deterministic_and_input_dependent() {
    let (_runtime, mut session) = open(MockModel::new());
    let a = session.embed("alpha").unwrap();
    let b = session.embed("alpha").unwrap();
    let c = session.embed("a completely different sentence").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn each_embed_starts_a_fresh_sequence() {
    let (runtime, mut session) = open(MockModel::new());
    session.embed("first").unwrap();
    session.embed("second").unwrap();

    let clears = runtime
        .engine()
        .events()
        .iter()
        .filter(|e| matches!(e, MockEvent::KvClear { .. }))
        .count();
    assert_eq!(clears, 2);
    assert!(runtime
        .engine()
        .batches()
        .iter()
        .all(|b| b.positions.first() == Some(&0)));
}

#[test]
fn normalized_embedding_has_unit_length() {
    let (_runtime, mut session) = open(MockModel::new());
    let embedding = session.embed("normalize me").unwrap().normalized();
    let norm: f32 = embedding.values().iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);
}

#[test]
fn batch_embeds_each_input_in_order() {
    let (runtime, mut session) = open(MockModel::new().with_n_embd(32));
    let expected = vec![session.embed("one").unwrap(), session.embed("two").unwrap()];
    runtime.engine().clear_logs();

    let batch = session.embed_batch(&["one", "two"]).unwrap();
    assert_eq!(batch.dimension, 32);
    assert_eq!(batch.embeddings, expected);
    assert!(batch.duration_ms >= 0.0);

    let clears = runtime
        .engine()
        .events()
        .iter()
        .filter(|e| matches!(e, MockEvent::KvClear { .. }))
        .count();
    assert_eq!(clears, 2);
}

#[test]
fn batch_gives_empty_input_a_zero_vector() {
    let (runtime, mut session) = open(MockModel::new().with_n_embd(16).without_bos());
    let batch = session.embed_batch(&["", "text", ""]).unwrap();
    assert_eq!(batch.dimension, 16);
    assert_eq!(batch.embeddings.len(), 3);
    assert_eq!(batch.embeddings[0], Embedding::Pooled(vec![0.0; 16]));
    assert_eq!(batch.embeddings[2], batch.embeddings[0]);
    assert!(batch.embeddings[1].values().iter().any(|&v| v != 0.0));
    // Only the non-empty input reached the engine.
    assert_eq!(runtime.engine().batches().len(), 1);
}

#[test]
fn batch_zero_vectors_follow_the_fallback_width() {
    let (_runtime, mut session) =
        open(MockModel::new().with_vocab_size(300).without_pooling().without_bos());
    let batch = session.embed_batch(&["", "hi"]).unwrap();
    assert_eq!(batch.dimension, 300);
    assert_eq!(batch.embeddings[0], Embedding::Fallback(vec![0.0; 300]));
    assert!(batch.embeddings[1].is_fallback());
}

#[test]
fn batch_of_only_empty_inputs_uses_model_width() {
    let (runtime, mut session) = open(MockModel::new().with_n_embd(8).without_bos());
    let batch = session.embed_batch(&[""]).unwrap();
    assert_eq!(batch.dimension, 8);
    assert_eq!(batch.embeddings, vec![Embedding::Pooled(vec![0.0; 8])]);
    assert!(runtime.engine().batches().is_empty());

    let none: [&str; 0] = [];
    let empty = session.embed_batch(&none).unwrap();
    assert!(empty.embeddings.is_empty());
    assert_eq!(empty.dimension, 8);
}
