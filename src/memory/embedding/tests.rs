use super::*;

#[tokio::test]
async fn mock_generator_is_deterministic() {
    let gen1 = MockEmbeddingGenerator::new(16);
    let gen2 = MockEmbeddingGenerator::new(16);
    let a = gen1.embed("remember the coffee order").await.unwrap();
    let b = gen2.embed("remember the coffee order").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 16);
}

#[tokio::test]
async fn mock_generator_differs_for_different_text() {
    let gen = MockEmbeddingGenerator::new(16);
    let a = gen.embed("alpha").await.unwrap();
    let b = gen.embed("beta").await.unwrap();
    assert_ne!(a, b);
}

#[test]
fn cosine_similarity_identical_vectors_is_one() {
    let v = vec![0.3, 0.4, 0.1];
    assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
}

#[test]
fn cosine_similarity_orthogonal_is_zero() {
    let a = vec![1.0, 0.0];
    let b = vec![0.0, 1.0];
    assert!(cosine_similarity(&a, &b).abs() < 1e-5);
}

#[test]
fn cosine_similarity_mismatched_length_is_zero() {
    let a = vec![1.0, 0.0];
    let b = vec![1.0, 0.0, 0.0];
    assert_eq!(cosine_similarity(&a, &b), 0.0);
}

#[test]
fn cosine_similarity_never_negative() {
    let a = vec![1.0, 0.0];
    let b = vec![-1.0, 0.0];
    assert_eq!(cosine_similarity(&a, &b), 0.0);
}

#[test]
fn from_spec_mock_parses_dims() {
    let gen = from_spec("mock:8", None).unwrap();
    assert_eq!(gen.dimensions(), 8);
}

#[test]
fn from_spec_openai_requires_api_key() {
    assert!(from_spec("openai:text-embedding-3-small", None).is_err());
    assert!(from_spec("openai:text-embedding-3-small", Some("sk-test")).is_ok());
}

#[test]
fn from_spec_local_requires_url() {
    assert!(from_spec("local:", None).is_err());
    assert!(from_spec("local:http://127.0.0.1:9000", None).is_ok());
}

#[test]
fn from_spec_rejects_unknown_backend() {
    assert!(from_spec("carrier-pigeon:v1", None).is_err());
}
