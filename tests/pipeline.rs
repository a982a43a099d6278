use relevance_eval::encoder::{Encoder, FixtureEncoder};
use relevance_eval::evaluate::evaluate;
use relevance_eval::model::{Prediction, Product, ScoredCandidate};
use relevance_eval::ranking::{order, rank};
use relevance_eval::relevance::score_to_relevance;
use relevance_eval::scoring::{score_candidates, similarity};
use relevance_eval::submission::{convert_predictions, validate_submission};

fn product(id: &str, title: &str) -> Product {
    Product {
        id: id.into(),
        title: title.into(),
        ..Product::default()
    }
}

#[test]
fn soup_query_ranks_and_maps_relevance() {
    let products = [product("p1", "Lentil Soup"), product("p2", "Chocolate Cake")];
    let encoder = FixtureEncoder::new("fixture")
        .with("soup", vec![1.0, 0.0])
        .unwrap()
        .with(products[0].search_text(), vec![0.8, 0.6])
        .unwrap()
        .with(products[1].search_text(), vec![0.2, 0.9797959])
        .unwrap();

    let query = encoder.embed_one("soup").unwrap();
    let texts: Vec<String> = products.iter().map(Product::search_text).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let vectors = encoder.embed_many(&refs).unwrap();
    let catalog: Vec<(&str, &[f32])> = products
        .iter()
        .zip(&vectors)
        .map(|(p, v)| (p.id.as_str(), v.as_slice()))
        .collect();

    let scored = score_candidates(&query, &catalog);
    assert!((scored[0].score - 0.8).abs() < 1e-5);
    assert!((scored[1].score - 0.2).abs() < 1e-5);

    let ranked = rank("q1", &scored);
    let order: Vec<(&str, u32)> = ranked
        .iter()
        .map(|e| (e.product_id.as_str(), e.rank))
        .collect();
    assert_eq!(order, vec![("p1", 1), ("p2", 2)]);

    assert_eq!(score_to_relevance(scored[0].score), 3);
    assert_eq!(score_to_relevance(scored[1].score), 0);
}

#[test]
fn evaluation_of_a_good_ranker() {
    let relevances = [3, 2, 1, 0, 3, 0];
    let scores = [0.9, 0.6, 0.4, 0.1, 0.8, 0.2];
    let result = evaluate(&relevances, &scores);

    assert!(result.spearman > 0.9);
    assert!(result.pearson > 0.9);
    assert!((result.ndcg - 1.0).abs() < 1e-9);
    assert!((result.separation - 0.7).abs() < 1e-9);
    assert_eq!(result.per_level_stats.len(), 4);
}

#[test]
fn similarity_is_symmetric_and_bounded() {
    let a = [0.3, -0.2, 0.9];
    let b = [0.1, 0.4, -0.5];
    let s = similarity(&a, &b);
    assert_eq!(s, similarity(&b, &a));
    assert!((-1.0..=1.0).contains(&s));
    assert_eq!(similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
}

#[test]
fn predictions_become_a_valid_submission() {
    let scored: Vec<ScoredCandidate> = (0..12)
        .map(|i| ScoredCandidate::new(format!("p{i:02}"), i as f32 / 12.0))
        .collect();
    let predictions: Vec<Prediction> = order(&scored)
        .into_iter()
        .map(|c| Prediction {
            query_id: "q1".into(),
            relevance: score_to_relevance(c.score),
            product_id: c.product_id,
        })
        .collect();

    let entries = convert_predictions(&predictions);
    assert_eq!(entries.len(), 12);
    assert_eq!(entries[0].product_id, "p11");
    assert!(validate_submission(&entries, 10).is_valid());
    assert!(!validate_submission(&entries, 13).is_valid());
}
