use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::{JudgedPair, Product, Query, RelevanceLabel};
use crate::relevance::MAX_RELEVANCE;

pub fn load_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)?;
    let items: Vec<T> = serde_json::from_reader(BufReader::new(file))?;
    Ok(items)
}

pub fn save_json_array<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, items)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn load_products(path: &Path) -> Result<Vec<Product>> {
    let products: Vec<Product> = load_json_array(path)?;
    info!(count = products.len(), path = %path.display(), "loaded products");
    Ok(products)
}

pub fn load_queries(path: &Path) -> Result<Vec<Query>> {
    let queries: Vec<Query> = load_json_array(path)?;
    info!(count = queries.len(), path = %path.display(), "loaded queries");
    Ok(queries)
}

pub fn load_labels(path: &Path) -> Result<Vec<RelevanceLabel>> {
    let labels: Vec<RelevanceLabel> = load_json_array(path)?;
    info!(count = labels.len(), path = %path.display(), "loaded labels");
    Ok(labels)
}

#[derive(Debug, Default)]
pub struct JoinOutcome {
    pub pairs: Vec<JudgedPair>,
    pub missing_query: usize,
    pub missing_product: usize,
    pub out_of_range: usize,
}

impl JoinOutcome {
    pub fn skipped(&self) -> usize {
        self.missing_query + self.missing_product + self.out_of_range
    }
}

/// Joins labels against the catalogs, dropping labels that reference
/// unknown ids or carry a relevance above the top level.
pub fn join_labels(
    queries: &[Query],
    products: &[Product],
    labels: &[RelevanceLabel],
) -> JoinOutcome {
    let query_index: HashMap<&str, &Query> = queries.iter().map(|q| (q.id.as_str(), q)).collect();
    let product_index: HashMap<&str, &Product> =
        products.iter().map(|p| (p.id.as_str(), p)).collect();
    let mut product_text: HashMap<&str, String> = HashMap::new();

    let mut outcome = JoinOutcome::default();
    for label in labels {
        let Some(query) = query_index.get(label.query_id.as_str()) else {
            outcome.missing_query += 1;
            continue;
        };
        let Some(product) = product_index.get(label.product_id.as_str()) else {
            outcome.missing_product += 1;
            continue;
        };
        if label.relevance > MAX_RELEVANCE {
            outcome.out_of_range += 1;
            continue;
        }

        let text = product_text
            .entry(product.id.as_str())
            .or_insert_with(|| product.search_text())
            .clone();

        outcome.pairs.push(JudgedPair {
            query_id: query.id.clone(),
            query_text: query.text.clone(),
            product_id: product.id.clone(),
            product_text: text,
            product_title: product.title.clone(),
            relevance: label.relevance,
        });
    }

    if outcome.skipped() > 0 {
        warn!(
            missing_query = outcome.missing_query,
            missing_product = outcome.missing_product,
            out_of_range = outcome.out_of_range,
            "skipped labels that could not be joined"
        );
    }
    info!(pairs = outcome.pairs.len(), "joined labels");

    outcome
}

const SPLIT_BUCKETS: u64 = 10_000;

fn fnv1a(seed: u64, parts: &[&str]) -> u64 {
    let mut h: u64 = 1469598103934665603;
    for b in seed.to_le_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    for part in parts {
        for b in part.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(1099511628211);
        }
        // separator so ("ab", "c") and ("a", "bc") differ
        h ^= 0xff;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

pub fn in_test_split(pair: &JudgedPair, test_fraction: f64, seed: u64) -> bool {
    let cutoff = (test_fraction.clamp(0.0, 1.0) * SPLIT_BUCKETS as f64).round() as u64;
    fnv1a(seed, &[&pair.query_id, &pair.product_id]) % SPLIT_BUCKETS < cutoff
}

/// Deterministic holdout: returns `(train, test)`, preserving input order.
pub fn holdout(
    pairs: Vec<JudgedPair>,
    test_fraction: f64,
    seed: u64,
) -> (Vec<JudgedPair>, Vec<JudgedPair>) {
    pairs
        .into_iter()
        .partition(|p| !in_test_split(p, test_fraction, seed))
}

/// Groups pairs by query id. Groups come in the order their query first
/// appears, and pairs keep their input order inside each group.
pub fn group_by_query(pairs: &[JudgedPair]) -> Vec<(String, Vec<&JudgedPair>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&JudgedPair>)> = Vec::new();
    for pair in pairs {
        let slot = *index.entry(pair.query_id.as_str()).or_insert_with(|| {
            groups.push((pair.query_id.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(pair);
    }
    groups
}
