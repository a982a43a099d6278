//! Free-text search over the product catalog.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::info;

use crate::encoder::Encoder;
use crate::error::{RelevanceError, Result};
use crate::model::Product;
use crate::service::EncoderRanker;

pub const DEFAULT_FIELDS: [&str; 3] = ["title", "brand", "category_path"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub rank: u32,
    pub product_id: String,
    pub score: f32,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRun {
    pub query: String,
    pub encoder: String,
    pub hits: Vec<SearchHit>,
}

/// Embeds the catalog and returns the `top_k` products closest to `query`,
/// each with the requested product `fields`.
pub fn search_catalog<E: Encoder>(
    encoder: E,
    products: &[Product],
    query: &str,
    top_k: usize,
    fields: &[String],
    batch_size: usize,
) -> Result<SearchRun> {
    if let Some(unknown) = fields.iter().find(|f| Product::default().field(f).is_none()) {
        return Err(RelevanceError::InvalidArg(format!(
            "unknown product field: {unknown}"
        )));
    }

    let name = encoder.name();
    let by_id: HashMap<&str, &Product> = products.iter().map(|p| (p.id.as_str(), p)).collect();
    let index = EncoderRanker::build(encoder, products, batch_size)?.with_limit(top_k);
    let scored = index.search(query)?;
    info!(encoder = %name, query, hits = scored.len(), "searched catalog");

    let hits = scored
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let product = by_id.get(c.product_id.as_str());
            let fields = fields
                .iter()
                .filter_map(|f| {
                    let value = product.and_then(|p| p.field(f))?;
                    Some((f.clone(), value.to_string()))
                })
                .collect();
            SearchHit {
                rank: i as u32 + 1,
                product_id: c.product_id,
                score: c.score,
                fields,
            }
        })
        .collect();

    Ok(SearchRun {
        query: query.to_string(),
        encoder: name,
        hits,
    })
}
