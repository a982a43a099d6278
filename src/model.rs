use serde::{Deserialize, Serialize};

pub type Embedding = Vec<f32>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(rename = "query_id")]
    pub id: String,
    #[serde(rename = "query")]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
    #[serde(rename = "product_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub brand: String,
    pub category_path: String,
    pub ingredients: String,
    pub safety_warning: String,
}

impl Product {
    /// Text handed to the encoder for this product.
    pub fn search_text(&self) -> String {
        let parts = [
            self.title.clone(),
            self.description.clone(),
            format!("Brand: {}.", self.brand),
            format!("Category: {}.", self.category_path),
            format!("Ingredients: {}.", self.ingredients),
            format!("Warning: {}.", self.safety_warning),
        ];

        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "product_id" | "id" => &self.id,
            "title" => &self.title,
            "description" => &self.description,
            "brand" => &self.brand,
            "category_path" | "category" => &self.category_path,
            "ingredients" => &self.ingredients,
            "safety_warning" | "warning" => &self.safety_warning,
            _ => return None,
        };
        Some(value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceLabel {
    pub query_id: String,
    pub product_id: String,
    pub relevance: u8,
}

/// Predictions share the label file layout.
pub type Prediction = RelevanceLabel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub product_id: String,
    pub score: f32,
}

impl ScoredCandidate {
    pub fn new(product_id: impl Into<String>, score: f32) -> Self {
        Self {
            product_id: product_id.into(),
            score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub query_id: String,
    pub rank: u32,
    pub product_id: String,
}

/// A label joined against the query and product catalogs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgedPair {
    pub query_id: String,
    pub query_text: String,
    pub product_id: String,
    pub product_text: String,
    pub product_title: String,
    pub relevance: u8,
}
