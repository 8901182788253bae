use rocket_db_pools::sqlx::FromRow;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ===== Product Models =====

/// One catalog entry, as it appears both in the JSONL feed and in the `products` table.
///
/// `id` is the only required field in the feed; absent text fields decode as empty
/// strings and an absent price as zero. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct Product {
    pub id: i64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
}
