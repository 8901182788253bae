//! Point lookups against the loaded catalog.

use rocket::{get, serde::json::Json};
use rocket_db_pools::{Connection, sqlx};
use rocket_okapi::openapi;

use crate::db::CatalogDb;
use crate::error::ApiError;
use crate::models::Product;

pub(crate) fn parse_product_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("Product id '{raw}' is not an integer")))
}

/// Fetch one product by id.
#[openapi(tag = "Products")]
#[get("/product/<id>")]
pub async fn get_product(
    id: String,
    mut db: Connection<CatalogDb>,
) -> Result<Json<Product>, ApiError> {
    let id = parse_product_id(&id)?;

    let product = sqlx::query_as::<_, Product>(
        r#"
        SELECT id, price, title, category, brand, url, description
        FROM products
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **db)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("Product {id} not found")))?;

    Ok(Json(product))
}
