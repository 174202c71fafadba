use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::app_state::AppState;
use crate::auth::{auth_user_id, require_staff};
use crate::errors::{is_foreign_key_violation, map_db_error, ServerError};
use crate::models::{
    CategoryRow, CreateCategoryRequest, CreateProductRequest, ProductListQuery, ProductRow,
    UpdateProductRequest,
};
use crate::validation::{
    check_image_url, optional_text, required_text, MAX_DESCRIPTION_LEN, MAX_PRODUCT_NAME_LEN,
};

/// Keeps `price * quantity` and order totals well inside `i64`.
const MAX_PRICE_CENTS: i64 = 100_000_000_000;
const MAX_STOCK: i64 = 1_000_000;

const PRODUCT_SELECT: &str = "SELECT p.id, p.name, p.description, p.price_cents, p.stock, p.image_url, p.category_id, c.name AS category_name FROM products p JOIN categories c ON c.id = p.category_id";

pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<CategoryRow>>, ServerError> {
    let rows = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, name, description FROM categories ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

pub async fn create_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<CategoryRow>), ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    require_staff(&state, user_id).await?;

    let name = required_text("name", &payload.name, MAX_PRODUCT_NAME_LEN)?;
    let description = optional_text("description", &payload.description, MAX_DESCRIPTION_LEN)?;

    let row = sqlx::query_as::<_, CategoryRow>(
        "INSERT INTO categories (name, description) VALUES (?1, ?2) RETURNING id, name, description",
    )
    .bind(name)
    .bind(description)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| map_db_error(e, "category already exists"))?;

    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
) -> Result<Json<Vec<ProductRow>>, ServerError> {
    let rows = match query.category_id {
        Some(category_id) => {
            sqlx::query_as::<_, ProductRow>(&format!(
                "{PRODUCT_SELECT} WHERE p.category_id = ?1 ORDER BY p.name"
            ))
            .bind(category_id)
            .fetch_all(&state.pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, ProductRow>(&format!("{PRODUCT_SELECT} ORDER BY p.name"))
                .fetch_all(&state.pool)
                .await?
        }
    };
    Ok(Json(rows))
}

pub async fn product_detail(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
) -> Result<Json<ProductRow>, ServerError> {
    Ok(Json(load_product(&state, product_id).await?))
}

pub async fn create_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductRow>), ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    require_staff(&state, user_id).await?;

    let name = required_text("name", &payload.name, MAX_PRODUCT_NAME_LEN)?;
    let description = optional_text("description", &payload.description, MAX_DESCRIPTION_LEN)?;
    check_amounts(Some(payload.price_cents), Some(payload.stock))?;
    let image_url = non_empty(payload.image_url.as_deref());
    if let Some(url) = image_url {
        check_image_url(url)?;
    }
    ensure_category(&state, payload.category_id).await?;

    let product_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO products (name, description, price_cents, stock, image_url, category_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
    )
    .bind(name)
    .bind(description)
    .bind(payload.price_cents)
    .bind(payload.stock)
    .bind(image_url)
    .bind(payload.category_id)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(product_id, "product created");
    Ok((StatusCode::CREATED, Json(load_product(&state, product_id).await?)))
}

pub async fn update_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_id): Path<i64>,
    Json(payload): Json<UpdateProductRequest>,
) -> Result<Json<ProductRow>, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    require_staff(&state, user_id).await?;
    load_product(&state, product_id).await?;

    let name = payload
        .name
        .as_deref()
        .map(|v| required_text("name", v, MAX_PRODUCT_NAME_LEN))
        .transpose()?;
    let description = payload
        .description
        .as_deref()
        .map(|v| optional_text("description", v, MAX_DESCRIPTION_LEN))
        .transpose()?;
    check_amounts(payload.price_cents, payload.stock)?;
    let image_url = payload.image_url.as_deref().map(str::trim);
    if let Some(url) = image_url.filter(|url| !url.is_empty()) {
        check_image_url(url)?;
    }
    if let Some(category_id) = payload.category_id {
        ensure_category(&state, category_id).await?;
    }

    sqlx::query(
        "UPDATE products SET name = COALESCE(?1, name), description = COALESCE(?2, description), price_cents = COALESCE(?3, price_cents), stock = COALESCE(?4, stock), image_url = CASE WHEN ?5 IS NULL THEN image_url WHEN ?5 = '' THEN NULL ELSE ?5 END, category_id = COALESCE(?6, category_id) WHERE id = ?7",
    )
    .bind(name)
    .bind(description)
    .bind(payload.price_cents)
    .bind(payload.stock)
    .bind(image_url)
    .bind(payload.category_id)
    .bind(product_id)
    .execute(&state.pool)
    .await?;

    Ok(Json(load_product(&state, product_id).await?))
}

pub async fn delete_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_id): Path<i64>,
) -> Result<StatusCode, ServerError> {
    let user_id = auth_user_id(&state, &headers).await?;
    require_staff(&state, user_id).await?;

    let result = sqlx::query("DELETE FROM products WHERE id = ?1")
        .bind(product_id)
        .execute(&state.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                ServerError::conflict("product is referenced by orders")
            } else {
                ServerError::from(e)
            }
        })?;

    if result.rows_affected() == 0 {
        return Err(ServerError::not_found("product not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn load_product(
    state: &AppState,
    product_id: i64,
) -> Result<ProductRow, ServerError> {
    sqlx::query_as::<_, ProductRow>(&format!("{PRODUCT_SELECT} WHERE p.id = ?1"))
        .bind(product_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ServerError::not_found("product not found"))
}

async fn ensure_category(state: &AppState, category_id: i64) -> Result<(), ServerError> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM categories WHERE id = ?1")
        .bind(category_id)
        .fetch_optional(&state.pool)
        .await?
        .is_some();
    if !exists {
        return Err(ServerError::bad_request("category does not exist"));
    }
    Ok(())
}

fn check_amounts(price_cents: Option<i64>, stock: Option<i64>) -> Result<(), ServerError> {
    if price_cents.is_some_and(|p| !(0..=MAX_PRICE_CENTS).contains(&p)) {
        return Err(ServerError::bad_request(format!(
            "price_cents must be between 0 and {MAX_PRICE_CENTS}"
        )));
    }
    if stock.is_some_and(|s| !(0..=MAX_STOCK).contains(&s)) {
        return Err(ServerError::bad_request(format!(
            "stock must be between 0 and {MAX_STOCK}"
        )));
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
