mod auth;
mod cart;
mod catalog;
mod docs;
pub(crate) mod orders;
mod payments;
mod users;

use axum::Router;
use axum::routing::{
  get,
  patch,
  post
};
use axum::Json;
use serde_json::{
  Value,
  json
};

use crate::app_state::AppState;
use payments::{
  mercadopago,
  payu
};

pub fn router(
  state: AppState
) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/openapi.json", get(docs::openapi))
    .route("/v1/users", post(users::create_user))
    .route("/v1/users/me", get(users::get_me).patch(users::update_me).delete(users::delete_me))
    .route("/v1/auth/login", post(auth::login))
    .route("/v1/auth/refresh", post(auth::refresh))
    .route("/v1/auth/logout", post(auth::logout))
    .route("/v1/categories", get(catalog::list_categories).post(catalog::create_category))
    .route("/v1/products", get(catalog::list_products).post(catalog::create_product))
    .route(
      "/v1/products/:product_id",
      get(catalog::product_detail)
        .patch(catalog::update_product)
        .delete(catalog::delete_product)
    )
    .route("/v1/cart", get(cart::view_cart))
    .route("/v1/cart/items", post(cart::add_item))
    .route("/v1/cart/items/:item_id", patch(cart::update_item).delete(cart::remove_item))
    .route("/v1/orders", get(orders::list_orders).post(orders::checkout))
    .route("/v1/orders/:order_id", get(orders::order_detail))
    .route("/v1/orders/:order_id/payment", get(mercadopago::poll_payment))
    .route("/v1/orders/:order_id/payment/finalize", post(mercadopago::finalize_payment))
    .route("/v1/admin/orders", get(orders::admin_orders))
    .route("/v1/payments/mercadopago/config", get(mercadopago::public_config))
    .route("/v1/payments/mercadopago/preference", post(mercadopago::create_preference))
    .route("/v1/payments/mercadopago/webhook", post(mercadopago::webhook))
    .route("/v1/payments/payu/config", get(payu::public_config))
    .route("/v1/payments/payu/transactions", post(payu::create_transaction))
    .route("/v1/payments/payu/notification", post(payu::notification))
    .with_state(state)
}

async fn health() -> Json<Value> {
  Json(json!({ "status": "ok" }))
}
