use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    pub refresh: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub profile_image_url: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub profile_image_url: Option<String>,
    pub is_staff: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user_id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub profile_image_url: Option<String>,
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access: String,
    pub refresh: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ProductRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub stock: i64,
    pub image_url: Option<String>,
    pub category_id: i64,
    pub category_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ProductListQuery {
    pub category_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    #[serde(default)]
    pub stock: i64,
    pub image_url: Option<String>,
    pub category_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub stock: Option<i64>,
    pub image_url: Option<String>,
    pub category_id: Option<i64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CartItemRow {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub subtotal_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub items: Vec<CartItemRow>,
    pub item_count: i64,
    pub total_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct AddCartItemRequest {
    pub product_id: i64,
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCartItemRequest {
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub delivery_address: String,
    pub delivery_date: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub user_id: i64,
    pub status: String,
    pub delivery_address: String,
    pub delivery_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct OrderSummary {
    pub id: i64,
    pub status: String,
    pub delivery_address: String,
    pub delivery_date: Option<String>,
    pub created_at: String,
    pub total_cents: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct OrderItemRow {
    pub product_id: i64,
    pub product_name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub subtotal_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub id: i64,
    pub user_id: i64,
    pub status: String,
    pub delivery_address: String,
    pub delivery_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub items: Vec<OrderItemRow>,
    pub total_cents: i64,
    pub payment: Option<PaymentResponse>,
}

#[derive(Debug, Deserialize)]
pub struct AdminOrderQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AdminOrderRow {
    pub id: i64,
    pub user_id: i64,
    pub email: String,
    pub status: String,
    pub delivery_address: String,
    pub created_at: String,
    pub total_cents: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PaymentResponse {
    pub id: i64,
    pub order_id: i64,
    pub provider: String,
    pub preference_id: Option<String>,
    pub external_payment_id: Option<String>,
    pub external_reference: String,
    pub status: String,
    pub status_detail: Option<String>,
    pub amount_cents: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct MercadoPagoPublicConfig {
    pub public_key: String,
    pub currency_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePreferenceRequest {
    pub order_id: i64,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PreferenceResponse {
    pub preference_id: String,
    pub public_key: String,
    pub init_point: String,
    pub sandbox_init_point: Option<String>,
    pub payment_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    pub topic: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub id: Option<String>,
    #[serde(rename = "data.id")]
    pub data_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct FinalizePaymentRequest {
    pub payment_id: String,
}

#[derive(Debug, Serialize)]
pub struct PayuPublicConfig {
    pub merchant_id: String,
    pub account_id: String,
    pub currency: String,
    pub country: String,
    pub test: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayuTransactionRequest {
    pub order_id: Option<i64>,
    pub credit_card_number: Option<String>,
    pub credit_card_expiration_date: Option<String>,
    pub credit_card_security_code: Option<String>,
    pub payment_method: Option<String>,
    pub payer_name: Option<String>,
    pub payer_email: Option<String>,
    pub payer_document: Option<String>,
    pub installments: Option<u32>,
    pub device_session_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PayuTransactionResponse {
    pub status: Option<String>,
    pub response_code: Option<String>,
    pub response_message: Option<String>,
    pub transaction_id: Option<String>,
    pub payu_order_id: Option<String>,
    pub reference_code: String,
    pub order_status: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PayuNotification {
    #[serde(default)]
    pub reference_sale: String,
    #[serde(default)]
    pub state_pol: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub sign: String,
    pub transaction_id: Option<String>,
    pub response_message_pol: Option<String>,
}
