#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::ServiceExt;

use food_server::app_state::AppState;
use food_server::config::{AuthConfig, MercadoPagoConfig, PayuConfig};
use food_server::db::connect_memory;
use food_server::gateway::{
    GatewayError, MercadoPagoGateway, PaymentInfo, PayuGateway, PayuTransaction,
    PayuTransactionResult, Preference, PreferenceRequest,
};
use food_server::handlers::router;
use food_server::schema::{execute_schema_sqlite, SQLITE_SCHEMA};

pub const PASSWORD: &str = "correct-horse-battery";
pub const PAYU_API_KEY: &str = "payu-test-key";
pub const PAYU_MERCHANT: &str = "508029";

#[derive(Default)]
pub struct FakeMercadoPago {
    pub payments: Mutex<HashMap<String, PaymentInfo>>,
    pub preferences: Mutex<Vec<PreferenceRequest>>,
    pub fail_lookups: Mutex<bool>,
}

impl FakeMercadoPago {
    pub fn set_payment(&self, id: &str, order_id: i64, status: &str, amount: f64) {
        let raw = json!({
            "id": id,
            "status": status,
            "external_reference": order_id.to_string(),
            "transaction_amount": amount,
        });
        self.payments.lock().unwrap().insert(
            id.to_string(),
            PaymentInfo {
                id: id.to_string(),
                status: status.to_string(),
                status_detail: Some("test".to_string()),
                external_reference: Some(order_id.to_string()),
                transaction_amount: Some(amount),
                raw,
            },
        );
    }
}

#[async_trait::async_trait]
impl MercadoPagoGateway for FakeMercadoPago {
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<Preference, GatewayError> {
        let mut seen = self.preferences.lock().unwrap();
        seen.push(request.clone());
        let id = format!("pref-{}", seen.len());
        Ok(Preference {
            id: id.clone(),
            init_point: format!("https://mp.example/checkout/{id}"),
            sandbox_init_point: Some(format!("https://sandbox.mp.example/checkout/{id}")),
            raw: json!({ "id": id }),
        })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<PaymentInfo, GatewayError> {
        if *self.fail_lookups.lock().unwrap() {
            return Err(GatewayError::Status {
                status: 500,
                body: "unavailable".into(),
            });
        }
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or(GatewayError::Status {
                status: 404,
                body: "not found".into(),
            })
    }
}

pub struct FakePayu {
    pub state: Mutex<String>,
    pub submitted: Mutex<Vec<PayuTransaction>>,
}

#[async_trait::async_trait]
impl PayuGateway for FakePayu {
    async fn submit_transaction(
        &self,
        transaction: &PayuTransaction,
    ) -> Result<PayuTransactionResult, GatewayError> {
        self.submitted.lock().unwrap().push(transaction.clone());
        let state = self.state.lock().unwrap().clone();
        if state == "INVALID" {
            return Ok(PayuTransactionResult {
                code: "ERROR".into(),
                error: Some("Invalid credit card".into()),
                state: None,
                response_code: None,
                response_message: None,
                transaction_id: None,
                order_id: None,
                raw: json!({ "code": "ERROR" }),
            });
        }
        Ok(PayuTransactionResult {
            code: "SUCCESS".into(),
            error: None,
            state: Some(state.clone()),
            response_code: Some(state.clone()),
            response_message: None,
            transaction_id: Some("tx-1".into()),
            order_id: Some("9001".into()),
            raw: json!({ "code": "SUCCESS", "transactionResponse": { "state": state } }),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub pool: SqlitePool,
    pub mercadopago: Arc<FakeMercadoPago>,
    pub payu: Arc<FakePayu>,
}

pub async fn spawn() -> TestApp {
    spawn_with_webhook_secret(None).await
}

pub async fn spawn_with_webhook_secret(secret: Option<&str>) -> TestApp {
    let pool = connect_memory().await.unwrap();
    execute_schema_sqlite(&pool, SQLITE_SCHEMA).await.unwrap();

    let mercadopago = Arc::new(FakeMercadoPago::default());
    let payu = Arc::new(FakePayu {
        state: Mutex::new("APPROVED".into()),
        submitted: Mutex::new(Vec::new()),
    });

    let state = AppState {
        pool: pool.clone(),
        auth: Arc::new(AuthConfig {
            jwt_secret: "integration-secret-0123456789".into(),
            access_ttl_seconds: 600,
            refresh_ttl_seconds: 3600,
        }),
        mercadopago: mercadopago.clone(),
        mercadopago_config: Arc::new(MercadoPagoConfig {
            base_url: "http://127.0.0.1:9".into(),
            access_token: "test-token".into(),
            public_key: "TEST-public-key".into(),
            webhook_secret: secret.map(str::to_string),
            notification_url: Some("https://api.example/v1/payments/mercadopago/webhook".into()),
            success_url: "https://shop.example/success".into(),
            failure_url: "https://shop.example/failure".into(),
            pending_url: "https://shop.example/pending".into(),
            currency_id: "ARS".into(),
        }),
        payu: payu.clone(),
        payu_config: Arc::new(PayuConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: PAYU_API_KEY.into(),
            api_login: "payu-login".into(),
            merchant_id: PAYU_MERCHANT.into(),
            account_id: "512322".into(),
            currency: "ARS".into(),
            country: "AR".into(),
            test: true,
            notify_url: None,
        }),
    };

    TestApp {
        router: router(state),
        pool,
        mercadopago,
        payu,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn register(&self, email: &str) -> (StatusCode, Value) {
        self.call(
            "POST",
            "/v1/users",
            None,
            Some(json!({
                "email": email,
                "password": PASSWORD,
                "first_name": "Test",
                "last_name": "User",
                "phone": "3515550000",
            })),
        )
        .await
    }

    pub async fn login(&self, email: &str) -> Value {
        let (status, body) = self
            .call(
                "POST",
                "/v1/auth/login",
                None,
                Some(json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    /// Registers a customer and returns an access token.
    pub async fn customer(&self, email: &str) -> String {
        let (status, body) = self.register(email).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        self.login(email).await["access"]
            .as_str()
            .unwrap()
            .to_string()
    }

    pub async fn staff(&self, email: &str) -> String {
        let token = self.customer(email).await;
        sqlx::query("UPDATE users SET is_staff = 1 WHERE email = ?1")
            .bind(email)
            .execute(&self.pool)
            .await
            .unwrap();
        token
    }

    pub async fn product(&self, name: &str, price_cents: i64, stock: i64) -> i64 {
        sqlx::query("INSERT OR IGNORE INTO categories (name) VALUES ('Menu')")
            .execute(&self.pool)
            .await
            .unwrap();
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO products (name, price_cents, stock, category_id) VALUES (?1, ?2, ?3, (SELECT id FROM categories WHERE name = 'Menu')) RETURNING id",
        )
        .bind(name)
        .bind(price_cents)
        .bind(stock)
        .fetch_one(&self.pool)
        .await
        .unwrap()
    }

    /// Fills the cart and checks out; returns the order id.
    pub async fn order(&self, token: &str, lines: &[(i64, i64)]) -> i64 {
        for (product_id, quantity) in lines {
            let (status, body) = self
                .call(
                    "POST",
                    "/v1/cart/items",
                    Some(token),
                    Some(json!({ "product_id": product_id, "quantity": quantity })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
        }
        let (status, body) = self
            .call(
                "POST",
                "/v1/orders",
                Some(token),
                Some(json!({ "delivery_address": "Av. Colón 1234", "delivery_date": "2030-01-15" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_i64().unwrap()
    }

    pub async fn order_status(&self, order_id: i64) -> String {
        sqlx::query_scalar::<_, String>("SELECT status FROM orders WHERE id = ?1")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}
