use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;

const OPENAPI_DOCUMENT: &str = include_str!("../../res/openapi.json");

pub async fn openapi() -> impl IntoResponse {
    ([(CONTENT_TYPE, "application/json")], OPENAPI_DOCUMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_payment_routes() {
        let doc: serde_json::Value = serde_json::from_str(OPENAPI_DOCUMENT).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        for path in [
            "/v1/orders/{order_id}/payment",
            "/v1/payments/mercadopago/webhook",
            "/v1/payments/payu/notification",
        ] {
            assert!(paths.contains_key(path), "{path}");
        }
    }
}
