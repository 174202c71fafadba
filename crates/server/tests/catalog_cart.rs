mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::spawn;

#[tokio::test]
async fn catalog_writes_are_staff_only() {
    let app = spawn().await;
    let customer = app.customer("ana@example.com").await;
    let staff = app.staff("chef@example.com").await;

    let (status, _) = app
        .call("POST", "/v1/categories", Some(&customer), Some(json!({ "name": "Pizzas" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, category) = app
        .call("POST", "/v1/categories", Some(&staff), Some(json!({ "name": "Pizzas" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let category_id = category["id"].as_i64().unwrap();

    let (status, _) = app
        .call("POST", "/v1/categories", Some(&staff), Some(json!({ "name": "Pizzas" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let product = json!({
        "name": "Muzzarella",
        "description": "Tomate y queso",
        "price_cents": 850000,
        "stock": 10,
        "image_url": "https://cdn.example.com/muzza.jpg",
        "category_id": category_id,
    });
    let (status, _) = app
        .call("POST", "/v1/products", Some(&customer), Some(product.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call("POST", "/v1/products", Some(&staff), Some(product))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["category_name"], "Pizzas");
    let product_id = body["id"].as_i64().unwrap();

    let (status, body) = app
        .call(
            "PATCH",
            &format!("/v1/products/{product_id}"),
            Some(&staff),
            Some(json!({ "price_cents": 900000 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["price_cents"], 900000);
    assert_eq!(body["name"], "Muzzarella");

    let (status, list) = app
        .call("GET", &format!("/v1/products?category_id={category_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = app
        .call("DELETE", &format!("/v1/products/{product_id}"), Some(&staff), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .call("GET", &format!("/v1/products/{product_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn product_payloads_are_validated() {
    let app = spawn().await;
    let staff = app.staff("chef@example.com").await;

    let (status, _) = app
        .call(
            "POST",
            "/v1/products",
            Some(&staff),
            Some(json!({ "name": "Empanada", "price_cents": 100, "category_id": 999 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.product("Seed", 100, 1).await;
    let category_id: i64 = sqlx::query_scalar("SELECT id FROM categories WHERE name = 'Menu'")
        .fetch_one(&app.pool)
        .await
        .unwrap();

    for bad in [
        json!({ "name": "", "price_cents": 100, "category_id": category_id }),
        json!({ "name": "x".repeat(46), "price_cents": 100, "category_id": category_id }),
        json!({ "name": "Empanada", "price_cents": -1, "category_id": category_id }),
        json!({ "name": "Empanada", "price_cents": 100, "stock": -2, "category_id": category_id }),
        json!({ "name": "Empanada", "price_cents": 100, "image_url": "http://x.example/a.bmp", "category_id": category_id }),
    ] {
        let (status, body) = app.call("POST", "/v1/products", Some(&staff), Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    }
}

#[tokio::test]
async fn cart_total_is_sum_of_subtotals() {
    let app = spawn().await;
    let token = app.customer("ana@example.com").await;
    let pizza = app.product("Pizza", 850000, 10).await;
    let soda = app.product("Gaseosa", 125050, 10).await;

    for (product_id, quantity) in [(pizza, 2), (soda, 3), (pizza, 1)] {
        let (status, _) = app
            .call(
                "POST",
                "/v1/cart/items",
                Some(&token),
                Some(json!({ "product_id": product_id, "quantity": quantity })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, cart) = app.call("GET", "/v1/cart", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let items = cart["items"].as_array().unwrap();
    assert_eq!(items.len(), 2, "same product is merged into one line");

    let sum: i64 = items.iter().map(|i| i["subtotal_cents"].as_i64().unwrap()).sum();
    assert_eq!(cart["total_cents"].as_i64().unwrap(), sum);
    assert_eq!(sum, 3 * 850000 + 3 * 125050);
    assert_eq!(cart["item_count"], 6);
}

#[tokio::test]
async fn cart_respects_stock_and_quantity() {
    let app = spawn().await;
    let token = app.customer("ana@example.com").await;
    let pizza = app.product("Pizza", 1000, 2).await;

    let (status, _) = app
        .call("POST", "/v1/cart/items", Some(&token), Some(json!({ "product_id": pizza, "quantity": 3 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call("POST", "/v1/cart/items", Some(&token), Some(json!({ "product_id": pizza, "quantity": 0 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call("POST", "/v1/cart/items", Some(&token), Some(json!({ "product_id": 4242 })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, cart) = app
        .call("POST", "/v1/cart/items", Some(&token), Some(json!({ "product_id": pizza })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let item_id = cart["items"][0]["id"].as_i64().unwrap();

    let (status, cart) = app
        .call("PATCH", &format!("/v1/cart/items/{item_id}"), Some(&token), Some(json!({ "quantity": 2 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["total_cents"], 2000);

    let (status, _) = app
        .call("PATCH", &format!("/v1/cart/items/{item_id}"), Some(&token), Some(json!({ "quantity": 5 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cart_items_of_other_users_are_hidden() {
    let app = spawn().await;
    let ana = app.customer("ana@example.com").await;
    let bob = app.customer("bob@example.com").await;
    let pizza = app.product("Pizza", 1000, 5).await;

    let (_, cart) = app
        .call("POST", "/v1/cart/items", Some(&ana), Some(json!({ "product_id": pizza })))
        .await;
    let item_id = cart["items"][0]["id"].as_i64().unwrap();

    let (status, _) = app
        .call("DELETE", &format!("/v1/cart/items/{item_id}"), Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, cart) = app.call("GET", "/v1/cart", Some(&bob), None).await;
    assert!(cart["items"].as_array().unwrap().is_empty());

    let (status, _) = app
        .call("DELETE", &format!("/v1/cart/items/{item_id}"), Some(&ana), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn huge_cart_quantities_are_rejected_without_overflow() {
    let app = spawn().await;
    let token = app.customer("ana@example.com").await;
    let pizza = app.product("Pizza", 1000, 5).await;

    let (status, _) = app
        .call("POST", "/v1/cart/items", Some(&token), Some(json!({ "product_id": pizza })))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .call(
            "POST",
            "/v1/cart/items",
            Some(&token),
            Some(json!({ "product_id": pizza, "quantity": i64::MAX })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (_, cart) = app.call("GET", "/v1/cart", Some(&token), None).await;
    assert_eq!(cart["item_count"], 1);
}

#[tokio::test]
async fn product_amounts_are_capped() {
    let app = spawn().await;
    let staff = app.staff("chef@example.com").await;
    let (_, category) = app
        .call("POST", "/v1/categories", Some(&staff), Some(json!({ "name": "Pizzas" })))
        .await;
    let category_id = category["id"].as_i64().unwrap();

    let (status, body) = app
        .call(
            "POST",
            "/v1/products",
            Some(&staff),
            Some(json!({
                "name": "Oro",
                "price_cents": i64::MAX,
                "stock": 1,
                "category_id": category_id
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let pizza = app.product("Pizza", 1000, 5).await;
    for patch in [json!({ "price_cents": i64::MAX }), json!({ "stock": i64::MAX })] {
        let (status, _) = app
            .call("PATCH", &format!("/v1/products/{pizza}"), Some(&staff), Some(patch))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let (_, product) = app.call("GET", &format!("/v1/products/{pizza}"), None, None).await;
    assert_eq!(product["price_cents"], 1000);
    assert_eq!(product["stock"], 5);
}
