mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{spawn, PASSWORD};

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let app = spawn().await;
    let (status, body) = app.register("ana@example.com").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email"], "ana@example.com");
    assert!(body.get("password_hash").is_none());

    let (status, body) = app.register("ANA@example.com ").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn registration_validates_fields() {
    let app = spawn().await;
    let base = json!({
        "email": "bad-email",
        "password": PASSWORD,
        "first_name": "A",
        "last_name": "B",
        "phone": "123",
    });
    let (status, _) = app.call("POST", "/v1/users", None, Some(base.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut short = base.clone();
    short["email"] = json!("a@example.com");
    short["password"] = json!("short");
    let (status, _) = app.call("POST", "/v1/users", None, Some(short)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut image = base.clone();
    image["email"] = json!("b@example.com");
    image["profile_image_url"] = json!("https://cdn.example.com/me.gif");
    let (status, _) = app.call("POST", "/v1/users", None, Some(image)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut phone = base;
    phone["email"] = json!("c@example.com");
    phone["phone"] = json!("+54935155500001");
    let (status, _) = app.call("POST", "/v1/users", None, Some(phone)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_returns_token_pair_and_profile() {
    let app = spawn().await;
    app.register("ana@example.com").await;

    let body = app.login("Ana@Example.com").await;
    assert!(body["access"].as_str().is_some_and(|t| !t.is_empty()));
    assert!(body["refresh"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["email"], "ana@example.com");
    assert_eq!(body["is_admin"], false);

    let (status, _) = app
        .call(
            "POST",
            "/v1/auth/login",
            None,
            Some(json!({ "email": "ana@example.com", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call("POST", "/v1/auth/login", None, Some(json!({ "email": "ana@example.com" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn refresh_tokens_rotate() {
    let app = spawn().await;
    app.register("ana@example.com").await;
    let login = app.login("ana@example.com").await;
    let refresh = login["refresh"].as_str().unwrap();

    let (status, body) = app
        .call("POST", "/v1/auth/refresh", None, Some(json!({ "refresh": refresh })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["refresh"].as_str().unwrap(), refresh);

    let (status, _) = app
        .call("POST", "/v1/auth/refresh", None, Some(json!({ "refresh": refresh })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_refresh_tokens() {
    let app = spawn().await;
    app.register("ana@example.com").await;
    let login = app.login("ana@example.com").await;
    let access = login["access"].as_str().unwrap();
    let refresh = login["refresh"].as_str().unwrap();

    let (status, _) = app.call("POST", "/v1/auth/logout", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.call("POST", "/v1/auth/logout", Some(access), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .call("POST", "/v1/auth/refresh", None, Some(json!({ "refresh": refresh })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_is_read_and_updated_through_me() {
    let app = spawn().await;
    let token = app.customer("ana@example.com").await;

    let (status, _) = app.call("GET", "/v1/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .call(
            "PATCH",
            "/v1/users/me",
            Some(&token),
            Some(json!({
                "first_name": "Ana María",
                "profile_image_url": "https://cdn.example.com/ana.webp",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["first_name"], "Ana María");
    assert_eq!(body["last_name"], "User");
    assert_eq!(body["profile_image_url"], "https://cdn.example.com/ana.webp");

    let (status, body) = app
        .call("PATCH", "/v1/users/me", Some(&token), Some(json!({ "profile_image_url": "" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["profile_image_url"].is_null());

    let (status, body) = app.call("GET", "/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ana@example.com");
}

#[tokio::test]
async fn deleted_user_cannot_log_in() {
    let app = spawn().await;
    let token = app.customer("ana@example.com").await;

    let (status, _) = app.call("DELETE", "/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .call(
            "POST",
            "/v1/auth/login",
            None,
            Some(json!({ "email": "ana@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn garbage_bearer_token_is_rejected() {
    let app = spawn().await;
    let (status, body) = app.call("GET", "/v1/cart", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn access_token_dies_with_its_user() {
    let app = spawn().await;
    let token = app.customer("ana@example.com").await;
    let pizza = app.product("Pizza", 1000, 5).await;

    let (status, _) = app.call("DELETE", "/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.call("GET", "/v1/cart", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .call("POST", "/v1/cart/items", Some(&token), Some(json!({ "product_id": pizza })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");
}

#[tokio::test]
async fn deactivated_user_token_is_rejected() {
    let app = spawn().await;
    let token = app.customer("ana@example.com").await;

    sqlx::query("UPDATE users SET is_active = 0 WHERE email = 'ana@example.com'")
        .execute(&app.pool)
        .await
        .unwrap();

    let (status, body) = app.call("GET", "/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");
}
