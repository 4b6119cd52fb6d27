mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use cinema_booking::{app, middleware::USER_ID_HEADER};

use common::cinema;

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header(USER_ID_HEADER, user.to_string());
    }
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

#[tokio::test]
async fn health_answers_ok() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());
    let (status, body) = call(&router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

#[tokio::test]
async fn booking_requires_a_user() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());
    let (status, _) = call(
        &router,
        Method::POST,
        "/api/v1/bookings",
        None,
        Some(json!({ "seat_id": c.seats[0], "showtime_id": c.showtime_id })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn booking_payment_and_settlement_over_http() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());
    let user = Uuid::new_v4();

    let (status, keys) = call(
        &router,
        Method::POST,
        "/api/v1/bookings",
        Some(user),
        Some(json!({ "seat_id": c.seats[0], "showtime_id": c.showtime_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let booking_id = keys["booking_id"].as_str().unwrap().to_string();
    let detail_id = keys["seat_detail_for_booking_id"].clone();

    // the seat is gone for everybody else
    let (status, err) = call(
        &router,
        Method::POST,
        "/api/v1/bookings",
        Some(Uuid::new_v4()),
        Some(json!({ "seat_id": c.seats[0], "showtime_id": c.showtime_id })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "seat_unavailable");

    let (status, order) = call(
        &router,
        Method::POST,
        "/api/v1/payments",
        Some(user),
        Some(json!({ "seat_detail_for_booking_id": detail_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["total_seat"], 1);
    assert_eq!(order["total_price"], 50);
    let order_id = order["id"].as_str().unwrap().to_string();

    let (status, outcome) = call(
        &router,
        Method::POST,
        "/api/v1/payments/notification",
        None,
        Some(json!({ "order_id": order_id, "transaction_status": "settlement" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "settled");

    let (status, payment) = call(
        &router,
        Method::GET,
        &format!("/api/v1/payments/{}", order_id),
        Some(user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["status"], "paid");
    assert_eq!(payment["bookings"][0]["status"], "success");

    let (status, booking) = call(
        &router,
        Method::GET,
        &format!("/api/v1/bookings/{}", booking_id),
        Some(user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "success");

    // paid bookings stay put
    let (status, err) = call(
        &router,
        Method::DELETE,
        &format!("/api/v1/bookings/{}", booking_id),
        Some(user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "booking_already_paid");
}

#[tokio::test]
async fn notification_without_order_id_is_rejected() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());
    let (status, err) = call(
        &router,
        Method::POST,
        "/api/v1/payments/notification",
        None,
        Some(json!({ "transaction_status": "settlement" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "validation_failed");
}

#[tokio::test]
async fn unknown_order_notification_is_acknowledged() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());
    let (status, outcome) = call(
        &router,
        Method::POST,
        "/api/v1/payments/notification",
        None,
        Some(json!({ "order_id": Uuid::new_v4(), "transaction_status": "expire" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "ignored");
    assert_eq!(outcome["reason"], "unknown_order");
}

#[tokio::test]
async fn payment_without_pending_bookings_is_not_found() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());
    let (status, err) = call(
        &router,
        Method::POST,
        "/api/v1/payments",
        Some(Uuid::new_v4()),
        Some(json!({ "seat_detail_for_booking_id": Uuid::new_v4() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "no_pending_bookings");
}

#[tokio::test]
async fn missing_booking_fields_fail_validation() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());
    let (status, err) = call(
        &router,
        Method::POST,
        "/api/v1/bookings",
        Some(Uuid::new_v4()),
        Some(json!({ "seat_id": c.seats[0] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "validation_failed");
}

#[tokio::test]
async fn release_frees_the_seat() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());
    let user = Uuid::new_v4();
    let (_, keys) = call(
        &router,
        Method::POST,
        "/api/v1/bookings",
        Some(user),
        Some(json!({ "seat_id": c.seats[0], "showtime_id": c.showtime_id })),
    )
    .await;
    let booking_id = keys["booking_id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &router,
        Method::DELETE,
        &format!("/api/v1/bookings/{}", booking_id),
        Some(Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &router,
        Method::DELETE,
        &format!("/api/v1/bookings/{}", booking_id),
        Some(user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, seats) = call(
        &router,
        Method::GET,
        &format!("/api/v1/studios/{}/seats", c.studio_id),
        None,
        None,
    )
    .await;
    assert_eq!(seats[0]["is_available"], true);

    let (status, history) = call(
        &router,
        Method::GET,
        &format!("/api/v1/bookings/{}/events", booking_id),
        Some(user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history[1]["kind"], "cancelled");
}

#[tokio::test]
async fn overlapping_showtime_is_a_conflict() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());
    let start = Utc::now() + ChronoDuration::days(1) + ChronoDuration::minutes(30);

    let (status, err) = call(
        &router,
        Method::POST,
        "/api/v1/showtimes",
        None,
        Some(json!({ "studio_id": c.studio_id, "movie_id": c.movie_id, "show_start": start })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "showtime_conflict");

    let later = start + ChronoDuration::days(2);
    let (status, showtime) = call(
        &router,
        Method::POST,
        "/api/v1/showtimes",
        None,
        Some(json!({ "studio_id": c.studio_id, "movie_id": c.movie_id, "show_start": later })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(showtime["studio_id"], json!(c.studio_id));
}

#[tokio::test]
async fn showtimes_can_be_browsed() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());

    let (status, showtimes) = call(&router, Method::GET, "/api/v1/showtimes", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(showtimes[0]["id"], json!(c.showtime_id));

    let (status, showtime) = call(
        &router,
        Method::GET,
        &format!("/api/v1/showtimes/{}", c.showtime_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(showtime["movie_price"], 50);

    let (status, err) = call(
        &router,
        Method::GET,
        &format!("/api/v1/showtimes/{}", Uuid::new_v4()),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "showtime_not_found");
}

#[tokio::test]
async fn payments_are_listed_for_the_caller_only() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());
    let user = Uuid::new_v4();

    let (_, keys) = call(
        &router,
        Method::POST,
        "/api/v1/bookings",
        Some(user),
        Some(json!({ "seat_id": c.seats[0], "showtime_id": c.showtime_id })),
    )
    .await;
    let (_, order) = call(
        &router,
        Method::POST,
        "/api/v1/payments",
        Some(user),
        Some(json!({ "seat_detail_for_booking_id": keys["seat_detail_for_booking_id"] })),
    )
    .await;

    let (status, mine) = call(&router, Method::GET, "/api/v1/payments", Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().map(Vec::len), Some(1));
    assert_eq!(mine[0]["id"], order["id"]);

    let (_, theirs) = call(
        &router,
        Method::GET,
        "/api/v1/payments",
        Some(Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(theirs, json!([]));

    let (status, _) = call(&router, Method::GET, "/api/v1/payments", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn far_future_showtime_is_a_bad_request() {
    let c = cinema(1, 50).await;
    let router = app(c.state.clone());
    let (status, err) = call(
        &router,
        Method::POST,
        "/api/v1/showtimes",
        None,
        Some(json!({
            "studio_id": c.studio_id,
            "movie_id": c.movie_id,
            "show_start": "+262142-12-31T23:30:00Z",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "validation_failed");
}
