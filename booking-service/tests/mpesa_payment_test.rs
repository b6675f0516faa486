mod common;

use booking_service::models::{Transaction, TransactionStatus};
use common::{TestApp, TEST_USER_ID};
use mongodb::bson::doc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_mpesa_gateway(server: &MockServer, checkout_id: &str) {
    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": "3599"
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": checkout_id,
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        })))
        .mount(server)
        .await;
}

fn success_callback(checkout_id: &str, amount: f64, receipt: &str) -> serde_json::Value {
    json!({
        "Body": { "stkCallback": {
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": checkout_id,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "CallbackMetadata": { "Item": [
                { "Name": "Amount", "Value": amount },
                { "Name": "MpesaReceiptNumber", "Value": receipt },
                { "Name": "TransactionDate", "Value": 20240307090502u64 },
                { "Name": "PhoneNumber", "Value": 254712345678u64 }
            ]}
        }}
    })
}

fn failure_callback(checkout_id: &str, code: i64, desc: &str) -> serde_json::Value {
    json!({
        "Body": { "stkCallback": {
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": checkout_id,
            "ResultCode": code,
            "ResultDesc": desc
        }}
    })
}

async fn initiate_push(app: &TestApp, booking_id: Uuid) -> reqwest::Response {
    app.client
        .post(format!("{}/payments/mpesa/stk-push", app.address))
        .header("X-User-ID", TEST_USER_ID)
        .json(&json!({ "booking_id": booking_id, "phone_number": "254712345678" }))
        .send()
        .await
        .expect("Failed to initiate STK push")
}

#[tokio::test]
async fn successful_push_and_callback_confirms_booking() {
    let gateway = MockServer::start().await;
    mock_mpesa_gateway(&gateway, "ws_CO_123").await;

    let app = TestApp::spawn_with(|config| {
        config.mpesa.api_base_url = gateway.uri();
    })
    .await;

    let service_id = app.seed_service("Physio Session", 2500.0).await;
    let booking_id = app.create_booking(service_id).await;

    let response = initiate_push(&app, booking_id).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["checkout_request_id"], "ws_CO_123");

    // The correlation id is stored on the booking, nothing else changed yet
    let booking = app.get_booking(booking_id).await;
    assert_eq!(booking["gateway_checkout_id"], "ws_CO_123");
    assert_eq!(booking["payment_status"], "UNPAID");

    // The gateway reports the payment outcome asynchronously
    let callback = app
        .post_stk_callback(&success_callback("ws_CO_123", 2500.0, "RJ12XYZ"))
        .await;
    assert_eq!(callback.status().as_u16(), 200);
    let ack: serde_json::Value = callback.json().await.unwrap();
    assert_eq!(ack["ResultCode"], 0);
    assert_eq!(ack["ResultDesc"], "Accepted");
    assert_eq!(ack["ThirdPartyTransID"], "");

    let booking = app.get_booking(booking_id).await;
    assert_eq!(booking["payment_status"], "PAID");
    assert_eq!(booking["status"], "CONFIRMED");

    let txn: Transaction = app
        .db
        .collection("transactions")
        .find_one(doc! { "booking_id": booking_id.to_string() }, None)
        .await
        .unwrap()
        .expect("Ledger row missing");
    assert_eq!(txn.amount, 2500.0);
    assert_eq!(txn.currency, "KES");
    assert_eq!(txn.gateway_transaction_id, "RJ12XYZ");
    assert_eq!(txn.status, TransactionStatus::Success);

    app.cleanup().await;
}

#[tokio::test]
async fn failure_callback_marks_payment_failed_and_leaves_booking_pending() {
    let gateway = MockServer::start().await;
    mock_mpesa_gateway(&gateway, "ws_CO_200").await;

    let app = TestApp::spawn_with(|config| {
        config.mpesa.api_base_url = gateway.uri();
    })
    .await;

    let service_id = app.seed_service("Physio Session", 2500.0).await;
    let booking_id = app.create_booking(service_id).await;
    initiate_push(&app, booking_id).await;

    let callback = app
        .post_stk_callback(&failure_callback("ws_CO_200", 1032, "Request cancelled by user"))
        .await;
    assert_eq!(callback.status().as_u16(), 200);
    let ack: serde_json::Value = callback.json().await.unwrap();
    assert_eq!(ack["ResultCode"], 0);

    // Payment failed, but the booking itself stays PENDING so the user can retry
    let booking = app.get_booking(booking_id).await;
    assert_eq!(booking["payment_status"], "FAILED");
    assert_eq!(booking["status"], "PENDING");

    app.cleanup().await;
}

#[tokio::test]
async fn replaying_a_success_callback_is_a_no_op() {
    let gateway = MockServer::start().await;
    mock_mpesa_gateway(&gateway, "ws_CO_300").await;

    let app = TestApp::spawn_with(|config| {
        config.mpesa.api_base_url = gateway.uri();
    })
    .await;

    let service_id = app.seed_service("Physio Session", 2500.0).await;
    let booking_id = app.create_booking(service_id).await;
    initiate_push(&app, booking_id).await;

    let payload = success_callback("ws_CO_300", 2500.0, "RJ12XYZ");

    let first = app.post_stk_callback(&payload).await;
    assert_eq!(first.status().as_u16(), 200);

    // Exact duplicate delivery: acknowledged, but nothing changes
    let second = app.post_stk_callback(&payload).await;
    assert_eq!(second.status().as_u16(), 200);
    let ack: serde_json::Value = second.json().await.unwrap();
    assert_eq!(ack["ResultCode"], 0);

    let booking = app.get_booking(booking_id).await;
    assert_eq!(booking["payment_status"], "PAID");

    let count = app
        .db
        .collection::<Transaction>("transactions")
        .count_documents(doc! { "booking_id": booking_id.to_string() }, None)
        .await
        .unwrap();
    assert_eq!(count, 1);

    app.cleanup().await;
}

#[tokio::test]
async fn gateway_error_leaves_no_correlation_id() {
    let gateway = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": "3599"
        })))
        .mount(&gateway)
        .await;

    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "errorCode": "500.001.1001",
            "errorMessage": "Service is currently unreachable"
        })))
        .mount(&gateway)
        .await;

    let app = TestApp::spawn_with(|config| {
        config.mpesa.api_base_url = gateway.uri();
    })
    .await;

    let service_id = app.seed_service("Physio Session", 2500.0).await;
    let booking_id = app.create_booking(service_id).await;

    let response = initiate_push(&app, booking_id).await;
    assert_eq!(response.status().as_u16(), 503);

    // No partial state: the booking still has no correlation id
    let booking = app.get_booking(booking_id).await;
    assert!(booking["gateway_checkout_id"].is_null());
    assert_eq!(booking["payment_status"], "UNPAID");

    app.cleanup().await;
}

#[tokio::test]
async fn unknown_correlation_id_is_acknowledged_with_no_writes() {
    let app = TestApp::spawn().await;

    let callback = app
        .post_stk_callback(&success_callback("ws_CO_UNKNOWN", 2500.0, "RJ12XYZ"))
        .await;
    assert_eq!(callback.status().as_u16(), 200);
    let ack: serde_json::Value = callback.json().await.unwrap();
    assert_eq!(ack["ResultCode"], 0);
    assert_eq!(ack["ResultDesc"], "Accepted");

    let count = app
        .db
        .collection::<Transaction>("transactions")
        .count_documents(doc! {}, None)
        .await
        .unwrap();
    assert_eq!(count, 0);

    app.cleanup().await;
}

#[tokio::test]
async fn malformed_callback_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app.post_stk_callback(&json!({ "Body": {} })).await;
    assert_eq!(response.status().as_u16(), 400);
    let ack: serde_json::Value = response.json().await.unwrap();
    assert_eq!(ack["ResultCode"], 1);
    assert_eq!(ack["ResultDesc"], "Failed");

    app.cleanup().await;
}

#[tokio::test]
async fn push_for_anothers_booking_is_not_found() {
    let app = TestApp::spawn().await;
    let service_id = app.seed_service("Physio Session", 2500.0).await;
    let booking_id = app.create_booking(service_id).await;

    let response = app
        .client
        .post(format!("{}/payments/mpesa/stk-push", app.address))
        .header("X-User-ID", "someone-else")
        .json(&json!({ "booking_id": booking_id, "phone_number": "254712345678" }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);

    app.cleanup().await;
}

#[tokio::test]
async fn push_for_a_paid_booking_is_a_conflict() {
    let gateway = MockServer::start().await;
    mock_mpesa_gateway(&gateway, "ws_CO_400").await;

    let app = TestApp::spawn_with(|config| {
        config.mpesa.api_base_url = gateway.uri();
    })
    .await;

    let service_id = app.seed_service("Physio Session", 2500.0).await;
    let booking_id = app.create_booking(service_id).await;
    initiate_push(&app, booking_id).await;
    app.post_stk_callback(&success_callback("ws_CO_400", 2500.0, "RJ12XYZ"))
        .await;

    let response = initiate_push(&app, booking_id).await;
    assert_eq!(response.status().as_u16(), 409);

    app.cleanup().await;
}

#[tokio::test]
async fn push_with_invalid_phone_number_is_rejected_before_any_gateway_call() {
    let app = TestApp::spawn().await;
    let service_id = app.seed_service("Physio Session", 2500.0).await;
    let booking_id = app.create_booking(service_id).await;

    // Wrong length fails DTO validation
    let response = app
        .client
        .post(format!("{}/payments/mpesa/stk-push", app.address))
        .header("X-User-ID", TEST_USER_ID)
        .json(&json!({ "booking_id": booking_id, "phone_number": "0712345678" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 422);

    // Right length, wrong shape
    let response = app
        .client
        .post(format!("{}/payments/mpesa/stk-push", app.address))
        .header("X-User-ID", TEST_USER_ID)
        .json(&json!({ "booking_id": booking_id, "phone_number": "07123456abc" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 422);

    let response = app
        .client
        .post(format!("{}/payments/mpesa/stk-push", app.address))
        .header("X-User-ID", TEST_USER_ID)
        .json(&json!({ "booking_id": booking_id, "phone_number": "254712345abc" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 400);

    app.cleanup().await;
}
