//! Simple REST API server example for the photo market engine.
//!
//! Run with: `cargo run --example server`
//!
//! The caller's identity is the bearer token, passed as-is; the server holds
//! no credentials. A moderator identity `admin` is pre-registered.
//!
//! ## Endpoints
//!
//! - `POST /photos` - Submit a photo for moderation
//! - `GET /photos` - List approved photos
//! - `GET /photos/{id}` - Get one photo
//! - `PUT /photos/{id}` - Transition a photo's status
//! - `DELETE /photos/{id}` - Delete a photo and its bids and payments
//! - `POST /bids` - Place a bid on a photo
//! - `POST /transactions` - Pay for a photo
//! - `GET /transactions` - List the caller's payments
//! - `GET /balance` - The caller's balance
//! - `GET /notifications` - List the caller's notifications
//! - `DELETE /notifications/{id}` - Delete a notification
//!
//! ## Example Usage
//!
//! ```bash
//! # Submit a photo
//! curl -X POST http://localhost:3000/photos \
//!   -H "Authorization: Bearer u1" \
//!   -H "Content-Type: application/json" \
//!   -d '{"title": "Dusk over the bay"}'
//!
//! # Approve it with the seeded moderator
//! curl -X PUT http://localhost:3000/photos/1 \
//!   -H "Authorization: Bearer admin" \
//!   -H "Content-Type: application/json" \
//!   -d '{"status": "approved"}'
//!
//! # Bid on it
//! curl -X POST http://localhost:3000/bids \
//!   -H "Authorization: Bearer u2" \
//!   -H "Content-Type: application/json" \
//!   -d '{"photoId": 1, "displayName": "Billie", "amount": "45.00"}'
//!
//! # Accept the offer as the owner
//! curl -X PUT http://localhost:3000/photos/1 \
//!   -H "Authorization: Bearer u1" \
//!   -H "Content-Type: application/json" \
//!   -d '{"status": "sold"}'
//!
//! # Pay as the bidder
//! curl -X POST http://localhost:3000/transactions \
//!   -H "Authorization: Bearer u2" \
//!   -H "Content-Type: application/json" \
//!   -d '{"photoId": 1, "amount": "45.00", "paymentMethod": "card"}'
//!
//! # Check the seller's balance
//! curl http://localhost:3000/balance -H "Authorization: Bearer u1"
//! ```

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use photo_market_rs::{
    BidId, ExternalId, IdempotencyKey, Market, MarketError, Notification, NotificationId, Payment,
    PaymentId, PhotoId, PhotoSnapshot, PhotoStatus, Role,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

/// Request body for submitting a photo.
#[derive(Debug, Deserialize)]
pub struct SubmitPhotoRequest {
    pub title: String,
}

/// Request body for transitioning a photo's status.
///
/// `{"status": "sold"}` routes through the accept-offer flow, so it requires
/// a cached offer and notifies the bidder to pay.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: PhotoStatus,
}

/// Request body for placing a bid.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRequest {
    pub photo_id: u32,
    pub display_name: String,
    pub amount: Decimal,
}

/// Request body for paying for a photo.
///
/// `idempotencyKey` makes retries safe: replaying a key returns the original
/// receipt instead of charging twice.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub photo_id: u32,
    pub amount: Decimal,
    pub payment_method: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoCreatedResponse {
    pub photo_id: PhotoId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidCreatedResponse {
    pub bid_id: BidId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCreatedResponse {
    pub transaction_id: PaymentId,
    pub tracking_number: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: Decimal,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the marketplace engine.
#[derive(Clone)]
pub struct AppState {
    pub market: Arc<Market>,
}

// === Identity ===

/// Caller identity taken from `Authorization: Bearer <identity>`.
///
/// The token is consumed as the opaque external identity; verifying it is
/// out of scope for this example.
pub struct Identity(ExternalId);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .filter(|token| !token.is_empty())
            .map(|token| Identity(ExternalId::from(token)))
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse {
                        error: "missing bearer identity".to_string(),
                        code: "UNAUTHORIZED".to_string(),
                    }),
                )
            })
    }
}

// === Error Handling ===

/// Wrapper for converting `MarketError` into HTTP responses.
pub struct AppError(MarketError);

impl From<MarketError> for AppError {
    fn from(err: MarketError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            MarketError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            MarketError::PhotoNotFound => (StatusCode::NOT_FOUND, "PHOTO_NOT_FOUND"),
            MarketError::UserNotFound => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            MarketError::NotificationNotFound => {
                (StatusCode::NOT_FOUND, "NOTIFICATION_NOT_FOUND")
            }
            MarketError::NotOwner => (StatusCode::FORBIDDEN, "NOT_OWNER"),
            MarketError::NotRecipient => (StatusCode::FORBIDDEN, "NOT_RECIPIENT"),
            MarketError::AdminRequired => (StatusCode::FORBIDDEN, "ADMIN_REQUIRED"),
            MarketError::AlreadySold => (StatusCode::CONFLICT, "ALREADY_SOLD"),
            MarketError::NoCurrentOffer => (StatusCode::CONFLICT, "NO_CURRENT_OFFER"),
            MarketError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /photos - Submit a photo for moderation.
async fn submit_photo(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(request): Json<SubmitPhotoRequest>,
) -> (StatusCode, Json<PhotoCreatedResponse>) {
    let photo_id = state.market.submit_photo(&caller, &request.title);
    (StatusCode::CREATED, Json(PhotoCreatedResponse { photo_id }))
}

/// GET /photos - List approved photos.
async fn list_photos(State(state): State<AppState>) -> Json<Vec<PhotoSnapshot>> {
    let photos = state
        .market
        .photos()
        .into_iter()
        .filter(|photo| photo.status == PhotoStatus::Approved)
        .collect();
    Json(photos)
}

/// GET /photos/{id} - Get one photo by id.
async fn get_photo(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<PhotoSnapshot>, AppError> {
    state
        .market
        .photo(PhotoId(id))
        .map(Json)
        .ok_or(AppError(MarketError::PhotoNotFound))
}

/// PUT /photos/{id} - Transition a photo's status.
async fn update_photo_status(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<u32>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<PhotoSnapshot>, AppError> {
    let snapshot = state.market.set_status(PhotoId(id), &caller, request.status)?;
    Ok(Json(snapshot))
}

/// DELETE /photos/{id} - Delete a photo and everything referencing it.
async fn delete_photo(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<u32>,
) -> Result<StatusCode, AppError> {
    state.market.delete_photo(PhotoId(id), &caller)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /bids - Place a bid on a photo.
async fn place_bid(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(request): Json<BidRequest>,
) -> Result<(StatusCode, Json<BidCreatedResponse>), AppError> {
    let bid = state.market.place_bid(
        PhotoId(request.photo_id),
        &caller,
        &request.display_name,
        request.amount,
    )?;
    Ok((
        StatusCode::CREATED,
        Json(BidCreatedResponse { bid_id: bid.id }),
    ))
}

/// POST /transactions - Pay for a photo.
async fn create_payment(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(request): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<PaymentCreatedResponse>), AppError> {
    let receipt = state.market.record_payment(
        PhotoId(request.photo_id),
        &caller,
        request.amount,
        request.payment_method.as_deref(),
        request.idempotency_key.map(IdempotencyKey::from),
    )?;
    Ok((
        StatusCode::CREATED,
        Json(PaymentCreatedResponse {
            transaction_id: receipt.payment_id,
            tracking_number: receipt.tracking_number,
        }),
    ))
}

/// GET /transactions - List the caller's payments, newest first.
async fn list_payments(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> Json<Vec<Payment>> {
    Json(state.market.payments_for(&caller))
}

/// GET /balance - The caller's current balance.
async fn get_balance(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> Json<BalanceResponse> {
    Json(BalanceResponse {
        balance: state.market.balance_of(&caller),
    })
}

/// GET /notifications - List the caller's notifications, newest first.
async fn list_notifications(
    State(state): State<AppState>,
    Identity(caller): Identity,
) -> Json<Vec<Notification>> {
    Json(state.market.notifications_for(&caller))
}

/// DELETE /notifications/{id} - Delete one of the caller's notifications.
async fn delete_notification(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    state
        .market
        .delete_notification(NotificationId(id), &caller)?;
    Ok(StatusCode::NO_CONTENT)
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/photos", post(submit_photo).get(list_photos))
        .route(
            "/photos/{id}",
            get(get_photo).put(update_photo_status).delete(delete_photo),
        )
        .route("/bids", post(place_bid))
        .route("/transactions", post(create_payment).get(list_payments))
        .route("/balance", get(get_balance))
        .route("/notifications", get(list_notifications))
        .route("/notifications/{id}", delete(delete_notification))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "photo_market_rs=debug,server=info".into()),
        )
        .init();

    let market = Arc::new(Market::new());
    // Seed a moderator so the approval flow works out of the box.
    market.register(&"admin".into(), "Admin", Role::Admin);

    let state = AppState { market };
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Photo market API server running on http://127.0.0.1:3000");
    println!();
    println!("Identity is the bearer token, e.g. -H 'Authorization: Bearer u1'.");
    println!("The moderator identity 'admin' is pre-registered.");
    println!();
    println!("Endpoints:");
    println!("  POST   /photos              - Submit a photo for moderation");
    println!("  GET    /photos              - List approved photos");
    println!("  GET    /photos/{{id}}         - Get one photo");
    println!("  PUT    /photos/{{id}}         - Transition a photo's status");
    println!("  DELETE /photos/{{id}}         - Delete a photo");
    println!("  POST   /bids                - Place a bid");
    println!("  POST   /transactions        - Pay for a photo");
    println!("  GET    /transactions        - List the caller's payments");
    println!("  GET    /balance             - The caller's balance");
    println!("  GET    /notifications       - List the caller's notifications");
    println!("  DELETE /notifications/{{id}}  - Delete a notification");

    axum::serve(listener, app).await.unwrap();
}
