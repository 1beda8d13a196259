use axum::{http::Method, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod app_config;
pub mod bookings;
pub mod departures;
pub mod error;
pub mod payments;
pub mod state;
pub mod webhooks;
pub mod worker;

pub use error::AppError;
pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    Router::new()
        .merge(bookings::routes())
        .merge(payments::routes())
        .merge(departures::routes())
        .merge(webhooks::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
