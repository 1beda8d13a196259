pub mod client;
pub mod manual;
pub mod momo;
pub mod signature;
pub mod zalopay;

pub use client::{new_transaction_id, ProviderHttp};
pub use manual::ManualGateway;
pub use momo::{MomoConfig, MomoGateway};
pub use zalopay::{ZaloPayConfig, ZaloPayGateway};
