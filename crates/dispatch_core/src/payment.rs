//! Payment capture seam.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ActorId, RideId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub ride_id: RideId,
    pub rider_id: ActorId,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub transaction_id: String,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PaymentError {
    #[error("payment declined ({code}): {message}")]
    Declined { code: String, message: String },
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn capture(&self, request: &PaymentRequest) -> Result<PaymentReceipt, PaymentError>;
}

/// Gateway that approves every positive, finite amount.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApprovingPaymentGateway;

#[async_trait]
impl PaymentGateway for ApprovingPaymentGateway {
    async fn capture(&self, request: &PaymentRequest) -> Result<PaymentReceipt, PaymentError> {
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(PaymentError::Declined {
                code: "INVALID_AMOUNT".to_string(),
                message: format!("cannot capture {}", request.amount),
            });
        }
        Ok(PaymentReceipt {
            transaction_id: transaction_id(),
        })
    }
}

/// `txn_<millis in base 36>_<8 hex digits>`
fn transaction_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let suffix: u32 = rand::thread_rng().gen();
    format!("txn_{}_{suffix:08x}", to_base36(millis))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
