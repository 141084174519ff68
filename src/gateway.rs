//! Collaborator seams. The engine instructs money movement and checks
//! renter identity through these traits; it never moves money itself and
//! never trusts a financial state it has not received an acknowledgment
//! for. In-memory doubles for tests and benches live at the bottom.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::Cents;

/// Failure reported by a collaborator. The engine maps these, and call
/// timeouts, onto its upstream-failure class.
#[derive(Debug, Clone)]
pub struct GatewayError(pub String);

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for GatewayError {}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Authorize the rental total and place the deposit hold. Returns the
    /// gateway's authorization reference.
    async fn authorize(
        &self,
        booking_id: Ulid,
        renter_id: Ulid,
        amount: Cents,
        deposit: Cents,
    ) -> Result<String, GatewayError>;

    /// Capture a previously authorized amount. Returns the capture
    /// reference the booking records.
    async fn capture(&self, booking_id: Ulid, amount: Cents) -> Result<String, GatewayError>;

    /// Move `amount` back to the renter.
    async fn refund(&self, booking_id: Ulid, amount: Cents) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verified-renter precondition, checked before any reservation.
    async fn is_verified_renter(&self, user_id: Ulid) -> Result<bool, GatewayError>;
}

// ── In-memory doubles ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Authorize {
        booking_id: Ulid,
        amount: Cents,
        deposit: Cents,
    },
    Capture {
        booking_id: Ulid,
        amount: Cents,
    },
    Refund {
        booking_id: Ulid,
        amount: Cents,
    },
}

/// Gateway double that moves no money: it records every instruction and
/// can be told to fail or hang per call type.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    pub fail_authorize: AtomicBool,
    pub fail_capture: AtomicBool,
    pub fail_refund: AtomicBool,
    /// When set, every call sleeps far past any sane engine timeout.
    pub hang: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    async fn gate(&self, flag: &AtomicBool, what: &str) -> Result<(), GatewayError> {
        if self.hang.load(Ordering::Relaxed) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        if flag.load(Ordering::Relaxed) {
            return Err(GatewayError(format!("{what} declined")));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn authorize(
        &self,
        booking_id: Ulid,
        _renter_id: Ulid,
        amount: Cents,
        deposit: Cents,
    ) -> Result<String, GatewayError> {
        self.gate(&self.fail_authorize, "authorize").await?;
        self.calls.lock().unwrap().push(GatewayCall::Authorize {
            booking_id,
            amount,
            deposit,
        });
        Ok(format!("auth-{booking_id}"))
    }

    async fn capture(&self, booking_id: Ulid, amount: Cents) -> Result<String, GatewayError> {
        self.gate(&self.fail_capture, "capture").await?;
        self.calls
            .lock()
            .unwrap()
            .push(GatewayCall::Capture { booking_id, amount });
        Ok(format!("cap-{booking_id}"))
    }

    async fn refund(&self, booking_id: Ulid, amount: Cents) -> Result<(), GatewayError> {
        self.gate(&self.fail_refund, "refund").await?;
        self.calls
            .lock()
            .unwrap()
            .push(GatewayCall::Refund { booking_id, amount });
        Ok(())
    }
}

/// Identity double: everyone is verified except an explicit deny list.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    unverified: HashSet<Ulid>,
}

impl StaticDirectory {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn deny(mut self, user_id: Ulid) -> Self {
        self.unverified.insert(user_id);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticDirectory {
    async fn is_verified_renter(&self, user_id: Ulid) -> Result<bool, GatewayError> {
        Ok(!self.unverified.contains(&user_id))
    }
}
