//! Redelivery policy: decides what an expired lease does to its message.

/// What the scheduler does with a message whose lease expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAction {
    /// Back to ready, at the back of its priority class.
    Redeliver,

    /// Out of normal scheduling until kicked or finished.
    Bury,
}

/// Redelivery policy for expired leases.
///
/// Without a limit every expired lease is redelivered (plain at-least-once).
/// With `max_reserves = Some(n)`, a message that has already been handed out
/// `n` times is buried the next time its lease expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    pub max_reserves: Option<u32>,
}

impl RedeliveryPolicy {
    pub fn unlimited() -> Self {
        Self { max_reserves: None }
    }

    pub fn bury_after(max_reserves: u32) -> Self {
        Self {
            max_reserves: Some(max_reserves),
        }
    }

    /// # Arguments
    /// * `reserve_count` - Reservations delivered so far, including the one
    ///   that just expired.
    pub fn on_expiry(&self, reserve_count: u32) -> ExpiryAction {
        match self.max_reserves {
            Some(max) if reserve_count >= max => ExpiryAction::Bury,
            _ => ExpiryAction::Redeliver,
        }
    }
}
