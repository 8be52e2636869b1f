// Duplicate fingerprints
//
// Two receipts are duplicates when they carry the same receipt number, store
// and total. The fingerprint hashes that triple into a fixed-width key that the
// stores claim atomically.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::receipts::Receipt;

/// Hex SHA-256 of the duplicate-detection triple.
///
/// The receipt number is trimmed and upper-cased and the amount normalized, so
/// `inv-7 / 450.00` and `INV-7 / 450` hash identically.
pub fn fingerprint(receipt_number: &str, store_id: i64, total_amount: Decimal) -> String {
    let mut hasher = Sha256::new();
    hasher.update(receipt_number.trim().to_uppercase().as_bytes());
    hasher.update(b"|");
    hasher.update(store_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(total_amount.normalize().to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Request to hold a fingerprint for one receipt.
///
/// A claim succeeds when the fingerprint is free, already held by the same
/// receipt, or held by a receipt submitted at least `window` earlier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintClaim {
    pub fingerprint: String,
    pub receipt_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub window: chrono::Duration,
}

impl FingerprintClaim {
    /// Claim for a stored receipt; `None` when it has no receipt number
    pub fn for_receipt(receipt: &Receipt, window: chrono::Duration) -> Option<Self> {
        let number = receipt.receipt_number.as_deref()?;
        if number.trim().is_empty() {
            return None;
        }
        Some(Self {
            fingerprint: fingerprint(number, receipt.store_id, receipt.total_amount),
            receipt_id: receipt.id,
            submitted_at: receipt.created_at,
            window,
        })
    }

    /// Submissions at or before this instant no longer block the claim
    pub fn expires_before(&self) -> DateTime<Utc> {
        self.submitted_at - self.window
    }

    /// Whether an existing holder still blocks this claim
    pub fn is_blocked_by(&self, holder_id: Uuid, holder_submitted_at: DateTime<Utc>) -> bool {
        holder_id != self.receipt_id && holder_submitted_at > self.expires_before()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fingerprint_normalizes_inputs() {
        assert_eq!(
            fingerprint("inv-7", 3, dec!(450.00)),
            fingerprint(" INV-7 ", 3, dec!(450))
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_each_component() {
        let base = fingerprint("INV-7", 3, dec!(450));
        assert_ne!(base, fingerprint("INV-8", 3, dec!(450)));
        assert_ne!(base, fingerprint("INV-7", 4, dec!(450)));
        assert_ne!(base, fingerprint("INV-7", 3, dec!(450.01)));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn test_claim_blocking_window() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let claim = FingerprintClaim {
            fingerprint: "f".to_string(),
            receipt_id: Uuid::new_v4(),
            submitted_at: t0,
            window: chrono::Duration::hours(1),
        };
        let other = Uuid::new_v4();

        assert!(claim.is_blocked_by(other, t0 - chrono::Duration::minutes(59)));
        assert!(!claim.is_blocked_by(other, t0 - chrono::Duration::hours(1)));
        assert!(!claim.is_blocked_by(claim.receipt_id, t0));
        // A holder submitted later than the claimant still blocks it
        assert!(claim.is_blocked_by(other, t0 + chrono::Duration::minutes(5)));
    }
}
