// Receipt quality scoring
//
// A 0-100 estimate of how complete a submission is, computed from the upload
// metadata alone. Image content is never inspected here.

use crate::receipts::{CaptureMethod, NewReceipt};

pub const MAX_QUALITY_SCORE: i32 = 100;
const MISSING_IMAGE_PENALTY: i32 = 50;
const MISSING_NUMBER_PENALTY: i32 = 20;
const NON_PREFERRED_CHANNEL_PENALTY: i32 = 10;

/// Channel that earns no capture penalty
pub const PREFERRED_CAPTURE_METHOD: CaptureMethod = CaptureMethod::Phone;

/// Presence signals feeding the quality score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualitySignals {
    pub image_present: bool,
    pub receipt_number_present: bool,
    pub capture_method: CaptureMethod,
}

impl QualitySignals {
    pub fn from_submission(receipt: &NewReceipt) -> Self {
        Self {
            image_present: receipt
                .image_path
                .as_deref()
                .is_some_and(|path| !path.trim().is_empty()),
            receipt_number_present: receipt
                .receipt_number
                .as_deref()
                .is_some_and(|number| !number.trim().is_empty()),
            capture_method: receipt.capture_method,
        }
    }
}

pub struct QualityScorer;

impl QualityScorer {
    pub fn score(signals: QualitySignals) -> i32 {
        let mut score = MAX_QUALITY_SCORE;
        if !signals.image_present {
            score -= MISSING_IMAGE_PENALTY;
        }
        if !signals.receipt_number_present {
            score -= MISSING_NUMBER_PENALTY;
        }
        if signals.capture_method != PREFERRED_CAPTURE_METHOD {
            score -= NON_PREFERRED_CHANNEL_PENALTY;
        }
        score.max(0)
    }
}
