//! The penalty manager
//!
//! A penalty goes `active -> lifted` and never back. Both transitions happen
//! only when a request evaluates the store; nothing runs in the background.

use crate::error::StoreError;
use crate::model::Penalty;
use crate::store::CatalogStore;
use chrono::{DateTime, Duration, Utc};

/// Lifts every active penalty whose end time has passed. Returns the penalties
/// lifted by this call; already-lifted penalties are left alone.
pub fn lift_expired<S: CatalogStore>(store: &mut S, now: DateTime<Utc>) -> Result<Vec<Penalty>, StoreError> {
    let mut lifted = Vec::new();
    for penalty in store.list_expired_active_penalties(now) {
        let penalty = store.lift_penalty(penalty.id)?;
        tracing::info!(penalty = %penalty.id, reader = %penalty.reader_id, "penalty lifted");
        lifted.push(penalty);
    }
    Ok(lifted)
}

/// Issues a penalty ending at `now + duration` to every reader holding an
/// overdue loan, unless that reader already has an active penalty. A reader
/// with several overdue loans gets one penalty.
pub fn penalize_overdue<S: CatalogStore>(
    store: &mut S,
    now: DateTime<Utc>,
    duration: Duration,
) -> Result<Vec<Penalty>, StoreError> {
    let mut issued = Vec::new();
    for loan in store.list_overdue_active_loans(now) {
        if store.find_active_penalty(loan.reader_id).is_some() {
            continue;
        }
        let penalty = store.insert_penalty(loan.reader_id, now + duration)?;
        tracing::info!(
            penalty = %penalty.id,
            reader = %penalty.reader_id,
            loan = %loan.id,
            until = %penalty.end_time,
            "overdue loan, penalty issued"
        );
        issued.push(penalty);
    }
    Ok(issued)
}
