//! Stock count sessions: compare counted quantities against system balances.
//!
//! ```text
//! OPEN ──► COUNTING ──► CLOSED
//!   │         │
//!   └─────────┴───────► CANCELED
//! ```
//!
//! CLOSED and CANCELED are terminal. Closing yields one variance per item
//! whose count differs from its snapshot; the caller turns those into
//! adjustments inside the same unit of work.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpro_core::{
    CountItemId, InventoryError, InventoryResult, LocationId, ProductId, SessionId,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountStatus {
    Open,
    Counting,
    Closed,
    Canceled,
}

impl CountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CountStatus::Open => "OPEN",
            CountStatus::Counting => "COUNTING",
            CountStatus::Closed => "CLOSED",
            CountStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CountStatus::Closed | CountStatus::Canceled)
    }
}

impl core::fmt::Display for CountStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CountStatus {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(CountStatus::Open),
            "COUNTING" => Ok(CountStatus::Counting),
            "CLOSED" => Ok(CountStatus::Closed),
            "CANCELED" => Ok(CountStatus::Canceled),
            other => Err(InventoryError::invalid_state(format!(
                "unknown stock count status: {other}"
            ))),
        }
    }
}

/// A counting session for one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCountSession {
    id: SessionId,
    location_id: LocationId,
    status: CountStatus,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    notes: Option<String>,
}

impl StockCountSession {
    /// Start a new session in `OPEN` with no items.
    pub fn open(location_id: LocationId, notes: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            location_id,
            status: CountStatus::Open,
            start_date: now,
            end_date: None,
            notes: notes.filter(|n| !n.trim().is_empty()),
        }
    }

    /// Rebuild a session from persisted fields.
    pub fn restore(
        id: SessionId,
        location_id: LocationId,
        status: CountStatus,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Self {
        Self {
            id,
            location_id,
            status,
            start_date,
            end_date,
            notes,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn location_id(&self) -> LocationId {
        self.location_id
    }

    pub fn status(&self) -> CountStatus {
        self.status
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    fn ensure_active(&self, action: &'static str) -> InventoryResult<()> {
        if self.status.is_terminal() {
            return Err(InventoryError::invalid_transition(self.status, action));
        }
        Ok(())
    }

    pub fn ensure_accepts_items(&self) -> InventoryResult<()> {
        self.ensure_active("add items to")
    }

    pub fn ensure_accepts_counts(&self) -> InventoryResult<()> {
        self.ensure_active("record counts in")
    }

    /// Explicit `OPEN -> COUNTING`.
    pub fn start_counting(&mut self) -> InventoryResult<()> {
        if self.status != CountStatus::Open {
            return Err(InventoryError::invalid_transition(self.status, "start counting"));
        }
        self.status = CountStatus::Counting;
        Ok(())
    }

    /// Called when a count is recorded; the first count moves an `OPEN`
    /// session to `COUNTING`. Returns whether the status changed.
    pub fn note_count_recorded(&mut self) -> InventoryResult<bool> {
        self.ensure_accepts_counts()?;
        if self.status == CountStatus::Open {
            self.status = CountStatus::Counting;
            return Ok(true);
        }
        Ok(false)
    }

    /// `COUNTING -> CLOSED`, returning the variances to reconcile.
    ///
    /// Every item must have been counted. On error the session is untouched.
    pub fn close(
        &mut self,
        items: &[StockCountItem],
        now: DateTime<Utc>,
    ) -> InventoryResult<Vec<CountVariance>> {
        if self.status != CountStatus::Counting {
            return Err(InventoryError::invalid_transition(self.status, "close"));
        }

        let missing: Vec<ProductId> = items
            .iter()
            .filter(|item| item.counted_quantity.is_none())
            .map(|item| item.product_id)
            .collect();
        if !missing.is_empty() {
            return Err(InventoryError::IncompleteCount { missing });
        }

        let variances = items
            .iter()
            .filter_map(|item| CountVariance::of(item).transpose())
            .collect::<InventoryResult<Vec<_>>>()?;
        self.status = CountStatus::Closed;
        self.end_date = Some(now);
        Ok(variances)
    }

    /// `OPEN | COUNTING -> CANCELED`. No adjustments are produced.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> InventoryResult<()> {
        self.ensure_active("cancel")?;
        self.status = CountStatus::Canceled;
        self.end_date = Some(now);
        Ok(())
    }

    /// Reason recorded on adjustments generated by this session.
    pub fn adjustment_reason(&self) -> String {
        format!("stock count #{}", self.id)
    }
}

/// One product within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCountItem {
    pub id: CountItemId,
    pub session_id: SessionId,
    pub product_id: ProductId,
    /// Balance at the time the item was added.
    pub system_quantity: i64,
    pub counted_quantity: Option<i64>,
    pub count_date: Option<DateTime<Utc>>,
}

impl StockCountItem {
    pub fn new(session_id: SessionId, product_id: ProductId, system_quantity: i64) -> Self {
        Self {
            id: CountItemId::new(),
            session_id,
            product_id,
            system_quantity,
            counted_quantity: None,
            count_date: None,
        }
    }

    /// `counted - system`, once counted.
    ///
    /// `None` if uncounted or if the difference does not fit in an `i64`.
    pub fn difference(&self) -> Option<i64> {
        self.counted_quantity.and_then(|c| c.checked_sub(self.system_quantity))
    }

    /// Record (or overwrite) the physical count.
    pub fn record(&mut self, counted: i64, now: DateTime<Utc>) -> InventoryResult<()> {
        if counted < 0 {
            return Err(InventoryError::invalid_quantity(format!(
                "counted quantity cannot be negative, got {counted}"
            )));
        }
        if counted.checked_sub(self.system_quantity).is_none() {
            return Err(InventoryError::invalid_quantity(format!(
                "count {counted} against system quantity {} overflows the difference",
                self.system_quantity
            )));
        }
        self.counted_quantity = Some(counted);
        self.count_date = Some(now);
        Ok(())
    }
}

/// A nonzero difference found when closing a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountVariance {
    pub item_id: CountItemId,
    pub product_id: ProductId,
    pub system_quantity: i64,
    pub counted_quantity: i64,
    pub difference: i64,
}

impl CountVariance {
    fn of(item: &StockCountItem) -> InventoryResult<Option<Self>> {
        let Some(counted) = item.counted_quantity else {
            return Ok(None);
        };
        let difference = counted.checked_sub(item.system_quantity).ok_or_else(|| {
            InventoryError::invalid_quantity(format!(
                "count {counted} against system quantity {} overflows the difference",
                item.system_quantity
            ))
        })?;
        Ok((difference != 0).then(|| CountVariance {
            item_id: item.id,
            product_id: item.product_id,
            system_quantity: item.system_quantity,
            counted_quantity: counted,
            difference,
        }))
    }

    pub fn adjustment_notes(&self) -> String {
        format!(
            "system: {}, counted: {}, difference: {:+}",
            self.system_quantity, self.counted_quantity, self.difference
        )
    }
}

/// A product the bulk add could not take, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkAddFailure {
    pub product_id: ProductId,
    pub error: InventoryError,
}

/// Result of adding every stocked product of a location to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkAddReport {
    pub added: Vec<StockCountItem>,
    /// Products already in the session.
    pub skipped: Vec<ProductId>,
    pub errors: Vec<BulkAddFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> StockCountSession {
        StockCountSession::open(LocationId::new(), None, Utc::now())
    }

    fn counted(session: &StockCountSession, system: i64, counted: i64) -> StockCountItem {
        let mut item = StockCountItem::new(session.id(), ProductId::new(), system);
        item.record(counted, Utc::now()).unwrap();
        item
    }

    #[test]
    fn new_session_is_open_without_end_date() {
        let s = session();
        assert_eq!(s.status(), CountStatus::Open);
        assert_eq!(s.end_date(), None);
    }

    #[test]
    fn first_count_moves_open_to_counting() {
        let mut s = session();
        assert!(s.note_count_recorded().unwrap());
        assert_eq!(s.status(), CountStatus::Counting);
        assert!(!s.note_count_recorded().unwrap());
    }

    #[test]
    fn close_requires_counting() {
        let mut s = session();
        let err = s.close(&[], Utc::now()).unwrap_err();
        assert_eq!(err, InventoryError::invalid_transition(CountStatus::Open, "close"));
    }

    #[test]
    fn close_lists_uncounted_products() {
        let mut s = session();
        s.start_counting().unwrap();
        let done = counted(&s, 4, 4);
        let pending = StockCountItem::new(s.id(), ProductId::new(), 2);
        let err = s.close(&[done, pending.clone()], Utc::now()).unwrap_err();
        assert_eq!(
            err,
            InventoryError::IncompleteCount {
                missing: vec![pending.product_id]
            }
        );
        assert_eq!(s.status(), CountStatus::Counting);
    }

    #[test]
    fn close_returns_only_nonzero_variances() {
        let mut s = session();
        s.start_counting().unwrap();
        let same = counted(&s, 10, 10);
        let short = counted(&s, 5, 3);
        let variances = s.close(&[same, short.clone()], Utc::now()).unwrap();

        assert_eq!(variances.len(), 1);
        assert_eq!(variances[0].product_id, short.product_id);
        assert_eq!(variances[0].difference, -2);
        assert_eq!(variances[0].adjustment_notes(), "system: 5, counted: 3, difference: -2");
        assert_eq!(s.status(), CountStatus::Closed);
        assert!(s.end_date().is_some());
    }

    #[test]
    fn recording_a_count_whose_difference_overflows_is_rejected() {
        let s = session();
        let mut item = StockCountItem::new(s.id(), ProductId::new(), -5);
        let err = item.record(i64::MAX, Utc::now()).unwrap_err();
        assert!(matches!(err, InventoryError::InvalidQuantity(_)));
        assert_eq!(item.counted_quantity, None);
        assert_eq!(item.difference(), None);
    }

    #[test]
    fn close_with_overflowing_difference_leaves_session_counting() {
        let mut s = session();
        s.start_counting().unwrap();
        let mut item = StockCountItem::new(s.id(), ProductId::new(), -5);
        item.counted_quantity = Some(i64::MAX);
        item.count_date = Some(Utc::now());

        let err = s.close(&[item], Utc::now()).unwrap_err();
        assert!(matches!(err, InventoryError::InvalidQuantity(_)));
        assert_eq!(s.status(), CountStatus::Counting);
        assert_eq!(s.end_date(), None);
    }

    #[test]
    fn terminal_sessions_reject_everything() {
        let mut s = session();
        s.cancel(Utc::now()).unwrap();
        assert_eq!(s.status(), CountStatus::Canceled);
        assert!(s.cancel(Utc::now()).is_err());
        assert!(s.start_counting().is_err());
        assert!(s.ensure_accepts_items().is_err());
        assert!(s.note_count_recorded().is_err());

        let mut closed = session();
        closed.start_counting().unwrap();
        closed.close(&[], Utc::now()).unwrap();
        assert_eq!(
            closed.cancel(Utc::now()).unwrap_err().kind(),
            "invalid_state_transition"
        );
    }

    #[test]
    fn start_counting_only_from_open() {
        let mut s = session();
        s.start_counting().unwrap();
        assert!(s.start_counting().is_err());
    }

    #[test]
    fn recount_overwrites_and_negative_counts_are_rejected() {
        let s = session();
        let mut item = StockCountItem::new(s.id(), ProductId::new(), 8);
        assert_eq!(item.difference(), None);
        item.record(6, Utc::now()).unwrap();
        item.record(9, Utc::now()).unwrap();
        assert_eq!(item.difference(), Some(1));
        assert!(item.record(-1, Utc::now()).is_err());
        assert_eq!(item.counted_quantity, Some(9));
    }

    #[test]
    fn positive_variance_is_signed_in_notes() {
        let mut s = session();
        s.start_counting().unwrap();
        let over = counted(&s, 1, 4);
        let variances = s.close(&[over], Utc::now()).unwrap();
        assert_eq!(variances[0].adjustment_notes(), "system: 1, counted: 4, difference: +3");
        assert!(s.adjustment_reason().starts_with("stock count #"));
    }

    #[test]
    fn status_labels_parse_back() {
        for status in [
            CountStatus::Open,
            CountStatus::Counting,
            CountStatus::Closed,
            CountStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<CountStatus>().unwrap(), status);
        }
    }
}
