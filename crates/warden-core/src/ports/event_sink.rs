//! EventSink port - 構造化イベントログ
//!
//! Append-only diagnostics (crash, timeout, restore, ...). Nothing in the
//! supervisor reads them back.

use crate::domain::EventRecord;
use crate::error::WardenError;

pub trait EventSink: Send + Sync {
    fn emit(&self, record: &EventRecord) -> Result<(), WardenError>;
}
