//! IdGenerator port - ID 生成の抽象化
//!
//! Used for tasks the supervisor creates on its own (review, evolution).
//! Caller-submitted tasks bring their own ids.

use crate::domain::TaskId;
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// ULID based ids, lowercase.
///
/// The timestamp part comes from the injected [`Clock`], so a `FixedClock`
/// gives ids with a deterministic prefix.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskId::new(ulid.to_string().to_ascii_lowercase())
    }
}
