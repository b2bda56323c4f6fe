//! StateStore port - owner / budget / evolution 状態の永続化

use crate::domain::SupervisorState;
use crate::error::WardenError;

/// Load and save the [`SupervisorState`] document.
///
/// `load` on a store that was never written returns the default state.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<SupervisorState, WardenError>;
    fn save(&self, state: &SupervisorState) -> Result<(), WardenError>;
}
