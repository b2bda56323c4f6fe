//! File-backed [`StateStore`].

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::domain::SupervisorState;
use crate::error::WardenError;
use crate::fs::write_atomic;
use crate::ports::StateStore;

/// State document as pretty JSON. A missing file loads as the default state.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<SupervisorState, WardenError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(SupervisorState::default()),
            Err(e) => Err(WardenError::io(&self.path, e)),
        }
    }

    fn save(&self, state: &SupervisorState) -> Result<(), WardenError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_default_and_save_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state").join("state.json"));
        assert_eq!(store.load().unwrap(), SupervisorState::default());

        let mut st = SupervisorState::default();
        st.owner_chat_id = Some(9);
        st.spent_usd = 0.25;
        store.save(&st).unwrap();
        assert_eq!(store.load().unwrap(), st);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"[").unwrap();
        assert!(matches!(JsonStateStore::new(path).load(), Err(WardenError::Json(_))));
    }
}
