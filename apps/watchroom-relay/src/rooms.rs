//! Persistence of the relay's room directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use watchroom_core::{RelayState, RoomInfo};

const ROOMS_FILE: &str = "rooms.yaml";

fn rooms_path(data_dir: &Path) -> PathBuf {
    data_dir.join(ROOMS_FILE)
}

/// Loads persisted rooms into `state`. Returns how many were restored.
pub fn restore(state: &RelayState, data_dir: &Path) -> Result<usize> {
    let path = rooms_path(data_dir);
    if !path.exists() {
        return Ok(0);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let rooms: Vec<RoomInfo> = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let count = rooms.len();
    for room in rooms {
        state.rooms.insert(room.id.clone(), room);
    }
    Ok(count)
}

/// Writes the room directory atomically (temp file + rename).
pub fn persist(state: &RelayState, data_dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let mut rooms: Vec<RoomInfo> = state
        .rooms
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    rooms.sort_by(|a, b| a.id.cmp(&b.id));

    let content = serde_yaml::to_string(&rooms).context("Failed to serialize rooms")?;
    let path = rooms_path(data_dir);
    let temp = path.with_extension("yaml.tmp");
    std::fs::write(&temp, content)
        .with_context(|| format!("Failed to write {}", temp.display()))?;
    std::fs::rename(&temp, &path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(rooms.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooms_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let before = RelayState::builder().build();
        before.rooms.insert(
            "r1".into(),
            RoomInfo {
                id: "r1".into(),
                owner_id: Some("alice".into()),
            },
        );
        assert_eq!(persist(&before, dir.path()).unwrap(), 1);

        let after = RelayState::builder().build();
        assert_eq!(restore(&after, dir.path()).unwrap(), 1);
        assert_eq!(
            after.rooms.get("r1").unwrap().owner_id.as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn missing_file_restores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let state = RelayState::builder().build();
        assert_eq!(restore(&state, dir.path()).unwrap(), 0);
    }
}
