//! Best-effort persistence of the four parameter records.
//!
//! The snapshot is pretty-printed JSON at `<config dir>/sensorlab/parameters.json`.
//! `load` and `save` never fail: a missing or unreadable file yields defaults
//! and a failed write is logged and dropped. `try_load` / `try_save` expose
//! the underlying error for tools that want it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SnapshotError;
use crate::params::{
    ChannelId, Clamped, EmgParams, ForceParams, OrientationParams, ParameterBank, StrainParams,
};

pub const SNAPSHOT_FILE: &str = "parameters.json";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSnapshot {
    pub orientation: OrientationParams,
    pub force: ForceParams,
    pub strain: StrainParams,
    pub emg: EmgParams,
}

impl Clamped for ParameterSnapshot {
    fn clamped(&self) -> Self {
        Self {
            orientation: self.orientation.clamped(),
            force: self.force.clamped(),
            strain: self.strain.clamped(),
            emg: self.emg.clamped(),
        }
    }
}

impl ParameterSnapshot {
    /// Override one field from a `channel.field=value` assignment, e.g.
    /// `force.mode=static` or `orientation.damping_ratio=0.7`. The result is
    /// clamped like any other write.
    pub fn assign(&mut self, assignment: &str) -> Result<(), String> {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| format!("expected channel.field=value, got '{assignment}'"))?;
        let (channel_name, field) = key
            .trim()
            .split_once('.')
            .ok_or_else(|| format!("expected channel.field, got '{key}'"))?;
        let channel = ChannelId::from_name(channel_name)
            .ok_or_else(|| format!("unknown channel '{channel_name}'"))?;

        let raw = raw.trim();
        let value = if let Ok(x) = raw.parse::<f64>() {
            serde_json::Number::from_f64(x)
                .map(Value::Number)
                .ok_or_else(|| format!("{key}: value must be finite"))?
        } else if let Ok(b) = raw.parse::<bool>() {
            Value::Bool(b)
        } else {
            Value::String(raw.to_ascii_lowercase())
        };

        let mut doc = serde_json::to_value(&*self).map_err(|e| e.to_string())?;
        let record = doc
            .get_mut(channel.name())
            .and_then(Value::as_object_mut)
            .ok_or_else(|| format!("no parameter record for {channel}"))?;
        if !record.contains_key(field) {
            return Err(format!("unknown field '{field}' for {channel}"));
        }
        record.insert(field.to_string(), value);
        let next: ParameterSnapshot =
            serde_json::from_value(doc).map_err(|e| format!("{key}: {e}"))?;
        *self = next.clamped();
        Ok(())
    }
}

impl ParameterBank {
    /// Current values of all four cells.
    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            orientation: self.orientation.get(),
            force: self.force.get(),
            strain: self.strain.get(),
            emg: self.emg.get(),
        }
    }

    /// Write every cell. Each cell notifies its own subscribers.
    pub fn apply(&self, snapshot: &ParameterSnapshot) {
        self.orientation.set(snapshot.orientation.clone());
        self.force.set(snapshot.force.clone());
        self.strain.set(snapshot.strain.clone());
        self.emg.set(snapshot.emg.clone());
    }
}

/// Per-user snapshot location, if the platform has a config directory.
pub fn default_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "sensorlab")
        .map(|dirs| dirs.config_dir().join(SNAPSHOT_FILE))
}

pub fn try_load(path: &Path) -> Result<ParameterSnapshot, SnapshotError> {
    let text = fs::read_to_string(path)?;
    let snap: ParameterSnapshot = serde_json::from_str(&text)?;
    Ok(snap.clamped())
}

pub fn try_save(path: &Path, snapshot: &ParameterSnapshot) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, text)?;
    Ok(())
}

/// Load from `path`, falling back to defaults on any failure.
pub fn load(path: &Path) -> ParameterSnapshot {
    match try_load(path) {
        Ok(snap) => snap,
        Err(SnapshotError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no parameter snapshot, using defaults");
            ParameterSnapshot::default()
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "ignoring unreadable parameter snapshot"
            );
            ParameterSnapshot::default()
        }
    }
}

/// Save to `path`; failures are logged and dropped.
pub fn save(path: &Path, snapshot: &ParameterSnapshot) {
    if let Err(e) = try_save(path, snapshot) {
        tracing::warn!(path = %path.display(), error = %e, "parameter snapshot not saved");
    }
}

/// [`load`] from [`default_path`].
pub fn load_default() -> ParameterSnapshot {
    match default_path() {
        Some(path) => load(&path),
        None => {
            tracing::warn!(error = %SnapshotError::NoConfigDir, "using default parameters");
            ParameterSnapshot::default()
        }
    }
}

/// [`save`] to [`default_path`].
pub fn save_default(snapshot: &ParameterSnapshot) {
    match default_path() {
        Some(path) => save(&path, snapshot),
        None => tracing::warn!(error = %SnapshotError::NoConfigDir, "parameter snapshot not saved"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ForceMode;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("sensorlab-snapshot-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_save_then_load() {
        let dir = temp_dir("roundtrip");
        let path = dir.join("nested").join(SNAPSHOT_FILE);
        let mut snap = ParameterSnapshot::default();
        snap.force.mode = ForceMode::Static;
        snap.orientation.damping_ratio = 1.3;
        save(&path, &snap);
        assert_eq!(load(&path), snap);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = temp_dir("missing");
        assert_eq!(load(&dir.join("nope.json")), ParameterSnapshot::default());
    }

    #[test]
    fn test_garbage_gives_defaults() {
        let dir = temp_dir("garbage");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(SNAPSHOT_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(try_load(&path), Err(SnapshotError::Json(_))));
        assert_eq!(load(&path), ParameterSnapshot::default());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_partial_document_is_clamped() {
        let dir = temp_dir("partial");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(SNAPSHOT_FILE);
        fs::write(&path, r#"{"emg": {"activation": 7.5}, "force": {"mode": "static"}}"#).unwrap();
        let snap = load(&path);
        assert_eq!(snap.emg.activation, 1.0);
        assert_eq!(snap.emg.amplitude_mv, EmgParams::default().amplitude_mv);
        assert_eq!(snap.force.mode, ForceMode::Static);
        assert_eq!(snap.orientation, OrientationParams::default());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bank_snapshot_and_apply() {
        let bank = ParameterBank::new();
        let mut snap = bank.snapshot();
        assert_eq!(snap, ParameterSnapshot::default());
        snap.strain.gauge_factor = 3.0;
        snap.emg.activation = -1.0;
        bank.apply(&snap);
        let back = bank.snapshot();
        assert_eq!(back.strain.gauge_factor, 3.0);
        assert_eq!(back.emg.activation, 0.0);
    }

    #[test]
    fn test_assign_fields() {
        let mut snap = ParameterSnapshot::default();
        snap.assign("force.mode=static").unwrap();
        snap.assign("Orientation.damping_ratio = 0.7").unwrap();
        snap.assign("emg.bandpass=false").unwrap();
        snap.assign("emg.activation=9").unwrap();
        assert_eq!(snap.force.mode, ForceMode::Static);
        assert_eq!(snap.orientation.damping_ratio, 0.7);
        assert!(!snap.emg.bandpass);
        assert_eq!(snap.emg.activation, 1.0);

        assert!(snap.assign("force.voltage=3").is_err());
        assert!(snap.assign("pressure.a=1").is_err());
        assert!(snap.assign("force.mode=sideways").is_err());
        assert!(snap.assign("force.a").is_err());
        assert!(snap.assign("force.a=NaN").is_err());
        // Failed assignments leave the snapshot untouched
        assert_eq!(snap.force.a, ForceParams::default().a);
    }

    #[test]
    fn test_save_to_unwritable_path_is_silent() {
        let dir = temp_dir("blocked");
        fs::create_dir_all(&dir).unwrap();
        // A regular file where a directory is needed
        let blocker = dir.join("file");
        fs::write(&blocker, "x").unwrap();
        save(&blocker.join(SNAPSHOT_FILE), &ParameterSnapshot::default());
        assert!(try_save(&blocker.join(SNAPSHOT_FILE), &ParameterSnapshot::default()).is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
