//! I/O 支持: 网与会话快照的 JSON/RON 序列化, 按扩展名分派.
use std::fs;
use std::path::Path;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::net::core::Net;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ron serialize error: {0}")]
    Ron(#[from] ron::Error),
    #[error("ron parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot infer format from path {0:?} (expected .json or .ron)")]
    UnknownFormat(std::path::PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Ron,
}

fn format_of(path: &Path) -> Result<Format, IoError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("ron") => Ok(Format::Ron),
        _ => Err(IoError::UnknownFormat(path.to_path_buf())),
    }
}

pub fn save<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<(), IoError> {
    let path = path.as_ref();
    let content = match format_of(path)? {
        Format::Json => serde_json::to_string_pretty(value)?,
        Format::Ron => ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())?,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn load<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<T, IoError> {
    let path = path.as_ref();
    let format = format_of(path)?;
    let content = fs::read_to_string(path)?;
    match format {
        Format::Json => Ok(serde_json::from_str(&content)?),
        Format::Ron => Ok(ron::from_str(&content)?),
    }
}

pub fn save_net<P: AsRef<Path>>(path: P, net: &Net) -> Result<(), IoError> {
    save(path, net)
}

pub fn load_net<P: AsRef<Path>>(path: P) -> Result<Net, IoError> {
    load(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::core::NodeRef;
    use crate::net::structure::{ArcKind, Place, RateLaw, Transition};

    fn sample_net() -> Net {
        let mut net = Net::empty();
        let p = net.add_place(Place::with_capacity("s", 3.0, 10.0)).unwrap();
        let t = net
            .add_transition(Transition::stochastic("decay", RateLaw::MassAction(0.5)))
            .unwrap();
        net.add_arc(NodeRef::Place(p), NodeRef::Transition(t), ArcKind::Normal, 1.0)
            .unwrap();
        net
    }

    #[test]
    fn json_save_and_load_preserve_structure() {
        let dir = std::env::temp_dir().join("hpn_io_test");
        let path = dir.join("net.json");
        let net = sample_net();
        save_net(&path, &net).unwrap();
        let loaded = load_net(&path).unwrap();
        assert_eq!(loaded.places_len(), 1);
        assert_eq!(loaded.transitions_len(), 1);
        assert_eq!(loaded.arcs().count(), 1);
        assert_eq!(loaded.initial_marking(), net.initial_marking());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_net("net.xml").unwrap_err();
        assert!(matches!(err, IoError::UnknownFormat(_)));
    }
}
