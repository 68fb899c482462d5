use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{AsRefStr, Display, EnumString};

/// Media kind of a stored artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    Image,
    Video,
}

/// A stored media artifact owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaArtifact {
    pub id: String,
    pub owner_id: String,
    pub kind: MediaKind,
    /// Raw locator, either a path relative to the media root or an http(s) URL.
    pub locator: String,
    pub title: Option<String>,
}

impl MediaArtifact {
    pub fn locator(&self) -> Locator {
        Locator::parse(&self.locator)
    }

    /// File name to present to a worker that receives the bytes.
    pub fn file_name(&self, fallback: &str) -> String {
        self.locator
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

/// Where the bytes of an artifact live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Path(PathBuf),
    Url(String),
}

impl Locator {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Locator::Url(raw.to_string())
        } else {
            Locator::Path(PathBuf::from(raw))
        }
    }

    /// Absolute location of a path locator under `media_root`. Leading
    /// slashes are treated as relative to the root, not the filesystem.
    pub fn resolve_path(&self, media_root: &Path) -> Option<PathBuf> {
        match self {
            Locator::Path(path) => {
                let relative = path.strip_prefix("/").unwrap_or(path);
                Some(media_root.join(relative))
            }
            Locator::Url(_) => None,
        }
    }
}
