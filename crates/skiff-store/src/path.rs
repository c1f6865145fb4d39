//! Content-addressed path transform

use sha1::{Digest, Sha1};

/// Width of one directory segment in hex characters.
const SEGMENT_LEN: usize = 5;

/// On-disk location derived from a user key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKey {
    /// Directory chain: the digest split into fixed-width segments
    pub path_name: String,
    /// Full 40-character digest, used as the file name
    pub file_name: String,
}

impl PathKey {
    /// First directory of the chain; the unit [`crate::Store::delete`]
    /// removes.
    pub fn first_segment(&self) -> &str {
        self.path_name.split('/').next().unwrap_or("")
    }

    /// Directory chain plus file name.
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.path_name, self.file_name)
    }
}

/// Hash a key with SHA-1 and split the 40-char hex digest into eight
/// 5-char directory segments. Deterministic, no error path.
pub fn cas_path_transform(key: &str) -> PathKey {
    let digest = hex::encode(Sha1::digest(key.as_bytes()));
    let segments: Vec<&str> = (0..digest.len() / SEGMENT_LEN)
        .map(|i| &digest[i * SEGMENT_LEN..(i + 1) * SEGMENT_LEN])
        .collect();
    PathKey {
        path_name: segments.join("/"),
        file_name: digest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_transform() {
        let path_key = cas_path_transform("mybestpictures");
        assert_eq!(path_key.file_name, "7037c790557f0d861c53d3bbd1fafe02dc3699e6");
        assert_eq!(
            path_key.path_name,
            "7037c/79055/7f0d8/61c53/d3bbd/1fafe/02dc3/699e6"
        );
    }

    #[test]
    fn test_first_segment() {
        let path_key = cas_path_transform("mybestpictures");
        assert_eq!(path_key.first_segment(), "7037c");
    }

    #[test]
    fn test_full_path() {
        let path_key = cas_path_transform("momsspecials");
        assert_eq!(
            path_key.full_path(),
            "ff254/eed1e/1731b/b8327/808fd/47001/35c58/a3e91/ff254eed1e1731bb8327808fd4700135c58a3e91"
        );
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(cas_path_transform("a key"), cas_path_transform("a key"));
        assert_ne!(
            cas_path_transform("a key").file_name,
            cas_path_transform("another key").file_name
        );
    }
}
