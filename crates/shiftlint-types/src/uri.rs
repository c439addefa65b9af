use std::path::{Path, PathBuf};

/// Build an absolute, canonicalized `file://` URI from a filesystem path.
///
/// Symlinks are resolved when the path exists; otherwise the path is made
/// absolute lexically so that URIs stay stable for not-yet-created files.
pub fn file_uri(path: &Path) -> String {
    let absolute = match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(_) => {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        }
    };
    format!("file://{}", absolute.display())
}

/// Canonicalize a URI or bare path string into `file://` form.
pub fn canonical_file_uri(raw: &str) -> String {
    match raw.strip_prefix("file://") {
        Some(path) => file_uri(Path::new(path)),
        None => file_uri(Path::new(raw)),
    }
}

/// Extract the filesystem path from a `file://` URI; bare paths pass through.
pub fn uri_to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_existing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("App.java");
        std::fs::write(&file, "class App {}").unwrap();

        let uri = file_uri(&file);
        assert!(uri.starts_with("file:///"));
        assert_eq!(uri_to_path(&uri), file.canonicalize().unwrap());
    }

    #[test]
    fn canonicalizes_uri_and_bare_path_alike() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pom.xml");
        std::fs::write(&file, "<project/>").unwrap();

        let from_path = canonical_file_uri(file.to_str().unwrap());
        let from_uri = canonical_file_uri(&format!("file://{}", file.display()));
        assert_eq!(from_path, from_uri);
    }
}
