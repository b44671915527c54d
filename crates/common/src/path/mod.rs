pub mod normalize;

pub use normalize::{normalize_bucket, normalize_path, PathError};

/// Last segment of a normalized path, e.g. `a.json` for `docs/a.json`.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
