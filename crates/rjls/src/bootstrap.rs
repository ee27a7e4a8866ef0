use crate::store::RejectList;
use std::io::ErrorKind;
use std::path::Path;
use tracing::info;

/// Load the bootstrap reject list at `path` into `store`.
///
/// One hostname per line; blank lines and `#` comments are skipped. A
/// missing file is not an error. Returns the number of hosts newly added.
///
/// # Errors
///
/// Returns any I/O error other than `NotFound` from reading the file.
pub async fn load_rejects(path: &Path, store: &RejectList) -> std::io::Result<usize> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no bootstrap reject list, starting empty");
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    let added = data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|host| store.add(host))
        .count();

    info!(path = %path.display(), added, "loaded bootstrap reject list");
    Ok(added)
}
