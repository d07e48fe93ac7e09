//! Path helpers and compound operations built from single store calls.

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::trace;

use super::CoordinationStore;
use super::CreateMode;
use super::Stat;
use super::StoreResult;
use super::Watcher;
use crate::constants::PATH_SEPARATOR;
use crate::constants::SEQUENTIAL_SUFFIX_WIDTH;
use crate::StoreError;

pub fn join_path(
    parent: &str,
    name: &str,
) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}{PATH_SEPARATOR}{name}")
    }
}

/// Parent of an absolute path. `None` for the root.
pub fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind(PATH_SEPARATOR) {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Last path segment.
pub fn node_name(path: &str) -> &str {
    path.rsplit(PATH_SEPARATOR).next().unwrap_or(path)
}

pub fn validate_path(path: &str) -> StoreResult<()> {
    if path == "/" {
        return Ok(());
    }
    let valid = path.starts_with(PATH_SEPARATOR)
        && path[1..]
            .split(PATH_SEPARATOR)
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

/// Sequence number of a node created in a sequential mode.
pub fn sequence_of(name: &str) -> Option<u64> {
    let start = name.len().checked_sub(SEQUENTIAL_SUFFIX_WIDTH)?;
    let suffix = name.get(start..)?;
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Creates `path` and any missing ancestors as empty persistent nodes.
pub async fn ensure_path(
    store: &dyn CoordinationStore,
    path: &str,
) -> StoreResult<()> {
    validate_path(path)?;
    let mut current = String::new();
    for segment in path.split(PATH_SEPARATOR).filter(|s| !s.is_empty()) {
        current.push(PATH_SEPARATOR);
        current.push_str(segment);
        match store.create(&current, Vec::new(), CreateMode::Persistent).await {
            Ok(_) | Err(StoreError::NodeExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Creates a node unless it already exists. Returns whether this call created it.
pub async fn create_if_absent(
    store: &dyn CoordinationStore,
    path: &str,
    data: Vec<u8>,
    mode: CreateMode,
) -> StoreResult<bool> {
    match store.create(path, data, mode).await {
        Ok(_) => Ok(true),
        Err(StoreError::NodeExists(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Deletes `path` and everything beneath it, depth first.
///
/// Nodes that vanish concurrently are ignored. A child created concurrently is removed
/// on the next pass.
pub fn delete_recursive<'a>(
    store: &'a dyn CoordinationStore,
    path: &'a str,
) -> BoxFuture<'a, StoreResult<()>> {
    async move {
        loop {
            let children = match store.get_children(path, None).await {
                Ok(children) => children,
                Err(StoreError::NoNode(_)) => return Ok(()),
                Err(e) => return Err(e),
            };
            for child in children {
                let child_path = join_path(path, &child);
                delete_recursive(store, &child_path).await?;
            }
            match store.delete(path, None).await {
                Ok(()) | Err(StoreError::NoNode(_)) => {
                    trace!(%path, "deleted recursively");
                    return Ok(());
                }
                Err(StoreError::NotEmpty(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }
    .boxed()
}

/// Deletes a leaf node. Returns whether it existed.
pub async fn delete_if_exists(
    store: &dyn CoordinationStore,
    path: &str,
) -> StoreResult<bool> {
    match store.delete(path, None).await {
        Ok(()) => Ok(true),
        Err(StoreError::NoNode(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn read_if_exists(
    store: &dyn CoordinationStore,
    path: &str,
    watcher: Option<Watcher>,
) -> StoreResult<Option<(Vec<u8>, Stat)>> {
    match store.get_data(path, watcher).await {
        Ok(found) => Ok(Some(found)),
        Err(StoreError::NoNode(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Children of `path`, or an empty list when it does not exist.
pub async fn children_or_empty(
    store: &dyn CoordinationStore,
    path: &str,
) -> StoreResult<Vec<String>> {
    match store.get_children(path, None).await {
        Ok(children) => Ok(children),
        Err(StoreError::NoNode(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
