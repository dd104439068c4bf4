//! Path-based traversal of the directory tree.
//!
//! POSIX-ish semantics, pinned down once: a leading `/` is accepted and
//! stripped, `.` and empty components are skipped, `..` is rejected, and
//! components match entry names literally (byte equality, no globbing).
//! Symlinks are never followed; follow policies belong to the caller.

use crate::node::Node;
use crate::Archive;
use sqfs_error::{Result, SqfsError};

impl Archive {
    /// Resolve `path` to a node. `""`, `"."`, and `"/"` name the root.
    pub fn open_path(&self, path: &str) -> Result<Node> {
        let relative = path.strip_prefix('/').unwrap_or(path);
        let mut node = self.root()?;

        for component in relative.split('/') {
            match component {
                "" | "." => continue,
                ".." => {
                    return Err(SqfsError::PathInvalid {
                        path: path.to_owned(),
                    })
                }
                name => {
                    if !node.is_dir() {
                        return Err(SqfsError::NotADirectory);
                    }
                    let entry = node
                        .read_dir()?
                        .into_iter()
                        .find(|entry| entry.name() == name.as_bytes())
                        .ok_or_else(|| SqfsError::PathNotFound {
                            path: path.to_owned(),
                        })?;
                    node = entry.open()?;
                }
            }
        }
        Ok(node)
    }

    /// Read a regular file's full contents by path.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let node = self.open_path(path)?;
        let mut reader = node.open_reader()?;
        let mut out = Vec::new();
        reader.write_to(&mut out)?;
        Ok(out)
    }
}
