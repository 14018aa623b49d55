use mega_core::{Error, Result};
use mega_crypto::NodeKeys;

/// Display name used when attribute decryption fails; the node is kept.
pub const UNKNOWN_NAME: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
    Root,
    Inbox,
    Trash,
}

impl NodeKind {
    pub fn from_wire(t: i32) -> Result<Self> {
        Ok(match t {
            0 => NodeKind::File,
            1 => NodeKind::Folder,
            2 => NodeKind::Root,
            3 => NodeKind::Inbox,
            4 => NodeKind::Trash,
            _ => return Err(Error::BadResponse(format!("unknown node type {t}"))),
        })
    }

    pub fn as_wire(self) -> i32 {
        match self {
            NodeKind::File => 0,
            NodeKind::Folder => 1,
            NodeKind::Root => 2,
            NodeKind::Inbox => 3,
            NodeKind::Trash => 4,
        }
    }

    /// The three well-known roots, created once per session.
    pub fn is_special(self) -> bool {
        matches!(self, NodeKind::Root | NodeKind::Inbox | NodeKind::Trash)
    }

    pub fn is_container(self) -> bool {
        self != NodeKind::File
    }
}

/// Snapshot of one node, copied out of the graph under the reader lock.
#[derive(Debug, Clone)]
pub struct Node {
    pub handle: String,
    pub kind: NodeKind,
    pub name: String,
    /// Bytes; zero for anything but files
    pub size: u64,
    /// Server mtime (unix seconds)
    pub timestamp: i64,
    /// Parent handle; `None` only at the three roots (or after orphaning)
    pub parent: Option<String>,
    /// Decrypted key material; `None` when the key could not be recovered
    pub keys: Option<NodeKeys>,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        self.kind.is_container()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_roundtrip() {
        for t in 0..=4 {
            assert_eq!(NodeKind::from_wire(t).unwrap().as_wire(), t);
        }
        assert!(NodeKind::from_wire(9).is_err());
        assert!(NodeKind::from_wire(-1).is_err());
    }

    #[test]
    fn test_special_kinds() {
        assert!(NodeKind::Root.is_special());
        assert!(NodeKind::Trash.is_special());
        assert!(!NodeKind::Folder.is_special());
        assert!(NodeKind::Folder.is_container());
        assert!(!NodeKind::File.is_container());
    }
}
