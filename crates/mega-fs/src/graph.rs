//! The node graph and its mutation primitives.
//!
//! Writers are the event pump, login's initial tree load, and RPC
//! completion handlers; readers are the transfer engine and the command
//! surface. All reads return snapshots.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use mega_api::messages::WireNode;
use mega_codec::{b64url_decode, bytes_to_words};
use mega_core::{Error, Result};
use mega_crypto::{
    block, decrypt_attr, file_keys_from_composite, folder_keys_from_composite, MasterKey,
    NodeKeys,
};

use crate::node::{Node, NodeKind, UNKNOWN_NAME};

#[derive(Debug)]
struct Slot {
    kind: NodeKind,
    name: String,
    size: u64,
    timestamp: i64,
    parent: Option<String>,
    children: Vec<String>,
    keys: Option<NodeKeys>,
}

impl Slot {
    fn placeholder(kind: NodeKind) -> Self {
        Self {
            kind,
            name: String::new(),
            size: 0,
            timestamp: 0,
            parent: None,
            children: Vec::new(),
            keys: None,
        }
    }
}

#[derive(Default)]
struct GraphInner {
    nodes: HashMap<String, Slot>,
    root: Option<String>,
    inbox: Option<String>,
    trash: Option<String>,
    /// sharer handle → AES key for nodes shared into this account
    share_keys: HashMap<String, [u8; 16]>,
}

/// The session's filesystem graph. Cheap to share; all methods take `&self`.
#[derive(Default)]
pub struct NodeGraph {
    inner: RwLock<GraphInner>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a node from its wire form, decrypting its key
    /// material and display name. Idempotent; reattaches on parent change.
    pub fn add_or_update(&self, wire: &WireNode, master: &MasterKey) -> Result<Node> {
        let kind = NodeKind::from_wire(wire.t)?;
        let mut inner = self.inner.write().expect("graph lock poisoned");

        let keys = if matches!(kind, NodeKind::File | NodeKind::Folder) {
            let keys = inner.decrypt_node_key(wire, master, kind);
            if keys.is_none() {
                debug!(handle = %wire.h, "node key unavailable");
            }
            keys
        } else {
            None
        };

        let name = match kind {
            NodeKind::Root => "Cloud Drive".to_string(),
            NodeKind::Inbox => "InBox".to_string(),
            NodeKind::Trash => "Trash".to_string(),
            _ => keys
                .as_ref()
                .and_then(|k| decrypt_attr(&k.content_key, &wire.a).ok())
                .map(|attr| attr.name)
                .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
        };

        let new_parent = if wire.p.is_empty() {
            None
        } else {
            Some(wire.p.clone())
        };
        let old_parent = inner.nodes.get(&wire.h).and_then(|s| s.parent.clone());

        {
            let slot = inner
                .nodes
                .entry(wire.h.clone())
                .or_insert_with(|| Slot::placeholder(kind));
            slot.kind = kind;
            slot.name = name;
            slot.size = if kind == NodeKind::File {
                wire.s.max(0) as u64
            } else {
                0
            };
            slot.timestamp = wire.ts;
            if keys.is_some() {
                slot.keys = keys;
            }
        }

        if old_parent != new_parent {
            if let Some(p) = &old_parent {
                inner.detach_child(p, &wire.h);
            }
        }
        if let Some(p) = new_parent.clone() {
            // a child can arrive before its parent; hold its place
            inner
                .nodes
                .entry(p.clone())
                .or_insert_with(|| Slot::placeholder(NodeKind::Folder));
            let parent_slot = inner.nodes.get_mut(&p).expect("parent slot exists");
            if !parent_slot.children.iter().any(|h| h == &wire.h) {
                parent_slot.children.push(wire.h.clone());
            }
        }
        if let Some(slot) = inner.nodes.get_mut(&wire.h) {
            slot.parent = new_parent;
        }

        match kind {
            NodeKind::Root => inner.root = Some(wire.h.clone()),
            NodeKind::Inbox => inner.inbox = Some(wire.h.clone()),
            NodeKind::Trash => inner.trash = Some(wire.h.clone()),
            _ => {}
        }

        Ok(inner.snapshot(&wire.h).expect("just inserted"))
    }

    /// Record a share key from the tree response's `ok` array.
    pub fn register_share_key(
        &self,
        handle: &str,
        sealed: &str,
        master: &MasterKey,
    ) -> Result<()> {
        let mut blob = b64url_decode(sealed)?;
        block::decrypt_in_place(&master.cipher(), &mut blob)?;
        if blob.len() < 16 {
            return Err(Error::Decrypt);
        }
        let mut key = [0u8; 16];
        key.copy_from_slice(&blob[..16]);
        let mut inner = self.inner.write().expect("graph lock poisoned");
        inner.share_keys.insert(handle.to_string(), key);
        Ok(())
    }

    /// Re-decrypt a node's attribute blob and update its display name.
    pub fn update_attr(&self, handle: &str, attr: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("graph lock poisoned");
        let slot = inner.nodes.get_mut(handle).ok_or(Error::NotFound)?;
        slot.name = slot
            .keys
            .as_ref()
            .and_then(|k| decrypt_attr(&k.content_key, attr).ok())
            .map(|a| a.name)
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());
        Ok(())
    }

    pub fn get_by_handle(&self, handle: &str) -> Option<Node> {
        self.inner
            .read()
            .expect("graph lock poisoned")
            .snapshot(handle)
    }

    /// Snapshot of a node's children, in arrival order.
    pub fn children(&self, handle: &str) -> Result<Vec<Node>> {
        let inner = self.inner.read().expect("graph lock poisoned");
        let slot = inner.nodes.get(handle).ok_or(Error::NotFound)?;
        Ok(slot
            .children
            .iter()
            .filter_map(|h| inner.snapshot(h))
            .collect())
    }

    /// Walk `segments` from `start`, matching child names in arrival order
    /// (first match wins on duplicates). All segments must resolve.
    pub fn path_lookup(&self, start: &str, segments: &[&str]) -> Result<Vec<Node>> {
        let inner = self.inner.read().expect("graph lock poisoned");
        inner.nodes.get(start).ok_or(Error::NotFound)?;

        let mut resolved = Vec::with_capacity(segments.len());
        let mut cursor = start.to_string();
        for segment in segments {
            let slot = inner.nodes.get(&cursor).ok_or(Error::NotFound)?;
            let next = slot
                .children
                .iter()
                .find(|h| {
                    inner
                        .nodes
                        .get(h.as_str())
                        .map(|c| c.name == *segment)
                        .unwrap_or(false)
                })
                .cloned()
                .ok_or(Error::NotFound)?;
            resolved.push(inner.snapshot(&next).expect("child slot exists"));
            cursor = next;
        }
        Ok(resolved)
    }

    /// Detach a node and drop it from the index. Its children are left
    /// orphaned; cascading is the caller's business.
    pub fn remove(&self, handle: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("graph lock poisoned");
        let slot = inner.nodes.get(handle).ok_or(Error::NotFound)?;
        if slot.kind.is_special() {
            return Err(Error::BadArgs);
        }
        let parent = slot.parent.clone();
        if let Some(p) = parent {
            inner.detach_child(&p, handle);
        }
        inner.nodes.remove(handle);
        Ok(())
    }

    /// Reparent a node, updating both children lists.
    pub fn move_node(&self, handle: &str, new_parent: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("graph lock poisoned");
        let slot = inner.nodes.get(handle).ok_or(Error::NotFound)?;
        if slot.kind.is_special() {
            return Err(Error::BadArgs);
        }
        let old_parent = slot.parent.clone();
        if !inner.nodes.contains_key(new_parent) {
            return Err(Error::NotFound);
        }

        // refuse a reparent that would close a cycle
        let mut cursor = Some(new_parent.to_string());
        while let Some(h) = cursor {
            if h == handle {
                return Err(Error::BadArgs);
            }
            cursor = inner.nodes.get(&h).and_then(|s| s.parent.clone());
        }

        if let Some(p) = &old_parent {
            inner.detach_child(p, handle);
        }
        let parent_slot = inner.nodes.get_mut(new_parent).expect("checked above");
        if !parent_slot.children.iter().any(|h| h == handle) {
            parent_slot.children.push(handle.to_string());
        }
        if let Some(slot) = inner.nodes.get_mut(handle) {
            slot.parent = Some(new_parent.to_string());
        }
        Ok(())
    }

    pub fn root(&self) -> Result<Node> {
        self.special(|i| i.root.clone())
    }

    pub fn inbox(&self) -> Result<Node> {
        self.special(|i| i.inbox.clone())
    }

    pub fn trash(&self) -> Result<Node> {
        self.special(|i| i.trash.clone())
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().expect("graph lock poisoned").nodes.len()
    }

    fn special(&self, pick: impl Fn(&GraphInner) -> Option<String>) -> Result<Node> {
        let inner = self.inner.read().expect("graph lock poisoned");
        let handle = pick(&inner).ok_or(Error::NotFound)?;
        inner.snapshot(&handle).ok_or(Error::NotFound)
    }
}

impl GraphInner {
    fn snapshot(&self, handle: &str) -> Option<Node> {
        let slot = self.nodes.get(handle)?;
        Some(Node {
            handle: handle.to_string(),
            kind: slot.kind,
            name: slot.name.clone(),
            size: slot.size,
            timestamp: slot.timestamp,
            parent: slot.parent.clone(),
            keys: slot.keys.clone(),
        })
    }

    fn detach_child(&mut self, parent: &str, child: &str) {
        if let Some(slot) = self.nodes.get_mut(parent) {
            slot.children.retain(|h| h != child);
        }
    }

    /// Unseal a node's composite key. Three cases: the account's own node,
    /// the root of a share (carries its own sealed share key), and a node
    /// below a share root (sealed under the recorded share key).
    fn decrypt_node_key(
        &mut self,
        wire: &WireNode,
        master: &MasterKey,
        kind: NodeKind,
    ) -> Option<NodeKeys> {
        let (owner, sealed) = wire.k.split_once(':')?;
        let mut blob = b64url_decode(sealed).ok()?;

        if !owner.is_empty() && owner == wire.u {
            block::decrypt_in_place(&master.cipher(), &mut blob).ok()?;
        } else if !wire.su.is_empty() && !wire.sk.is_empty() {
            let mut sk = b64url_decode(&wire.sk).ok()?;
            block::decrypt_in_place(&master.cipher(), &mut sk).ok()?;
            if sk.len() < 16 {
                return None;
            }
            let mut share = [0u8; 16];
            share.copy_from_slice(&sk[..16]);
            self.share_keys.insert(wire.h.clone(), share);
            block::decrypt_in_place(&block::cipher_for(&share), &mut blob).ok()?;
        } else {
            let share = self.share_keys.get(owner)?;
            block::decrypt_in_place(&block::cipher_for(share), &mut blob).ok()?;
        }

        let words = bytes_to_words(&blob);
        match kind {
            NodeKind::File => file_keys_from_composite(&words).ok(),
            _ => folder_keys_from_composite(&words).ok(),
        }
    }
}
