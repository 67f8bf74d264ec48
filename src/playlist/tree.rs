//! Arena-backed playlist tree.
//!
//! Nodes live in a slot arena indexed by generation-checked [`NodeId`]
//! handles: children are ordered owning id lists, the parent link is a plain
//! non-owning id. Media items are shared `Arc`s so an item stays alive while
//! either a tree node or a playback-order entry still references it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use uuid::Uuid;

/// One playable media entry.
#[derive(Debug)]
pub struct MediaItem {
    /// Stable item id.
    pub id: String,
    /// Item location as imported.
    pub uri: String,
    /// User-visible title.
    pub title: String,
    /// Art location, if any is known. `attachment://` URLs mean the art is
    /// embedded in the media itself.
    pub art_url: Option<String>,
    /// Playback duration, when known at import time.
    pub duration_ms: Option<u64>,
    play_count: AtomicU32,
}

impl MediaItem {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            uri: uri.into(),
            title: title.into(),
            art_url: None,
            duration_ms: None,
            play_count: AtomicU32::new(0),
        }
    }

    pub fn with_art_url(mut self, art_url: impl Into<String>) -> Self {
        self.art_url = Some(art_url.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Records one playback start and returns the updated count.
    pub fn record_played(&self) -> u32 {
        self.play_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn play_count(&self) -> u32 {
        self.play_count.load(Ordering::Relaxed)
    }

    /// Whether the item already carries art embedded in the media.
    pub fn has_embedded_art(&self) -> bool {
        self.art_url
            .as_deref()
            .is_some_and(|url| url.starts_with("attachment://"))
    }

    /// Whether any art location is known at all.
    pub fn has_art(&self) -> bool {
        self.art_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    /// Scheduler-internal URIs (directory expansions) never get art fetched.
    pub fn is_internal_uri(&self) -> bool {
        self.uri.starts_with("directory:")
    }
}

/// Stable, generation-checked handle to one tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
enum NodeKind {
    Container { children: Vec<NodeId> },
    Leaf { item: Arc<MediaItem> },
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    skip: bool,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Source of truth for playback order: a tree of containers and item leaves.
#[derive(Debug)]
pub struct PlaylistTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
}

impl PlaylistTree {
    /// Creates a tree holding only the root container.
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
        };
        let root = tree.insert(Node {
            kind: NodeKind::Container {
                children: Vec::new(),
            },
            parent: None,
            skip: false,
        });
        tree.root = root;
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn insert(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    /// Whether the handle still names a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn is_container(&self, id: NodeId) -> bool {
        matches!(
            self.node(id),
            Some(Node {
                kind: NodeKind::Container { .. },
                ..
            })
        )
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        matches!(
            self.node(id),
            Some(Node {
                kind: NodeKind::Leaf { .. },
                ..
            })
        )
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> Option<&[NodeId]> {
        match &self.node(id)?.kind {
            NodeKind::Container { children } => Some(children),
            NodeKind::Leaf { .. } => None,
        }
    }

    pub fn item(&self, id: NodeId) -> Option<&Arc<MediaItem>> {
        match &self.node(id)?.kind {
            NodeKind::Leaf { item } => Some(item),
            NodeKind::Container { .. } => None,
        }
    }

    /// Appends a new container under `parent`.
    pub fn add_container(&mut self, parent: NodeId) -> Option<NodeId> {
        if !self.is_container(parent) {
            return None;
        }
        let id = self.insert(Node {
            kind: NodeKind::Container {
                children: Vec::new(),
            },
            parent: Some(parent),
            skip: false,
        });
        match &mut self.node_mut(parent)?.kind {
            NodeKind::Container { children } => children.push(id),
            NodeKind::Leaf { .. } => unreachable!(),
        }
        Some(id)
    }

    /// Appends a new leaf holding `item` under `parent`.
    pub fn add_leaf(&mut self, parent: NodeId, item: Arc<MediaItem>) -> Option<NodeId> {
        if !self.is_container(parent) {
            return None;
        }
        let id = self.insert(Node {
            kind: NodeKind::Leaf { item },
            parent: Some(parent),
            skip: false,
        });
        match &mut self.node_mut(parent)?.kind {
            NodeKind::Container { children } => children.push(id),
            NodeKind::Leaf { .. } => unreachable!(),
        }
        Some(id)
    }

    /// Removes a node and its whole subtree. The root cannot be removed.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == self.root || !self.contains(id) {
            return false;
        }
        if let Some(parent) = self.parent(id) {
            if let Some(Node {
                kind: NodeKind::Container { children },
                ..
            }) = self.node_mut(parent)
            {
                children.retain(|child| *child != id);
            }
        }
        self.free_subtree(id);
        true
    }

    fn free_subtree(&mut self, id: NodeId) {
        let children = match self.node(id) {
            Some(Node {
                kind: NodeKind::Container { children },
                ..
            }) => children.clone(),
            Some(Node {
                kind: NodeKind::Leaf { .. },
                ..
            }) => Vec::new(),
            None => return,
        };
        for child in children {
            self.free_subtree(child);
        }
        let slot = &mut self.slots[id.index as usize];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    /// Moves a node under `new_parent` at `position` (clamped to the child
    /// count). Rejects root moves and moves into the node's own subtree.
    pub fn move_node(&mut self, id: NodeId, new_parent: NodeId, position: usize) -> bool {
        if id == self.root
            || !self.contains(id)
            || !self.is_container(new_parent)
            || self.is_descendant_of(new_parent, id)
        {
            return false;
        }
        if let Some(old_parent) = self.parent(id) {
            if let Some(Node {
                kind: NodeKind::Container { children },
                ..
            }) = self.node_mut(old_parent)
            {
                children.retain(|child| *child != id);
            }
        }
        if let Some(Node {
            kind: NodeKind::Container { children },
            ..
        }) = self.node_mut(new_parent)
        {
            let position = position.min(children.len());
            children.insert(position, id);
        }
        if let Some(node) = self.node_mut(id) {
            node.parent = Some(new_parent);
        }
        true
    }

    pub fn set_skip(&mut self, id: NodeId, skip: bool) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.skip = skip;
                true
            }
            None => false,
        }
    }

    /// Whether the node's own skip-flag is set.
    pub fn is_skipped(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|node| node.skip)
    }

    /// Whether the node or any of its ancestors carries the skip-flag,
    /// blocking automatic advance past it.
    pub fn is_blocked(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.node(current) {
                Some(node) => {
                    if node.skip {
                        return true;
                    }
                    cursor = node.parent;
                }
                None => return false,
            }
        }
        false
    }

    /// Whether `id` lives inside the subtree rooted at `root` (inclusive).
    pub fn is_descendant_of(&self, id: NodeId, root: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == root {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// First leaf under `id` in stable depth-first order.
    pub fn first_leaf_under(&self, id: NodeId) -> Option<NodeId> {
        match &self.node(id)?.kind {
            NodeKind::Leaf { .. } => Some(id),
            NodeKind::Container { children } => children
                .iter()
                .find_map(|child| self.first_leaf_under(*child)),
        }
    }

    /// All leaves under `root` in stable depth-first order, preserving
    /// container child order.
    pub fn leaves_under(&self, root: NodeId) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        self.collect_leaves(root, &mut leaves);
        leaves
    }

    fn collect_leaves(&self, id: NodeId, leaves: &mut Vec<NodeId>) {
        match self.node(id).map(|node| &node.kind) {
            Some(NodeKind::Leaf { .. }) => leaves.push(id),
            Some(NodeKind::Container { children }) => {
                for child in children.clone() {
                    self.collect_leaves(child, leaves);
                }
            }
            None => {}
        }
    }
}

impl Default for PlaylistTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tree: &mut PlaylistTree, parent: NodeId, name: &str) -> NodeId {
        tree.add_leaf(parent, Arc::new(MediaItem::new(format!("file:{name}"), name)))
            .expect("failed to add leaf")
    }

    #[test]
    fn test_leaves_follow_depth_first_container_order() {
        let mut tree = PlaylistTree::new();
        let root = tree.root();
        let a = leaf(&mut tree, root, "a");
        let folder = tree.add_container(root).unwrap();
        let b = leaf(&mut tree, folder, "b");
        let inner = tree.add_container(folder).unwrap();
        let c = leaf(&mut tree, inner, "c");
        let d = leaf(&mut tree, root, "d");

        assert_eq!(tree.leaves_under(root), vec![a, b, c, d]);
        assert_eq!(tree.first_leaf_under(folder), Some(b));
        assert_eq!(tree.first_leaf_under(root), Some(a));
    }

    #[test]
    fn test_remove_invalidates_subtree_handles() {
        let mut tree = PlaylistTree::new();
        let root = tree.root();
        let folder = tree.add_container(root).unwrap();
        let a = leaf(&mut tree, folder, "a");
        let b = leaf(&mut tree, root, "b");

        assert!(tree.remove(folder));
        assert!(!tree.contains(folder));
        assert!(!tree.contains(a));
        assert!(tree.contains(b));
        assert_eq!(tree.leaves_under(root), vec![b]);

        // A recycled slot must not resurrect the stale handle.
        let c = leaf(&mut tree, root, "c");
        assert!(tree.contains(c));
        assert!(!tree.contains(a));
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let mut tree = PlaylistTree::new();
        let root = tree.root();
        assert!(!tree.remove(root));
        assert!(tree.contains(root));
    }

    #[test]
    fn test_move_node_reorders_and_reparents() {
        let mut tree = PlaylistTree::new();
        let root = tree.root();
        let a = leaf(&mut tree, root, "a");
        let b = leaf(&mut tree, root, "b");
        let folder = tree.add_container(root).unwrap();

        assert!(tree.move_node(a, folder, 0));
        assert_eq!(tree.parent(a), Some(folder));
        assert_eq!(tree.leaves_under(root), vec![b, a]);

        assert!(tree.move_node(b, folder, 5));
        assert_eq!(tree.children(folder).unwrap(), &[a, b]);
    }

    #[test]
    fn test_move_into_own_subtree_is_rejected() {
        let mut tree = PlaylistTree::new();
        let root = tree.root();
        let outer = tree.add_container(root).unwrap();
        let inner = tree.add_container(outer).unwrap();
        assert!(!tree.move_node(outer, inner, 0));
        assert_eq!(tree.parent(outer), Some(root));
    }

    #[test]
    fn test_skip_flag_blocks_descendants() {
        let mut tree = PlaylistTree::new();
        let root = tree.root();
        let folder = tree.add_container(root).unwrap();
        let a = leaf(&mut tree, folder, "a");
        let b = leaf(&mut tree, root, "b");

        assert!(tree.set_skip(folder, true));
        assert!(tree.is_blocked(a));
        assert!(!tree.is_skipped(a));
        assert!(!tree.is_blocked(b));
    }

    #[test]
    fn test_item_sharing_and_play_count() {
        let item = Arc::new(MediaItem::new("file:a", "a"));
        let mut tree = PlaylistTree::new();
        let root = tree.root();
        let node = tree.add_leaf(root, Arc::clone(&item)).unwrap();

        assert_eq!(tree.item(node).unwrap().play_count(), 0);
        assert_eq!(item.record_played(), 1);
        assert_eq!(tree.item(node).unwrap().play_count(), 1);

        // The outside Arc keeps the item alive after the node is gone.
        assert!(tree.remove(node));
        assert_eq!(item.play_count(), 1);
    }

    #[test]
    fn test_art_classification() {
        let embedded = MediaItem::new("file:a", "a").with_art_url("attachment://cover");
        assert!(embedded.has_art());
        assert!(embedded.has_embedded_art());

        let remote = MediaItem::new("file:b", "b").with_art_url("https://example.com/c.jpg");
        assert!(remote.has_art());
        assert!(!remote.has_embedded_art());

        let none = MediaItem::new("file:c", "c");
        assert!(!none.has_art());

        let internal = MediaItem::new("directory:/music", "music");
        assert!(internal.is_internal_uri());
    }
}
