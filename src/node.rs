use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geom::Geometry;
use crate::schema::FieldValue;
use crate::style::StyleConfig;

/// Index of a node in a [`SceneTree`] arena.
pub type NodeId = usize;

/// Node visibility state as shown in the scene tree UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriState {
    On,
    Off,
}

/// Network link refresh behavior. CHANGE is the KML-spec default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshMode {
    Change,
    Expire,
    Interval,
}

/// A parsed placemark-like feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Session-unique identifier: `{session}#{sequence}`. Unique across
    /// repeated network link fetches that reuse source ids.
    pub id: String,
    pub properties: HashMap<String, FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<StyleConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_style: Option<StyleConfig>,
}

/// A ground image overlay reduced to its bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOverlay {
    pub name: String,
    /// Icon reference; a data URI when the image came from an archive.
    pub icon: String,
    /// `[west, south, east, north]`.
    pub extent: [f64; 4],
}

/// A screen-anchored coordinate. The special 0.5 fraction is preserved as a
/// symbolic center rather than resolved to a pixel number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScreenCoord {
    Pixels(f64),
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenXY {
    pub x: ScreenCoord,
    pub y: ScreenCoord,
}

/// A screen overlay (legend-style window) anchored to the viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenOverlay {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub anchor: ScreenXY,
    pub size: ScreenXY,
}

/// A link to a remote sub-document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkLink {
    pub href: String,
    pub refresh_mode: RefreshMode,
    /// Only meaningful for [`RefreshMode::Interval`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_interval_ms: Option<u64>,
}

/// The payload carried by a scene node. Container nodes carry `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodePayload {
    None,
    Feature(Feature),
    ImageOverlay(ImageOverlay),
    ScreenOverlay(ScreenOverlay),
    NetworkLink(NetworkLink),
}

/// One node of the output scene tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmlNode {
    pub label: String,
    pub payload: NodePayload,
    /// Whether the node's children start collapsed in the tree view.
    pub collapsed: bool,
    pub state: TriState,
    /// Transient stale flag, only meaningful during a merge parse.
    #[serde(skip)]
    pub marked: bool,
    #[serde(skip)]
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl KmlNode {
    pub fn new(payload: NodePayload) -> KmlNode {
        KmlNode {
            label: String::new(),
            payload,
            collapsed: true,
            state: TriState::On,
            marked: false,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn container() -> KmlNode {
        KmlNode::new(NodePayload::None)
    }

    pub fn is_container(&self) -> bool {
        matches!(self.payload, NodePayload::None)
    }

    pub fn feature(&self) -> Option<&Feature> {
        match &self.payload {
            NodePayload::Feature(f) => Some(f),
            _ => None,
        }
    }
}

/// Arena-backed scene tree. Frames and callers hold [`NodeId`] indices
/// instead of live references, so re-parsing into an existing tree never
/// creates ownership cycles.
#[derive(Debug, Default)]
pub struct SceneTree {
    slots: Vec<Option<KmlNode>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
}

impl SceneTree {
    pub fn new() -> SceneTree {
        SceneTree::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    pub fn get(&self, id: NodeId) -> Option<&KmlNode> {
        self.slots.get(id).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut KmlNode> {
        self.slots.get_mut(id).and_then(|slot| slot.as_mut())
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn alloc(&mut self, node: KmlNode) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    /// Attach a freshly built node under `parent`.
    ///
    /// If a *marked* (stale) child with the same label exists, the new node
    /// is merged into it instead: the mark is cleared and the payload
    /// updated in place, preserving the child's visibility state, collapse
    /// state and identity for externally attached UI state. Fresh nodes
    /// added earlier in the same parse are never merge targets.
    pub fn add_child(&mut self, parent: NodeId, node: KmlNode) -> NodeId {
        let existing = self.get(parent).and_then(|p| {
            p.children
                .iter()
                .copied()
                .find(|&c| {
                    self.get(c)
                        .is_some_and(|child| child.marked && child.label == node.label)
                })
        });

        if let Some(id) = existing {
            if let Some(child) = self.get_mut(id) {
                child.marked = false;
                child.payload = node.payload;
            }
            return id;
        }

        let id = self.alloc(node);
        if let Some(n) = self.get_mut(id) {
            n.parent = Some(parent);
        }
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
        }
        id
    }

    /// Flag every direct child of `node` as stale before a merge descent.
    pub fn mark_children(&mut self, node: NodeId) {
        let children = match self.get(node) {
            Some(n) => n.children.clone(),
            None => return,
        };
        for child in children {
            if let Some(c) = self.get_mut(child) {
                c.marked = true;
            }
        }
    }

    /// Remove any child of `node` still flagged stale, releasing its
    /// subtree.
    pub fn sweep_children(&mut self, node: NodeId) {
        let stale: Vec<NodeId> = match self.get(node) {
            Some(n) => n
                .children
                .iter()
                .copied()
                .filter(|&c| self.get(c).is_some_and(|child| child.marked))
                .collect(),
            None => return,
        };
        if stale.is_empty() {
            return;
        }
        if let Some(n) = self.get_mut(node) {
            n.children.retain(|c| !stale.contains(c));
        }
        for id in stale {
            self.free_subtree(id);
        }
    }

    /// Release a node and its entire subtree back to the arena.
    pub fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.slots.get_mut(cur).and_then(|slot| slot.take()) {
                stack.extend(node.children);
                self.free.push(cur);
            }
        }
        if self.root == Some(id) {
            self.root = None;
        }
    }

    /// Depth-first ids of the subtree rooted at `id`, including `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.get(cur) {
                out.push(cur);
                for &c in node.children.iter().rev() {
                    stack.push(c);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled(label: &str) -> KmlNode {
        let mut node = KmlNode::container();
        node.label = label.to_string();
        node
    }

    #[test]
    fn test_add_child_appends_without_marks() {
        let mut tree = SceneTree::new();
        let root = tree.alloc(labeled("root"));
        tree.set_root(root);
        let a = tree.add_child(root, labeled("a"));
        // Same label, not marked: duplicates within one parse coexist.
        let a2 = tree.add_child(root, labeled("a"));
        assert_ne!(a, a2);
        assert_eq!(tree.get(root).unwrap().children.len(), 2);
    }

    #[test]
    fn test_merge_matches_marked_child_and_preserves_state() {
        let mut tree = SceneTree::new();
        let root = tree.alloc(labeled("root"));
        tree.set_root(root);
        let a = tree.add_child(root, labeled("a"));
        tree.get_mut(a).unwrap().state = TriState::Off;
        tree.get_mut(a).unwrap().collapsed = false;

        tree.mark_children(root);
        let merged = tree.add_child(root, labeled("a"));
        assert_eq!(merged, a);
        let node = tree.get(a).unwrap();
        assert!(!node.marked);
        assert_eq!(node.state, TriState::Off);
        assert!(!node.collapsed);
    }

    #[test]
    fn test_sweep_removes_stale_subtrees() {
        let mut tree = SceneTree::new();
        let root = tree.alloc(labeled("root"));
        tree.set_root(root);
        let keep = tree.add_child(root, labeled("keep"));
        let drop = tree.add_child(root, labeled("drop"));
        tree.add_child(drop, labeled("grandchild"));

        tree.mark_children(root);
        tree.get_mut(keep).unwrap().marked = false;
        tree.sweep_children(root);

        assert_eq!(tree.get(root).unwrap().children, vec![keep]);
        assert!(tree.get(drop).is_none());
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_free_subtree_reuses_slots() {
        let mut tree = SceneTree::new();
        let root = tree.alloc(labeled("root"));
        let child = tree.add_child(root, labeled("child"));
        tree.free_subtree(child);
        let replacement = tree.alloc(labeled("replacement"));
        assert_eq!(replacement, child);
    }
}
