//! An in-memory output tree with HTML serialization.

use indexmap::IndexMap;

use crate::{
    bounds::Bounds,
    tree::{Cursor, NodeId, TreeOperations},
};

/// Elements that never have content or a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "command", "embed", "hr", "img", "input", "keygen", "link", "meta", "param", "source",
    "track", "wbr",
];

#[must_use]
pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Container without markup of its own; the document root is one.
    Fragment,
    Element {
        tag: String,
        attributes: IndexMap<String, String>,
    },
    Text(String),
    Comment(String),
    /// Trusted markup inserted verbatim.
    Raw(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed document that records how many mutations it received.
#[derive(Debug, Clone)]
pub struct SimpleDocument {
    nodes: Vec<NodeData>,
    mutations: u64,
}

impl Default for SimpleDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleDocument {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                kind: NodeKind::Fragment,
                parent: None,
                children: Vec::new(),
            }],
            mutations: 0,
        }
    }

    /// The root fragment.
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Creates a detached fragment, useful as an independent render target.
    pub fn create_fragment(&mut self) -> NodeId {
        self.push(NodeKind::Fragment)
    }

    /// Count of attached-tree changes: inserts, removals and attribute writes.
    #[must_use]
    pub fn mutations(&self) -> u64 {
        self.mutations
    }

    #[must_use]
    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node.0 as usize).map(|data| &data.kind)
    }

    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes.get(node.0 as usize).map_or(&[], |data| &data.children)
    }

    #[must_use]
    pub fn attribute(&self, element: NodeId, name: &str) -> Option<&str> {
        match self.kind(element)? {
            NodeKind::Element { attributes, .. } => attributes.get(name).map(String::as_str),
            _ => None,
        }
    }

    /// Serializes the children of the root.
    #[must_use]
    pub fn to_html(&self) -> String {
        self.inner_html(self.root())
    }

    #[must_use]
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(node) {
            self.write_node(child, &mut out);
        }
        out
    }

    #[must_use]
    pub fn serialize(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_node(node, &mut out);
        out
    }

    /// Concatenated text of `node` and its descendants.
    #[must_use]
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_text(node, &mut out);
        out
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.nodes.get_mut(node.0 as usize).and_then(|data| data.parent.take()) else {
            return;
        };
        if let Some(data) = self.nodes.get_mut(parent.0 as usize) {
            data.children.retain(|&child| child != node);
        }
    }

    fn write_node(&self, node: NodeId, out: &mut String) {
        let Some(kind) = self.kind(node) else {
            return;
        };
        match kind {
            NodeKind::Fragment => {
                for &child in self.children(node) {
                    self.write_node(child, out);
                }
            }
            NodeKind::Element { tag, attributes } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_attribute(value, out);
                    out.push('"');
                }
                out.push('>');
                if is_void_element(tag) {
                    return;
                }
                for &child in self.children(node) {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
            NodeKind::Text(text) => escape_text(text, out),
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeKind::Raw(html) => out.push_str(html),
        }
    }

    fn write_text(&self, node: NodeId, out: &mut String) {
        match self.kind(node) {
            Some(NodeKind::Text(text)) => out.push_str(text),
            Some(NodeKind::Fragment | NodeKind::Element { .. }) => {
                for &child in self.children(node) {
                    self.write_text(child, out);
                }
            }
            _ => {}
        }
    }
}

impl TreeOperations for SimpleDocument {
    fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_owned()))
    }

    fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Comment(text.to_owned()))
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element {
            tag: tag.to_owned(),
            attributes: IndexMap::new(),
        })
    }

    fn insert_before(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>) {
        self.detach(node);
        let Some(data) = self.nodes.get_mut(parent.0 as usize) else {
            return;
        };
        let position = reference
            .and_then(|reference| data.children.iter().position(|&child| child == reference))
            .unwrap_or(data.children.len());
        data.children.insert(position, node);
        if let Some(child) = self.nodes.get_mut(node.0 as usize) {
            child.parent = Some(parent);
        }
        self.mutations += 1;
    }

    fn insert_html(&mut self, cursor: Cursor, html: &str) -> Bounds {
        if html.is_empty() {
            return Bounds::empty(cursor.parent);
        }
        let node = self.push(NodeKind::Raw(html.to_owned()));
        self.insert_before(cursor.parent, node, cursor.next_sibling);
        Bounds::single(cursor.parent, node)
    }

    fn set_attribute(&mut self, element: NodeId, name: &str, value: &str) {
        if let Some(NodeData {
            kind: NodeKind::Element { attributes, .. },
            ..
        }) = self.nodes.get_mut(element.0 as usize)
        {
            attributes.insert(name.to_owned(), value.to_owned());
            self.mutations += 1;
        }
    }

    fn remove_attribute(&mut self, element: NodeId, name: &str) {
        if let Some(NodeData {
            kind: NodeKind::Element { attributes, .. },
            ..
        }) = self.nodes.get_mut(element.0 as usize)
            && attributes.shift_remove(name).is_some()
        {
            self.mutations += 1;
        }
    }

    fn remove(&mut self, node: NodeId) {
        let attached = self.nodes.get(node.0 as usize).is_some_and(|data| data.parent.is_some());
        if attached {
            self.detach(node);
            self.mutations += 1;
        }
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get(node.0 as usize)?.parent?;
        let siblings = self.children(parent);
        let position = siblings.iter().position(|&child| child == node)?;
        siblings.get(position + 1).copied()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0 as usize)?.parent
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_nested_markup() {
        let mut doc = SimpleDocument::new();
        let root = doc.root();
        let div = doc.create_element("div");
        doc.set_attribute(div, "title", "a \"b\" & c");
        doc.insert_before(root, div, None);
        let br = doc.create_element("br");
        doc.insert_before(div, br, None);
        let text = doc.create_text("1 < 2");
        doc.insert_before(div, text, None);
        let comment = doc.create_comment("");
        doc.insert_before(root, comment, None);

        assert_eq!(doc.to_html(), "<div title=\"a &quot;b&quot; &amp; c\"><br>1 &lt; 2</div><!---->");
        assert_eq!(doc.text_content(root), "1 < 2");
    }

    #[test]
    fn insert_before_and_siblings() {
        let mut doc = SimpleDocument::new();
        let root = doc.root();
        let b = doc.create_text("b");
        doc.insert_before(root, b, None);
        let a = doc.create_text("a");
        doc.insert_before(root, a, Some(b));
        let bounds = doc.insert_html(Cursor::append_to(root), "<i>c</i>");

        assert_eq!(doc.to_html(), "ab<i>c</i>");
        assert_eq!(doc.next_sibling(a), Some(b));
        assert_eq!(doc.next_sibling(bounds.last().unwrap()), None);
        assert!(doc.insert_html(Cursor::append_to(root), "").is_empty());

        let before = doc.mutations();
        doc.remove(a);
        doc.remove(a);
        assert_eq!(doc.mutations(), before + 1);
        assert_eq!(doc.parent(a), None);
        assert_eq!(doc.to_html(), "b<i>c</i>");
    }
}
