use crate::error::KmlResult;

/// Index of an element in a [`KmlDom`] arena.
pub type ElemId = usize;

/// One XML element. Text content is the concatenation of the element's
/// direct text and CDATA children, trimmed.
#[derive(Debug, Clone)]
pub struct ElementData {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<ElemId>,
    pub parent: Option<ElemId>,
}

/// An owned, mutable XML element tree addressed by index.
///
/// roxmltree gives us a fast read-only parse, but the KML engine has to
/// mutate the document after the fact: synthesize a wrapper root, graft
/// external stylesheet styles into the main document, and rewrite styleUrl
/// references. So the parsed tree is converted once into this arena and the
/// borrowed document is dropped.
#[derive(Debug, Clone)]
pub struct KmlDom {
    elems: Vec<ElementData>,
    root: ElemId,
}

impl KmlDom {
    pub fn parse(xml: &str) -> KmlResult<KmlDom> {
        let doc = roxmltree::Document::parse(xml)?;
        let mut dom = KmlDom {
            elems: Vec::new(),
            root: 0,
        };
        let root = dom.convert(doc.root_element(), None);
        dom.root = root;
        Ok(dom)
    }

    fn convert(&mut self, node: roxmltree::Node, parent: Option<ElemId>) -> ElemId {
        let id = self.elems.len();
        let mut text = String::new();
        for child in node.children() {
            if child.is_text() {
                if let Some(t) = child.text() {
                    text.push_str(t);
                }
            }
        }
        self.elems.push(ElementData {
            name: node.tag_name().name().to_string(),
            attrs: node
                .attributes()
                .map(|a| (a.name().to_string(), a.value().to_string()))
                .collect(),
            text: text.trim().to_string(),
            children: Vec::new(),
            parent,
        });
        for child in node.children().filter(|n| n.is_element()) {
            let child_id = self.convert(child, Some(id));
            self.elems[id].children.push(child_id);
        }
        id
    }

    pub fn root(&self) -> ElemId {
        self.root
    }

    pub fn name(&self, id: ElemId) -> &str {
        &self.elems[id].name
    }

    pub fn text(&self, id: ElemId) -> &str {
        &self.elems[id].text
    }

    pub fn set_text(&mut self, id: ElemId, text: impl Into<String>) {
        self.elems[id].text = text.into();
    }

    pub fn attr(&self, id: ElemId, name: &str) -> Option<&str> {
        self.elems[id]
            .attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, id: ElemId, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.elems[id].attrs.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.elems[id].attrs.push((name.to_string(), value)),
        }
    }

    pub fn parent(&self, id: ElemId) -> Option<ElemId> {
        self.elems[id].parent
    }

    pub fn children(&self, id: ElemId) -> &[ElemId] {
        &self.elems[id].children
    }

    pub fn children_by_name(&self, id: ElemId, name: &str) -> Vec<ElemId> {
        self.elems[id]
            .children
            .iter()
            .copied()
            .filter(|&c| self.elems[c].name == name)
            .collect()
    }

    pub fn child_by_name(&self, id: ElemId, name: &str) -> Option<ElemId> {
        self.elems[id]
            .children
            .iter()
            .copied()
            .find(|&c| self.elems[c].name == name)
    }

    /// Text content of the first child with the given name.
    pub fn child_text(&self, id: ElemId, name: &str) -> Option<&str> {
        self.child_by_name(id, name).map(|c| self.text(c))
    }

    /// All elements of the subtree rooted at `id`, including `id`, in
    /// document order.
    pub fn descendants(&self, id: ElemId) -> Vec<ElemId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            for &c in self.elems[cur].children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// All descendants of the root with the given element name.
    pub fn find_all(&self, name: &str) -> Vec<ElemId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|&e| self.elems[e].name == name)
            .collect()
    }

    /// First descendant of the root with the given element name.
    pub fn find_first(&self, name: &str) -> Option<ElemId> {
        self.descendants(self.root)
            .into_iter()
            .find(|&e| self.elems[e].name == name)
    }

    pub fn new_element(&mut self, name: impl Into<String>) -> ElemId {
        let id = self.elems.len();
        self.elems.push(ElementData {
            name: name.into(),
            attrs: Vec::new(),
            text: String::new(),
            children: Vec::new(),
            parent: None,
        });
        id
    }

    pub fn append_child(&mut self, parent: ElemId, child: ElemId) {
        self.elems[child].parent = Some(parent);
        self.elems[parent].children.push(child);
    }

    /// Wrap the current root in a new element with the given name and make
    /// the wrapper the document root.
    pub fn wrap_root(&mut self, name: &str) -> ElemId {
        let old_root = self.root;
        let wrapper = self.new_element(name);
        self.append_child(wrapper, old_root);
        self.root = wrapper;
        wrapper
    }

    /// Deep-copy a subtree from another document into this one, returning the
    /// new local id. Used to graft external stylesheet styles into the main
    /// document.
    pub fn graft(&mut self, other: &KmlDom, elem: ElemId) -> ElemId {
        let id = self.new_element(other.elems[elem].name.clone());
        self.elems[id].attrs = other.elems[elem].attrs.clone();
        self.elems[id].text = other.elems[elem].text.clone();
        for &c in &other.elems[elem].children {
            let child = self.graft(other, c);
            self.append_child(id, child);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_and_navigate() {
        let dom = KmlDom::parse("<kml><Document><name>Doc</name></Document></kml>").unwrap();
        let root = dom.root();
        assert_eq!(dom.name(root), "kml");
        let doc = dom.child_by_name(root, "Document").unwrap();
        assert_eq!(dom.child_text(doc, "name"), Some("Doc"));
    }

    #[test]
    fn test_wrap_root() {
        let mut dom = KmlDom::parse("<Document/>").unwrap();
        dom.wrap_root("kml");
        assert_eq!(dom.name(dom.root()), "kml");
        assert_eq!(dom.children(dom.root()).len(), 1);
    }

    #[test]
    fn test_graft_subtree() {
        let mut main = KmlDom::parse("<kml><Document/></kml>").unwrap();
        let sheet = KmlDom::parse(r#"<kml><Style id="a"><IconStyle/></Style></kml>"#).unwrap();
        let style = sheet.find_first("Style").unwrap();
        let doc = main.find_first("Document").unwrap();
        let grafted = main.graft(&sheet, style);
        main.append_child(doc, grafted);
        assert_eq!(main.children_by_name(doc, "Style").len(), 1);
        assert_eq!(main.attr(grafted, "id"), Some("a"));
    }
}
