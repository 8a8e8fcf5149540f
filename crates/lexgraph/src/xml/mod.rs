//! Owned, mutable XML trees.
//!
//! Every surrogate owns its own [`Element`] tree; steps edit it through the
//! structural operations here (rename, move, delete, set attribute) and hand the
//! surrogate back to the repository.

pub mod parser;
pub mod writer;

pub use parser::{parse_xml, parse_xml_diagnostic};
pub use writer::{to_xml_document, to_xml_string};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    // ── attributes ──────────────────────────────────────────────────────────

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the value in place when the attribute exists, keeping attribute order.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let idx = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(idx).1)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn attributes_mut(&mut self) -> impl Iterator<Item = (&str, &mut String)> {
        self.attributes.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has_attributes(&self) -> bool {
        !self.attributes.is_empty()
    }

    // ── children ────────────────────────────────────────────────────────────

    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn elements_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.name == name)
    }

    /// Returns the named child, appending an empty one first if it is missing.
    pub fn child_or_insert(&mut self, name: &str) -> &mut Element {
        if self.child(name).is_none() {
            self.push_child(Element::new(name));
        }
        let idx = self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if e.name == name))
            .unwrap_or(0);
        match &mut self.children[idx] {
            Node::Element(e) => e,
            Node::Text(_) => unreachable!("position matched an element node"),
        }
    }

    pub fn element_count(&self) -> usize {
        self.elements().count()
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Inserts before the `index`-th element child (text nodes are not counted).
    /// An index past the end appends.
    pub fn insert_child(&mut self, index: usize, child: Element) {
        let pos = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, Node::Element(_)))
            .nth(index)
            .map(|(pos, _)| pos)
            .unwrap_or(self.children.len());
        self.children.insert(pos, Node::Element(child));
    }

    /// Removes and returns the first child element with the given name.
    pub fn take_child(&mut self, name: &str) -> Option<Element> {
        self.take_first_where(|e| e.name == name)
    }

    pub fn take_first_where<F>(&mut self, mut pred: F) -> Option<Element>
    where
        F: FnMut(&Element) -> bool,
    {
        let idx = self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if pred(e)))?;
        match self.children.remove(idx) {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    /// Removes every child element matching `pred` and returns them in document order.
    pub fn remove_elements_where<F>(&mut self, mut pred: F) -> Vec<Element>
    where
        F: FnMut(&Element) -> bool,
    {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.children.len());
        for node in self.children.drain(..) {
            match node {
                Node::Element(e) if pred(&e) => removed.push(e),
                other => kept.push(other),
            }
        }
        self.children = kept;
        removed
    }

    pub fn clear_children(&mut self) {
        self.children.clear();
    }

    // ── text ────────────────────────────────────────────────────────────────

    /// Concatenated text of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Concatenated text of every descendant, in document order.
    pub fn deep_text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.retain(|n| matches!(n, Node::Element(_)));
        self.children.push(Node::Text(text.into()));
    }

    pub fn has_text(&self) -> bool {
        self.children
            .iter()
            .any(|n| matches!(n, Node::Text(t) if !t.trim().is_empty()))
    }

    /// No attributes, no element children, no meaningful text.
    pub fn is_vacuous(&self) -> bool {
        self.attributes.is_empty() && self.element_count() == 0 && !self.has_text()
    }

    // ── traversal ───────────────────────────────────────────────────────────

    /// Pre-order visit of this element and every descendant element.
    pub fn visit<F>(&self, f: &mut F)
    where
        F: FnMut(&Element),
    {
        f(self);
        for child in self.elements() {
            child.visit(f);
        }
    }

    /// Pre-order mutable visit of this element and every descendant element.
    pub fn visit_mut<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut Element),
    {
        f(self);
        for child in self.elements_mut() {
            child.visit_mut(f);
        }
    }
}

fn collect_text(element: &Element, out: &mut String) {
    for node in &element.children {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => collect_text(e, out),
        }
    }
}
