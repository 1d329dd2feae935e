//! Mutable HTML tree with CSS selector lookup.
//!
//! The rule engine only talks to [`Document`] and [`ElementHandle`]; the tree
//! itself is an html5ever DOM provided by `kuchikiki`. A `Document` is not
//! `Send` and must stay inside the synchronous part of a request.

use std::io;

use html5ever::{LocalName, Namespace, QualName};
use kuchikiki::{ElementData, NodeDataRef, NodeRef, parse_html, traits::*};

use crate::error::RuleError;

pub struct Document {
    root: NodeRef,
}

impl Document {
    /// html5ever recovers from malformed markup, so parsing itself cannot fail.
    pub fn parse(html: &str) -> Self {
        Self {
            root: parse_html().one(html),
        }
    }

    /// All elements matching `selector`, in document order.
    pub fn find(&self, selector: &str) -> Result<Vec<ElementHandle>, RuleError> {
        let matches = self
            .root
            .select(selector)
            .map_err(|()| RuleError::InvalidSelector(selector.to_string()))?;
        Ok(matches.map(ElementHandle).collect())
    }

    pub fn to_html(&self) -> io::Result<String> {
        let mut buf = Vec::new();
        self.root.serialize(&mut buf)?;
        String::from_utf8(buf).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

pub struct ElementHandle(NodeDataRef<ElementData>);

impl ElementHandle {
    pub fn attribute(&self, name: &str) -> Option<String> {
        let attributes = self.0.attributes.borrow();
        attributes.get(name).map(str::to_string)
    }

    /// Content of the first text child, empty when there is none.
    pub fn text(&self) -> String {
        self.0
            .as_node()
            .children()
            .text_nodes()
            .next()
            .map(|text| text.borrow().clone())
            .unwrap_or_default()
    }

    /// Parsed with this element as context, so `<tr>` goes into a `<tbody>`.
    pub fn append_html(&self, html: &str) {
        let node = self.0.as_node();
        for child in parse_fragment(self.0.name.clone(), html) {
            node.append(child);
        }
    }

    /// Parsed with the parent as context, so a `<td>` can replace a `<td>`.
    pub fn replace_with_html(&self, html: &str) {
        let node = self.0.as_node();
        let context = node
            .parent()
            .and_then(|parent| parent.as_element().map(|element| element.name.clone()))
            .unwrap_or_else(body_name);
        for sibling in parse_fragment(context, html) {
            node.insert_before(sibling);
        }
        node.detach();
    }
}

fn body_name() -> QualName {
    QualName::new(
        None,
        Namespace::from("http://www.w3.org/1999/xhtml"),
        LocalName::from("body"),
    )
}

/// Fragment parsing puts everything under a synthetic `<html>` root.
fn parse_fragment(context: QualName, html: &str) -> Vec<NodeRef> {
    let parsed = kuchikiki::parse_fragment(context, Vec::new()).one(html);
    parsed
        .first_child()
        .map(|root| root.children().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>t</title></head><body>
        <ul id="list"><li>a</li><li>b</li></ul>
        <h1 id="title" class="x">Old</h1>
        <a href="/next" data-id="7">  spaced  <b>bold</b></a>
    </body></html>"#;

    #[test]
    fn find_returns_matches_in_order() {
        let doc = Document::parse(PAGE);
        let items = doc.find("#list li").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text(), "a");
        assert_eq!(items[1].text(), "b");
    }

    #[test]
    fn invalid_selector_is_a_rule_error() {
        let doc = Document::parse(PAGE);
        let err = doc.find("li[").err().unwrap();
        assert_eq!(err, RuleError::InvalidSelector("li[".into()));
    }

    #[test]
    fn reads_attributes_and_first_text() {
        let doc = Document::parse(PAGE);
        let link = doc.find("a").unwrap().remove(0);
        assert_eq!(link.attribute("data-id").as_deref(), Some("7"));
        assert_eq!(link.attribute("missing"), None);
        assert_eq!(link.text(), "  spaced  ");
        let bold = doc.find("b").unwrap().remove(0);
        assert_eq!(bold.text(), "bold");
    }

    #[test]
    fn text_is_empty_without_text_child() {
        let doc = Document::parse("<div id=\"e\"><span>x</span></div>");
        assert_eq!(doc.find("#e").unwrap()[0].text(), "");
    }

    #[test]
    fn append_adds_fragment_as_last_child() {
        let doc = Document::parse(PAGE);
        doc.find("#list").unwrap()[0].append_html("<li>c</li>");
        let items = doc.find("#list li").unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].text(), "c");
    }

    #[test]
    fn replace_swaps_the_element() {
        let doc = Document::parse(PAGE);
        doc.find("#title").unwrap()[0].replace_with_html("<h2 id=\"new\">New</h2>");
        assert!(doc.find("#title").unwrap().is_empty());
        assert_eq!(doc.find("#new").unwrap()[0].text(), "New");
    }

    #[test]
    fn fragments_keep_head_level_elements() {
        let doc = Document::parse(PAGE);
        doc.find("#list").unwrap()[0].append_html("<script>var x = 1;</script><li>d</li>");
        let html = doc.to_html().unwrap();
        assert!(html.contains("<li>b</li><script>var x = 1;</script><li>d</li></ul>"));
    }

    #[test]
    fn table_fragments_keep_their_tags() {
        let doc = Document::parse(
            "<table><tbody id=\"rows\"><tr><td id=\"cell\">v</td><td>w</td></tr></tbody></table>",
        );
        doc.find("#rows").unwrap()[0].append_html("<tr id=\"added\"><td>v</td></tr>");
        doc.find("#cell").unwrap()[0].replace_with_html("<td id=\"newcell\">v</td>");

        assert_eq!(doc.find("#rows > tr#added > td").unwrap().len(), 1);
        assert!(doc.find("#cell").unwrap().is_empty());
        assert_eq!(doc.find("tr > td#newcell").unwrap()[0].text(), "v");
        let html = doc.to_html().unwrap();
        assert!(html.contains("<td id=\"newcell\">v</td><td>w</td>"));
    }

    #[test]
    fn fragments_keep_leading_whitespace() {
        let doc = Document::parse("<div id=\"out\"></div>");
        doc.find("#out").unwrap()[0].append_html("  lead v");
        assert!(doc.to_html().unwrap().contains("<div id=\"out\">  lead v</div>"));
    }

    #[test]
    fn serializes_the_whole_document() {
        let doc = Document::parse("<p>hi</p>");
        let html = doc.to_html().unwrap();
        assert!(html.contains("<body><p>hi</p></body>"));
    }
}
