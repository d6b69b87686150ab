use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::graph::GraphError;

/// One node of the tagged tree the builder walks. Attribute order is the
/// document order.
#[derive(Debug, Clone, Default)]
pub struct SourceNode {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<SourceNode>,
}

impl SourceNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }
}

fn node_from(start: &BytesStart) -> Result<SourceNode, GraphError> {
    let mut node = SourceNode::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        node.attributes.push((
            String::from_utf8_lossy(attribute.key.as_ref()).into_owned(),
            attribute.unescape_value()?.into_owned(),
        ));
    }
    Ok(node)
}

/// Parses a whole document into its root node. Anything after the root
/// element is ignored, a document without one is an error.
pub fn parse_document(data: &[u8]) -> Result<SourceNode, GraphError> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<SourceNode> = Vec::new();
    let mut root: Option<SourceNode> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(node_from(&start)?),
            Event::Empty(start) => {
                let node = node_from(&start)?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    parent.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    parent.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                // quick-xml validates the nesting, so the stack cannot be
                // empty here.
                if let Some(node) = stack.pop() {
                    attach(&mut stack, &mut root, node);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or(GraphError::EmptyDocument)
}

fn attach(stack: &mut [SourceNode], root: &mut Option<SourceNode>, node: SourceNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_document;

    #[test]
    fn parses_attributes_text_and_nesting() -> Result<(), anyhow::Error> {
        let doc = br#"<scene type="space"><name>Outpost</name><hull type="dict"><x>1</x></hull></scene>"#;
        let root = parse_document(doc)?;
        assert_eq!(root.tag, "scene");
        assert_eq!(root.attribute("type"), Some("space"));
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].text, "Outpost");
        assert_eq!(root.children[1].children[0].tag, "x");
        Ok(())
    }

    #[test]
    fn empty_document_is_an_error() {
        assert!(parse_document(b"  ").is_err());
    }
}
