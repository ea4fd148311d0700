//! A small element-tree layer over quick-xml.
//!
//! The app-list codec works on whole elements rather than raw events so that
//! attributes and child elements it does not understand can be carried along
//! unmodified and written back out on save. Mixed content (text interleaved
//! with elements) does not occur in the formats we read, so an element holds
//! either children or text.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::errors::{Result, SchemaError};

/// One XML element: name, attributes in document order, children or text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    /// Qualified element name
    pub name: String,
    /// Attributes in document order
    pub attrs: Vec<(String, String)>,
    /// Child elements in document order
    pub children: Vec<XmlElement>,
    /// Text content, for leaf elements
    pub text: Option<String>,
}

impl XmlElement {
    /// A new element with no attributes or content.
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Look up an attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set (or append) an attribute.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.attrs.iter_mut().find(|(k, _)| *k == name) {
            entry.1 = value;
        } else {
            self.attrs.push((name, value));
        }
    }

    /// Iterate children with the given element name.
    pub fn children_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First child with the given element name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children_named(name).next()
    }

    /// Append a child element.
    pub fn push(&mut self, child: XmlElement) {
        self.children.push(child);
    }

    /// A required attribute, with a useful error naming the element.
    pub fn require_attr(&self, name: &str) -> Result<&str> {
        self.attr(name).ok_or_else(|| SchemaError::InvalidData {
            message: format!("<{}> is missing the '{}' attribute", self.name, name),
        })
    }
}

/// Parse a full document into its root element.
pub fn parse(input: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    fn attach(stack: &mut Vec<XmlElement>, root: &mut Option<XmlElement>, el: XmlElement) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(el),
            None if root.is_none() => *root = Some(el),
            // Trailing junk after the root element; the parser itself
            // rejects most of these cases before we get here.
            None => {}
        }
    }

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                stack.push(element_from_start(&start)?);
            }
            Event::Empty(start) => {
                let el = element_from_start(&start)?;
                attach(&mut stack, &mut root, el);
            }
            Event::End(_) => {
                let el = stack.pop().ok_or_else(|| SchemaError::InvalidData {
                    message: "unbalanced closing tag".to_owned(),
                })?;
                attach(&mut stack, &mut root, el);
            }
            Event::Text(text) => {
                let value = text.unescape()?.into_owned();
                if let Some(current) = stack.last_mut() {
                    match &mut current.text {
                        Some(existing) => existing.push_str(&value),
                        None => current.text = Some(value),
                    }
                }
            }
            Event::CData(data) => {
                let value = String::from_utf8_lossy(&data).into_owned();
                if let Some(current) = stack.last_mut() {
                    match &mut current.text {
                        Some(existing) => existing.push_str(&value),
                        None => current.text = Some(value),
                    }
                }
            }
            Event::Eof => break,
            // declarations, comments, processing instructions, doctypes
            _ => {}
        }
    }

    root.ok_or_else(|| SchemaError::InvalidData {
        message: "document has no root element".to_owned(),
    })
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut el = XmlElement::new(name);
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

/// Serialize a root element into an indented UTF-8 document.
pub fn serialize(root: &XmlElement) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    write_element(&mut writer, root)?;
    let bytes = writer.into_inner();
    String::from_utf8(bytes).map_err(|_| SchemaError::InvalidData {
        message: "serialized document was not valid UTF-8".to_owned(),
    })
}

fn write_element(writer: &mut Writer<Vec<u8>>, el: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(el.name.as_str());
    for (k, v) in &el.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    if el.children.is_empty() && el.text.is_none() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    if let Some(text) = &el.text {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }
    for child in &el.children {
        write_element(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(el.name.as_str())))?;
    Ok(())
}
