//! Minimal MusicXML document tree.
//!
//! Score files are small, and the transcoder needs ordered access to
//! mixed children of `<measure>`, so the whole document is read into a
//! lightweight element tree with `quick-xml` rather than streamed.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::TranscodeError;

/// An XML element with its attributes, direct text and child elements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, TranscodeError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Self::default()
        })
    }

    /// First direct child with the given tag.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follows a `/`-separated path of direct children.
    pub fn find(&self, path: &str) -> Option<&Element> {
        path.split('/')
            .try_fold(self, |element, segment| element.child(segment))
    }

    /// All descendants with the given tag, in document order.
    pub fn descendants(&self, name: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed text content, `None` when blank.
    pub fn text(&self) -> Option<&str> {
        let trimmed = self.text.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// Trimmed text of the child at `path`, `None` when absent or blank.
    pub fn child_text(&self, path: &str) -> Option<&str> {
        self.find(path).and_then(Element::text)
    }
}

/// Parses a MusicXML string into its root element.
pub fn parse_document(xml: &str) -> Result<Element, TranscodeError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(Element::from_start(&start)?),
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or(TranscodeError::MissingScore)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Loads a score from a plain (`.musicxml`, `.xml`) or compressed (`.mxl`) file.
pub fn load_score(path: &Path) -> Result<Element, TranscodeError> {
    let is_archive = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mxl"));

    let xml = if is_archive {
        read_archive(path)?
    } else {
        std::fs::read_to_string(path)?
    };
    parse_document(&xml)
}

/// Reads the first non-`META-INF` `.xml` entry of a compressed score.
fn read_archive(path: &Path) -> Result<String, TranscodeError> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;

    let entry_name = archive
        .file_names()
        .filter(|name| name.ends_with(".xml") && !name.starts_with("META-INF"))
        .map(str::to_owned)
        .next()
        .ok_or(TranscodeError::MissingScore)?;

    let mut entry = archive.by_name(&entry_name)?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}
