//! Transis XML parsing
//!
//! Documents are small (one network-wide five-minute snapshot at most), so
//! each one is read into a lightweight element tree with `quick-xml` and then
//! classified. Element and attribute names are compared by local name; the
//! `ns2:` prefixes Transis puts on some elements carry no meaning here.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;

use super::layouts::SiteLayouts;
use super::models::{DetectorCountRecord, ParsedResponse, ResponseKind, COLLECTION_INTERVAL_SECS};
use crate::error::ParseError;

/// Fallback text when an error document carries no `msg`
const UNDESCRIBED_ERROR: &str = "Transis reported an error without a message";

/// An XML element with namespace prefixes stripped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    /// Attributes in document order, namespace declarations excluded
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First direct child with the given local name
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    fn required_attr(&self, element: &'static str, attribute: &'static str) -> Result<&str, ParseError> {
        self.attr(attribute)
            .ok_or(ParseError::MissingAttribute { element, attribute })
    }
}

/// Parse one document into a classified response
pub fn parse_response(document: &[u8]) -> Result<ParsedResponse, ParseError> {
    let root = parse_element_tree(document)?;
    Ok(ParsedResponse::new(classify(&root)?))
}

/// Read a complete, well-formed document into an element tree
pub fn parse_element_tree(document: &[u8]) -> Result<XmlElement, ParseError> {
    let text = std::str::from_utf8(document)
        .map_err(|e| ParseError::malformed(format!("document is not valid UTF-8: {e}")))?;

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut open: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if open.is_empty() && root.is_some() {
                    return Err(ParseError::malformed("more than one root element"));
                }
                open.push(element_from(&start)?);
            },
            Ok(Event::Empty(start)) => {
                let element = element_from(&start)?;
                close_element(&mut open, &mut root, element)?;
            },
            Ok(Event::End(_)) => {
                let element = open
                    .pop()
                    .ok_or_else(|| ParseError::malformed("closing tag without an opening tag"))?;
                close_element(&mut open, &mut root, element)?;
            },
            Ok(Event::Text(text)) => {
                let text = text
                    .unescape()
                    .map_err(|e| ParseError::malformed(e.to_string()))?;
                match open.last_mut() {
                    Some(parent) => parent.text.push_str(&text),
                    None => return Err(ParseError::malformed("text outside the root element")),
                }
            },
            Ok(Event::CData(data)) => {
                if let Some(parent) = open.last_mut() {
                    parent.text.push_str(&String::from_utf8_lossy(&data));
                }
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => {
                return Err(ParseError::malformed(format!(
                    "{} (near byte {})",
                    e,
                    reader.buffer_position()
                )))
            },
        }
    }

    if let Some(unclosed) = open.last() {
        return Err(ParseError::malformed(format!(
            "document ended inside <{}>",
            unclosed.name
        )));
    }

    root.ok_or_else(|| ParseError::malformed("document has no root element"))
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement, ParseError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();

    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| ParseError::malformed(e.to_string()))?;
        if attribute.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| ParseError::malformed(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(XmlElement {
        name,
        attributes,
        ..Default::default()
    })
}

fn close_element(
    open: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), ParseError> {
    match open.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_some() => return Err(ParseError::malformed("more than one root element")),
        None => *root = Some(element),
    }
    Ok(())
}

fn classify(root: &XmlElement) -> Result<ResponseKind, ParseError> {
    if root
        .attr("error")
        .is_some_and(|flag| flag.eq_ignore_ascii_case("true"))
    {
        let message = root
            .child("Errors")
            .and_then(|errors| errors.children.first())
            .and_then(|first| first.attr("msg"))
            .unwrap_or(UNDESCRIBED_ERROR);
        return Ok(ResponseKind::Error {
            message: message.to_string(),
        });
    }

    if let Some(messages) = root.child("DetectorCountMessages") {
        let records = messages
            .children
            .iter()
            .map(detector_count_record)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ResponseKind::DetectorCounts(records));
    }

    if let Some(layouts) = root.child("SiteLayouts") {
        return Ok(ResponseKind::SiteLayouts(SiteLayouts::from_element(layouts)));
    }

    Ok(ResponseKind::Empty)
}

fn detector_count_record(message: &XmlElement) -> Result<DetectorCountRecord, ParseError> {
    const ELEMENT: &str = "DetectorCountMessage";

    let site_id = message.required_attr(ELEMENT, "Sid")?;
    let region = message.required_attr(ELEMENT, "reg")?;
    let period_end = message.required_attr(ELEMENT, "date")?;
    let period_end_timestamp = scats_common::time::epoch_from_timestamp(period_end)?;

    // Detectors missing either attribute are skipped, not fatal
    let detector_counts: BTreeMap<String, String> = message
        .child("Detectors")
        .map(|detectors| {
            detectors
                .children
                .iter()
                .filter_map(|d| Some((d.attr("Did")?.to_string(), d.attr("count")?.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(DetectorCountRecord {
        site_id: site_id.to_string(),
        region: region.to_string(),
        interval_seconds: COLLECTION_INTERVAL_SECS,
        period_end: period_end.to_string(),
        period_end_timestamp,
        detector_counts,
    })
}
