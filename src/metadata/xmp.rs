//! XMP packet decoder.
//!
//! XMP is RDF/XML, but packets found inside images are small and regular
//! enough that a tag matcher is sufficient: it builds an element tree with
//! byte positions, which is all the region output needs. Namespaces are
//! matched by their conventional prefixes.

use crate::error::ScanError;
use crate::region::{RegionId, RegionSink, StyleFlags};
use crate::scan::{CancellationToken, Emitter, ScanOptions};

const FORMAT: &str = "XMP";

/// Markers of which at least one must appear in a packet
const PACKET_MARKERS: [&[u8]; 4] = [b"<?xpacket", b"<x:xmpmeta", b"<x:xapmeta", b"<rdf:RDF"];

const MAX_NESTING: usize = 128;
const MAX_SHOWN_CHARS: usize = 60;
const MAX_SHOWN_ATTRIBUTES: usize = 4;

// =============================================================================
// Element Tree
// =============================================================================

/// One element of the packet, with its byte span.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmpElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Character data directly inside this element, entities decoded
    pub text: String,
    pub children: Vec<XmpElement>,
    /// Offset of the opening `<`
    pub start: usize,
    /// Offset just past the closing `>`
    pub end: usize,
    /// False when the end tag was missing
    pub closed: bool,
}

impl XmpElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmpElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }
}

/// Parse `data` into its top-level elements.
///
/// Processing instructions, comments and doctype declarations are skipped.
/// End tags close the innermost open element with the same name; anything
/// opened after it is closed implicitly. Unterminated elements are closed at
/// end of data and marked as not closed.
pub fn parse_elements(data: &[u8]) -> Result<Vec<XmpElement>, ScanError> {
    let mut roots = Vec::new();
    let mut stack: Vec<XmpElement> = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let lt = match find(data, pos, b"<") {
            Some(lt) => lt,
            None => {
                append_text(&mut stack, &data[pos..]);
                break;
            }
        };
        if lt > pos {
            append_text(&mut stack, &data[pos..lt]);
        }

        let rest = &data[lt..];
        if rest.starts_with(b"<?") {
            pos = skip_past(data, lt, b"?>");
        } else if rest.starts_with(b"<!--") {
            pos = skip_past(data, lt, b"-->");
        } else if rest.starts_with(b"<![CDATA[") {
            let body = lt + 9;
            let end = find(data, body, b"]]>").unwrap_or(data.len());
            if let Some(top) = stack.last_mut() {
                top.text.push_str(&String::from_utf8_lossy(&data[body..end]));
            }
            pos = (end + 3).min(data.len());
        } else if rest.starts_with(b"<!") {
            pos = skip_past(data, lt, b">");
        } else if rest.starts_with(b"</") {
            let gt = find(data, lt, b">").unwrap_or(data.len());
            let name = String::from_utf8_lossy(&data[lt + 2..gt]).trim().to_string();
            let end = (gt + 1).min(data.len());
            if let Some(depth) = stack.iter().rposition(|e| e.name == name) {
                while stack.len() > depth + 1 {
                    if let Some(mut open) = stack.pop() {
                        open.end = lt;
                        attach(&mut stack, &mut roots, open);
                    }
                }
                if let Some(mut done) = stack.pop() {
                    done.end = end;
                    done.closed = true;
                    attach(&mut stack, &mut roots, done);
                }
            }
            pos = end;
        } else {
            let (mut element, end, self_closing) = parse_start_tag(data, lt)?;
            pos = end;
            if self_closing {
                element.end = end;
                element.closed = true;
                attach(&mut stack, &mut roots, element);
            } else {
                if stack.len() >= MAX_NESTING {
                    return Err(ScanError::malformed(FORMAT, "elements nested too deeply"));
                }
                stack.push(element);
            }
        }
    }

    while let Some(mut open) = stack.pop() {
        open.end = data.len();
        attach(&mut stack, &mut roots, open);
    }
    Ok(roots)
}

fn attach(stack: &mut [XmpElement], roots: &mut Vec<XmpElement>, element: XmpElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => roots.push(element),
    }
}

fn append_text(stack: &mut [XmpElement], raw: &[u8]) {
    if let Some(top) = stack.last_mut() {
        let text = String::from_utf8_lossy(raw);
        if !text.trim().is_empty() {
            top.text.push_str(&decode_entities(&text));
        }
    }
}

/// Parse `<name attr="value" ...>` starting at `lt`.
///
/// Returns the element, the offset just past the tag and whether it was
/// self-closing.
fn parse_start_tag(data: &[u8], lt: usize) -> Result<(XmpElement, usize, bool), ScanError> {
    let unterminated = || ScanError::malformed(FORMAT, "unterminated start tag");
    let mut pos = lt + 1;
    let name_start = pos;
    while pos < data.len() && !is_name_end(data[pos]) {
        pos += 1;
    }
    let mut element = XmpElement {
        name: String::from_utf8_lossy(&data[name_start..pos]).into_owned(),
        start: lt,
        ..XmpElement::default()
    };

    loop {
        while pos < data.len() && data[pos].is_ascii_whitespace() {
            pos += 1;
        }
        match data.get(pos) {
            None => return Err(unterminated()),
            Some(b'>') => return Ok((element, pos + 1, false)),
            Some(b'/') if data.get(pos + 1) == Some(&b'>') => {
                return Ok((element, pos + 2, true));
            }
            Some(b'/') => pos += 1,
            Some(_) => {
                let key_start = pos;
                while pos < data.len() && !is_name_end(data[pos]) && data[pos] != b'=' {
                    pos += 1;
                }
                let key = String::from_utf8_lossy(&data[key_start..pos]).into_owned();
                while pos < data.len() && data[pos].is_ascii_whitespace() {
                    pos += 1;
                }
                let mut value = String::new();
                if data.get(pos) == Some(&b'=') {
                    pos += 1;
                    while pos < data.len() && data[pos].is_ascii_whitespace() {
                        pos += 1;
                    }
                    let quote = *data.get(pos).ok_or_else(unterminated)?;
                    if quote == b'"' || quote == b'\'' {
                        let close = find(data, pos + 1, &[quote]).ok_or_else(unterminated)?;
                        value = decode_entities(&String::from_utf8_lossy(&data[pos + 1..close]));
                        pos = close + 1;
                    } else {
                        let value_start = pos;
                        while pos < data.len() && !is_name_end(data[pos]) {
                            pos += 1;
                        }
                        value = String::from_utf8_lossy(&data[value_start..pos]).into_owned();
                    }
                }
                if key.is_empty() {
                    pos += 1;
                } else {
                    element.attributes.push((key, value));
                }
            }
        }
    }
}

fn is_name_end(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b'>' || b == b'/'
}

fn find(data: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn skip_past(data: &[u8], from: usize, needle: &[u8]) -> usize {
    find(data, from, needle).map_or(data.len(), |i| i + needle.len())
}

/// Replace the predefined XML entities and numeric character references.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// =============================================================================
// Dublin Core
// =============================================================================

/// One `dc:*` property with its values and the span it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DcProperty {
    pub name: String,
    pub values: Vec<String>,
    pub start: usize,
    pub end: usize,
}

/// Collect Dublin Core properties from every `rdf:Description`, in
/// document order.
pub fn dublin_core(roots: &[XmpElement]) -> Vec<DcProperty> {
    let mut found = Vec::new();
    for root in roots {
        collect_dc(root, &mut found);
    }
    found
}

fn collect_dc(element: &XmpElement, found: &mut Vec<DcProperty>) {
    if element.name == "rdf:Description" {
        for (key, value) in &element.attributes {
            if key.starts_with("dc:") {
                found.push(DcProperty {
                    name: key.clone(),
                    values: vec![value.clone()],
                    start: element.start,
                    end: element.end,
                });
            }
        }
        for child in element.children.iter().filter(|c| c.name.starts_with("dc:")) {
            found.push(DcProperty {
                name: child.name.clone(),
                values: dc_values(child),
                start: child.start,
                end: child.end,
            });
        }
    }
    for child in &element.children {
        if child.name.starts_with("dc:") {
            continue;
        }
        collect_dc(child, found);
    }
}

fn dc_values(property: &XmpElement) -> Vec<String> {
    let container = ["rdf:Seq", "rdf:Alt", "rdf:Bag"]
        .iter()
        .find_map(|name| property.child(name));
    if let Some(container) = container {
        return container
            .children
            .iter()
            .filter(|li| li.name == "rdf:li")
            .map(|li| li.trimmed_text().to_string())
            .collect();
    }
    if !property.trimmed_text().is_empty() {
        return vec![property.trimmed_text().to_string()];
    }
    property.attributes.iter().map(|(_, v)| v.clone()).collect()
}

// =============================================================================
// Entry Points
// =============================================================================

/// Decode an XMP packet placed at absolute offset `base_offset`.
pub fn parse_xmp(
    data: &[u8],
    base_offset: u64,
    parent: Option<RegionId>,
    sink: &mut dyn RegionSink,
) -> Result<(), ScanError> {
    parse_xmp_with(data, base_offset, parent, sink, &ScanOptions::default())
}

/// [`parse_xmp`] with explicit options.
pub fn parse_xmp_with(
    data: &[u8],
    base_offset: u64,
    parent: Option<RegionId>,
    sink: &mut dyn RegionSink,
    options: &ScanOptions,
) -> Result<(), ScanError> {
    let mut out = Emitter::new(sink, *options, CancellationToken::new());
    decode(&mut out, data, base_offset, parent)
}

pub(crate) fn decode(
    out: &mut Emitter<'_>,
    data: &[u8],
    base: u64,
    parent: Option<RegionId>,
) -> Result<(), ScanError> {
    if !PACKET_MARKERS.iter().any(|m| find(data, 0, m).is_some()) {
        return Err(ScanError::not_this_format(FORMAT, "no xmpmeta or RDF element"));
    }
    let roots = parse_elements(data)?;

    let packet_id = out.add(
        StyleFlags::NONE,
        base,
        data.len() as u64,
        format!("XMP packet ({} bytes)", data.len()),
        parent,
    );

    let dc = dublin_core(&roots);
    if !dc.is_empty() {
        let summary = dc
            .iter()
            .map(|p| format!("{}={}", p.name.trim_start_matches("dc:"), p.values.join("; ")))
            .collect::<Vec<_>>()
            .join(", ");
        let dc_id = out.add(
            StyleFlags::SUMMARY_LIST,
            base,
            data.len() as u64,
            format!("Dublin Core: {}", shorten(&summary)),
            Some(packet_id),
        );
        for property in &dc {
            out.add(
                StyleFlags::NONE,
                base + property.start as u64,
                (property.end - property.start) as u64,
                format!("{}: {}", property.name, shorten(&property.values.join("; "))),
                Some(dc_id),
            );
        }
    }

    for root in &roots {
        emit_element(out, root, base, packet_id)?;
    }
    Ok(())
}

fn emit_element(
    out: &mut Emitter<'_>,
    element: &XmpElement,
    base: u64,
    parent: RegionId,
) -> Result<(), ScanError> {
    out.check_cancelled()?;

    let mut label = element.name.clone();
    if !element.attributes.is_empty() {
        let shown: Vec<String> = element
            .attributes
            .iter()
            .take(MAX_SHOWN_ATTRIBUTES)
            .map(|(k, v)| format!("{}=\"{}\"", k, shorten(v)))
            .collect();
        label.push_str(&format!(" [{}", shown.join(", ")));
        if element.attributes.len() > MAX_SHOWN_ATTRIBUTES {
            label.push_str(&format!(", +{} more", element.attributes.len() - MAX_SHOWN_ATTRIBUTES));
        }
        label.push(']');
    }
    if !element.trimmed_text().is_empty() {
        label.push_str(&format!(": \"{}\"", shorten(element.trimmed_text())));
    }
    let flags = if element.closed {
        StyleFlags::NONE
    } else {
        label.push_str(" (unclosed)");
        StyleFlags::ERROR
    };

    let id = out.add(
        flags,
        base + element.start as u64,
        (element.end - element.start) as u64,
        label,
        Some(parent),
    );
    for child in &element.children {
        emit_element(out, child, base, id)?;
    }
    Ok(())
}

fn shorten(text: &str) -> String {
    if text.chars().count() > MAX_SHOWN_CHARS {
        let cut: String = text.chars().take(MAX_SHOWN_CHARS).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
