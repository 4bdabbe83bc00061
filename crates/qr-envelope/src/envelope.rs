//! Envelope codec: one chunk's metadata and payload as a tagged-text record.
//!
//! Every optical symbol carries exactly one envelope. The layout is fixed and
//! byte-compatible with symbols produced by earlier versions of the tool:
//!
//! ```text
//! <doc page="7" x="@tariusdamon" file="dist/app.zip" chunk="2" total="9">UEsDBBQAAAAI...</doc>
//! ```
//!
//! `page` is the run-wide sequence index, `x` the provenance marker, `file` the
//! source identifier, `chunk`/`total` the 1-based position and chunk count.
//! The text between the tags is the base64 payload slice.
//!
//! Serialization always emits the form above. Parsing also takes what an XML
//! reader would: single-quoted values, whitespace around `=`, and decimal or
//! hex character references such as `&#38;` and `&#x26;`.
//!
//! Sizes are measured in UTF-8 bytes of the serialized text, since symbol
//! capacity is byte-oriented.

use std::borrow::Cow;
use thiserror::Error;

/// Provenance tag written into every envelope.
pub const DEFAULT_MARKER: &str = "@tariusdamon";

/// Narrowest digit width assumed for numeric fields when budgeting overhead.
pub const MIN_INDEX_DIGITS: usize = 3;

const OPEN_TAG: &str = "<doc";
const CLOSE_TAG: &str = "</doc>";

const ATTR_PAGE: &str = "page";
const ATTR_MARKER: &str = "x";
const ATTR_FILE: &str = "file";
const ATTR_CHUNK: &str = "chunk";
const ATTR_TOTAL: &str = "total";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The text is not a structurally valid envelope.
    #[error("malformed envelope: {reason}")]
    Malformed { reason: String },

    /// The envelope size budget cannot hold the non-payload fields.
    #[error("envelope budget of {budget} bytes cannot hold {overhead} bytes of overhead for '{file}'")]
    BudgetExceeded { file: String, budget: usize, overhead: usize },
}

fn malformed(reason: impl Into<String>) -> EnvelopeError {
    EnvelopeError::Malformed { reason: reason.into() }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One self-describing transport unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Run-wide sequence index; names the external artifact only.
    pub sequence_index: u64,
    /// Logical path of the file this chunk belongs to.
    pub source: String,
    /// 1-based position within the file's chunk sequence.
    pub chunk_index: u32,
    /// Total chunks for the file; identical in every chunk of that file.
    pub chunk_count: u32,
    /// Base64 slice of the file's content.
    pub payload: String,
    pub marker: String,
}

/// Digit widths used to price the numeric fields of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexWidth {
    /// Width of `page`.
    pub sequence: usize,
    /// Width of both `chunk` and `total`.
    pub chunk: usize,
}

impl Default for IndexWidth {
    fn default() -> Self {
        Self { sequence: MIN_INDEX_DIGITS, chunk: MIN_INDEX_DIGITS }
    }
}

impl IndexWidth {
    /// Widths wide enough for `max_sequence` and `chunk_count`, never below
    /// [`MIN_INDEX_DIGITS`].
    pub fn covering(max_sequence: u64, chunk_count: u32) -> Self {
        Self {
            sequence: digits(max_sequence).max(MIN_INDEX_DIGITS),
            chunk: digits(u64::from(chunk_count)).max(MIN_INDEX_DIGITS),
        }
    }

    /// Component-wise maximum.
    pub fn max(self, other: Self) -> Self {
        Self {
            sequence: self.sequence.max(other.sequence),
            chunk: self.chunk.max(other.chunk),
        }
    }

    pub fn covers(self, other: Self) -> bool {
        self.sequence >= other.sequence && self.chunk >= other.chunk
    }
}

/// Number of decimal digits in `n` (1 for zero).
pub fn digits(n: u64) -> usize {
    n.checked_ilog10().map_or(1, |d| d as usize + 1)
}

impl Envelope {
    /// Render to the wire template.
    pub fn serialize(&self) -> String {
        render(
            &self.sequence_index.to_string(),
            &self.marker,
            &self.source,
            &self.chunk_index.to_string(),
            &self.chunk_count.to_string(),
            &self.payload,
        )
    }

    /// Byte length of [`Envelope::serialize`] without allocating the payload twice.
    pub fn serialized_len(&self) -> usize {
        let width = IndexWidth {
            sequence: digits(self.sequence_index),
            chunk: 0,
        };
        overhead(&self.source, &self.marker, width)
            + digits(u64::from(self.chunk_index))
            + digits(u64::from(self.chunk_count))
            + escape(&self.payload).len()
    }

    /// Parse one envelope from symbol text.
    ///
    /// Attributes may appear in any order; unknown attributes are ignored.
    /// An unexpected marker value is accepted and logged.
    pub fn deserialize(text: &str) -> Result<Self, EnvelopeError> {
        let text = text.trim();
        let rest = text
            .strip_prefix(OPEN_TAG)
            .ok_or_else(|| malformed("missing <doc opening tag"))?;
        let body = rest
            .strip_suffix(CLOSE_TAG)
            .ok_or_else(|| malformed("missing </doc> closing tag"))?;

        let (attrs, raw_content) = parse_start_tag(body)?;

        let sequence_index = parse_number(ATTR_PAGE, required(&attrs, ATTR_PAGE)?)?;
        let chunk_index = parse_number(ATTR_CHUNK, required(&attrs, ATTR_CHUNK)?)?;
        let chunk_count = parse_number(ATTR_TOTAL, required(&attrs, ATTR_TOTAL)?)?;
        let marker = required(&attrs, ATTR_MARKER)?.to_string();
        let source = required(&attrs, ATTR_FILE)?.to_string();

        let chunk_index = u32::try_from(chunk_index)
            .map_err(|_| malformed(format!("chunk index {} out of range", chunk_index)))?;
        let chunk_count = u32::try_from(chunk_count)
            .map_err(|_| malformed(format!("chunk count {} out of range", chunk_count)))?;

        if sequence_index == 0 {
            return Err(malformed("page must be positive"));
        }
        if chunk_count == 0 {
            return Err(malformed("total must be positive"));
        }
        if chunk_index == 0 || chunk_index > chunk_count {
            return Err(malformed(format!(
                "chunk {} outside 1..={}",
                chunk_index, chunk_count
            )));
        }
        if marker.is_empty() {
            return Err(malformed("empty provenance marker"));
        }
        if marker != DEFAULT_MARKER {
            tracing::warn!(marker = %marker, "unexpected envelope marker");
        }

        Ok(Self {
            sequence_index,
            source,
            chunk_index,
            chunk_count,
            payload: unescape(raw_content)?,
            marker,
        })
    }
}

/// Serialized size of an envelope with an empty payload, numeric fields
/// rendered at `width` digits.
pub fn overhead(source: &str, marker: &str, width: IndexWidth) -> usize {
    let seq = "9".repeat(width.sequence);
    let idx = "9".repeat(width.chunk);
    render(&seq, marker, source, &idx, &idx, "").len()
}

fn render(page: &str, marker: &str, file: &str, chunk: &str, total: &str, payload: &str) -> String {
    format!(
        r#"{OPEN_TAG} {ATTR_PAGE}="{}" {ATTR_MARKER}="{}" {ATTR_FILE}="{}" {ATTR_CHUNK}="{}" {ATTR_TOTAL}="{}">{}{CLOSE_TAG}"#,
        page,
        escape(marker),
        escape(file),
        chunk,
        total,
        escape(payload),
    )
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Split `body` (text after `<doc`, before `</doc>`) into attributes and raw content.
fn parse_start_tag(body: &str) -> Result<(Vec<(&str, String)>, &str), EnvelopeError> {
    let mut attrs: Vec<(&str, String)> = Vec::with_capacity(5);
    let mut rest = body;

    loop {
        let trimmed = rest.trim_start();
        if let Some(content) = trimmed.strip_prefix('>') {
            return Ok((attrs, content));
        }
        if trimmed.is_empty() {
            return Err(malformed("unterminated start tag"));
        }
        if trimmed.len() == rest.len() {
            return Err(malformed("attributes must be separated by whitespace"));
        }

        let name_end = trimmed
            .find(|c: char| c == '=' || c.is_whitespace())
            .ok_or_else(|| malformed("attribute without value"))?;
        let name = &trimmed[..name_end];
        if name.is_empty()
            || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(malformed(format!("invalid attribute name '{}'", name)));
        }
        let value = trimmed[name_end..]
            .trim_start()
            .strip_prefix('=')
            .ok_or_else(|| malformed(format!("attribute '{}' has no value", name)))?
            .trim_start();
        let quote = value
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| malformed(format!("attribute '{}' is not quoted", name)))?;
        let quoted = &value[1..];
        let close = quoted
            .find(quote)
            .ok_or_else(|| malformed(format!("unterminated attribute '{}'", name)))?;
        if attrs.iter().any(|(n, _)| *n == name) {
            return Err(malformed(format!("duplicate attribute '{}'", name)));
        }
        attrs.push((name, unescape(&quoted[..close])?));
        rest = &quoted[close + 1..];
    }
}

fn required<'a>(attrs: &'a [(&str, String)], name: &str) -> Result<&'a str, EnvelopeError> {
    attrs
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| malformed(format!("missing required attribute '{}'", name)))
}

fn parse_number(name: &str, value: &str) -> Result<u64, EnvelopeError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(format!("attribute '{}' is not an integer: '{}'", name, value)));
    }
    value
        .parse()
        .map_err(|_| malformed(format!("attribute '{}' overflows: '{}'", name, value)))
}

fn escape(raw: &str) -> Cow<'_, str> {
    if !raw.contains(|c| matches!(c, '&' | '<' | '>' | '"')) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 16);
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn unescape(raw: &str) -> Result<String, EnvelopeError> {
    if raw.contains('<') {
        return Err(malformed("unexpected '<' in envelope text"));
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let semi = tail
            .find(';')
            .ok_or_else(|| malformed("unterminated character entity"))?;
        let ch = match &tail[..=semi] {
            "&amp;" => '&',
            "&lt;" => '<',
            "&gt;" => '>',
            "&quot;" => '"',
            "&apos;" => '\'',
            other => char_reference(other)
                .ok_or_else(|| malformed(format!("unknown character entity '{}'", other)))?,
        };
        out.push(ch);
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// `&#NN;` or `&#xHH;` to the character it names.
fn char_reference(entity: &str) -> Option<char> {
    let body = entity.strip_prefix("&#")?.strip_suffix(';')?;
    let code = match body.strip_prefix('x').or_else(|| body.strip_prefix('X')) {
        Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            u32::from_str_radix(hex, 16).ok()?
        }
        Some(_) => return None,
        None if !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit()) => body.parse().ok()?,
        None => return None,
    };
    char::from_u32(code).filter(|c| *c != '\0')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            sequence_index: 42,
            source: "gpt-2/src/model.py".into(),
            chunk_index: 3,
            chunk_count: 12,
            payload: "aGVsbG8gd29ybGQ=".into(),
            marker: DEFAULT_MARKER.into(),
        }
    }

    #[test]
    fn test_serialize_matches_wire_template() {
        assert_eq!(
            sample().serialize(),
            r#"<doc page="42" x="@tariusdamon" file="gpt-2/src/model.py" chunk="3" total="12">aGVsbG8gd29ybGQ=</doc>"#
        );
    }

    #[test]
    fn test_deserialize_recovers_fields() {
        let env = sample();
        let parsed = Envelope::deserialize(&env.serialize()).expect("should parse");
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_deserialize_tolerates_whitespace_and_attribute_order() {
        let text = "  <doc total=\"2\" chunk=\"1\" file=\"a.bin\" x=\"@tariusdamon\" page=\"9\" extra=\"y\">QUJD</doc>\n";
        let env = Envelope::deserialize(text).expect("should parse");
        assert_eq!(env.sequence_index, 9);
        assert_eq!(env.source, "a.bin");
        assert_eq!((env.chunk_index, env.chunk_count), (1, 2));
        assert_eq!(env.payload, "QUJD");
    }

    #[test]
    fn test_empty_payload() {
        let mut env = sample();
        env.payload.clear();
        let text = env.serialize();
        assert!(text.ends_with("\"></doc>"));
        assert_eq!(Envelope::deserialize(&text).unwrap().payload, "");
    }

    #[test]
    fn test_identifier_with_markup_characters_is_escaped() {
        let mut env = sample();
        env.source = r#"we"ird <name> & co.txt"#.into();
        let text = env.serialize();
        assert!(text.contains("we&quot;ird &lt;name&gt; &amp; co.txt"));
        assert_eq!(text.len(), env.serialized_len());
        assert_eq!(Envelope::deserialize(&text).unwrap().source, env.source);
    }

    #[test]
    fn test_serialized_len_matches() {
        let env = sample();
        assert_eq!(env.serialize().len(), env.serialized_len());
    }

    #[test]
    fn test_overhead_grows_with_digit_width() {
        let narrow = overhead("f", DEFAULT_MARKER, IndexWidth::default());
        let wide = overhead("f", DEFAULT_MARKER, IndexWidth { sequence: 5, chunk: 4 });
        assert_eq!(wide - narrow, 2 + 1 + 1);
        // 50 fixed template bytes + marker + file + 3 * 3 digits
        assert_eq!(narrow, 50 + DEFAULT_MARKER.len() + 1 + 9);
    }

    #[test]
    fn test_index_width_covering() {
        assert_eq!(IndexWidth::covering(7, 2), IndexWidth::default());
        assert_eq!(IndexWidth::covering(12_345, 1_000), IndexWidth { sequence: 5, chunk: 4 });
        assert_eq!(digits(0), 1);
        assert_eq!(digits(9), 1);
        assert_eq!(digits(10), 2);
        assert_eq!(digits(u64::MAX), 20);
    }

    fn assert_malformed(text: &str) {
        match Envelope::deserialize(text) {
            Err(EnvelopeError::Malformed { .. }) => {}
            other => panic!("expected Malformed for {:?}, got {:?}", text, other),
        }
    }

    #[test]
    fn test_rejects_structural_damage() {
        assert_malformed("");
        assert_malformed("hello world");
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a" chunk="1" total="1">QQ=="#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a" chunk="1" total="1"</doc>"#);
        assert_malformed(r#"<docpage="1" x="@tariusdamon" file="a" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page=1 x="@tariusdamon" file="a" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" page="2" x="@tariusdamon" file="a" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a" chunk="1" total="1"><b>QQ==</b></doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a&nbsp;" chunk="1" total="1">QQ==</doc>"#);
    }

    #[test]
    fn test_accepts_xml_quoting_spacing_and_char_references() {
        let env = Envelope::deserialize(
            "<doc page = '7' x='@tariusdamon' file=\"a&#38;b.txt\" chunk ='1' total= \"2\">QUJD&#x3D;</doc>",
        )
        .unwrap();
        assert_eq!(env.sequence_index, 7);
        assert_eq!(env.source, "a&b.txt");
        assert_eq!(env.chunk_index, 1);
        assert_eq!(env.chunk_count, 2);
        assert_eq!(env.payload, "QUJD=");

        let quote_inside = Envelope::deserialize(
            r#"<doc page="1" x="@tariusdamon" file='say "hi".txt' chunk="1" total="1">QQ==</doc>"#,
        )
        .unwrap();
        assert_eq!(quote_inside.source, r#"say "hi".txt"#);
    }

    #[test]
    fn test_rejects_bad_quoting_and_char_references() {
        assert_malformed(r#"<doc page="1' x="@tariusdamon" file="a" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page "1" x="@tariusdamon" file="a" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a&#;" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a&#xZZ;" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a&#0;" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a&#xD800;" chunk="1" total="1">QQ==</doc>"#);
    }

    #[test]
    fn test_rejects_missing_or_bad_numbers() {
        assert_malformed(r#"<doc x="@tariusdamon" file="a" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a" chunk="one" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a" chunk="+1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a" chunk="-1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a" chunk="1" total="99999999999">QQ==</doc>"#);
    }

    #[test]
    fn test_rejects_out_of_range_positions() {
        assert_malformed(r#"<doc page="0" x="@tariusdamon" file="a" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a" chunk="0" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a" chunk="3" total="2">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="@tariusdamon" file="a" chunk="1" total="0">QQ==</doc>"#);
    }

    #[test]
    fn test_marker_presence_is_required_but_value_is_lenient() {
        assert_malformed(r#"<doc page="1" file="a" chunk="1" total="1">QQ==</doc>"#);
        assert_malformed(r#"<doc page="1" x="" file="a" chunk="1" total="1">QQ==</doc>"#);
        let env = Envelope::deserialize(r#"<doc page="1" x="@someone" file="a" chunk="1" total="1">QQ==</doc>"#)
            .expect("foreign marker is accepted");
        assert_eq!(env.marker, "@someone");
    }
}
