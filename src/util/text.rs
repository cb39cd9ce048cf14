use std::borrow::Cow;

use quick_xml::escape::resolve_html5_entity;

/// Longest entity body we look for a terminating `;` in (`&CounterClockwiseContourIntegral;`).
const MAX_ENTITY_LEN: usize = 33;

/// Decodes HTML character references in `s`.
///
/// Handles the full HTML5 named entity table plus decimal (`&#38;`) and
/// hexadecimal (`&#x26;`) references. Anything that does not decode - a bare
/// `&`, an unknown name, an out-of-range code point - is copied through
/// verbatim, so this never fails.
///
/// Returns `Cow::Borrowed` when the input contains no `&`.
///
/// # Examples
///
/// ```
/// use gator::util::unescape_html;
///
/// assert_eq!(unescape_html("Test &amp; Item"), "Test & Item");
/// assert_eq!(unescape_html("caf&eacute; &#8212; &#x2603;"), "café — ☃");
/// assert_eq!(unescape_html("AT&T"), "AT&T");
/// ```
pub fn unescape_html(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        match decode_entity(tail) {
            Some((text, consumed)) => {
                out.push_str(&text);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);

    Cow::Owned(out)
}

/// Decodes the reference at the start of `s` (the text just past `&`).
///
/// Returns the replacement and the number of bytes consumed, `;` included.
fn decode_entity(s: &str) -> Option<(Cow<'static, str>, usize)> {
    let end = s
        .char_indices()
        .take(MAX_ENTITY_LEN)
        .find(|&(_, c)| c == ';')
        .map(|(i, _)| i)?;
    let name = &s[..end];

    let text = match name.strip_prefix('#') {
        Some(number) => {
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse::<u32>().ok()?,
            };
            let c = match code {
                0 => char::REPLACEMENT_CHARACTER,
                _ => char::from_u32(code)?,
            };
            Cow::Owned(c.to_string())
        }
        None => Cow::Borrowed(resolve_html5_entity(name)?),
    };

    Some((text, end + 1))
}

/// Removes markup tags, keeping only the text between them, and trims the result.
///
/// A single pass tracks whether we are inside a `<...>` tag and emits every
/// character that is not. No attempt is made to understand comments, scripts
/// or `>` inside attribute values.
///
/// # Examples
///
/// ```
/// use gator::util::strip_tags;
///
/// assert_eq!(strip_tags("  <p>Hello <b>world</b></p>\n"), "Hello world");
/// ```
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;

    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }

    out.trim().to_string()
}

/// Converts an HTML fragment to plain text: unescape entities, then strip tags, then trim.
///
/// Unescaping runs first so that entity-encoded markup (`&lt;p&gt;`) is
/// stripped as well.
pub fn html_to_text(s: &str) -> String {
    strip_tags(&unescape_html(s))
}
