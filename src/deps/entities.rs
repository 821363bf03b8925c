//! `he`: HTML entity encoding and lenient decoding.

use quick_xml::escape::{escape, resolve_html5_entity, unescape_with};
use rquickjs::{Ctx, Function, Object, Value};

use super::HostModule;

pub struct HeModule;

/// Longest entity reference considered, `&` and `;` included.
const MAX_ENTITY_LEN: usize = 40;

impl HostModule for HeModule {
    fn name(&self) -> &'static str {
        "he"
    }

    fn instantiate<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let he = Object::new(ctx.clone())?;
        he.set(
            "decode",
            Function::new(ctx.clone(), |text: String| decode(&text))?,
        )?;
        he.set(
            "unescape",
            Function::new(ctx.clone(), |text: String| decode(&text))?,
        )?;
        he.set(
            "encode",
            Function::new(ctx.clone(), |text: String| encode(&text))?,
        )?;
        he.set(
            "escape",
            Function::new(ctx.clone(), |text: String| encode(&text))?,
        )?;
        Ok(he.into_value())
    }
}

/// Decode named and numeric references. Anything unrecognized is kept as-is.
pub fn decode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let reference = tail
            .find(';')
            .filter(|&end| end < MAX_ENTITY_LEN)
            .map(|end| &tail[..=end]);
        let decoded = reference
            .and_then(|reference| {
                unescape_with(reference, resolve_html5_entity)
                    .ok()
                    .map(|decoded| (reference.len(), decoded.into_owned()))
            })
            .or_else(|| decode_unterminated(tail));
        match decoded {
            Some((consumed, decoded)) => {
                out.push_str(&decoded);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Named references browsers accept without the trailing `;`.
const LEGACY_NAMES: &[&str] = &[
    "AElig", "AMP", "Aacute", "Acirc", "Agrave", "Aring", "Atilde", "Auml", "COPY", "Ccedil",
    "ETH", "Eacute", "Ecirc", "Egrave", "Euml", "GT", "Iacute", "Icirc", "Igrave", "Iuml", "LT",
    "Ntilde", "Oacute", "Ocirc", "Ograve", "Oslash", "Otilde", "Ouml", "QUOT", "REG", "THORN",
    "Uacute", "Ucirc", "Ugrave", "Uuml", "Yacute", "aacute", "acirc", "acute", "aelig", "agrave",
    "amp", "aring", "atilde", "auml", "brvbar", "ccedil", "cedil", "cent", "copy", "curren", "deg",
    "divide", "eacute", "ecirc", "egrave", "eth", "euml", "frac12", "frac14", "frac34", "gt",
    "iacute", "icirc", "iexcl", "igrave", "iquest", "iuml", "laquo", "lt", "macr", "micro",
    "middot", "nbsp", "not", "ntilde", "oacute", "ocirc", "ograve", "ordf", "ordm", "oslash",
    "otilde", "ouml", "para", "plusmn", "pound", "quot", "raquo", "reg", "sect", "shy", "sup1",
    "sup2", "sup3", "szlig", "thorn", "times", "uacute", "ucirc", "ugrave", "uml", "uuml",
    "yacute", "yen", "yuml",
];

/// Decode a reference at the start of `tail` that has no `;`: a legacy
/// named entity (longest match wins) or a numeric reference.
fn decode_unterminated(tail: &str) -> Option<(usize, String)> {
    let body = &tail[1..];
    if let Some(numeric) = body.strip_prefix('#') {
        let (digits, radix, prefix) = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => (hex, 16, 3),
            None => (numeric, 10, 2),
        };
        let len = digits
            .find(|c: char| !c.is_digit(radix))
            .unwrap_or(digits.len());
        if len == 0 {
            return None;
        }
        let code = u32::from_str_radix(&digits[..len], radix).ok()?;
        let decoded = char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
        return Some((prefix + len, decoded.to_string()));
    }
    let name = LEGACY_NAMES
        .iter()
        .filter(|name| body.starts_with(**name))
        .max_by_key(|name| name.len())?;
    let decoded = resolve_html5_entity(name)?;
    Some((name.len() + 1, decoded.to_string()))
}

pub fn encode(text: &str) -> String {
    escape(text).into_owned()
}
