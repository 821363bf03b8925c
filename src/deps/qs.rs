//! `qs`: query-string encoding with bracket notation for nesting.

use rquickjs::{Ctx, Exception, Function, Object, Value};
use serde_json::{Map, Value as Json};

use super::HostModule;
use crate::js::apply_glue;

pub struct QsModule;

const GLUE: &str = r#"
(function (native) {
    return {
        stringify(value) {
            if (value === undefined || value === null) {
                return '';
            }
            return native.stringify(JSON.stringify(value));
        },
        parse(text) {
            if (text === undefined || text === null) {
                return {};
            }
            return JSON.parse(native.parse(String(text)));
        },
    };
})
"#;

impl HostModule for QsModule {
    fn name(&self) -> &'static str {
        "qs"
    }

    fn instantiate<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let native = Object::new(ctx.clone())?;
        native.set(
            "stringify",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, json: String| -> rquickjs::Result<String> {
                    let value: Json = serde_json::from_str(&json)
                        .map_err(|err| Exception::throw_type(&ctx, &err.to_string()))?;
                    Ok(stringify(&value))
                },
            )?,
        )?;
        native.set(
            "parse",
            Function::new(ctx.clone(), |text: String| parse(&text).to_string())?,
        )?;
        apply_glue(ctx, GLUE, native)
    }
}

/// Encode a JSON object as a query string. `a[b]=c` for nested objects,
/// `a[0]=c` for arrays; `null` encodes as an empty value.
pub fn stringify(value: &Json) -> String {
    let mut pairs = Vec::new();
    match value {
        Json::Object(map) => {
            for (key, child) in map {
                collect_pairs(key, child, &mut pairs);
            }
        }
        Json::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                collect_pairs(&index.to_string(), child, &mut pairs);
            }
        }
        _ => {}
    }
    pairs
        .into_iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(&key), urlencoding::encode(&value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn collect_pairs(prefix: &str, value: &Json, out: &mut Vec<(String, String)>) {
    match value {
        Json::Object(map) => {
            for (key, child) in map {
                collect_pairs(&format!("{prefix}[{key}]"), child, out);
            }
        }
        Json::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                collect_pairs(&format!("{prefix}[{index}]"), child, out);
            }
        }
        Json::Null => out.push((prefix.to_string(), String::new())),
        Json::String(text) => out.push((prefix.to_string(), text.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

/// Decode a query string into nested objects. `a[]=x` appends to an array.
pub fn parse(text: &str) -> Json {
    let mut root = Map::new();
    let text = text.strip_prefix('?').unwrap_or(text);
    for pair in text.split('&').filter(|pair| !pair.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(raw_key);
        let value = Json::String(decode_component(raw_value));
        let segments = key_segments(&key);
        insert(&mut root, &segments, value);
    }
    Json::Object(root)
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

fn key_segments(key: &str) -> Vec<String> {
    let Some(open) = key.find('[') else {
        return vec![key.to_string()];
    };
    if open == 0 || !key.ends_with(']') {
        return vec![key.to_string()];
    }
    let mut segments = vec![key[..open].to_string()];
    let mut rest = &key[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(close) = stripped.find(']') else {
            break;
        };
        segments.push(stripped[..close].to_string());
        rest = &stripped[close + 1..];
    }
    segments
}

fn insert(map: &mut Map<String, Json>, segments: &[String], value: Json) {
    let Some((head, tail)) = segments.split_first() else {
        return;
    };
    if tail.is_empty() {
        match map.get_mut(head) {
            Some(Json::Array(items)) => items.push(value),
            Some(existing) => {
                // Repeated flat keys collect into an array.
                let previous = existing.take();
                *existing = Json::Array(vec![previous, value]);
            }
            None => {
                map.insert(head.clone(), value);
            }
        }
        return;
    }

    if tail[0].is_empty() {
        let slot = map
            .entry(head.clone())
            .or_insert_with(|| Json::Array(Vec::new()));
        match slot {
            Json::Array(items) => items.push(value),
            other => *other = Json::Array(vec![value]),
        }
        return;
    }

    let slot = map
        .entry(head.clone())
        .or_insert_with(|| Json::Object(Map::new()));
    if !slot.is_object() {
        *slot = Json::Object(Map::new());
    }
    if let Json::Object(child) = slot {
        insert(child, tail, value);
    }
}
