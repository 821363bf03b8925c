//! Helpers for moving values across the QuickJS boundary.
//!
//! Payloads cross as JSON text: the engine's own `JSON.parse` /
//! `JSON.stringify` keep number and string semantics identical to what
//! provider code observes.

use rquickjs::convert::Coerced;
use rquickjs::{CatchResultExt, Ctx, FromJs, Function, Object, Value};

/// Convert a JSON value into a JS value owned by `ctx`.
pub fn json_to_js<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> rquickjs::Result<Value<'js>> {
    match value {
        serde_json::Value::Null => Ok(Value::new_null(ctx.clone())),
        other => ctx.json_parse(other.to_string()),
    }
}

/// Convert a JS value into JSON. `undefined` and functions become `null`.
pub fn js_to_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<serde_json::Value> {
    if value.is_undefined() || value.is_null() {
        return Ok(serde_json::Value::Null);
    }
    let Some(text) = ctx.json_stringify(value)? else {
        return Ok(serde_json::Value::Null);
    };
    let text = text.to_string()?;
    serde_json::from_str(&text)
        .map_err(|err| rquickjs::Exception::throw_message(ctx, &format!("invalid JSON: {err}")))
}

/// Render a JS value for log output.
pub fn describe<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> String {
    if let Some(text) = value.as_string() {
        return text.to_string().unwrap_or_default();
    }
    if value.is_object() && !value.is_function() {
        if let Ok(Some(json)) = ctx.json_stringify(value.clone()) {
            if let Ok(text) = json.to_string() {
                // Errors and class instances stringify to `{}`; coercion says more.
                if text != "{}" {
                    return text;
                }
            }
        }
    }
    Coerced::<String>::from_js(ctx, value)
        .map(|coerced| coerced.0)
        .unwrap_or_else(|_| "<unprintable>".to_string())
}

/// Evaluate a glue factory `(function (native) { ... })` and apply it.
///
/// Glue is an expression, so evaluating it defines no globals.
pub fn apply_glue<'js>(
    ctx: &Ctx<'js>,
    glue: &str,
    native: Object<'js>,
) -> rquickjs::Result<Value<'js>> {
    let factory: Function = ctx.eval(glue)?;
    factory.call((native,))
}

/// Freeze an object in place with the engine's `Object.freeze`.
pub fn freeze<'js>(ctx: &Ctx<'js>, object: &Object<'js>) -> rquickjs::Result<()> {
    let object_ctor: Object = ctx.globals().get("Object")?;
    let freeze: Function = object_ctor.get("freeze")?;
    freeze.call::<_, Value>((object.clone(),))?;
    Ok(())
}

/// Turn a thrown JS value into a printable message.
pub fn caught<'js, T>(ctx: &Ctx<'js>, result: rquickjs::Result<T>) -> Result<T, String> {
    result.catch(ctx).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};
    use serde_json::json;

    fn with_ctx<R>(f: impl FnOnce(Ctx<'_>) -> R) -> R {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(f)
    }

    #[test]
    fn json_round_trips_through_engine() {
        with_ctx(|ctx| {
            let input = json!({"total": 1, "data": [{"id": "a"}], "flag": true});
            let value = json_to_js(&ctx, &input).unwrap();
            assert!(value.is_object());
            assert_eq!(js_to_json(&ctx, value).unwrap(), input);
        });
    }

    #[test]
    fn undefined_becomes_null() {
        with_ctx(|ctx| {
            let value = Value::new_undefined(ctx.clone());
            assert_eq!(js_to_json(&ctx, value).unwrap(), serde_json::Value::Null);
            let func: Value = ctx.eval("(function () {})").unwrap();
            assert_eq!(js_to_json(&ctx, func).unwrap(), serde_json::Value::Null);
        });
    }

    #[test]
    fn describe_prefers_readable_forms() {
        with_ctx(|ctx| {
            let text: Value = ctx.eval("'plain'").unwrap();
            assert_eq!(describe(&ctx, text), "plain");
            let object: Value = ctx.eval("({a: 1})").unwrap();
            assert_eq!(describe(&ctx, object), r#"{"a":1}"#);
            let error: Value = ctx.eval("new Error('boom')").unwrap();
            assert_eq!(describe(&ctx, error), "Error: boom");
            let number: Value = ctx.eval("42").unwrap();
            assert_eq!(describe(&ctx, number), "42");
        });
    }

    #[test]
    fn glue_does_not_leak_globals() {
        with_ctx(|ctx| {
            let native = Object::new(ctx.clone()).unwrap();
            native.set("answer", 42).unwrap();
            let api = apply_glue(&ctx, "(function (native) { return { value: native.answer }; })", native)
                .unwrap();
            let api = api.into_object().unwrap();
            assert_eq!(api.get::<_, i32>("value").unwrap(), 42);
            assert!(!ctx.globals().contains_key("native").unwrap());
        });
    }

    #[test]
    fn frozen_objects_reject_writes_in_strict_code() {
        with_ctx(|ctx| {
            let object = Object::new(ctx.clone()).unwrap();
            object.set("lang", "zh-CN").unwrap();
            freeze(&ctx, &object).unwrap();
            let writer: Function = ctx
                .eval("(function (o) { 'use strict'; o.lang = 'en'; })")
                .unwrap();
            assert!(writer.call::<_, ()>((object.clone(),)).is_err());
            assert_eq!(object.get::<_, String>("lang").unwrap(), "zh-CN");
        });
    }
}
