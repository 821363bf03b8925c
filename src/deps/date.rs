//! `dayjs`: immutable date wrappers over epoch milliseconds, local time.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use rquickjs::{Ctx, Function, Object, Value};

use super::HostModule;
use crate::js::apply_glue;

pub struct DayjsModule;

const GLUE: &str = r#"
(function (native) {
    const UNIT_MS = {
        millisecond: 1, ms: 1,
        second: 1000, s: 1000,
        minute: 60000, m: 60000,
        hour: 3600000, h: 3600000,
        day: 86400000, d: 86400000,
        week: 604800000, w: 604800000,
    };
    function wrap(ms) {
        return {
            valueOf() { return ms; },
            unix() { return Math.floor(ms / 1000); },
            isValid() { return !Number.isNaN(ms); },
            toDate() { return new Date(ms); },
            toISOString() { return new Date(ms).toISOString(); },
            toJSON() { return Number.isNaN(ms) ? null : new Date(ms).toISOString(); },
            format(pattern) {
                return native.format(ms, pattern === undefined ? 'YYYY-MM-DDTHH:mm:ssZ' : String(pattern));
            },
            add(amount, unit) { return wrap(ms + Number(amount) * step(unit)); },
            subtract(amount, unit) { return wrap(ms - Number(amount) * step(unit)); },
        };
    }
    function step(unit) {
        const key = unit === undefined ? 'ms' : String(unit);
        const size = UNIT_MS[key] || UNIT_MS[key.replace(/s$/, '')];
        if (size === undefined) {
            throw new TypeError('unsupported unit: ' + key);
        }
        return size;
    }
    function dayjs(input) {
        if (input === undefined) {
            return wrap(native.now());
        }
        if (typeof input === 'number') {
            return wrap(input);
        }
        if (input instanceof Date) {
            return wrap(input.getTime());
        }
        if (input !== null && typeof input === 'object' && typeof input.valueOf === 'function') {
            return wrap(Number(input.valueOf()));
        }
        return wrap(native.parse(String(input)));
    }
    dayjs.unix = (seconds) => wrap(Number(seconds) * 1000);
    return dayjs;
})
"#;

impl HostModule for DayjsModule {
    fn name(&self) -> &'static str {
        "dayjs"
    }

    fn instantiate<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let native = Object::new(ctx.clone())?;
        native.set(
            "now",
            Function::new(ctx.clone(), || Local::now().timestamp_millis() as f64)?,
        )?;
        native.set("parse", Function::new(ctx.clone(), |text: String| parse(&text))?)?;
        native.set(
            "format",
            Function::new(ctx.clone(), |ms: f64, pattern: String| format(ms, &pattern))?,
        )?;
        apply_glue(ctx, GLUE, native)
    }
}

/// Parse a date string to epoch milliseconds; `NaN` when unrecognized.
pub fn parse(text: &str) -> f64 {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return parsed.timestamp_millis() as f64;
    }
    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"]
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
        .or_else(|| {
            ["%Y-%m-%d", "%Y/%m/%d"]
                .iter()
                .find_map(|layout| NaiveDate::parse_from_str(text, layout).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        });
    naive
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map_or(f64::NAN, |local| local.timestamp_millis() as f64)
}

/// Render epoch milliseconds with a dayjs pattern in local time.
///
/// Supported tokens: `YYYY YY M MM D DD H HH h hh m mm s ss SSS A a Z ZZ`;
/// `[...]` escapes literal text.
pub fn format(ms: f64, pattern: &str) -> String {
    if !ms.is_finite() {
        return "Invalid Date".to_string();
    }
    let Some(at) = Local.timestamp_millis_opt(ms as i64).single() else {
        return "Invalid Date".to_string();
    };

    const TOKENS: [&str; 19] = [
        "YYYY", "SSS", "YY", "MM", "DD", "HH", "hh", "mm", "ss", "ZZ", "M", "D", "H", "h", "m",
        "s", "A", "a", "Z",
    ];

    let mut out = String::with_capacity(pattern.len() + 8);
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('[') {
            if let Some(close) = stripped.find(']') {
                out.push_str(&stripped[..close]);
                rest = &stripped[close + 1..];
                continue;
            }
        }
        match TOKENS.iter().find(|token| rest.starts_with(*token)) {
            Some(token) => {
                out.push_str(&render_token(&at, token));
                rest = &rest[token.len()..];
            }
            None => {
                let mut chars = rest.chars();
                if let Some(ch) = chars.next() {
                    out.push(ch);
                }
                rest = chars.as_str();
            }
        }
    }
    out
}

fn render_token(at: &DateTime<Local>, token: &str) -> String {
    match token {
        "YYYY" => at.format("%Y").to_string(),
        "YY" => at.format("%y").to_string(),
        "MM" => at.format("%m").to_string(),
        "M" => at.format("%-m").to_string(),
        "DD" => at.format("%d").to_string(),
        "D" => at.format("%-d").to_string(),
        "HH" => at.format("%H").to_string(),
        "H" => at.format("%-H").to_string(),
        "hh" => at.format("%I").to_string(),
        "h" => at.format("%-I").to_string(),
        "mm" => at.format("%M").to_string(),
        "m" => at.format("%-M").to_string(),
        "ss" => at.format("%S").to_string(),
        "s" => at.format("%-S").to_string(),
        "SSS" => at.format("%3f").to_string(),
        "A" => at.format("%p").to_string(),
        "a" => at.format("%P").to_string(),
        "Z" => at.format("%:z").to_string(),
        "ZZ" => at.format("%z").to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::with_ctx;
    use super::*;

    fn local_ms(text: &str) -> f64 {
        parse(text)
    }

    #[test]
    fn formats_common_patterns() {
        let ms = local_ms("2024-03-05 07:08:09");
        assert_eq!(format(ms, "YYYY-MM-DD HH:mm:ss"), "2024-03-05 07:08:09");
        assert_eq!(format(ms, "YY/M/D H:m:s"), "24/3/5 7:8:9");
        assert_eq!(format(ms, "[Year] YYYY"), "Year 2024");
        assert_eq!(format(ms + 123.0, "SSS"), "123");
    }

    #[test]
    fn parse_accepts_common_layouts() {
        assert_eq!(parse("1970-01-01T00:00:00Z"), 0.0);
        assert!(parse("2024-01-02").is_finite());
        assert!(parse("2024/01/02 10:00:00").is_finite());
        assert!(parse("yesterday").is_nan());
    }

    #[test]
    fn invalid_dates_render_as_such() {
        assert_eq!(format(f64::NAN, "YYYY"), "Invalid Date");
    }

    #[test]
    fn module_wraps_timestamps() {
        with_ctx(|ctx| {
            let dayjs = DayjsModule.instantiate(&ctx).unwrap();
            let check: Function = ctx
                .eval(
                    "(function (dayjs) { const d = dayjs(86400000); \
                     return [d.valueOf(), d.unix(), d.add(1, 'day').valueOf(), \
                     dayjs.unix(2).valueOf(), dayjs('nope').isValid()].join(','); })",
                )
                .unwrap();
            let out: String = check.call((dayjs,)).unwrap();
            assert_eq!(out, "86400000,86400,172800000,2000,false");
        });
    }
}
