//! `big-integer`: arbitrary-precision integers carried as decimal strings.

use num_bigint::{BigInt, Sign};
use rquickjs::{Ctx, Exception, Function, Object, Value};

use super::HostModule;
use crate::js::apply_glue;

/// Integer library bounded by the engine's memory budget.
///
/// Arithmetic runs on the host heap, outside the QuickJS allocator, so
/// results are size-checked before they are computed.
#[derive(Debug, Clone, Copy)]
pub struct BigIntegerModule {
    max_bits: u64,
}

impl BigIntegerModule {
    /// Cap result size at the bit count of `memory_limit` bytes.
    pub fn new(memory_limit: usize) -> Self {
        let bytes = u64::try_from(memory_limit).unwrap_or(u64::MAX);
        Self {
            max_bits: bytes.saturating_mul(8).max(MIN_RESULT_BITS),
        }
    }

    pub fn max_bits(&self) -> u64 {
        self.max_bits
    }
}

impl Default for BigIntegerModule {
    fn default() -> Self {
        let sandbox = crate::config::SandboxConfig::default();
        Self::new(sandbox.memory_limit_mb.saturating_mul(1024 * 1024))
    }
}

/// Floor for the result cap so tiny engine limits still allow ordinary math.
const MIN_RESULT_BITS: u64 = 1 << 16;

const GLUE: &str = r#"
(function (native) {
    function digits(value, radix) {
        if (value !== null && typeof value === 'object' && typeof value.value === 'string') {
            return value.value;
        }
        if (typeof value === 'number') {
            return BigInt(Math.trunc(value)).toString();
        }
        if (typeof value === 'bigint') {
            return value.toString();
        }
        return native.normalize(String(value), radix === undefined ? 10 : Number(radix));
    }
    function wrap(text) {
        const binary = (op) => (other) => wrap(native.binary(op, text, digits(other)));
        const self = {
            value: text,
            add: binary('add'),
            plus: binary('add'),
            subtract: binary('subtract'),
            minus: binary('subtract'),
            multiply: binary('multiply'),
            times: binary('multiply'),
            divide: binary('divide'),
            over: binary('divide'),
            mod: binary('mod'),
            pow: binary('pow'),
            and: binary('and'),
            or: binary('or'),
            xor: binary('xor'),
            shiftLeft: binary('shiftLeft'),
            shiftRight: binary('shiftRight'),
            compare(other) { return native.compare(text, digits(other)); },
            equals(other) { return self.compare(other) === 0; },
            greater(other) { return self.compare(other) > 0; },
            lesser(other) { return self.compare(other) < 0; },
            isZero() { return text === '0'; },
            isNegative() { return text.startsWith('-'); },
            toString(radix) { return native.toRadix(text, radix === undefined ? 10 : Number(radix)); },
            toJSNumber() { return Number(text); },
            valueOf() { return Number(text); },
            toJSON() { return text; },
        };
        return self;
    }
    function bigInt(value, radix) {
        if (value === undefined) {
            return wrap('0');
        }
        return wrap(digits(value, radix));
    }
    bigInt.zero = wrap('0');
    bigInt.one = wrap('1');
    bigInt.minusOne = wrap('-1');
    return bigInt;
})
"#;

impl HostModule for BigIntegerModule {
    fn name(&self) -> &'static str {
        "big-integer"
    }

    fn instantiate<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let native = Object::new(ctx.clone())?;
        native.set(
            "normalize",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, text: String, radix: u32| -> rquickjs::Result<String> {
                    parse(&text, radix)
                        .map(|value| value.to_string())
                        .ok_or_else(|| Exception::throw_type(&ctx, &format!("invalid integer: {text}")))
                },
            )?,
        )?;
        let max_bits = self.max_bits;
        native.set(
            "binary",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, op: String, left: String, right: String| -> rquickjs::Result<String> {
                    let (Some(left), Some(right)) = (parse(&left, 10), parse(&right, 10)) else {
                        return Err(Exception::throw_type(&ctx, "invalid integer operand"));
                    };
                    binary(&op, &left, &right, max_bits)
                        .map(|value| value.to_string())
                        .map_err(|message| Exception::throw_range(&ctx, &message))
                },
            )?,
        )?;
        native.set(
            "compare",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, left: String, right: String| -> rquickjs::Result<i32> {
                    let (Some(left), Some(right)) = (parse(&left, 10), parse(&right, 10)) else {
                        return Err(Exception::throw_type(&ctx, "invalid integer operand"));
                    };
                    Ok(left.cmp(&right) as i32)
                },
            )?,
        )?;
        native.set(
            "toRadix",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, text: String, radix: u32| -> rquickjs::Result<String> {
                    if !(2..=36).contains(&radix) {
                        return Err(Exception::throw_range(&ctx, "radix must be between 2 and 36"));
                    }
                    parse(&text, 10)
                        .map(|value| value.to_str_radix(radix))
                        .ok_or_else(|| Exception::throw_type(&ctx, "invalid integer"))
                },
            )?,
        )?;
        apply_glue(ctx, GLUE, native)
    }
}

pub fn parse(text: &str, radix: u32) -> Option<BigInt> {
    if !(2..=36).contains(&radix) {
        return None;
    }
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude = BigInt::parse_bytes(digits.as_bytes(), radix)?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Apply `op`, refusing results estimated to exceed `max_bits`.
pub fn binary(op: &str, left: &BigInt, right: &BigInt, max_bits: u64) -> Result<BigInt, String> {
    let is_zero = right.sign() == Sign::NoSign;
    let too_large = |bits: u64| {
        if bits > max_bits {
            Err(format!("{op} result exceeds {max_bits} bits"))
        } else {
            Ok(())
        }
    };
    let shift = || -> Result<usize, String> {
        let amount =
            usize::try_from(right).map_err(|_| format!("shift amount out of range: {right}"))?;
        Ok(amount)
    };
    Ok(match op {
        "add" => left + right,
        "subtract" => left - right,
        "multiply" => {
            too_large(left.bits().saturating_add(right.bits()))?;
            left * right
        }
        "divide" if is_zero => return Err("division by zero".into()),
        "divide" => left / right,
        "mod" if is_zero => return Err("division by zero".into()),
        "mod" => left % right,
        "pow" => {
            let exponent =
                u32::try_from(right).map_err(|_| format!("exponent out of range: {right}"))?;
            // 0, 1 and -1 stay one bit wide whatever the exponent.
            if left.bits() > 1 {
                too_large(left.bits().saturating_mul(u64::from(exponent)))?;
            }
            left.pow(exponent)
        }
        "and" => left & right,
        "or" => left | right,
        "xor" => left ^ right,
        "shiftLeft" => {
            let amount = shift()?;
            if left.sign() == Sign::NoSign {
                return Ok(BigInt::default());
            }
            too_large(left.bits().saturating_add(amount as u64))?;
            left << amount
        }
        "shiftRight" => left >> shift()?,
        other => return Err(format!("unsupported operation: {other}")),
    })
}
