//! `crypto-js`: digests, HMACs and encoders.
//!
//! Word arrays are modelled as objects carrying their bytes as lowercase hex,
//! which is all provider code observes through `toString(encoder)`.

use base64::Engine;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use rquickjs::{Ctx, Exception, Function, Object, Value};
use sha2::{Digest, Sha256, Sha512};

use super::HostModule;
use crate::js::apply_glue;

pub struct CryptoJsModule;

const GLUE: &str = r#"
(function (native) {
    function wordArray(hex) {
        return {
            _hex: hex,
            sigBytes: hex.length / 2,
            toString(encoder) {
                return (encoder || Hex).stringify(this);
            },
        };
    }
    function isWordArray(value) {
        return value !== null && typeof value === 'object' && typeof value._hex === 'string';
    }
    const Hex = {
        stringify(words) { return words._hex; },
        parse(text) { return wordArray(native.normalizeHex(String(text))); },
    };
    const Utf8 = {
        stringify(words) { return native.hexToUtf8(words._hex); },
        parse(text) { return wordArray(native.utf8ToHex(String(text))); },
    };
    const Base64 = {
        stringify(words) { return native.hexToBase64(words._hex); },
        parse(text) { return wordArray(native.base64ToHex(String(text))); },
    };
    function bytes(message) {
        return isWordArray(message) ? message._hex : native.utf8ToHex(String(message));
    }
    const hash = (algorithm) => (message) => wordArray(native.digest(algorithm, bytes(message)));
    const hmac = (algorithm) => (message, key) =>
        wordArray(native.hmac(algorithm, bytes(message), bytes(key)));
    return {
        MD5: hash('md5'),
        SHA1: hash('sha1'),
        SHA256: hash('sha256'),
        SHA512: hash('sha512'),
        HmacMD5: hmac('md5'),
        HmacSHA1: hmac('sha1'),
        HmacSHA256: hmac('sha256'),
        HmacSHA512: hmac('sha512'),
        enc: { Hex, Utf8, Base64 },
    };
})
"#;

impl HostModule for CryptoJsModule {
    fn name(&self) -> &'static str {
        "crypto-js"
    }

    fn instantiate<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let native = Object::new(ctx.clone())?;
        native.set(
            "digest",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, algorithm: String, hex_input: String| -> rquickjs::Result<String> {
                    let data = decode_hex(&ctx, &hex_input)?;
                    digest(&algorithm, &data)
                        .map(hex::encode)
                        .ok_or_else(|| unknown_algorithm(&ctx, &algorithm))
                },
            )?,
        )?;
        native.set(
            "hmac",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, algorithm: String, hex_input: String, hex_key: String| -> rquickjs::Result<String> {
                    let data = decode_hex(&ctx, &hex_input)?;
                    let key = decode_hex(&ctx, &hex_key)?;
                    hmac(&algorithm, &key, &data)
                        .map(hex::encode)
                        .ok_or_else(|| unknown_algorithm(&ctx, &algorithm))
                },
            )?,
        )?;
        native.set(
            "utf8ToHex",
            Function::new(ctx.clone(), |text: String| hex::encode(text.as_bytes()))?,
        )?;
        native.set(
            "hexToUtf8",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, hex_input: String| -> rquickjs::Result<String> {
                    let data = decode_hex(&ctx, &hex_input)?;
                    Ok(String::from_utf8_lossy(&data).into_owned())
                },
            )?,
        )?;
        native.set(
            "hexToBase64",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, hex_input: String| -> rquickjs::Result<String> {
                    let data = decode_hex(&ctx, &hex_input)?;
                    Ok(base64::engine::general_purpose::STANDARD.encode(data))
                },
            )?,
        )?;
        native.set(
            "base64ToHex",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, text: String| -> rquickjs::Result<String> {
                    base64::engine::general_purpose::STANDARD
                        .decode(text.trim())
                        .map(hex::encode)
                        .map_err(|err| Exception::throw_type(&ctx, &format!("invalid base64: {err}")))
                },
            )?,
        )?;
        native.set(
            "normalizeHex",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, text: String| -> rquickjs::Result<String> {
                    decode_hex(&ctx, &text).map(hex::encode)
                },
            )?,
        )?;
        apply_glue(ctx, GLUE, native)
    }
}

fn decode_hex(ctx: &Ctx<'_>, text: &str) -> rquickjs::Result<Vec<u8>> {
    hex::decode(text).map_err(|err| Exception::throw_type(ctx, &format!("invalid hex: {err}")))
}

fn unknown_algorithm(ctx: &Ctx<'_>, algorithm: &str) -> rquickjs::Error {
    Exception::throw_type(ctx, &format!("unsupported algorithm: {algorithm}"))
}

/// Digest `data`; `None` for an unknown algorithm name.
pub fn digest(algorithm: &str, data: &[u8]) -> Option<Vec<u8>> {
    let out = match algorithm {
        "md5" => md5::Md5::digest(data).to_vec(),
        "sha1" => ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, data)
            .as_ref()
            .to_vec(),
        "sha256" => Sha256::digest(data).to_vec(),
        "sha512" => Sha512::digest(data).to_vec(),
        _ => return None,
    };
    Some(out)
}

/// Keyed MAC over `data`; `None` for an unknown algorithm name.
pub fn hmac(algorithm: &str, key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    let out = match algorithm {
        "md5" => mac::<Hmac<md5::Md5>>(key, data)?,
        "sha1" => {
            let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
            ring::hmac::sign(&key, data).as_ref().to_vec()
        }
        "sha256" => mac::<Hmac<Sha256>>(key, data)?,
        "sha512" => mac::<Hmac<Sha512>>(key, data)?,
        _ => return None,
    };
    Some(out)
}

fn mac<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(key).ok()?;
    mac.update(data);
    Some(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::with_ctx;
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(
            hex::encode(digest("md5", b"abc").unwrap()),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            hex::encode(digest("sha1", b"abc").unwrap()),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            hex::encode(digest("sha256", b"abc").unwrap()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(digest("whirlpool", b"abc").is_none());
    }

    #[test]
    fn known_hmac() {
        // RFC 4231 test case 2
        assert_eq!(
            hex::encode(hmac("sha256", b"Jefe", b"what do ya want for nothing?").unwrap()),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        // RFC 2202 test case 2
        assert_eq!(
            hex::encode(hmac("md5", b"Jefe", b"what do ya want for nothing?").unwrap()),
            "750c783e6ab0b503eaa86e310a5db738"
        );
    }

    #[test]
    fn module_mimics_word_arrays() {
        with_ctx(|ctx| {
            let crypto = CryptoJsModule.instantiate(&ctx).unwrap();
            let check: Function = ctx
                .eval(
                    "(function (C) { return [\
                        C.MD5('abc').toString(),\
                        C.enc.Base64.stringify(C.enc.Utf8.parse('hi')),\
                        C.enc.Base64.parse('aGk=').toString(C.enc.Utf8),\
                        C.SHA256(C.enc.Hex.parse('616263')).toString().slice(0, 8),\
                    ].join('|'); })",
                )
                .unwrap();
            let out: String = check.call((crypto,)).unwrap();
            assert_eq!(out, "900150983cd24fb0d6963f7d28e17f72|aGk=|hi|ba7816bf");
        });
    }
}
