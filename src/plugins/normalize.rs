//! Capability normalizer.
//!
//! Turns whatever a provider exported into a tagged [`Candidate`]: either a
//! usable shape (identity plus the set of present capabilities) or a reason
//! it is unusable. Callers dispatch on the tag; nothing downstream inspects the
//! raw export again.

use async_trait::async_trait;
use rquickjs::function::{Rest, This};
use rquickjs::{async_with, Ctx, Function, Object, Persistent, Value};
use std::collections::BTreeMap;
use std::rc::Rc;

use super::loader::ScriptModule;
use super::native::NativeProvider;
use super::traits::{Capability, CapabilityBackend, Payload, ProviderIdentity, SearchKind};
use crate::error::{CapabilityError, NormalizationFailure};
use crate::js::{caught, js_to_json, json_to_js};

/// Platform identity used when a provider declares none.
pub const DEFAULT_PLATFORM: &str = "unknown";

/// What a load produced before normalization.
pub enum RawExport {
    /// Module record of an executed script
    Script(ScriptModule),
    /// Candidate returned by an in-process factory
    Native(NativeProvider),
}

/// Normalized provider: identity plus bound operations.
pub struct ProviderShape {
    pub identity: ProviderIdentity,
    pub backend: Rc<dyn CapabilityBackend>,
}

impl std::fmt::Debug for ProviderShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderShape")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Candidate {
    Valid(ProviderShape),
    Unusable(NormalizationFailure),
}

/// Normalize a raw export. Never fails; problems become [`Candidate::Unusable`].
pub async fn normalize(raw: RawExport, path: &str) -> Candidate {
    match raw {
        RawExport::Native(native) => Candidate::Valid(native.into_shape()),
        RawExport::Script(module) => match inspect_script(&module).await {
            Ok((identity, target, methods)) => Candidate::Valid(ProviderShape {
                identity,
                backend: Rc::new(ScriptBackend {
                    target,
                    methods,
                    module,
                }),
            }),
            Err(reason) => Candidate::Unusable(NormalizationFailure::new(path, reason)),
        },
    }
}

/// Non-empty platform or [`DEFAULT_PLATFORM`].
pub fn platform_or_default(platform: Option<String>) -> String {
    platform
        .filter(|platform| !platform.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PLATFORM.to_string())
}

/// Parse `supportedSearchType`, skipping kinds this host does not know.
pub fn search_kinds(value: &Payload) -> Option<Vec<SearchKind>> {
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| item.as_str().and_then(SearchKind::parse))
            .collect(),
    )
}

type Bound = BTreeMap<Capability, Persistent<Function<'static>>>;

type Inspected = (ProviderIdentity, Persistent<Object<'static>>, Bound);

type Exported<'js> = (ProviderIdentity, Object<'js>, BTreeMap<Capability, Function<'js>>);

async fn inspect_script(module: &ScriptModule) -> Result<Inspected, String> {
    let record = module.module_record();
    let context = module.context();
    async_with!(context => |ctx| {
        inspect_record(&ctx, record)
    })
    .await
}

fn inspect_record<'js>(ctx: &Ctx<'js>, record: Persistent<Object<'static>>) -> Result<Inspected, String> {
    let record = record.restore(ctx).map_err(|err| err.to_string())?;
    let (identity, candidate, methods) = caught(ctx, inspect_exports(ctx, &record))?
        .ok_or_else(|| "module.exports is not an object".to_string())?;
    caught(ctx, record.set("loaded", true))?;
    let methods = methods
        .into_iter()
        .map(|(capability, function)| (capability, Persistent::save(ctx, function)))
        .collect();
    Ok((identity, Persistent::save(ctx, candidate), methods))
}

fn inspect_exports<'js>(ctx: &Ctx<'js>, record: &Object<'js>) -> rquickjs::Result<Option<Exported<'js>>> {
    let exports: Value = record.get("exports")?;
    let Some(exports) = exports.into_object() else {
        return Ok(None);
    };
    let default: Value = exports.get("default")?;
    let candidate = default.into_object().unwrap_or(exports);

    let text = |name: &str| -> rquickjs::Result<Option<String>> {
        let value: Value = candidate.get(name)?;
        value.as_string().map(|s| s.to_string()).transpose()
    };
    let mut identity = ProviderIdentity::new(platform_or_default(text("platform")?));
    identity.author = text("author")?;
    identity.version = text("version")?;
    let kinds: Value = candidate.get("supportedSearchType")?;
    identity.supported_search_types = search_kinds(&js_to_json(ctx, kinds)?);

    let mut methods = BTreeMap::new();
    for capability in Capability::ALL {
        for &name in capability.method_names() {
            let value: Value = candidate.get(name)?;
            if let Some(function) = value.into_function() {
                methods.insert(capability, function);
                break;
            }
        }
    }
    Ok(Some((identity, candidate, methods)))
}

/// Capabilities bound to a script export object.
///
/// Functions are captured at normalization; later writes to the export
/// object do not change which code runs. Field order matters: the JS
/// handles are released before the engine.
struct ScriptBackend {
    target: Persistent<Object<'static>>,
    methods: Bound,
    module: ScriptModule,
}

#[async_trait(?Send)]
impl CapabilityBackend for ScriptBackend {
    fn supports(&self, capability: Capability) -> bool {
        self.methods.contains_key(&capability)
    }

    async fn invoke(
        &self,
        capability: Capability,
        args: Vec<Payload>,
    ) -> Result<Payload, CapabilityError> {
        let Some(method) = self.methods.get(&capability).cloned() else {
            return Ok(Payload::Null);
        };
        let target = self.target.clone();
        let context = self.module.context();
        let outcome = async_with!(context => |ctx| {
            call_method(&ctx, target, method, &args).await
        })
        .await;
        // Continuations this call queued may be what another pending call
        // on the same engine is waiting for.
        self.module.run_pending_jobs().await;
        outcome.map_err(|message| CapabilityError::Rejected {
            capability,
            message,
        })
    }
}

/// Call a bound method with `this` set to the export and wait for it to settle.
async fn call_method<'js>(
    ctx: &Ctx<'js>,
    target: Persistent<Object<'static>>,
    method: Persistent<Function<'static>>,
    args: &[Payload],
) -> Result<Payload, String> {
    let target = target.restore(ctx).map_err(|err| err.to_string())?;
    let function = method.restore(ctx).map_err(|err| err.to_string())?;
    let js_args = caught(
        ctx,
        args.iter()
            .map(|arg| json_to_js(ctx, arg))
            .collect::<rquickjs::Result<Vec<_>>>(),
    )?;
    let returned: Value = caught(ctx, function.call((This(target), Rest(js_args))))?;
    let promise = returned.as_promise().cloned();
    let settled = match promise {
        Some(promise) => caught(ctx, promise.into_future::<Value>().await)?,
        None => returned,
    };
    caught(ctx, js_to_json(ctx, settled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::DependencyRegistry;
    use crate::plugins::loader::{HostEnvironment, ScriptLoader};
    use serde_json::json;
    use std::sync::Arc;

    async fn script(source: &str) -> Candidate {
        let loader = ScriptLoader::new(Arc::new(DependencyRegistry::empty()), HostEnvironment::default());
        let module = loader.build(source, "test.js").await.unwrap();
        normalize(RawExport::Script(module), "test.js").await
    }

    fn valid(candidate: Candidate) -> ProviderShape {
        match candidate {
            Candidate::Valid(shape) => shape,
            Candidate::Unusable(failure) => panic!("unexpected failure: {failure}"),
        }
    }

    #[test]
    fn platform_defaults_when_blank() {
        assert_eq!(platform_or_default(None), DEFAULT_PLATFORM);
        assert_eq!(platform_or_default(Some("  ".into())), DEFAULT_PLATFORM);
        assert_eq!(platform_or_default(Some("qq".into())), "qq");
    }

    #[test]
    fn unknown_search_kinds_are_skipped() {
        assert_eq!(
            search_kinds(&json!(["music", "video", "sheet"])),
            Some(vec![SearchKind::Music, SearchKind::Sheet])
        );
        assert_eq!(search_kinds(&json!("music")), None);
    }

    #[tokio::test]
    async fn reads_identity_and_present_capabilities() {
        let shape = valid(
            script(
                "module.exports = { platform: 'qq', author: 'a', version: '1.2.0', \
                 supportedSearchType: ['music', 'album'], search() {}, getLyric: async () => null, \
                 getTopLists: 'not a function' };",
            )
            .await,
        );
        assert_eq!(shape.identity.platform, "qq");
        assert_eq!(shape.identity.author.as_deref(), Some("a"));
        assert_eq!(shape.identity.version.as_deref(), Some("1.2.0"));
        assert_eq!(
            shape.identity.supported_search_types,
            Some(vec![SearchKind::Music, SearchKind::Album])
        );
        assert!(shape.backend.supports(Capability::Search));
        assert!(shape.backend.supports(Capability::Lyric));
        assert!(!shape.backend.supports(Capability::TopLists));
        assert!(!shape.backend.supports(Capability::MediaSource));
    }

    #[tokio::test]
    async fn default_export_takes_precedence() {
        let shape = valid(
            script("exports.platform = 'outer'; exports.default = { platform: 'inner', getAlbumInfo() {} };")
                .await,
        );
        assert_eq!(shape.identity.platform, "inner");
        assert!(shape.backend.supports(Capability::AlbumInfo));
    }

    #[tokio::test]
    async fn default_export_replaces_bare_fields_entirely() {
        let shape = valid(
            script(
                "exports.platform = 'outer'; exports.author = 'outer-author'; \
                 exports.search = async () => ({ data: ['outer'] }); \
                 exports.default = { platform: 'inner', version: '3.0.0', getAlbumInfo() {} };",
            )
            .await,
        );
        assert_eq!(shape.identity.platform, "inner");
        assert_eq!(shape.identity.version.as_deref(), Some("3.0.0"));
        assert_eq!(shape.identity.author, None);
        assert!(shape.backend.supports(Capability::AlbumInfo));
        assert!(!shape.backend.supports(Capability::Search));
    }

    #[tokio::test]
    async fn non_object_default_uses_bare_exports() {
        for default in ["null", "undefined", "'qq'", "7"] {
            let shape = valid(
                script(&format!(
                    "exports.platform = 'bare'; exports.default = {default}; \
                     exports.search = async () => ({{ data: [] }});"
                ))
                .await,
            );
            assert_eq!(shape.identity.platform, "bare", "default = {default}");
            assert!(shape.backend.supports(Capability::Search), "default = {default}");
        }
    }

    #[tokio::test]
    async fn operations_are_bound_at_normalization() {
        let shape = valid(
            script(
                "module.exports = { \
                   async search() { return { data: ['original'] }; }, \
                   async getAlbumInfo() { return { id: 'album' }; }, \
                   async getLyric() { \
                     module.exports.search = async () => ({ data: ['replaced'] }); \
                     delete module.exports.getAlbumInfo; \
                     module.exports.platform = 'changed'; \
                     return null; } };",
            )
            .await,
        );
        shape.backend.invoke(Capability::Lyric, vec![json!({})]).await.unwrap();

        let search = shape.backend.invoke(Capability::Search, vec![]).await.unwrap();
        assert_eq!(search, json!({"data": ["original"]}));
        assert!(shape.backend.supports(Capability::AlbumInfo));
        let album = shape.backend.invoke(Capability::AlbumInfo, vec![]).await.unwrap();
        assert_eq!(album, json!({"id": "album"}));
        assert_eq!(shape.identity.platform, DEFAULT_PLATFORM);
    }

    #[tokio::test]
    async fn concurrent_calls_on_one_engine_both_settle() {
        let shape = valid(
            script(
                "let release; const gate = new Promise((done) => { release = done; }); \
                 module.exports = { \
                   async getLyric() { await gate; return { opened: true }; }, \
                   async search() { release(); return { data: [] }; } };",
            )
            .await,
        );
        let started = std::time::Instant::now();
        let joined = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            tokio::join!(
                shape.backend.invoke(Capability::Lyric, vec![json!({})]),
                shape.backend.invoke(Capability::Search, vec![]),
            )
        })
        .await
        .unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert_eq!(joined.0.unwrap(), json!({"opened": true}));
        assert_eq!(joined.1.unwrap(), json!({"data": []}));
    }

    #[tokio::test]
    async fn legacy_playlist_name_maps_to_sheet_info() {
        let shape = valid(
            script("module.exports = { async getPlaylistDetail(sheet, page) { return { id: sheet.id, page }; } };")
                .await,
        );
        assert_eq!(shape.identity.platform, DEFAULT_PLATFORM);
        let out = shape
            .backend
            .invoke(Capability::MusicSheetInfo, vec![json!({"id": "s1"}), json!(2)])
            .await
            .unwrap();
        assert_eq!(out, json!({"id": "s1", "page": 2}));
    }

    #[tokio::test]
    async fn methods_run_with_this_bound_to_the_export() {
        let shape = valid(
            script(
                "module.exports = { prefix: 'p-', async search(q) { return { data: [this.prefix + q] }; } };",
            )
            .await,
        );
        let out = shape
            .backend
            .invoke(Capability::Search, vec![json!("x")])
            .await
            .unwrap();
        assert_eq!(out, json!({"data": ["p-x"]}));
    }

    #[tokio::test]
    async fn rejections_carry_the_error_text() {
        let shape = valid(script("module.exports = { async getLyric() { throw new Error('no lyric'); } };").await);
        let err = shape
            .backend
            .invoke(Capability::Lyric, vec![json!({})])
            .await
            .unwrap_err();
        assert_eq!(err.capability(), Capability::Lyric);
        assert!(err.to_string().contains("no lyric"));
    }

    #[tokio::test]
    async fn non_object_export_is_unusable() {
        match script("module.exports = 42;").await {
            Candidate::Unusable(failure) => assert_eq!(failure.path, "test.js"),
            Candidate::Valid(_) => panic!("number export should not normalize"),
        }
    }
}
