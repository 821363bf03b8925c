//! `cheerio`: CSS selection over parsed HTML.
//!
//! Matched elements cross into the engine as plain records
//! (`name`, `attribs`, `outer`, `inner`, `text`); nested queries re-parse the
//! record's outer HTML.

use rquickjs::{Ctx, Exception, Function, Object, Value};
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value as Json};

use super::HostModule;
use crate::js::apply_glue;

pub struct CheerioModule;

const GLUE: &str = r#"
(function (native) {
    function isNode(value) {
        return value !== null && typeof value === 'object' && typeof value.outer === 'string';
    }
    function selection(nodes) {
        const sel = {
            length: nodes.length,
            text() { return nodes.map((node) => node.text).join(''); },
            html() { return nodes.length ? nodes[0].inner : null; },
            attr(name) {
                if (!nodes.length) {
                    return undefined;
                }
                const attribs = nodes[0].attribs;
                return Object.prototype.hasOwnProperty.call(attribs, name) ? attribs[name] : undefined;
            },
            find(selector) {
                const found = [];
                for (const node of nodes) {
                    found.push(...JSON.parse(native.find(node.outer, String(selector))));
                }
                return selection(found);
            },
            eq(index) {
                const at = index < 0 ? nodes.length + index : index;
                return selection(nodes[at] ? [nodes[at]] : []);
            },
            first() { return sel.eq(0); },
            last() { return sel.eq(-1); },
            each(callback) {
                nodes.forEach((node, index) => callback.call(node, index, node));
                return sel;
            },
            map(callback) {
                const out = nodes
                    .map((node, index) => callback.call(node, index, node))
                    .filter((value) => value !== null && value !== undefined);
                return { length: out.length, get: () => out, toArray: () => out };
            },
            get(index) { return index === undefined ? nodes.slice() : nodes[index]; },
            toArray() { return nodes.slice(); },
        };
        nodes.forEach((node, index) => { sel[index] = node; });
        return sel;
    }
    function load(html) {
        const source = html === undefined || html === null ? '' : String(html);
        const $ = function (target, scope) {
            if (isNode(target)) {
                return selection([target]);
            }
            if (isNode(scope)) {
                return selection([scope]).find(target);
            }
            return selection(JSON.parse(native.select(source, String(target))));
        };
        $.html = () => source;
        $.text = () => native.text(source);
        return $;
    }
    return { load };
})
"#;

impl HostModule for CheerioModule {
    fn name(&self) -> &'static str {
        "cheerio"
    }

    fn instantiate<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let native = Object::new(ctx.clone())?;
        native.set(
            "select",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, html: String, selector: String| -> rquickjs::Result<String> {
                    select(&html, &selector)
                        .map(|nodes| Json::Array(nodes).to_string())
                        .map_err(|message| Exception::throw_type(&ctx, &message))
                },
            )?,
        )?;
        native.set(
            "find",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, outer: String, selector: String| -> rquickjs::Result<String> {
                    find(&outer, &selector)
                        .map(|nodes| Json::Array(nodes).to_string())
                        .map_err(|message| Exception::throw_type(&ctx, &message))
                },
            )?,
        )?;
        native.set("text", Function::new(ctx.clone(), |html: String| text(&html))?)?;
        apply_glue(ctx, GLUE, native)
    }
}

fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|err| format!("invalid selector {selector:?}: {err}"))
}

fn record(element: ElementRef<'_>) -> Json {
    let attribs: serde_json::Map<String, Json> = element
        .value()
        .attrs()
        .map(|(name, value)| (name.to_string(), Json::String(value.to_string())))
        .collect();
    json!({
        "name": element.value().name(),
        "attribs": attribs,
        "outer": element.html(),
        "inner": element.inner_html(),
        "text": element.text().collect::<String>(),
    })
}

/// Match `selector` against a whole document.
pub fn select(html: &str, selector: &str) -> Result<Vec<Json>, String> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    Ok(document.select(&selector).map(record).collect())
}

/// Match `selector` against the descendants of the first element in `outer`.
pub fn find(outer: &str, selector: &str) -> Result<Vec<Json>, String> {
    let selector = parse_selector(selector)?;
    let fragment = Html::parse_fragment(outer);
    let Some(scope) = fragment
        .root_element()
        .children()
        .find_map(ElementRef::wrap)
    else {
        return Ok(Vec::new());
    };
    Ok(scope
        .select(&selector)
        .filter(|element| element.id() != scope.id())
        .map(record)
        .collect())
}

/// Concatenated text content of a document.
pub fn text(html: &str) -> String {
    Html::parse_document(html).root_element().text().collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::with_ctx;
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <ul class="songs">
            <li data-id="1"><a href="/s/1">Song &amp; One</a></li>
            <li data-id="2"><a href="/s/2">Song Two</a></li>
          </ul>
        </body></html>
    "#;

    #[test]
    fn select_returns_element_records() {
        let nodes = select(PAGE, "li").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0]["name"], "li");
        assert_eq!(nodes[0]["attribs"]["data-id"], "1");
        assert_eq!(nodes[0]["text"], "Song & One");
        assert!(nodes[1]["inner"].as_str().unwrap().contains("href=\"/s/2\""));
    }

    #[test]
    fn find_searches_descendants_only() {
        let outer = r#"<div class="x"><div class="x">inner</div></div>"#;
        let nodes = find(outer, ".x").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0]["text"], "inner");
    }

    #[test]
    fn invalid_selector_is_an_error() {
        assert!(select(PAGE, "li[").is_err());
    }

    #[test]
    fn module_supports_common_traversals() {
        with_ctx(|ctx| {
            let cheerio = CheerioModule.instantiate(&ctx).unwrap();
            let check: Function = ctx
                .eval(
                    "(function (cheerio, page) { const $ = cheerio.load(page); \
                     const ids = $('li').map((i, el) => $(el).attr('data-id')).get(); \
                     const hrefs = []; $('ul li').each(function () { hrefs.push($(this).find('a').attr('href')); }); \
                     return [$('li').length, ids.join('+'), hrefs.join('+'), $('li').last().text(), \
                             $('a', $('li').get(0)).text()].join('|'); })",
                )
                .unwrap();
            let out: String = check.call((cheerio, PAGE)).unwrap();
            assert_eq!(out, "2|1+2|/s/1+/s/2|Song Two|Song & One");
        });
    }
}
