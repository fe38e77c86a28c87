//! Allow-listed import surface for sandboxed scripts (C3).
//!
//! Rhai resolves `import "name" as alias;` through a [`rhai::ModuleResolver`].
//! We install a [`rhai::module_resolvers::StaticModuleResolver`] populated
//! only with the names in [`crate::guards::ALLOWED_IMPORTS`]; any other name
//! fails resolution before the guard even has to run, which the sandbox
//! evaluator reclassifies as a [`crate::error::SandboxError::Violation`].
//!
//! Each module below exposes a small, real subset of the corresponding
//! Python stdlib module's surface rather than a full reimplementation —
//! enough for scripts to do the math/text/collection work the helper
//! library expects them to do, without reaching for anything Rhai doesn't
//! already make safe by construction.

use rhai::module_resolvers::StaticModuleResolver;
use rhai::{Dynamic, EvalAltResult, FLOAT, INT, Module};

use crate::guards::ALLOWED_IMPORTS;

fn math_module() -> Module {
    let mut module = Module::new();
    module.set_var("pi", std::f64::consts::PI as FLOAT);
    module.set_var("e", std::f64::consts::E as FLOAT);
    module.set_native_fn("sqrt", |x: FLOAT| Ok(x.sqrt()));
    module.set_native_fn("floor", |x: FLOAT| Ok(x.floor()));
    module.set_native_fn("ceil", |x: FLOAT| Ok(x.ceil()));
    module.set_native_fn("pow", |x: FLOAT, y: FLOAT| Ok(x.powf(y)));
    module.set_native_fn("log", |x: FLOAT| Ok(x.ln()));
    module.set_native_fn("log10", |x: FLOAT| Ok(x.log10()));
    module.set_native_fn("exp", |x: FLOAT| Ok(x.exp()));
    module.set_native_fn("sin", |x: FLOAT| Ok(x.sin()));
    module.set_native_fn("cos", |x: FLOAT| Ok(x.cos()));
    module.set_native_fn("tan", |x: FLOAT| Ok(x.tan()));
    module
}

fn re_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("escape", |s: &str| Ok(regex::escape(s)));
    module.set_native_fn(
        "is_match",
        |pattern: &str, text: &str| -> Result<bool, Box<EvalAltResult>> {
            let re = regex::Regex::new(pattern)
                .map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })?;
            Ok(re.is_match(text))
        },
    );
    module.set_native_fn(
        "find_all",
        |pattern: &str, text: &str| -> Result<rhai::Array, Box<EvalAltResult>> {
            let re = regex::Regex::new(pattern)
                .map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })?;
            Ok(re
                .find_iter(text)
                .map(|m| Dynamic::from(m.as_str().to_string()))
                .collect())
        },
    );
    module
}

fn json_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn(
        "parse",
        |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let value: serde_json::Value = serde_json::from_str(text)
                .map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })?;
            rhai::serde::to_dynamic(value).map_err(Into::into)
        },
    );
    module.set_native_fn(
        "stringify",
        |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
            let json: serde_json::Value =
                rhai::serde::from_dynamic(&value).map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })?;
            Ok(json.to_string())
        },
    );
    module
}

fn random_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("random", || Ok(rand::random::<FLOAT>()));
    module.set_native_fn("randint", |lo: INT, hi: INT| {
        use rand::Rng;
        Ok(rand::thread_rng().gen_range(lo..=hi))
    });
    module.set_native_fn("choice", |items: rhai::Array| -> Result<Dynamic, Box<EvalAltResult>> {
        use rand::Rng;
        if items.is_empty() {
            return Err("choice() on empty sequence".into());
        }
        let idx = rand::thread_rng().gen_range(0..items.len());
        Ok(items[idx].clone())
    });
    module
}

fn string_module() -> Module {
    let mut module = Module::new();
    module.set_var("ascii_lowercase", "abcdefghijklmnopqrstuvwxyz");
    module.set_var("ascii_uppercase", "ABCDEFGHIJKLMNOPQRSTUVWXYZ");
    module.set_var("digits", "0123456789");
    module.set_var("whitespace", " \t\n\r\x0b\x0c");
    module
}

fn textwrap_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("shorten", |text: &str, width: INT| {
        let width = width.max(0) as usize;
        if text.chars().count() <= width {
            Ok(text.to_string())
        } else {
            let keep = width.saturating_sub(3);
            let mut out: String = text.chars().take(keep).collect();
            out.push_str("...");
            Ok(out)
        }
    });
    module
}

/// Empty placeholder module for allow-listed names that have no sandboxed
/// surface of their own (e.g. `typing`, `abc`, `dataclasses`): importing the
/// name succeeds (it is allow-listed) but exposes nothing, matching how
/// those modules are type-annotation/ABC-only in the Python original and
/// carry no runtime behavior scripts would call.
fn empty_module() -> Module {
    Module::new()
}

/// Builds the module resolver installed on every [`crate::sandbox::SandboxSession`].
///
/// Every name in [`ALLOWED_IMPORTS`] is registered so `import` resolution
/// succeeds; names outside the allow-list are never added; looking them up
/// in the resolver fails.
#[must_use]
pub fn allowed_module_resolver() -> StaticModuleResolver {
    let mut resolver = StaticModuleResolver::new();
    for name in ALLOWED_IMPORTS.iter() {
        let module = match *name {
            "math" => math_module(),
            "re" => re_module(),
            "json" => json_module(),
            "random" => random_module(),
            "string" => string_module(),
            "textwrap" => textwrap_module(),
            _ => empty_module(),
        };
        resolver.insert((*name).to_string(), module);
    }
    resolver
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_contains_every_allowed_import() {
        let resolver = allowed_module_resolver();
        for name in ALLOWED_IMPORTS.iter() {
            assert!(resolver.contains_path(name), "missing module: {name}");
        }
    }

    #[test]
    fn resolver_does_not_contain_os() {
        let resolver = allowed_module_resolver();
        assert!(!resolver.contains_path("os"));
    }
}
