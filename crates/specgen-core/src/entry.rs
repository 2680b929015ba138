//! The per-target entry script handed to the bundler.
//!
//! The entry imports the spec parser and model, imports the target's visitor
//! and publishes `generate(spec, config)` on the exports object. Definition
//! imports are served by the `__resolve` host callback; a failed lookup
//! becomes a thrown `Error` carrying the host's message.

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::resolve::RESOLVE_CALLBACK;
use crate::sandbox::{is_identifier, EXPORTS_GLOBAL};

/// Visitor imported as the module's default export when none is named.
pub const DEFAULT_VISITOR: &str = "DefaultVisitor";

/// Name the entry is reported under in source maps.
pub const ENTRY_SOURCEFILE: &str = "generate.ts";

/// Name of the function the entry exports.
pub const GENERATE_EXPORT: &str = "generate";

#[derive(Error, Debug)]
pub enum EntryError {
    #[error("invalid visitor class {0:?}")]
    InvalidVisitor(String),
}

/// Module specifiers for the spec parser and model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryModules {
    /// Module exporting `parse`.
    pub parser: String,
    /// Module exporting `Context` and `Writer`.
    pub model: String,
}

impl Default for EntryModules {
    fn default() -> Self {
        Self {
            parser: "@apexlang/core".to_string(),
            model: "@apexlang/core/model".to_string(),
        }
    }
}

/// Build the entry script for one target.
pub fn synthesize(
    modules: &EntryModules,
    module: &str,
    visitor: Option<&str>,
) -> Result<String, EntryError> {
    let (import, class) = match visitor {
        Some(name) => {
            if !is_identifier(name) {
                return Err(EntryError::InvalidVisitor(name.to_string()));
            }
            (format!("{{ {name} }}"), name)
        }
        None => (DEFAULT_VISITOR.to_string(), DEFAULT_VISITOR),
    };

    let parser = string_literal(&modules.parser);
    let model = string_literal(&modules.model);
    let module = string_literal(module);

    Ok(format!(
        r#"import {{ parse }} from {parser};
import {{ Context, Writer }} from {model};
import {import} from {module};

declare function {RESOLVE_CALLBACK}(location: string): {{ ok: boolean; value: string }};
declare const {EXPORTS_GLOBAL}: Record<string, unknown>;

function resolver(location: string, from: string): string {{
  const result = {RESOLVE_CALLBACK}(location);
  if (!result.ok) {{
    throw new Error(result.value);
  }}
  return result.value;
}}

export function {GENERATE_EXPORT}(spec: string, config: Record<string, unknown>): string {{
  const doc = parse(spec, resolver);
  const context = new Context(config, doc);

  const writer = new Writer();
  const visitor = new {class}(writer);
  context.accept(context, visitor);
  return writer.string();
}}

{EXPORTS_GLOBAL}["{GENERATE_EXPORT}"] = {GENERATE_EXPORT};
"#
    ))
}

fn string_literal(value: &str) -> String {
    JsonValue::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_visitor_is_a_default_import() {
        let entry = synthesize(&EntryModules::default(), "@example/go", None).unwrap();
        assert!(entry.contains("import DefaultVisitor from \"@example/go\";"));
        assert!(entry.contains("new DefaultVisitor(writer)"));
        assert!(entry.contains("import { parse } from \"@apexlang/core\";"));
        assert!(entry.contains("import { Context, Writer } from \"@apexlang/core/model\";"));
        assert!(entry.contains("__exports[\"generate\"] = generate;"));
        assert!(entry.contains("__resolve(location)"));
    }

    #[test]
    fn named_visitor_is_a_named_import() {
        let entry = synthesize(&EntryModules::default(), "./visitors", Some("MainVisitor")).unwrap();
        assert!(entry.contains("import { MainVisitor } from \"./visitors\";"));
        assert!(entry.contains("new MainVisitor(writer)"));
    }

    #[test]
    fn module_specifiers_are_escaped() {
        let entry = synthesize(&EntryModules::default(), "odd\"name", None).unwrap();
        assert!(entry.contains(r#"from "odd\"name";"#));
    }

    #[test]
    fn invalid_visitor_names_are_rejected() {
        let err = synthesize(&EntryModules::default(), "m", Some("A; alert(1)")).unwrap_err();
        assert!(matches!(err, EntryError::InvalidVisitor(_)));
    }

    #[test]
    fn custom_core_modules() {
        let modules = EntryModules {
            parser: "my-parser".to_string(),
            model: "my-model".to_string(),
        };
        let entry = synthesize(&modules, "m", None).unwrap();
        assert!(entry.contains("from \"my-parser\";"));
        assert!(entry.contains("from \"my-model\";"));
    }
}
