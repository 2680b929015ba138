//! Formatter dispatch by destination file extension.
//!
//! | Extension | Formatter |
//! |-----------|-----------|
//! | `.ts` | script formatter bundle, `formatTypeScript` |
//! | `.cs` | native module, C# style |
//! | `.java .c .cpp .c++ .h .hpp .h++ .m` | native module, Google style |
//! | `.rs .go .py` | external executable, after every file is written |
//!
//! Anything else is written as generated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use specgen_config::HomeLayout;
use thiserror::Error;

use crate::command::{self, CommandError};
use crate::native::{NativeExports, NativeFormatter};
use crate::sandbox::{FormatterSession, SandboxLimits};

/// Export of the script formatter bundle.
pub const SCRIPT_EXPORT: &str = "formatTypeScript";

/// Native formatter options for C#.
pub const CSHARP_STYLE: &str = "indent-namespaces break-blocks pad-comma indent=tab style=1tbs";

/// Native formatter options for Java, C, C++ and Objective-C.
pub const C_FAMILY_STYLE: &str = "pad-oper indent=tab style=google";

/// Script formatter bundle inside the formatters directory.
pub const SCRIPT_FORMATTER_FILE: &str = "prettier.js";

/// Native formatter module inside the formatters directory.
pub const NATIVE_FORMATTER_FILE: &str = "astyle.wasm";

/// How a destination file is formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStrategy {
    Script { language: &'static str },
    Native { language: &'static str, style: &'static str },
    External,
    Verbatim,
}

/// Pick the strategy for `path`, using `external` for post-pass extensions.
pub fn strategy_for(path: &Path, external: &BTreeMap<String, ExternalFormatter>) -> FormatStrategy {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return FormatStrategy::Verbatim;
    };
    match ext {
        "ts" => FormatStrategy::Script {
            language: "TypeScript",
        },
        "cs" => FormatStrategy::Native {
            language: "C#",
            style: CSHARP_STYLE,
        },
        "java" | "c" | "cpp" | "c++" | "h" | "hpp" | "h++" | "m" => FormatStrategy::Native {
            language: "Java/C/C++/Objective-C",
            style: C_FAMILY_STYLE,
        },
        other if external.contains_key(other) => FormatStrategy::External,
        _ => FormatStrategy::Verbatim,
    }
}

/// A formatting failure, keeping the formatter's message.
#[derive(Error, Debug)]
#[error("error formatting {language}: {message}")]
pub struct FormatError {
    pub language: String,
    pub message: String,
}

/// A formatter run as a separate process on a written file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalFormatter {
    pub language: String,
    pub program: String,
    pub args: Vec<String>,
}

impl ExternalFormatter {
    pub fn new(language: &str, program: &str, args: &[&str]) -> Self {
        Self {
            language: language.to_string(),
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        }
    }

    /// Format `file` in place; the file path is the last argument.
    pub fn run(&self, file: &Path, dir: &Path) -> Result<(), CommandError> {
        let mut args = self.args.clone();
        args.push(file.display().to_string());
        command::run(&self.program, args.as_slice(), dir)
    }
}

/// `rustfmt`, `gofmt` and `yapf`, keyed by extension.
pub fn default_external_formatters() -> BTreeMap<String, ExternalFormatter> {
    BTreeMap::from([
        (
            "rs".to_string(),
            ExternalFormatter::new("Rust", "rustfmt", &["--edition", "2021"]),
        ),
        ("go".to_string(), ExternalFormatter::new("Go", "gofmt", &["-w"])),
        ("py".to_string(), ExternalFormatter::new("Python", "yapf", &["-i"])),
    ])
}

/// Where formatters come from.
#[derive(Debug, Clone)]
pub struct FormatterSettings {
    pub script_bundle: PathBuf,
    pub native_module: PathBuf,
    pub native_exports: NativeExports,
    pub external: BTreeMap<String, ExternalFormatter>,
}

impl FormatterSettings {
    /// Formatter assets from the home directory's formatters folder.
    pub fn for_home(home: &HomeLayout) -> Self {
        let dir = home.formatters_dir();
        Self {
            script_bundle: dir.join(SCRIPT_FORMATTER_FILE),
            native_module: dir.join(NATIVE_FORMATTER_FILE),
            native_exports: NativeExports::astyle(),
            external: default_external_formatters(),
        }
    }

    /// The post-pass formatter for `path`, if any.
    pub fn external_for(&self, path: &Path) -> Option<&ExternalFormatter> {
        let ext = path.extension()?.to_str()?;
        self.external.get(ext)
    }
}

/// Formatters for one generation run, loaded on first use.
pub struct Formatters {
    settings: FormatterSettings,
    limits: SandboxLimits,
    script: Option<FormatterSession>,
    native: Option<NativeFormatter>,
}

impl Formatters {
    /// Script formatters run under `limits`.
    pub fn new(settings: FormatterSettings, limits: SandboxLimits) -> Self {
        Self {
            settings,
            limits,
            script: None,
            native: None,
        }
    }

    pub fn settings(&self) -> &FormatterSettings {
        &self.settings
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    /// Format generated `source` destined for `path`.
    ///
    /// Files handled by an external formatter or not formatted at all are
    /// returned unchanged.
    pub fn format(&mut self, path: &Path, source: String) -> Result<String, FormatError> {
        match strategy_for(path, &self.settings.external) {
            FormatStrategy::Script { language } => {
                self.format_script(&source).map_err(|message| FormatError {
                    language: language.to_string(),
                    message,
                })
            }
            FormatStrategy::Native { language, style } => {
                self.format_native(&source, style).map_err(|message| FormatError {
                    language: language.to_string(),
                    message,
                })
            }
            FormatStrategy::External | FormatStrategy::Verbatim => Ok(source),
        }
    }

    fn format_script(&mut self, source: &str) -> Result<String, String> {
        let session = match self.script.take() {
            Some(session) => session,
            None => {
                let path = &self.settings.script_bundle;
                tracing::debug!(path = %path.display(), "loading script formatter");
                let bundle = std::fs::read_to_string(path)
                    .map_err(|e| format!("{}: {e}", path.display()))?;
                FormatterSession::load(&bundle, self.limits).map_err(|e| e.to_string())?
            }
        };
        let result = session.format(SCRIPT_EXPORT, source);
        self.script = Some(session);
        result.map_err(|e| e.to_string())
    }

    fn format_native(&mut self, source: &str, style: &str) -> Result<String, String> {
        let formatter = match self.native.take() {
            Some(formatter) => formatter,
            None => {
                let path = &self.settings.native_module;
                tracing::debug!(path = %path.display(), "loading native formatter");
                NativeFormatter::from_file(path, self.settings.native_exports.clone())
                    .map_err(|e| e.to_string())?
            }
        };
        let result = formatter.format(source, style);
        self.native = Some(formatter);
        result.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn strategy(name: &str) -> FormatStrategy {
        strategy_for(Path::new(name), &default_external_formatters())
    }

    #[test]
    fn dispatch_table() {
        assert_eq!(
            strategy("src/index.ts"),
            FormatStrategy::Script {
                language: "TypeScript"
            }
        );
        assert!(matches!(
            strategy("Service.cs"),
            FormatStrategy::Native {
                style: CSHARP_STYLE,
                ..
            }
        ));
        for name in ["A.java", "a.c", "a.cpp", "a.c++", "a.h", "a.hpp", "a.h++", "a.m"] {
            assert!(
                matches!(
                    strategy(name),
                    FormatStrategy::Native {
                        style: C_FAMILY_STYLE,
                        ..
                    }
                ),
                "{name}"
            );
        }
        for name in ["lib.rs", "main.go", "app.py"] {
            assert_eq!(strategy(name), FormatStrategy::External, "{name}");
        }
        for name in ["README.md", "Makefile", "schema.json"] {
            assert_eq!(strategy(name), FormatStrategy::Verbatim, "{name}");
        }
    }

    #[test]
    fn settings_for_home() {
        let home = HomeLayout::new("/home/user/.apex");
        let settings = FormatterSettings::for_home(&home);
        assert_eq!(
            settings.script_bundle,
            PathBuf::from("/home/user/.apex/formatters/prettier.js")
        );
        assert_eq!(settings.native_exports, NativeExports::astyle());
        let rust = settings.external_for(Path::new("src/lib.rs")).unwrap();
        assert_eq!(rust.program, "rustfmt");
        assert_eq!(rust.args, vec!["--edition", "2021"]);
        assert!(settings.external_for(Path::new("x.ts")).is_none());
    }

    #[test]
    fn script_formatter_is_loaded_once() {
        let tmp = TempDir::new().unwrap();
        let bundle = tmp.path().join("prettier.js");
        std::fs::write(
            &bundle,
            r#"var calls = 0;
__exports.formatTypeScript = function (s) { calls += 1; return "// " + calls + "\n" + s; };"#,
        )
        .unwrap();

        let mut settings = FormatterSettings::for_home(&HomeLayout::new(tmp.path()));
        settings.script_bundle = bundle;
        let mut formatters = Formatters::new(settings, SandboxLimits::default());

        let first = formatters.format(Path::new("a.ts"), "a".to_string()).unwrap();
        let second = formatters.format(Path::new("b.ts"), "b".to_string()).unwrap();
        assert_eq!(first, "// 1\na");
        assert_eq!(second, "// 2\nb");
    }

    #[test]
    fn missing_formatter_assets_are_format_errors() {
        let tmp = TempDir::new().unwrap();
        let mut formatters = Formatters::new(
            FormatterSettings::for_home(&HomeLayout::new(tmp.path())),
            SandboxLimits::default(),
        );

        let err = formatters.format(Path::new("a.ts"), "x".to_string()).unwrap_err();
        assert_eq!(err.language, "TypeScript");
        assert!(err.to_string().starts_with("error formatting TypeScript:"));

        let err = formatters.format(Path::new("A.cs"), "x".to_string()).unwrap_err();
        assert_eq!(err.language, "C#");
    }

    #[test]
    fn verbatim_and_external_are_untouched() {
        let tmp = TempDir::new().unwrap();
        let mut formatters = Formatters::new(
            FormatterSettings::for_home(&HomeLayout::new(tmp.path())),
            SandboxLimits::default(),
        );
        assert_eq!(formatters.format(Path::new("a.md"), "x ".to_string()).unwrap(), "x ");
        assert_eq!(formatters.format(Path::new("a.go"), "y".to_string()).unwrap(), "y");
    }
}
