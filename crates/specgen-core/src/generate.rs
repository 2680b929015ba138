//! The generation pipeline.
//!
//! For every document of a generation file the spec text is read once, then
//! each target is generated in filename order:
//!
//! 1. validate the target and honor `ifNotExists`
//! 2. merge shared and target configuration
//! 3. synthesize and bundle the entry script
//! 4. run `generate(spec, config)` in a fresh sandbox session
//! 5. format the result and write it
//!
//! External formatters and `runAfter` commands run once every target has
//! been written. A failing step only abandons its own target.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use specgen_config::{
    read_source, BaseDependencies, GenerationConfig, HomeLayout, ModuleInstaller, TargetSpec,
};

use crate::bundle::{BundleRequest, Bundler, EsbuildBundler};
use crate::command;
use crate::entry::{self, EntryModules, ENTRY_SOURCEFILE, GENERATE_EXPORT};
use crate::error::{AggregatedError, GenerateError, GenerationFailure};
use crate::format::{FormatError, FormatterSettings, Formatters};
use crate::resolve;
use crate::sandbox::{SandboxError, SandboxLimits, SandboxSession};
use crate::source_map::SourceMapIndex;
use crate::stack_trace;

/// Settings for a generation run.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Project directory; destinations, specs and commands are relative to it.
    pub working_dir: PathBuf,
    pub home: HomeLayout,
    /// Modules that must be installed in the home directory.
    pub dependencies: BaseDependencies,
    /// Replacement module specifiers, keyed by the name used in targets.
    pub module_aliases: BTreeMap<String, String>,
    pub entry_modules: EntryModules,
    pub formatters: FormatterSettings,
    pub limits: SandboxLimits,
}

impl GeneratorOptions {
    pub fn new(working_dir: impl Into<PathBuf>, home: HomeLayout) -> Self {
        let formatters = FormatterSettings::for_home(&home);
        Self {
            working_dir: working_dir.into(),
            home,
            dependencies: BaseDependencies::defaults(),
            module_aliases: BTreeMap::new(),
            entry_modules: EntryModules::default(),
            formatters,
            limits: SandboxLimits::default(),
        }
    }

    /// Generate targets naming `module` from `replacement` instead.
    #[must_use]
    pub fn with_alias(mut self, module: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.module_aliases.insert(module.into(), replacement.into());
        self
    }

    fn resolve_module<'a>(&'a self, module: &'a str) -> &'a str {
        self.module_aliases
            .get(module)
            .map_or(module, String::as_str)
    }
}

/// Runs generation files.
pub struct Generator<B = EsbuildBundler> {
    options: GeneratorOptions,
    bundler: B,
    formatters: Formatters,
    installer: Option<Box<dyn ModuleInstaller>>,
}

impl Generator<EsbuildBundler> {
    /// A generator bundling with `esbuild`.
    pub fn new(options: GeneratorOptions) -> Self {
        Self::with_bundler(options, EsbuildBundler::new())
    }
}

impl<B: Bundler> Generator<B> {
    pub fn with_bundler(options: GeneratorOptions, bundler: B) -> Self {
        let formatters = Formatters::new(options.formatters.clone(), options.limits);
        Self {
            options,
            bundler,
            formatters,
            installer: None,
        }
    }

    /// Install missing base dependencies with `installer`.
    #[must_use]
    pub fn with_installer(mut self, installer: Box<dyn ModuleInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Prepare the home directory and run every document of a generation file.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or a summary when several targets failed.
    pub fn run_file(&mut self, location: &str) -> Result<(), GenerationFailure> {
        let mut errors = AggregatedError::new();

        if let Err(e) = self.prepare() {
            errors.push(e);
            return errors.into_result();
        }

        match GenerationConfig::load(location, &self.options.working_dir) {
            Ok(configs) => {
                for config in &configs {
                    errors.extend(self.generate(config));
                }
            }
            Err(e) => errors.push(e),
        }

        errors.into_result()
    }

    fn prepare(&self) -> Result<(), GenerateError> {
        self.options.home.ensure()?;
        self.options
            .dependencies
            .ensure(&self.options.home, self.installer.as_deref())?;
        Ok(())
    }

    /// Generate every target of one document.
    ///
    /// Failures are logged as they happen and returned together.
    pub fn generate(&mut self, config: &GenerationConfig) -> AggregatedError {
        let mut errors = AggregatedError::new();

        let spec = match read_source(&config.spec, &self.options.working_dir) {
            Ok(spec) => spec,
            Err(source) => {
                errors.push(GenerateError::Spec {
                    location: config.spec.clone(),
                    source,
                });
                return errors;
            }
        };

        for (filename, target) in &config.generates {
            if let Err(e) = self.generate_target(&spec, config, filename, target) {
                errors.push(e);
            }
        }

        self.post_format(config, &mut errors);
        self.post_commands(config, &mut errors);
        errors
    }

    fn generate_target(
        &mut self,
        spec: &str,
        config: &GenerationConfig,
        filename: &str,
        target: &TargetSpec,
    ) -> Result<(), GenerateError> {
        if target.module.trim().is_empty() {
            return Err(GenerateError::Validation {
                target: filename.to_string(),
                message: format!("module is required for {filename}"),
            });
        }

        let destination = self.options.working_dir.join(filename);
        if target.if_not_exists {
            match fs::metadata(&destination) {
                Ok(_) => {
                    tracing::info!("Skipping {filename}...");
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(GenerateError::Io {
                        context: format!("could not check {filename}"),
                        source,
                    })
                }
            }
        }

        let merged = target.merged_config(&config.config, filename);

        tracing::info!("Generating {filename}...");
        let module = self.options.resolve_module(&target.module);
        let entry = entry::synthesize(&self.options.entry_modules, module, target.visitor())
            .map_err(|source| GenerateError::Entry {
                target: filename.to_string(),
                source,
            })?;

        let request = BundleRequest {
            entry,
            sourcefile: ENTRY_SOURCEFILE.to_string(),
            resolve_dir: self.options.working_dir.clone(),
            node_paths: vec![
                self.options.working_dir.clone(),
                self.options.home.node_modules_dir(),
            ],
        };
        let bundle = self
            .bundler
            .bundle(&request)
            .map_err(|source| GenerateError::Bundle {
                target: filename.to_string(),
                source,
            })?;
        let index =
            SourceMapIndex::parse(&bundle.source_map).map_err(|source| GenerateError::SourceMap {
                target: filename.to_string(),
                source,
            })?;

        let callbacks = [resolve::callback(self.options.home.definitions_dir())];
        let session = SandboxSession::compile(&bundle.code, &callbacks, self.options.limits)
            .map_err(|source| GenerateError::Sandbox {
                target: filename.to_string(),
                source,
            })?;
        let result = session.invoke_string(
            GENERATE_EXPORT,
            &[JsonValue::String(spec.to_string()), JsonValue::Object(merged)],
        );
        session.dispose();

        let source = match result {
            Ok(source) => source,
            Err(SandboxError::Invocation(exception)) => {
                return Err(GenerateError::Script {
                    target: filename.to_string(),
                    trace: stack_trace::translate(
                        &exception.stack_trace(),
                        &index,
                        &bundle.map_dir,
                    ),
                });
            }
            Err(source) => {
                return Err(GenerateError::Sandbox {
                    target: filename.to_string(),
                    source,
                })
            }
        };

        let source = self
            .formatters
            .format(Path::new(filename), source)
            .map_err(|source| GenerateError::Format {
                target: filename.to_string(),
                source,
            })?;

        write_output(&destination, &source, target.executable)
    }

    /// Run external formatters over written files.
    fn post_format(&self, config: &GenerationConfig, errors: &mut AggregatedError) {
        for filename in config.generates.keys() {
            let path = Path::new(filename);
            let Some(formatter) = self.options.formatters.external_for(path) else {
                continue;
            };
            let destination = self.options.working_dir.join(path);
            if !destination.exists() {
                tracing::debug!("{filename} was not written; not formatting");
                continue;
            }

            tracing::info!("Formatting {filename}...");
            if let Err(e) = formatter.run(&destination, &self.options.working_dir) {
                errors.push(GenerateError::Format {
                    target: filename.clone(),
                    source: FormatError {
                        language: formatter.language.clone(),
                        message: e.to_string(),
                    },
                });
            }
        }
    }

    fn post_commands(&self, config: &GenerationConfig, errors: &mut AggregatedError) {
        for target in config.generates.values() {
            for cmd in &target.run_after {
                let line = command::normalize(&cmd.command);
                let dir = if cmd.dir.is_empty() {
                    self.options.working_dir.clone()
                } else {
                    self.options.working_dir.join(&cmd.dir)
                };

                tracing::info!("Running: {line}");
                if let Err(e) = command::run_line(&line, &dir) {
                    errors.push(e);
                }
            }
        }
    }
}

/// Write a generated file, creating parent directories.
fn write_output(path: &Path, contents: &str, executable: bool) -> Result<(), GenerateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| GenerateError::Io {
            context: format!("error creating directory {}", parent.display()),
            source,
        })?;
    }

    fs::write(path, contents).map_err(|source| GenerateError::Io {
        context: format!("error writing file {}", path.display()),
        source,
    })?;

    if executable {
        mark_executable(path)?;
    }
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<(), GenerateError> {
    use std::os::unix::fs::PermissionsExt;

    let io_error = |source| GenerateError::Io {
        context: format!("error setting permissions on {}", path.display()),
        source,
    };
    let mut permissions = fs::metadata(path).map_err(io_error)?.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions).map_err(io_error)
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<(), GenerateError> {
    Ok(())
}
