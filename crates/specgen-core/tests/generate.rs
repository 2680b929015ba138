//! End-to-end generation with a stub bundler standing in for esbuild.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use specgen_config::{BaseDependencies, GenerationConfig, HomeLayout};
use specgen_core::format::ExternalFormatter;
use specgen_core::{
    Bundle, BundleError, BundleRequest, Bundler, GenerateError, Generator, GeneratorOptions,
};
use tempfile::TempDir;

const SOURCE_MAP: &str =
    r#"{"version":3,"sources":["../src/visitor.ts"],"names":[],"mappings":"AAAA;AACA"}"#;

/// Returns a fixed script and records every request.
#[derive(Clone)]
struct StubBundler {
    code: String,
    requests: Rc<RefCell<Vec<BundleRequest>>>,
}

impl StubBundler {
    fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            requests: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl Bundler for StubBundler {
    fn bundle(&self, request: &BundleRequest) -> Result<Bundle, BundleError> {
        self.requests.borrow_mut().push(request.clone());
        Ok(Bundle {
            code: self.code.clone(),
            source_map: SOURCE_MAP.to_string(),
            map_dir: request.resolve_dir.join("dist"),
        })
    }
}

const ECHO_BUNDLE: &str = r#"
__exports["generate"] = function (spec, config) {
    return spec + "|" + config["$filename"] + "|" + (config.name || "") + "|" + (config.shared || "");
};
"#;

struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("spec.apex"), "namespace \"test\"").unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn home(&self) -> HomeLayout {
        HomeLayout::new(self.path().join(".apex"))
    }

    fn generator(&self, bundler: StubBundler) -> Generator<StubBundler> {
        let mut options = GeneratorOptions::new(self.path(), self.home());
        options.dependencies = BaseDependencies::new();
        Generator::with_bundler(options, bundler)
    }

    fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path().join(name)).unwrap()
    }
}

#[test]
fn generates_files_with_merged_config() {
    let project = Project::new();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
config:
  name: shared-name
  shared: yes
generates:
  out/first.txt:
    module: "@example/text"
    config:
      name: first
  second.txt:
    module: "@example/text"
"#,
    )
    .unwrap();

    let bundler = StubBundler::new(ECHO_BUNDLE);
    let mut generator = project.generator(bundler.clone());
    let errors = generator.generate(&config);
    assert!(errors.is_empty(), "{:?}", errors.errors());

    assert_eq!(
        project.read("out/first.txt"),
        "namespace \"test\"|out/first.txt|first|yes"
    );
    assert_eq!(
        project.read("second.txt"),
        "namespace \"test\"|second.txt|shared-name|yes"
    );

    let requests = bundler.requests.borrow();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].sourcefile, "generate.ts");
    assert!(requests[0].entry.contains("import DefaultVisitor from \"@example/text\";"));
    assert_eq!(requests[0].node_paths[0], project.path());
    assert_eq!(requests[0].node_paths[1], project.home().node_modules_dir());
}

#[test]
fn if_not_exists_skips_existing_files() {
    let project = Project::new();
    fs::write(project.path().join("keep.txt"), "original").unwrap();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  keep.txt:
    module: "@example/text"
    ifNotExists: true
"#,
    )
    .unwrap();

    let bundler = StubBundler::new(ECHO_BUNDLE);
    let mut generator = project.generator(bundler.clone());
    let errors = generator.generate(&config);

    assert!(errors.is_empty());
    assert_eq!(project.read("keep.txt"), "original");
    assert!(bundler.requests.borrow().is_empty());
}

#[test]
fn if_not_exists_generates_missing_files() {
    let project = Project::new();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  new.txt:
    module: "@example/text"
    ifNotExists: true
"#,
    )
    .unwrap();

    let mut generator = project.generator(StubBundler::new(ECHO_BUNDLE));
    assert!(generator.generate(&config).is_empty());
    assert!(project.read("new.txt").ends_with("|new.txt||"));
}

#[test]
fn single_failure_is_reported_verbatim() {
    let project = Project::new();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  broken.txt:
    visitorClass: Visitor
  fine.txt:
    module: "@example/text"
"#,
    )
    .unwrap();

    let bundler = StubBundler::new(ECHO_BUNDLE);
    let mut generator = project.generator(bundler.clone());
    let failure = generator.generate(&config).into_result().unwrap_err();

    assert_eq!(failure.to_string(), "module is required for broken.txt");
    assert!(!project.path().join("broken.txt").exists());
    assert!(project.path().join("fine.txt").exists());
    assert_eq!(bundler.requests.borrow().len(), 1);
}

#[test]
fn several_failures_are_counted() {
    let project = Project::new();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  a.txt:
    module: ""
  b.txt:
    module: "@example/text"
    visitorClass: "Not Valid"
"#,
    )
    .unwrap();

    let mut generator = project.generator(StubBundler::new(ECHO_BUNDLE));
    let failure = generator.generate(&config).into_result().unwrap_err();
    assert_eq!(failure.to_string(), "generation failed due to 2 error(s)");
    assert_eq!(failure.errors()[0].target(), Some("a.txt"));
    assert_eq!(failure.errors()[1].target(), Some("b.txt"));
}

#[test]
fn script_errors_carry_the_exception() {
    let project = Project::new();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  fail.txt:
    module: "@example/text"
"#,
    )
    .unwrap();

    let bundle = r#"__exports["generate"] = function () { throw new Error("boom"); };"#;
    let mut generator = project.generator(StubBundler::new(bundle));
    let failure = generator.generate(&config).into_result().unwrap_err();

    let message = failure.to_string();
    assert!(message.starts_with("Error: boom"), "{message}");
    let original = format!("({}:1:1)", project.path().join("src/visitor.ts").display());
    assert!(message.contains(&original), "{message}");
    assert!(message.contains("at <eval>"), "{message}");
    assert!(!project.path().join("fail.txt").exists());
}

#[test]
fn definitions_are_resolved_from_home() {
    let project = Project::new();
    let definitions = project.home().definitions_dir();
    fs::create_dir_all(definitions.join("shared")).unwrap();
    fs::write(definitions.join("shared/index.apex"), "type Shared {}").unwrap();

    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  resolved.txt:
    module: "@example/text"
"#,
    )
    .unwrap();

    let bundle = r#"
__exports["generate"] = function () {
    const found = __resolve("shared");
    const missing = __resolve("absent");
    return found.value + "|" + missing.ok;
};
"#;
    let mut generator = project.generator(StubBundler::new(bundle));
    assert!(generator.generate(&config).is_empty());
    assert_eq!(project.read("resolved.txt"), "type Shared {}|false");
}

#[test]
fn non_string_results_are_errors() {
    let project = Project::new();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  number.txt:
    module: "@example/text"
"#,
    )
    .unwrap();

    let mut generator =
        project.generator(StubBundler::new(r#"__exports.generate = function () { return 7; };"#));
    let failure = generator.generate(&config).into_result().unwrap_err();
    assert!(failure.to_string().contains("expected a string"));
}

#[test]
fn missing_spec_fails_the_document() {
    let project = Project::new();
    let config = GenerationConfig::parse(
        r#"
spec: absent.apex
generates:
  out.txt:
    module: "@example/text"
"#,
    )
    .unwrap();

    let bundler = StubBundler::new(ECHO_BUNDLE);
    let mut generator = project.generator(bundler.clone());
    let failure = generator.generate(&config).into_result().unwrap_err();
    assert!(failure.to_string().contains("absent.apex"));
    assert!(bundler.requests.borrow().is_empty());
}

#[test]
fn module_aliases_rewrite_imports() {
    let project = Project::new();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  out.txt:
    module: "@example/text"
    visitorClass: TextVisitor
"#,
    )
    .unwrap();

    let bundler = StubBundler::new(ECHO_BUNDLE);
    let mut options = GeneratorOptions::new(project.path(), project.home())
        .with_alias("@example/text", "./local/text");
    options.dependencies = BaseDependencies::new();
    let mut generator = Generator::with_bundler(options, bundler.clone());

    assert!(generator.generate(&config).is_empty());
    let requests = bundler.requests.borrow();
    assert!(requests[0]
        .entry
        .contains("import { TextVisitor } from \"./local/text\";"));
}

#[test]
fn run_file_processes_every_document() {
    let project = Project::new();
    fs::write(
        project.path().join("apex.yaml"),
        r#"
spec: spec.apex
generates:
  one.txt:
    module: "@example/text"
---
spec: spec.apex
generates:
  two.txt:
    module: "@example/text"
"#,
    )
    .unwrap();

    let mut generator = project.generator(StubBundler::new(ECHO_BUNDLE));
    generator.run_file("apex.yaml").unwrap();

    assert!(project.path().join("one.txt").exists());
    assert!(project.path().join("two.txt").exists());
    assert!(project.home().definitions_dir().is_dir());
}

#[test]
fn run_file_reports_missing_dependencies() {
    let project = Project::new();
    fs::write(
        project.path().join("apex.yaml"),
        "spec: spec.apex\ngenerates:\n  out.txt:\n    module: m\n",
    )
    .unwrap();

    let options = GeneratorOptions::new(project.path(), project.home());
    let mut generator = Generator::with_bundler(options, StubBundler::new(ECHO_BUNDLE));
    let failure = generator.run_file("apex.yaml").unwrap_err();

    assert!(failure.to_string().contains("@apexlang/core"));
    assert!(!project.path().join("out.txt").exists());
}

#[cfg(unix)]
#[test]
fn run_after_commands_run_in_their_directory() {
    let project = Project::new();
    fs::create_dir_all(project.path().join("sub")).unwrap();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  out.txt:
    module: "@example/text"
    runAfter:
      - command: |
          touch
          done.txt
        dir: sub
"#,
    )
    .unwrap();

    let mut generator = project.generator(StubBundler::new(ECHO_BUNDLE));
    assert!(generator.generate(&config).is_empty());
    assert!(project.path().join("sub/done.txt").exists());
}

#[cfg(unix)]
#[test]
fn failing_commands_are_aggregated() {
    let project = Project::new();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  out.txt:
    module: "@example/text"
    runAfter:
      - command: "false"
"#,
    )
    .unwrap();

    let mut generator = project.generator(StubBundler::new(ECHO_BUNDLE));
    let failure = generator.generate(&config).into_result().unwrap_err();
    assert!(failure.to_string().starts_with("error running command: false"));
    assert!(project.path().join("out.txt").exists());
}

#[cfg(unix)]
fn generator_with_formatter(project: &Project, formatter: ExternalFormatter) -> Generator<StubBundler> {
    let mut options = GeneratorOptions::new(project.path(), project.home());
    options.dependencies = BaseDependencies::new();
    options.formatters.external = [("rs".to_string(), formatter)].into_iter().collect();
    Generator::with_bundler(options, StubBundler::new(ECHO_BUNDLE))
}

#[cfg(unix)]
#[test]
fn external_formatters_run_on_written_files() {
    let project = Project::new();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  src/lib.rs:
    module: "@example/text"
  notes.txt:
    module: "@example/text"
"#,
    )
    .unwrap();

    // The file path is appended as the last argument, which `sh -c` binds to $0.
    let formatter = ExternalFormatter::new("Rust", "sh", &["-c", "printf formatted > \"$0\""]);
    let mut generator = generator_with_formatter(&project, formatter);
    let errors = generator.generate(&config);

    assert!(errors.is_empty(), "{:?}", errors.errors());
    assert_eq!(project.read("src/lib.rs"), "formatted");
    assert!(project.read("notes.txt").ends_with("|notes.txt||"));
}

#[cfg(unix)]
#[test]
fn external_formatter_failures_are_aggregated() {
    let project = Project::new();
    let config = GenerationConfig::parse(
        r#"
spec: spec.apex
generates:
  src/lib.rs:
    module: "@example/text"
    runAfter:
      - command: touch after.txt
"#,
    )
    .unwrap();

    let formatter = ExternalFormatter::new("Rust", "false", &[]);
    let mut generator = generator_with_formatter(&project, formatter);
    let failure = generator.generate(&config).into_result().unwrap_err();

    let [error] = failure.errors() else {
        panic!("expected one error, got {failure}");
    };
    assert!(matches!(error, GenerateError::Format { .. }), "{error:?}");
    assert_eq!(error.target(), Some("src/lib.rs"));
    assert!(error.to_string().contains("error formatting Rust"), "{error}");

    assert!(project.path().join("src/lib.rs").exists());
    assert!(project.path().join("after.txt").exists());
}
