//! Configuration types deserialized from `weft.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

/// The top-level project configuration parsed from `weft.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Project metadata and directory layout.
    pub project: ProjectMeta,
    /// Build behavior flags.
    #[serde(default)]
    pub build: BuildConfig,
    /// The extensible language being compiled.
    #[serde(default)]
    pub language: LanguageConfig,
    /// Commands of the external grammar, transformation and base toolchains.
    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

impl ProjectConfig {
    /// Creates a configuration with every section at its default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            project: ProjectMeta {
                name: name.into(),
                source_path: default_source_path(),
                include_path: Vec::new(),
                out_dir: default_out_dir(),
                cache_dir: default_cache_dir(),
            },
            build: BuildConfig::default(),
            language: LanguageConfig::default(),
            toolchain: ToolchainConfig::default(),
        }
    }
}

/// Project metadata and directory layout, relative to the project root.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectMeta {
    /// The project name.
    pub name: String,
    /// Roots searched for source files.
    #[serde(default = "default_source_path", deserialize_with = "deserialize_string_or_vec")]
    pub source_path: Vec<String>,
    /// Directories searched for compiled units and artifacts after `out_dir`.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub include_path: Vec<String>,
    /// Directory receiving generated files and unit records.
    #[serde(default = "default_out_dir")]
    pub out_dir: String,
    /// Directory holding the module-key caches and compiled extension artifacts.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

fn default_source_path() -> Vec<String> {
    vec!["src".to_string()]
}

fn default_out_dir() -> String {
    "bin".to_string()
}

fn default_cache_dir() -> String {
    ".weft-cache".to_string()
}

/// Build behavior flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Resolve a run of consecutive imports as one block.
    pub atomic_import_parsing: bool,
    /// Skip the final grammar check after the last declaration.
    pub no_checking: bool,
    /// How long a duplicate request waits for an in-flight build, in milliseconds.
    pub pending_timeout_ms: u64,
    /// Build independent top-level files on a thread pool.
    pub parallel: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            atomic_import_parsing: false,
            no_checking: false,
            pending_timeout_ms: 30_000,
            parallel: true,
        }
    }
}

/// Description of the extensible language: file extensions, standard-library
/// layout, and the term constructors used to classify declarations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Language name, part of the cache version marker.
    pub name: String,
    /// Language version, part of the cache version marker.
    pub version: String,
    /// Extension of extensible source files.
    pub source_extension: String,
    /// Extension of generated base-language source files.
    pub base_extension: String,
    /// Extension of compiled base-language output.
    pub binary_extension: String,
    /// Extension of synthesized grammar modules.
    pub grammar_extension: String,
    /// Extension of synthesized transformation modules.
    pub transformation_extension: String,
    /// Extension of editor-service files.
    pub editor_extension: String,
    /// Module paths with this prefix belong to the standard library.
    pub stdlib_prefix: String,
    /// Grammar module every unit starts from.
    pub init_grammar: String,
    /// Transformation module every unit starts from.
    pub init_transformation: String,
    /// Constructor names used to classify declaration terms.
    pub constructors: ConstructorNames,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            name: "base".to_string(),
            version: "1".to_string(),
            source_extension: "wft".to_string(),
            base_extension: "txt".to_string(),
            binary_extension: "bin".to_string(),
            grammar_extension: "grm".to_string(),
            transformation_extension: "trn".to_string(),
            editor_extension: "serv".to_string(),
            stdlib_prefix: "std/".to_string(),
            init_grammar: "std/init-grammar".to_string(),
            init_transformation: "std/init-trans".to_string(),
            constructors: ConstructorNames::default(),
        }
    }
}

/// Term constructor names recognized for each declaration kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConstructorNames {
    /// `Import(path, alias?)`.
    pub import: String,
    /// `TransImport(application, alias?)`.
    pub trans_import: String,
    /// `TransApp(transformation, model)` inside a transformation import.
    pub trans_app: String,
    /// `Module(path)` inside a transformation import.
    pub module: String,
    /// `ExtensionDec(name, [fragments])`.
    pub extension: String,
    /// `Grammar(text)` fragment of an extension body.
    pub grammar_fragment: String,
    /// `Transformation(text)` fragment of an extension body.
    pub transformation_fragment: String,
    /// `Editor([services])` fragment of an extension body.
    pub editor_fragment: String,
    /// `PlainDec(name, extension?, body)`.
    pub plain: String,
    /// `TransDec(name, body)`.
    pub transformation: String,
    /// `ModelDec(name, ..)`.
    pub model: String,
    /// `ExportDec(name, import)`.
    pub export: String,
    /// `PackageDec(namespace)`.
    pub package: String,
    /// Base-language declarations `Cons(name, code, [required modules])`.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub base: Vec<String>,
}

impl Default for ConstructorNames {
    fn default() -> Self {
        Self {
            import: "Import".to_string(),
            trans_import: "TransImport".to_string(),
            trans_app: "TransApp".to_string(),
            module: "Module".to_string(),
            extension: "ExtensionDec".to_string(),
            grammar_fragment: "Grammar".to_string(),
            transformation_fragment: "Transformation".to_string(),
            editor_fragment: "Editor".to_string(),
            plain: "PlainDec".to_string(),
            transformation: "TransDec".to_string(),
            model: "ModelDec".to_string(),
            export: "ExportDec".to_string(),
            package: "PackageDec".to_string(),
            base: vec!["BaseDec".to_string()],
        }
    }
}

/// Argument vectors of the command-line toolchain adapter.
///
/// Each entry is a program followed by fixed arguments. An empty vector
/// means the step is not available.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Parses one declaration against a compiled grammar.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub parse: Vec<String>,
    /// Compiles a grammar module.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub compile_grammar: Vec<String>,
    /// Compiles a transformation module.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub compile_transformation: Vec<String>,
    /// Executes a rule of a compiled transformation.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub execute: Vec<String>,
    /// Compiles generated base-language sources.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub compile_base: Vec<String>,
}

/// Deserializes a field that can be either a single string or a list of strings.
///
/// Allows `include_path = "lib"` as well as `include_path = ["lib", "vendor"]`.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_defaults() {
        let build = BuildConfig::default();
        assert!(!build.atomic_import_parsing);
        assert!(!build.no_checking);
        assert_eq!(build.pending_timeout_ms, 30_000);
        assert!(build.parallel);
    }

    #[test]
    fn constructor_defaults() {
        let names = ConstructorNames::default();
        assert_eq!(names.import, "Import");
        assert_eq!(names.base, vec!["BaseDec"]);
    }

    #[test]
    fn string_or_vec_single() {
        let cfg: ToolchainConfig = toml::from_str(r#"parse = "weft-parse""#).unwrap();
        assert_eq!(cfg.parse, vec!["weft-parse"]);
        assert!(cfg.execute.is_empty());
    }

    #[test]
    fn string_or_vec_list() {
        let cfg: ToolchainConfig =
            toml::from_str(r#"execute = ["strj", "--run"]"#).unwrap();
        assert_eq!(cfg.execute, vec!["strj", "--run"]);
    }

    #[test]
    fn new_uses_defaults() {
        let cfg = ProjectConfig::new("demo");
        assert_eq!(cfg.project.source_path, vec!["src"]);
        assert_eq!(cfg.project.out_dir, "bin");
        assert_eq!(cfg.language.source_extension, "wft");
    }
}
