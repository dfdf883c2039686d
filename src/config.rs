use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Language { C, Cpp }

/// How much work the parser does.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Mode {
    /// Declarations and matching braces only. Function bodies are skipped.
    Structural,
    /// Full bindings, references and expression types.
    Complete,
}

/// Input configuration supplied by the build system. Read-only for the duration of a parse.
#[derive(Clone, Debug)]
pub struct Config {
    pub language: Language,
    pub mode: Mode,
    /// Predefined object-like macros, as `(name, replacement text)`.
    pub macros: Vec<(String, String)>,
    pub include_paths: Vec<PathBuf>,
    pub max_include_depth: usize,
}

impl Default for Config {
    fn default() -> Config { Config::cpp() }
}

impl Config {
    pub fn cpp() -> Config {
        Config {
            language: Language::Cpp,
            mode: Mode::Complete,
            macros: Vec::default(),
            include_paths: Vec::default(),
            max_include_depth: 200,
        }
    }

    pub fn c() -> Config { Config { language: Language::C, ..Config::cpp() } }

    pub fn structural(mut self) -> Config { self.mode = Mode::Structural; self }

    pub fn define(mut self, name: &str, value: &str) -> Config {
        self.macros.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn include_path(mut self, path: impl Into<PathBuf>) -> Config {
        self.include_paths.push(path.into());
        self
    }

    /// Macros every translation unit starts with, before `macros`.
    pub fn predefined(&self) -> Vec<(&'static str, &'static str)> {
        let mut predefined = vec![("__STDC__", "1")];
        if self.language == Language::Cpp { predefined.push(("__cplusplus", "201703L")); }
        predefined
    }
}

/// Where `#include` finds its files.
pub trait Source {
    /// Resolve `header` as included from the file named `includer`, returning the resolved
    /// name and its contents.
    fn include(&self, header: &str, angle: bool, includer: &str) -> Option<(String, Rc<[u8]>)>;
}

/// Headers on disk. Quote includes search the including file's directory first.
pub struct FileSystem { include_paths: Vec<PathBuf> }

impl FileSystem {
    pub fn new(config: &Config) -> FileSystem {
        FileSystem { include_paths: config.include_paths.clone() }
    }

    fn read(path: &Path) -> Option<(String, Rc<[u8]>)> {
        let bytes = fs::read(path).ok()?;
        Some((path.to_string_lossy().into_owned(), Rc::from(bytes)))
    }
}

impl Source for FileSystem {
    fn include(&self, header: &str, angle: bool, includer: &str) -> Option<(String, Rc<[u8]>)> {
        if !angle {
            let dir = Path::new(includer).parent().unwrap_or_else(|| Path::new(""));
            if let Some(file) = FileSystem::read(&dir.join(header)) { return Some(file); }
        }
        self.include_paths.iter().find_map(|dir| FileSystem::read(&dir.join(header)))
    }
}

/// Headers held in memory, e.g. unsaved editor buffers or test fixtures.
#[derive(Default)]
pub struct Memory { files: IndexMap<String, Rc<[u8]>> }

impl Memory {
    pub fn with(mut self, name: &str, text: &str) -> Memory {
        self.files.insert(name.to_owned(), Rc::from(text.as_bytes()));
        self
    }
}

impl Source for Memory {
    fn include(&self, header: &str, _: bool, _: &str) -> Option<(String, Rc<[u8]>)> {
        let (name, text) = self.files.get_key_value(header)?;
        Some((name.clone(), text.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Language, Memory, Mode, Source};

    #[test]
    fn builder() {
        let config = Config::c().structural().define("N", "3").include_path("/usr/include");
        assert_eq!(config.language, Language::C);
        assert_eq!(config.mode, Mode::Structural);
        assert_eq!(config.macros, [("N".to_owned(), "3".to_owned())]);
        assert_eq!(config.predefined(), [("__STDC__", "1")]);
        assert_eq!(Config::cpp().predefined().len(), 2);
    }

    #[test]
    fn memory() {
        let source = Memory::default().with("a.h", "int a;");
        let (name, text) = source.include("a.h", false, "main.cpp").unwrap();
        assert_eq!(name, "a.h");
        assert_eq!(&text[..], b"int a;");
        assert!(source.include("b.h", true, "main.cpp").is_none());
    }
}
