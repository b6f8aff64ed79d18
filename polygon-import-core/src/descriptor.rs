//! Typed view of a package descriptor (`problem.xml`).
//!
//! Only the parts the importer uses are modelled; unknown elements and
//! attributes are ignored.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("failed to read descriptor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse descriptor {path}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: quick_xml::DeError,
    },
    #[error("descriptor {path} has no short-name attribute")]
    MissingShortName { path: PathBuf },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "@short-name")]
    short_name: Option<String>,
    #[serde(rename = "@revision")]
    pub revision: Option<u32>,
    pub judging: Option<Judging>,
    pub files: Option<Files>,
    pub assets: Option<Assets>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Judging {
    #[serde(rename = "@input-file", default)]
    pub input_file: String,
    #[serde(rename = "@output-file", default)]
    pub output_file: String,
    #[serde(rename = "testset", default)]
    pub testsets: Vec<Testset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Testset {
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "time-limit")]
    pub time_limit: Option<u64>,
    #[serde(rename = "memory-limit")]
    pub memory_limit: Option<u64>,
    #[serde(rename = "input-path-pattern")]
    pub input_path_pattern: Option<String>,
    pub tests: Option<Tests>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tests {
    #[serde(rename = "test", default)]
    pub tests: Vec<Test>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Test {
    #[serde(rename = "@method", default)]
    pub method: String,
    #[serde(rename = "@cmd")]
    pub cmd: Option<String>,
    #[serde(rename = "@sample")]
    pub sample: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Files {
    pub resources: Option<FileList>,
    pub executables: Option<Executables>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileList {
    #[serde(rename = "file", default)]
    pub files: Vec<FileRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    #[serde(rename = "@path")]
    pub path: String,
    #[serde(rename = "@type")]
    pub source_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Executables {
    #[serde(rename = "executable", default)]
    pub executables: Vec<Executable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Executable {
    pub source: Option<FileRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Assets {
    pub checker: Option<Checker>,
    pub validators: Option<Validators>,
    pub solutions: Option<Solutions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Checker {
    #[serde(rename = "@name")]
    pub name: Option<String>,
    pub source: Option<FileRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Validators {
    #[serde(rename = "validator", default)]
    pub validators: Vec<Executable>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Solutions {
    #[serde(rename = "solution", default)]
    pub solutions: Vec<Solution>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Solution {
    #[serde(rename = "@tag", default)]
    pub tag: String,
    pub source: Option<FileRef>,
}

impl Descriptor {
    /// Parses `path` and checks that the root carries a short name.
    pub fn from_file(path: &Path) -> Result<Self, DescriptorError> {
        let content = fs::read_to_string(path).map_err(|source| DescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let descriptor: Descriptor =
            quick_xml::de::from_str(&content).map_err(|source| DescriptorError::Xml {
                path: path.to_path_buf(),
                source,
            })?;
        match descriptor.short_name.as_deref() {
            Some(name) if !name.trim().is_empty() => Ok(descriptor),
            _ => Err(DescriptorError::MissingShortName {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn short_name(&self) -> &str {
        self.short_name.as_deref().unwrap_or_default()
    }

    /// Paths of declared resource files, relative to the package root.
    pub fn resource_paths(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .filter_map(|files| files.resources.as_ref())
            .flat_map(|resources| resources.files.iter())
            .map(|file| file.path.as_str())
    }

    pub fn resources(&self) -> &[FileRef] {
        self.files
            .as_ref()
            .and_then(|files| files.resources.as_ref())
            .map(|list| list.files.as_slice())
            .unwrap_or_default()
    }

    pub fn executables(&self) -> impl Iterator<Item = &FileRef> {
        self.files
            .iter()
            .filter_map(|files| files.executables.as_ref())
            .flat_map(|list| list.executables.iter())
            .filter_map(|executable| executable.source.as_ref())
    }

    pub fn checker(&self) -> Option<&Checker> {
        self.assets.as_ref().and_then(|assets| assets.checker.as_ref())
    }

    pub fn validators(&self) -> impl Iterator<Item = &FileRef> {
        self.assets
            .iter()
            .filter_map(|assets| assets.validators.as_ref())
            .flat_map(|list| list.validators.iter())
            .filter_map(|validator| validator.source.as_ref())
    }

    pub fn solutions(&self) -> &[Solution] {
        self.assets
            .as_ref()
            .and_then(|assets| assets.solutions.as_ref())
            .map(|list| list.solutions.as_slice())
            .unwrap_or_default()
    }

    /// The first testset, which Polygon treats as the main one.
    pub fn main_testset(&self) -> Option<&Testset> {
        self.judging.as_ref().and_then(|judging| judging.testsets.first())
    }
}
