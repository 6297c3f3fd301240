//! Prompt corpus: categories of prompts loaded once before a run.

use anyhow::{bail, Context, Result};
use config::{Config as ConfigLoader, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Built-in corpus used when no prompt file is given
const DEFAULT_PROMPTS: &str = include_str!("../../prompts/default.toml");

/// A labelled, ordered list of prompts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptCategory {
    pub name: String,
    pub prompts: Vec<String>,
}

impl PromptCategory {
    pub fn new(name: impl Into<String>, prompts: Vec<String>) -> Self {
        Self {
            name: name.into(),
            prompts,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromptFile {
    categories: Vec<PromptCategory>,
}

/// Validated, immutable set of prompt categories in report order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptCorpus {
    categories: Vec<PromptCategory>,
}

impl PromptCorpus {
    /// Build a corpus, rejecting empty or ambiguous categories.
    pub fn new(categories: Vec<PromptCategory>) -> Result<Self> {
        if categories.is_empty() {
            bail!("Prompt corpus has no categories");
        }

        let mut seen = HashSet::new();
        for category in &categories {
            if category.name.trim().is_empty() {
                bail!("Prompt category with an empty name");
            }
            if !seen.insert(category.name.as_str()) {
                bail!("Duplicate prompt category: {}", category.name);
            }
            if category.prompts.is_empty() {
                bail!("Prompt category '{}' has no prompts", category.name);
            }
        }

        Ok(Self { categories })
    }

    /// The corpus shipped with the binary
    pub fn builtin() -> Result<Self> {
        Self::parse(DEFAULT_PROMPTS, FileFormat::Toml).context("Failed to load built-in prompts")
    }

    /// Load a corpus file; the format (toml, json, yaml, ...) follows the extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file: PromptFile = ConfigLoader::builder()
            .add_source(File::from(path))
            .build()
            .and_then(|loaded| loaded.try_deserialize())
            .with_context(|| format!("Failed to read prompt file {}", path.display()))?;

        Self::new(file.categories)
            .with_context(|| format!("Invalid prompt file {}", path.display()))
    }

    /// Parse corpus text in the given format
    pub fn parse(content: &str, format: FileFormat) -> Result<Self> {
        let file: PromptFile = ConfigLoader::builder()
            .add_source(File::from_str(content, format))
            .build()
            .and_then(|loaded| loaded.try_deserialize())
            .context("Failed to parse prompt corpus")?;

        Self::new(file.categories)
    }

    pub fn categories(&self) -> &[PromptCategory] {
        &self.categories
    }

    /// Category labels in corpus order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
