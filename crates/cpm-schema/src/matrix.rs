//! Build matrix: the configuration a module is built under.
//!
//! A matrix has two fixed axes, `arch` and `os`, plus any number of named
//! option axes with a set of candidate values each. It reduces to one
//! canonical key that names cache entries and output directories:
//!
//! ```text
//! amd64-linux
//! arm64-darwin+shared=off;simd=avx2,sse4
//! ```
//!
//! Options and their values live in ordered sets, so the key only depends on
//! the content of the matrix, never on how it was built.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Characters reserved by the key format.
const RESERVED: &[char] = &['-', '+', ';', '=', ',', '|', '/', '\\'];

/// Errors raised when constructing a [`Matrix`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatrixError {
    /// A name or value was empty or contained a character reserved by the key format.
    #[error("Invalid matrix {what} '{value}': must be non-empty and avoid -+;=,|/\\")]
    InvalidToken {
        /// Which part was invalid (`arch`, `os`, `option`, `value`).
        what: &'static str,
        /// The offending text.
        value: String,
    },

    /// An option definition was not in `name=value` form.
    #[error("Invalid matrix option '{0}': expected name=value")]
    InvalidOption(String),
}

/// A set of configuration axes reduced to one canonical key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Matrix {
    arch: String,
    os: String,
    #[serde(default)]
    options: BTreeMap<String, BTreeSet<String>>,
}

impl Matrix {
    /// Create a matrix for an architecture and operating system.
    ///
    /// Common aliases are normalized (`x86_64` → `amd64`, `aarch64` →
    /// `arm64`, `macos` → `darwin`).
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::InvalidToken`] if either axis is empty or uses
    /// a reserved character.
    pub fn new(arch: &str, os: &str) -> Result<Self, MatrixError> {
        let arch = normalize_arch(arch);
        let os = normalize_os(os);
        validate("arch", &arch)?;
        validate("os", &os)?;
        Ok(Self {
            arch,
            os,
            options: BTreeMap::new(),
        })
    }

    /// The matrix of the running host.
    pub fn host() -> Self {
        Self {
            arch: normalize_arch(std::env::consts::ARCH),
            os: normalize_os(std::env::consts::OS),
            options: BTreeMap::new(),
        }
    }

    /// Add a candidate value to an option axis.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::InvalidToken`] if the name or value is empty or
    /// uses a reserved character.
    pub fn with_option(mut self, name: &str, value: &str) -> Result<Self, MatrixError> {
        validate("option", name)?;
        validate("value", value)?;
        self.options
            .entry(name.to_string())
            .or_default()
            .insert(value.to_string());
        Ok(self)
    }

    /// Add an option given as `name=value`.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::InvalidOption`] if there is no `=`, or any
    /// error from [`Matrix::with_option`].
    pub fn with_define(self, define: &str) -> Result<Self, MatrixError> {
        let (name, value) = define
            .split_once('=')
            .ok_or_else(|| MatrixError::InvalidOption(define.to_string()))?;
        self.with_option(name.trim(), value.trim())
    }

    /// Target architecture axis.
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Target operating system axis.
    pub fn os(&self) -> &str {
        &self.os
    }

    /// Option axes in name order.
    pub fn options(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.options
    }

    /// Canonical key for this matrix.
    pub fn key(&self) -> String {
        let mut key = format!("{}-{}", self.arch, self.os);
        if !self.options.is_empty() {
            let rendered: Vec<String> = self
                .options
                .iter()
                .map(|(name, values)| {
                    let values: Vec<&str> = values.iter().map(String::as_str).collect();
                    format!("{name}={}", values.join(","))
                })
                .collect();
            key.push('+');
            key.push_str(&rendered.join(";"));
        }
        key
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::host()
    }
}

impl std::fmt::Display for Matrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

fn validate(what: &'static str, value: &str) -> Result<(), MatrixError> {
    if value.is_empty() || value.contains(RESERVED) || value.contains(char::is_whitespace) {
        return Err(MatrixError::InvalidToken {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn normalize_arch(arch: &str) -> String {
    match arch.to_lowercase().as_str() {
        "x86_64" | "x86-64" | "x64" => "amd64".to_string(),
        "aarch64" | "arm64" => "arm64".to_string(),
        "x86" | "i386" | "i686" => "386".to_string(),
        other => other.to_string(),
    }
}

fn normalize_os(os: &str) -> String {
    match os.to_lowercase().as_str() {
        "macos" | "osx" | "darwin" => "darwin".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_key() {
        let m = Matrix::new("x86_64", "linux").unwrap();
        assert_eq!(m.key(), "amd64-linux");
        let m = Matrix::new("aarch64", "macos").unwrap();
        assert_eq!(m.key(), "arm64-darwin");
    }

    #[test]
    fn test_key_independent_of_construction_order() {
        let a = Matrix::new("amd64", "linux")
            .unwrap()
            .with_option("simd", "sse4")
            .unwrap()
            .with_option("shared", "off")
            .unwrap()
            .with_option("simd", "avx2")
            .unwrap();
        let b = Matrix::new("amd64", "linux")
            .unwrap()
            .with_option("simd", "avx2")
            .unwrap()
            .with_define("shared=off")
            .unwrap()
            .with_option("simd", "sse4")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), "amd64-linux+shared=off;simd=avx2,sse4");
    }

    #[test]
    fn test_reserved_characters_rejected() {
        assert!(Matrix::new("amd-64", "linux").is_err());
        assert!(Matrix::new("", "linux").is_err());
        let m = Matrix::new("amd64", "linux").unwrap();
        assert!(m.clone().with_option("a;b", "x").is_err());
        assert!(m.clone().with_option("a", "x=y").is_err());
        assert!(matches!(
            m.with_define("novalue"),
            Err(MatrixError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_host_matrix_is_valid() {
        let host = Matrix::host();
        assert!(!host.arch().is_empty());
        assert!(!host.os().is_empty());
        assert!(!host.key().contains('+'));
    }
}
