use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// One test-suite YAML file as discovered in a `.rocketship` directory. The
/// step payloads are plugin-specific and stay opaque here.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SuiteFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tests: Vec<TestDef>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TestDef {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<serde_yaml::Value>,
}

pub fn parse_suite(bytes: &[u8]) -> AppResult<SuiteFile> {
    serde_yaml::from_slice(bytes).map_err(|e| AppError::BadRequest(format!("invalid suite yaml: {e}")))
}
