//! The subset of the CycloneDX 1.4 JSON model an image SBOM uses.
//!
//! Field declaration order is serialization order.

use serde::Serialize;

pub const BOM_FORMAT: &str = "CycloneDX";
pub const SPEC_VERSION: &str = "1.4";

/// Component type for both the OS and its packages; CycloneDX has no
/// dedicated package type.
pub const COMPONENT_TYPE: &str = "operating-system";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub bom_format: String,
    pub spec_version: String,
    pub version: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    #[serde(rename = "bom-ref")]
    pub bom_ref: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub purl: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_references: Vec<ExternalReference>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<License>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct License {
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalReference {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Direct dependencies of one component. `dependsOn` is always present,
/// empty or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    #[serde(rename = "ref")]
    pub reference: String,
    pub depends_on: Vec<String>,
}
