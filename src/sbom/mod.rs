//! CycloneDX software bill of materials for a built image.
//!
//! One root component describes the OS and nests one component per
//! installed package. Dependency edges link packages by package URL
//! (`pkg:apk/<os-id>/<name>`).

pub mod cyclonedx;
pub mod os_release;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::apk::Package;
use crate::error::SbomError;

pub use cyclonedx::{Component, Dependency, Document, ExternalReference, License};
pub use os_release::OsRelease;

/// Inputs to SBOM generation.
#[derive(Debug, Clone, Default)]
pub struct SbomOptions {
    pub os: OsRelease,
    pub packages: Vec<Package>,
}

/// Package URL of an apk package.
///
/// Without a version this is the package's identity, used for `bom-ref`
/// and dependency edges so they always resolve to a component.
pub fn package_ref(os_id: &str, name: &str, version: Option<&str>) -> String {
    match version.filter(|v| !v.is_empty()) {
        Some(version) => format!("pkg:apk/{}/{}@{}", os_id, name, version),
        None => format!("pkg:apk/{}/{}", os_id, name),
    }
}

/// Package URL of the OS itself.
pub fn os_ref(os_id: &str) -> String {
    format!("pkg:apk/{}", os_id)
}

/// Reduce a dependency specifier to a package name.
///
/// Virtual and provider dependencies (`so:libc.so`, `cmd:sh`) contain a
/// colon and can't be expressed as package edges, so they yield `None`.
/// Version constraints and anything after them are cut off.
pub fn dependency_name(spec: &str) -> Option<&str> {
    if spec.contains(':') {
        return None;
    }
    let end = spec
        .find(|c: char| " ~<>=/!".contains(c))
        .unwrap_or(spec.len());
    let name = &spec[..end];
    (!name.is_empty()).then_some(name)
}

/// Assemble the document.
pub fn build_document(opts: &SbomOptions) -> Document {
    let os_id = opts.os.id.as_str();
    let mut components = Vec::with_capacity(opts.packages.len());
    let mut dependencies = Vec::with_capacity(opts.packages.len());

    for pkg in &opts.packages {
        let bom_ref = package_ref(os_id, &pkg.name, None);

        let licenses = if pkg.license.is_empty() {
            Vec::new()
        } else {
            vec![License {
                expression: pkg.license.clone(),
            }]
        };

        components.push(Component {
            bom_ref: bom_ref.clone(),
            kind: cyclonedx::COMPONENT_TYPE.to_string(),
            name: pkg.name.clone(),
            version: pkg.version.clone(),
            description: pkg.description.clone(),
            purl: package_ref(os_id, &pkg.name, Some(&pkg.version)),
            external_references: Vec::new(),
            licenses,
            components: Vec::new(),
        });

        let depends_on = pkg
            .dependencies
            .iter()
            .filter_map(|spec| dependency_name(spec))
            .map(|name| package_ref(os_id, name, None))
            .collect();
        dependencies.push(Dependency {
            reference: bom_ref,
            depends_on,
        });
    }

    let root = Component {
        bom_ref: os_ref(os_id),
        kind: cyclonedx::COMPONENT_TYPE.to_string(),
        name: opts.os.name.clone(),
        version: opts.os.version.clone(),
        description: String::new(),
        purl: String::new(),
        external_references: Vec::new(),
        licenses: Vec::new(),
        components,
    };

    Document {
        bom_format: cyclonedx::BOM_FORMAT.to_string(),
        spec_version: cyclonedx::SPEC_VERSION.to_string(),
        version: 1,
        components: vec![root],
        dependencies,
    }
}

/// Build the document and write it to `path` as two-space indented JSON.
pub fn generate(opts: &SbomOptions, path: &Path) -> Result<(), SbomError> {
    let doc = build_document(opts);

    let file = File::create(path).map_err(|source| SbomError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    let write_err = |source: std::io::Error| SbomError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, &doc).map_err(|e| {
        if e.is_io() {
            write_err(e.into())
        } else {
            SbomError::Encode(e)
        }
    })?;
    out.write_all(b"\n").map_err(write_err)?;
    out.flush().map_err(write_err)?;

    tracing::debug!(
        path = %path.display(),
        packages = opts.packages.len(),
        "wrote CycloneDX SBOM"
    );
    Ok(())
}
