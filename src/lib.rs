//! Reproducible root filesystems from declarative apk package manifests.
//!
//! No container runtime, no Dockerfile: a YAML manifest names repositories,
//! keys, packages, accounts and an entrypoint, and the build populates a
//! working directory through apk, then archives it as a byte-reproducible
//! gzip'd tar layer with an optional CycloneDX SBOM.
//!
//! # Architecture
//!
//! ```text
//! config::ImageConfiguration ──► build::BuildContext::build_image
//!                                   │
//!                                   ├── apk::PackageManager   (db, keyring, repos, world, fixate)
//!                                   ├── accounts               (passwd / group)
//!                                   ├── build::assertions      (post-build checks, all reported)
//!                                   ├── emulation              (busybox applets under proot)
//!                                   └── supervision            (s6 service tree)
//!                                   │
//!                                   ├──► tarball::write_layer  (layer.tar.gz + sha256)
//!                                   └──► sbom::generate        (CycloneDX 1.4 JSON)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use rootfs_forge::{ApkCli, BuildContext, BuildOptions, ImageConfiguration};
//!
//! let config = ImageConfiguration::load("alpine-base.yaml".as_ref())?;
//! let mut ctx = BuildContext::new(config, BuildOptions::new("/tmp/rootfs"), Box::new(ApkCli::new()?));
//! ctx.build_image()?;
//! let layer = ctx.write_layer("layer.tar.gz".as_ref())?;
//! println!("{}", layer.digest);
//! ```

pub mod accounts;
pub mod apk;
pub mod build;
pub mod config;
pub mod emulation;
pub mod error;
pub mod observer;
pub mod process;
pub mod sbom;
pub mod supervision;
pub mod tarball;

pub use apk::{ApkCli, PackageManager};
pub use build::{BuildContext, BuildOptions, Phase};
pub use config::{Architecture, ImageConfiguration};
pub use error::{AssertionFailures, BuildError, ConfigError, SbomError};
pub use observer::{BuildEvent, BuildObserver, TracingObserver};
pub use tarball::LayerInfo;
