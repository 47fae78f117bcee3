//! s6 supervision tree for `service-bundle` images.
//!
//! `s6-svscan /sv` supervises every directory under `/sv`; each holds an
//! executable `run` script for one service.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path};

/// Directory scanned by the supervisor, relative to the image root.
pub const SUPERVISION_DIR: &str = "sv";

fn run_script(command: &str) -> String {
    format!("#!/bin/execlineb -P\n{}\n", command)
}

fn check_service_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => bail!(
            "service name '{}' must be a single path component",
            name
        ),
    }
}

/// Write `sv/<service>/run` for every service.
///
/// `sv/` itself is always created, even with no services, so the
/// supervisor has something to scan.
pub fn write_supervision_tree(rootfs: &Path, services: &BTreeMap<String, String>) -> Result<()> {
    let sv = rootfs.join(SUPERVISION_DIR);
    fs::create_dir_all(&sv).with_context(|| format!("Failed to create {}", sv.display()))?;
    fs::set_permissions(&sv, fs::Permissions::from_mode(0o755))?;

    for (name, command) in services {
        check_service_name(name)?;

        let svc_dir = sv.join(name);
        fs::create_dir_all(&svc_dir)
            .with_context(|| format!("Failed to create {}", svc_dir.display()))?;

        let run = svc_dir.join("run");
        fs::write(&run, run_script(command))
            .with_context(|| format!("Failed to write {}", run.display()))?;
        fs::set_permissions(&run, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("Failed to make {} executable", run.display()))?;

        tracing::debug!(service = %name, "wrote run script");
    }

    tracing::info!(services = services.len(), "wrote supervision tree");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_services_still_creates_sv() {
        let temp = TempDir::new().unwrap();
        write_supervision_tree(temp.path(), &BTreeMap::new()).unwrap();

        let sv = temp.path().join("sv");
        assert!(sv.is_dir());
        assert_eq!(fs::read_dir(&sv).unwrap().count(), 0);
    }

    #[test]
    fn test_run_scripts() {
        let temp = TempDir::new().unwrap();
        let services = BTreeMap::from([
            ("nginx".to_string(), "/usr/sbin/nginx -g \"daemon off;\"".to_string()),
            ("php-fpm".to_string(), "/usr/sbin/php-fpm81 -F".to_string()),
        ]);
        write_supervision_tree(temp.path(), &services).unwrap();

        let run = temp.path().join("sv/nginx/run");
        assert_eq!(
            fs::read_to_string(&run).unwrap(),
            "#!/bin/execlineb -P\n/usr/sbin/nginx -g \"daemon off;\"\n"
        );
        let mode = fs::metadata(&run).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(temp.path().join("sv/php-fpm/run").exists());
    }

    #[test]
    fn test_rejects_nested_or_escaping_names() {
        for bad in ["../etc", "a/b", "/abs", "."] {
            let temp = TempDir::new().unwrap();
            let services = BTreeMap::from([(bad.to_string(), "true".to_string())]);
            let err = write_supervision_tree(temp.path(), &services).unwrap_err();
            assert!(err.to_string().contains("single path component"), "{bad}");
        }
    }
}
