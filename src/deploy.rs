//! Deployment of certificates to configured filesystem targets.
//!
//! A target is rebuilt only when it is missing or older than the
//! certificate it bundles. The bundle is assembled fully in memory in the
//! configured component order before the destination file is opened, so a
//! target is never observable in a partially-written state. Ownership and
//! permission problems are surfaced as warnings, never as run failures;
//! one target's failure does not block its siblings.

use std::fs;
use std::path::Path;

use nix::unistd::{chown, Gid, Group, Uid, User};
use tracing::{debug, error, info, warn};

use crate::actions::ActionScheduler;
use crate::config::{DeploymentTarget, DomainGroupConfig, FormatToken};
use crate::error::DeployError;

/// Whether the target file is at least as new as the certificate.
pub fn target_is_current(target: &Path, cert_file: &Path) -> bool {
    let (Ok(target_meta), Ok(cert_meta)) = (fs::metadata(target), fs::metadata(cert_file)) else {
        return false;
    };
    match (target_meta.modified(), cert_meta.modified()) {
        (Ok(target_time), Ok(cert_time)) => target_time >= cert_time,
        _ => false,
    }
}

/// Deploy every target of a group whose certificate is current, emitting
/// the targets' actions to the scheduler. Targets are independent.
pub fn deploy_group(config: &DomainGroupConfig, scheduler: &mut ActionScheduler) {
    for target in &config.actions {
        if target_is_current(&target.path, &target.cert_file) {
            debug!(path = %target.path.display(), "Deployment target is up to date");
            continue;
        }
        info!(path = %target.path.display(), "Updating deployment target");
        match rebuild_target(target) {
            Ok(()) => {
                apply_ownership(target);
                scheduler.schedule(target.action.as_deref());
            }
            Err(e) => {
                error!(path = %target.path.display(), error = %e, "Deployment target rebuild failed");
            }
        }
    }
}

/// Rebuild the target file by concatenating the requested components in
/// the configured order.
pub fn rebuild_target(target: &DeploymentTarget) -> Result<(), DeployError> {
    let mut bundle: Vec<u8> = Vec::new();
    for token in &target.format {
        match token {
            FormatToken::Crt => bundle.extend(fs::read(&target.cert_file)?),
            FormatToken::Key => bundle.extend(fs::read(&target.key_file)?),
            FormatToken::Ca => {
                if !target.ca_file.is_file() {
                    return Err(DeployError::MissingCaFile(target.ca_file.clone()));
                }
                bundle.extend(fs::read(&target.ca_file)?);
            }
        }
    }
    fs::write(&target.path, bundle)?;
    Ok(())
}

/// Apply configured owner, group and permission bits. All failures here
/// are warnings: the freshly-written bundle stays in place.
fn apply_ownership(target: &DeploymentTarget) {
    let uid = target.user.as_deref().and_then(|name| match User::from_name(name) {
        Ok(Some(user)) => Some(user.uid),
        _ => {
            warn!(path = %target.path.display(), user = name, "Could not resolve owning user");
            None
        }
    });
    let gid = target.group.as_deref().and_then(|name| match Group::from_name(name) {
        Ok(Some(group)) => Some(group.gid),
        _ => {
            warn!(path = %target.path.display(), group = name, "Could not resolve owning group");
            None
        }
    });
    if uid.is_some() || gid.is_some() {
        if let Err(e) = set_owner(&target.path, uid, gid) {
            warn!(path = %target.path.display(), error = %e, "Could not set target file ownership");
        }
    }

    if let Some(mode) = target.perm {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&target.path, fs::Permissions::from_mode(mode)) {
                warn!(path = %target.path.display(), error = %e, "Could not set target file permissions");
            }
        }
        #[cfg(not(unix))]
        let _ = mode;
    }
}

fn set_owner(path: &Path, uid: Option<Uid>, gid: Option<Gid>) -> nix::Result<()> {
    chown(path, uid, gid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionScheduler;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn target(dir: &TempDir, format: Vec<FormatToken>, action: Option<&str>) -> DeploymentTarget {
        DeploymentTarget {
            path: dir.path().join("bundle.pem"),
            user: None,
            group: None,
            perm: Some(0o600),
            format,
            action: action.map(str::to_string),
            ca_file: dir.path().join("test.ca"),
            cert_file: dir.path().join("test.crt"),
            key_file: dir.path().join("test.key"),
        }
    }

    fn write_sources(dir: &TempDir) {
        fs::write(dir.path().join("test.crt"), "CERT\n").unwrap();
        fs::write(dir.path().join("test.key"), "KEY\n").unwrap();
        fs::write(dir.path().join("test.ca"), "CA\n").unwrap();
    }

    #[test]
    fn test_rebuild_concatenates_in_order() {
        let dir = TempDir::new().unwrap();
        write_sources(&dir);

        let target = target(&dir, vec![FormatToken::Crt, FormatToken::Key], None);
        rebuild_target(&target).unwrap();
        assert_eq!(fs::read_to_string(&target.path).unwrap(), "CERT\nKEY\n");
    }

    #[test]
    fn test_rebuild_duplicate_tokens() {
        let dir = TempDir::new().unwrap();
        write_sources(&dir);

        let target = target(
            &dir,
            vec![FormatToken::Ca, FormatToken::Crt, FormatToken::Ca],
            None,
        );
        rebuild_target(&target).unwrap();
        assert_eq!(fs::read_to_string(&target.path).unwrap(), "CA\nCERT\nCA\n");
    }

    #[test]
    fn test_missing_ca_file_aborts_target() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("test.crt"), "CERT\n").unwrap();
        fs::write(dir.path().join("test.key"), "KEY\n").unwrap();

        let target = target(&dir, vec![FormatToken::Crt, FormatToken::Ca], None);
        let err = rebuild_target(&target).unwrap_err();
        assert!(matches!(err, DeployError::MissingCaFile(_)));
        // Nothing was written.
        assert!(!target.path.exists());
    }

    #[test]
    fn test_target_is_current_when_newer() {
        let dir = TempDir::new().unwrap();
        write_sources(&dir);

        let target = target(&dir, vec![FormatToken::Crt], None);
        assert!(!target_is_current(&target.path, &target.cert_file));
        rebuild_target(&target).unwrap();
        assert!(target_is_current(&target.path, &target.cert_file));
    }

    #[test]
    fn test_deploy_group_sibling_isolation_and_actions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("test.crt"), "CERT\n").unwrap();
        fs::write(dir.path().join("test.key"), "KEY\n").unwrap();
        // No CA file on disk.

        let broken = DeploymentTarget {
            path: dir.path().join("broken.pem"),
            format: vec![FormatToken::Ca],
            action: Some("reload broken".to_string()),
            ..target(&dir, vec![], None)
        };
        let good = DeploymentTarget {
            path: dir.path().join("good.pem"),
            format: vec![FormatToken::Crt],
            action: Some("reload good".to_string()),
            ..target(&dir, vec![], None)
        };

        let config = group_with_targets(dir.path().join("test.crt"), vec![broken, good]);
        let mut scheduler = ActionScheduler::new();
        deploy_group(&config, &mut scheduler);

        assert!(dir.path().join("good.pem").exists());
        assert!(!dir.path().join("broken.pem").exists());
        // Only the successful target's action is scheduled.
        assert_eq!(scheduler.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_deploy_applies_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        write_sources(&dir);

        let t = target(&dir, vec![FormatToken::Crt, FormatToken::Key], None);
        let path = t.path.clone();
        let config = group_with_targets(dir.path().join("test.crt"), vec![t]);
        let mut scheduler = ActionScheduler::new();
        deploy_group(&config, &mut scheduler);

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_unresolvable_owner_keeps_bundle() {
        let dir = TempDir::new().unwrap();
        write_sources(&dir);

        let t = DeploymentTarget {
            user: Some("no-such-user-zz".to_string()),
            group: Some("no-such-group-zz".to_string()),
            action: Some("reload".to_string()),
            ..target(&dir, vec![FormatToken::Crt], None)
        };
        let path = t.path.clone();
        let config = group_with_targets(dir.path().join("test.crt"), vec![t]);
        let mut scheduler = ActionScheduler::new();
        deploy_group(&config, &mut scheduler);

        // Ownership failure is a warning; the bundle and its action stand.
        assert_eq!(fs::read_to_string(&path).unwrap(), "CERT\n");
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_deploy_group_idempotent() {
        let dir = TempDir::new().unwrap();
        write_sources(&dir);

        let t = target(&dir, vec![FormatToken::Crt], Some("reload"));
        let config = group_with_targets(dir.path().join("test.crt"), vec![t]);

        let mut scheduler = ActionScheduler::new();
        deploy_group(&config, &mut scheduler);
        assert_eq!(scheduler.len(), 1);

        // Second pass: target is current, nothing scheduled.
        let mut scheduler = ActionScheduler::new();
        deploy_group(&config, &mut scheduler);
        assert_eq!(scheduler.len(), 0);
    }

    fn group_with_targets(cert_file: PathBuf, actions: Vec<DeploymentTarget>) -> DomainGroupConfig {
        let domains = vec!["example.com".to_string()];
        DomainGroupConfig {
            domains: "example.com".to_string(),
            domain_list: domains.clone(),
            id: crate::config::group_id(&domains),
            domain_translation: Default::default(),
            api: "v2".to_string(),
            authority: "https://test-ca".to_string(),
            authority_tos_agreement: None,
            authority_contact_email: None,
            account_key: PathBuf::from("/tmp/account.key"),
            cert_dir: cert_file.parent().unwrap().to_path_buf(),
            ttl_days: 30,
            cert_revoke_superseded: false,
            csr_static: false,
            csr_file: PathBuf::from("/tmp/test.csr"),
            cert_file,
            key_file: PathBuf::from("/tmp/test.key"),
            key_length: 1024,
            static_ca: false,
            ca_file: PathBuf::from("/tmp/test.ca"),
            actions,
            handlers: Default::default(),
        }
    }
}
