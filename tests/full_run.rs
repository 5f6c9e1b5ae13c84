//! End-to-end run: configuration loading and resolution, certificate
//! issuance through a registered test authority, deployment and action
//! deduplication.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use certsmith::actions::{ActionRunner, ActionScheduler};
use certsmith::authority::{self, Authority};
use certsmith::challenge::{self, ChallengeHandler};
use certsmith::config::{self, RuntimeConfig};
use certsmith::crypto::FsCryptoStore;
use certsmith::deploy;
use certsmith::error::{ActionError, AuthorityError};
use certsmith::renewal::RenewalOrchestrator;

/// Self-signed certificate valid far beyond any TTL threshold.
fn issued_cert(domains: &[String]) -> String {
    let key = rcgen_keypair();
    let mut params = rcgen::CertificateParams::new(domains.to_vec()).unwrap();
    params.not_before = rcgen::date_time_ymd(2020, 1, 1);
    params.not_after = rcgen::date_time_ymd(2099, 1, 1);
    params.self_signed(&key).unwrap().pem()
}

fn rcgen_keypair() -> rcgen::KeyPair {
    rcgen::KeyPair::generate().unwrap()
}

struct TestAuthority {
    exchanges: Arc<AtomicUsize>,
}

impl Authority for TestAuthority {
    fn register_account(&mut self) -> Result<(), AuthorityError> {
        Ok(())
    }

    fn certificate_from_csr(
        &mut self,
        csr_pem: &str,
        domains: &[String],
        handlers: &mut HashMap<String, Box<dyn ChallengeHandler>>,
    ) -> Result<(String, Option<String>), AuthorityError> {
        assert!(csr_pem.contains("CERTIFICATE REQUEST"));
        // Drive the challenge hooks the way a real authority would.
        for domain in domains {
            let handler = handlers
                .get_mut(domain)
                .ok_or_else(|| AuthorityError::Exchange(format!("no handler for {domain}")))?;
            handler
                .prepare(domain, "token", "token.key-auth")
                .map_err(|e| AuthorityError::Exchange(e.to_string()))?;
            handler
                .cleanup(domain, "token")
                .map_err(|e| AuthorityError::Exchange(e.to_string()))?;
        }
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        Ok((issued_cert(domains), None))
    }

    fn revoke(&mut self, _cert_pem: &str, _reason: Option<u32>) -> Result<(), AuthorityError> {
        Ok(())
    }
}

fn register_test_authority(api: &str) -> Arc<AtomicUsize> {
    let exchanges = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&exchanges);
    authority::register(
        api,
        Box::new(move |_| {
            Ok(Box::new(TestAuthority {
                exchanges: Arc::clone(&counter),
            }) as Box<dyn Authority>)
        }),
    );
    exchanges
}

#[derive(Default)]
struct RecordingRunner {
    commands: Mutex<Vec<String>>,
}

impl ActionRunner for RecordingRunner {
    fn run(&self, command: &str) -> Result<String, ActionError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(String::new())
    }
}

fn runtime(work_dir: &Path) -> RuntimeConfig {
    RuntimeConfig {
        work_dir: work_dir.to_path_buf(),
        authority_tos_agreement: None,
        force_renew: None,
        revoke: None,
    }
}

#[test]
fn full_run_is_idempotent_and_deduplicates_actions() {
    challenge::register_builtin();
    let exchanges = register_test_authority("e2e-v2");

    let conf_dir = TempDir::new().unwrap();
    let work_dir = TempDir::new().unwrap();
    let webroot = work_dir.path().join("webroot");

    let global_path = conf_dir.path().join("certsmith.conf");
    fs::write(
        &global_path,
        serde_json::json!({
            "api": "e2e-v2",
            "ttl_days": 30,
            "key_length": 1024,
            "defaults": {"format": "crt"}
        })
        .to_string(),
    )
    .unwrap();

    // Two domain groups in two files, one YAML, sharing one action.
    fs::write(
        conf_dir.path().join("web.conf"),
        serde_json::json!({
            "example.com www.example.com": [
                {"mode": "webroot", "webdir": webroot.to_str().unwrap()},
                {"path": work_dir.path().join("nginx-bundle.pem").to_str().unwrap(),
                 "format": "crt, key", "perm": "600",
                 "action": "systemctl reload nginx"},
                {"path": work_dir.path().join("nginx-cert.pem").to_str().unwrap(),
                 "action": "systemctl reload nginx"}
            ]
        })
        .to_string(),
    )
    .unwrap();
    fs::write(
        conf_dir.path().join("mail.conf"),
        format!(
            concat!(
                "mail.example.com:\n",
                "  - mode: webroot\n",
                "    webdir: {webroot}\n",
                "  - path: {bundle}\n",
                "    format: crt\n",
                "    action: systemctl reload nginx\n",
            ),
            webroot = webroot.display(),
            bundle = work_dir.path().join("mail-cert.pem").display(),
        ),
    )
    .unwrap();

    let global = config::load_global(&global_path).unwrap();
    let entries = config::load_domain_entries(conf_dir.path(), &global_path).unwrap();
    assert_eq!(entries.len(), 2);

    let rt = runtime(work_dir.path());
    let resolver = config::Resolver::new(&global, &rt);
    let groups = resolver.resolve_all(&entries);
    assert_eq!(groups.len(), 2);

    let crypto = FsCryptoStore::new();
    let orchestrator = RenewalOrchestrator::new(&crypto, &rt);
    let mut scheduler = ActionScheduler::new();

    for group in &groups {
        orchestrator.ensure_certificate(group).unwrap();
        deploy::deploy_group(group, &mut scheduler);
    }

    // One issuance per group, three targets written, one distinct action.
    assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    assert!(work_dir.path().join("nginx-bundle.pem").is_file());
    assert!(work_dir.path().join("nginx-cert.pem").is_file());
    assert!(work_dir.path().join("mail-cert.pem").is_file());
    assert_eq!(scheduler.len(), 1);

    let runner = RecordingRunner::default();
    scheduler.run_all(&runner);
    assert_eq!(
        *runner.commands.lock().unwrap(),
        vec!["systemctl reload nginx".to_string()]
    );

    // The bundle target concatenates certificate then key.
    let group = groups.iter().find(|g| g.domains.starts_with("example.com")).unwrap();
    let bundle = fs::read_to_string(work_dir.path().join("nginx-bundle.pem")).unwrap();
    let cert = fs::read_to_string(&group.cert_file).unwrap();
    let key = fs::read_to_string(&group.key_file).unwrap();
    assert_eq!(bundle, format!("{cert}{key}"));

    // Second run with nothing changed: no exchanges, no rewrites, no actions.
    let mut scheduler = ActionScheduler::new();
    for group in &groups {
        orchestrator.ensure_certificate(group).unwrap();
        deploy::deploy_group(group, &mut scheduler);
    }
    assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    assert!(scheduler.is_empty());
}

#[test]
fn broken_domain_file_does_not_block_other_groups() {
    challenge::register_builtin();
    register_test_authority("e2e-broken");

    let conf_dir = TempDir::new().unwrap();
    let work_dir = TempDir::new().unwrap();

    let global_path = conf_dir.path().join("certsmith.conf");
    fs::write(
        &global_path,
        serde_json::json!({"api": "e2e-broken", "key_length": 1024}).to_string(),
    )
    .unwrap();

    fs::write(conf_dir.path().join("broken.conf"), "{ neither ] json : nor yaml [").unwrap();
    fs::write(
        conf_dir.path().join("ok.conf"),
        serde_json::json!({"solo.example.com": [{"mode": "webroot",
            "webdir": work_dir.path().join("webroot").to_str().unwrap()}]})
        .to_string(),
    )
    .unwrap();

    let global = config::load_global(&global_path).unwrap();
    let entries = config::load_domain_entries(conf_dir.path(), &global_path).unwrap();
    assert_eq!(entries.len(), 1);

    let rt = runtime(work_dir.path());
    let resolver = config::Resolver::new(&global, &rt);
    let groups = resolver.resolve_all(&entries);
    assert_eq!(groups.len(), 1);

    let crypto = FsCryptoStore::new();
    let orchestrator = RenewalOrchestrator::new(&crypto, &rt);
    orchestrator.ensure_certificate(&groups[0]).unwrap();
    assert!(groups[0].cert_file.is_file());
}
