//! End-to-end update pipeline against a local manifest server.

use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tollgate::fsutil::tree_checksum;
use tollgate::update::archive::{package_release, ReleaseOptions};
use tollgate::update::log::{LogKind, LogStatus};
use tollgate::update::media::{MEDIA_INFO_FILE, MEDIA_UPDATE_DIR};
use tollgate::{
    DownloadOutcome, SystemClock, TollgateConfig, TollgateError, UpdateKind, UpdateManager,
    Version,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_tree(root: &Path, version: &str) {
    fs::create_dir_all(root.join("assets")).unwrap();
    fs::write(
        root.join("package.json"),
        format!(r#"{{"name":"sakura-pos","version":"{}"}}"#, version),
    )
    .unwrap();
    fs::write(root.join("index.html"), format!("<title>{}</title>", version)).unwrap();
    fs::write(root.join("assets/app.js"), format!("boot('{}')", version)).unwrap();
}

fn manager(dir: &TempDir, manifest_url: Option<String>) -> UpdateManager {
    let mut config = TollgateConfig::new("sakura-pos", "2.0.0", dir.path().join("app"))
        .unwrap()
        .with_data_dir(dir.path().join("state"));
    config.manifest_url = manifest_url;
    UpdateManager::new(config).unwrap()
}

#[tokio::test]
async fn online_update_downloads_applies_and_restores() {
    let dir = TempDir::new().unwrap();
    let install = dir.path().join("app");
    let dist = dir.path().join("dist");
    write_tree(&install, "2.0.0");
    write_tree(&dist, "2.1.0");
    let original = tree_checksum(&install).unwrap();

    let server = MockServer::start().await;
    let release = package_release(
        &dist,
        &dir.path().join("release"),
        &ReleaseOptions::new("2.1.0", server.uri()),
        &SystemClock,
    )
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/update.json"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(fs::read(&release.manifest_path).unwrap()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/update-2.1.0.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(fs::read(&release.archive).unwrap()))
        .mount(&server)
        .await;

    let manager = manager(&dir, Some(format!("{}/update.json", server.uri())));

    let decision = manager.check_for_update().await.unwrap();
    assert_eq!(decision.kind, UpdateKind::Optional);
    assert_eq!(decision.version, Version::new(2, 1, 0));

    let handle = manager.start_download(&decision).unwrap();
    let progress = handle.progress();
    let archive = match handle.wait().await.unwrap() {
        DownloadOutcome::Completed { path, size } => {
            assert_eq!(size, decision.size);
            path
        }
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(*progress.borrow(), Some(100));

    let report = manager
        .apply_from_archive(&archive, &decision.version)
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(manager.installed_version(), Version::new(2, 1, 0));
    assert_eq!(tree_checksum(&install).unwrap(), tree_checksum(&dist).unwrap());

    let snapshot = manager.list_backups().unwrap().remove(0);
    assert_eq!(tree_checksum(&snapshot.path).unwrap(), original);

    let restored = manager.restore(&snapshot).await.unwrap();
    assert!(restored.success);
    assert_eq!(tree_checksum(&install).unwrap(), original);

    let kinds: Vec<LogKind> = manager.logs().unwrap().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&LogKind::Backup));
    assert!(kinds.contains(&LogKind::Update));
    assert!(kinds.contains(&LogKind::Restore));
}

#[tokio::test]
async fn downgrade_leaves_install_untouched() {
    let dir = TempDir::new().unwrap();
    let install = dir.path().join("app");
    let older = dir.path().join("older");
    write_tree(&install, "2.0.0");
    write_tree(&older, "1.9.0");
    let before = tree_checksum(&install).unwrap();

    let manager = manager(&dir, None);
    let result = manager
        .apply_from_directory(&older, &Version::new(1, 9, 0))
        .await;

    assert!(matches!(result, Err(TollgateError::DowngradeBlocked { .. })));
    assert_eq!(tree_checksum(&install).unwrap(), before);

    let logs = manager.logs().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Blocked);
    assert_eq!(logs[0].new_version.as_deref(), Some("1.9.0"));
}

#[tokio::test]
async fn same_version_is_refused() {
    let dir = TempDir::new().unwrap();
    let install = dir.path().join("app");
    let same = dir.path().join("same");
    write_tree(&install, "2.0.0");
    write_tree(&same, "2.0.0");

    let result = manager(&dir, None)
        .apply_from_directory(&same, &Version::new(2, 0, 0))
        .await;
    assert!(matches!(result, Err(TollgateError::DowngradeBlocked { .. })));
}

#[tokio::test]
async fn concurrent_apply_is_single_flight() {
    let dir = TempDir::new().unwrap();
    let install = dir.path().join("app");
    let incoming = dir.path().join("incoming");
    write_tree(&install, "2.0.0");
    write_tree(&incoming, "2.1.0");

    let manager = manager(&dir, None);
    let candidate = Version::new(2, 1, 0);
    let (first, second) = tokio::join!(
        manager.apply_from_directory(&incoming, &candidate),
        manager.apply_from_directory(&incoming, &candidate),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(TollgateError::UpdateInProgress)));
    assert_eq!(manager.list_backups().unwrap().len(), 1);
}

#[tokio::test]
async fn removable_media_update_applies() {
    let dir = TempDir::new().unwrap();
    let install = dir.path().join("app");
    let usb = dir.path().join("usb");
    write_tree(&install, "2.0.0");
    write_tree(&usb.join(MEDIA_UPDATE_DIR), "3.0.0");
    fs::write(
        usb.join(MEDIA_INFO_FILE),
        r#"{"version":"3.0.0","minVersion":"2.5.0","description":"USB update"}"#,
    )
    .unwrap();

    let manager = manager(&dir, None);
    let (decision, update) = manager.check_media(&usb).await.unwrap().unwrap();
    assert!(decision.required);

    manager
        .apply_from_directory(&update.update_dir, &decision.version)
        .await
        .unwrap();
    assert_eq!(manager.installed_version(), Version::new(3, 0, 0));
    assert_eq!(
        tree_checksum(&install).unwrap(),
        tree_checksum(&update.update_dir).unwrap()
    );
}

#[tokio::test]
async fn archive_labelled_newer_than_its_files_is_refused() {
    let dir = TempDir::new().unwrap();
    let install = dir.path().join("app");
    let dist = dir.path().join("dist");
    write_tree(&install, "2.0.0");
    // A stale build published under a newer release number.
    write_tree(&dist, "1.8.0");
    let before = tree_checksum(&install).unwrap();

    let release = package_release(
        &dist,
        &dir.path().join("release"),
        &ReleaseOptions::new("2.1.0", "https://updates.example.com"),
        &SystemClock,
    )
    .unwrap();

    let manager = manager(&dir, None);
    let result = manager
        .apply_from_archive(&release.archive, &release.manifest.version)
        .await;

    match result {
        Err(TollgateError::DowngradeBlocked { reason, .. }) => {
            assert!(reason.contains("1.8.0"), "{}", reason)
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(tree_checksum(&install).unwrap(), before);
    assert_eq!(manager.installed_version(), Version::new(2, 0, 0));
    assert!(manager.list_backups().unwrap().is_empty());
    assert_eq!(manager.logs().unwrap()[0].status, LogStatus::Blocked);
}

#[tokio::test]
async fn media_update_without_version_file_advances_installed_version() {
    let dir = TempDir::new().unwrap();
    let install = dir.path().join("app");
    let usb = dir.path().join("usb");
    write_tree(&install, "2.0.0");

    // Drive layout: only the changed files under update/, version markers at the root.
    let update_dir = usb.join(MEDIA_UPDATE_DIR);
    fs::create_dir_all(update_dir.join("assets")).unwrap();
    fs::write(update_dir.join("index.html"), "<title>3.0.0</title>").unwrap();
    fs::write(update_dir.join("assets/app.js"), "boot('3.0.0')").unwrap();
    fs::write(usb.join("package.json"), r#"{"version":"3.0.0"}"#).unwrap();
    fs::write(
        usb.join(MEDIA_INFO_FILE),
        r#"{"version":"3.0.0","minVersion":"2.5.0"}"#,
    )
    .unwrap();

    let manager = manager(&dir, None);
    let (decision, update) = manager.check_media(&usb).await.unwrap().unwrap();
    assert!(decision.required);

    manager
        .apply_from_directory(&update.update_dir, &decision.version)
        .await
        .unwrap();
    assert_eq!(manager.installed_version(), Version::new(3, 0, 0));
    assert_eq!(
        fs::read_to_string(install.join("assets/app.js")).unwrap(),
        "boot('3.0.0')"
    );
    let package: serde_json::Value =
        serde_json::from_slice(&fs::read(install.join("package.json")).unwrap()).unwrap();
    assert_eq!(package["name"], "sakura-pos");

    let (again, _) = manager.check_media(&usb).await.unwrap().unwrap();
    assert!(!again.available);
    assert!(!again.required);

    let repeat = manager
        .apply_from_directory(&update.update_dir, &decision.version)
        .await;
    assert!(matches!(repeat, Err(TollgateError::DowngradeBlocked { .. })));
}

/// Puts a directory where the update carries `index.html`, so that one file
/// cannot be written.
fn block_index(install: &Path) {
    fs::remove_file(install.join("index.html")).unwrap();
    fs::create_dir_all(install.join("index.html")).unwrap();
    fs::write(install.join("index.html/keep.txt"), "occupied").unwrap();
}

#[tokio::test]
async fn partial_failure_rolls_back_to_snapshot() {
    let dir = TempDir::new().unwrap();
    let install = dir.path().join("app");
    let incoming = dir.path().join("incoming");
    write_tree(&install, "2.0.0");
    write_tree(&incoming, "2.1.0");
    block_index(&install);
    let before = tree_checksum(&install).unwrap();

    let manager = manager(&dir, None);
    let result = manager
        .apply_from_directory(&incoming, &Version::new(2, 1, 0))
        .await;

    assert!(matches!(
        result,
        Err(TollgateError::ApplyPartialFailure { failed: 1 })
    ));
    assert_eq!(tree_checksum(&install).unwrap(), before);
    assert_eq!(manager.installed_version(), Version::new(2, 0, 0));

    let logs = manager.logs().unwrap();
    let trail: Vec<(LogKind, LogStatus)> = logs.iter().map(|e| (e.kind, e.status)).collect();
    assert_eq!(
        trail,
        vec![
            (LogKind::Restore, LogStatus::Success),
            (LogKind::Update, LogStatus::Error),
            (LogKind::Backup, LogStatus::Success),
        ]
    );
    assert!(logs[1].errors.iter().any(|e| e.contains("index.html")));
}

#[tokio::test]
async fn partial_failure_without_rollback_keeps_other_files() {
    let dir = TempDir::new().unwrap();
    let install = dir.path().join("app");
    let incoming = dir.path().join("incoming");
    write_tree(&install, "2.0.0");
    write_tree(&incoming, "2.1.0");
    block_index(&install);

    let mut config = TollgateConfig::new("sakura-pos", "2.0.0", &install)
        .unwrap()
        .with_data_dir(dir.path().join("state"));
    config.rollback_on_failure = false;
    let manager = UpdateManager::new(config).unwrap();

    let result = manager
        .apply_from_directory(&incoming, &Version::new(2, 1, 0))
        .await;

    assert!(matches!(
        result,
        Err(TollgateError::ApplyPartialFailure { failed: 1 })
    ));
    assert_eq!(
        fs::read_to_string(install.join("assets/app.js")).unwrap(),
        "boot('2.1.0')"
    );
    assert!(install.join("index.html/keep.txt").is_file());

    let kinds: Vec<LogKind> = manager.logs().unwrap().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![LogKind::Update, LogKind::Backup]);
    assert_eq!(manager.list_backups().unwrap().len(), 1);
}
