mod common;

use std::fs;

use common::{DavServer, QUOTA_AVAILABLE};
use mystorage::diff::run_scenario;
use mystorage::{DiffError, DiffHarness, ErrorKind, LocalProvider, Provider, ResourceType};
use tempfile::TempDir;

fn harness(root: &str, server: &DavServer) -> (TempDir, DiffHarness) {
    let dir = TempDir::new().unwrap();
    let local = LocalProvider::new(dir.path()).unwrap();
    let harness = DiffHarness::new(root, vec![Box::new(local), Box::new(server.provider())]).unwrap();
    (dir, harness)
}

fn storage_kind<T: std::fmt::Debug>(result: Result<T, DiffError>) -> ErrorKind {
    match result {
        Err(DiffError::Storage(e)) => e.kind(),
        other => panic!("expected a storage error on every backend, got {other:?}"),
    }
}

#[test]
fn test_scenario_local_against_webdav() -> anyhow::Result<()> {
    let server = DavServer::start();
    let (dir, harness) = harness("test1", &server);

    {
        let scope = harness.enter();
        assert_eq!(run_scenario(&scope)?, 10);
        assert_eq!(server.store().get_file_content("test1/file2.txt"), Some("い".as_bytes().to_vec()));
    }

    assert!(!dir.path().join("test1").exists());
    assert!(server.store().list_all_files().is_empty());
    assert!(!server.store().exists("test1")?);
    Ok(())
}

#[test]
fn test_transfer_rules_agree_with_local() -> anyhow::Result<()> {
    let server = DavServer::start();
    let (_dir, harness) = harness("rules", &server);
    let scope = harness.enter();

    scope.mkdir("rules")?;
    scope.mkdir("rules/d")?;
    scope.put_bytes("rules/d/inner.txt", b"inner")?;
    scope.put_bytes("rules/f.txt", b"file")?;

    assert_eq!(storage_kind(scope.copy("rules/f.txt", "rules/d")), ErrorKind::InvalidTarget);
    assert_eq!(storage_kind(scope.move_to("rules/d", "rules/f.txt")), ErrorKind::InvalidTarget);
    assert_eq!(storage_kind(scope.move_to("rules/d", "rules/d/sub")), ErrorKind::Path);
    assert_eq!(storage_kind(scope.copy("rules/d", "rules/d")), ErrorKind::Path);
    assert_eq!(storage_kind(scope.move_to("rules/f.txt", "rules/none/f.txt")), ErrorKind::NotFound);
    assert_eq!(storage_kind(scope.delete("/")), ErrorKind::Path);

    // Nothing above changed either side.
    assert_eq!(scope.read_bytes("rules/d/inner.txt")?, b"inner".to_vec());
    assert_eq!(scope.read_bytes("rules/f.txt")?, b"file".to_vec());
    assert_eq!(scope.ls("rules")?, vec!["d".to_string(), "f.txt".to_string()]);

    // Same kind is replaced.
    scope.put_bytes("rules/g.txt", b"other")?;
    scope.copy("rules/g.txt", "rules/f.txt")?;
    assert_eq!(scope.read_bytes("rules/f.txt")?, b"other".to_vec());
    Ok(())
}

#[test]
fn test_refused_writes_send_no_request() -> anyhow::Result<()> {
    let server = DavServer::start();
    let dav = server.provider();
    dav.mkdir("d")?;
    dav.put_bytes("f.txt", b"abc")?;
    server.clear_requests();

    assert_eq!(dav.put_bytes("d", b"x").unwrap_err().kind(), ErrorKind::InvalidTarget);
    assert_eq!(dav.move_to("missing", "other").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(dav.copy("missing", "other").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(dav.rename("missing", "other").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(dav.move_to("f.txt", "d").unwrap_err().kind(), ErrorKind::InvalidTarget);
    assert_eq!(dav.delete("").unwrap_err().kind(), ErrorKind::Path);

    let writes: Vec<String> = server
        .requests()
        .into_iter()
        .filter(|r| !r.starts_with("PROPFIND"))
        .collect();
    assert!(writes.is_empty(), "unexpected requests: {writes:?}");
    assert!(server.store().is_dir("d")?);
    Ok(())
}

#[test]
fn test_create_checks_before_upload() -> anyhow::Result<()> {
    let server = DavServer::start();
    let dav = server.provider();

    let info = dav.create_bytes("new.txt", b"hello")?;
    assert_eq!(info.size, 5);
    assert_eq!(info.name, "new.txt");
    assert_eq!(
        server.requests()[..2],
        ["PROPFIND new.txt".to_string(), "PUT new.txt".to_string()]
    );

    let err = dav.create_bytes("new.txt", b"again").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(dav.read_text("new.txt")?, "hello");
    Ok(())
}

#[test]
fn test_listing_and_types() -> anyhow::Result<()> {
    let server = DavServer::start();
    let store = server.store();
    store.mkdir("dir")?;
    store.mkdir("dir/sub")?;
    store.put_bytes("dir/b.txt", b"bb")?;
    store.put_bytes("dir/a.txt", b"a")?;
    store.mkdir("empty")?;
    store.put_bytes("file.txt", b"f")?;

    let dav = server.provider();
    let listing = dav.ll("dir")?;
    let shapes: Vec<(&str, u64, bool)> = listing
        .iter()
        .map(|e| (e.name.as_str(), e.size, e.is_dir))
        .collect();
    assert_eq!(shapes, vec![("a.txt", 1, false), ("b.txt", 2, false), ("sub", 0, true)]);
    assert_eq!(listing[0].path, "dir/a.txt");

    assert!(dav.ll("empty")?.is_empty());
    assert_eq!(dav.ls("")?, vec!["dir", "empty", "file.txt"]);
    assert_eq!(dav.ll("file.txt").unwrap_err().kind(), ErrorKind::Path);
    assert_eq!(dav.ll("missing").unwrap_err().kind(), ErrorKind::NotFound);

    assert_eq!(dav.resource_type("dir")?, ResourceType::Directory);
    assert_eq!(dav.resource_type("/file.txt")?, ResourceType::File);
    assert_eq!(dav.resource_type("missing")?, ResourceType::NoExists);
    assert!(dav.info("missing").is_err());
    Ok(())
}

#[test]
fn test_mkdir_errors() -> anyhow::Result<()> {
    let server = DavServer::start();
    let dav = server.provider();

    let info = dav.mkdir("x")?;
    assert!(info.is_dir);
    assert_eq!(dav.mkdir("x").unwrap_err().kind(), ErrorKind::AlreadyExists);

    let err = dav.mkdir("y/z").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.to_string(), "Not found: y");

    let err = dav.put_bytes("y/f.txt", b"x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[test]
fn test_login_and_quota() -> anyhow::Result<()> {
    let server = DavServer::start();
    let dav = server.provider();
    assert!(dav.login()?);
    assert_eq!(dav.free()?, Some(QUOTA_AVAILABLE));

    let headers = dav.options("")?;
    let dav_header = headers.get("dav").and_then(|v| v.to_str().ok()).unwrap_or_default();
    assert!(dav_header.contains('1'), "DAV header: {dav_header:?}");

    let err = server.provider_as("admin", "wrong").login().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Status);
    Ok(())
}

#[test]
fn test_unicode_names_round_trip() -> anyhow::Result<()> {
    let server = DavServer::start();
    let dav = server.provider();
    dav.mkdir("フォルダ")?;
    dav.put_bytes("フォルダ/あ b.txt", "中身".as_bytes())?;

    assert_eq!(server.store().get_file_content("フォルダ/あ b.txt"), Some("中身".as_bytes().to_vec()));
    assert_eq!(dav.ls("フォルダ")?, vec!["あ b.txt"]);
    assert_eq!(dav.read_text("フォルダ/あ b.txt")?, "中身");

    dav.rename("フォルダ/あ b.txt", "い.txt")?;
    assert!(dav.exists("フォルダ/い.txt")?);
    assert!(!dav.exists("フォルダ/あ b.txt")?);
    Ok(())
}

#[test]
fn test_download_and_upload_mirror() -> anyhow::Result<()> {
    let server = DavServer::start();
    let dav = server.provider();
    dav.mkdir("tree")?;
    dav.mkdir("tree/sub")?;
    dav.put_bytes("tree/top.txt", b"top")?;
    dav.put_bytes("tree/sub/leaf.txt", b"leaf")?;

    let local = TempDir::new()?;
    let target = local.path().join("copy");
    fs::create_dir(&target)?;
    fs::write(target.join("stale.txt"), "stale")?;

    dav.download("tree", &target)?;
    assert_eq!(fs::read_to_string(target.join("top.txt"))?, "top");
    assert_eq!(fs::read_to_string(target.join("sub").join("leaf.txt"))?, "leaf");
    assert!(!target.join("stale.txt").exists());

    fs::write(target.join("added.txt"), "added")?;
    fs::remove_file(target.join("top.txt"))?;
    dav.upload(&target, "tree")?;
    assert_eq!(dav.ls("tree")?, vec!["added.txt", "sub"]);
    assert_eq!(dav.read_text("tree/sub/leaf.txt")?, "leaf");
    Ok(())
}
