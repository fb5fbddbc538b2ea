use log::info;

use super::{DiffError, DiffHarness, Result};
use crate::provider::ErrorKind;

fn expect<T: PartialEq + std::fmt::Debug>(operation: &str, actual: T, expected: T) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(DiffError::Expectation {
            operation: operation.to_string(),
            message: format!("expected {expected:?}, got {actual:?}"),
        })
    }
}

/// Require that every provider failed with `kind`.
fn expect_error<T: std::fmt::Debug>(operation: &str, result: Result<T>, kind: ErrorKind) -> Result<()> {
    match result {
        Err(DiffError::Storage(e)) if e.kind() == kind => Ok(()),
        Err(DiffError::Storage(e)) => Err(DiffError::Expectation {
            operation: operation.to_string(),
            message: format!("expected {kind:?} error, got {:?}: {e}", e.kind()),
        }),
        Err(other) => Err(other),
        Ok(value) => Err(DiffError::Expectation {
            operation: operation.to_string(),
            message: format!("expected {kind:?} error, got {value:?}"),
        }),
    }
}

/// Drive every provider of `harness` through the same create / overwrite /
/// move / copy / rename sequence below the harness root. Every call is
/// cross-checked by the harness; the returned count is the number of
/// checks that passed.
///
/// The root must not exist beforehand, so run this inside
/// [`DiffHarness::enter`].
pub fn run_scenario(harness: &DiffHarness) -> Result<usize> {
    let root = harness.root();
    let file = |name: &str| harness.path(name);
    let mut checks = 0;
    let mut step = |name: &str| {
        checks += 1;
        info!("[{}] {}", checks, name);
    };

    // mkdir
    expect("exists", harness.exists(root)?, false)?;
    harness.mkdir(root)?;
    expect("exists", harness.exists(root)?, true)?;
    step("mkdir");

    // put
    let file2 = file("file2.txt");
    expect("exists", harness.exists(&file2)?, false)?;
    harness.put_bytes(&file2, "あ".as_bytes())?;
    expect("exists", harness.exists(&file2)?, true)?;
    expect("read_bytes", harness.read_bytes(&file2)?, "あ".as_bytes().to_vec())?;
    step("put");

    // put if overwrite
    harness.put_bytes(&file2, "い".as_bytes())?;
    expect("read_bytes", harness.read_bytes(&file2)?, "い".as_bytes().to_vec())?;
    step("put overwrite");

    // put onto a directory
    expect_error("put_bytes", harness.put_bytes(root, "い".as_bytes()), ErrorKind::InvalidTarget)?;
    step("put onto directory");

    // create
    let file3 = file("file3.txt");
    expect("exists", harness.exists(&file3)?, false)?;
    harness.create_bytes(&file3, "あ".as_bytes())?;
    expect("read_bytes", harness.read_bytes(&file3)?, "あ".as_bytes().to_vec())?;
    expect_error("create_bytes", harness.create_bytes(&file3, "い".as_bytes()), ErrorKind::AlreadyExists)?;
    expect_error("create_bytes", harness.create_bytes(root, "い".as_bytes()), ErrorKind::AlreadyExists)?;
    step("create");

    // touch
    let file1 = file("file1.txt");
    harness.touch(&file1)?;
    expect("read_bytes", harness.read_bytes(&file1)?, Vec::new())?;
    expect_error("touch", harness.touch(&file1), ErrorKind::AlreadyExists)?;
    step("touch");

    // move
    let moved = file("moved.txt");
    harness.move_to(&file1, &moved)?;
    expect("exists", harness.exists(&file1)?, false)?;
    expect("read_bytes", harness.read_bytes(&moved)?, Vec::new())?;
    let missing = file("not_exists.txt");
    expect_error("move_to", harness.move_to(&missing, &file("moved2.txt")), ErrorKind::NotFound)?;
    expect("exists", harness.exists(&file("moved2.txt"))?, false)?;
    step("move");

    // copy
    let copied = file("copied.txt");
    harness.copy(&moved, &copied)?;
    expect("exists", harness.exists(&moved)?, true)?;
    expect("exists", harness.exists(&copied)?, true)?;
    expect_error("copy", harness.copy(&missing, &file("copied2.txt")), ErrorKind::NotFound)?;
    step("copy");

    // rename
    let renamed = file("renamed.txt");
    harness.rename(&copied, &renamed)?;
    expect("exists", harness.exists(&copied)?, false)?;
    expect("read_bytes", harness.read_bytes(&renamed)?, Vec::new())?;
    expect_error("rename", harness.rename(&missing, &file("renamed2.txt")), ErrorKind::NotFound)?;
    step("rename");

    // listing
    let names = harness.ls(root)?;
    expect(
        "ls",
        names,
        vec![
            "file2.txt".to_string(),
            "file3.txt".to_string(),
            "moved.txt".to_string(),
            "renamed.txt".to_string(),
        ],
    )?;
    harness.ll(root)?;
    step("list");

    Ok(checks)
}
