use std::path::{Path, PathBuf};

fn source_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => panic!("source dir {} must be readable: {err}", dir.display()),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            source_files(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

#[test]
fn manifests_configure_unwrap_and_expect_lints() {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let workspace_dir = match manifest_dir.parent().and_then(Path::parent) {
        Some(dir) => dir,
        None => panic!("workspace root should be two levels above package manifest dir"),
    };
    let package = std::fs::read_to_string(manifest_dir.join("Cargo.toml"))
        .unwrap_or_else(|e| panic!("package manifest must be readable: {e}"));
    assert!(package.contains("[lints.clippy]") && package.contains("expect_used = \"warn\""));

    let workspace = std::fs::read_to_string(workspace_dir.join("Cargo.toml"))
        .unwrap_or_else(|e| panic!("workspace manifest must be readable: {e}"));
    assert!(workspace.contains("unwrap_used = \"deny\""));
}

#[test]
fn library_code_never_calls_unwrap() {
    let src = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut files = Vec::new();
    source_files(&src, &mut files);
    assert!(!files.is_empty());

    let mut offenders = Vec::new();
    for file in files {
        let text = std::fs::read_to_string(&file)
            .unwrap_or_else(|e| panic!("{} must be readable: {e}", file.display()));
        let production = text.split("#[cfg(test)]").next().unwrap_or_default();
        for (idx, line) in production.lines().enumerate() {
            if line.contains(".unwrap()") {
                offenders.push(format!("{}:{}", file.display(), idx + 1));
            }
        }
    }
    assert!(offenders.is_empty(), "unwrap() outside tests: {offenders:?}");
}
