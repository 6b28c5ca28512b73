use std::io::Read;
use std::path::Path;
use std::time::{Duration, SystemTime};

use flate2::read::GzDecoder;
use kiln_build::context::SOURCE_DATE_EPOCH;
use kiln_build::{ContextError, ContextLimits, ContextPackager, IgnoreSource};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Write `files` (path, content) under `dir`, creating parent directories.
fn write_tree(dir: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = dir.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
}

fn package(dir: &Path) -> kiln_build::BuildContext {
    ContextPackager::new(dir)
        .package(&CancellationToken::new())
        .unwrap()
}

/// Entry paths in archive order.
fn entry_names(archive: &[u8]) -> Vec<String> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    tar.entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}

fn entry_content(archive: &[u8], name: &str) -> Option<String> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    for entry in tar.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.path().unwrap().to_string_lossy() == name {
            let mut s = String::new();
            entry.read_to_string(&mut s).unwrap();
            return Some(s);
        }
    }
    None
}

/// Deterministic, poorly compressible bytes.
fn noise(len: usize) -> String {
    let mut x: u64 = 0x9E37_79B9_7F4A_7C15;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            char::from(b'!' + (x % 90) as u8)
        })
        .collect()
}

// ── Determinism ──

#[test]
fn same_tree_yields_identical_archive_and_digest() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    let files = [
        ("Dockerfile", "FROM scratch\n"),
        ("src/main.rs", "fn main() {}\n"),
        ("src/lib.rs", "pub fn f() {}\n"),
        ("README.md", "hello\n"),
    ];
    write_tree(a.path(), &files);
    write_tree(b.path(), &files);

    // Different mtimes must not matter.
    let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
    std::fs::File::options()
        .write(true)
        .open(b.path().join("src/main.rs"))
        .unwrap()
        .set_modified(old)
        .unwrap();

    let first = package(a.path());
    let second = package(b.path());

    assert_eq!(first.archive, second.archive);
    assert_eq!(first.digest, second.digest);
    assert!(first.digest.as_deref().unwrap().starts_with("sha256-"));
}

#[test]
fn entries_are_lexical_with_fixed_metadata() {
    let tmp = TempDir::new().unwrap();
    write_tree(
        tmp.path(),
        &[
            ("Dockerfile", "FROM scratch\n"),
            ("b.txt", "b"),
            ("a/z.txt", "z"),
            ("a/y.txt", "y"),
        ],
    );

    let ctx = package(tmp.path());
    assert_eq!(
        entry_names(&ctx.archive),
        vec!["Dockerfile", "a", "a/y.txt", "a/z.txt", "b.txt"]
    );

    let mut tar = tar::Archive::new(GzDecoder::new(&ctx.archive[..]));
    for entry in tar.entries().unwrap() {
        let entry = entry.unwrap();
        let header = entry.header();
        assert_eq!(header.mtime().unwrap(), SOURCE_DATE_EPOCH);
        assert_eq!(header.uid().unwrap(), 0);
        assert_eq!(header.gid().unwrap(), 0);
    }
    assert_eq!(ctx.file_count, 4);
}

#[test]
fn force_omits_digest() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path(), &[("Dockerfile", "FROM scratch\n")]);

    let ctx = ContextPackager::new(tmp.path())
        .force(true)
        .package(&CancellationToken::new())
        .unwrap();

    assert!(ctx.digest.is_none());
    assert!(!ctx.archive.is_empty());
}

#[test]
fn digest_matches_archive_bytes() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path(), &[("Dockerfile", "FROM scratch\n")]);

    let ctx = package(tmp.path());
    assert_eq!(ctx.digest.unwrap(), kiln_build::digest(&ctx.archive));
}

// ── Ignore resolution ──

#[test]
fn dockerfile_specific_ignore_takes_precedence() {
    let tmp = TempDir::new().unwrap();
    write_tree(
        tmp.path(),
        &[
            ("Dockerfile", "FROM scratch\n"),
            ("Dockerfile.dockerignore", "a.txt\n"),
            (".dockerignore", "b.txt\n"),
            ("a.txt", "a"),
            ("b.txt", "b"),
        ],
    );

    let ctx = package(tmp.path());
    let names = entry_names(&ctx.archive);

    assert!(!names.contains(&"a.txt".to_owned()));
    assert!(names.contains(&"b.txt".to_owned()));
    assert_eq!(
        ctx.ignore_source,
        IgnoreSource::BuildFile("Dockerfile.dockerignore".to_owned())
    );
}

#[test]
fn root_ignore_used_without_specific_file() {
    let tmp = TempDir::new().unwrap();
    write_tree(
        tmp.path(),
        &[
            ("Dockerfile", "FROM scratch\n"),
            (".dockerignore", "*.log\ntmp\n"),
            ("app.log", "log"),
            ("tmp/cache.bin", "x"),
            ("main.py", "print()"),
        ],
    );

    let ctx = package(tmp.path());
    let names = entry_names(&ctx.archive);

    assert_eq!(ctx.ignore_source, IgnoreSource::Root);
    assert!(!names.iter().any(|n| n == "app.log" || n.starts_with("tmp")));
    assert!(names.contains(&"main.py".to_owned()));
}

#[test]
fn default_patterns_apply_without_ignore_files() {
    let tmp = TempDir::new().unwrap();
    write_tree(
        tmp.path(),
        &[
            ("Dockerfile", "FROM node\n"),
            (".git/HEAD", "ref: refs/heads/main"),
            ("web/node_modules/left-pad/index.js", "module.exports = 1"),
            ("web/index.js", "console.log(1)"),
        ],
    );

    let ctx = package(tmp.path());
    let names = entry_names(&ctx.archive);

    assert_eq!(ctx.ignore_source, IgnoreSource::Default);
    assert!(!names.iter().any(|n| n.starts_with(".git")));
    assert!(!names.iter().any(|n| n.contains("node_modules")));
    assert!(names.contains(&"web/index.js".to_owned()));
}

#[test]
fn dockerfile_and_ignore_file_always_included() {
    let tmp = TempDir::new().unwrap();
    write_tree(
        tmp.path(),
        &[
            ("Dockerfile", "FROM scratch\n"),
            (".dockerignore", "Dockerfile\n.dockerignore\nsecret.txt\n"),
            ("secret.txt", "s3cr3t"),
        ],
    );

    let ctx = package(tmp.path());
    let names = entry_names(&ctx.archive);

    assert!(names.contains(&"Dockerfile".to_owned()));
    assert!(names.contains(&".dockerignore".to_owned()));
    assert!(!names.contains(&"secret.txt".to_owned()));
}

#[test]
fn exclusion_reincludes_file_inside_ignored_directory() {
    let tmp = TempDir::new().unwrap();
    write_tree(
        tmp.path(),
        &[
            ("Dockerfile", "FROM scratch\n"),
            (".dockerignore", "build\n!build/keep.txt\n"),
            ("build/keep.txt", "keep"),
            ("build/drop.txt", "drop"),
        ],
    );

    let ctx = package(tmp.path());
    let names = entry_names(&ctx.archive);

    assert!(names.contains(&"build/keep.txt".to_owned()));
    assert!(!names.contains(&"build/drop.txt".to_owned()));
    assert_eq!(entry_content(&ctx.archive, "build/keep.txt").unwrap(), "keep");
}

#[test]
fn custom_dockerfile_path_and_its_ignore_file() {
    let tmp = TempDir::new().unwrap();
    write_tree(
        tmp.path(),
        &[
            ("docker/app.Dockerfile", "FROM alpine\n"),
            ("docker/app.Dockerfile.dockerignore", "docs\n"),
            (".dockerignore", "src\n"),
            ("docs/guide.md", "guide"),
            ("src/main.go", "package main"),
        ],
    );

    let ctx = ContextPackager::new(tmp.path())
        .dockerfile(Some("./docker/app.Dockerfile"))
        .package(&CancellationToken::new())
        .unwrap();
    let names = entry_names(&ctx.archive);

    assert!(names.contains(&"docker/app.Dockerfile".to_owned()));
    assert!(names.contains(&"docker/app.Dockerfile.dockerignore".to_owned()));
    assert!(names.contains(&"src/main.go".to_owned()));
    assert!(!names.iter().any(|n| n.starts_with("docs")));
}

// ── Limits and failures ──

#[test]
fn oversized_context_fails() {
    let tmp = TempDir::new().unwrap();
    let blob = noise(512 * 1024);
    write_tree(
        tmp.path(),
        &[("Dockerfile", "FROM scratch\n"), ("blob.txt", blob.as_str())],
    );

    let result = ContextPackager::new(tmp.path())
        .limits(ContextLimits {
            size_limit: 64 * 1024,
            ..ContextLimits::default()
        })
        .package(&CancellationToken::new());

    let err = result.unwrap_err();
    assert!(matches!(err, ContextError::TooLarge { .. }), "got: {err}");
    assert!(err.to_string().contains("too large"));
}

#[test]
fn archive_over_limit_after_final_flush_fails() {
    // Small enough to stay inside the gzip encoder's buffer until finish.
    let tmp = TempDir::new().unwrap();
    let blob = noise(8 * 1024);
    write_tree(
        tmp.path(),
        &[("Dockerfile", "FROM scratch\n"), ("blob.txt", blob.as_str())],
    );

    let result = ContextPackager::new(tmp.path())
        .limits(ContextLimits {
            size_limit: 2048,
            ..ContextLimits::default()
        })
        .package(&CancellationToken::new());

    assert!(
        matches!(result, Err(ContextError::TooLarge { limit_bytes: 2048, .. })),
        "got: {:?}",
        result.map(|ctx| ctx.archive.len())
    );
}

#[test]
fn many_files_only_warn() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path(), &[("Dockerfile", "FROM scratch\n")]);
    for i in 0..25 {
        std::fs::write(tmp.path().join(format!("f{i:02}.txt")), "x").unwrap();
    }

    let ctx = package(tmp.path());
    assert_eq!(ctx.file_count, 26);
}

#[test]
fn missing_dockerfile_fails() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path(), &[("main.rs", "fn main() {}")]);

    let err = ContextPackager::new(tmp.path())
        .package(&CancellationToken::new())
        .unwrap_err();

    assert!(matches!(err, ContextError::DockerfileNotFound { .. }));
    assert!(err.to_string().contains("Dockerfile"));
}

#[test]
fn ignored_dockerfile_directory_still_reports_missing_file() {
    let tmp = TempDir::new().unwrap();
    write_tree(
        tmp.path(),
        &[(".dockerignore", "docker\n"), ("docker/Dockerfile", "FROM scratch\n")],
    );

    // The Dockerfile lives under an ignored, pruned directory.
    let err = ContextPackager::new(tmp.path())
        .dockerfile(Some("docker/Dockerfile"))
        .package(&CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, ContextError::DockerfileNotFound { .. }));
}

#[test]
fn non_directory_context_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("file");
    std::fs::write(&file, "x").unwrap();

    let err = ContextPackager::new(&file)
        .package(&CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, ContextError::InvalidContext { .. }));
}

#[test]
fn cancelled_packaging_returns_cancellation_error() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path(), &[("Dockerfile", "FROM scratch\n"), ("a.txt", "a")]);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = ContextPackager::new(tmp.path()).package(&cancel).unwrap_err();
    assert!(err.is_cancelled());
    assert!(!ContextError::DockerfileNotFound {
        dockerfile: "Dockerfile".to_owned()
    }
    .is_cancelled());
}

#[cfg(unix)]
#[test]
fn symlinks_are_archived_as_links() {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path(), &[("Dockerfile", "FROM scratch\n"), ("real.txt", "r")]);
    std::os::unix::fs::symlink("real.txt", tmp.path().join("link.txt")).unwrap();

    let ctx = package(tmp.path());
    let mut tar = tar::Archive::new(GzDecoder::new(&ctx.archive[..]));
    let link = tar
        .entries()
        .unwrap()
        .map(|e| e.unwrap())
        .find(|e| e.path().unwrap().to_string_lossy() == "link.txt")
        .unwrap();

    assert_eq!(link.header().entry_type(), tar::EntryType::Symlink);
    assert_eq!(
        link.link_name().unwrap().unwrap().to_string_lossy(),
        "real.txt"
    );
}
