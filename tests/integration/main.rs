//! Integration tests for Swiftpack

mod workspace;

mod cli_tests {
    use assert_cmd::Command;
    use predicates::prelude::*;

    fn swiftpack() -> Command {
        Command::cargo_bin("swiftpack").unwrap()
    }

    fn fixture_package() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Package.swift"),
            "// swift-tools-version:5.5\n{ \"name\": \"fixture\" }\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn help_displays() {
        swiftpack()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("source-based package manager"));
    }

    #[test]
    fn version_displays() {
        swiftpack()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("swiftpack"));
    }

    #[test]
    fn pins_empty() {
        let pkg = fixture_package();
        swiftpack()
            .args(["--package-path"])
            .arg(pkg.path())
            .arg("pins")
            .assert()
            .success()
            .stdout(predicate::str::contains("No pinned dependencies"));
    }

    #[test]
    fn resolve_without_dependencies() {
        let pkg = fixture_package();
        swiftpack()
            .args(["--package-path"])
            .arg(pkg.path())
            .arg("resolve")
            .assert()
            .success()
            .stdout(predicate::str::contains("No dependencies to resolve"));

        // An empty pins file is still written
        assert!(pkg.path().join("Package.resolved").exists());
    }

    #[test]
    fn resolve_outside_a_package_fails() {
        let dir = tempfile::tempdir().unwrap();
        swiftpack()
            .args(["--package-path"])
            .arg(dir.path())
            .arg("resolve")
            .assert()
            .failure()
            .stderr(predicate::str::contains("manifest not found"));
    }

    #[test]
    fn purge_cache_on_empty_cache() {
        let pkg = fixture_package();
        let cache = pkg.path().join("cache");
        swiftpack()
            .args(["--package-path"])
            .arg(pkg.path())
            .args(["--cache-path"])
            .arg(&cache)
            .arg("purge-cache")
            .assert()
            .success()
            .stdout(predicate::str::contains("Purged"));
    }

    #[test]
    fn reset_removes_build_dir() {
        let pkg = fixture_package();
        std::fs::create_dir_all(pkg.path().join(".build/repositories")).unwrap();

        swiftpack()
            .args(["--package-path"])
            .arg(pkg.path())
            .arg("reset")
            .assert()
            .success();
        assert!(!pkg.path().join(".build").exists());
    }
}

mod git_provider_tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::path::Path;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn git(args: &[&str], cwd: &Path) {
        let status = std::process::Command::new("git")
            .args([
                "-c",
                "user.email=test@example.com",
                "-c",
                "user.name=Test",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .current_dir(cwd)
            .output()
            .unwrap();
        assert!(
            status.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&status.stderr)
        );
    }

    #[test]
    fn fetch_clones_a_local_repository() {
        if !git_available() {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let upstream = dir.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        git(&["init"], &upstream);
        std::fs::write(
            upstream.join("Package.swift"),
            "// swift-tools-version:5.5\n{ \"name\": \"upstream\" }\n",
        )
        .unwrap();
        git(&["add", "."], &upstream);
        git(&["commit", "-m", "initial"], &upstream);
        git(&["tag", "1.0.0"], &upstream);

        let pkg = dir.path().join("pkg");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(
            pkg.join("Package.swift"),
            "// swift-tools-version:5.5\n{ \"name\": \"pkg\" }\n",
        )
        .unwrap();

        Command::cargo_bin("swiftpack")
            .unwrap()
            .args(["--package-path"])
            .arg(&pkg)
            .arg("fetch")
            .arg(&upstream)
            .assert()
            .success()
            .stdout(predicate::str::contains("Ready at"));

        // The bare clone landed under the workspace's repositories dir
        let repositories = pkg.join(".build/repositories");
        assert!(repositories.is_dir());
        assert_eq!(std::fs::read_dir(&repositories).unwrap().count(), 1);
    }
}
