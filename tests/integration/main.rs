//! Integration tests for instaclone

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[[items]]
local_path = "lib"
remote_prefix = "remote"
install_method = "copy"
upload_command = "install -D $LOCAL $REMOTE"
download_command = "cp $REMOTE $LOCAL"
version_string = "v1"

[[items]]
local_path = "tool.bin"
remote_prefix = "remote"
install_method = "symlink"
upload_command = "install -D $LOCAL $REMOTE"
download_command = "cp $REMOTE $LOCAL"
version_string = "v1"
"#;

    /// A working directory with its own home and instaclone dir
    struct Sandbox {
        dir: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir_all(dir.path().join("home")).unwrap();
            fs::create_dir_all(dir.path().join("work")).unwrap();
            Self { dir }
        }

        fn with_config() -> Self {
            let sandbox = Self::new();
            fs::create_dir_all(sandbox.dir.path().join("ic")).unwrap();
            fs::write(sandbox.work().join("instaclone.toml"), CONFIG).unwrap();
            sandbox
        }

        fn work(&self) -> PathBuf {
            self.dir.path().join("work")
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("instaclone");
            cmd.current_dir(self.work())
                .env("HOME", self.dir.path().join("home"))
                .env("INSTACLONE_DIR", self.dir.path().join("ic"))
                .env_remove("INSTACLONE_CONFIG");
            cmd
        }
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("instaclone")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("cached installations"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("instaclone")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("instaclone"));
    }

    #[test]
    fn unknown_command_fails() {
        cargo_bin_cmd!("instaclone")
            .arg("unpublish")
            .assert()
            .code(2);
    }

    #[test]
    fn configs_shows_items() {
        let sandbox = Sandbox::with_config();
        sandbox
            .cmd()
            .arg("configs")
            .assert()
            .success()
            .stdout(predicate::str::contains("[[items]]"))
            .stdout(predicate::str::contains("name = \"tool.bin\""));
    }

    #[test]
    fn configs_selects_items_as_json() {
        let sandbox = Sandbox::with_config();
        sandbox
            .cmd()
            .args(["configs", "--format", "json", "lib"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"name\": \"lib\""))
            .stdout(predicate::str::contains("tool.bin").not());
    }

    #[test]
    fn unknown_item_is_an_error() {
        let sandbox = Sandbox::with_config();
        sandbox
            .cmd()
            .args(["configs", "nope"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("error:"))
            .stderr(predicate::str::contains("Could not find config for item: nope"));
    }

    #[test]
    fn missing_config_is_an_error() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .arg("install")
            .assert()
            .code(2)
            .stderr(predicate::str::contains("No config file found"))
            .stderr(predicate::str::contains("instaclone.yml is not read"));
    }

    #[test]
    fn invalid_config_is_an_error() {
        let sandbox = Sandbox::new();
        fs::write(
            sandbox.work().join("instaclone.toml"),
            "[[items]]\nlocal_path = \"/etc\"\n",
        )
        .unwrap();
        sandbox
            .cmd()
            .arg("configs")
            .assert()
            .code(2)
            .stderr(predicate::str::contains("must be a relative path"));
    }

    #[test]
    fn explicit_config_path() {
        let sandbox = Sandbox::new();
        let path = sandbox.dir.path().join("elsewhere.json");
        fs::write(
            &path,
            r#"{"items": [{"local_path": "x", "remote_prefix": "r", "install_method": "copy",
               "upload_command": "true", "download_command": "true", "version": "7"}]}"#,
        )
        .unwrap();
        sandbox
            .cmd()
            .args(["configs", "--format", "plain", "--config"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("x\tcopy\tr/x.$<version>$/x"));
    }

    #[test]
    fn purge_without_cache_succeeds() {
        let sandbox = Sandbox::new();
        fs::create_dir_all(sandbox.dir.path().join("ic")).unwrap();
        sandbox.cmd().arg("purge").assert().success();
        assert!(!sandbox.dir.path().join("ic/cache").exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn publish_purge_install_round_trip() {
        let sandbox = Sandbox::with_config();
        let work = sandbox.work();
        fs::create_dir_all(work.join("lib/sub")).unwrap();
        fs::write(work.join("lib/a.txt"), "alpha").unwrap();
        fs::write(work.join("lib/sub/b.txt"), "beta").unwrap();
        fs::write(work.join("tool.bin"), "binary").unwrap();

        sandbox
            .cmd()
            .arg("publish")
            .assert()
            .success()
            .stdout(predicate::str::contains("Published lib"))
            .stdout(predicate::str::contains("Published tool.bin"));

        assert!(work.join("remote/lib.$v1$/lib.tar.gz").is_file());
        assert!(work.join("remote/tool.bin.$v1$/tool.bin").is_file());
        let cached = sandbox
            .dir
            .path()
            .join("ic/cache/contents/remote/lib.$v1$/lib");
        assert!(cached.join("a.txt").is_file());
        assert!(fs::symlink_metadata(work.join("tool.bin"))
            .unwrap()
            .file_type()
            .is_symlink());

        sandbox.cmd().arg("purge").assert().success();
        fs::remove_dir_all(work.join("lib")).unwrap();
        fs::remove_dir_all(work.join("lib.bak")).unwrap();
        fs::remove_file(work.join("tool.bin")).unwrap();

        sandbox
            .cmd()
            .arg("install")
            .assert()
            .success()
            .stdout(predicate::str::contains("Installed lib (copy)"));
        assert_eq!(fs::read_to_string(work.join("lib/a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(work.join("lib/sub/b.txt")).unwrap(), "beta");
        assert_eq!(fs::read_to_string(work.join("tool.bin")).unwrap(), "binary");

        sandbox
            .cmd()
            .args(["install", "lib"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Target already exists"));
        sandbox.cmd().args(["install", "lib", "-f"]).assert().success();

        // Leave the read-only cache removable for TempDir
        sandbox.cmd().arg("purge").assert().success();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_download_reports_transfer_error() {
        let sandbox = Sandbox::with_config();
        sandbox
            .cmd()
            .args(["install", "lib"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Command exited with"));
        assert!(!sandbox.work().join("lib").exists());
    }
}
