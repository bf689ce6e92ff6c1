//! Integration tests for scrun

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    /// scrun isolated from the user's config and cache
    fn scrun(work: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("scrun");
        cmd.current_dir(work.path())
            .env("SCRUN_CONFIG", work.path().join("absent-config.toml"))
            .env("SCRUN_CACHE_DIR", work.path().join("cache"))
            .env_remove("SCRUN_LOG");
        cmd
    }

    #[test]
    fn help_displays() {
        let work = TempDir::new().unwrap();
        scrun(&work)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("--with"))
            .stdout(predicate::str::contains("--engine"));
    }

    #[test]
    fn version_displays() {
        let work = TempDir::new().unwrap();
        scrun(&work)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("scrun"));
    }

    #[test]
    fn missing_script_fails() {
        let work = TempDir::new().unwrap();
        scrun(&work)
            .arg("./does-not-exist")
            .assert()
            .failure()
            .stderr(predicate::str::contains("File not found: ./does-not-exist"));
    }

    #[test]
    fn ambiguous_target_fails() {
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("cowsay.js"), "console.log('local')\n").unwrap();

        scrun(&work)
            .arg("cowsay")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Ambiguous: \"cowsay\" matches: cowsay.js"))
            .stderr(predicate::str::contains("Use ./ for local, --with= for npm"));
    }

    #[test]
    fn malformed_manifest_fails_without_cache_entry() {
        let work = TempDir::new().unwrap();
        fs::write(
            work.path().join("bad.mjs"),
            "/*/ // <package>\n{ dependencies: { semver: }\n/*/ // </package>\nconsole.log(1)\n",
        )
        .unwrap();

        scrun(&work)
            .arg("./bad.mjs")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse inline dependencies"));

        assert!(!work.path().join("cache").exists());
    }

    #[test]
    fn malformed_config_fails() {
        let work = TempDir::new().unwrap();
        let config = work.path().join("config.toml");
        fs::write(&config, "[runtime\nnode = ").unwrap();

        scrun(&work)
            .env("SCRUN_CONFIG", &config)
            .arg("./anything.js")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[cfg(unix)]
    mod with_stub_node {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;
        use std::time::Duration;

        /// A `node` that prints its arguments and exits with 7
        fn stub_node(work: &TempDir) -> PathBuf {
            let path = work.path().join("fake-node");
            fs::write(&path, "#!/bin/sh\necho \"args: $*\"\nexit 7\n").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

            let config = work.path().join("config.toml");
            fs::write(
                &config,
                format!("[runtime]\nnode = \"{}\"\n", path.display()),
            )
            .unwrap();
            config
        }

        #[test]
        fn exit_code_and_args_pass_through() {
            let work = TempDir::new().unwrap();
            let config = stub_node(&work);
            fs::write(work.path().join("plain.mjs"), "console.log(1)\n").unwrap();

            scrun(&work)
                .env("SCRUN_CONFIG", &config)
                .args(["./plain", "--flag", "value"])
                .assert()
                .code(7)
                .stdout(predicate::str::contains("plain.mjs --flag value"));
        }

        #[test]
        fn eval_mode_forwards_to_node() {
            let work = TempDir::new().unwrap();
            let config = stub_node(&work);

            scrun(&work)
                .env("SCRUN_CONFIG", &config)
                .args(["-p", "1+1"])
                .assert()
                .code(7)
                .stdout(predicate::str::contains("args: -p 1+1"));
        }

        #[test]
        fn stdin_script_runs_from_temp_file() {
            let work = TempDir::new().unwrap();
            let config = stub_node(&work);

            scrun(&work)
                .env("SCRUN_CONFIG", &config)
                .arg("-")
                .write_stdin("console.log('from stdin')\n")
                .assert()
                .code(7)
                .stdout(predicate::str::contains("script.mts"));
        }

        fn executable(work: &TempDir, name: &str, body: &str) -> PathBuf {
            let path = work.path().join(name);
            fs::write(&path, body).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn interrupt_stops_install_and_discards_staging() {
            let work = TempDir::new().unwrap();
            let finished = work.path().join("npm-finished");
            let node = executable(&work, "fake-node", "#!/bin/sh\necho v20.11.1\n");
            let npm = executable(
                &work,
                "fake-npm",
                &format!("#!/bin/sh\nsleep 3\ntouch '{}'\n", finished.display()),
            );
            let config = work.path().join("config.toml");
            fs::write(
                &config,
                format!(
                    "[runtime]\nnode = \"{}\"\n\n[npm]\nprogram = \"{}\"\n",
                    node.display(),
                    npm.display()
                ),
            )
            .unwrap();
            fs::write(
                work.path().join("deps.mjs"),
                "/*/ // <package>\n{ dependencies: { semver: '^7.5.4' } }\n/*/ // </package>\n",
            )
            .unwrap();
            let cache = work.path().join("cache");

            let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_scrun"))
                .current_dir(work.path())
                .env("SCRUN_CONFIG", &config)
                .env("SCRUN_CACHE_DIR", &cache)
                .env_remove("SCRUN_LOG")
                .arg("./deps.mjs")
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .spawn()
                .unwrap();

            std::thread::sleep(Duration::from_secs(1));
            unsafe {
                libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
            }
            let status = child.wait().unwrap();
            assert_eq!(status.code(), Some(128 + libc::SIGTERM));

            // The interrupted npm never reaches its last step
            std::thread::sleep(Duration::from_secs(3));
            assert!(!finished.exists());

            let leftovers: Vec<String> = fs::read_dir(cache.join("node-20.11"))
                .map(|entries| {
                    entries
                        .filter_map(Result::ok)
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
        }

        #[test]
        fn missing_node_is_launch_failure() {
            let work = TempDir::new().unwrap();
            let config = work.path().join("config.toml");
            fs::write(&config, "[runtime]\nnode = \"scrun-test-no-such-node\"\n").unwrap();
            fs::write(work.path().join("plain.mjs"), "console.log(1)\n").unwrap();

            scrun(&work)
                .env("SCRUN_CONFIG", &config)
                .arg("./plain.mjs")
                .assert()
                .code(1)
                .stderr(predicate::str::contains("Failed to launch scrun-test-no-such-node"));
        }
    }
}
