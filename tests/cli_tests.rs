//! Command-line tests for the `sqlstep` binary.

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use std::io::Write;

    fn db_path(dir: &tempfile::TempDir) -> String {
        dir.path().join("cli.db").to_string_lossy().into_owned()
    }

    #[test]
    fn test_runs_sql_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let output = Command::cargo_bin("sqlstep")
            .unwrap()
            .arg(db_path(&dir))
            .arg("CREATE TABLE t (a INTEGER)")
            .arg("INSERT INTO t VALUES (5)")
            .arg("SELECT a FROM t")
            .output()
            .unwrap();

        assert!(output.status.success());
        let stdout = String::from_utf8(output.stdout).unwrap();
        assert!(stdout.contains("changes: 1"), "{}", stdout);
        assert!(stdout.contains(r#"["a"]"#), "{}", stdout);
        assert!(stdout.contains("[5]"), "{}", stdout);
    }

    #[test]
    fn test_reads_sql_from_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let output = Command::cargo_bin("sqlstep")
            .unwrap()
            .arg(db_path(&dir))
            .write_stdin("SELECT 1 AS one, 'x' AS two\n\nSELECT NULL AS n\n")
            .output()
            .unwrap();

        assert!(output.status.success());
        let stdout = String::from_utf8(output.stdout).unwrap();
        assert_eq!(stdout, "[\"one\",\"two\"]\n[1,\"x\"]\n[\"n\"]\n[null]\n");
    }

    #[test]
    fn test_engine_error_exits_nonzero() {
        let dir = tempfile::tempdir().unwrap();
        let output = Command::cargo_bin("sqlstep")
            .unwrap()
            .arg(db_path(&dir))
            .arg("SELECT * FROM missing")
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        let stderr = String::from_utf8(output.stderr).unwrap();
        assert!(stderr.contains("no such table"), "{}", stderr);
    }

    #[test]
    fn test_missing_database_argument() {
        let output = Command::cargo_bin("sqlstep").unwrap().output().unwrap();
        assert_eq!(output.status.code(), Some(1));
        let stderr = String::from_utf8(output.stderr).unwrap();
        assert!(stderr.contains("usage"), "{}", stderr);
    }

    #[test]
    fn test_explicit_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = tempfile::NamedTempFile::new().unwrap();
        writeln!(config, "[logging]\nlevel = \"loud\"").unwrap();

        let output = Command::cargo_bin("sqlstep")
            .unwrap()
            .arg("--config")
            .arg(config.path())
            .arg(db_path(&dir))
            .arg("SELECT 1")
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        let stderr = String::from_utf8(output.stderr).unwrap();
        assert!(stderr.contains("unknown log level"), "{}", stderr);
    }
}
