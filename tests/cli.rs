#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::TempDir;

    const LINK: &str = "ed2k://|file|song.mp3|4096|0123456789abcdef0123456789abcdef|/";

    fn netdisk(storage: &TempDir) -> Command {
        let mut cmd = Command::cargo_bin("netdisk").expect("binary not built");
        cmd.arg("--storage")
            .arg(storage.path())
            .args(["--archiver", "zip", "--chunk-delay-ms", "0"]);
        cmd
    }

    fn create_account(storage: &TempDir, id: &str, limit: &str) {
        netdisk(storage)
            .args(["account", "create", "--id", id, "--limit", limit])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("account {}:", id)));
    }

    #[test]
    fn test_account_create_and_show() {
        let storage = TempDir::new().expect("Failed to create temp dir");
        create_account(&storage, "3", "1048576");

        netdisk(&storage)
            .args(["account", "show", "--id", "3"])
            .assert()
            .success()
            .stdout(predicate::str::contains("0 B used").and(predicate::str::contains("1.00 MB limit")));
    }

    #[test]
    fn test_duplicate_account_is_rejected() {
        let storage = TempDir::new().expect("Failed to create temp dir");
        create_account(&storage, "3", "1048576");

        netdisk(&storage)
            .args(["account", "create", "--id", "3"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_fetch_ed2k_link() {
        let storage = TempDir::new().expect("Failed to create temp dir");
        create_account(&storage, "3", "1048576");

        netdisk(&storage)
            .args(["fetch", "--owner", "3", "--link", LINK])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"state\": \"completed\""));

        netdisk(&storage)
            .args(["files", "--owner", "3", "--verify"])
            .assert()
            .success()
            .stdout(predicate::str::contains("song.mp3").and(predicate::str::contains(" ok")));
    }

    #[test]
    fn test_fetch_over_quota_fails() {
        let storage = TempDir::new().expect("Failed to create temp dir");
        create_account(&storage, "3", "1000");

        netdisk(&storage)
            .args(["fetch", "--owner", "3", "--link", LINK])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Quota exceeded"));
    }

    #[test]
    fn test_malformed_link_fails() {
        let storage = TempDir::new().expect("Failed to create temp dir");
        create_account(&storage, "3", "1048576");

        netdisk(&storage)
            .args(["fetch", "--owner", "3", "--link", "ed2k://|file|broken|"])
            .assert()
            .failure();
    }
}
