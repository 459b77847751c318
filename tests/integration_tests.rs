//! Sessions driving real processes in a pseudo-terminal
//!
//! A small shell script stands in for `ssh`: it asks for a password and then
//! becomes an interactive bash.

#![cfg(unix)]

use jupyter_tunnel::{Credential, Pattern, Session, SessionError, SessionState};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const FAKE_SSH: &str = r#"#!/bin/sh
printf 'Password: '
stty -echo 2>/dev/null
read -r pw
stty echo 2>/dev/null
printf '\n'
if [ "$pw" != "hunter2" ]; then
    echo "Permission denied, please try again."
    exit 255
fi
echo "Welcome to the test cluster"
PS1='$ ' exec bash --norc --noprofile -i
"#;

fn fake_ssh(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("fake-ssh");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(FAKE_SSH.as_bytes()).unwrap();
        file.sync_all().unwrap();
    }
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn have_bash() -> bool {
    which::which("bash").is_ok()
}

#[tokio::test]
async fn test_pty_login_and_round_trip() {
    if !have_bash() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let mut session = Session::builder()
        .program(fake_ssh(&dir).to_string_lossy())
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let secret = Credential::from_string("hunter2".to_string());
    session.login("localhost", "ab123", &secret).await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.is_alive());

    session.send_line("echo $((6 * 7))").await.unwrap();
    let reply = session.prompt(None).await.unwrap().into_match().unwrap();
    assert!(reply.before.contains("42"));

    session.send_line("echo 'Email: test@example.com'").await.unwrap();
    let found = session
        .expect(Pattern::regex(r"(\w+)@(\w+)\.(\w+)").unwrap())
        .await
        .unwrap();
    assert_eq!(found.capture(1), Some("test"));
    assert_eq!(found.capture(3), Some("com"));

    session.close(true);
    assert!(!session.is_alive());
}

#[tokio::test]
async fn test_pty_wrong_password() {
    let dir = TempDir::new().unwrap();
    let mut session = Session::builder()
        .program(fake_ssh(&dir).to_string_lossy())
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let secret = Credential::from_string("letmein".to_string());
    let err = session.login("localhost", "ab123", &secret).await.unwrap_err();
    assert!(matches!(err, SessionError::Authentication { .. }));
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_pty_child_sees_ssh_arguments() {
    // echo prints its arguments and exits before any login prompt
    let mut session = Session::builder()
        .program("echo")
        .option("PubkeyAuthentication", "no")
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let secret = Credential::from_string("hunter2".to_string());
    let err = session.login("login01", "ab123", &secret).await.unwrap_err();
    match err {
        SessionError::Connection { host, reason } => {
            assert_eq!(host, "login01");
            assert_eq!(reason, "-q -o PubkeyAuthentication=no -l ab123 login01");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_pty_timeout_outcome() {
    if !have_bash() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let mut session = Session::builder()
        .program(fake_ssh(&dir).to_string_lossy())
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let secret = Credential::from_string("hunter2".to_string());
    session.login("localhost", "ab123", &secret).await.unwrap();

    let outcome = session
        .await_pattern(&Pattern::exact("NEVER_APPEARS"), Some(Duration::from_millis(200)))
        .await
        .unwrap();
    assert!(!outcome.is_match());
}
