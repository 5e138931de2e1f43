//! Process-level startup and shutdown behaviour of the binary

use anyhow::{ensure, Context, Result};
use std::fs;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_reverseproxy");

fn free_port() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?)
}

fn run(args: &[&str]) -> Result<Output> {
    Command::new(BIN)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .context("failed to run reverseproxy")
}

fn read_log(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("no log at {}", path.display()))
}

#[test]
fn test_missing_config_exits_with_one_diagnostic() -> Result<()> {
    let dir = TempDir::new()?;
    let log = dir.path().join("proxy.log");
    let listen = free_port()?;

    let output = run(&[
        "single-host",
        "--config_path",
        dir.path().join("absent.ini").to_str().context("path")?,
        "--log_path",
        log.to_str().context("path")?,
        "--listen",
        &listen.to_string(),
    ])?;

    assert_eq!(output.status.code(), Some(1));

    let content = read_log(&log)?;
    let errors: Vec<&str> = content.lines().filter(|l| l.contains("ERROR")).collect();
    assert_eq!(errors.len(), 1, "{content}");
    assert!(errors[0].starts_with("[reverseproxy] "), "{content}");
    assert!(errors[0].contains("lifecycle.rs"), "{content}");
    assert!(errors[0].contains("absent.ini"), "{content}");
    assert!(content.lines().all(|l| l.starts_with("[reverseproxy] ")));

    assert!(TcpStream::connect_timeout(&listen, Duration::from_millis(200)).is_err());
    Ok(())
}

#[test]
fn test_section_without_host_is_fatal() -> Result<()> {
    let dir = TempDir::new()?;
    let config = dir.path().join("hosts.ini");
    let log = dir.path().join("proxy.log");
    fs::write(&config, "[web]\nhost = 127.0.0.1:9\n\n[api]\nport = 8080\n")?;

    let output = run(&[
        "multi-host",
        "--config_path",
        config.to_str().context("path")?,
        "--log_path",
        log.to_str().context("path")?,
        "--listen",
        &free_port()?.to_string(),
    ])?;

    assert_eq!(output.status.code(), Some(1));
    let content = read_log(&log)?;
    ensure!(content.contains("api"), "section not named in log: {content}");
    Ok(())
}

#[test]
fn test_invalid_default_host_is_fatal() -> Result<()> {
    let dir = TempDir::new()?;
    let config = dir.path().join("default.ini");
    let log = dir.path().join("proxy.log");
    fs::write(&config, "default_host = ftp://10.0.0.9\n")?;

    let output = run(&[
        "single-host",
        "--config_path",
        config.to_str().context("path")?,
        "--log_path",
        log.to_str().context("path")?,
        "--listen",
        &free_port()?.to_string(),
    ])?;

    assert_eq!(output.status.code(), Some(1));
    assert!(read_log(&log)?.contains("ftp://10.0.0.9"));
    Ok(())
}

#[test]
fn test_unwritable_log_path_reports_on_stderr() -> Result<()> {
    let dir = TempDir::new()?;
    let config = dir.path().join("default.ini");
    fs::write(&config, "default_host = http://127.0.0.1:9\n")?;
    let log = dir.path().join("missing").join("proxy.log");

    let output = run(&[
        "single-host",
        "--config_path",
        config.to_str().context("path")?,
        "--log_path",
        log.to_str().context("path")?,
        "--listen",
        &free_port()?.to_string(),
    ])?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[reverseproxy]"), "{stderr}");
    assert!(!log.exists());
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_sigterm_shuts_down_cleanly() -> Result<()> {
    use std::thread::sleep;
    use std::time::Instant;

    let dir = TempDir::new()?;
    let config = dir.path().join("default.ini");
    let log = dir.path().join("proxy.log");
    fs::write(&config, "default_host = http://127.0.0.1:9\n")?;
    let listen = free_port()?;

    let mut child = Command::new(BIN)
        .args([
            "single-host",
            "--config_path",
            config.to_str().context("path")?,
            "--log_path",
            log.to_str().context("path")?,
            "--listen",
            &listen.to_string(),
        ])
        .env_remove("RUST_LOG")
        .spawn()?;

    let deadline = Instant::now() + Duration::from_secs(10);
    while TcpStream::connect_timeout(&listen, Duration::from_millis(100)).is_err() {
        if Instant::now() > deadline {
            let _ = child.kill();
            anyhow::bail!("proxy never started listening on {listen}");
        }
        sleep(Duration::from_millis(50));
    }

    let killed = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()?;
    ensure!(killed.success(), "kill -TERM failed");

    let status = child.wait()?;
    assert_eq!(status.code(), Some(0));

    let content = read_log(&log)?;
    assert!(content.contains("Service exit, no error"), "{content}");
    Ok(())
}
