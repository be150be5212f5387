use crate::*;

use hsm_services::{FileSink, RotatingFile, Severity};

/// Wrong secret: every upgrade is refused and the agent keeps retrying.
#[tokio::test]
async fn test_bad_secret_is_rejected() -> Result<()> {
    let host = MockHost::start(SECRET).await?;
    let agent = Agent::spawn(&host.host(), "wrong-secret", test_settings(), None);

    eventually("several rejected dials", || host.rejected() >= 3).await;
    assert!(agent.memory.count(Severity::Error, "Session stream error") >= 3);
    assert_eq!(agent.status.signed(), 0);

    agent.stop().await?;
    Ok(())
}

/// Diagnostics reach the rotating log file as plain-text lines.
#[tokio::test]
async fn test_log_file_records_session_events() -> Result<()> {
    let dir = std::env::temp_dir().join(format!("hsmd-it-log-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir)?;
    let file = RotatingFile::new(dir.join("hsm.log"), dir.join("hsm.log.1"), 1_000_000);
    let file_sink: SharedSink = Arc::new(FileSink::new(file));

    let mut host = MockHost::start(SECRET).await?;
    let agent = Agent::spawn(&host.host(), SECRET, test_settings(), Some(file_sink));
    let mut conn = host.accept().await?;
    conn.send_raw("garbage").await?;

    let log = dir.join("hsm.log");
    eventually("log lines written", || {
        std::fs::read_to_string(&log)
            .map(|text| text.contains("Connected to host") && text.contains("Unmarshal payload error"))
            .unwrap_or(false)
    })
    .await;

    let text = std::fs::read_to_string(&log)?;
    assert!(text.lines().any(|l| l.contains("[INFO]") && l.contains("Connected to host")));
    assert!(text.lines().any(|l| l.contains("[ERRO]")));

    agent.stop().await?;
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
