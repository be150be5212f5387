use crate::*;

use hsm_core::message::StatusReport;

/// Heartbeats arrive on the status interval and carry live counters.
#[tokio::test]
async fn test_status_heartbeat() -> Result<()> {
    let mut host = MockHost::start(SECRET).await?;
    let settings = SessionSettings {
        status_interval: Duration::from_millis(100),
        ..test_settings()
    };
    let agent = Agent::spawn(&host.host(), SECRET, settings, None);
    let mut conn = host.accept().await?;

    let first = conn.next_of_type(msg_types::STATUS).await?;
    let report: StatusReport = serde_json::from_slice(&first.payload)?;
    assert_eq!(report.serial, SERIAL);
    assert_eq!(report.status, "available");

    conn.send_sign_request("req-1", "c").await?;
    conn.next_of_type(msg_types::SSH_CERTIFICATE).await?;

    // A later beat reflects the signature.
    loop {
        let beat = conn.next_of_type(msg_types::STATUS).await?;
        assert_ne!(beat.id, first.id);
        let report: StatusReport = serde_json::from_slice(&beat.payload)?;
        if report.signed == 1 {
            break;
        }
    }

    agent.stop().await?;
    Ok(())
}

/// Pings keep the connection alive on the ping interval.
#[tokio::test]
async fn test_keepalive_pings() -> Result<()> {
    let mut host = MockHost::start(SECRET).await?;
    let settings = SessionSettings {
        ping_interval: Duration::from_millis(100),
        ..test_settings()
    };
    let agent = Agent::spawn(&host.host(), SECRET, settings, None);
    let mut conn = host.accept().await?;

    let mut pings = 0;
    while pings < 2 {
        let msg = timeout(WAIT, conn.ws.next()).await?.context("stream ended")??;
        if matches!(msg, Message::Ping(_)) {
            pings += 1;
        }
    }

    agent.stop().await?;
    Ok(())
}
