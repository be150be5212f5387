use crate::*;

use hsm_core::message::SshResponse;
use hsm_services::Severity;

/// Agent dials with valid auth headers and answers a signing request.
#[tokio::test]
async fn test_sign_round_trip() -> Result<()> {
    let mut host = MockHost::start(SECRET).await?;
    let agent = Agent::spawn(&host.host(), SECRET, test_settings(), None);

    let mut conn = host.accept().await?;
    assert_eq!(conn.auth.token, TOKEN);
    assert_eq!(conn.auth.nonce.len(), 32);

    conn.send_sign_request("req-1", "unsigned").await?;
    let reply = conn.next_of_type(msg_types::SSH_CERTIFICATE).await?;
    assert_eq!(reply.id, "req-1");
    let body: SshResponse = serde_json::from_slice(&reply.payload)?;
    assert_eq!(body.certificate, format!("{SERIAL}:unsigned"));

    eventually("connect logged", || agent.memory.count(Severity::Info, "Connected to host") == 1).await;
    assert_eq!(agent.status.signed(), 1);
    agent.stop().await?;
    Ok(())
}

/// Many requests in flight at once are all answered, each under its own id.
#[tokio::test]
async fn test_concurrent_requests_correlate() -> Result<()> {
    let mut host = MockHost::start(SECRET).await?;
    let agent = Agent::spawn(&host.host(), SECRET, test_settings(), None);
    let mut conn = host.accept().await?;

    for i in 0..20 {
        conn.send_sign_request(&format!("req-{i}"), &format!("cert-{i}")).await?;
    }

    let mut seen = std::collections::HashMap::new();
    while seen.len() < 20 {
        let reply = conn.next_of_type(msg_types::SSH_CERTIFICATE).await?;
        let body: SshResponse = serde_json::from_slice(&reply.payload)?;
        seen.insert(reply.id, body.certificate);
    }
    for i in 0..20 {
        assert_eq!(seen[&format!("req-{i}")], format!("{SERIAL}:cert-{i}"));
    }

    agent.stop().await?;
    Ok(())
}

/// Garbage, forged and unknown messages are dropped without ending the session.
#[tokio::test]
async fn test_bad_messages_are_dropped() -> Result<()> {
    let mut host = MockHost::start(SECRET).await?;
    let agent = Agent::spawn(&host.host(), SECRET, test_settings(), None);
    let mut conn = host.accept().await?;

    conn.send_raw("this is not an envelope").await?;

    let forged = Envelope::seal("forged", TOKEN, &Secret::new("not-the-secret"), msg_types::SSH_CERTIFICATE, b"{}")?;
    conn.send_raw(&forged.to_json()?).await?;

    let unknown = Envelope::seal("u-1", TOKEN, &Secret::new(SECRET), "firmware_update", b"{}")?;
    conn.send_raw(&unknown.to_json()?).await?;

    conn.send_sign_request("req-ok", "fine").await?;
    let reply = conn.next_of_type(msg_types::SSH_CERTIFICATE).await?;
    assert_eq!(reply.id, "req-ok");

    eventually("bad frames logged", || agent.memory.count(Severity::Error, "Unmarshal payload error") == 2).await;
    assert_eq!(agent.status.dropped(), 2);
    assert_eq!(agent.status.signed(), 1);

    let sessions = agent.stop().await?;
    assert_eq!(sessions, 1, "bad input must not force a reconnect");
    Ok(())
}

/// A signer panic fails one request; the next one still succeeds.
#[tokio::test]
async fn test_signer_panic_is_contained() -> Result<()> {
    let mut host = MockHost::start(SECRET).await?;
    let agent = Agent::spawn(&host.host(), SECRET, test_settings(), None);
    let mut conn = host.accept().await?;

    conn.send_sign_request("req-panic", "boom").await?;
    conn.send_sign_request("req-after", "ok").await?;

    let reply = conn.next_of_type(msg_types::SSH_CERTIFICATE).await?;
    assert_eq!(reply.id, "req-after");
    eventually("failure counted", || agent.status.failed() == 1).await;

    agent.stop().await?;
    Ok(())
}
