use crate::*;

use hsm_services::Severity;

/// Host drops the connection; the supervisor redials with fresh auth.
#[tokio::test]
async fn test_reconnect_after_host_close() -> Result<()> {
    let mut host = MockHost::start(SECRET).await?;
    let agent = Agent::spawn(&host.host(), SECRET, test_settings(), None);

    let mut first = host.accept().await?;
    let first_nonce = first.auth.nonce.clone();
    first.ws.close(None).await?;
    drop(first);

    let mut second = host.accept().await?;
    assert_ne!(second.auth.nonce, first_nonce, "each dial signs a new nonce");

    second.send_sign_request("after-reconnect", "c").await?;
    let reply = second.next_of_type(msg_types::SSH_CERTIFICATE).await?;
    assert_eq!(reply.id, "after-reconnect");

    assert!(agent.memory.count(Severity::Error, "Session stream error") >= 1);
    let sessions = agent.stop().await?;
    assert!(sessions >= 2);
    Ok(())
}

/// Agent started before the host exists keeps dialing until it appears.
#[tokio::test]
async fn test_retries_until_host_available() -> Result<()> {
    // Reserve a port, then free it so the first dials are refused.
    let addr = {
        let probe = TcpListener::bind("127.0.0.1:0").await?;
        probe.local_addr()?
    };
    let agent = Agent::spawn(&addr.to_string(), SECRET, test_settings(), None);

    eventually("dial failures logged", || agent.memory.count(Severity::Error, "Session stream error") >= 2).await;

    let listener = TcpListener::bind(addr).await?;
    let (stream, _) = timeout(WAIT, listener.accept()).await??;
    let mut ws = tokio_tungstenite::accept_async(stream).await?;

    let env = Envelope::seal_json(
        "late",
        TOKEN,
        &Secret::new(SECRET),
        msg_types::SSH_CERTIFICATE,
        &SshRequest { serial: SERIAL.into(), certificate: "c".into() },
    )?;
    ws.send(Message::Text(env.to_json()?.into())).await?;
    loop {
        let msg = timeout(WAIT, ws.next()).await?.context("stream ended")??;
        if let Message::Text(text) = msg {
            let opened = envelope::decode(TOKEN, &Secret::new(SECRET), text.as_bytes())?;
            assert_eq!(opened.id, "late");
            break;
        }
    }

    agent.stop().await?;
    Ok(())
}

/// Shutdown closes the live session with a close frame.
#[tokio::test]
async fn test_graceful_shutdown() -> Result<()> {
    let mut host = MockHost::start(SECRET).await?;
    let agent = Agent::spawn(&host.host(), SECRET, test_settings(), None);
    let mut conn = host.accept().await?;

    let sessions = agent.stop().await?;
    assert_eq!(sessions, 1);

    let mut closed = false;
    while let Ok(Some(Ok(msg))) = timeout(WAIT, conn.ws.next()).await {
        if matches!(msg, Message::Close(_)) {
            closed = true;
            break;
        }
    }
    assert!(closed, "agent should close the socket cleanly");
    Ok(())
}
