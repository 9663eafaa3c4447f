//! Loopback demo: a scripted remote peer, the handshake, an inventory fetcher
//! and a one-shot wait for `headers`.
//!
//! Run with:
//!   PEERDISPATCH_LOG_LEVEL=debug cargo run --example loopback

use std::time::Duration;

use peerdispatch::channel::memory::{self, RemotePeer};
use peerdispatch::logging::init_logging_from_env;
use peerdispatch::names::{GETDATA, GETHEADERS, HEADERS, INV, TX, VERACK, VERSION};
use peerdispatch::peer::HandshakeConfig;
use peerdispatch::{Dispatcher, Handler, Message, PeerSender};
use serde_json::json;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_logging_from_env()?;

    let (sender, receiver, remote) = memory::pair();
    let mut dispatcher = Dispatcher::new(sender, receiver);

    // Answer every announcement with a request for the announced items.
    let outbound = dispatcher.sender();
    dispatcher.register(Handler::scheduled(move |message| {
        let outbound = outbound.clone();
        async move {
            if !message.is(INV) {
                return;
            }
            let items = message.field("items").cloned().unwrap_or_else(|| json!([]));
            match Message::from_serialize(GETDATA, &json!({ "items": items })) {
                Ok(request) => {
                    if let Err(e) = outbound.send(request) {
                        eprintln!("fetcher could not send getdata: {e}");
                    }
                }
                Err(e) => eprintln!("fetcher could not encode getdata: {e}"),
            }
        }
    }));
    dispatcher.register(Handler::immediate(|message| {
        eprintln!("observed '{}' with {} field(s)", message.name, message.fields.len());
    }));

    let script = tokio::spawn(remote_script(remote));

    let peer = dispatcher.run_handshake().await?;
    eprintln!(
        "Handshake complete: version {:?}, subversion {:?}",
        peer.protocol_version(),
        peer.subversion()
    );
    let announced: Vec<String> = peer.into_fields().into_iter().map(|(key, _)| key).collect();
    eprintln!("Peer announced fields: {}", announced.join(", "));

    let handle = dispatcher.handle();
    let headers = handle.wait_for_timeout([HEADERS], Duration::from_secs(5));
    dispatcher.send(Message::from_serialize(GETHEADERS, &json!({ "start": 0 }))?)?;

    let pump = dispatcher.spawn_pump();
    let reply = headers.await?;
    eprintln!("Received headers: {}", reply.field("count").unwrap_or(&json!(0)));

    script.await??;
    match pump.await? {
        Err(e) => eprintln!("Pump stopped: {e}"),
        Ok(never) => match never {},
    }
    Ok(())
}

/// Play the far side: complete the handshake, announce one transaction, then
/// serve `getdata` and `getheaders` once each before hanging up.
async fn remote_script(mut remote: RemotePeer) -> Result<(), BoxError> {
    let ours = remote.next_sent().await.ok_or("local side went away")?;
    eprintln!("Remote got '{}'", ours.name);

    let version = HandshakeConfig::default()
        .with_subversion("/loopback-remote:0.1/")
        .with_last_block_index(42)
        .version_message();
    remote.deliver(Message::from_serialize(VERSION, &version)?)?;

    let ack = remote.next_sent().await.ok_or("local side went away")?;
    eprintln!("Remote got '{}'", ack.name);
    remote.deliver(Message::empty(VERACK))?;

    remote.deliver(Message::from_serialize(
        INV,
        &json!({ "items": [{ "kind": "tx", "hash": "6b1f" }] }),
    )?)?;

    let (mut served_data, mut served_headers) = (false, false);
    while !(served_data && served_headers) {
        let Some(request) = remote.next_sent().await else {
            break;
        };
        if request.is(GETDATA) {
            remote.deliver(Message::from_serialize(TX, &json!({ "hash": "6b1f" }))?)?;
            served_data = true;
        } else if request.is(GETHEADERS) {
            remote.deliver(Message::from_serialize(HEADERS, &json!({ "count": 2000 }))?)?;
            served_headers = true;
        }
    }

    remote.disconnect();
    Ok(())
}
