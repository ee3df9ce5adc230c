//! Two buffers sharing one timeline
//!
//! Attaches two consumers to the same channel over the in-memory transport,
//! pushes a few notes through, then detaches them one at a time so the
//! teardown cascade shows up in the logs.
//!
//! Run with `RUST_LOG=misskey_stream=debug cargo run --example timeline`.

use std::sync::Arc;

use bytes::Bytes;
use misskey_stream::config::StaticCredentials;
use misskey_stream::transport::LoopbackTransport;
use misskey_stream::{
    render, BufferName, ChannelKey, ConsumerId, Note, SubscriptionRegistry, User,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let transport = LoopbackTransport::new();
    let credentials = StaticCredentials::new().with_token("misskey.io", "demo-token");
    let registry = SubscriptionRegistry::new(credentials, transport.clone());

    let buffer: BufferName = "misskey://misskey.io/timeline/local".parse()?;
    let key = buffer
        .channel_key()
        .ok_or("timeline buffer without a channel")?;

    for id in [1u64, 2] {
        let consumer = ConsumerId(id);
        registry
            .attach(&key.origin, key.channel, consumer, move |note: Arc<Note>| {
                println!("-- buffer {} --", consumer);
                for line in render(&note, "") {
                    println!("{}", line);
                }
            })
            .await?;
    }

    let quoted = Note::new(User::new("bob").name("Bob").host("remote.example")).text("original");
    transport.emit(
        &key,
        Note::new(User::new("ann").name("Ann"))
            .text("hello\nworld")
            .renote(quoted),
    );
    transport.emit_raw(
        &key,
        Bytes::from_static(br#"{"user": {"username": "cat", "isCat": true}, "text": "nya"}"#),
    );

    registry.detach(&key.origin, key.channel, ConsumerId(1)).await;
    println!("connected after first detach: {}", registry.is_connected(&key.origin).await);

    // Every other buffer is gone; sweep whatever is left
    registry.reconcile(std::iter::empty::<ChannelKey>()).await;
    println!("connected after sweep: {}", registry.is_connected(&key.origin).await);

    println!("{:?}", transport.stats());
    Ok(())
}
