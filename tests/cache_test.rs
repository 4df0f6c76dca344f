//! Response cache behaviour over time.

use std::time::Duration;

use huginn::cache::{CacheConfig, CachedReply, ResponseCache, fingerprint};

fn reply(text: &str) -> CachedReply {
    CachedReply {
        text: text.to_string(),
        model: "gemini-1.5-flash".to_string(),
    }
}

#[tokio::test]
async fn entries_expire_after_ttl() {
    let cache = ResponseCache::new(&CacheConfig::new().ttl(Duration::from_millis(50)));
    let key = fingerprint("Who made you?");
    cache.put(key, reply("Ritik did.")).await;
    assert!(cache.get(key).await.is_some());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(cache.get(key).await.is_none());
}

#[tokio::test]
async fn reply_is_byte_identical() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let text = "Line one.\n\n  Indented *markdown* with unicode ✓";
    cache.put(fingerprint("q"), reply(text)).await;
    assert_eq!(cache.get(fingerprint("Q")).await.unwrap().text, text);
}

#[tokio::test]
async fn different_messages_do_not_collide() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.put(fingerprint("what is rust?"), reply("a language")).await;
    assert!(cache.get(fingerprint("what is rust")).await.is_none());
    assert!(cache.get(fingerprint("what is go?")).await.is_none());
}
