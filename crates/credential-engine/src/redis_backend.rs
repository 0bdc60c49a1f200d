//! Redis backend
//!
//! Commands go through a `ConnectionManager` (multiplexed, reconnects on its
//! own); expiration events arrive on a dedicated pub/sub connection
//! subscribed to `__keyevent@*__:expired`. Every command is bounded by the
//! configured operation timeout and reported as `StoreUnavailable` on failure.
//!
//! Redis only publishes keyevent notifications when `notify-keyspace-events`
//! includes `E` and `x`; the setting lives in server memory and is lost on
//! restart, hence `enable_expiry_events` is re-applied on every resubscribe.

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BoxFuture, EXPIRY_CHANNEL_CAPACITY};
use crate::error::{Error, Result};

/// Pub/sub pattern matching expired-key events in every database.
pub const EXPIRED_EVENTS_PATTERN: &str = "__keyevent@*__:expired";

/// Deletes the claim only if the caller still owns it.
const RELEASE_CLAIM_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Writes the record (when ARGV[2] is given) and arms the trigger, but only
/// while the record still exists.
const UPDATE_IF_PRESENT_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 0 then
    return 0
end
if ARGV[2] then
    redis.call("SET", KEYS[1], ARGV[2])
end
redis.call("SET", KEYS[2], "1", "PX", ARGV[1])
return 1
"#;

const SCAN_BATCH: u32 = 200;

pub struct RedisBackend {
    client: redis::Client,
    conn: ConnectionManager,
    op_timeout: Duration,
    release_script: redis::Script,
    update_script: redis::Script,
}

impl RedisBackend {
    /// Open a client for `url` (`redis://[user:password@]host:port[/db]`)
    /// and establish the command connection.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = match tokio::time::timeout(op_timeout, ConnectionManager::new(client.clone()))
            .await
        {
            Ok(conn) => conn?,
            Err(_) => {
                return Err(Error::StoreUnavailable(format!(
                    "connecting to redis timed out after {op_timeout:?}"
                )));
            }
        };
        info!("connected to redis");
        Ok(Self {
            client,
            conn,
            op_timeout,
            release_script: redis::Script::new(RELEASE_CLAIM_SCRIPT),
            update_script: redis::Script::new(UPDATE_IF_PRESENT_SCRIPT),
        })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(|e| Error::StoreUnavailable(format!("{op}: {e}"))),
            Err(_) => Err(Error::StoreUnavailable(format!(
                "{op} timed out after {:?}",
                self.op_timeout
            ))),
        }
    }
}

/// Flags to write so that `current` also publishes expired keyevents, or
/// `None` when it already does.
fn merged_event_flags(current: &str) -> Option<String> {
    let has_keyevent = current.contains('E');
    let has_expired = current.contains('x') || current.contains('A');
    if has_keyevent && has_expired {
        return None;
    }
    let mut flags = current.to_string();
    if !has_keyevent {
        flags.push('E');
    }
    if !has_expired {
        flags.push('x');
    }
    Some(flags)
}

fn millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    (ttl.as_millis() as u64).max(1)
}

impl Backend for RedisBackend {
    fn id(&self) -> &str {
        "redis"
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: String = self
                .bounded("PING", async move { redis::cmd("PING").query_async(&mut conn).await })
                .await?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            self.bounded("GET", async move {
                redis::cmd("GET").arg(key).query_async(&mut conn).await
            })
            .await
        })
    }

    fn put_record<'a>(
        &'a self,
        key: &'a str,
        value: String,
        trigger_key: &'a str,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut pipe = redis::pipe();
            pipe.atomic().cmd("SET").arg(key).arg(value).ignore();
            match ttl {
                Some(ttl) => {
                    pipe.cmd("SET")
                        .arg(trigger_key)
                        .arg("1")
                        .arg("PX")
                        .arg(millis(ttl))
                        .ignore();
                }
                None => {
                    pipe.cmd("DEL").arg(trigger_key).ignore();
                }
            }
            let mut conn = self.conn.clone();
            self.bounded("MULTI SET", async move { pipe.query_async(&mut conn).await })
                .await
        })
    }

    fn update_if_present<'a>(
        &'a self,
        key: &'a str,
        value: Option<String>,
        trigger_key: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut invocation = self.update_script.key(key);
            invocation.key(trigger_key).arg(millis(ttl));
            if let Some(value) = value {
                invocation.arg(value);
            }
            let mut conn = self.conn.clone();
            let written: i64 = self
                .bounded("EVALSHA update", async move {
                    invocation.invoke_async(&mut conn).await
                })
                .await?;
            Ok(written == 1)
        })
    }

    fn arm<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: () = self
                .bounded("SET PX", async move {
                    redis::cmd("SET")
                        .arg(key)
                        .arg("1")
                        .arg("PX")
                        .arg(millis(ttl))
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(0);
            }
            let mut conn = self.conn.clone();
            self.bounded("DEL", async move {
                redis::cmd("DEL").arg(keys).query_async(&mut conn).await
            })
            .await
        })
    }

    fn ttl<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Duration>>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let remaining: i64 = self
                .bounded("PTTL", async move {
                    redis::cmd("PTTL").arg(key).query_async(&mut conn).await
                })
                .await?;
            // -2: no such key, -1: key without expiry
            Ok((remaining >= 0).then(|| Duration::from_millis(remaining as u64)))
        })
    }

    fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let pattern = format!("{prefix}*");
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let mut conn = self.conn.clone();
                let pattern = pattern.as_str();
                let (next, batch): (u64, Vec<String>) = self
                    .bounded("SCAN", async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(pattern)
                            .arg("COUNT")
                            .arg(SCAN_BATCH)
                            .query_async(&mut conn)
                            .await
                    })
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            // SCAN may return a key more than once
            keys.sort();
            keys.dedup();
            Ok(keys)
        })
    }

    fn enable_expiry_events(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let reply: Vec<String> = self
                .bounded("CONFIG GET", async move {
                    redis::cmd("CONFIG")
                        .arg("GET")
                        .arg("notify-keyspace-events")
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            let current = reply.get(1).map(String::as_str).unwrap_or_default();

            let Some(flags) = merged_event_flags(current) else {
                debug!(flags = current, "expiry notifications already enabled");
                return Ok(());
            };

            let mut conn = self.conn.clone();
            let flags_arg = flags.clone();
            let _: () = self
                .bounded("CONFIG SET", async move {
                    redis::cmd("CONFIG")
                        .arg("SET")
                        .arg("notify-keyspace-events")
                        .arg(flags_arg)
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            info!(flags, "enabled redis expiry notifications");
            Ok(())
        })
    }

    fn expiry_events(&self) -> BoxFuture<'_, Result<mpsc::Receiver<String>>> {
        Box::pin(async move {
            let client = self.client.clone();
            let mut pubsub = self
                .bounded("SUBSCRIBE", async move { client.get_async_pubsub().await })
                .await?;
            pubsub.psubscribe(EXPIRED_EVENTS_PATTERN).await?;
            debug!(pattern = EXPIRED_EVENTS_PATTERN, "subscribed to expiry events");

            let (tx, rx) = mpsc::channel(EXPIRY_CHANNEL_CAPACITY);
            tokio::spawn(async move {
                let mut messages = pubsub.into_on_message();
                while let Some(message) = messages.next().await {
                    let key: String = match message.get_payload() {
                        Ok(key) => key,
                        Err(e) => {
                            debug!(error = %e, "ignoring undecodable expiry payload");
                            continue;
                        }
                    };
                    if tx.send(key).await.is_err() {
                        return;
                    }
                }
                warn!("redis pub/sub connection closed");
            });
            Ok(rx)
        })
    }

    fn try_claim<'a>(
        &'a self,
        key: &'a str,
        token: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let reply: Option<String> = self
                .bounded("SET NX", async move {
                    redis::cmd("SET")
                        .arg(key)
                        .arg(token)
                        .arg("NX")
                        .arg("PX")
                        .arg(millis(ttl))
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            Ok(reply.is_some())
        })
    }

    fn release_claim<'a>(&'a self, key: &'a str, token: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let script = &self.release_script;
            let _: i64 = self
                .bounded("EVALSHA", async move {
                    script.key(key).arg(token).invoke_async(&mut conn).await
                })
                .await?;
            Ok(())
        })
    }
}
