use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use angler_core::world::{
    Block, BlockPos, BlockQuery, ContainerHandle, EquipSlot, Inventory, ItemStack, Player, Vec3,
};
use angler_core::{BehaviorError, Goal, Pathfinder, WorldClient, WorldEvent};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::protocol::{Incoming, Op, Reply, Request};

const EVENT_CAPACITY: usize = 512;

/// World client backed by an external bridge process that owns the actual
/// game connection and pathfinder.
///
/// Requests are matched to replies by id, so long-running calls (a cast
/// waiting for a bite) don't block short ones.
pub struct BridgeClient {
    username: String,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    events: broadcast::Sender<WorldEvent>,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("username", &self.username)
            .field("pending", &self.lock_pending().len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl BridgeClient {
    /// Open the bridge stream and start reading from it.
    pub async fn connect(addr: &str, username: &str) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to world bridge at {addr}"))?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let client = Arc::new(Self {
            username: username.to_string(),
            writer: tokio::sync::Mutex::new(write),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            events,
        });

        tokio::spawn(client.clone().read_loop(read));
        info!(addr = %addr, username = %username, "world bridge connected");
        Ok(client)
    }

    /// Ask the bridge to join the world as this client's user.
    pub async fn join(&self, host: &str, port: u16, viewer_port: Option<u16>) -> Result<()> {
        self.call(Op::Connect {
            host,
            port,
            username: &self.username,
            viewer_port,
        })
        .await
        .map(drop)
    }

    async fn read_loop(self: Arc<Self>, read: OwnedReadHalf) {
        let mut lines = BufReader::new(read).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.dispatch_line(&line),
                Ok(None) => {
                    info!("world bridge closed the connection");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "world bridge read failed");
                    break;
                }
            }
        }

        // Dropping the senders fails every outstanding call.
        self.closed.store(true, Ordering::SeqCst);
        self.lock_pending().clear();
        let _ = self.events.send(WorldEvent::Kicked {
            reason: "connection closed".to_string(),
        });
    }

    fn dispatch_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<Incoming>(line) {
            Ok(Incoming::Reply(reply)) => match self.lock_pending().remove(&reply.id) {
                // The caller may have been cancelled meanwhile.
                Some(tx) => {
                    let _ = tx.send(reply);
                }
                None => debug!(id = reply.id, "reply for unknown request"),
            },
            Ok(Incoming::Event(event)) => {
                trace!(?event, "world event");
                // No receivers just means nobody is listening yet.
                let _ = self.events.send(event);
            }
            Err(e) => warn!(error = %e, line, "unparseable bridge message"),
        }
    }

    async fn call(&self, op: Op<'_>) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&Request { id, op })?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.lock_pending().remove(&id);
            return Err(disconnected("world bridge connection is closed"));
        }

        let written = {
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await
        };
        if let Err(e) = written {
            self.lock_pending().remove(&id);
            return Err(e).context("writing to world bridge");
        }

        let reply = rx
            .await
            .map_err(|_| disconnected("world bridge closed before replying"))?;
        if !reply.ok {
            bail!(reply
                .error
                .unwrap_or_else(|| "request failed".to_string()));
        }
        Ok(reply.value)
    }

    async fn call_as<T: DeserializeOwned>(&self, op: Op<'_>) -> Result<T> {
        let value = self.call(op).await?;
        serde_json::from_value(value).context("unexpected reply from world bridge")
    }

    async fn call_unit(&self, op: Op<'_>) -> Result<()> {
        self.call(op).await.map(drop)
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn disconnected(reason: &str) -> anyhow::Error {
    BehaviorError::Disconnected(reason.to_string()).into()
}

#[async_trait]
impl WorldClient for BridgeClient {
    fn username(&self) -> &str {
        &self.username
    }

    fn subscribe(&self) -> broadcast::Receiver<WorldEvent> {
        self.events.subscribe()
    }

    async fn chat(&self, text: &str) -> Result<()> {
        self.call_unit(Op::Chat { text }).await
    }

    async fn find_blocks(&self, query: &BlockQuery) -> Result<Vec<Block>> {
        self.call_as(Op::FindBlocks {
            kinds: &query.kinds,
            max_distance: query.max_distance,
            count: query.count,
        })
        .await
    }

    async fn block_at(&self, pos: BlockPos) -> Result<Option<Block>> {
        self.call_as(Op::BlockAt { pos }).await
    }

    async fn position(&self) -> Result<Vec3> {
        self.call_as(Op::Position).await
    }

    async fn player(&self, username: &str) -> Result<Option<Player>> {
        self.call_as(Op::Player { username }).await
    }

    async fn is_day(&self) -> Result<bool> {
        self.call_as(Op::IsDay).await
    }

    async fn is_sleeping(&self) -> Result<bool> {
        self.call_as(Op::IsSleeping).await
    }

    async fn look_at(&self, target: Vec3) -> Result<()> {
        self.call_unit(Op::LookAt { target }).await
    }

    async fn equip(&self, item: &str, slot: EquipSlot) -> Result<()> {
        self.call_unit(Op::Equip {
            item,
            destination: slot,
        })
        .await
    }

    async fn cast(&self) -> Result<()> {
        self.call_unit(Op::Cast).await
    }

    async fn activate_item(&self) -> Result<()> {
        self.call_unit(Op::ActivateItem).await
    }

    async fn sleep(&self, bed: BlockPos) -> Result<()> {
        self.call_unit(Op::Sleep { bed }).await
    }

    async fn wake(&self) -> Result<()> {
        self.call_unit(Op::Wake).await
    }

    async fn inventory(&self) -> Result<Inventory> {
        self.call_as(Op::Inventory).await
    }

    async fn open_container(&self, pos: BlockPos) -> Result<ContainerHandle> {
        self.call_as(Op::OpenContainer { pos }).await
    }

    async fn deposit(&self, container: ContainerHandle, item: &ItemStack) -> Result<()> {
        self.call_unit(Op::Deposit { container, item }).await
    }

    async fn close_container(&self, container: ContainerHandle) -> Result<()> {
        self.call_unit(Op::CloseContainer { container }).await
    }

    async fn draw_path(&self, points: &[Vec3]) -> Result<()> {
        self.call_unit(Op::DrawPath { points }).await
    }
}

#[async_trait]
impl Pathfinder for BridgeClient {
    async fn set_goal(&self, goal: &Goal) -> Result<()> {
        self.call_unit(Op::SetGoal { goal }).await
    }

    async fn cancel_goal(&self) -> Result<()> {
        self.call_unit(Op::CancelGoal).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn next_request(
        lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>,
    ) -> serde_json::Value {
        let line = lines.next_line().await.unwrap().expect("request line");
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_replies_errors_and_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();

            let req = next_request(&mut lines).await;
            assert_eq!(req["op"], "is_day");
            write.write_all(b"{\"event\":\"wake\"}\n").await.unwrap();
            let reply = format!("{{\"id\":{},\"ok\":true,\"value\":false}}\n", req["id"]);
            write.write_all(reply.as_bytes()).await.unwrap();

            let req = next_request(&mut lines).await;
            assert_eq!(req["op"], "equip");
            assert_eq!(req["item"], "fishing_rod");
            assert_eq!(req["destination"], "hand");
            let reply = format!(
                "{{\"id\":{},\"ok\":false,\"error\":\"I don't have a fishing rod!\"}}\n",
                req["id"]
            );
            write.write_all(reply.as_bytes()).await.unwrap();
        });

        let client = BridgeClient::connect(&addr, "Fisher").await.unwrap();
        let mut events = client.subscribe();

        assert!(!client.is_day().await.unwrap());
        assert_eq!(events.recv().await.unwrap(), WorldEvent::Wake);

        let err = client.equip("fishing_rod", EquipSlot::Hand).await.unwrap_err();
        assert_eq!(err.to_string(), "I don't have a fishing rod!");

        server.await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            WorldEvent::Kicked {
                reason: "connection closed".to_string()
            }
        );
        let err = client.chat("anyone?").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BehaviorError>(),
            Some(BehaviorError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_order_replies() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();

            let first = next_request(&mut lines).await;
            let second = next_request(&mut lines).await;
            let (cast, position) = if first["op"] == "cast" {
                (first, second)
            } else {
                (second, first)
            };
            assert_eq!(cast["op"], "cast");
            assert_eq!(position["op"], "position");

            let reply = format!(
                "{{\"id\":{},\"ok\":true,\"value\":{{\"x\":1.5,\"y\":64.0,\"z\":-3.5}}}}\n",
                position["id"]
            );
            write.write_all(reply.as_bytes()).await.unwrap();
            let reply = format!("{{\"id\":{},\"ok\":true}}\n", cast["id"]);
            write.write_all(reply.as_bytes()).await.unwrap();
        });

        let client = BridgeClient::connect(&addr, "Fisher").await.unwrap();
        let cast = tokio::spawn({
            let client = client.clone();
            async move { client.cast().await }
        });
        tokio::task::yield_now().await;

        let here = client.position().await.unwrap();
        assert_eq!(here, Vec3::new(1.5, 64.0, -3.5));
        cast.await.unwrap().unwrap();
        server.await.unwrap();
    }
}
