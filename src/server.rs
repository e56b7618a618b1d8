//! The protocol loop: dispatches inbound handshakes and messages,
//! drives bootstrap convergence, and broadcasts signed commands.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config;
use crate::crypto::{aead, signing};
use crate::error::{OverlayError, Result};
use crate::event::EventChain;
use crate::framing;
use crate::id::{self, NodeId};
use crate::message::{CmdRequest, Msg, Tuple, TYPE_BLACKLIST, TYPE_COMMAND, TYPE_FIND_NODE, TYPE_FOUND, TYPE_PING, TYPE_PONG};
use crate::peer::Peer;
use crate::routing_table::RoutingTable;
use crate::session::{self, HandshakeOutcome};

pub struct Server {
    socket: UdpSocket,
    pub addr: SocketAddr,
    pub id: NodeId,
    table: Mutex<RoutingTable>,
    events: Mutex<EventChain>,
    difficulty: Mutex<u32>,
    a: usize,
}

impl Server {
    pub fn new(socket: UdpSocket, addr: SocketAddr, k: usize, difficulty: u32, a: usize) -> Self {
        let id = NodeId::from_ip(&addr.ip().to_string());
        Server {
            socket,
            addr,
            id,
            table: Mutex::new(RoutingTable::new(k)),
            events: Mutex::new(EventChain::new(config::DEFAULT_DIFFICULTY)),
            difficulty: Mutex::new(difficulty),
            a,
        }
    }

    pub async fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn known_peer_count(&self) -> usize {
        self.table.lock().await.list_peers().len()
    }

    pub async fn knows(&self, id: &NodeId) -> bool {
        self.table.lock().await.find_peer(id).is_some()
    }

    pub async fn chain_len(&self) -> usize {
        self.events.lock().await.len()
    }

    async fn current_difficulty(&self) -> u32 {
        *self.difficulty.lock().await
    }

    pub async fn difficulty(&self) -> u32 {
        self.current_difficulty().await
    }

    fn self_tuple(&self, difficulty: u32) -> Tuple {
        Tuple {
            addr: self.addr.to_string(),
            difficulty,
        }
    }

    /// Drives the listener forever: each iteration waits for and
    /// processes one inbound handshake-then-message exchange. Errors are
    /// logged and the loop continues; only bind failure (before this is
    /// called) is fatal.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(addr = %self.addr, id = %self.id, "listening");
        loop {
            if let Err(e) = self.handle_one_exchange().await {
                warn!(error = %e, "error handling inbound exchange");
            }
        }
    }

    async fn handle_one_exchange(&self) -> Result<()> {
        let (frame, from) = framing::recv_framed(&self.socket).await?;

        let offer = match framing::decode_handshake(&frame) {
            Ok(offer) => offer,
            Err(e) => {
                debug!(%from, error = %e, "dropping non-handshake frame");
                return Ok(());
            }
        };

        let local_difficulty = self.current_difficulty().await;
        match session::accept_inbound(&offer, &self.id, local_difficulty) {
            HandshakeOutcome::Rejected => {
                session::warn_rejected(from);
                Ok(())
            }
            HandshakeOutcome::Accepted { session_key, reply } => {
                session::send_reply(&self.socket, from, &reply).await?;

                let (payload_frame, payload_from) = framing::recv_framed(&self.socket).await?;
                if payload_from != from {
                    return Err(OverlayError::Framing(
                        "payload arrived from unexpected address".into(),
                    ));
                }

                let plaintext = aead::decrypt(&String::from_utf8_lossy(&payload_frame), &session_key)?;
                let msg = Msg::from_json(&plaintext)?;

                if let Some(reply_msg) = self.dispatch(msg, from).await? {
                    let reply_plain = reply_msg.to_json()?;
                    let reply_cipher = aead::encrypt(&reply_plain, &session_key)?;
                    framing::send_framed(&self.socket, from, reply_cipher.as_bytes()).await?;
                }
                Ok(())
            }
        }
    }

    async fn dispatch(&self, msg: Msg, from: SocketAddr) -> Result<Option<Msg>> {
        match msg.msg_type.as_str() {
            TYPE_FIND_NODE => {
                let target = NodeId::from_hex(&String::from_utf8_lossy(&msg.data))
                    .ok_or_else(|| OverlayError::Framing("bad target id".into()))?;
                self.note_peer_joined(from).await;
                let tuples = {
                    let difficulty = self.current_difficulty().await;
                    let table = self.table.lock().await;
                    match table.find_closest_bucket(&target) {
                        Some(bucket) => {
                            let mut tuples = bucket.as_tuples();
                            tuples.push(self.self_tuple(difficulty));
                            tuples
                        }
                        None => vec![self.self_tuple(difficulty)],
                    }
                };
                let data = serde_json::to_vec(&tuples).map_err(|e| OverlayError::Framing(e.to_string()))?;
                Ok(Some(Msg::new(TYPE_FOUND, data)))
            }
            TYPE_PING => {
                self.note_peer_joined(from).await;
                Ok(Some(Msg::empty(TYPE_PONG)))
            }
            TYPE_COMMAND => {
                match CmdRequest::from_json(&msg.data) {
                    Ok(req) => {
                        let fresh = {
                            let events = self.events.lock().await;
                            events.is_fresh(&req.signature)
                        };
                        if fresh && signing::verify_command(req.cmd.as_bytes(), &req.signature).is_ok() {
                            let peer_id = NodeId::from_ip(&from.ip().to_string());
                            println!("\n{peer_id} {}", req.cmd);
                            self.submit_command(req.cmd, req.signature).await;
                        } else {
                            println!("The message is not authentic.");
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed command payload"),
                }
                Ok(None)
            }
            TYPE_BLACKLIST => {
                let mut difficulty = self.difficulty.lock().await;
                *difficulty = config::BLACKLIST_DIFFICULTY;
                warn!(new_difficulty = config::BLACKLIST_DIFFICULTY, "blacklist activated");
                Ok(None)
            }
            other => {
                debug!(msg_type = other, "ignoring unrecognized message type");
                Ok(None)
            }
        }
    }

    async fn note_peer_joined(&self, from: SocketAddr) {
        let difficulty = self.current_difficulty().await;
        let peer = Peer::from_addr(from, difficulty);
        let mut table = self.table.lock().await;
        if table.find_peer(&peer.id).is_none() {
            println!("\n{} joined!\n>> ", peer.id);
            let _ = table.add_peer(peer);
        }
    }

    /// Append a command to the local event chain and fan it out to `a`
    /// random peers. Used both for locally-originated commands (signed
    /// by the operator at the stdin prompt) and for authentic commands
    /// relayed in from the network.
    pub async fn submit_command(&self, cmd: String, signature: Vec<u8>) {
        {
            let mut events = self.events.lock().await;
            events.append(cmd.clone(), signature.clone());
        }
        self.broadcast_command(cmd, signature).await;
    }

    /// Send a signed command directly to one peer, bypassing the random
    /// sampling `broadcast_command` does.
    pub async fn relay_command(
        &self,
        addr: SocketAddr,
        difficulty: u32,
        cmd: String,
        signature: Vec<u8>,
    ) -> Result<()> {
        let req = CmdRequest { cmd, signature };
        let msg = Msg::new(TYPE_COMMAND, req.to_json()?);
        self.send_only(addr, difficulty, &msg).await
    }

    /// Notify a peer that it should raise its handshake difficulty,
    /// e.g. after it is observed misbehaving.
    pub async fn notify_blacklist(&self, addr: SocketAddr, difficulty: u32) -> Result<()> {
        self.send_only(addr, difficulty, &Msg::empty(TYPE_BLACKLIST)).await
    }

    /// Sample `a` distinct peers uniformly from the whole table and send
    /// each of them the signed command, fire-and-forget.
    async fn broadcast_command(&self, cmd: String, signature: Vec<u8>) {
        let peers = {
            let table = self.table.lock().await;
            table.sample_peers(self.a)
        };
        for peer in peers {
            let req = CmdRequest {
                cmd: cmd.clone(),
                signature: signature.clone(),
            };
            let data = match req.to_json() {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "failed to encode command for broadcast");
                    continue;
                }
            };
            let msg = Msg::new(TYPE_COMMAND, data);
            if let Err(e) = self.send_only(peer.addr, peer.difficulty, &msg).await {
                warn!(addr = %peer.addr, error = %e, "broadcast to peer failed");
            }
        }
    }

    /// Iterative bootstrap: seed the table with the boot peer, then
    /// repeatedly query the `a` closest known peers for nodes nearer to
    /// our own id, ping-verifying and merging anything new, until a
    /// round discovers nothing closer.
    pub async fn bootstrap(&self, boot_addr: SocketAddr) -> Result<()> {
        let boot_peer = Peer::from_addr(boot_addr, config::DEFAULT_DIFFICULTY);
        {
            let mut table = self.table.lock().await;
            table.add_peer(boot_peer.clone())?;
        }
        info!(%boot_addr, "bootstrap start");

        let initial = self
            .query_find_node(boot_addr, boot_peer.difficulty, &self.id)
            .await?;
        self.merge_discovered(&initial).await;

        let mut nearest = boot_peer.id;
        loop {
            let candidates = {
                let table = self.table.lock().await;
                table.find_a_closest(&self.id, self.a)
            };
            if candidates.is_empty() {
                break;
            }

            let mut progressed = false;
            for peer in &candidates {
                let Ok(tuples) = self
                    .query_find_node(peer.addr, peer.difficulty, &self.id)
                    .await
                else {
                    continue;
                };
                let newly_added = self.merge_discovered(&tuples).await;
                for added in &newly_added {
                    if id::distance(&added.id, &self.id) < id::distance(&nearest, &self.id) {
                        nearest = added.id;
                        progressed = true;
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        info!("bootstrap converged");
        Ok(())
    }

    async fn query_find_node(&self, addr: SocketAddr, difficulty: u32, target: &NodeId) -> Result<Vec<Tuple>> {
        let msg = Msg::new(TYPE_FIND_NODE, target.to_hex().into_bytes());
        let reply = self.send_recv(addr, difficulty, &msg).await?;
        if reply.msg_type != TYPE_FOUND {
            return Err(OverlayError::Handshake("unexpected reply to find node".into()));
        }
        serde_json::from_slice(&reply.data).map_err(|e| OverlayError::Framing(e.to_string()))
    }

    pub async fn ping(&self, addr: SocketAddr, difficulty: u32) -> Result<bool> {
        let reply = self.send_recv(addr, difficulty, &Msg::empty(TYPE_PING)).await?;
        Ok(reply.msg_type == TYPE_PONG)
    }

    /// Ping-verify each advertised tuple and add the reachable, not yet
    /// known ones to the table, returning what was actually added.
    async fn merge_discovered(&self, tuples: &[Tuple]) -> Vec<Peer> {
        let mut added = Vec::new();
        for tuple in tuples {
            let Ok(addr) = tuple.addr.parse::<SocketAddr>() else {
                continue;
            };
            if addr == self.addr {
                continue;
            }
            let candidate_id = NodeId::from_ip(&addr.ip().to_string());
            let already_known = {
                let table = self.table.lock().await;
                table.find_peer(&candidate_id).is_some()
            };
            if already_known {
                continue;
            }
            if self.ping(addr, tuple.difficulty).await.unwrap_or(false) {
                let peer = Peer::from_addr(addr, tuple.difficulty);
                let mut table = self.table.lock().await;
                if table.add_peer(peer.clone()).is_ok() {
                    added.push(peer);
                }
            }
        }
        added
    }

    /// Open a fresh outbound socket, perform the handshake, and send an
    /// encrypted message, waiting for one encrypted reply.
    async fn send_recv(&self, addr: SocketAddr, difficulty: u32, msg: &Msg) -> Result<Msg> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let session_key = session::establish_outbound(&socket, addr, difficulty).await?;

        let plaintext = msg.to_json()?;
        let ciphertext = aead::encrypt(&plaintext, &session_key)?;
        framing::send_framed(&socket, addr, ciphertext.as_bytes()).await?;

        let (reply_frame, _from) = framing::recv_framed(&socket).await?;
        let reply_plain = aead::decrypt(&String::from_utf8_lossy(&reply_frame), &session_key)?;
        Msg::from_json(&reply_plain)
    }

    /// Open a fresh outbound socket, perform the handshake, and send an
    /// encrypted message without waiting for a reply.
    async fn send_only(&self, addr: SocketAddr, difficulty: u32, msg: &Msg) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let session_key = session::establish_outbound(&socket, addr, difficulty).await?;

        let plaintext = msg.to_json()?;
        let ciphertext = aead::encrypt(&plaintext, &session_key)?;
        framing::send_framed(&socket, addr, ciphertext.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_server(ip: &str) -> Arc<Server> {
        let socket = UdpSocket::bind(format!("{ip}:0")).await.unwrap();
        let addr = socket.local_addr().unwrap();
        Arc::new(Server::new(socket, addr, config::DEFAULT_K, 1, config::ALPHA))
    }

    #[tokio::test]
    async fn self_tuple_reports_own_address() {
        let server = test_server("127.0.0.2").await;
        let tuple = server.self_tuple(1);
        assert_eq!(tuple.addr, server.addr.to_string());
    }

    #[tokio::test]
    async fn note_peer_joined_adds_unknown_peers_once() {
        let server = test_server("127.0.0.3").await;
        let from: SocketAddr = "127.0.0.4:4444".parse().unwrap();
        server.note_peer_joined(from).await;
        server.note_peer_joined(from).await;
        let table = server.table.lock().await;
        assert_eq!(table.list_peers().len(), 1);
    }

    #[tokio::test]
    async fn submit_command_appends_to_local_chain() {
        let server = test_server("127.0.0.5").await;
        server.submit_command("hello".into(), vec![1, 2, 3]).await;
        let events = server.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events.last().unwrap().data, "hello");
    }
}
