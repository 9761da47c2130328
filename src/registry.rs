//! User registry
//!
//! The one piece of state shared by every connection: normalized username →
//! live [`Peer`]. All access goes through a single mutex. Join and leave
//! fan out their notices while still holding it, so no session can see the
//! membership change without also having the matching notice queued.
//! Ordinary broadcasts copy a snapshot under the lock and deliver after
//! releasing it.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::AppError;
use crate::message::Message;
use crate::peer::{Outbound, Peer};
use crate::types::{SessionId, Username};

#[derive(Debug)]
struct Member {
    peer: Peer,
    /// Join sequence number; snapshots are ordered by it
    joined: u64,
}

#[derive(Debug, Default)]
struct Members {
    by_name: HashMap<Username, Member>,
    next_seq: u64,
}

impl Members {
    fn insert(&mut self, peer: Peer) -> bool {
        if self.by_name.contains_key(&peer.username) {
            return false;
        }
        let joined = self.next_seq;
        self.next_seq += 1;
        self.by_name
            .insert(peer.username.clone(), Member { peer, joined });
        true
    }

    /// Remove `peer` if the entry under its name is this very session
    fn remove(&mut self, peer: &Peer) -> bool {
        match self.by_name.get(&peer.username) {
            Some(member) if member.peer.id == peer.id => {
                self.by_name.remove(&peer.username);
                true
            }
            _ => false,
        }
    }

    fn ordered(&self) -> Vec<&Member> {
        let mut members: Vec<&Member> = self.by_name.values().collect();
        members.sort_by_key(|m| m.joined);
        members
    }

    fn notify_all(&self, msg: &Message) {
        for member in self.ordered() {
            if member.peer.send(msg.clone()).is_err() {
                debug!("{} already gone, notice dropped", member.peer.username);
            }
        }
    }

    fn notify_except(&self, msg: &Message, except: SessionId) {
        for member in self.ordered() {
            if member.peer.id == except {
                continue;
            }
            if member.peer.send(msg.clone()).is_err() {
                debug!("{} already gone, notice dropped", member.peer.username);
            }
        }
    }
}

/// Directory of active sessions keyed by normalized username
#[derive(Debug, Default)]
pub struct Registry {
    members: Mutex<Members>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `peer` unless its name is already taken
    pub async fn try_register(&self, peer: Peer) -> bool {
        self.members.lock().await.insert(peer)
    }

    /// Remove `peer`; a no-op when it is absent
    ///
    /// Only the exact session is removed, never a newer session that has
    /// since claimed the same name.
    pub async fn unregister(&self, peer: &Peer) -> bool {
        self.members.lock().await.remove(peer)
    }

    /// Point-in-time copy of the members, in join order
    pub async fn snapshot(&self) -> Vec<(Username, Peer)> {
        let members = self.members.lock().await;
        members
            .ordered()
            .into_iter()
            .map(|m| (m.peer.username.clone(), m.peer.clone()))
            .collect()
    }

    pub async fn find(&self, name: &Username) -> Option<Peer> {
        let members = self.members.lock().await;
        members.by_name.get(name).map(|m| m.peer.clone())
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.by_name.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Admit `peer` as an active member
    ///
    /// In one critical section: insert it, announce the newcomer to everyone
    /// already present, and queue its acceptance carrying the full member
    /// list (newcomer last).
    pub async fn join(&self, peer: Peer) -> Result<(), AppError> {
        let mut members = self.members.lock().await;

        if !members.insert(peer.clone()) {
            return Err(AppError::NameTaken(peer.username));
        }

        members.notify_except(
            &Message::UserJoined {
                username: peer.username.to_string(),
            },
            peer.id,
        );

        let roster: Vec<Username> = members
            .ordered()
            .into_iter()
            .map(|m| m.peer.username.clone())
            .collect();

        if peer
            .send(Message::accepted(&roster, &peer.username))
            .is_err()
        {
            debug!("{} left before acceptance was queued", peer.username);
        }

        info!("{} joined ({} active)", peer.username, members.by_name.len());
        Ok(())
    }

    /// Remove `peer` and announce the departure to the remaining members
    ///
    /// Returns false, and announces nothing, when `peer` was not a member.
    /// Repeated calls therefore produce exactly one notice.
    pub async fn leave(&self, peer: &Peer) -> bool {
        let mut members = self.members.lock().await;

        if !members.remove(peer) {
            return false;
        }

        members.notify_all(&Message::UserLeft {
            username: peer.username.to_string(),
        });

        info!("{} left ({} active)", peer.username, members.by_name.len());
        true
    }

    /// Deliver `msg` to every member; returns how many queues accepted it
    ///
    /// The lock is held only while taking the snapshot.
    pub async fn broadcast(&self, msg: Message) -> usize {
        let recipients = self.snapshot().await;

        let item = Outbound::Message(msg);
        recipients
            .iter()
            .filter(|(_, peer)| peer.send(item.clone()).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;

    fn name(raw: &str) -> Username {
        Username::normalize(raw, 16).unwrap()
    }

    fn peer(raw: &str) -> (Peer, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Peer::new(SessionId::new(), name(raw), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(item) = rx.try_recv() {
            lines.push(item.into_line());
        }
        lines
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = Registry::new();
        let (first, _rx1) = peer("alice");
        let (second, _rx2) = peer("ALICE");

        assert!(registry.try_register(first.clone()).await);
        assert!(!registry.try_register(second).await);
        assert_eq!(registry.find(&name("alice")).await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_concurrent_distinct_names_all_register() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();
        let mut receivers = Vec::new();

        for i in 0..32 {
            let (p, rx) = peer(&format!("user{i}"));
            receivers.push(rx);
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move { registry.try_register(p).await }));
        }

        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(registry.len().await, 32);
    }

    #[tokio::test]
    async fn test_concurrent_same_name_single_winner() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();
        let mut receivers = Vec::new();

        for _ in 0..16 {
            let (p, rx) = peer("alice");
            receivers.push(rx);
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move { registry.join(p).await.is_ok() }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = Registry::new();
        let (alice, _rx) = peer("alice");

        registry.try_register(alice.clone()).await;
        assert!(registry.unregister(&alice).await);
        assert!(!registry.unregister(&alice).await);
        assert!(registry.find(&name("alice")).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_ignores_other_session_with_same_name() {
        let registry = Registry::new();
        let (stale, _rx1) = peer("alice");
        let (current, _rx2) = peer("alice");

        registry.try_register(current.clone()).await;
        assert!(!registry.unregister(&stale).await);
        assert_eq!(registry.find(&name("alice")).await.unwrap().id, current.id);
    }

    #[tokio::test]
    async fn test_snapshot_in_join_order() {
        let registry = Registry::new();
        let mut receivers = Vec::new();
        for raw in ["carol", "alice", "bob"] {
            let (p, rx) = peer(raw);
            receivers.push(rx);
            registry.try_register(p).await;
        }

        let names: Vec<String> = registry
            .snapshot()
            .await
            .into_iter()
            .map(|(n, _)| n.to_string())
            .collect();
        assert_eq!(names, vec!["carol", "alice", "bob"]);
    }

    #[tokio::test]
    async fn test_join_announces_to_others_and_accepts_newcomer() {
        let registry = Registry::new();
        let (alice, mut alice_rx) = peer("alice");
        let (bob, mut bob_rx) = peer("bob");

        registry.join(alice).await.unwrap();
        assert_eq!(
            drain(&mut alice_rx),
            vec!["1 alice Welcome to the chatroom, alice"]
        );

        registry.join(bob).await.unwrap();
        assert_eq!(drain(&mut alice_rx), vec!["10 bob"]);
        assert_eq!(
            drain(&mut bob_rx),
            vec!["1 alice,bob Welcome to the chatroom, bob"]
        );
    }

    #[tokio::test]
    async fn test_join_taken_name_leaves_registry_untouched() {
        let registry = Registry::new();
        let (alice, mut alice_rx) = peer("alice");
        let (imposter, mut imposter_rx) = peer("alice");

        registry.join(alice.clone()).await.unwrap();
        drain(&mut alice_rx);

        let err = registry.join(imposter).await.unwrap_err();
        assert!(matches!(err, AppError::NameTaken(n) if n == name("alice")));
        assert!(drain(&mut alice_rx).is_empty());
        assert!(drain(&mut imposter_rx).is_empty());
        assert_eq!(registry.find(&name("alice")).await.unwrap().id, alice.id);
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_once() {
        let registry = Registry::new();
        let (alice, mut alice_rx) = peer("alice");
        let (bob, mut bob_rx) = peer("bob");
        registry.join(alice.clone()).await.unwrap();
        registry.join(bob).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        assert!(registry.leave(&alice).await);
        assert!(!registry.leave(&alice).await);

        assert_eq!(drain(&mut bob_rx), vec!["9 alice"]);
        assert!(drain(&mut alice_rx).is_empty());
        assert!(registry.find(&name("alice")).await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member() {
        let registry = Registry::new();
        let mut receivers = Vec::new();
        for raw in ["s", "t", "u"] {
            let (p, rx) = peer(raw);
            registry.try_register(p).await;
            receivers.push(rx);
        }

        let delivered = registry
            .broadcast(Message::chat(&name("s"), "hello".to_string()))
            .await;
        assert_eq!(delivered, 3);

        for rx in receivers.iter_mut() {
            let lines = drain(rx);
            assert_eq!(lines.len(), 1);
            assert!(lines[0].starts_with("5 s "));
            assert!(lines[0].ends_with(" hello"));
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_closed_queue() {
        let registry = Registry::new();
        let (alice, alice_rx) = peer("alice");
        let (bob, mut bob_rx) = peer("bob");
        registry.try_register(alice).await;
        registry.try_register(bob).await;
        drop(alice_rx);

        let delivered = registry.broadcast(Message::Goodbye).await;
        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut bob_rx), vec!["8 "]);
    }
}
