use std::time::Duration;

use comms::msg::{Command, Msg, OpHeader, OpKind, ReduceOp};
use futures::future;
use log::{debug, info, warn};
use tokio::{
    io,
    net::{TcpListener, TcpStream},
    time::{self, Instant},
};

use crate::{Collective, GroupConfig, GroupErr, Result, link::Link};

/// Capacity of each in-memory link of a `local_world`.
const LOCAL_LINK_CAPACITY: usize = 1 << 16;

/// Pause between connection attempts while the master isn't listening yet.
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// The rank every collective is routed through.
const HUB_RANK: usize = 0;

enum Role {
    /// Rank 0, holds one link per peer ordered by rank (`peers[i]` is rank `i + 1`).
    Hub { peers: Vec<Link> },
    /// Any other rank, only talks to the hub.
    Peer { hub: Link },
}

/// A static group of ranks that cooperate through blocking collective operations.
///
/// Collectives are routed through rank 0 (star topology). Every operation is announced with
/// an `OpHeader` carrying a sequence number, the hub only proceeds when every rank announced
/// the exact same header, a divergence aborts the whole group.
pub struct ProcessGroup {
    rank: usize,
    local_rank: usize,
    world_size: usize,
    seq: u64,
    role: Role,
    buf: Vec<f32>,
    acc: Vec<f32>,
}

impl ProcessGroup {
    fn new(rank: usize, local_rank: usize, world_size: usize, role: Role) -> Self {
        Self {
            rank,
            local_rank,
            world_size,
            seq: 0,
            role,
            buf: Vec::new(),
            acc: Vec::new(),
        }
    }

    /// Joins the group described by `cfg`.
    ///
    /// Rank 0 listens on the master endpoint and waits for every other rank, the rest connect
    /// to it. Connection refusals are retried until `cfg.init_timeout`, any other failure is
    /// returned as is.
    ///
    /// # Arguments
    /// * `cfg` - This process's place in the group.
    ///
    /// # Returns
    /// The joined group or the reason joining failed.
    pub async fn init(cfg: GroupConfig) -> Result<Self> {
        cfg.validate()?;

        let GroupConfig {
            rank,
            local_rank,
            world_size,
            init_timeout,
            ..
        } = cfg;

        if world_size == 1 {
            info!(rank = rank; "single rank group, collectives are local");
            return Ok(Self::new(rank, local_rank, 1, Role::Hub { peers: vec![] }));
        }

        let endpoint = cfg.master_endpoint();

        let role = if rank == HUB_RANK {
            let list = TcpListener::bind(&endpoint).await?;
            info!(world_size = world_size; "listening for peers at {endpoint}");

            let peers = time::timeout(init_timeout, accept_all(&list, world_size))
                .await
                .map_err(|_| GroupErr::Timeout {
                    what: "waiting for peers to join",
                    after: init_timeout,
                })??;

            Role::Hub { peers }
        } else {
            let stream = connect(&endpoint, init_timeout).await?;
            stream.set_nodelay(true)?;

            let hub = time::timeout(init_timeout, join_hub(rank, world_size, Link::tcp(stream)))
                .await
                .map_err(|_| GroupErr::Timeout {
                    what: "waiting for the master to welcome this rank",
                    after: init_timeout,
                })??;

            Role::Peer { hub }
        };

        info!(rank = rank, world_size = world_size; "joined process group");
        Ok(Self::new(rank, local_rank, world_size, role))
    }

    /// Builds a whole group inside this process, linked through in-memory pipes.
    ///
    /// The ranks run the same handshake and protocol as a networked group, which makes this
    /// the way to simulate multi-rank runs on a single host.
    ///
    /// # Arguments
    /// * `world_size` - The amount of ranks.
    ///
    /// # Returns
    /// One `ProcessGroup` per rank, indexed by rank.
    pub async fn local_world(world_size: usize) -> Result<Vec<Self>> {
        if world_size == 0 {
            return Err(GroupErr::InvalidConfig("world size must be positive".into()));
        }

        let mut hub_links = Vec::with_capacity(world_size - 1);
        let mut peer_links = Vec::with_capacity(world_size - 1);

        for _ in 1..world_size {
            let (near, far) = io::duplex(LOCAL_LINK_CAPACITY);
            let (rx, tx) = io::split(near);
            hub_links.push(Link::new(rx, tx));
            let (rx, tx) = io::split(far);
            peer_links.push(Link::new(rx, tx));
        }

        let peers = peer_links
            .into_iter()
            .enumerate()
            .map(|(i, link)| join_hub(i + 1, world_size, link));

        let (hub, peers) =
            future::try_join(accept_peers(world_size, hub_links), future::try_join_all(peers))
                .await?;

        let mut group = Vec::with_capacity(world_size);
        group.push(Self::new(HUB_RANK, HUB_RANK, world_size, Role::Hub { peers: hub }));
        group.extend(
            peers
                .into_iter()
                .enumerate()
                .map(|(i, hub)| Self::new(i + 1, i + 1, world_size, Role::Peer { hub })),
        );

        Ok(group)
    }

    /// Whether this is the global master rank.
    pub fn is_master(&self) -> bool {
        self.rank == HUB_RANK
    }

    /// Whether this is the first rank of its host.
    pub fn is_local_master(&self) -> bool {
        self.local_rank == 0
    }

    /// Leaves the group, waiting for every peer to leave as well.
    pub async fn shutdown(mut self) -> Result<()> {
        match &mut self.role {
            Role::Hub { peers } => {
                for (i, link) in peers.iter_mut().enumerate() {
                    match link.rx.recv_into(&mut self.buf).await {
                        Ok(Msg::Control(Command::Disconnect)) => {}
                        Ok(msg) => {
                            return Err(GroupErr::UnexpectedMessage {
                                rank: i + 1,
                                got: msg.kind(),
                            });
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            Role::Peer { hub } => {
                hub.tx.send(&Msg::Control(Command::Disconnect)).await?;
                hub.tx.shutdown().await?;
            }
        }

        debug!(rank = self.rank; "left process group");
        Ok(())
    }

    fn next_header(&mut self, kind: OpKind) -> OpHeader {
        let header = OpHeader {
            seq: self.seq,
            kind,
        };

        self.seq += 1;
        header
    }

    async fn run(&mut self, header: OpHeader, data: &mut [f32]) -> Result<()> {
        debug!(rank = self.rank, seq = header.seq; "entering {}", header.kind);

        if self.world_size == 1 {
            return Ok(());
        }

        match &mut self.role {
            Role::Hub { peers } => {
                let gathered = gather(
                    peers,
                    &header,
                    data,
                    &mut self.buf,
                    &mut self.acc,
                    self.world_size,
                )
                .await;

                match gathered {
                    Ok(()) => release(peers, &header, data).await,
                    Err(e) => {
                        abort(peers, &e).await;
                        Err(e)
                    }
                }
            }
            Role::Peer { hub } => {
                let sends_data = match header.kind {
                    OpKind::AllReduce { .. } => true,
                    OpKind::Broadcast { src, .. } => src == self.rank,
                    OpKind::Rendezvous { .. } => false,
                };

                hub.tx.send(&Msg::Control(Command::Op(header.clone()))).await?;
                if sends_data {
                    hub.tx.send(&Msg::Data(data)).await?;
                }

                expect_header(hub, &header, &mut self.buf, HUB_RANK).await?;

                if carries_data(&header.kind) {
                    let values = recv_data(hub, &mut self.buf, HUB_RANK, data.len()).await?;
                    data.copy_from_slice(values);
                }

                Ok(())
            }
        }
    }
}

impl Collective for ProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn local_rank(&self) -> usize {
        self.local_rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn all_reduce(&mut self, data: &mut [f32], op: ReduceOp) -> Result<()> {
        let header = self.next_header(OpKind::AllReduce {
            op,
            len: data.len(),
        });

        self.run(header, data).await
    }

    async fn broadcast(&mut self, data: &mut [f32], src: usize) -> Result<()> {
        if src >= self.world_size {
            return Err(GroupErr::InvalidConfig(format!(
                "broadcast source {src} is out of range for a world of size {}",
                self.world_size
            )));
        }

        let header = self.next_header(OpKind::Broadcast {
            src,
            len: data.len(),
        });

        self.run(header, data).await
    }

    async fn rendezvous(&mut self, tag: &str) -> Result<()> {
        let header = self.next_header(OpKind::Rendezvous {
            tag: tag.to_string(),
        });

        self.run(header, &mut []).await
    }
}

fn carries_data(kind: &OpKind) -> bool {
    matches!(kind, OpKind::AllReduce { .. } | OpKind::Broadcast { .. })
}

/// Collects every peer's side of the collective into `data`.
async fn gather(
    peers: &mut [Link],
    header: &OpHeader,
    data: &mut [f32],
    buf: &mut Vec<f32>,
    acc: &mut Vec<f32>,
    world_size: usize,
) -> Result<()> {
    acc.clear();
    if let OpKind::AllReduce { .. } = header.kind {
        acc.extend_from_slice(data);
    }

    for (i, link) in peers.iter_mut().enumerate() {
        let rank = i + 1;
        expect_header(link, header, buf, rank).await?;

        match header.kind {
            OpKind::AllReduce { op, .. } => {
                let values = recv_data(link, buf, rank, data.len()).await?;
                op.fold(acc, values);
            }
            OpKind::Broadcast { src, .. } if src == rank => {
                let values = recv_data(link, buf, rank, data.len()).await?;
                data.copy_from_slice(values);
            }
            _ => {}
        }
    }

    if let OpKind::AllReduce { op, .. } = header.kind {
        op.finish(acc, world_size);
        data.copy_from_slice(&acc[..]);
    }

    Ok(())
}

/// Echoes the header to every peer, along with the result when the op carries one.
async fn release(peers: &mut [Link], header: &OpHeader, data: &[f32]) -> Result<()> {
    let echo = Msg::Control(Command::Op(header.clone()));
    let result = Msg::Data(data);

    for link in peers.iter_mut() {
        link.tx.send(&echo).await?;
        if carries_data(&header.kind) {
            link.tx.send(&result).await?;
        }
    }

    Ok(())
}

/// Tells every peer the group is broken, best effort.
async fn abort(peers: &mut [Link], err: &GroupErr) {
    warn!("aborting process group: {err}");

    let detail = err.to_string();
    let msg = Msg::Err(detail.as_str().into());

    for link in peers.iter_mut() {
        let _ = link.tx.send(&msg).await;
    }
}

async fn expect_header(
    link: &mut Link,
    expected: &OpHeader,
    buf: &mut Vec<f32>,
    rank: usize,
) -> Result<()> {
    match link.rx.recv_into(buf).await? {
        Msg::Control(Command::Op(got)) if got == *expected => Ok(()),
        Msg::Control(Command::Op(got)) => Err(GroupErr::Mismatch {
            rank,
            expected: expected.clone(),
            got,
        }),
        Msg::Err(detail) => Err(GroupErr::Remote {
            rank,
            detail: detail.into_owned(),
        }),
        msg => Err(GroupErr::UnexpectedMessage {
            rank,
            got: msg.kind(),
        }),
    }
}

async fn recv_data<'b>(
    link: &mut Link,
    buf: &'b mut Vec<f32>,
    rank: usize,
    expected: usize,
) -> Result<&'b [f32]> {
    match link.rx.recv_into(buf).await? {
        Msg::Data(values) if values.len() == expected => Ok(values),
        Msg::Data(values) => Err(GroupErr::LengthMismatch {
            rank,
            got: values.len(),
            expected,
        }),
        Msg::Err(detail) => Err(GroupErr::Remote {
            rank,
            detail: detail.into_owned(),
        }),
        msg => Err(GroupErr::UnexpectedMessage {
            rank,
            got: msg.kind(),
        }),
    }
}

/// Accepts `world_size - 1` connections and runs the hub side of the handshake on them.
async fn accept_all(list: &TcpListener, world_size: usize) -> Result<Vec<Link>> {
    let mut links = Vec::with_capacity(world_size - 1);
    for _ in 1..world_size {
        let (stream, addr) = list.accept().await?;
        stream.set_nodelay(true)?;
        debug!("peer connected from {addr}");
        links.push(Link::tcp(stream));
    }

    accept_peers(world_size, links).await
}

/// Hub side of the handshake: reads a `Join` from every link and orders them by rank.
async fn accept_peers(world_size: usize, links: Vec<Link>) -> Result<Vec<Link>> {
    let mut slots: Vec<Option<Link>> = (1..world_size).map(|_| None).collect();
    let mut buf: Vec<u32> = Vec::new();

    for mut link in links {
        let (rank, peer_world) = match link.rx.recv_into(&mut buf).await? {
            Msg::Control(Command::Join { rank, world_size }) => (rank, world_size),
            msg => {
                return Err(GroupErr::Join(format!(
                    "expected a join request, got {}",
                    msg.kind()
                )));
            }
        };

        if peer_world != world_size {
            return Err(GroupErr::Join(format!(
                "rank {rank} expects a world of size {peer_world}, the master expects {world_size}"
            )));
        }

        if rank == HUB_RANK || rank >= world_size {
            return Err(GroupErr::Join(format!(
                "a peer announced itself as rank {rank}, valid peer ranks are 1..{world_size}"
            )));
        }

        let slot = &mut slots[rank - 1];
        if slot.is_some() {
            return Err(GroupErr::Join(format!("rank {rank} joined twice")));
        }

        debug!(rank = rank; "peer joined");
        *slot = Some(link);
    }

    let mut peers = Vec::with_capacity(slots.len());
    for (i, slot) in slots.into_iter().enumerate() {
        let Some(link) = slot else {
            return Err(GroupErr::Join(format!("rank {} never joined", i + 1)));
        };

        peers.push(link);
    }

    let welcome = Msg::Control(Command::Welcome { world_size });
    for link in peers.iter_mut() {
        link.tx.send(&welcome).await?;
    }

    Ok(peers)
}

/// Peer side of the handshake.
async fn join_hub(rank: usize, world_size: usize, mut link: Link) -> Result<Link> {
    link.tx
        .send(&Msg::Control(Command::Join { rank, world_size }))
        .await?;

    let mut buf: Vec<u32> = Vec::new();
    match link.rx.recv_into(&mut buf).await? {
        Msg::Control(Command::Welcome { world_size: w }) if w == world_size => Ok(link),
        Msg::Control(Command::Welcome { world_size: w }) => Err(GroupErr::Join(format!(
            "the master welcomed rank {rank} into a world of size {w}, expected {world_size}"
        ))),
        Msg::Err(detail) => Err(GroupErr::Join(detail.into_owned())),
        msg => Err(GroupErr::Join(format!(
            "expected a welcome, got {}",
            msg.kind()
        ))),
    }
}

async fn connect(endpoint: &str, timeout: Duration) -> Result<TcpStream> {
    let deadline = Instant::now() + timeout;

    loop {
        match TcpStream::connect(endpoint).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                if Instant::now() >= deadline {
                    return Err(GroupErr::Timeout {
                        what: "connecting to the master rank",
                        after: timeout,
                    });
                }

                debug!("master at {endpoint} not listening yet, retrying");
                time::sleep(CONNECT_BACKOFF).await;
            }
            Err(e) => return Err(GroupErr::Join(format!("connecting to {endpoint}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPACITY: usize = 1024;

    /// Links a hub side to a peer side, the peer side announces itself with `join`.
    async fn joined_link(join: Command) -> (Link, Link) {
        let (near, far) = io::duplex(CAPACITY);
        let (rx, tx) = io::split(near);
        let hub = Link::new(rx, tx);
        let (rx, tx) = io::split(far);
        let mut peer = Link::new(rx, tx);

        peer.tx.send(&Msg::Control(join)).await.unwrap();
        (hub, peer)
    }

    async fn handshake(world_size: usize, joins: Vec<Command>) -> Result<Vec<Link>> {
        let mut hub_links = Vec::new();
        let mut peer_links = Vec::new();
        for join in joins {
            let (hub, peer) = joined_link(join).await;
            hub_links.push(hub);
            peer_links.push(peer);
        }

        let res = accept_peers(world_size, hub_links).await;
        drop(peer_links);
        res
    }

    #[tokio::test]
    async fn peers_are_ordered_by_rank() {
        let joins = vec![
            Command::Join { rank: 2, world_size: 3 },
            Command::Join { rank: 1, world_size: 3 },
        ];

        let peers = handshake(3, joins).await.unwrap();

        assert_eq!(peers.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_rank_is_fatal() {
        let joins = vec![
            Command::Join { rank: 1, world_size: 3 },
            Command::Join { rank: 1, world_size: 3 },
        ];

        let res = handshake(3, joins).await;

        assert!(matches!(res, Err(GroupErr::Join(_))));
    }

    #[tokio::test]
    async fn world_size_disagreement_is_fatal() {
        let joins = vec![Command::Join { rank: 1, world_size: 3 }];

        let res = handshake(2, joins).await;

        assert!(matches!(res, Err(GroupErr::Join(_))));
    }

    #[tokio::test]
    async fn out_of_range_ranks_are_fatal() {
        for rank in [0, 2] {
            let joins = vec![Command::Join { rank, world_size: 2 }];

            let res = handshake(2, joins).await;

            assert!(matches!(res, Err(GroupErr::Join(_))));
        }
    }

    #[tokio::test]
    async fn anything_but_a_join_is_fatal() {
        let res = handshake(2, vec![Command::Disconnect]).await;

        assert!(matches!(res, Err(GroupErr::Join(_))));
    }

    #[tokio::test]
    async fn peer_gets_the_welcome() {
        let (near, far) = io::duplex(CAPACITY);
        let (rx, tx) = io::split(near);
        let hub = Link::new(rx, tx);
        let (rx, tx) = io::split(far);
        let peer = Link::new(rx, tx);

        let (peers, joined) =
            future::join(accept_peers(2, vec![hub]), join_hub(1, 2, peer)).await;

        assert_eq!(peers.unwrap().len(), 1);
        assert!(joined.is_ok());
    }

    #[tokio::test]
    async fn silent_connection_times_out_the_hub() {
        let port = {
            let list = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            list.local_addr().unwrap().port()
        };
        let cfg = GroupConfig {
            rank: 0,
            local_rank: 0,
            world_size: 2,
            master_addr: "127.0.0.1".to_string(),
            master_port: port,
            init_timeout: Duration::from_millis(300),
        };
        let endpoint = cfg.master_endpoint();

        let hub = tokio::spawn(ProcessGroup::init(cfg));
        let _silent = connect(&endpoint, Duration::from_secs(5)).await.unwrap();

        let res = hub.await.unwrap();
        assert!(matches!(res, Err(GroupErr::Timeout { .. })));
    }
}
