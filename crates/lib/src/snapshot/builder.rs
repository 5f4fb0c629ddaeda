//! Concurrent snapshot construction.
//!
//! Producers walk the build (one task per included host, one per team) and emit node
//! and edge messages. Three long-lived workers consume them:
//!
//! - `store_metadata` writes each node into the metastore and forwards its ID,
//! - `populate_graph` adds the ID to the graph, hanging it off the virtual root,
//! - `relate_objects` connects parent to child once both exist, re-queueing edges whose
//!   endpoints have not arrived yet, and detaches the child from the root.
//!
//! When every producer has finished, the workers are told to stop one at a time, in
//! pipeline order. Each drains its channel without blocking and reports on a shared
//! `fin` channel before the next one is stopped, so by the time `relate_objects` drains
//! every node is in the graph and an edge that still cannot be placed is dangling.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{RwLock, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, Span, debug, info, trace, warn};

use super::types::{Metadata, ObjectType, Snapshot, SnapshotError};
use crate::build::{Build, ProvisionedHost, ProvisionedNetwork, ResolvedEnvironment, Team};
use crate::config::{Mergeable, ProvisionerKind};
use crate::consts::{MAX_DANGLING_EDGE_RETRIES, ROOT_NODE_ID};
use crate::dag::{Dag, DagError};
use crate::util::hash::{Checksum, HashError, Hashable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Worker {
  StoreMetadata,
  PopulateGraph,
  RelateObjects,
}

impl Worker {
  fn name(&self) -> &'static str {
    match self {
      Worker::StoreMetadata => "store_metadata",
      Worker::PopulateGraph => "populate_graph",
      Worker::RelateObjects => "relate_objects",
    }
  }
}

#[derive(Debug)]
struct EdgeMessage {
  parent: String,
  child: String,
  attempts: usize,
}

#[derive(Debug, Clone, Default)]
struct State {
  metastore: BTreeMap<String, Metadata>,
  dag: Dag,
}

type Shared = Arc<RwLock<State>>;

/// Producer handle: emits node and edge messages into the pipeline.
#[derive(Clone)]
struct Emitter {
  nodes: UnboundedSender<Metadata>,
  edges: UnboundedSender<EdgeMessage>,
  jitter: Option<u64>,
}

impl Emitter {
  fn add_object(&self, metadata: Metadata) -> Result<(), SnapshotError> {
    trace!(id = %metadata.id, object_type = %metadata.object_type, "add object");
    self
      .nodes
      .send(metadata)
      .map_err(|_| SnapshotError::WorkerLost(Worker::StoreMetadata.name()))
  }

  fn add_relationship(&self, parent: &str, child: &str) -> Result<(), SnapshotError> {
    self
      .edges
      .send(EdgeMessage {
        parent: parent.to_string(),
        child: child.to_string(),
        attempts: 0,
      })
      .map_err(|_| SnapshotError::WorkerLost(Worker::RelateObjects.name()))
  }

  /// Yield a seed-dependent number of times, to shuffle producer interleaving.
  async fn pause(&self, key: &str) {
    if let Some(seed) = self.jitter {
      let turns = Checksum::of_bytes(format!("{seed}:{key}").as_bytes()).0 % 4;
      for _ in 0..turns {
        tokio::task::yield_now().await;
      }
    }
  }
}

fn checksum_err(id: &str) -> impl FnOnce(HashError) -> SnapshotError + '_ {
  move |source| SnapshotError::Checksum {
    id: id.to_string(),
    source,
  }
}

async fn store_one(state: &Shared, graph: &UnboundedSender<String>, metadata: Metadata) -> bool {
  let id = metadata.id.clone();
  {
    let mut state = state.write().await;
    if let Some(existing) = state.metastore.get(&id) {
      if existing.checksum != metadata.checksum {
        warn!(id = %id, "object emitted twice with different checksums, keeping the first");
      }
      return false;
    }
    state.metastore.insert(id.clone(), metadata);
  }
  let _ = graph.send(id);
  true
}

async fn store_metadata(
  state: Shared,
  mut nodes: UnboundedReceiver<Metadata>,
  graph: UnboundedSender<String>,
  mut end: oneshot::Receiver<()>,
  fin: UnboundedSender<Worker>,
) -> usize {
  let mut stored = 0;
  loop {
    tokio::select! {
      Some(metadata) = nodes.recv() => {
        if store_one(&state, &graph, metadata).await {
          stored += 1;
        }
      }
      _ = &mut end => break,
    }
  }
  while let Ok(metadata) = nodes.try_recv() {
    if store_one(&state, &graph, metadata).await {
      stored += 1;
    }
  }
  let _ = fin.send(Worker::StoreMetadata);
  stored
}

async fn populate_one(state: &Shared, id: &str) -> Result<(), DagError> {
  let mut state = state.write().await;
  state.dag.add_vertex(id);
  state.dag.connect(ROOT_NODE_ID, id)
}

async fn populate_graph(
  state: Shared,
  mut ids: UnboundedReceiver<String>,
  mut end: oneshot::Receiver<()>,
  fin: UnboundedSender<Worker>,
) -> usize {
  let mut added = 0;
  loop {
    tokio::select! {
      Some(id) = ids.recv() => {
        match populate_one(&state, &id).await {
          Ok(()) => added += 1,
          Err(e) => warn!(id = %id, error = %e, "could not add node to graph"),
        }
      }
      _ = &mut end => break,
    }
  }
  while let Ok(id) = ids.try_recv() {
    match populate_one(&state, &id).await {
      Ok(()) => added += 1,
      Err(e) => warn!(id = %id, error = %e, "could not add node to graph"),
    }
  }
  let _ = fin.send(Worker::PopulateGraph);
  added
}

/// Place an edge if both endpoints exist. Returns `false` when it must wait.
async fn relate_one(state: &Shared, edge: &EdgeMessage) -> bool {
  let mut state = state.write().await;
  if state.dag.connect(&edge.parent, &edge.child).is_err() {
    return false;
  }
  state.dag.remove_edge(ROOT_NODE_ID, &edge.child);
  true
}

async fn relate_objects(
  state: Shared,
  mut edges: UnboundedReceiver<EdgeMessage>,
  requeue: UnboundedSender<EdgeMessage>,
  mut end: oneshot::Receiver<()>,
  fin: UnboundedSender<Worker>,
) -> Vec<EdgeMessage> {
  loop {
    tokio::select! {
      Some(edge) = edges.recv() => {
        if !relate_one(&state, &edge).await {
          let _ = requeue.send(edge);
          tokio::task::yield_now().await;
        }
      }
      _ = &mut end => break,
    }
  }

  let mut dangling = Vec::new();
  while let Ok(mut edge) = edges.try_recv() {
    if relate_one(&state, &edge).await {
      continue;
    }
    edge.attempts += 1;
    if edge.attempts >= MAX_DANGLING_EDGE_RETRIES {
      dangling.push(edge);
    } else {
      let _ = requeue.send(edge);
    }
  }
  let _ = fin.send(Worker::RelateObjects);
  dangling
}

/// The three workers and the channels connecting them.
struct Pipeline {
  emitter: Emitter,
  state: Shared,
  fin: UnboundedReceiver<Worker>,
  ends: [(Worker, oneshot::Sender<()>); 3],
  store: JoinHandle<usize>,
  populate: JoinHandle<usize>,
  relate: JoinHandle<Vec<EdgeMessage>>,
}

impl Pipeline {
  fn start(span: &Span, jitter: Option<u64>) -> Self {
    let mut initial = State::default();
    initial.dag.add_vertex(ROOT_NODE_ID);
    let state: Shared = Arc::new(RwLock::new(initial));

    let (nodes_tx, nodes_rx) = unbounded_channel();
    let (graph_tx, graph_rx) = unbounded_channel();
    let (edges_tx, edges_rx) = unbounded_channel();
    let (fin_tx, fin_rx) = unbounded_channel();
    let (store_end, store_end_rx) = oneshot::channel();
    let (populate_end, populate_end_rx) = oneshot::channel();
    let (relate_end, relate_end_rx) = oneshot::channel();

    let store = tokio::spawn(
      store_metadata(state.clone(), nodes_rx, graph_tx, store_end_rx, fin_tx.clone()).instrument(span.clone()),
    );
    let populate =
      tokio::spawn(populate_graph(state.clone(), graph_rx, populate_end_rx, fin_tx.clone()).instrument(span.clone()));
    let relate = tokio::spawn(
      relate_objects(state.clone(), edges_rx, edges_tx.clone(), relate_end_rx, fin_tx).instrument(span.clone()),
    );

    Self {
      emitter: Emitter {
        nodes: nodes_tx,
        edges: edges_tx,
        jitter,
      },
      state,
      fin: fin_rx,
      ends: [
        (Worker::StoreMetadata, store_end),
        (Worker::PopulateGraph, populate_end),
        (Worker::RelateObjects, relate_end),
      ],
      store,
      populate,
      relate,
    }
  }

  /// Stop the workers in pipeline order and return the assembled graph.
  ///
  /// Call only after every producer holding an [`Emitter`] clone has finished.
  async fn finish(self) -> Result<State, SnapshotError> {
    let Pipeline {
      emitter,
      state,
      mut fin,
      ends,
      store,
      populate,
      relate,
    } = self;
    drop(emitter);

    for (worker, end) in ends {
      let _ = end.send(());
      match fin.recv().await {
        Some(done) if done == worker => trace!(worker = worker.name(), "worker drained"),
        _ => return Err(SnapshotError::WorkerLost(worker.name())),
      }
    }

    let join_err = |e: tokio::task::JoinError| SnapshotError::Producer(e.to_string());
    let stored = store.await.map_err(join_err)?;
    let added = populate.await.map_err(join_err)?;
    let dangling = relate.await.map_err(join_err)?;
    debug!(stored, added, "snapshot workers finished");

    if let Some(first) = dangling.first() {
      return Err(SnapshotError::DanglingDependency {
        count: dangling.len(),
        parent: first.parent.clone(),
        child: first.child.clone(),
      });
    }

    let state = match Arc::try_unwrap(state) {
      Ok(lock) => lock.into_inner(),
      Err(shared) => shared.read().await.clone(),
    };
    Ok(state)
  }
}

fn definition_node(id: String, object_type: ObjectType, checksum: Result<Checksum, HashError>) -> Result<Metadata, SnapshotError> {
  let checksum = checksum.map_err(checksum_err(&id))?;
  Ok(Metadata::new(id, object_type, checksum))
}

async fn walk_host(emitter: Emitter, resolved: Arc<ResolvedEnvironment>, host_id: String) -> Result<(), SnapshotError> {
  let Some(host) = resolved.hosts.get(&host_id) else {
    return Ok(());
  };
  emitter.pause(&host_id).await;
  emitter.add_object(definition_node(host.path(), ObjectType::Host, host.checksum())?)?;

  for reference in resolved.step_refs(host) {
    let Some(provisioner) = resolved.provisioner(&reference) else {
      continue;
    };
    let object_type = match reference.kind {
      ProvisionerKind::Script => ObjectType::Script,
      ProvisionerKind::Command => ObjectType::Command,
      ProvisionerKind::RemoteFile => ObjectType::RemoteFile,
      ProvisionerKind::DnsRecord => ObjectType::DnsRecord,
    };
    emitter.pause(&reference.path()).await;
    emitter.add_object(definition_node(provisioner.path(), object_type, provisioner.checksum())?)?;
  }
  Ok(())
}

async fn walk_provisioned_host(emitter: &Emitter, pnet: &ProvisionedNetwork, phost: &ProvisionedHost) -> Result<(), SnapshotError> {
  emitter.pause(&phost.id).await;
  let checksum = phost.checksum().map_err(checksum_err(&phost.id))?;
  emitter.add_object(Metadata::new(&phost.id, ObjectType::ProvisionedHost, checksum))?;
  emitter.add_relationship(&pnet.id, &phost.id)?;
  emitter.add_relationship(&phost.host_id, &phost.id)?;

  let conn = &phost.connection;
  let checksum = conn.checksum().map_err(checksum_err(&conn.id))?;
  emitter.add_object(Metadata::new(&conn.id, ObjectType::Connection, checksum))?;
  emitter.add_relationship(&pnet.id, &conn.id)?;
  emitter.add_relationship(&conn.id, &phost.id)?;

  for dependency in &phost.depends_on {
    emitter.add_relationship(dependency, &phost.id)?;
  }

  let mut previous = phost.id.as_str();
  for step in &phost.provisioning_steps {
    emitter.pause(&step.id).await;
    let checksum = step.checksum().map_err(checksum_err(&step.id))?;
    emitter.add_object(Metadata::new(&step.id, ObjectType::ProvisioningStep, checksum).with_step_number(step.step_number))?;
    emitter.add_relationship(previous, &step.id)?;
    emitter.add_relationship(&step.id, &step.provisioner.path())?;
    previous = &step.id;
  }
  Ok(())
}

async fn walk_provisioned_network(emitter: &Emitter, team: &Team, pnet: &ProvisionedNetwork) -> Result<(), SnapshotError> {
  emitter.pause(&pnet.id).await;
  let checksum = pnet.checksum().map_err(checksum_err(&pnet.id))?;
  emitter.add_object(Metadata::new(&pnet.id, ObjectType::ProvisionedNetwork, checksum))?;
  emitter.add_relationship(&team.id, &pnet.id)?;
  emitter.add_relationship(&pnet.network_id, &pnet.id)?;

  for phost in pnet.provisioned_hosts.values() {
    walk_provisioned_host(emitter, pnet, phost).await?;
  }
  Ok(())
}

async fn walk_team(emitter: Emitter, build: Arc<Build>, team_number: u32) -> Result<(), SnapshotError> {
  let Some(team) = build.teams.get(&team_number) else {
    return Ok(());
  };
  emitter.pause(&team.id).await;
  let checksum = team.checksum().map_err(checksum_err(&team.id))?;
  emitter.add_object(Metadata::new(&team.id, ObjectType::Team, checksum))?;
  emitter.add_relationship(&build.id, &team.id)?;

  for pnet in team.provisioned_networks.values() {
    walk_provisioned_network(&emitter, team, pnet).await?;
  }
  Ok(())
}

/// Builds a [`Snapshot`] from a materialized build.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
  span: Span,
  jitter: Option<u64>,
}

impl SnapshotBuilder {
  pub fn new(span: Span) -> Self {
    Self { span, jitter: None }
  }

  /// Perturb producer interleaving deterministically from `seed`.
  ///
  /// The resulting snapshot must not depend on the seed; this exists to exercise that.
  pub fn with_scheduling_jitter(mut self, seed: u64) -> Self {
    self.jitter = Some(seed);
    self
  }

  pub async fn build(&self, resolved: Arc<ResolvedEnvironment>, build: Arc<Build>) -> Result<Snapshot, SnapshotError> {
    let pipeline = Pipeline::start(&self.span, self.jitter);
    let emitter = pipeline.emitter.clone();

    let walked = self.walk_environment(&emitter, resolved, build.clone()).await;
    drop(emitter);
    walked?;

    let State { metastore, mut dag } = pipeline.finish().await?;
    dag.remove_vertex(ROOT_NODE_ID);
    if !dag.is_acyclic() {
      return Err(DagError::Cycle.into());
    }
    let reduced = dag.transitive_reduction();

    let snapshot = Snapshot::new(&build.id, metastore, dag);
    self.span.in_scope(|| {
      info!(
        build = %snapshot.build_id,
        nodes = snapshot.len(),
        edges = snapshot.dag.edge_count(),
        reduced,
        checksum = %snapshot.checksum,
        "snapshot built"
      )
    });
    Ok(snapshot)
  }

  async fn walk_environment(
    &self,
    emitter: &Emitter,
    resolved: Arc<ResolvedEnvironment>,
    build: Arc<Build>,
  ) -> Result<(), SnapshotError> {
    let env_path = resolved.path();
    emitter.add_object(definition_node(env_path.clone(), ObjectType::Environment, resolved.environment.checksum())?)?;
    let checksum = build.checksum().map_err(checksum_err(&build.id))?;
    emitter.add_object(Metadata::new(&build.id, ObjectType::Build, checksum))?;
    emitter.add_relationship(&env_path, &build.id)?;

    for network in resolved.networks.values() {
      emitter.add_object(definition_node(network.path(), ObjectType::Network, network.checksum())?)?;
    }
    for identity in resolved.identities.values() {
      emitter.add_object(definition_node(identity.path(), ObjectType::Identity, identity.checksum())?)?;
    }

    let mut producers = JoinSet::new();
    for host_id in resolved.hosts.keys() {
      producers.spawn(walk_host(emitter.clone(), resolved.clone(), host_id.clone()).instrument(self.span.clone()));
    }
    for team_number in build.teams.keys() {
      producers.spawn(walk_team(emitter.clone(), build.clone(), *team_number).instrument(self.span.clone()));
    }

    let mut first_error = None;
    while let Some(joined) = producers.join_next().await {
      let result = joined.map_err(|e| SnapshotError::Producer(e.to_string())).and_then(|r| r);
      if let Err(e) = result
        && first_error.is_none()
      {
        first_error = Some(e);
      }
    }
    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}
