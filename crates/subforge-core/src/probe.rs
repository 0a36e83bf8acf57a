//! TCP reachability probes.
//!
//! One task per node, at most `concurrency` in flight, each bounded by a
//! deadline. Nodes that fail or miss the deadline are left out of the result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::node::Node;

/// Latency of a reachable node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// Node id.
    pub id: String,
    /// Node name.
    pub name: String,
    /// TCP connect time in milliseconds.
    pub latency_ms: u64,
}

/// Probe limits.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    /// Maximum probes in flight.
    pub concurrency: usize,
    /// Per-node deadline.
    pub timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            concurrency: 32,
            timeout: Duration::from_secs(3),
        }
    }
}

async fn probe_one(endpoint: String, timeout: Duration) -> Option<u64> {
    let started = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(&endpoint)).await {
        Ok(Ok(_stream)) => Some(started.elapsed().as_millis() as u64),
        Ok(Err(e)) => {
            debug!(endpoint = %endpoint, error = %e, "probe failed");
            None
        }
        Err(_) => {
            debug!(endpoint = %endpoint, "probe timed out");
            None
        }
    }
}

/// Probes every node and returns the reachable ones in input order.
pub async fn probe_nodes(nodes: &[Node], options: ProbeOptions) -> Vec<ProbeResult> {
    let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, node) in nodes.iter().enumerate() {
        let permits = Arc::clone(&permits);
        let endpoint = node.endpoint();
        let timeout = options.timeout;
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            probe_one(endpoint, timeout).await.map(|ms| (index, ms))
        });
    }

    let mut reachable = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Ok(Some(hit)) = joined {
            reachable.push(hit);
        }
    }
    reachable.sort_unstable_by_key(|(index, _)| *index);

    reachable
        .into_iter()
        .map(|(index, latency_ms)| ProbeResult {
            id: nodes[index].id.clone(),
            name: nodes[index].name.clone(),
            latency_ms,
        })
        .collect()
}
