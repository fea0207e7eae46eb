//! Cleanup reaper.
//!
//! A single long-lived task reconciles finished handles with their graphs:
//! successful completions propagate outputs and activate children, errored
//! completions cut the branch, and graphs that have finished are dropped.
//! Concentrating every graph-mutating reaction here, under the same
//! handles-before-graphs lock order as activation, is what keeps the
//! transactional activation invariants intact against concurrent worker
//! completion.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use umrf_core::graph::GraphState;
use umrf_core::node::NodeId;

use crate::executor::ExecutorInner;
use crate::handle::HandleState;

pub(crate) fn spawn(inner: Arc<ExecutorInner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(inner.config.reaper_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of an interval completes immediately
        ticker.tick().await;
        while inner.reaper_spinning.load(Ordering::Relaxed) {
            ticker.tick().await;
            sweep(&inner).await;
        }
        debug!("cleanup loop exited");
    })
}

async fn sweep(inner: &ExecutorInner) {
    let mut handles = inner.handles.write().await;
    let mut graphs = inner.graphs.write().await;

    let mut finished: Vec<NodeId> = handles
        .iter()
        .filter(|(_, handle)| {
            handle.state() == HandleState::Finished && handle.future_is_ready()
        })
        .map(|(id, _)| *id)
        .collect();
    finished.sort_unstable();

    for id in finished {
        let Some(completion) = handles.get(&id).and_then(|h| h.take_future_value()) else {
            continue;
        };
        let full_name = handles
            .get(&id)
            .map(|h| h.full_name())
            .unwrap_or_default();

        match &completion.error {
            Some(message) => {
                // children of an errored action do not activate
                error!(node = %full_name, id, "{message}");
            }
            None => {
                debug!(node = %full_name, id, "action finished");
                if let Err(e) = inner
                    .notify_finished(id, &completion.outputs, &mut handles, &mut graphs)
                    .await
                {
                    // swallow per-graph errors so other graphs make progress
                    warn!(node = %full_name, id, error = %e, "completion propagation failed");
                }
            }
        }

        for graph in graphs.values_mut() {
            if graph.part_of_graph(id) {
                if let Err(e) = graph.set_node_finished(id) {
                    warn!(node = %full_name, id, error = %e, "cannot finish node");
                }
            }
        }

        if let Some(mut handle) = handles.remove(&id) {
            handle.clear_action(inner.config.stop_timeout()).await;
        }
    }

    graphs.retain(|name, graph| {
        if graph.check_state() == GraphState::Finished {
            info!(graph = %name, "graph has finished");
            false
        } else {
            true
        }
    });
}
