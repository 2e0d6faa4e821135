//! Executes an action graph on a bounded worker pool.
//!
//! The coordinator runs on the calling thread. It keeps a count of
//! unfinished predecessors per action, spawns every action whose count drops
//! to zero onto the pool, and waits for completions on a channel. Workers
//! never block on each other.

use crate::action::RunContext;
use crate::driver::DriverError;
use crate::graph::{ActionGraph, ActionId};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;

/// Runs every action of `graph` at most once, predecessors first.
///
/// On return every action is done. The first fatal error cancels the
/// remaining work and is returned; actions already running finish normally.
pub(crate) fn execute(
    graph: &ActionGraph,
    ctx: &RunContext<'_>,
    parallelism: usize,
) -> Result<(), DriverError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.max(1))
        .thread_name(|i| format!("passkit-worker-{i}"))
        .build()?;

    let mut remaining: Vec<usize> = graph.actions().map(|a| a.deps.len()).collect();
    let mut ready: VecDeque<ActionId> = graph.ids().filter(|id| remaining[id.0] == 0).collect();
    let (tx, rx) = mpsc::channel::<(ActionId, Option<DriverError>)>();
    let mut fatal: Option<DriverError> = None;
    let mut completed = 0_usize;

    tracing::debug!(parallelism, actions = graph.len(), "executing action graph");

    pool.in_place_scope(|scope| {
        let mut in_flight = 0_usize;
        loop {
            while let Some(id) = ready.pop_front() {
                let action = graph.action(id);
                if ctx.cancel.is_cancelled() {
                    action.cancel();
                    completed += 1;
                    release(graph, id, &mut remaining, &mut ready);
                    continue;
                }
                let tx = tx.clone();
                scope.spawn(move |_| {
                    // A job that dies without sending leaves the coordinator
                    // waiting forever.
                    let fatal = panic::catch_unwind(AssertUnwindSafe(|| action.execute(graph, ctx)))
                        .unwrap_or_else(|payload| {
                            action.abandon(payload.as_ref());
                            None
                        });
                    // The receiver outlives the scope.
                    let _ = tx.send((id, fatal));
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }
            let Ok((id, err)) = rx.recv() else {
                break;
            };
            in_flight -= 1;
            completed += 1;
            if let Some(err) = err {
                tracing::error!("aborting analysis: {err}");
                ctx.cancel.cancel();
                fatal.get_or_insert(err);
            }
            release(graph, id, &mut remaining, &mut ready);
        }
    });

    tracing::debug!(completed, "action graph finished");
    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn release(
    graph: &ActionGraph,
    id: ActionId,
    remaining: &mut [usize],
    ready: &mut VecDeque<ActionId>,
) {
    for &next in &graph.action(id).dependents {
        remaining[next.0] -= 1;
        if remaining[next.0] == 0 {
            ready.push_back(next);
        }
    }
}
