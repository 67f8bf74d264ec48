//! Next-item decision logic.
//!
//! [`compute_next`] is the single place that decides what plays next. It is
//! pure over its inputs apart from cursor bookkeeping on the queue: it never
//! mutates the tree, and it consumes a pending request exactly once (the
//! request is taken by value, so it is cleared no matter which path runs).

use log::{debug, info};
use rand::rngs::StdRng;

use crate::config::PlaybackFlags;
use crate::playlist::order::PlayQueue;
use crate::playlist::tree::{NodeId, PlaylistTree};
use crate::protocol::PlaybackStatus;

/// Externally submitted playback request; at most one is pending at a time.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackRequest {
    /// Container to make the active root, if different from the current one.
    pub node: Option<NodeId>,
    /// Leaf (or container to step into) the request targets.
    pub item: Option<NodeId>,
    /// Relative movement applied after positioning, one unit at a time.
    pub skip: i32,
    /// Desired scheduler status, when the request carries one.
    pub status: Option<PlaybackStatus>,
}

impl PlaybackRequest {
    pub fn stop() -> Self {
        Self {
            node: None,
            item: None,
            skip: 0,
            status: Some(PlaybackStatus::Stopped),
        }
    }

    pub fn play(item: Option<NodeId>) -> Self {
        Self {
            node: None,
            item,
            skip: 0,
            status: Some(PlaybackStatus::Running),
        }
    }

    pub fn play_node(node: NodeId) -> Self {
        Self {
            node: Some(node),
            item: None,
            skip: 0,
            status: Some(PlaybackStatus::Running),
        }
    }

    pub fn skip(from: Option<NodeId>, count: i32) -> Self {
        Self {
            node: None,
            item: from,
            skip: count,
            status: Some(PlaybackStatus::Running),
        }
    }
}

/// Computes the next leaf to play.
///
/// With a pending request, the request drives the decision; otherwise the
/// automatic-advance policies apply. Returns `None` when playback should
/// stop. May reposition the queue cursor and trigger an immediate rebuild,
/// but leaves `current_item` to the caller that actually starts the item.
pub fn compute_next(
    tree: &PlaylistTree,
    queue: &mut PlayQueue,
    flags: &PlaybackFlags,
    rng: &mut StdRng,
    request: Option<PlaybackRequest>,
) -> Option<NodeId> {
    match request {
        Some(request) => process_request(tree, queue, flags, rng, request),
        None => automatic_advance(tree, queue, flags, rng),
    }
}

fn process_request(
    tree: &PlaylistTree,
    queue: &mut PlayQueue,
    flags: &PlaybackFlags,
    rng: &mut StdRng,
    request: PlaybackRequest,
) -> Option<NodeId> {
    let mut target = request.item;
    let mut skip = request.skip;
    debug!(
        "processing request: item {:?} node {:?} skip {}",
        target, request.node, skip
    );

    if let Some(node) = request.node {
        if node != queue.current_root && tree.contains(node) {
            queue.current_root = node;
            queue.rebuild_required = true;
        }
    }

    // Asked for a container (or nothing at all): step into its first leaf.
    if skip == 0 && !target.is_some_and(|node| tree.is_leaf(node)) {
        skip += 1;
        if let Some(container) = target {
            target = tree.first_leaf_under(container);
            if let Some(leaf) = target {
                if let Some(position) = queue.position_of(leaf) {
                    queue.current_index = Some(position);
                    skip = 0;
                }
            }
        }
    }

    if queue.rebuild_required {
        queue.rebuild(tree, target, flags.random, rng);
    } else if let Some(leaf) = target {
        queue.resync(leaf);
    } else {
        queue.current_index = None;
    }

    if !queue.is_empty() && skip > 0 {
        for _ in 0..skip {
            queue.step_forward();
        }
        target = queue.current();
    } else if !queue.is_empty() && skip < 0 {
        for _ in skip..0 {
            queue.step_backward();
        }
        target = queue.current();
    }

    target
}

fn automatic_advance(
    tree: &PlaylistTree,
    queue: &mut PlayQueue,
    flags: &PlaybackFlags,
    rng: &mut StdRng,
) -> Option<NodeId> {
    if queue.rebuild_required {
        queue.rebuild(tree, queue.current_item, flags.random, rng);
    }

    if queue.is_empty() {
        info!("playlist is empty");
        return None;
    }

    if flags.repeat {
        if let Some(current) = queue.current_item {
            debug!("repeating item");
            return Some(current);
        }
    }

    if flags.play_and_stop {
        debug!("stopping (play and stop)");
        return None;
    }

    if let Some(current) = queue.current_item {
        if tree.is_blocked(current) {
            debug!("blocking item, stopping");
            return None;
        }
    }

    debug!(
        "changing item without a request (current {}/{})",
        queue.current_index.map_or(-1, |index| index as i64),
        queue.len()
    );
    let next = queue.current_index.map_or(0, |index| index + 1);
    assert!(next <= queue.len());
    let next = if next == queue.len() {
        if !flags.loop_all {
            return None;
        }
        0
    } else {
        next
    };
    queue.current_index = Some(next);
    debug!("using item {}", next);

    let candidate = queue.get(next)?;
    // The new item can't be autoselected.
    if tree.is_skipped(candidate) {
        return None;
    }
    Some(candidate)
}
