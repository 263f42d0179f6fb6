//! Deterministic reduction of per-node replies.
//!
//! Collaborators may answer in network arrival order. Everything here pins the
//! scan order to ascending node identity so the reported offender is the same
//! on every run.

use crate::core::types::{NodeIdentity, NodeReply};

/// Sort node identities ascending and drop duplicates.
pub fn ordered_nodes(mut nodes: Vec<NodeIdentity>) -> Vec<NodeIdentity> {
    nodes.sort();
    nodes.dedup();
    nodes
}

/// Sort replies by node identity. Replies from the same node keep their
/// original relative order.
pub fn ordered_replies<T>(mut replies: Vec<NodeReply<T>>) -> Vec<NodeReply<T>> {
    replies.sort_by(|a, b| a.node.cmp(&b.node));
    replies
}

/// Return the first reply, in identity order, that `is_ok` rejects.
///
/// Scanning stops at that reply; later replies are not inspected.
pub fn first_offender<T, F>(replies: Vec<NodeReply<T>>, is_ok: F) -> Option<NodeReply<T>>
where
    F: Fn(&T) -> bool,
{
    ordered_replies(replies)
        .into_iter()
        .find(|reply| !is_ok(&reply.value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn ordered_nodes_sorts_and_dedups() {
        let nodes = vec![
            NodeIdentity::new("web3"),
            NodeIdentity::new("web1"),
            NodeIdentity::new("web3"),
            NodeIdentity::new("web2"),
        ];
        let ordered: Vec<String> = ordered_nodes(nodes)
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(ordered, vec!["web1", "web2", "web3"]);
    }

    #[test]
    fn first_offender_ignores_arrival_order() {
        let replies = vec![
            NodeReply::new("n3", 1),
            NodeReply::new("n1", 0),
            NodeReply::new("n2", 2),
        ];
        let offender = first_offender(replies, |code| *code == 0).expect("offender");
        assert_eq!(offender.node, NodeIdentity::new("n2"));
        assert_eq!(offender.value, 2);
    }

    #[test]
    fn first_offender_none_when_all_ok() {
        let replies = vec![NodeReply::new("a", "stopped"), NodeReply::new("b", "stopped")];
        assert!(first_offender(replies, |s| *s == "stopped").is_none());
    }

    #[test]
    fn first_offender_stops_scanning_at_failure() {
        let inspected = Cell::new(0);
        let replies = vec![
            NodeReply::new("a", 0),
            NodeReply::new("b", 1),
            NodeReply::new("c", 1),
            NodeReply::new("d", 0),
        ];
        let offender = first_offender(replies, |code| {
            inspected.set(inspected.get() + 1);
            *code == 0
        })
        .expect("offender");
        assert_eq!(offender.node, NodeIdentity::new("b"));
        assert_eq!(inspected.get(), 2);
    }
}
