//! Particle filter interface
//!
//! The mapper is a black box behind [`ParticleFilter`]. The coordination
//! layer only reads particle weights, the best particle, and the best
//! particle's trajectory. Trajectories live in a [`TrajectoryArena`]: nodes
//! are addressed by index and point at their parent, so particles that share
//! history after resampling share nodes.

use crate::common::types::{Pose2D, Stamp};
use crate::config::{MapParams, MatchingParams, MotionModelParams, SamplingParams, UpdateParams};
use crate::error::SlamError;
use std::sync::Arc;

/// Index of a node in a [`TrajectoryArena`]
pub type NodeId = usize;

/// A range reading in filter order, with the odometry pose it was taken at.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeReading {
    pub ranges: Vec<f64>,
    pub stamp: Stamp,
    pub odom_pose: Pose2D,
}

/// One step of a particle's trajectory.
#[derive(Debug, Clone)]
pub struct TrajectoryNode {
    pub pose: Pose2D,
    /// Shared by every node created from the same reading
    pub reading: Option<Arc<RangeReading>>,
    pub parent: Option<NodeId>,
}

/// Store of trajectory nodes. Nodes are only appended, until
/// [`TrajectoryArena::compact`] drops the ones no leaf reaches.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryArena {
    nodes: Vec<TrajectoryNode>,
}

impl TrajectoryArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. A parent must already be in the arena, which keeps
    /// every chain finite and acyclic.
    pub fn push(
        &mut self,
        pose: Pose2D,
        reading: Option<Arc<RangeReading>>,
        parent: Option<NodeId>,
    ) -> Result<NodeId, SlamError> {
        if let Some(parent) = parent {
            if parent >= self.nodes.len() {
                return Err(SlamError::Filter(format!(
                    "trajectory parent {} does not exist",
                    parent
                )));
            }
        }
        self.nodes.push(TrajectoryNode {
            pose,
            reading,
            parent,
        });
        Ok(self.nodes.len() - 1)
    }

    pub fn get(&self, id: NodeId) -> Option<&TrajectoryNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Drop every node that is not an ancestor of one of `leaves` and
    /// renumber the rest. Returns the new id of each leaf, in order.
    pub fn compact(&mut self, leaves: &[NodeId]) -> Result<Vec<NodeId>, SlamError> {
        if let Some(&leaf) = leaves.iter().find(|&&leaf| leaf >= self.nodes.len()) {
            return Err(SlamError::Filter(format!(
                "trajectory leaf {} does not exist",
                leaf
            )));
        }

        let mut live = vec![false; self.nodes.len()];
        for &leaf in leaves {
            let mut next = Some(leaf);
            while let Some(id) = next {
                if live[id] {
                    break;
                }
                live[id] = true;
                next = self.nodes[id].parent;
            }
        }

        // Parents precede children, so a parent is renumbered before it is needed
        let mut remap: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        let mut kept = Vec::with_capacity(live.iter().filter(|&&l| l).count());
        for (id, node) in std::mem::take(&mut self.nodes).into_iter().enumerate() {
            if !live[id] {
                continue;
            }
            remap[id] = Some(kept.len());
            kept.push(TrajectoryNode {
                parent: node.parent.and_then(|parent| remap[parent]),
                ..node
            });
        }
        self.nodes = kept;

        Ok(leaves.iter().filter_map(|&leaf| remap[leaf]).collect())
    }

    /// Walk from `leaf` back to the root.
    pub fn ancestors(&self, leaf: NodeId) -> Ancestors<'_> {
        Ancestors {
            arena: self,
            next: Some(leaf),
        }
    }
}

/// Leaf-to-root iterator over a trajectory chain.
pub struct Ancestors<'a> {
    arena: &'a TrajectoryArena,
    next: Option<NodeId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a TrajectoryNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.arena.get(self.next?)?;
        self.next = node.parent;
        Some(node)
    }
}

/// One hypothesis of the filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub pose: Pose2D,
    /// Non-negative weight
    pub weight: f64,
    /// Last node of this particle's trajectory
    pub node: NodeId,
}

/// One-time engine configuration.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub particles: usize,
    /// Beam angles in filter order
    pub beam_angles: Vec<f64>,
    pub max_range: f64,
    pub max_urange: f64,
    pub matching: MatchingParams,
    pub motion: MotionModelParams,
    pub update: UpdateParams,
    pub sampling: SamplingParams,
    pub bounds: MapParams,
    pub initial_pose: Pose2D,
    pub seed: u64,
}

/// The external mapper.
pub trait ParticleFilter: Send {
    /// Apply the configuration and reset all particles to the initial pose.
    fn configure(&mut self, config: &FilterConfig) -> Result<(), SlamError>;

    /// Offer a reading. `Ok(false)` means the engine declined it.
    fn process_scan(&mut self, reading: &RangeReading) -> Result<bool, SlamError>;

    fn particles(&self) -> &[Particle];

    fn best_particle_index(&self) -> usize;

    fn trajectory(&self) -> &TrajectoryArena;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestors_walk_to_root() {
        let mut arena = TrajectoryArena::new();
        let root = arena.push(Pose2D::new(0.0, 0.0, 0.0), None, None).unwrap();
        let a = arena.push(Pose2D::new(1.0, 0.0, 0.0), None, Some(root)).unwrap();
        let b = arena.push(Pose2D::new(2.0, 0.0, 0.0), None, Some(a)).unwrap();
        // Sibling branch sharing the root
        let c = arena.push(Pose2D::new(-1.0, 0.0, 0.0), None, Some(root)).unwrap();

        let xs: Vec<f64> = arena.ancestors(b).map(|n| n.pose.x).collect();
        assert_eq!(xs, vec![2.0, 1.0, 0.0]);

        let xs: Vec<f64> = arena.ancestors(c).map(|n| n.pose.x).collect();
        assert_eq!(xs, vec![-1.0, 0.0]);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut arena = TrajectoryArena::new();
        assert!(matches!(
            arena.push(Pose2D::default(), None, Some(3)),
            Err(SlamError::Filter(_))
        ));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_compact_drops_dead_branches() {
        let mut arena = TrajectoryArena::new();
        let root = arena.push(Pose2D::new(0.0, 0.0, 0.0), None, None).unwrap();
        let dead = arena.push(Pose2D::new(-1.0, 0.0, 0.0), None, Some(root)).unwrap();
        let a = arena.push(Pose2D::new(1.0, 0.0, 0.0), None, Some(root)).unwrap();
        arena.push(Pose2D::new(-2.0, 0.0, 0.0), None, Some(dead)).unwrap();
        let b = arena.push(Pose2D::new(2.0, 0.0, 0.0), None, Some(a)).unwrap();
        let c = arena.push(Pose2D::new(3.0, 0.0, 0.0), None, Some(a)).unwrap();

        let leaves = arena.compact(&[c, b, c]).unwrap();

        assert_eq!(arena.len(), 4);
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0], leaves[2]);
        let xs: Vec<f64> = arena.ancestors(leaves[0]).map(|n| n.pose.x).collect();
        assert_eq!(xs, vec![3.0, 1.0, 0.0]);
        let xs: Vec<f64> = arena.ancestors(leaves[1]).map(|n| n.pose.x).collect();
        assert_eq!(xs, vec![2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_compact_rejects_unknown_leaf() {
        let mut arena = TrajectoryArena::new();
        arena.push(Pose2D::default(), None, None).unwrap();
        assert!(matches!(arena.compact(&[5]), Err(SlamError::Filter(_))));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_ancestors_of_missing_leaf_is_empty() {
        let arena = TrajectoryArena::new();
        assert_eq!(arena.ancestors(7).count(), 0);
    }
}
