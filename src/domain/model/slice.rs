use crate::domain::utils::id::{NodeId, VmId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    /// The VM occupies its current host until it leaves.
    Consuming,
    /// The VM occupies its new host from its arrival on.
    Demanding,
}

/// Occupation of one node by one VM over `[start, start + duration)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub vm: VmId,
    pub kind: SliceKind,

    /// Index of the node in the model of the partition.
    pub hoster: usize,
    pub node: NodeId,

    pub start: i64,
    pub duration: i64,

    pub cpu: i64,
    pub memory: i64,
}

impl Slice {
    pub fn end(&self) -> i64 {
        self.start + self.duration
    }

    pub fn is_active_at(&self, t: i64) -> bool {
        self.start <= t && t < self.end()
    }
}
