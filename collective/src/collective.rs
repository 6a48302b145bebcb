use comms::msg::ReduceOp;

use crate::Result;

/// The collective operations every rank of a group issues in lockstep.
///
/// All participants must call the same operations, in the same order and with the same
/// arguments (lengths, tags, source ranks). Implementations are expected to detect a
/// divergence and fail instead of hanging.
#[allow(unused)]
#[trait_variant::make(Collective: Send)]
pub trait CollectiveTemplate {
    /// Returns the zero-based rank of this participant.
    fn rank(&self) -> usize;

    /// Returns the ordinal of this participant among the ones sharing its host.
    fn local_rank(&self) -> usize;

    /// Returns the amount of participants in the group.
    fn world_size(&self) -> usize;

    /// Combines `data` element-wise across all ranks, every rank ends up with the result.
    ///
    /// # Arguments
    /// * `data` - This rank's contribution, overwritten with the reduced values.
    /// * `op` - How contributions are combined.
    async fn all_reduce(&mut self, data: &mut [f32], op: ReduceOp) -> Result<()>;

    /// Copies `src`'s `data` into every other rank's `data`.
    ///
    /// # Arguments
    /// * `data` - The values to send when `rank() == src`, the values received otherwise.
    /// * `src` - The rank that owns the values.
    async fn broadcast(&mut self, data: &mut [f32], src: usize) -> Result<()>;

    /// Blocks until every rank has reached the rendezvous named `tag`.
    async fn rendezvous(&mut self, tag: &str) -> Result<()>;
}
