//! Process context for distributed runs.
//!
//! Nothing in this crate sends messages itself.
//! Reductions needed by norms and dot products go through a [`Communicator`],
//! and the mesh partitioner only needs to know its place in the process grid,
//! which is passed in explicitly as a [`ProcessorLayout`].

/// Collective operations over the processes of a run.
///
/// Implement this on top of whatever message-passing layer you use.
/// [`SerialComm`] covers the single-process case.
pub trait Communicator {
    /// Index of this process, in `0..size()`.
    fn rank(&self) -> usize;
    /// Number of processes in the run.
    fn size(&self) -> usize;
    /// Sum a value over all processes.
    fn sum_all(&self, local: f64) -> f64;
    /// Sum a count over all processes exactly.
    fn sum_all_counts(&self, local: usize) -> usize;
    /// Maximum of a value over all processes.
    fn max_all(&self, local: f64) -> f64;
}

/// The communicator of a single-process run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SerialComm;

impl Communicator for SerialComm {
    #[inline]
    fn rank(&self) -> usize {
        0
    }

    #[inline]
    fn size(&self) -> usize {
        1
    }

    #[inline]
    fn sum_all(&self, local: f64) -> f64 {
        local
    }

    #[inline]
    fn sum_all_counts(&self, local: usize) -> usize {
        local
    }

    #[inline]
    fn max_all(&self, local: f64) -> f64 {
        local
    }
}

/// The position of this process among all processes of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessorLayout {
    /// Total number of processes.
    pub processor_count: usize,
    /// Index of this process.
    pub my_processor: usize,
}

impl ProcessorLayout {
    /// Create a layout for process `my_processor` out of `processor_count`.
    ///
    /// Panics if there are no processes or the rank is out of range.
    pub fn new(processor_count: usize, my_processor: usize) -> Self {
        assert!(processor_count > 0, "a run needs at least one process");
        assert!(
            my_processor < processor_count,
            "rank {my_processor} out of range for {processor_count} processes"
        );
        Self {
            processor_count,
            my_processor,
        }
    }

    /// The layout of a single-process run.
    #[inline]
    pub fn serial() -> Self {
        Self::new(1, 0)
    }

    /// Take the layout from a communicator.
    pub fn from_comm(comm: &dyn Communicator) -> Self {
        Self::new(comm.size(), comm.rank())
    }

    /// Iterate over the layouts of every process in a run of `processor_count`.
    ///
    /// Handy for checking partition properties without actually running in parallel.
    pub fn all(processor_count: usize) -> impl Iterator<Item = Self> {
        (0..processor_count).map(move |rank| Self::new(processor_count, rank))
    }

    /// Whether this is the first process.
    #[inline]
    pub fn is_first(&self) -> bool {
        self.my_processor == 0
    }

    /// Whether this is the last process.
    #[inline]
    pub fn is_last(&self) -> bool {
        self.my_processor + 1 == self.processor_count
    }
}

impl Default for ProcessorLayout {
    fn default() -> Self {
        Self::serial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_from_serial_comm() {
        let layout = ProcessorLayout::from_comm(&SerialComm);
        assert_eq!(layout, ProcessorLayout::serial());
        assert!(layout.is_first() && layout.is_last());
    }

    #[test]
    fn all_layouts_cover_every_rank() {
        itertools::assert_equal(
            ProcessorLayout::all(3).map(|l| l.my_processor),
            0..3,
        );
        let last = ProcessorLayout::all(3).last().unwrap();
        assert!(last.is_last() && !last.is_first());
    }

    #[test]
    #[should_panic]
    fn rank_out_of_range_panics() {
        ProcessorLayout::new(2, 2);
    }
}
