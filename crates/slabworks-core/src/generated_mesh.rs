//! Structured hexahedral meshes generated from a handful of integers.
//!
//! A [`GeneratedMesh`] is a grid of `num_x × num_y × num_z` hexahedra
//! spanning the box `[0, num_x] × [0, num_y] × [0, num_z]`
//! (before scaling, offsetting and rotation),
//! optionally with blocks of quadrilateral shell elements
//! attached to any of its six boundary faces.
//!
//! The grid is split across processes along the Z axis.
//! Each process owns a contiguous slab of Z intervals
//! and everything it asks about its own part of the mesh
//! (counts, ID maps, connectivity, coordinates)
//! is computed directly from the interval counts and its rank,
//! with no communication needed.
//!
//! # Numbering
//!
//! Nodes are numbered with x varying fastest, then y, then z.
//! Global node and element IDs start at 1, as expected by mesh file formats.
//! Connectivity refers to nodes by their 1-based position in this process's slab;
//! use [`node_map`][GeneratedMesh::node_map] to translate these to global IDs.
//!
//! Element blocks are also numbered from 1.
//! Block 1 is always the hex block,
//! and shell blocks follow in the order they were added.
//!
//! # Example
//!
//! ```
//! # use slabworks_core::{GeneratedMesh, ProcessorLayout};
//! let mesh = GeneratedMesh::from_params("2x2x2|shell:xX", ProcessorLayout::serial())?;
//! assert_eq!(mesh.node_count(), 27);
//! assert_eq!(mesh.block_count(), 3);
//! assert_eq!(mesh.block_element_count(2), 4);
//! # Ok::<(), slabworks_core::generated_mesh::MeshError>(())
//! ```

mod options;
mod shell;
pub use shell::{ShellLocation, HEX_FACE_NODES};

use itertools::iproduct;
use nalgebra as na;

use crate::{comm::ProcessorLayout, Vec3};

/// Error in configuring a [`GeneratedMesh`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    /// There are fewer Z intervals than processes to split them over.
    #[error("{num_z} intervals in Z cannot be split over {processor_count} processes")]
    InsufficientIntervals {
        /// Number of Z intervals requested.
        num_z: usize,
        /// Number of processes in the run.
        processor_count: usize,
    },
    /// The leading `IxJxK` group of a parameter string was invalid.
    #[error("Invalid interval specification '{0}', expected IxJxK with positive integers")]
    InvalidIntervals(String),
    /// An option that takes an argument was given without one.
    #[error("Option '{0}' requires an argument")]
    MissingArgument(String),
    /// An option was given the wrong number of comma-separated values.
    #[error("Malformed '{option}' option: expected {expected} values, found {found}")]
    WrongTokenCount {
        /// The option key, e.g. `scale`.
        option: String,
        /// Description of the expected count.
        expected: String,
        /// Number of values actually given.
        found: usize,
    },
    /// A value in an option could not be parsed as a number.
    #[error("Could not parse '{token}' in '{option}' option as a number")]
    InvalidNumber {
        /// The option key.
        option: String,
        /// The offending value.
        token: String,
    },
    /// A rotation axis other than x, y or z.
    #[error("Invalid axis specification '{0}', valid options are 'x', 'y' or 'z'")]
    InvalidAxis(String),
}

/// A coordinate axis, used to specify rotations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    #[allow(missing_docs)]
    X,
    #[allow(missing_docs)]
    Y,
    #[allow(missing_docs)]
    Z,
}

impl std::str::FromStr for Axis {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "x" | "X" => Ok(Axis::X),
            "y" | "Y" => Ok(Axis::Y),
            "z" | "Z" => Ok(Axis::Z),
            other => Err(MeshError::InvalidAxis(other.to_string())),
        }
    }
}

/// The element type of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// Trilinear hexahedron with 8 nodes.
    Hex8,
    /// Bilinear quadrilateral shell with 4 nodes.
    Shell4,
}

impl Topology {
    /// The name of the topology as used in mesh files.
    pub fn name(&self) -> &'static str {
        match self {
            Topology::Hex8 => "hex8",
            Topology::Shell4 => "shell4",
        }
    }

    /// Number of nodes per element.
    pub fn node_count(&self) -> usize {
        match self {
            Topology::Hex8 => 8,
            Topology::Shell4 => 4,
        }
    }
}

/// Nodes this process shares with its neighbours in the Z direction,
/// as computed by [`GeneratedMesh::node_communication_map`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeCommunicationMap {
    /// Global 1-based IDs of the shared nodes.
    pub node_ids: Vec<usize>,
    /// The neighbouring process each node in `node_ids` is shared with.
    pub processors: Vec<usize>,
}

impl NodeCommunicationMap {
    /// Number of (node, process) pairs in the map.
    #[inline]
    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    /// Whether there are no shared nodes, as with a single process.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    /// Iterate over `(node_id, processor)` pairs.
    pub fn iter(&self) -> impl '_ + Iterator<Item = (usize, usize)> {
        self.node_ids
            .iter()
            .copied()
            .zip(self.processors.iter().copied())
    }

    fn push_layer(&mut self, first_id: usize, layer_size: usize, processor: usize) {
        self.node_ids.extend(first_id..first_id + layer_size);
        self.processors
            .extend(std::iter::repeat(processor).take(layer_size));
    }
}

/// What a block number refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Block {
    Hex,
    Shell(ShellLocation),
}

/// A structured hex mesh partitioned along the Z axis.
///
/// See the [module-level docs][self] for the numbering conventions.
///
/// The mesh is configured with the setters
/// ([`set_scale`][Self::set_scale], [`add_shell_block`][Self::add_shell_block] etc.)
/// or a parameter string given to [`from_params`][Self::from_params],
/// after which all queries are pure functions of that configuration.
#[derive(Clone, Debug)]
pub struct GeneratedMesh {
    num_x: usize,
    num_y: usize,
    num_z: usize,
    my_num_z: usize,
    my_start_z: usize,
    layout: ProcessorLayout,
    scale: Vec3,
    offset: Vec3,
    // None until a rotation is requested,
    // which lets us skip the matrix product for unrotated meshes
    rotation: Option<na::Matrix3<f64>>,
    shell_blocks: Vec<ShellLocation>,
}

impl GeneratedMesh {
    /// Create a mesh with the given numbers of intervals in each direction.
    ///
    /// The Z intervals are split as evenly as possible over the processes in `layout`,
    /// with the lowest ranks getting one extra interval when they don't divide evenly.
    pub fn new(
        num_x: usize,
        num_y: usize,
        num_z: usize,
        layout: ProcessorLayout,
    ) -> Result<Self, MeshError> {
        if num_x == 0 || num_y == 0 || num_z == 0 {
            return Err(MeshError::InvalidIntervals(format!(
                "{num_x}x{num_y}x{num_z}"
            )));
        }

        let mut mesh = Self {
            num_x,
            num_y,
            num_z,
            my_num_z: num_z,
            my_start_z: 0,
            layout,
            scale: Vec3::repeat(1.0),
            offset: Vec3::zeros(),
            rotation: None,
            shell_blocks: Vec::new(),
        };
        mesh.decompose()?;
        Ok(mesh)
    }

    /// Create a mesh from a parameter string.
    ///
    /// The string starts with the interval counts `IxJxK`,
    /// followed by any number of options separated by `|` or `+`:
    ///
    /// - `shell:xXyYzZ` adds a shell block on each listed face
    ///   (lowercase for the minimum, uppercase for the maximum side)
    /// - `scale:sx,sy,sz` and `offset:ox,oy,oz` set the affine transform
    /// - `bbox:xmin,ymin,zmin,xmax,ymax,zmax` sets scale and offset
    ///   so that the mesh fills the box
    /// - `zdecomp:n1,n2,...` gives the number of Z intervals for each process explicitly
    /// - `rotate:axis,angle,axis,angle,...` applies rotations (angles in degrees)
    /// - `show` logs the resulting mesh parameters
    /// - `help` logs this list
    ///
    /// Options are applied in order.
    /// Unknown options are logged as warnings and skipped,
    /// but an option with the wrong number of values is an error.
    ///
    /// ```
    /// # use slabworks_core::{GeneratedMesh, ProcessorLayout};
    /// let mesh = GeneratedMesh::from_params(
    ///     "10x10x40|bbox:-1,-1,-4,1,1,4|shell:zZ",
    ///     ProcessorLayout::new(4, 1),
    /// )?;
    /// assert_eq!(mesh.my_num_z(), 10);
    /// assert_eq!(mesh.my_start_z(), 10);
    /// # Ok::<(), slabworks_core::generated_mesh::MeshError>(())
    /// ```
    pub fn from_params(params: &str, layout: ProcessorLayout) -> Result<Self, MeshError> {
        let groups = options::split_groups(params);
        let Some((intervals, rest)) = groups.split_first() else {
            return Err(MeshError::InvalidIntervals(params.to_string()));
        };
        let [num_x, num_y, num_z] = options::parse_intervals(intervals)?;

        let mut mesh = Self::new(num_x, num_y, num_z, layout)?;
        mesh.apply_options(rest)?;
        Ok(mesh)
    }

    /// Split the Z intervals evenly over the processes.
    fn decompose(&mut self) -> Result<(), MeshError> {
        let procs = self.layout.processor_count;
        if self.num_z < procs {
            return Err(MeshError::InsufficientIntervals {
                num_z: self.num_z,
                processor_count: procs,
            });
        }

        let rank = self.layout.my_processor;
        let per_proc = self.num_z / procs;
        let extra = self.num_z % procs;
        self.my_num_z = per_proc + usize::from(rank < extra);
        self.my_start_z = rank * per_proc + rank.min(extra);
        Ok(())
    }

    //
    // configuration
    //

    /// Add a shell block on the given boundary face.
    /// Returns the number of shell blocks in the mesh after adding this one.
    pub fn add_shell_block(&mut self, location: ShellLocation) -> usize {
        self.shell_blocks.push(location);
        self.shell_blocks.len()
    }

    /// Set the spacing of nodes in each direction.
    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
    }

    /// Set the position of the first node.
    pub fn set_offset(&mut self, offset: Vec3) {
        self.offset = offset;
    }

    /// Set scale and offset so that the (unrotated) mesh fills the given box.
    ///
    /// This is based on the interval counts at the time of calling,
    /// so a later change to the Z decomposition or scale overrides it.
    pub fn set_bbox(&mut self, min: Vec3, max: Vec3) {
        let intervals = Vec3::new(self.num_x as f64, self.num_y as f64, self.num_z as f64);
        self.scale = (max - min).component_div(&intervals);
        self.offset = min;
    }

    /// Set the number of Z intervals owned by each process explicitly.
    ///
    /// The total number of Z intervals becomes the sum of the given counts,
    /// which must be at least the number of processes.
    /// On error the mesh is left unchanged.
    pub fn set_z_decomposition(&mut self, intervals: &[usize]) -> Result<(), MeshError> {
        let procs = self.layout.processor_count;
        if intervals.len() != procs {
            return Err(MeshError::WrongTokenCount {
                option: "zdecomp".to_string(),
                expected: format!("{procs} (one per process)"),
                found: intervals.len(),
            });
        }
        let num_z: usize = intervals.iter().sum();
        if num_z < procs {
            return Err(MeshError::InsufficientIntervals {
                num_z,
                processor_count: procs,
            });
        }
        let rank = self.layout.my_processor;
        self.num_z = num_z;
        self.my_num_z = intervals[rank];
        self.my_start_z = intervals[..rank].iter().sum();
        Ok(())
    }

    /// Rotate the mesh by `angle_degrees` around a coordinate axis.
    ///
    /// Rotations accumulate: each call composes a new rotation
    /// with all the ones specified before it.
    pub fn rotate(&mut self, axis: Axis, angle_degrees: f64) {
        // (n1, n2) span the plane of rotation, n3 is the axis itself
        let (n1, n2, n3) = match axis {
            Axis::X => (1, 2, 0),
            Axis::Y => (2, 0, 1),
            Axis::Z => (0, 1, 2),
        };
        let (sin, cos) = angle_degrees.to_radians().sin_cos();

        let mut by = na::Matrix3::zeros();
        by[(n1, n1)] = cos;
        by[(n1, n2)] = sin;
        by[(n2, n1)] = -sin;
        by[(n2, n2)] = cos;
        by[(n3, n3)] = 1.0;

        let current = self.rotation.unwrap_or_else(na::Matrix3::identity);
        self.rotation = Some(current * by);
    }

    /// Rotate the mesh around an axis given by name (`x`, `y` or `z`, case-insensitive).
    ///
    /// An invalid axis leaves the rotation unchanged.
    pub fn set_rotation(&mut self, axis: &str, angle_degrees: f64) -> Result<(), MeshError> {
        let axis: Axis = axis.parse()?;
        self.rotate(axis, angle_degrees);
        Ok(())
    }

    //
    // accessors
    //

    /// Global number of intervals in each direction.
    #[inline]
    pub fn intervals(&self) -> [usize; 3] {
        [self.num_x, self.num_y, self.num_z]
    }

    /// Number of Z intervals in this process's slab.
    #[inline]
    pub fn my_num_z(&self) -> usize {
        self.my_num_z
    }

    /// The first Z interval of this process's slab.
    #[inline]
    pub fn my_start_z(&self) -> usize {
        self.my_start_z
    }

    /// This process's place in the run.
    #[inline]
    pub fn layout(&self) -> ProcessorLayout {
        self.layout
    }

    /// Node spacing in each direction.
    #[inline]
    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    /// Position of the first node before rotation.
    #[inline]
    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    /// The accumulated rotation matrix, if any rotations were applied.
    #[inline]
    pub fn rotation(&self) -> Option<&na::Matrix3<f64>> {
        self.rotation.as_ref()
    }

    /// Locations of the shell blocks, in block order.
    #[inline]
    pub fn shell_blocks(&self) -> &[ShellLocation] {
        &self.shell_blocks
    }

    //
    // counts
    //

    /// Number of nodes in one XY layer of the lattice.
    #[inline]
    fn layer_node_count(&self) -> usize {
        (self.num_x + 1) * (self.num_y + 1)
    }

    /// Global number of nodes.
    pub fn node_count(&self) -> usize {
        self.layer_node_count() * (self.num_z + 1)
    }

    /// Number of nodes in this process's slab,
    /// including the layers shared with neighbouring processes.
    pub fn node_count_proc(&self) -> usize {
        self.layer_node_count() * (self.my_num_z + 1)
    }

    /// Number of element blocks: the hex block plus one per shell block.
    pub fn block_count(&self) -> usize {
        self.shell_blocks.len() + 1
    }

    /// Global number of elements in all blocks.
    pub fn element_count(&self) -> usize {
        (1..=self.block_count())
            .map(|b| self.block_element_count(b))
            .sum()
    }

    /// Number of elements in all blocks in this process's slab.
    pub fn element_count_proc(&self) -> usize {
        (1..=self.block_count())
            .map(|b| self.block_element_count_proc(b))
            .sum()
    }

    /// Global number of elements in a block.
    pub fn block_element_count(&self, block: usize) -> usize {
        match self.block(block) {
            Block::Hex => self.num_x * self.num_y * self.num_z,
            Block::Shell(loc) => self.shell_element_count(loc),
        }
    }

    /// Number of elements of a block in this process's slab.
    pub fn block_element_count_proc(&self, block: usize) -> usize {
        match self.block(block) {
            Block::Hex => self.num_x * self.num_y * self.my_num_z,
            Block::Shell(loc) => self.shell_element_count_proc(loc),
        }
    }

    /// The element type of a block.
    pub fn topology(&self, block: usize) -> Topology {
        match self.block(block) {
            Block::Hex => Topology::Hex8,
            Block::Shell(_) => Topology::Shell4,
        }
    }

    /// Look up a block by its 1-based number.
    fn block(&self, block: usize) -> Block {
        assert!(
            (1..=self.block_count()).contains(&block),
            "block {block} out of range, mesh has {} blocks",
            self.block_count()
        );
        if block == 1 {
            Block::Hex
        } else {
            Block::Shell(self.shell_blocks[block - 2])
        }
    }

    //
    // maps
    //

    /// Global IDs of the nodes in this process's slab,
    /// indexed by their local position.
    pub fn node_map(&self) -> Vec<usize> {
        let offset = self.my_start_z * self.layer_node_count();
        (1..=self.node_count_proc()).map(|i| offset + i).collect()
    }

    /// Nodes shared with the neighbouring processes.
    ///
    /// The first layer of this slab is shared with the process below (rank - 1)
    /// and the last layer with the process above (rank + 1).
    /// The map only describes what needs to be exchanged;
    /// doing the exchange is up to the caller.
    pub fn node_communication_map(&self) -> NodeCommunicationMap {
        let layer = self.layer_node_count();
        let rank = self.layout.my_processor;
        let mut map = NodeCommunicationMap::default();

        if !self.layout.is_first() {
            let first_id = self.my_start_z * layer + 1;
            map.push_layer(first_id, layer, rank - 1);
        }
        if !self.layout.is_last() {
            let first_id = (self.my_start_z + self.my_num_z) * layer + 1;
            map.push_layer(first_id, layer, rank + 1);
        }
        map
    }

    /// Global IDs of the elements of one block in this process's slab.
    pub fn block_element_map(&self, block: usize) -> Vec<usize> {
        let count = self.block_element_count_proc(block);
        let first_id = match self.block(block) {
            Block::Hex => self.my_start_z * self.num_x * self.num_y + 1,
            Block::Shell(loc) => {
                // shell IDs follow the hex block and all shell blocks before this one
                let preceding: usize = (1..block).map(|b| self.block_element_count(b)).sum();
                preceding + self.shell_id_offset(loc) + 1
            }
        };
        (first_id..first_id + count).collect()
    }

    /// Global IDs of the elements in all blocks in this process's slab,
    /// in block order.
    pub fn element_map(&self) -> Vec<usize> {
        let mut map = Vec::with_capacity(self.element_count_proc());
        for block in 1..=self.block_count() {
            map.extend(self.block_element_map(block));
        }
        map
    }

    //
    // geometry
    //

    /// Element connectivity of a block,
    /// given as 1-based indices into this process's nodes.
    ///
    /// Hexes list their bottom face counterclockwise (seen from above)
    /// followed by the top face in the same order,
    /// shells list their nodes counterclockwise
    /// seen from outside the mesh.
    pub fn connectivity(&self, block: usize) -> Vec<usize> {
        match self.block(block) {
            Block::Hex => self.hex_connectivity(),
            Block::Shell(loc) => self.shell_connectivity(loc),
        }
    }

    fn hex_connectivity(&self) -> Vec<usize> {
        let nx = self.num_x;
        let layer = self.layer_node_count();

        let mut connect = Vec::with_capacity(self.block_element_count_proc(1) * 8);
        for (k, j, i) in iproduct!(0..self.my_num_z, 0..self.num_y, 0..nx) {
            let base = k * layer + j * (nx + 1) + i + 1;
            let bottom = [base, base + 1, base + nx + 2, base + nx + 1];
            connect.extend_from_slice(&bottom);
            connect.extend(bottom.iter().map(|n| n + layer));
        }
        connect
    }

    /// Coordinates of the nodes in this process's slab.
    pub fn coordinates(&self) -> Vec<Vec3> {
        iproduct!(
            self.my_start_z..=self.my_start_z + self.my_num_z,
            0..=self.num_y,
            0..=self.num_x
        )
        .map(|(k, j, i)| {
            let lattice = Vec3::new(i as f64, j as f64, k as f64);
            let pos = self.scale.component_mul(&lattice) + self.offset;
            match &self.rotation {
                // positions are rotated as row vectors, i.e. pos^T * R
                Some(rot) => rot.tr_mul(&pos),
                None => pos,
            }
        })
        .collect()
    }

    /// Coordinates of the nodes in this process's slab
    /// as separate arrays of x, y and z components.
    pub fn coordinate_components(&self) -> [Vec<f64>; 3] {
        let coords = self.coordinates();
        [0, 1, 2].map(|axis| coords.iter().map(|c| c[axis]).collect())
    }
}

impl std::fmt::Display for GeneratedMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Mesh Parameters:")?;
        writeln!(
            f,
            "\tIntervals: {} by {} by {}",
            self.num_x, self.num_y, self.num_z
        )?;
        for (name, intervals, scale, offset) in [
            ("X", self.num_x, self.scale.x, self.offset.x),
            ("Y", self.num_y, self.scale.y, self.offset.y),
            ("Z", self.num_z, self.scale.z, self.offset.z),
        ] {
            writeln!(
                f,
                "\t{name} = {scale} * (0..{intervals}) + {offset}\tRange: {offset} <= {name} <= {}",
                offset + intervals as f64 * scale
            )?;
        }
        writeln!(f)?;
        writeln!(f, "\tNode Count (total)    = {:>9}", self.node_count())?;
        writeln!(f, "\tElement Count (total) = {:>9}", self.element_count())?;
        writeln!(f, "\tBlock Count           = {:>9}", self.block_count())?;
        if let Some(rot) = &self.rotation {
            writeln!(f, "\tRotation Matrix:")?;
            for row in rot.row_iter() {
                writeln!(
                    f,
                    "\t{:>14.6e}\t{:>14.6e}\t{:>14.6e}",
                    row[0], row[1], row[2]
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashSet;

    fn all_shells(nx: usize, ny: usize, nz: usize, layout: ProcessorLayout) -> GeneratedMesh {
        let mut mesh = GeneratedMesh::new(nx, ny, nz, layout).unwrap();
        for loc in ShellLocation::ALL {
            mesh.add_shell_block(loc);
        }
        mesh
    }

    #[test]
    fn small_cube_counts() {
        let mut mesh = GeneratedMesh::new(2, 2, 2, ProcessorLayout::serial()).unwrap();
        assert_eq!(mesh.node_count(), 27);
        assert_eq!(mesh.node_count_proc(), 27);
        assert_eq!(mesh.element_count(), 8);
        assert_eq!(mesh.block_count(), 1);
        assert_eq!(mesh.topology(1), Topology::Hex8);

        assert_eq!(mesh.add_shell_block(ShellLocation::MinX), 1);
        assert_eq!(mesh.add_shell_block(ShellLocation::MaxX), 2);
        assert_eq!(mesh.block_count(), 3);
        for block in 2..=3 {
            assert_eq!(mesh.block_element_count(block), 4);
            assert_eq!(mesh.topology(block), Topology::Shell4);
        }
        assert_eq!(mesh.element_count(), 16);
    }

    #[test]
    fn too_few_z_intervals_is_an_error() {
        assert_eq!(
            GeneratedMesh::new(4, 4, 2, ProcessorLayout::new(3, 0)).unwrap_err(),
            MeshError::InsufficientIntervals {
                num_z: 2,
                processor_count: 3
            }
        );
        assert!(GeneratedMesh::new(0, 4, 4, ProcessorLayout::serial()).is_err());
    }

    #[test]
    #[should_panic]
    fn block_out_of_range_panics() {
        let mesh = GeneratedMesh::new(1, 1, 1, ProcessorLayout::serial()).unwrap();
        mesh.block_element_count(2);
    }

    #[test]
    fn slabs_partition_z_exactly() {
        for (nz, procs) in [(7, 3), (8, 4), (5, 5), (13, 1), (10, 4)] {
            let mut next_start = 0;
            for layout in ProcessorLayout::all(procs) {
                let mesh = GeneratedMesh::new(2, 3, nz, layout).unwrap();
                assert_eq!(mesh.my_start_z(), next_start, "gap before rank {layout:?}");
                assert!(mesh.my_num_z() >= 1);
                next_start += mesh.my_num_z();
            }
            assert_eq!(next_start, nz, "slabs of {nz} over {procs} don't add up");
        }
    }

    #[test]
    fn per_process_counts_sum_to_global() {
        for (nx, ny, nz, procs) in [(2, 2, 2, 1), (3, 2, 7, 3), (1, 4, 4, 4), (5, 3, 9, 2)] {
            let meshes: Vec<GeneratedMesh> = ProcessorLayout::all(procs)
                .map(|layout| all_shells(nx, ny, nz, layout))
                .collect();
            let global = &meshes[0];

            for block in 1..=global.block_count() {
                let sum: usize = meshes
                    .iter()
                    .map(|m| m.block_element_count_proc(block))
                    .sum();
                assert_eq!(sum, global.block_element_count(block), "block {block}");
            }

            let node_sum: usize = meshes.iter().map(|m| m.node_count_proc()).sum();
            let layer = (nx + 1) * (ny + 1);
            assert_eq!(node_sum, global.node_count() + (procs - 1) * layer);
        }
    }

    #[test]
    fn node_ownership_overlaps_only_at_shared_layers() {
        let (nx, ny, nz, procs) = (3, 2, 8, 3);
        let meshes: Vec<GeneratedMesh> = ProcessorLayout::all(procs)
            .map(|layout| GeneratedMesh::new(nx, ny, nz, layout).unwrap())
            .collect();

        let mut seen: HashSet<usize> = HashSet::new();
        let mut duplicates: HashSet<usize> = HashSet::new();
        for mesh in &meshes {
            for id in mesh.node_map() {
                if !seen.insert(id) {
                    duplicates.insert(id);
                }
            }
        }
        assert_eq!(seen, (1..=meshes[0].node_count()).collect());

        // every duplicated node is in the communication maps of both owners
        let mut shared: HashSet<usize> = HashSet::new();
        for (rank, mesh) in meshes.iter().enumerate() {
            let node_ids: HashSet<usize> = mesh.node_map().into_iter().collect();
            for (id, other) in mesh.node_communication_map().iter() {
                assert!(node_ids.contains(&id), "rank {rank} doesn't own node {id}");
                let other_ids = meshes[other].node_map();
                assert!(other_ids.contains(&id), "rank {other} doesn't own node {id}");
                shared.insert(id);
            }
        }
        assert_eq!(shared, duplicates);
    }

    #[test]
    fn communication_maps() {
        let (nx, ny) = (2, 1);
        let layer = (nx + 1) * (ny + 1);

        let serial = GeneratedMesh::new(nx, ny, 3, ProcessorLayout::serial()).unwrap();
        assert!(serial.node_communication_map().is_empty());

        let middle = GeneratedMesh::new(nx, ny, 3, ProcessorLayout::new(3, 1)).unwrap();
        let map = middle.node_communication_map();
        assert_eq!(map.len(), 2 * layer);
        let expected: Vec<(usize, usize)> = (layer + 1..=2 * layer)
            .map(|id| (id, 0))
            .chain((2 * layer + 1..=3 * layer).map(|id| (id, 2)))
            .collect();
        itertools::assert_equal(map.iter(), expected);

        let last = GeneratedMesh::new(nx, ny, 3, ProcessorLayout::new(3, 2)).unwrap();
        assert_eq!(last.node_communication_map().len(), layer);
        assert!(last.node_communication_map().processors.iter().all(|&p| p == 1));
    }

    #[test]
    fn element_ids_are_globally_unique() {
        let (nx, ny, nz, procs) = (2, 3, 5, 2);
        let mut ids: Vec<usize> = ProcessorLayout::all(procs)
            .flat_map(|layout| all_shells(nx, ny, nz, layout).element_map())
            .collect();
        let total = all_shells(nx, ny, nz, ProcessorLayout::serial()).element_count();
        ids.sort_unstable();
        itertools::assert_equal(ids, 1..=total);
    }

    #[test]
    fn block_maps_concatenate_to_element_map() {
        let mesh = all_shells(2, 2, 4, ProcessorLayout::new(2, 1));
        let concatenated: Vec<usize> = (1..=mesh.block_count())
            .flat_map(|b| mesh.block_element_map(b))
            .collect();
        assert_eq!(concatenated, mesh.element_map());
        assert_eq!(mesh.element_map().len(), mesh.element_count_proc());
    }

    #[test]
    fn single_hex_connectivity() {
        let mesh = GeneratedMesh::new(1, 1, 1, ProcessorLayout::serial()).unwrap();
        assert_eq!(mesh.connectivity(1), vec![1, 2, 4, 3, 5, 6, 8, 7]);
    }

    #[test]
    fn connectivity_refers_to_local_nodes() {
        for layout in ProcessorLayout::all(3) {
            let mesh = all_shells(3, 2, 6, layout);
            let local_count = mesh.node_count_proc();
            for block in 1..=mesh.block_count() {
                let conn = mesh.connectivity(block);
                let per_elem = mesh.topology(block).node_count();
                assert_eq!(conn.len(), mesh.block_element_count_proc(block) * per_elem);
                assert!(
                    conn.iter().all(|&n| (1..=local_count).contains(&n)),
                    "block {block} on {layout:?} refers to nodes outside the slab"
                );
            }
        }
    }

    #[test]
    fn hex_elements_have_unit_extent() {
        let mesh = GeneratedMesh::new(3, 2, 4, ProcessorLayout::new(2, 1)).unwrap();
        let coords = mesh.coordinates();
        for hex in mesh.connectivity(1).chunks_exact(8) {
            let first = coords[hex[0] - 1];
            let opposite = coords[hex[6] - 1];
            assert_relative_eq!(opposite - first, Vec3::new(1.0, 1.0, 1.0));
        }
    }

    #[test]
    fn untransformed_coordinates_are_lattice_indices() {
        let mesh = GeneratedMesh::new(2, 3, 4, ProcessorLayout::new(2, 1)).unwrap();
        let coords = mesh.coordinates();
        assert_eq!(coords.len(), mesh.node_count_proc());
        let expected = iproduct!(2..=4, 0..=3, 0..=2)
            .map(|(k, j, i)| Vec3::new(i as f64, j as f64, k as f64));
        for (c, e) in coords.iter().zip(expected) {
            assert_eq!(*c, e);
        }

        let [x, y, z] = mesh.coordinate_components();
        assert_eq!(x[4], coords[4].x);
        assert_eq!(y[7], coords[7].y);
        assert_eq!(z[13], coords[13].z);
    }

    #[test]
    fn scale_offset_and_bbox() {
        let mut mesh = GeneratedMesh::new(2, 4, 5, ProcessorLayout::serial()).unwrap();
        mesh.set_scale(Vec3::new(0.5, 2.0, 1.0));
        mesh.set_offset(Vec3::new(1.0, -1.0, 0.0));
        let last = *mesh.coordinates().last().unwrap();
        assert_relative_eq!(last, Vec3::new(2.0, 7.0, 5.0));

        mesh.set_bbox(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 3.0, 9.0));
        let coords = mesh.coordinates();
        assert_relative_eq!(coords[0], Vec3::new(-1.0, -1.0, -1.0));
        assert_relative_eq!(*coords.last().unwrap(), Vec3::new(1.0, 3.0, 9.0));
    }

    #[test]
    fn rotation_about_z() {
        let mut mesh = GeneratedMesh::new(1, 1, 1, ProcessorLayout::serial()).unwrap();
        mesh.rotate(Axis::Z, 90.0);
        // node 2 sits at (1, 0, 0) and should be carried onto the y axis
        let coords = mesh.coordinates();
        assert_relative_eq!(coords[1], Vec3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        // and node 3 at (0, 1, 0) onto the negative x axis
        assert_relative_eq!(coords[2], Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn opposite_rotations_cancel() {
        let reference = GeneratedMesh::new(3, 2, 2, ProcessorLayout::serial()).unwrap();
        for axis in ["x", "Y", "z"] {
            let mut mesh = reference.clone();
            mesh.set_rotation(axis, 37.5).unwrap();
            mesh.set_rotation(axis, -37.5).unwrap();
            for (rotated, original) in mesh.coordinates().iter().zip(reference.coordinates()) {
                assert_relative_eq!(*rotated, original, epsilon = 1e-12);
            }
        }

        // rotations preserve distances from the origin
        let mut mesh = reference.clone();
        mesh.rotate(Axis::X, 30.0);
        mesh.rotate(Axis::Y, 45.0);
        for (rotated, original) in mesh.coordinates().iter().zip(reference.coordinates()) {
            assert_relative_eq!(rotated.norm(), original.norm(), epsilon = 1e-12);
        }
    }

    #[test]
    fn invalid_rotation_axis() {
        let mut mesh = GeneratedMesh::new(1, 1, 1, ProcessorLayout::serial()).unwrap();
        assert_eq!(
            mesh.set_rotation("w", 45.0),
            Err(MeshError::InvalidAxis("w".to_string()))
        );
        assert!(mesh.rotation().is_none());
    }

    #[test]
    fn explicit_z_decomposition() {
        let mut mesh = GeneratedMesh::new(2, 2, 4, ProcessorLayout::new(3, 2)).unwrap();
        mesh.set_z_decomposition(&[1, 3, 2]).unwrap();
        assert_eq!(mesh.intervals(), [2, 2, 6]);
        assert_eq!(mesh.my_start_z(), 4);
        assert_eq!(mesh.my_num_z(), 2);

        assert!(mesh.set_z_decomposition(&[1, 2]).is_err());
    }

    #[test]
    fn z_decomposition_needs_an_interval_per_process() {
        assert_eq!(
            GeneratedMesh::from_params("4x4x4|zdecomp:1,0,0", ProcessorLayout::new(3, 2))
                .unwrap_err(),
            MeshError::InsufficientIntervals {
                num_z: 1,
                processor_count: 3
            }
        );
        assert_eq!(
            GeneratedMesh::from_params("2x2x2|zdecomp:0", ProcessorLayout::serial()).unwrap_err(),
            MeshError::InsufficientIntervals {
                num_z: 0,
                processor_count: 1
            }
        );

        // a rejected decomposition leaves the previous one in place
        let mut mesh = GeneratedMesh::new(2, 2, 2, ProcessorLayout::serial()).unwrap();
        mesh.add_shell_block(ShellLocation::MaxZ);
        assert!(mesh.set_z_decomposition(&[0]).is_err());
        assert_eq!(mesh.intervals(), [2, 2, 2]);
        assert_eq!(mesh.element_surface_map(ShellLocation::MaxZ).len(), 4);
    }

    #[test]
    fn display_summarizes_mesh() {
        let mut mesh = GeneratedMesh::new(2, 3, 4, ProcessorLayout::serial()).unwrap();
        mesh.rotate(Axis::Y, 10.0);
        let shown = format!("{mesh}");
        assert!(shown.contains("Intervals: 2 by 3 by 4"));
        assert!(shown.contains("Node Count (total)    =        60"));
        assert!(shown.contains("Rotation Matrix"));
    }
}
