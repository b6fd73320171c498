//! Shell blocks on the boundary faces of a [`GeneratedMesh`].

use fixedbitset as fb;
use itertools::iproduct;

use super::GeneratedMesh;
use crate::Vec3;

/// The boundary face a shell block is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShellLocation {
    /// The face at x = 0 in lattice coordinates.
    MinX,
    /// The face at x = `num_x`.
    MaxX,
    /// The face at y = 0.
    MinY,
    /// The face at y = `num_y`.
    MaxY,
    /// The face at z = 0.
    MinZ,
    /// The face at z = `num_z`.
    MaxZ,
}

/// The nodes of each face of a hex element,
/// as 1-based positions in the element's connectivity.
///
/// Each face is ordered counterclockwise seen from outside the element.
/// [`ShellLocation::hex_face`] gives the index of the face
/// that lies on each boundary of the mesh.
pub const HEX_FACE_NODES: [[usize; 4]; 6] = [
    [1, 2, 6, 5],
    [2, 3, 7, 6],
    [3, 4, 8, 7],
    [4, 1, 5, 8],
    [4, 3, 2, 1],
    [5, 6, 7, 8],
];

impl ShellLocation {
    /// All locations in the order `x X y Y z Z`.
    pub const ALL: [Self; 6] = [
        Self::MinX,
        Self::MaxX,
        Self::MinY,
        Self::MaxY,
        Self::MinZ,
        Self::MaxZ,
    ];

    /// Parse the character used for this location in mesh parameter strings.
    /// Lowercase is the minimum side and uppercase the maximum.
    pub fn from_char(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|loc| loc.as_char() == c)
    }

    /// The character for this location in mesh parameter strings.
    pub fn as_char(self) -> char {
        match self {
            Self::MinX => 'x',
            Self::MaxX => 'X',
            Self::MinY => 'y',
            Self::MaxY => 'Y',
            Self::MinZ => 'z',
            Self::MaxZ => 'Z',
        }
    }

    /// The 0-based index in [`HEX_FACE_NODES`] of the hex face on this boundary.
    pub fn hex_face(self) -> usize {
        match self {
            Self::MinY => 0,
            Self::MaxX => 1,
            Self::MaxY => 2,
            Self::MinX => 3,
            Self::MinZ => 4,
            Self::MaxZ => 5,
        }
    }

    /// Unit normal pointing out of the mesh on this boundary
    /// (before rotation).
    pub fn outward_normal(self) -> Vec3 {
        match self {
            Self::MinX => -Vec3::x(),
            Self::MaxX => Vec3::x(),
            Self::MinY => -Vec3::y(),
            Self::MaxY => Vec3::y(),
            Self::MinZ => -Vec3::z(),
            Self::MaxZ => Vec3::z(),
        }
    }
}

impl GeneratedMesh {
    pub(super) fn shell_element_count(&self, loc: ShellLocation) -> usize {
        use ShellLocation::*;
        match loc {
            MinX | MaxX => self.num_y * self.num_z,
            MinY | MaxY => self.num_x * self.num_z,
            MinZ | MaxZ => self.num_x * self.num_y,
        }
    }

    pub(super) fn shell_element_count_proc(&self, loc: ShellLocation) -> usize {
        use ShellLocation::*;
        match loc {
            MinX | MaxX => self.num_y * self.my_num_z,
            MinY | MaxY => self.num_x * self.my_num_z,
            MinZ if self.layout.is_first() => self.num_x * self.num_y,
            MaxZ if self.layout.is_last() => self.num_x * self.num_y,
            MinZ | MaxZ => 0,
        }
    }

    /// Number of elements of a shell block owned by lower-ranked processes.
    pub(super) fn shell_id_offset(&self, loc: ShellLocation) -> usize {
        use ShellLocation::*;
        match loc {
            MinX | MaxX => self.my_start_z * self.num_y,
            MinY | MaxY => self.my_start_z * self.num_x,
            MinZ | MaxZ => 0,
        }
    }

    pub(super) fn shell_connectivity(&self, loc: ShellLocation) -> Vec<usize> {
        use ShellLocation::*;
        let (nx, ny) = (self.num_x, self.num_y);
        let layer = self.layer_node_count();
        let row = nx + 1;

        let mut connect = Vec::with_capacity(self.shell_element_count_proc(loc) * 4);
        match loc {
            MinX => {
                for (k, j) in iproduct!(0..self.my_num_z, 0..ny) {
                    let b = k * layer + j * row + 1;
                    connect.extend_from_slice(&[b, b + layer, b + layer + row, b + row]);
                }
            }
            MaxX => {
                for (k, j) in iproduct!(0..self.my_num_z, 0..ny) {
                    let b = k * layer + j * row + nx + 1;
                    connect.extend_from_slice(&[b, b + row, b + layer + row, b + layer]);
                }
            }
            MinY => {
                for (k, i) in iproduct!(0..self.my_num_z, 0..nx) {
                    let b = k * layer + i + 1;
                    connect.extend_from_slice(&[b, b + 1, b + layer + 1, b + layer]);
                }
            }
            MaxY => {
                for (k, i) in iproduct!(0..self.my_num_z, 0..nx) {
                    let b = k * layer + ny * row + i + 1;
                    connect.extend_from_slice(&[b, b + layer, b + layer + 1, b + 1]);
                }
            }
            MinZ => {
                if self.layout.is_first() {
                    for (j, i) in iproduct!(0..ny, 0..nx) {
                        let b = j * row + i + 1;
                        connect.extend_from_slice(&[b, b + row, b + row + 1, b + 1]);
                    }
                }
            }
            MaxZ => {
                if self.layout.is_last() {
                    for (j, i) in iproduct!(0..ny, 0..nx) {
                        let b = self.my_num_z * layer + j * row + i + 1;
                        connect.extend_from_slice(&[b, b + 1, b + row + 1, b + row]);
                    }
                }
            }
        }
        connect
    }

    /// For each shell element this process owns at a location,
    /// the global 1-based ID of the hex element under it
    /// and the 0-based index of the hex face it covers.
    ///
    /// Entries are in the same order as the shell block's connectivity,
    /// so the `n`th entry describes the `n`th shell element.
    /// The face index is the same for every entry,
    /// namely [`loc.hex_face()`][ShellLocation::hex_face].
    pub fn element_surface_map(&self, loc: ShellLocation) -> Vec<(usize, usize)> {
        use ShellLocation::*;
        let (nx, ny, nz) = (self.num_x, self.num_y, self.num_z);
        let layer = nx * ny;
        let face = loc.hex_face();
        let slab = self.my_start_z..self.my_start_z + self.my_num_z;

        let hex_ids: Vec<usize> = match loc {
            MinX => iproduct!(slab, 0..ny)
                .map(|(k, j)| k * layer + j * nx + 1)
                .collect(),
            MaxX => iproduct!(slab, 0..ny)
                .map(|(k, j)| k * layer + j * nx + nx)
                .collect(),
            MinY => iproduct!(slab, 0..nx)
                .map(|(k, i)| k * layer + i + 1)
                .collect(),
            MaxY => iproduct!(slab, 0..nx)
                .map(|(k, i)| k * layer + (ny - 1) * nx + i + 1)
                .collect(),
            MinZ if self.layout.is_first() => (1..=layer).collect(),
            MaxZ if self.layout.is_last() => {
                let first = (nz - 1) * layer;
                (first + 1..=first + layer).collect()
            }
            MinZ | MaxZ => Vec::new(),
        };
        hex_ids.into_iter().map(|id| (id, face)).collect()
    }

    /// The nodes of this process's slab that lie on a boundary face,
    /// as a set of 0-based local node indices.
    ///
    /// Z faces are only present on the first (`MinZ`) or last (`MaxZ`) process;
    /// elsewhere the set is empty.
    pub fn face_nodes(&self, loc: ShellLocation) -> fb::FixedBitSet {
        use ShellLocation::*;
        let (nx, ny, nz) = (self.num_x, self.num_y, self.my_num_z);
        let layer = self.layer_node_count();
        let index = |i: usize, j: usize, k: usize| k * layer + j * (nx + 1) + i;

        let mut set = fb::FixedBitSet::with_capacity(self.node_count_proc());
        match loc {
            MinX | MaxX => {
                let i = if loc == MinX { 0 } else { nx };
                for (k, j) in iproduct!(0..=nz, 0..=ny) {
                    set.insert(index(i, j, k));
                }
            }
            MinY | MaxY => {
                let j = if loc == MinY { 0 } else { ny };
                for (k, i) in iproduct!(0..=nz, 0..=nx) {
                    set.insert(index(i, j, k));
                }
            }
            MinZ => {
                if self.layout.is_first() {
                    set.insert_range(0..layer);
                }
            }
            MaxZ => {
                if self.layout.is_last() {
                    set.insert_range(nz * layer..(nz + 1) * layer);
                }
            }
        }
        set
    }
}
