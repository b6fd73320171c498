//! Sparse operators built on the node lattice of a [`GeneratedMesh`].

use fixedbitset as fb;
use itertools::iproduct;
use nalgebra_sparse as nas;

use crate::generated_mesh::{GeneratedMesh, ShellLocation};

/// The 7-point graph Laplacian on the nodes of this process's slab.
///
/// Every node gets 6 on the diagonal and -1 for each lattice neighbour
/// within the slab. Nodes on the edge of the slab have fewer neighbours,
/// which amounts to a Dirichlet condition just outside it,
/// so the matrix is symmetric positive definite.
/// Rows are indexed by 0-based local node indices,
/// in the same order as [`GeneratedMesh::coordinates`].
pub fn lattice_laplacian(mesh: &GeneratedMesh) -> nas::CsrMatrix<f64> {
    let [nx, ny, _] = mesh.intervals();
    let dims = [nx + 1, ny + 1, mesh.my_num_z() + 1];
    let node_count = mesh.node_count_proc();
    let index = |i: usize, j: usize, k: usize| (k * dims[1] + j) * dims[0] + i;

    let mut coo = nas::CooMatrix::new(node_count, node_count);
    for (k, j, i) in iproduct!(0..dims[2], 0..dims[1], 0..dims[0]) {
        let row = index(i, j, k);
        coo.push(row, row, 6.0);
        let neighbours = [
            (i > 0).then(|| index(i - 1, j, k)),
            (i + 1 < dims[0]).then(|| index(i + 1, j, k)),
            (j > 0).then(|| index(i, j - 1, k)),
            (j + 1 < dims[1]).then(|| index(i, j + 1, k)),
            (k > 0).then(|| index(i, j, k - 1)),
            (k + 1 < dims[2]).then(|| index(i, j, k + 1)),
        ];
        for col in neighbours.into_iter().flatten() {
            coo.push(row, col, -1.0);
        }
    }
    nas::CsrMatrix::from(&coo)
}

/// Local indices of the nodes on any boundary face of the mesh
/// that lie in this process's slab.
pub fn boundary_nodes(mesh: &GeneratedMesh) -> fb::FixedBitSet {
    let mut nodes = fb::FixedBitSet::with_capacity(mesh.node_count_proc());
    for loc in ShellLocation::ALL {
        nodes.union_with(&mesh.face_nodes(loc));
    }
    nodes
}

/// Replace the given rows of a matrix with rows of the identity matrix,
/// e.g. to impose Dirichlet boundary conditions.
///
/// Only rows are touched, so a symmetric matrix generally becomes nonsymmetric.
///
/// Panics if the matrix isn't square.
pub fn constrain_rows(
    mat: nas::CsrMatrix<f64>,
    rows_to_constrain: &fb::FixedBitSet,
) -> nas::CsrMatrix<f64> {
    let num_rows = mat.nrows();
    let num_cols = mat.ncols();
    assert_eq!(num_rows, num_cols, "only square matrices can be constrained");
    let (row_offsets, col_indices, values) = mat.disassemble();

    let mut new_offsets = Vec::with_capacity(num_rows + 1);
    let mut new_cols = Vec::with_capacity(col_indices.len());
    let mut new_values = Vec::with_capacity(values.len());
    new_offsets.push(0);
    for row_idx in 0..num_rows {
        if rows_to_constrain.contains(row_idx) {
            new_cols.push(row_idx);
            new_values.push(1.0);
        } else {
            let row_range = row_offsets[row_idx]..row_offsets[row_idx + 1];
            new_cols.extend_from_slice(&col_indices[row_range.clone()]);
            new_values.extend_from_slice(&values[row_range]);
        }
        new_offsets.push(new_cols.len());
    }

    // column indices within each row stay sorted and in bounds,
    // so this can't fail
    nas::CsrMatrix::try_from_csr_data(num_rows, num_cols, new_offsets, new_cols, new_values)
        .unwrap()
}
