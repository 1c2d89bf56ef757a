//! Structured simplex meshes of boxes.
//!
//! Box entities are classified on the box model: each vertex gets a code per
//! axis (0 interior, 1 on the low face, 2 on the high face); the model
//! entity dimension is the mesh dimension minus the number of non-zero codes
//! and the id is `sum(code[axis] * 3^axis)`. An edge is classified on the
//! codes its two endpoints share.

use super::{Class, Mesh, MeshParts};
use crate::comm::{CommPtr, Communicator};
use crate::mesh_error::MeshError;
use crate::metric::matrix::{Matrix, sub};
use std::collections::BTreeMap;

fn axis_code(i: usize, n: usize) -> usize {
    match i {
        0 => 1,
        _ if i == n => 2,
        _ => 0,
    }
}

fn class_of_codes(dim: usize, codes: &[usize]) -> Class {
    let nonzero = codes.iter().filter(|&&c| c != 0).count();
    let id = codes
        .iter()
        .enumerate()
        .map(|(axis, &c)| c * 3usize.pow(axis as u32))
        .sum();
    Class::new(dim - nonzero, id)
}

fn shared_codes(a: &[usize], b: &[usize]) -> Vec<usize> {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| if x == y { x } else { 0 })
        .collect()
}

/// Grid description shared by the serial and partitioned builders.
struct Grid {
    dim: usize,
    lengths: Vec<f64>,
    counts: Vec<usize>,
}

impl Grid {
    fn new(dim: usize, lengths: &[f64], counts: &[usize]) -> Result<Self, MeshError> {
        if !(1..=3).contains(&dim) {
            return Err(MeshError::UnsupportedDimension {
                mesh_dim: dim,
                metric_dim: dim,
            });
        }
        if lengths.len() != dim || counts.len() != dim {
            return Err(MeshError::SizeMismatch {
                what: "box lengths/counts",
                expected: dim,
                found: lengths.len().min(counts.len()),
            });
        }
        if counts.contains(&0) || lengths.iter().any(|&l| !(l > 0.0)) {
            return Err(MeshError::InvalidParameter {
                name: "box",
                reason: format!("need positive lengths and counts, got {lengths:?} / {counts:?}"),
            });
        }
        Ok(Self {
            dim,
            lengths: lengths.to_vec(),
            counts: counts.to_vec(),
        })
    }

    /// Grid point index along each axis of global vertex `g`.
    fn ijk(&self, mut g: usize) -> Vec<usize> {
        self.counts
            .iter()
            .map(|&n| {
                let i = g % (n + 1);
                g /= n + 1;
                i
            })
            .collect()
    }

    fn global(&self, ijk: &[usize]) -> usize {
        ijk.iter()
            .zip(&self.counts)
            .rev()
            .fold(0, |acc, (&i, &n)| acc * (n + 1) + i)
    }

    fn point(&self, ijk: &[usize]) -> Vec<f64> {
        ijk.iter()
            .enumerate()
            .map(|(a, &i)| self.lengths[a] * i as f64 / self.counts[a] as f64)
            .collect()
    }

    fn codes(&self, ijk: &[usize]) -> Vec<usize> {
        ijk.iter()
            .zip(&self.counts)
            .map(|(&i, &n)| axis_code(i, n))
            .collect()
    }

    /// Simplices of cell `cell` (lower corner grid indices), as global ids,
    /// positively oriented.
    fn cell_simplices(&self, cell: &[usize]) -> Vec<Vec<usize>> {
        let corner = |offs: &[usize]| -> usize {
            let ijk: Vec<usize> = cell.iter().zip(offs).map(|(c, o)| c + o).collect();
            self.global(&ijk)
        };
        match self.dim {
            1 => vec![vec![corner(&[0]), corner(&[1])]],
            2 => {
                let (v00, v10, v11, v01) = (
                    corner(&[0, 0]),
                    corner(&[1, 0]),
                    corner(&[1, 1]),
                    corner(&[0, 1]),
                );
                vec![vec![v00, v10, v11], vec![v00, v11, v01]]
            }
            _ => {
                // Kuhn subdivision along the main diagonal
                const PERMS: [[usize; 3]; 6] =
                    [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
                PERMS
                    .iter()
                    .map(|perm| {
                        let mut offs = [0usize; 3];
                        let mut tet = vec![corner(&offs)];
                        for &axis in perm {
                            offs[axis] = 1;
                            tet.push(corner(&offs));
                        }
                        if self.tet_volume(&tet) < 0.0 {
                            tet.swap(2, 3);
                        }
                        tet
                    })
                    .collect()
            }
        }
    }

    fn tet_volume(&self, tet: &[usize]) -> f64 {
        let p: Vec<[f64; 3]> = tet
            .iter()
            .map(|&g| {
                let x = self.point(&self.ijk(g));
                [x[0], x[1], x[2]]
            })
            .collect();
        Matrix::<3>([sub(&p[1], &p[0]), sub(&p[2], &p[0]), sub(&p[3], &p[0])]).determinant()
    }

    fn cells(&self, ranges: &[(usize, usize)]) -> Vec<Vec<usize>> {
        ranges.iter().fold(vec![Vec::new()], |acc, &(lo, hi)| {
            acc.into_iter()
                .flat_map(|prefix| {
                    (lo..hi).map(move |i| {
                        let mut c = prefix.clone();
                        c.push(i);
                        c
                    })
                })
                .collect()
        })
    }
}

/// Serial simplex mesh of the box `[0, lengths]` with `counts` cells per axis.
pub fn build_box<C: Communicator>(
    comm: CommPtr<C>,
    dim: usize,
    lengths: &[f64],
    counts: &[usize],
) -> Result<Mesh<C>, MeshError> {
    if comm.size() != 1 {
        return Err(MeshError::Unsupported(
            "build_box on more than one rank; use build_box_partitioned",
        ));
    }
    let grid = Grid::new(dim, lengths, counts)?;
    let nverts: usize = grid.counts.iter().map(|n| n + 1).product();
    let all: Vec<(usize, usize)> = grid.counts.iter().map(|&n| (0, n)).collect();
    let elem_verts: Vec<usize> = grid
        .cells(&all)
        .iter()
        .flat_map(|c| grid.cell_simplices(c))
        .flatten()
        .collect();
    let coords: Vec<f64> = (0..nverts).flat_map(|g| grid.point(&grid.ijk(g))).collect();
    let mut parts = MeshParts::serial(dim, coords, elem_verts);
    let codes: Vec<Vec<usize>> = (0..nverts).map(|g| grid.codes(&grid.ijk(g))).collect();
    parts.vert_class = codes.iter().map(|c| class_of_codes(dim, c)).collect();
    parts.edge_classes = boundary_edge_classes(dim, &parts.elem_verts, |v| codes[v].as_slice());
    Mesh::from_parts(comm, parts)
}

fn boundary_edge_classes<'a>(
    dim: usize,
    elem_verts: &[usize],
    codes: impl Fn(usize) -> &'a [usize],
) -> BTreeMap<[usize; 2], Class> {
    let local = super::quality::element_edges(dim);
    let mut out = BTreeMap::new();
    for elem in elem_verts.chunks(dim + 1) {
        for &[i, j] in local {
            let (a, b) = (elem[i].min(elem[j]), elem[i].max(elem[j]));
            let class = class_of_codes(dim, &shared_codes(codes(a), codes(b)));
            if class.dim < dim {
                out.insert([a, b], class);
            }
        }
    }
    out
}

fn column_range(rank: usize, size: usize, nx: usize) -> (usize, usize) {
    (rank * nx / size, (rank + 1) * nx / size)
}

fn column_owner(col: usize, size: usize, nx: usize) -> usize {
    (0..size)
        .find(|&r| {
            let (lo, hi) = column_range(r, size, nx);
            (lo..hi).contains(&col)
        })
        .unwrap_or(size - 1)
}

/// Local vertex columns `[lo, hi]` (inclusive) held by `rank`.
fn vertex_columns(rank: usize, size: usize, nx: usize) -> (usize, usize) {
    let (c0, c1) = column_range(rank, size, nx);
    (c0.saturating_sub(1), (c1 + 1).min(nx))
}

/// Collective. 2-D unit square of `nx * ny` cells split into vertical strips
/// of cell columns, one strip per rank, each ghosted one column deep on both
/// sides. Every owned vertex has all of its elements locally.
pub fn build_box_partitioned<C: Communicator>(
    comm: CommPtr<C>,
    nx: usize,
    ny: usize,
) -> Result<Mesh<C>, MeshError> {
    let grid = Grid::new(2, &[1.0, 1.0], &[nx, ny])?;
    let (rank, size) = (comm.rank(), comm.size());
    if nx < size {
        return Err(MeshError::InvalidParameter {
            name: "nx",
            reason: format!("{nx} cell columns cannot be split over {size} ranks"),
        });
    }
    let (vlo, vhi) = vertex_columns(rank, size, nx);
    let local_of = |r: usize, i: usize, j: usize| {
        let (lo, hi) = vertex_columns(r, size, nx);
        (i - lo) + (hi - lo + 1) * j
    };
    let nlocal = (vhi - vlo + 1) * (ny + 1);
    let mut globals = vec![0u64; nlocal];
    let mut owner_ranks = vec![0usize; nlocal];
    let mut owner_idxs = vec![0usize; nlocal];
    let mut coords = vec![0.0; 2 * nlocal];
    let mut codes = vec![Vec::new(); nlocal];
    let mut to_local = BTreeMap::new();
    for j in 0..=ny {
        for i in vlo..=vhi {
            let v = local_of(rank, i, j);
            let g = grid.global(&[i, j]);
            let owner = column_owner(i.min(nx - 1), size, nx);
            globals[v] = g as u64;
            owner_ranks[v] = owner;
            owner_idxs[v] = local_of(owner, i, j);
            coords[2 * v..2 * v + 2].copy_from_slice(&grid.point(&[i, j]));
            codes[v] = grid.codes(&[i, j]);
            to_local.insert(g, v);
        }
    }
    let mut elem_verts = Vec::new();
    let mut elem_owned = Vec::new();
    for cell in grid.cells(&[(vlo, vhi), (0, ny)]) {
        let owned = column_owner(cell[0], size, nx) == rank;
        for tri in grid.cell_simplices(&cell) {
            elem_verts.extend(tri.iter().map(|g| to_local[g]));
            elem_owned.push(owned);
        }
    }
    let edge_classes = boundary_edge_classes(2, &elem_verts, |v| codes[v].as_slice());
    let parts = MeshParts {
        dim: 2,
        coords,
        elem_verts,
        vert_globals: globals,
        owner_ranks,
        owner_idxs,
        elem_owned,
        vert_class: codes.iter().map(|c| class_of_codes(2, c)).collect(),
        edge_classes,
        owners_have_all_upward: true,
    };
    let mut mesh = Mesh::from_parts(comm, parts)?;
    mesh.set_parting(super::Parting::Ghosted);
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Comm, LocalUniverse, NoComm};
    use approx::assert_relative_eq;

    #[test]
    fn square_counts_and_classification() {
        let mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[2, 2]).expect("box");
        assert_eq!(mesh.nverts(), 9);
        assert_eq!(mesh.nelems(), 8);
        assert_eq!(mesh.nedges(), 16);
        assert!(mesh.ask_sizes().iter().all(|&s| (s - 0.125).abs() < 1e-12));
        // corners, side midpoints, centre
        assert_eq!(mesh.vert_class(0), Class::new(0, 1 + 3));
        assert_eq!(mesh.vert_class(1), Class::new(1, 3));
        assert_eq!(mesh.vert_class(4), Class::interior(2));
        assert_eq!(mesh.edge_class(0, 1), Class::new(1, 3));
        assert_eq!(mesh.edge_class(0, 4), Class::interior(2));
    }

    #[test]
    fn cube_tets_are_positive_and_fill_the_box() {
        let mesh =
            build_box(Comm::new(NoComm::default()), 3, &[1.0, 2.0, 1.0], &[1, 2, 1]).expect("box");
        assert_eq!(mesh.nelems(), 12);
        let sizes = mesh.ask_sizes();
        assert!(sizes.iter().all(|&s| s > 0.0));
        assert_relative_eq!(sizes.iter().sum::<f64>(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn segments_in_1d() {
        let mesh = build_box(Comm::new(NoComm::default()), 1, &[3.0], &[3]).expect("line");
        assert_eq!(mesh.nelems(), 3);
        assert_eq!(mesh.vert_class(3), Class::new(0, 2));
        assert_eq!(&mesh.ask_sizes()[..], &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn strips_own_every_vertex_exactly_once() {
        let out = LocalUniverse::run(3, |t| {
            let mesh = build_box_partitioned(Comm::new(t), 4, 2).expect("strips");
            let owned: Vec<u64> = (0..mesh.nverts())
                .filter(|&v| mesh.is_vert_owned(v))
                .map(|v| mesh.vert_globals()[v])
                .collect();
            let owned_elems = (0..mesh.nelems()).filter(|&e| mesh.is_elem_owned(e)).count();
            (owned, owned_elems)
        });
        let mut all: Vec<u64> = out.iter().flat_map(|(o, _)| o.clone()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..15).collect::<Vec<u64>>());
        assert_eq!(out.iter().map(|(_, n)| n).sum::<usize>(), 16);
    }
}
