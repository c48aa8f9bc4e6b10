//! Marching cubes extraction of a level set from a sampled scalar field.
//!
//! Grid nodes whose value is NaN are undefined; cells touching an undefined
//! node produce no triangles, which keeps the surface bounded to where the
//! field was actually evaluated.

#![allow(
    clippy::unreadable_literal,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

use std::collections::HashMap;

use glam::Vec3;

use crate::error::{Result, ScanError};
use crate::mesh::TriangleMesh;

/// A scalar field sampled on a regular grid.
///
/// Values are stored x-fastest: node `(x, y, z)` lives at
/// `x + dims[0] * (y + dims[1] * z)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarGrid {
    /// World position of node `(0, 0, 0)`.
    pub origin: Vec3,
    /// Distance between neighbouring nodes.
    pub cell_size: f32,
    /// Number of nodes along each axis.
    pub dims: [u32; 3],
    /// Node values; NaN marks an undefined node.
    pub values: Vec<f32>,
}

impl ScalarGrid {
    /// Creates a grid with every node undefined.
    pub fn new(origin: Vec3, cell_size: f32, dims: [u32; 3]) -> Self {
        let len = dims.iter().map(|&d| d as usize).product();
        Self {
            origin,
            cell_size,
            dims,
            values: vec![f32::NAN; len],
        }
    }

    /// Creates a grid by evaluating `f` at every node position.
    pub fn from_fn(
        origin: Vec3,
        cell_size: f32,
        dims: [u32; 3],
        mut f: impl FnMut(Vec3) -> f32,
    ) -> Self {
        let mut grid = Self::new(origin, cell_size, dims);
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    let i = grid.index(x, y, z);
                    grid.values[i] = f(grid.node_position(x, y, z));
                }
            }
        }
        grid
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the grid has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the flat index of a node.
    #[inline]
    #[must_use]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        x as usize + self.dims[0] as usize * (y as usize + self.dims[1] as usize * z as usize)
    }

    /// Returns the world position of a node.
    #[inline]
    #[must_use]
    pub fn node_position(&self, x: u32, y: u32, z: u32) -> Vec3 {
        self.origin + Vec3::new(x as f32, y as f32, z as f32) * self.cell_size
    }

    /// Returns the value at a node.
    #[inline]
    #[must_use]
    pub fn value(&self, x: u32, y: u32, z: u32) -> f32 {
        self.values[self.index(x, y, z)]
    }
}

/// Offsets of the eight cell corners; corner `i` sits at `(i & 1, (i >> 1) & 1, (i >> 2) & 1)`.
const CORNERS: [[u32; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [1, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [0, 1, 1],
    [1, 1, 1],
];

/// Cell edges as (lower corner, upper corner, axis).
const EDGES: [(usize, usize, usize); 12] = [
    (0, 1, 0),
    (2, 3, 0),
    (4, 5, 0),
    (6, 7, 0),
    (0, 2, 1),
    (1, 3, 1),
    (4, 6, 1),
    (5, 7, 1),
    (0, 4, 2),
    (1, 5, 2),
    (2, 6, 2),
    (3, 7, 2),
];

/// Extracts the `isovalue` level set of a grid as a world-space triangle mesh.
///
/// Values below the isovalue are inside. Edge vertices are shared between
/// neighbouring cells, and vertex normals are recomputed from the faces.
///
/// Returns [`ScanError::InvalidConfig`] if the value count does not match the
/// dimensions or a dimension is smaller than 2.
pub fn marching_cubes(grid: &ScalarGrid, isovalue: f32) -> Result<TriangleMesh> {
    let [nx, ny, nz] = grid.dims;
    let expected: usize = grid.dims.iter().map(|&d| d as usize).product();
    if grid.values.len() != expected {
        return Err(ScanError::InvalidConfig(format!(
            "grid holds {} values but {}x{}x{} = {} were expected",
            grid.values.len(),
            nx,
            ny,
            nz,
            expected
        )));
    }
    if nx < 2 || ny < 2 || nz < 2 {
        return Err(ScanError::InvalidConfig(
            "all grid dimensions must be >= 2".into(),
        ));
    }

    let mut mesh = TriangleMesh::new();
    // (node index * 3 + axis) -> vertex index
    let mut edge_vertices: HashMap<usize, u32> = HashMap::new();
    let mut vs = [0.0_f32; 8];

    for z in 0..nz - 1 {
        for y in 0..ny - 1 {
            for x in 0..nx - 1 {
                let mut config_n = 0_usize;
                let mut undefined = false;
                for (i, corner) in CORNERS.iter().enumerate() {
                    let v = grid.value(x + corner[0], y + corner[1], z + corner[2]) - isovalue;
                    if v.is_nan() {
                        undefined = true;
                        break;
                    }
                    vs[i] = v;
                    if v < 0.0 {
                        config_n |= 1 << i;
                    }
                }

                if undefined || config_n == 0 || config_n == 255 {
                    continue;
                }

                let config = MC_TRIS[config_n];
                let n_indices = (config & 0xF) as usize * 3;
                let mut triangle = [0_u32; 3];
                let mut offset = 4;
                for k in 0..n_indices {
                    let edge = ((config >> offset) & 0xF) as usize;
                    offset += 4;

                    let (a, b, axis) = EDGES[edge];
                    let base = CORNERS[a];
                    let (bx, by, bz) = (x + base[0], y + base[1], z + base[2]);
                    let key = grid.index(bx, by, bz) * 3 + axis;
                    let (va, vb) = (vs[a], vs[b]);

                    triangle[k % 3] = *edge_vertices.entry(key).or_insert_with(|| {
                        let mut p = grid.node_position(bx, by, bz);
                        p[axis] += grid.cell_size * (va / (va - vb));
                        mesh.vertices.push(p);
                        (mesh.vertices.len() - 1) as u32
                    });

                    if k % 3 == 2 {
                        mesh.faces.push(triangle);
                    }
                }
            }
        }
    }

    mesh.compute_vertex_normals();
    Ok(mesh)
}

/// Look-up table for triangle configurations (256 entries, one per cube configuration).
///
/// Each entry is a `u64` encoding:
/// - Bits `[3:0]`: Number of triangles (0-5)
/// - Bits `[7:4]`, `[11:8]`, ...: Edge indices (0-11) for each triangle vertex, 4 bits each
///
/// Ported from `MarchingCubeCpp` (public domain).
#[rustfmt::skip]
static MC_TRIS: [u64; 256] = [
    0, 33793, 36945, 159668546,
    18961, 144771090, 5851666, 595283255635,
    20913, 67640146, 193993474, 655980856339,
    88782242, 736732689667, 797430812739, 194554754,
    26657, 104867330, 136709522, 298069416227,
    109224258, 8877909667, 318136408323, 1567994331701604,
    189884450, 350847647843, 559958167731, 3256298596865604,
    447393122899, 651646838401572, 2538311371089956, 737032694307,
    29329, 43484162, 91358498, 374810899075,
    158485010, 178117478419, 88675058979, 433581536604804,
    158486962, 649105605635, 4866906995, 3220959471609924,
    649165714851, 3184943915608436, 570691368417972, 595804498035,
    124295042, 431498018963, 508238522371, 91518530,
    318240155763, 291789778348404, 1830001131721892, 375363605923,
    777781811075, 1136111028516116, 3097834205243396, 508001629971,
    2663607373704004, 680242583802939237, 333380770766129845, 179746658,
    42545, 138437538, 93365810, 713842853011,
    73602098, 69575510115, 23964357683, 868078761575828,
    28681778, 713778574611, 250912709379, 2323825233181284,
    302080811955, 3184439127991172, 1694042660682596, 796909779811,
    176306722, 150327278147, 619854856867, 1005252473234484,
    211025400963, 36712706, 360743481544788, 150627258963,
    117482600995, 1024968212107700, 2535169275963444, 4734473194086550421,
    628107696687956, 9399128243, 5198438490361643573, 194220594,
    104474994, 566996932387, 427920028243, 2014821863433780,
    492093858627, 147361150235284, 2005882975110676, 9671606099636618005,
    777701008947, 3185463219618820, 482784926917540, 2900953068249785909,
    1754182023747364, 4274848857537943333, 13198752741767688709, 2015093490989156,
    591272318771, 2659758091419812, 1531044293118596, 298306479155,
    408509245114388, 210504348563, 9248164405801223541, 91321106,
    2660352816454484, 680170263324308757, 8333659837799955077, 482966828984116,
    4274926723105633605, 3184439197724820, 192104450, 15217,
    45937, 129205250, 129208402, 529245952323,
    169097138, 770695537027, 382310500883, 2838550742137652,
    122763026, 277045793139, 81608128403, 1991870397907988,
    362778151475, 2059003085103236, 2132572377842852, 655681091891,
    58419234, 239280858627, 529092143139, 1568257451898804,
    447235128115, 679678845236084, 2167161349491220, 1554184567314086709,
    165479003923, 1428768988226596, 977710670185060, 10550024711307499077,
    1305410032576132, 11779770265620358997, 333446212255967269, 978168444447012,
    162736434, 35596216627, 138295313843, 891861543990356,
    692616541075, 3151866750863876, 100103641866564, 6572336607016932133,
    215036012883, 726936420696196, 52433666, 82160664963,
    2588613720361524, 5802089162353039525, 214799000387, 144876322,
    668013605731, 110616894681956, 1601657732871812, 430945547955,
    3156382366321172, 7644494644932993285, 3928124806469601813, 3155990846772900,
    339991010498708, 10743689387941597493, 5103845475, 105070898,
    3928064910068824213, 156265010, 1305138421793636, 27185,
    195459938, 567044449971, 382447549283, 2175279159592324,
    443529919251, 195059004769796, 2165424908404116, 1554158691063110021,
    504228368803, 1436350466655236, 27584723588724, 1900945754488837749,
    122971970, 443829749251, 302601798803, 108558722,
    724700725875, 43570095105972, 2295263717447940, 2860446751369014181,
    2165106202149444, 69275726195, 2860543885641537797, 2165106320445780,
    2280890014640004, 11820349930268368933, 8721082628082003989, 127050770,
    503707084675, 122834978, 2538193642857604, 10129,
    801441490467, 2923200302876740, 1443359556281892, 2901063790822564949,
    2728339631923524, 7103874718248233397, 12775311047932294245, 95520290,
    2623783208098404, 1900908618382410757, 137742672547, 2323440239468964,
    362478212387, 727199575803140, 73425410, 34337,
    163101314, 668566030659, 801204361987, 73030562,
    591509145619, 162574594, 100608342969108, 5553,
    724147968595, 1436604830452292, 176259090, 42001,
    143955266, 2385, 18433, 0,
];
