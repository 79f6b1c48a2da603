//! Emission from static and skinned mesh geometry

use super::spawn_multiple;
use crate::rand::Random;
use crate::set::ParticleSet;
use crate::state::ParticleSystemState;
use ember_core::{Aabb, EmberError, Result};
use glam::{Mat4, Vec3, Vec4};
use std::sync::Arc;

/// Meaning of a vertex element
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexSemantic {
    Position,
    Normal,
    BlendIndices,
    BlendWeights,
    TexCoord,
    Color,
}

/// Storage format of a vertex element
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexFormat {
    Float2,
    Float3,
    Float4,
    /// Four unsigned bytes
    UByte4,
    /// Four unsigned bytes mapped to [-1, 1]
    UByte4Norm,
}

impl VertexFormat {
    pub fn size(self) -> usize {
        match self {
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
            Self::UByte4 | Self::UByte4Norm => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexElement {
    pub semantic: VertexSemantic,
    pub format: VertexFormat,
    /// Byte offset from the start of a vertex
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexBuffer {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexBuffer {
    pub fn len(&self) -> usize {
        match self {
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> u32 {
        match self {
            Self::U16(v) => v[i] as u32,
            Self::U32(v) => v[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

/// Interleaved CPU-side mesh data
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    pub elements: Vec<VertexElement>,
    /// Bytes per vertex
    pub stride: usize,
    pub vertices: Vec<u8>,
    pub num_vertices: usize,
    pub indices: IndexBuffer,
}

impl MeshData {
    /// Mesh with only `Float3` positions
    pub fn from_positions(positions: &[Vec3], indices: IndexBuffer) -> Self {
        let vertices: Vec<u8> = positions
            .iter()
            .flat_map(|p| bytemuck::cast::<[f32; 3], [u8; 12]>(p.to_array()))
            .collect();

        Self {
            elements: vec![VertexElement {
                semantic: VertexSemantic::Position,
                format: VertexFormat::Float3,
                offset: 0,
            }],
            stride: 12,
            vertices,
            num_vertices: positions.len(),
            indices,
        }
    }

    pub fn element(&self, semantic: VertexSemantic) -> Option<&VertexElement> {
        self.elements.iter().find(|e| e.semantic == semantic)
    }

    fn bytes(&self, vertex: usize, offset: usize, len: usize) -> &[u8] {
        let start = vertex * self.stride + offset;
        &self.vertices[start..start + len]
    }

    fn read_vec3(&self, vertex: usize, offset: usize) -> Vec3 {
        Vec3::from_array(bytemuck::pod_read_unaligned(self.bytes(vertex, offset, 12)))
    }

    fn read_vec4(&self, vertex: usize, offset: usize) -> Vec4 {
        Vec4::from_array(bytemuck::pod_read_unaligned(self.bytes(vertex, offset, 16)))
    }

    fn read_ubyte4(&self, vertex: usize, offset: usize) -> [u8; 4] {
        bytemuck::pod_read_unaligned(self.bytes(vertex, offset, 4))
    }

    /// Bounds of all vertex positions
    pub fn bounds(&self) -> Aabb {
        match self.element(VertexSemantic::Position) {
            Some(e) if e.format == VertexFormat::Float3 => {
                Aabb::from_points((0..self.num_vertices).map(|v| self.read_vec3(v, e.offset)))
            }
            _ => Aabb::EMPTY,
        }
    }
}

/// Triangles of a mesh with a cumulative area distribution for area-weighted picking
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshWeightedTriangles {
    triangles: Vec<[u32; 3]>,
    /// Normalized cumulative area. The last entry is exactly 1.
    cumulative: Vec<f32>,
}

impl MeshWeightedTriangles {
    pub fn calculate(mesh: &MeshData, position_offset: usize) -> Self {
        let num_triangles = mesh.indices.len() / 3;
        let mut triangles = Vec::with_capacity(num_triangles);
        let mut cumulative = Vec::with_capacity(num_triangles);

        let mut total = 0.0f32;
        for t in 0..num_triangles {
            let tri = [
                mesh.indices.get(t * 3),
                mesh.indices.get(t * 3 + 1),
                mesh.indices.get(t * 3 + 2),
            ];
            let a = mesh.read_vec3(tri[0] as usize, position_offset);
            let b = mesh.read_vec3(tri[1] as usize, position_offset);
            let c = mesh.read_vec3(tri[2] as usize, position_offset);

            // Twice the area; the factor cancels after normalization
            let area = (b - a).cross(c - a).length();
            total += area;

            triangles.push(tri);
            cumulative.push(total);
        }

        if total > 0.0 {
            for w in &mut cumulative {
                *w /= total;
            }
        } else {
            let n = cumulative.len() as f32;
            for (i, w) in cumulative.iter_mut().enumerate() {
                *w = (i + 1) as f32 / n;
            }
        }
        if let Some(last) = cumulative.last_mut() {
            *last = 1.0;
        }

        Self {
            triangles,
            cumulative,
        }
    }

    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Index of the first triangle whose cumulative weight is not below `value`
    pub fn triangle_index(&self, value: f32) -> usize {
        let idx = self.cumulative.partition_point(|&w| w < value);
        idx.min(self.triangles.len().saturating_sub(1))
    }

    /// Pick a triangle with probability proportional to its area
    pub fn get_triangle(&self, random: &mut Random) -> [u32; 3] {
        self.triangles[self.triangle_index(random.get_unorm())]
    }
}

/// Where on the mesh particles spawn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MeshEmissionType {
    Vertex,
    Edge,
    #[default]
    Triangle,
}

/// A sampled vertex: index, position and normal
type SampledVertex = (usize, Vec3, Vec3);

/// Validated view of mesh data used for sampling
#[derive(Clone, Debug)]
pub struct MeshEmission {
    mesh: Arc<MeshData>,
    position_offset: usize,
    /// Offset and whether the normal is byte-packed
    normals: Option<(usize, bool)>,
    /// Offsets of blend indices and blend weights
    blend: Option<(usize, usize)>,
    weighted: MeshWeightedTriangles,
    next_sequential: usize,
}

impl MeshEmission {
    pub fn new(mesh: Arc<MeshData>, per_vertex: bool, skinning: bool) -> Result<Self> {
        let position = mesh.element(VertexSemantic::Position).ok_or_else(|| {
            EmberError::InvalidMesh(
                "mesh emitter requires position vertex data to be present".into(),
            )
        })?;
        if position.format != VertexFormat::Float3 {
            return Err(EmberError::InvalidMesh(
                "mesh emitter requires position vertex data to use 3D float vectors".into(),
            ));
        }

        if mesh.num_vertices == 0 {
            return Err(EmberError::InvalidMesh("mesh has no vertices".into()));
        }
        if mesh.vertices.len() < mesh.num_vertices * mesh.stride {
            return Err(EmberError::InvalidMesh(format!(
                "vertex buffer holds {} bytes, expected {} vertices of {} bytes",
                mesh.vertices.len(),
                mesh.num_vertices,
                mesh.stride
            )));
        }
        if let Some(e) = mesh
            .elements
            .iter()
            .find(|e| e.offset + e.format.size() > mesh.stride)
        {
            return Err(EmberError::InvalidMesh(format!(
                "{:?} element exceeds the vertex stride",
                e.semantic
            )));
        }

        if !per_vertex {
            if mesh.indices.len() % 3 != 0 {
                return Err(EmberError::InvalidMesh(
                    "unless emitting per vertex, the mesh must be a triangle list \
                     (index count divisible by three)"
                        .into(),
                ));
            }
            if mesh.indices.is_empty() {
                return Err(EmberError::InvalidMesh("mesh has no triangles".into()));
            }
            if mesh.indices.iter().any(|i| i as usize >= mesh.num_vertices) {
                return Err(EmberError::InvalidMesh(
                    "mesh index references a missing vertex".into(),
                ));
            }
        }

        let blend = if skinning {
            let indices = mesh.element(VertexSemantic::BlendIndices);
            let weights = mesh.element(VertexSemantic::BlendWeights);
            match (indices, weights) {
                (Some(i), Some(w)) => {
                    if i.format != VertexFormat::UByte4 {
                        return Err(EmberError::InvalidMesh(
                            "skinned mesh emitter requires blend indices as four bytes".into(),
                        ));
                    }
                    if w.format != VertexFormat::Float4 {
                        return Err(EmberError::InvalidMesh(
                            "skinned mesh emitter requires blend weights as 4D float vectors"
                                .into(),
                        ));
                    }
                    Some((i.offset, w.offset))
                }
                _ => {
                    return Err(EmberError::InvalidMesh(
                        "skinned mesh emitter requires blend indices and blend weights".into(),
                    ))
                }
            }
        } else {
            None
        };

        let normals = mesh
            .element(VertexSemantic::Normal)
            .and_then(|e| match e.format {
                VertexFormat::Float3 => Some((e.offset, false)),
                VertexFormat::UByte4Norm => Some((e.offset, true)),
                _ => None,
            });

        let position_offset = position.offset;
        let weighted = if per_vertex {
            MeshWeightedTriangles::default()
        } else {
            MeshWeightedTriangles::calculate(&mesh, position_offset)
        };

        Ok(Self {
            mesh,
            position_offset,
            normals,
            blend,
            weighted,
            next_sequential: 0,
        })
    }

    pub fn mesh(&self) -> &MeshData {
        &self.mesh
    }

    pub fn weighted_triangles(&self) -> &MeshWeightedTriangles {
        &self.weighted
    }

    fn vertex(&self, idx: usize) -> SampledVertex {
        let position = self.mesh.read_vec3(idx, self.position_offset);
        let normal = match self.normals {
            Some((offset, true)) => {
                let packed = self.mesh.read_ubyte4(idx, offset);
                Vec3::new(packed[0] as f32, packed[1] as f32, packed[2] as f32) * (2.0 / 255.0)
                    - Vec3::ONE
            }
            Some((offset, false)) => self.mesh.read_vec3(idx, offset),
            None => Vec3::Z,
        };
        (idx, position, normal)
    }

    /// Next vertex in order, wrapping at the end
    pub fn sequential_vertex(&mut self) -> SampledVertex {
        let idx = self.next_sequential;
        self.next_sequential = (self.next_sequential + 1) % self.mesh.num_vertices;
        self.vertex(idx)
    }

    pub fn random_vertex(&self, random: &mut Random) -> SampledVertex {
        self.vertex(random.get() as usize % self.mesh.num_vertices)
    }

    /// An edge of an area-weighted triangle. All three edges are equally likely.
    pub fn random_edge(&self, random: &mut Random) -> [SampledVertex; 2] {
        let tri = self.weighted.get_triangle(random);
        let (a, b) = match random.get_range(0, 2) {
            0 => (tri[0], tri[1]),
            1 => (tri[1], tri[2]),
            _ => (tri[2], tri[0]),
        };
        [self.vertex(a as usize), self.vertex(b as usize)]
    }

    pub fn random_triangle(&self, random: &mut Random) -> [SampledVertex; 3] {
        let tri = self.weighted.get_triangle(random);
        tri.map(|i| self.vertex(i as usize))
    }

    /// Weighted sum of the four bone matrices influencing `vertex`. Identity without a pose.
    pub fn blend_matrix(&self, bones: Option<&[Mat4]>, vertex: usize) -> Mat4 {
        let (Some(bones), Some((idx_offset, weight_offset))) = (bones, self.blend) else {
            return Mat4::IDENTITY;
        };

        let indices = self.mesh.read_ubyte4(vertex, idx_offset);
        let weights = self.mesh.read_vec4(vertex, weight_offset);

        let mut blended = Mat4::ZERO;
        for (k, &bone) in indices.iter().enumerate() {
            if let Some(m) = bones.get(bone as usize) {
                blended += *m * weights[k];
            }
        }
        blended
    }

    fn skin(
        &self,
        bones: Option<&[Mat4]>,
        (idx, position, normal): SampledVertex,
    ) -> SampledVertex {
        let m = self.blend_matrix(bones, idx);
        (
            idx,
            m.transform_point3(position),
            m.transform_vector3(normal).normalize_or(Vec3::Z),
        )
    }

    /// Spawn `count` particles, skinning sampled vertices with `bones` when present
    fn spawn(
        &mut self,
        kind: MeshEmissionType,
        sequential: bool,
        bones: Option<&[Mat4]>,
        random: &mut Random,
        set: &mut ParticleSet,
        count: usize,
    ) -> usize {
        match kind {
            MeshEmissionType::Vertex if sequential => spawn_multiple(set, count, |_| {
                let sampled = self.sequential_vertex();
                let (_, p, n) = self.skin(bones, sampled);
                (p, n)
            }),
            MeshEmissionType::Vertex => spawn_multiple(set, count, |_| {
                let (_, p, n) = self.skin(bones, self.random_vertex(random));
                (p, n)
            }),
            MeshEmissionType::Edge => spawn_multiple(set, count, |_| {
                let [a, b] = self.random_edge(random).map(|v| self.skin(bones, v));
                let t = random.get_unorm();
                (a.1.lerp(b.1, t), a.2.lerp(b.2, t).normalize_or(Vec3::Z))
            }),
            MeshEmissionType::Triangle => spawn_multiple(set, count, |_| {
                let tri = self.random_triangle(random).map(|v| self.skin(bones, v));
                let bc = random.get_barycentric();
                let position = tri[0].1 * bc.x + tri[1].1 * bc.y + tri[2].1 * bc.z;
                let normal = tri[0].2 * bc.x + tri[1].2 * bc.y + tri[2].2 * bc.z;
                (position, normal.normalize_or(Vec3::Z))
            }),
        }
    }
}

fn validate(mesh: Arc<MeshData>, kind: MeshEmissionType, skinning: bool) -> Option<MeshEmission> {
    match MeshEmission::new(mesh, kind == MeshEmissionType::Vertex, skinning) {
        Ok(emission) => Some(emission),
        Err(e) => {
            log::error!("Mesh particle emitter disabled: {e}");
            None
        }
    }
}

/// Emits from a static mesh
#[derive(Clone, Debug)]
pub struct StaticMeshShape {
    kind: MeshEmissionType,
    sequential: bool,
    emission: Option<MeshEmission>,
}

impl StaticMeshShape {
    /// Validates the mesh. Invalid meshes are logged and produce a shape that never emits.
    pub fn new(mesh: Arc<MeshData>, kind: MeshEmissionType, sequential: bool) -> Self {
        Self {
            kind,
            sequential,
            emission: validate(mesh, kind, false),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.emission.is_some()
    }

    pub fn kind(&self) -> MeshEmissionType {
        self.kind
    }

    pub(crate) fn spawn(
        &mut self,
        random: &mut Random,
        set: &mut ParticleSet,
        count: usize,
    ) -> usize {
        let (kind, sequential) = (self.kind, self.sequential);
        match self.emission.as_mut() {
            Some(emission) => emission.spawn(kind, sequential, None, random, set, count),
            None => set.particle_count(),
        }
    }

    pub fn calc_bounds(&self) -> (Aabb, Aabb) {
        let shape = self
            .emission
            .as_ref()
            .map_or(Aabb::EMPTY, |e| e.mesh().bounds());
        (shape, Aabb::new(-Vec3::ONE, Vec3::ONE))
    }
}

/// Emits from a mesh deformed by a skeletal animation pose
#[derive(Clone, Debug)]
pub struct SkinnedMeshShape {
    kind: MeshEmissionType,
    sequential: bool,
    /// Animation whose current pose deforms the mesh
    animation_id: Option<u64>,
    emission: Option<MeshEmission>,
}

impl SkinnedMeshShape {
    pub fn new(
        mesh: Arc<MeshData>,
        kind: MeshEmissionType,
        sequential: bool,
        animation_id: Option<u64>,
    ) -> Self {
        Self {
            kind,
            sequential,
            animation_id,
            emission: validate(mesh, kind, true),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.emission.is_some()
    }

    pub fn kind(&self) -> MeshEmissionType {
        self.kind
    }

    pub(crate) fn spawn(
        &mut self,
        random: &mut Random,
        set: &mut ParticleSet,
        count: usize,
        state: &ParticleSystemState,
    ) -> usize {
        let bones = match (state.anim, self.animation_id) {
            (Some(poses), Some(id)) => poses.bones(id),
            _ => None,
        };

        let (kind, sequential) = (self.kind, self.sequential);
        match self.emission.as_mut() {
            Some(emission) => emission.spawn(kind, sequential, bones, random, set, count),
            None => set.particle_count(),
        }
    }

    pub fn calc_bounds(&self) -> (Aabb, Aabb) {
        // Skinning can move vertices anywhere; the bind pose bounds are a best effort
        let shape = self
            .emission
            .as_ref()
            .map_or(Aabb::EMPTY, |e| e.mesh().bounds());
        (shape, Aabb::new(-Vec3::ONE, Vec3::ONE))
    }
}
