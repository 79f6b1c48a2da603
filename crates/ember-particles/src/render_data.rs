//! Render-data staging: pooled pixel buffers and GPU upload lists
//!
//! A simulated [`ParticleSet`] is turned into renderer-ready data in one of
//! three layouts. Billboards and meshes use square textures with one texel
//! per particle, sized by [`ParticleSet::determine_texture_size`]. The GPU
//! layout is a flat array of [`GpuParticle`] in draw order.
//!
//! Buffers are recycled through per-size free lists, so steady-state frames
//! allocate nothing and the pools keep their peak footprint.

use crate::set::{ParticleSet, ParticleSetData};
use crate::system::{ParticleSystem, RenderMode, SimulationSpace, StagingMode};
use bytemuck::{Pod, Zeroable};
use ember_core::{Aabb, SystemId};
use glam::Mat4;
use half::f16;
use parking_lot::Mutex;
use std::collections::HashMap;

/// RGBA32F texel
pub type Rgba32F = [f32; 4];
/// RGBA8 texel
pub type Rgba8 = [u8; 4];
/// RGBA16F texel stored as IEEE half bits
pub type Rgba16F = [u16; 4];

fn half_bits(v: f32) -> u16 {
    f16::from_f32(v).to_bits()
}

/// Two-dimensional buffer of texels. Rows are `row_pitch` texels apart.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer<T> {
    data: Vec<T>,
    width: u32,
    height: u32,
    row_pitch: u32,
}

impl<T: Pod> PixelBuffer<T> {
    /// Zeroed buffer whose row pitch is `width` rounded up to `row_alignment` texels
    pub fn new(width: u32, height: u32, row_alignment: u32) -> Self {
        let row_pitch = width.next_multiple_of(row_alignment.max(1));
        Self {
            data: vec![T::zeroed(); row_pitch as usize * height as usize],
            width,
            height,
            row_pitch,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn row_pitch(&self) -> u32 {
        self.row_pitch
    }

    /// Padding texels at the end of each row
    pub fn row_skip(&self) -> u32 {
        self.row_pitch - self.width
    }

    pub fn texel(&self, x: u32, y: u32) -> &T {
        &self.data[(y * self.row_pitch + x) as usize]
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Raw bytes for texture upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Write `count` texels in row order, skipping row padding
    fn fill(&mut self, count: usize, mut texel: impl FnMut(usize) -> T) {
        debug_assert!(count <= (self.width * self.height) as usize);
        let width = self.width as usize;
        let skip = self.row_skip() as usize;

        let mut dst = 0;
        let mut x = 0;
        for i in 0..count {
            self.data[dst] = texel(i);
            dst += 1;
            x += 1;
            if x == width {
                x = 0;
                dst += skip;
            }
        }
    }
}

/// Texel coordinates of each particle in draw order
fn write_indices(indices: &mut Vec<[u16; 2]>, p: &ParticleSetData, count: usize, width: u32) {
    indices.clear();
    indices.extend(p.indices[..count].iter().map(|&i| {
        [(i % width) as u16, (i / width) as u16]
    }));
}

/// Pixel buffers for camera-facing quads
#[derive(Clone, Debug)]
pub struct BillboardBuffers {
    /// xyz position, w rotation in radians
    pub position_and_rotation: PixelBuffer<Rgba32F>,
    pub color: PixelBuffer<Rgba8>,
    /// xy size, z sprite frame
    pub size_and_frame_idx: PixelBuffer<Rgba16F>,
    pub indices: Vec<[u16; 2]>,
}

impl BillboardBuffers {
    pub fn new(size: u32, row_alignment: u32) -> Self {
        Self {
            position_and_rotation: PixelBuffer::new(size, size, row_alignment),
            color: PixelBuffer::new(size, size, row_alignment),
            size_and_frame_idx: PixelBuffer::new(size, size, row_alignment),
            indices: Vec::new(),
        }
    }

    pub fn size(&self) -> u32 {
        self.color.width()
    }

    pub fn write(&mut self, set: &ParticleSet) {
        let count = set.particle_count();
        let p = set.particles();
        let width = self.size();

        self.position_and_rotation.fill(count, |i| {
            let pos = p.position[i];
            [pos.x, pos.y, pos.z, p.rotation[i].x.to_radians()]
        });
        self.color.fill(count, |i| p.color[i].0);
        self.size_and_frame_idx.fill(count, |i| {
            let size = p.size[i];
            [half_bits(size.x), half_bits(size.y), half_bits(p.frame[i]), 0]
        });
        write_indices(&mut self.indices, p, count, width);
    }
}

/// Pixel buffers for instanced meshes
#[derive(Clone, Debug)]
pub struct MeshBuffers {
    pub position: PixelBuffer<Rgba32F>,
    pub color: PixelBuffer<Rgba8>,
    pub size: PixelBuffer<Rgba16F>,
    /// Euler rotation in radians
    pub rotation: PixelBuffer<Rgba16F>,
    pub indices: Vec<[u16; 2]>,
}

impl MeshBuffers {
    pub fn new(size: u32, row_alignment: u32) -> Self {
        Self {
            position: PixelBuffer::new(size, size, row_alignment),
            color: PixelBuffer::new(size, size, row_alignment),
            size: PixelBuffer::new(size, size, row_alignment),
            rotation: PixelBuffer::new(size, size, row_alignment),
            indices: Vec::new(),
        }
    }

    pub fn texture_size(&self) -> u32 {
        self.color.width()
    }

    pub fn write(&mut self, set: &ParticleSet) {
        let count = set.particle_count();
        let p = set.particles();
        let width = self.texture_size();

        self.position.fill(count, |i| {
            let pos = p.position[i];
            [pos.x, pos.y, pos.z, 0.0]
        });
        self.color.fill(count, |i| p.color[i].0);
        self.size.fill(count, |i| {
            let s = p.size[i];
            [half_bits(s.x), half_bits(s.y), half_bits(s.z), 0]
        });
        self.rotation.fill(count, |i| {
            let r = p.rotation[i];
            [
                half_bits(r.x.to_radians()),
                half_bits(r.y.to_radians()),
                half_bits(r.z.to_radians()),
                0,
            ]
        });
        write_indices(&mut self.indices, p, count, width);
    }
}

/// Particle layout for GPU upload. 48 bytes, three vec4 rows.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuParticle {
    pub position: [f32; 3],
    pub lifetime: f32,
    pub velocity: [f32; 3],
    pub initial_lifetime: f32,
    pub size: [f32; 2],
    /// Radians
    pub rotation: f32,
    pub _padding: f32,
}

impl GpuParticle {
    fn from_set(p: &ParticleSetData, i: usize) -> Self {
        Self {
            position: p.position[i].to_array(),
            lifetime: p.lifetime[i],
            velocity: p.velocity[i].to_array(),
            initial_lifetime: p.initial_lifetime[i],
            size: [p.size[i].x, p.size[i].y],
            rotation: p.rotation[i].x.to_radians(),
            _padding: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
pub enum RenderBuffers {
    Billboard(BillboardBuffers),
    Mesh(MeshBuffers),
    Gpu(Vec<GpuParticle>),
}

/// Staged output of one system for one frame
#[derive(Clone, Debug)]
pub struct ParticleRenderData {
    pub num_particles: usize,
    /// Bounds of particle positions in simulation space
    pub bounds: Aabb,
    /// Identity for world-space systems
    pub local_to_world: Mat4,
    pub buffers: RenderBuffers,
}

/// Render data of every system simulated in one frame
#[derive(Debug, Default)]
pub struct ParticleFrame {
    pub(crate) systems: HashMap<SystemId, ParticleRenderData>,
}

impl ParticleFrame {
    pub fn get(&self, id: SystemId) -> Option<&ParticleRenderData> {
        self.systems.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SystemId, &ParticleRenderData)> {
        self.systems.iter().map(|(&id, data)| (id, data))
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

/// Free lists of pixel buffer sets keyed by texture size
#[derive(Debug)]
pub struct ParticleRenderDataPool {
    row_alignment: u32,
    billboard: HashMap<u32, Vec<BillboardBuffers>>,
    mesh: HashMap<u32, Vec<MeshBuffers>>,
    created: usize,
}

impl ParticleRenderDataPool {
    pub fn new(row_alignment: u32) -> Self {
        Self {
            row_alignment: row_alignment.max(1),
            billboard: HashMap::new(),
            mesh: HashMap::new(),
            created: 0,
        }
    }

    pub fn alloc_billboard(&mut self, size: u32) -> BillboardBuffers {
        if let Some(buffers) = self.billboard.get_mut(&size).and_then(Vec::pop) {
            return buffers;
        }
        self.created += 1;
        BillboardBuffers::new(size, self.row_alignment)
    }

    pub fn alloc_mesh(&mut self, size: u32) -> MeshBuffers {
        if let Some(buffers) = self.mesh.get_mut(&size).and_then(Vec::pop) {
            return buffers;
        }
        self.created += 1;
        MeshBuffers::new(size, self.row_alignment)
    }

    pub fn release_billboard(&mut self, buffers: BillboardBuffers) {
        self.billboard.entry(buffers.size()).or_default().push(buffers);
    }

    pub fn release_mesh(&mut self, buffers: MeshBuffers) {
        self.mesh.entry(buffers.texture_size()).or_default().push(buffers);
    }

    /// Buffer sets created over the pool's lifetime
    pub fn created(&self) -> usize {
        self.created
    }

    /// Buffer sets waiting for reuse
    pub fn free(&self) -> usize {
        self.billboard.values().map(Vec::len).sum::<usize>()
            + self.mesh.values().map(Vec::len).sum::<usize>()
    }
}

/// Staging pools of one sync slot. Shared by every system task of a frame.
#[derive(Debug)]
pub struct ParticleSimulationDataPool {
    render: Mutex<ParticleRenderDataPool>,
    gpu: Mutex<Vec<Vec<GpuParticle>>>,
}

impl ParticleSimulationDataPool {
    pub fn new(row_alignment: u32) -> Self {
        Self {
            render: Mutex::new(ParticleRenderDataPool::new(row_alignment)),
            gpu: Mutex::new(Vec::new()),
        }
    }

    /// Stage the current particles of `system` according to its settings
    pub fn stage(&self, system: &ParticleSystem) -> ParticleRenderData {
        let set = system.particle_set();
        let settings = system.settings();
        let count = set.particle_count();

        let buffers = match (settings.staging, settings.render_mode) {
            (StagingMode::Gpu, _) => {
                let mut list = self.gpu.lock().pop().unwrap_or_default();
                list.clear();
                let p = set.particles();
                list.extend(
                    p.indices[..count]
                        .iter()
                        .map(|&i| GpuParticle::from_set(p, i as usize)),
                );
                RenderBuffers::Gpu(list)
            }
            (StagingMode::Cpu, RenderMode::Billboard) => {
                let size = set.determine_texture_size();
                let mut buffers = self.render.lock().alloc_billboard(size);
                buffers.write(set);
                RenderBuffers::Billboard(buffers)
            }
            (StagingMode::Cpu, RenderMode::Mesh) => {
                let size = set.determine_texture_size();
                let mut buffers = self.render.lock().alloc_mesh(size);
                buffers.write(set);
                RenderBuffers::Mesh(buffers)
            }
        };

        let local_to_world = match settings.simulation_space {
            SimulationSpace::Local => settings.transform.to_matrix(),
            SimulationSpace::World => Mat4::IDENTITY,
        };

        ParticleRenderData {
            num_particles: count,
            bounds: system.calculate_bounds(),
            local_to_world,
            buffers,
        }
    }

    /// Take back every buffer a frame holds. Memory stays in the pools.
    pub fn clear(&self, frame: &mut ParticleFrame) {
        let mut render = self.render.lock();
        let mut gpu = self.gpu.lock();
        for (_, data) in frame.systems.drain() {
            match data.buffers {
                RenderBuffers::Billboard(b) => render.release_billboard(b),
                RenderBuffers::Mesh(b) => render.release_mesh(b),
                RenderBuffers::Gpu(list) => gpu.push(list),
            }
        }
    }

    /// Pixel buffer sets created by this pool
    pub fn created_buffers(&self) -> usize {
        self.render.lock().created()
    }

    pub fn free_buffers(&self) -> usize {
        self.render.lock().free()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::PackedColor;
    use crate::system::ParticleSystemSettings;
    use glam::Vec3;

    fn particles(count: usize) -> ParticleSet {
        let mut set = ParticleSet::new(count);
        set.alloc_particles(count);
        let p = set.particles_mut();
        for i in 0..count {
            p.position[i] = Vec3::new(i as f32, 1.0, 2.0);
            p.size[i] = Vec3::new(0.5, -0.25, 1.0);
            p.rotation[i] = Vec3::new(180.0, 0.0, 0.0);
            p.frame[i] = 3.0;
            p.color[i] = PackedColor([i as u8, 0, 0, 255]);
            p.lifetime[i] = 1.0;
            p.initial_lifetime[i] = 2.0;
        }
        set
    }

    #[test]
    fn row_pitch_is_aligned() {
        let buffer: PixelBuffer<Rgba8> = PixelBuffer::new(4, 4, 8);
        assert_eq!(buffer.row_pitch(), 8);
        assert_eq!(buffer.row_skip(), 4);
        assert_eq!(buffer.as_bytes().len(), 8 * 4 * 4);

        let packed: PixelBuffer<Rgba8> = PixelBuffer::new(4, 4, 1);
        assert_eq!(packed.row_skip(), 0);
    }

    #[test]
    fn billboard_fill_honours_row_skip() {
        let set = particles(6);
        assert_eq!(set.determine_texture_size(), 4);

        let mut buffers = BillboardBuffers::new(4, 8);
        buffers.write(&set);

        // Particles 0..4 fill the first row, 4 and 5 start the second
        assert_eq!(buffers.color.texel(3, 0)[0], 3);
        assert_eq!(buffers.color.texel(0, 1)[0], 4);
        assert_eq!(buffers.color.texel(1, 1)[0], 5);
        assert_eq!(buffers.color.data()[4], [0, 0, 0, 0]);

        let pr = buffers.position_and_rotation.texel(1, 1);
        assert_eq!(pr[0], 5.0);
        assert!((pr[3] - std::f32::consts::PI).abs() < 1e-6);

        assert_eq!(buffers.indices[5], [1, 1]);
    }

    #[test]
    fn sizes_are_half_floats() {
        let set = particles(1);
        let mut buffers = BillboardBuffers::new(2, 1);
        buffers.write(&set);

        let texel = buffers.size_and_frame_idx.texel(0, 0);
        assert_eq!(f16::from_bits(texel[0]).to_f32(), 0.5);
        assert_eq!(f16::from_bits(texel[1]).to_f32(), -0.25);
        assert_eq!(f16::from_bits(texel[2]).to_f32(), 3.0);
    }

    #[test]
    fn mesh_buffers_carry_3d_attributes() {
        let set = particles(2);
        let mut buffers = MeshBuffers::new(2, 1);
        buffers.write(&set);
        assert_eq!(*buffers.position.texel(1, 0), [1.0, 1.0, 2.0, 0.0]);
        assert_eq!(f16::from_bits(buffers.size.texel(0, 0)[2]).to_f32(), 1.0);
        assert_eq!(buffers.indices, vec![[0, 0], [1, 0]]);
    }

    #[test]
    fn gpu_particle_layout() {
        assert_eq!(std::mem::size_of::<GpuParticle>(), 48);
        let set = particles(1);
        let gpu = GpuParticle::from_set(set.particles(), 0);
        assert_eq!(gpu.initial_lifetime, 2.0);
        assert_eq!(gpu.size, [0.5, -0.25]);
    }

    #[test]
    fn render_pool_reuses_buffers() {
        let mut pool = ParticleRenderDataPool::new(1);
        let a = pool.alloc_billboard(4);
        let b = pool.alloc_billboard(8);
        assert_eq!(pool.created(), 2);

        pool.release_billboard(a);
        pool.release_billboard(b);
        assert_eq!(pool.free(), 2);

        let again = pool.alloc_billboard(4);
        assert_eq!(again.size(), 4);
        assert_eq!(pool.created(), 2);
        assert_eq!(pool.free(), 1);

        // A size with no free buffers creates a new set
        pool.alloc_mesh(4);
        assert_eq!(pool.created(), 3);
    }

    #[test]
    fn simulation_pool_reclaims_frames() {
        let pool = ParticleSimulationDataPool::new(1);
        let mut system = ParticleSystem::new(ParticleSystemSettings::default());
        system.initialize().unwrap();

        let mut frame = ParticleFrame::default();
        frame.systems.insert(SystemId::from_raw(1), pool.stage(&system));
        frame.systems.insert(SystemId::from_raw(2), pool.stage(&system));
        assert_eq!(pool.created_buffers(), 2);

        pool.clear(&mut frame);
        assert!(frame.is_empty());
        assert_eq!(pool.free_buffers(), 2);

        frame.systems.insert(SystemId::from_raw(1), pool.stage(&system));
        assert_eq!(pool.created_buffers(), 2);
    }

    #[test]
    fn gpu_staging_of_empty_system() {
        let pool = ParticleSimulationDataPool::new(1);
        let mut system = ParticleSystem::new(ParticleSystemSettings {
            staging: StagingMode::Gpu,
            ..Default::default()
        });
        system.initialize().unwrap();

        let data = pool.stage(&system);
        assert_eq!(data.num_particles, 0);
        assert!(matches!(data.buffers, RenderBuffers::Gpu(ref list) if list.is_empty()));
    }
}
