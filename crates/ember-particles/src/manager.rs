//! Frame scheduler for all registered particle systems
//!
//! Each [`ParticleManager::update`] fans out one task per active system onto a
//! dedicated rayon pool. The calling thread joins the pool while it waits, and
//! returns only after every task has written its render data. Output is
//! double-buffered: the frame handed out last is never touched while the next
//! one is produced.

use crate::config::ParticleManagerConfig;
use crate::render_data::{ParticleFrame, ParticleSimulationDataPool};
use crate::state::{AnimationPoses, ParticleScene};
use crate::system::{ParticleSystem, PlaybackState, SimulationContext};
use ember_core::{EmberError, Result, SystemId};
use glam::Vec3;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Render frames in flight between simulation and rendering
pub const NUM_SYNC_BUFFERS: usize = 2;

/// Per-frame inputs shared by every system
#[derive(Clone, Copy)]
pub struct ParticleFrameInputs<'a> {
    pub time_step: f32,
    pub anim: Option<&'a AnimationPoses>,
    pub scene: Option<&'a dyn ParticleScene>,
    /// World-space camera position for distance sorting
    pub view_origin: Option<Vec3>,
}

impl ParticleFrameInputs<'_> {
    pub fn new(time_step: f32) -> Self {
        Self {
            time_step,
            anim: None,
            scene: None,
            view_origin: None,
        }
    }
}

struct SyncSlot {
    frame: ParticleFrame,
    pool: ParticleSimulationDataPool,
    complete: bool,
}

pub struct ParticleManager {
    systems: BTreeMap<SystemId, ParticleSystem>,
    workers: rayon::ThreadPool,
    slots: [SyncSlot; NUM_SYNC_BUFFERS],
    read_idx: usize,
    write_idx: usize,
    paused: bool,
}

impl ParticleManager {
    pub fn new(config: &ParticleManagerConfig) -> Result<Self> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("ember-particles-{i}"))
            .build()
            .map_err(|e| {
                EmberError::ThreadPoolError(format!("Failed to build particle workers: {e}"))
            })?;

        log::debug!(
            "Particle manager started with {} worker(s)",
            workers.current_num_threads()
        );

        let slot = || SyncSlot {
            frame: ParticleFrame::default(),
            pool: ParticleSimulationDataPool::new(config.row_alignment),
            complete: false,
        };

        Ok(Self {
            systems: BTreeMap::new(),
            workers,
            slots: [slot(), slot()],
            read_idx: 0,
            write_idx: 0,
            paused: false,
        })
    }

    pub fn register(&mut self, system: ParticleSystem) -> SystemId {
        let id = SystemId::allocate();
        self.systems.insert(id, system);
        log::debug!("Registered particle system {id}");
        id
    }

    pub fn unregister(&mut self, id: SystemId) -> Result<ParticleSystem> {
        self.systems.remove(&id).ok_or_else(|| {
            log::warn!("Unregistering unknown particle system {id}");
            EmberError::SystemNotFound(id.to_string())
        })
    }

    pub fn system(&self, id: SystemId) -> Option<&ParticleSystem> {
        self.systems.get(&id)
    }

    pub fn system_mut(&mut self, id: SystemId) -> Option<&mut ParticleSystem> {
        self.systems.get_mut(&id)
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// A paused manager keeps returning the last completed frame
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Frame currently owned by the renderer
    pub fn read_frame(&self) -> &ParticleFrame {
        &self.slots[self.read_idx].frame
    }

    /// Simulate every playing system and stage render data for every playing
    /// or paused one. Blocks until all of them are done.
    pub fn update(&mut self, inputs: &ParticleFrameInputs) -> &ParticleFrame {
        if self.slots[self.write_idx].complete {
            self.read_idx = self.write_idx;
            self.write_idx = (self.write_idx + 1) % NUM_SYNC_BUFFERS;
            self.slots[self.write_idx].complete = false;
        }

        if self.paused {
            return &self.slots[self.read_idx].frame;
        }

        let Self {
            systems,
            workers,
            slots,
            write_idx,
            ..
        } = self;
        let slot = &mut slots[*write_idx];

        slot.pool.clear(&mut slot.frame);

        let ctx = SimulationContext {
            anim: inputs.anim,
            scene: inputs.scene,
            view_origin: inputs.view_origin,
        };
        let time_step = inputs.time_step;
        let pool = &slot.pool;
        let results = Mutex::new(std::mem::take(&mut slot.frame.systems));

        workers.in_place_scope(|scope| {
            for (&id, system) in systems.iter_mut() {
                let state = system.state();
                if state != PlaybackState::Playing && state != PlaybackState::Paused {
                    continue;
                }

                let results = &results;
                let ctx = &ctx;
                scope.spawn(move |_| {
                    if state == PlaybackState::Playing {
                        if let Err(e) = system.simulate(time_step, ctx) {
                            log::warn!("Particle system {id} failed to simulate: {e}");
                        }
                    }

                    let data = pool.stage(system);
                    results.lock().insert(id, data);
                });
            }
        });

        slot.frame.systems = results.into_inner();
        slot.complete = true;

        log::trace!("Particle frame staged {} system(s)", slot.frame.len());
        &slot.frame
    }
}
