//! Engine composition: ordered bring-up, the lane-0 frame phase, the
//! frame scheduler state machine, swapchain recreation, and reverse
//! teardown.

use ash::vk;
use glam::Mat4;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use pyre_common::arena::Arena;
use pyre_common::lanes;

use crate::api::{self, GpuAccess, HostState};
use crate::camera;
use crate::error::EngineError;
use crate::frame::{self, FrameSlot, ImageSlot};
use crate::frame_commands::MeshCommand;
use crate::host::ModuleHost;
use crate::mesh::{self, MeshUploader};
use crate::vulkan::{
    recorder, CommandManager, Descriptors, MemoryManager, Pipelines, SwapchainContext,
    VulkanContext, MAX_FRAMES_IN_FLIGHT,
};

/// How often lane 0 logs frame statistics.
const STATS_INTERVAL: u32 = 120;

const APP_ARENA_RESERVE: usize = 4 * 1024 * 1024;
const FRAME_ARENA_RESERVE: usize = 1024 * 1024;
const SWAPCHAIN_ARENA_RESERVE: usize = 256 * 1024;

pub struct EngineOptions {
    pub validation: bool,
    /// Explicit module path; otherwise the well-known locations are
    /// searched.
    pub module_path: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            module_path: None,
        }
    }
}

/// What one iteration of the scheduler decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameOutcome {
    /// Rendered and presented.
    Presented,
    /// Nothing rendered this iteration (zero framebuffer, recreation).
    Skipped,
}

/// Everything the recorder needs that came out of the module's callbacks.
pub(crate) struct FrameData {
    pub clear_color: [f32; 4],
    pub quad_count: u32,
    pub mesh_commands: Vec<MeshCommand>,
    pub view: Mat4,
    pub proj: Mat4,
}

pub struct Engine {
    // Declaration order is teardown order: everything above `memory`
    // holds device objects, and `ctx` drops last.
    pub(crate) swapchain: Option<SwapchainContext>,
    pub(crate) pipelines: Option<Pipelines>,
    descriptors: Option<Descriptors>,
    pub(crate) frames: Vec<FrameSlot>,
    pub(crate) images: Vec<ImageSlot>,
    pub(crate) commands: Option<CommandManager>,
    pub(crate) host: Option<ModuleHost>,

    pub(crate) current_frame: usize,
    acquire_suboptimal: bool,

    app_arena: Arena,
    frame_arena: Arena,
    pub(crate) swapchain_arena: Arena,

    last_frame: Instant,
    stat_frames: u32,
    stat_accum_ms: f32,

    cleaned_up: bool,

    pub(crate) memory: Arc<MemoryManager>,
    pub(crate) ctx: Arc<VulkanContext>,
}

impl Engine {
    /// Ordered bring-up. Any failure is an init failure; whatever was
    /// built is torn down again by Drop.
    pub fn init(window: &winit::window::Window, opts: &EngineOptions) -> Result<Engine, EngineError> {
        use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

        let app_arena = Arena::new(APP_ARENA_RESERVE).map_err(EngineError::Init)?;
        let frame_arena = Arena::new(FRAME_ARENA_RESERVE).map_err(EngineError::Init)?;
        let swapchain_arena = Arena::new(SWAPCHAIN_ARENA_RESERVE).map_err(EngineError::Init)?;

        let display_handle = window
            .display_handle()
            .map_err(|e| EngineError::Init(format!("display handle: {:?}", e)))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| EngineError::Init(format!("window handle: {:?}", e)))?
            .as_raw();

        // SAFETY: the window outlives the engine; pyre-sys keeps it alive
        // until after cleanup.
        let ctx = unsafe { VulkanContext::new(display_handle, window_handle, opts.validation) }
            .map_err(EngineError::Init)?;
        let ctx = Arc::new(ctx);

        let memory =
            Arc::new(unsafe { MemoryManager::new(&ctx) }.map_err(EngineError::GpuAlloc)?);

        let commands = unsafe { CommandManager::new(&ctx, lanes::lane_count()) }
            .map_err(EngineError::Init)?;

        let size = window.inner_size();
        let swapchain = unsafe { SwapchainContext::new(&ctx, &memory, size.width, size.height) }
            .map_err(EngineError::Init)?;

        let descriptors = unsafe { Descriptors::new(&ctx) }.map_err(EngineError::Init)?;

        let pipelines = unsafe { Pipelines::new(&ctx, swapchain.format, descriptors.set_layout) }
            .map_err(EngineError::Init)?;

        let frames = unsafe { frame::create_frame_slots(&ctx, &memory, &descriptors) }
            .map_err(EngineError::Init)?;

        let images = unsafe { frame::create_image_slots(&ctx, swapchain.image_count()) }
            .map_err(EngineError::Init)?;

        // Mesh table with the built-in cube at slot 0, then hand the whole
        // thing to the api surface so module callbacks can reach it.
        let uploader = unsafe { MeshUploader::new(&ctx, memory.clone()) }
            .map_err(EngineError::Init)?;

        let mut host_state = HostState::new();
        let (cube_vertices, cube_indices) = mesh::cube_geometry();
        let (vb, ib) = unsafe { uploader.upload(&ctx, &cube_vertices, &cube_indices) }
            .map_err(EngineError::GpuAlloc)?;
        host_state
            .meshes
            .insert(vb, ib, cube_vertices.len() as u32, cube_indices.len() as u32)
            .map_err(|_| EngineError::Init("mesh table rejected the cube".to_string()))?;

        host_state.uploader = Some(uploader);
        host_state.gpu = Some(GpuAccess { ctx: ctx.clone() });
        api::install(host_state);

        let mut engine = Engine {
            swapchain: Some(swapchain),
            pipelines: Some(pipelines),
            descriptors: Some(descriptors),
            frames,
            images,
            commands: Some(commands),
            host: None,
            current_frame: 0,
            acquire_suboptimal: false,
            app_arena,
            frame_arena,
            swapchain_arena,
            last_frame: Instant::now(),
            stat_frames: 0,
            stat_accum_ms: 0.0,
            cleaned_up: false,
            memory,
            ctx,
        };

        engine.load_module(opts)?;

        Ok(engine)
    }

    fn load_module(&mut self, opts: &EngineOptions) -> Result<(), EngineError> {
        let source = match &opts.module_path {
            Some(path) => path.clone(),
            None => ModuleHost::find_module().ok_or_else(|| {
                EngineError::ModuleLoad(format!("no {} found", crate::host::MODULE_FILE_NAME))
            })?,
        };

        let mut host = ModuleHost::new(source, api::api_table());
        host.load(
            &self.app_arena,
            &self.frame_arena,
            || {
                api::with_host(|h| h.allow_mesh_load = true);
            },
            || {
                api::with_host(|h| h.allow_mesh_load = false);
            },
        )?;

        self.host = Some(host);
        Ok(())
    }

    /// The lane-0 body of one main-loop iteration. Returns false once the
    /// loop should stop; worker lanes exit the same iteration.
    pub fn frame(&mut self, window: &winit::window::Window) -> bool {
        lanes::lane_sync();

        if !lanes::quit_requested() {
            self.frame_arena.reset();

            // Hot reload before anything touches module state this frame.
            let ctx = self.ctx.clone();
            if let Some(host) = self.host.as_mut() {
                host.maybe_reload(&self.frame_arena, || ctx.wait_idle());
            }

            let now = Instant::now();
            let dt = now.duration_since(self.last_frame).as_secs_f32().max(0.0);
            self.last_frame = now;

            self.begin_module_frame(dt);

            match self.draw_frame(window) {
                Ok(_) => {}
                Err(EngineError::DeviceLost) => {
                    log::error!("device lost, shutting down");
                    lanes::request_quit();
                }
                Err(e) => {
                    log::error!("frame failed: {}", e);
                    lanes::request_quit();
                }
            }

            self.stat_frames += 1;
            self.stat_accum_ms += dt * 1000.0;
            if self.stat_frames == STATS_INTERVAL {
                log::info!(
                    "{} frames, avg {:.2} ms",
                    self.stat_frames,
                    self.stat_accum_ms / self.stat_frames as f32
                );
                self.stat_frames = 0;
                self.stat_accum_ms = 0.0;
            }
        }

        lanes::lane_sync();
        // Read after the final barrier so every lane leaves together.
        !lanes::quit_requested()
    }

    /// Publish dt, clear the frame record, and run the module's update.
    pub(crate) fn begin_module_frame(&mut self, dt: f32) {
        api::with_host(|h| {
            h.dt = dt;
            h.frame.begin_frame();
        });

        if let Some(host) = self.host.as_ref() {
            host.update();
        }
    }

    /// Drain the module's frame record into this frame slot's SSBO and
    /// snapshot everything recording needs. Must run after the slot's
    /// fence wait.
    pub(crate) fn collect_frame_data(&mut self, frame_index: usize) -> FrameData {
        let aspect = self.swapchain.as_ref().map_or(1.0, |s| {
            s.extent.width as f32 / s.extent.height.max(1) as f32
        });

        api::with_host(|h| {
            let quad_count = unsafe { self.frames[frame_index].upload_quads(&h.frame.quads) };
            FrameData {
                clear_color: h.frame.clear_color,
                quad_count,
                mesh_commands: std::mem::take(&mut h.frame.meshes),
                view: camera::view(h.eye, h.target),
                proj: camera::projection(aspect),
            }
        })
        .unwrap_or(FrameData {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            quad_count: 0,
            mesh_commands: Vec::new(),
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        })
    }

    /// Reset and record this frame's primary for the acquired image.
    pub(crate) fn record_frame(
        &self,
        frame_index: usize,
        image_index: usize,
        data: &FrameData,
    ) -> Result<vk::CommandBuffer, EngineError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| EngineError::Record("no command manager".to_string()))?;
        let lane = lanes::lane_idx();

        unsafe {
            commands
                .reset_primary(frame_index, lane)
                .map_err(EngineError::Record)?;
        }
        let cmd = commands.primary(frame_index, lane);

        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| EngineError::Record("no swapchain".to_string()))?;
        let pipelines = self
            .pipelines
            .as_ref()
            .ok_or_else(|| EngineError::Record("no pipelines".to_string()))?;

        api::with_host(|h| {
            let params = recorder::RecordParams {
                cmd,
                image: swapchain.images[image_index],
                image_view: swapchain.image_views[image_index],
                depth_image: swapchain.depth.handle,
                depth_view: swapchain.depth.view,
                extent: swapchain.extent,
                pipelines,
                meshes: &h.meshes,
                descriptor_set: self.frames[frame_index].descriptor_set,
                clear_color: data.clear_color,
                quad_count: data.quad_count,
                mesh_commands: &data.mesh_commands,
                view: data.view,
                proj: data.proj,
            };
            unsafe { recorder::record_frame(&self.ctx.device, &params) }
        })
        .unwrap_or_else(|| Err("engine state missing during record".to_string()))
        .map_err(EngineError::Record)?;

        Ok(cmd)
    }

    /// One pass of the scheduler state machine:
    /// wait fence -> copy -> acquire -> record -> reset fence -> submit ->
    /// present, with recreation folded in at acquire and present.
    pub(crate) fn draw_frame(&mut self, window: &winit::window::Window) -> Result<FrameOutcome, EngineError> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            // Zero framebuffer: keep returning to the event loop until the
            // window has area again.
            return Ok(FrameOutcome::Skipped);
        }

        let frame_index = self.current_frame;

        // WAIT_FENCE: frame slot resources are untouchable until the GPU
        // is done with them.
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[self.frames[frame_index].in_flight], true, u64::MAX)
                .map_err(map_fatal)?;
        }

        // COPY_UPLOAD: after the fence wait, the GPU no longer reads this
        // slot's SSBO.
        let data = self.collect_frame_data(frame_index);

        // ACQUIRE.
        let acquire = {
            let swapchain = self
                .swapchain
                .as_ref()
                .ok_or_else(|| EngineError::Record("no swapchain".to_string()))?;
            unsafe {
                self.ctx.swapchain_loader.acquire_next_image(
                    swapchain.handle,
                    u64::MAX,
                    self.frames[frame_index].image_available,
                    vk::Fence::null(),
                )
            }
        };

        let image_index = match acquire {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    // Remembered, handled after present so the acquired
                    // image is still consumed.
                    self.acquire_suboptimal = true;
                }
                index as usize
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.recreate_swapchain(window)?;
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => return Err(map_fatal(e)),
        };

        // RESET_CMD / RECORD.
        let cmd = self.record_frame(frame_index, image_index, &data)?;

        // RESET_FENCE: only now, after acquire and record both succeeded.
        // Resetting earlier could leave the fence unsignalable if no
        // submission follows.
        unsafe {
            self.ctx
                .device
                .reset_fences(&[self.frames[frame_index].in_flight])
                .map_err(map_fatal)?;
        }

        // SUBMIT.
        self.submit(frame_index, image_index, &[cmd])?;

        // PRESENT.
        let needs_recreate = self.present(image_index)? || self.acquire_suboptimal;
        if needs_recreate {
            self.acquire_suboptimal = false;
            self.recreate_swapchain(window)?;
        }

        // ADVANCE.
        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;

        Ok(FrameOutcome::Presented)
    }

    /// Submit command buffers for a frame: wait on image-available at the
    /// color-attachment stage, signal the image's render-finished
    /// semaphore and the frame's fence.
    pub(crate) fn submit(
        &self,
        frame_index: usize,
        image_index: usize,
        cmds: &[vk::CommandBuffer],
    ) -> Result<(), EngineError> {
        let wait_semaphores = [self.frames[frame_index].image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.images[image_index].render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(cmds)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.ctx
                .device
                .queue_submit(
                    self.ctx.graphics_queue,
                    &[submit_info],
                    self.frames[frame_index].in_flight,
                )
                .map_err(map_fatal)
        }
    }

    /// Present the image, waiting on its render-finished semaphore.
    /// Returns whether the swapchain should be recreated.
    pub(crate) fn present(&self, image_index: usize) -> Result<bool, EngineError> {
        let swapchains = [self
            .swapchain
            .as_ref()
            .ok_or_else(|| EngineError::Record("no swapchain".to_string()))?
            .handle];
        let image_indices = [image_index as u32];
        let wait_semaphores = [self.images[image_index].render_finished];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present_info)
        };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(map_fatal(e)),
        }
    }

    /// Atomic swapchain recreation: device-wait, destroy, reset the
    /// swapchain arena, rebuild swapchain + per-image semaphores + both
    /// pipelines (their color format follows the swapchain).
    pub(crate) fn recreate_swapchain(&mut self, window: &winit::window::Window) -> Result<(), EngineError> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            // Blocked until the framebuffer has area; the event loop keeps
            // delivering resize events meanwhile.
            return Ok(());
        }

        self.ctx.wait_idle();

        unsafe {
            if let Some(old) = self.swapchain.take() {
                old.destroy(&self.ctx, &self.memory);
            }
            frame::destroy_image_slots(&self.ctx, &mut self.images);
            if let Some(pipelines) = self.pipelines.as_mut() {
                pipelines.destroy();
            }
            self.pipelines = None;
        }

        self.swapchain_arena.reset();

        let swapchain =
            unsafe { SwapchainContext::new(&self.ctx, &self.memory, size.width, size.height) }
                .map_err(EngineError::Init)?;

        self.images = unsafe { frame::create_image_slots(&self.ctx, swapchain.image_count()) }
            .map_err(EngineError::Init)?;

        let set_layout = self
            .descriptors
            .as_ref()
            .map(|d| d.set_layout)
            .unwrap_or_default();
        self.pipelines = Some(
            unsafe { Pipelines::new(&self.ctx, swapchain.format, set_layout) }
                .map_err(EngineError::Init)?,
        );

        self.swapchain = Some(swapchain);

        log::debug!("swapchain recreated at {}x{}", size.width, size.height);
        Ok(())
    }

    /// Reverse teardown. Mandatory device-wait first: nothing may be
    /// destroyed while the GPU uses it. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        self.ctx.wait_idle();

        if let Some(mut host) = self.host.take() {
            host.shutdown();
        }

        // Pull the api state down before destroying what it references.
        if let Some(mut state) = api::take() {
            unsafe {
                state.meshes.destroy_all(&self.memory);
                if let Some(mut uploader) = state.uploader.take() {
                    uploader.destroy();
                }
            }
            state.gpu = None;
        }

        unsafe {
            frame::destroy_frame_slots(&self.ctx, &self.memory, &mut self.frames);
            frame::destroy_image_slots(&self.ctx, &mut self.images);

            if let Some(mut pipelines) = self.pipelines.take() {
                pipelines.destroy();
            }
            if let Some(mut descriptors) = self.descriptors.take() {
                descriptors.destroy();
            }
            if let Some(mut commands) = self.commands.take() {
                commands.destroy();
            }
            if let Some(swapchain) = self.swapchain.take() {
                swapchain.destroy(&self.ctx, &self.memory);
            }
        }

        // The allocator and context drop with the struct, in declaration
        // order: memory first, context last.
        log::debug!("engine cleanup complete");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Fatal results from a queue or fence operation.
fn map_fatal(result: vk::Result) -> EngineError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => EngineError::DeviceLost,
        other => EngineError::Record(format!("{:?}", other)),
    }
}
