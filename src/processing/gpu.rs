//! WebGPU compute Canny
//!
//! Per frame:
//! 1. Upload the intensity buffer to device memory
//! 2. Run gradient, suppression, hysteresis and finalize passes
//! 3. Read the edge map back into host memory
//!
//! Both transfers block the calling thread.

use std::sync::mpsc;

use tracing::{debug, info, instrument};
use wgpu::*;

use super::{EdgeParams, ProcessingError};

/// Weak-to-strong propagation passes; each extends an edge by one pixel.
const HYSTERESIS_PASSES: usize = 16;
const WORKGROUP: u32 = 16;

/// Uniform data for the Canny shader
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CannyUniforms {
    width: u32,
    height: u32,
    low: f32,
    high: f32,
    aperture: u32,
    _padding: [u32; 3],
}

/// Size-dependent buffers, rebuilt when the frame size changes
struct FrameBuffers {
    width: u32,
    height: u32,
    intensity: Buffer,
    output: Buffer,
    staging: Buffer,
    bind_group: BindGroup,
    // Kept alive for the bind group
    _magnitude: Buffer,
    _direction: Buffer,
    _classes: Buffer,
}

/// Edge detector running on a hardware GPU adapter
pub struct GpuEdgeDetector {
    params: EdgeParams,
    adapter_name: String,
    device: Device,
    queue: Queue,
    bind_group_layout: BindGroupLayout,
    uniforms: Buffer,
    gradient: ComputePipeline,
    suppress: ComputePipeline,
    hysteresis: ComputePipeline,
    finalize: ComputePipeline,
    buffers: Option<FrameBuffers>,
}

impl GpuEdgeDetector {
    /// Probe for a hardware adapter and build the compute pipelines.
    pub fn new(params: EdgeParams) -> Result<Self, ProcessingError> {
        pollster::block_on(Self::init(params))
    }

    #[instrument(skip(params))]
    async fn init(params: EdgeParams) -> Result<Self, ProcessingError> {
        info!("Initializing GPU edge detector");

        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| ProcessingError::GpuUnavailable("no GPU adapter found".into()))?;

        let adapter_info = adapter.get_info();
        if adapter_info.device_type == DeviceType::Cpu {
            return Err(ProcessingError::GpuUnavailable(format!(
                "only a software adapter is present ({})",
                adapter_info.name
            )));
        }

        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "GPU adapter selected for edge detection"
        );

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("edgecam_canny_device"),
                    required_features: Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| ProcessingError::GpuUnavailable(e.to_string()))?;

        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("canny_shader"),
            source: ShaderSource::Wgsl(include_str!("canny.wgsl").into()),
        });

        let storage = |binding: u32, read_only: bool| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("canny_bind_group_layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, true),  // intensity
                storage(2, false), // magnitude
                storage(3, false), // direction
                storage(4, false), // classes
                storage(5, false), // edges
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("canny_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |entry_point: &str| {
            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let gradient = pipeline("gradient");
        let suppress = pipeline("suppress");
        let hysteresis = pipeline("hysteresis");
        let finalize = pipeline("finalize");

        let uniforms = device.create_buffer(&BufferDescriptor {
            label: Some("canny_uniforms"),
            size: std::mem::size_of::<CannyUniforms>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            params,
            adapter_name: adapter_info.name,
            device,
            queue,
            bind_group_layout,
            uniforms,
            gradient,
            suppress,
            hysteresis,
            finalize,
            buffers: None,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Allocate device buffers for the given dimensions
    fn ensure_buffers(&mut self, width: u32, height: u32) {
        if matches!(&self.buffers, Some(b) if b.width == width && b.height == height) {
            return;
        }

        debug!(width, height, "Allocating Canny buffers");

        // One 32-bit word per pixel in every buffer
        let size = width as u64 * height as u64 * 4;
        let buffer = |label: &str, usage: BufferUsages| {
            self.device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        };

        let intensity = buffer("canny_intensity", BufferUsages::STORAGE | BufferUsages::COPY_DST);
        let magnitude = buffer("canny_magnitude", BufferUsages::STORAGE);
        let direction = buffer("canny_direction", BufferUsages::STORAGE);
        let classes = buffer("canny_classes", BufferUsages::STORAGE);
        let output = buffer("canny_edges", BufferUsages::STORAGE | BufferUsages::COPY_SRC);
        let staging = buffer("canny_staging", BufferUsages::COPY_DST | BufferUsages::MAP_READ);

        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("canny_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.uniforms.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: intensity.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: magnitude.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: direction.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: classes.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: output.as_entire_binding(),
                },
            ],
        });

        self.buffers = Some(FrameBuffers {
            width,
            height,
            intensity,
            output,
            staging,
            bind_group,
            _magnitude: magnitude,
            _direction: direction,
            _classes: classes,
        });
    }

    /// Edge map of a `width * height` intensity image, 0 or 255 per pixel.
    pub fn detect(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, ProcessingError> {
        let pixels = width as usize * height as usize;
        if pixels == 0 || gray.len() != pixels {
            return Err(ProcessingError::FrameShape {
                width,
                height,
                len: gray.len(),
            });
        }

        self.ensure_buffers(width, height);
        let Some(buffers) = self.buffers.as_ref() else {
            return Err(ProcessingError::Gpu("frame buffers missing".into()));
        };

        let uniforms = CannyUniforms {
            width,
            height,
            low: self.params.low_threshold,
            high: self.params.high_threshold,
            aperture: self.params.aperture,
            _padding: [0; 3],
        };
        self.queue
            .write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let widened: Vec<u32> = gray.iter().map(|&v| v as u32).collect();
        self.queue
            .write_buffer(&buffers.intensity, 0, bytemuck::cast_slice(&widened));

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("canny_encoder"),
            });

        let groups_x = width.div_ceil(WORKGROUP);
        let groups_y = height.div_ceil(WORKGROUP);
        let passes = [&self.gradient, &self.suppress]
            .into_iter()
            .chain(std::iter::repeat(&self.hysteresis).take(HYSTERESIS_PASSES))
            .chain(std::iter::once(&self.finalize));

        // Separate passes so each stage sees the previous stage's writes
        for pipeline in passes {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("canny_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &buffers.bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }

        let size = pixels as u64 * 4;
        encoder.copy_buffer_to_buffer(&buffers.output, 0, &buffers.staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffers.staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        let _ = self.device.poll(Maintain::Wait);

        rx.recv()
            .map_err(|e| ProcessingError::Gpu(format!("Failed to map buffer: {e}")))?
            .map_err(|e| ProcessingError::Gpu(format!("Buffer map error: {e:?}")))?;

        let edges = {
            let data = slice.get_mapped_range();
            data.chunks_exact(4).map(|word| word[0]).collect()
        };
        buffers.staging.unmap();

        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<CannyUniforms>(), 32);
    }

    #[test]
    fn detects_a_vertical_step() {
        // This test requires a GPU, so it may be skipped in CI
        let mut detector = match GpuEdgeDetector::new(EdgeParams::DEFAULT) {
            Ok(detector) => detector,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };

        let (width, height) = (32u32, 16u32);
        let gray: Vec<u8> = (0..height)
            .flat_map(|_| (0..width).map(|x| if x < width / 2 { 0 } else { 255 }))
            .collect();

        let edges = detector.detect(&gray, width, height).unwrap();
        assert_eq!(edges.len(), gray.len());

        let row = (height / 2 * width) as usize;
        let hits = edges[row..row + width as usize]
            .iter()
            .filter(|&&v| v == 255)
            .count();
        assert!(hits >= 1, "expected an edge near the step");
        assert_eq!(edges[row], 0);
        assert_eq!(edges[row + width as usize - 1], 0);
    }

    #[test]
    fn matches_cpu_on_low_contrast_step() {
        let Ok(mut gpu) = GpuEdgeDetector::new(EdgeParams::DEFAULT) else {
            println!("Skipping test (no GPU)");
            return;
        };
        let cpu = super::super::CpuEdgeDetector::new(EdgeParams::DEFAULT);

        let (width, height) = (32u32, 32u32);
        for step in [20u8, 25, 30, 255] {
            let gray: Vec<u8> = (0..height)
                .flat_map(|_| (0..width).map(move |x| if x < width / 2 { 0 } else { step }))
                .collect();
            let on_gpu = gpu.detect(&gray, width, height).unwrap();
            let on_cpu = cpu.detect(gray, width, height).unwrap();
            assert_eq!(on_gpu, on_cpu, "step {step}");
        }
    }

    #[test]
    fn rejects_mismatched_shape() {
        let Ok(mut detector) = GpuEdgeDetector::new(EdgeParams::DEFAULT) else {
            return;
        };
        assert!(matches!(
            detector.detect(&[0; 10], 4, 4),
            Err(ProcessingError::FrameShape { .. })
        ));
    }
}
