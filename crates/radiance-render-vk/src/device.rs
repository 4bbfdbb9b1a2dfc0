use std::ffi::{c_char, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, ptr};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, warn};

use crate::config::{to_cstrings, EngineConfig};
use crate::error::{RenderError, RenderResult, VkContext};
use crate::ledger::{HandleKind, HandleLedger};

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vk {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vk {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        info!("[vk {types:?}] {msg}");
    } else {
        debug!("[vk {types:?}] {msg}");
    }
    vk::FALSE
}

/// Instance-level objects. Destroyed after every [`Device`] that holds it.
pub struct InstanceContext {
    _entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn missing_names(required: &[CString], available: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|r| !available.contains(&r.as_c_str()))
        .map(|r| r.to_string_lossy().into_owned())
        .collect()
}

unsafe fn create_instance_context(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    cfg: &EngineConfig,
) -> RenderResult<InstanceContext> {
    let entry = Entry::linked();
    let dh = display
        .display_handle()
        .map_err(|e| RenderError::Init(format!("display handle: {e}")))?
        .as_raw();
    let wh = window
        .window_handle()
        .map_err(|e| RenderError::Init(format!("window handle: {e}")))?
        .as_raw();

    let mut extensions = ash_window::enumerate_required_extensions(dh)
        .ctx("enumerate_required_extensions")?
        .to_vec();

    let layers = if cfg.enable_validation {
        let wanted = to_cstrings(&cfg.validation_layer_names)?;
        let props = entry
            .enumerate_instance_layer_properties()
            .ctx("enumerate_instance_layer_properties")?;
        let available: Vec<&CStr> = props
            .iter()
            .filter_map(|p| p.layer_name_as_c_str().ok())
            .collect();
        let missing = missing_names(&wanted, &available);
        if !missing.is_empty() {
            return Err(RenderError::Init(format!(
                "validation requested but layers unavailable: {missing:?}"
            )));
        }
        extensions.push(debug_utils::NAME.as_ptr());
        wanted
    } else {
        Vec::new()
    };
    let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    let app_name = c"Radiance";
    let app_info = vk::ApplicationInfo {
        p_application_name: app_name.as_ptr(),
        p_engine_name: app_name.as_ptr(),
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };
    let create_info = vk::InstanceCreateInfo {
        p_application_info: &app_info,
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    let instance = entry
        .create_instance(&create_info, None)
        .map_err(|r| RenderError::Init(format!("create_instance: {r:?}")))?;
    let surface_loader = surface::Instance::new(&entry, &instance);

    // From here on the context owns the instance, so early returns clean up.
    let mut ctx = InstanceContext {
        _entry: entry,
        instance,
        surface_loader,
        surface: vk::SurfaceKHR::null(),
        debug: None,
    };

    if cfg.enable_validation {
        let loader = debug_utils::Instance::new(&ctx._entry, &ctx.instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let messenger = loader
            .create_debug_utils_messenger(&ci, None)
            .map_err(|r| RenderError::Init(format!("create_debug_utils_messenger: {r:?}")))?;
        ctx.debug = Some((loader, messenger));
        info!("validation enabled ({} layers)", layers.len());
    }

    ctx.surface = ash_window::create_surface(&ctx._entry, &ctx.instance, dh, wh, None)
        .map_err(|r| RenderError::Init(format!("create_surface: {r:?}")))?;
    Ok(ctx)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Prefers one family that does both; otherwise the first of each.
pub fn find_queue_families(
    props: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    for (i, p) in props.iter().enumerate() {
        let i = i as u32;
        let g = p.queue_count > 0 && p.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let pr = p.queue_count > 0 && can_present(i);
        if g && pr {
            return Some(QueueFamilies {
                graphics: i,
                present: i,
            });
        }
        if g && graphics.is_none() {
            graphics = Some(i);
        }
        if pr && present.is_none() {
            present = Some(i);
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

/// What a physical device offers against the engine's requirements.
#[derive(Debug, Default)]
pub struct DeviceReport {
    pub families: Option<QueueFamilies>,
    pub missing_extensions: Vec<String>,
    pub surface_formats: usize,
    pub present_modes: usize,
}

impl DeviceReport {
    pub fn is_suitable(&self) -> bool {
        self.families.is_some()
            && self.missing_extensions.is_empty()
            && self.surface_formats > 0
            && self.present_modes > 0
    }
}

unsafe fn inspect_device(
    ictx: &InstanceContext,
    phys: vk::PhysicalDevice,
    required: &[CString],
) -> DeviceReport {
    let instance = &ictx.instance;
    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let families = find_queue_families(&qprops, |i| {
        ictx.surface_loader
            .get_physical_device_surface_support(phys, i, ictx.surface)
            .unwrap_or(false)
    });
    let exts = instance
        .enumerate_device_extension_properties(phys)
        .unwrap_or_default();
    let available: Vec<&CStr> = exts
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok())
        .collect();
    DeviceReport {
        families,
        missing_extensions: missing_names(required, &available),
        surface_formats: ictx
            .surface_loader
            .get_physical_device_surface_formats(phys, ictx.surface)
            .map(|f| f.len())
            .unwrap_or(0),
        present_modes: ictx
            .surface_loader
            .get_physical_device_surface_present_modes(phys, ictx.surface)
            .map(|m| m.len())
            .unwrap_or(0),
    }
}

pub struct Queues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
}

/// Logical device plus everything derived from the physical device.
pub struct Device {
    pub instance: Arc<InstanceContext>,
    pub phys: vk::PhysicalDevice,
    pub raw: ash::Device,
    pub families: QueueFamilies,
    pub queues: Queues,
    pub props: vk::PhysicalDeviceProperties,
    pub mem_props: vk::PhysicalDeviceMemoryProperties,
    pub anisotropy: bool,
    pub swapchain_loader: swapchain::Device,
    pub ledger: HandleLedger,
}

impl Drop for Device {
    fn drop(&mut self) {
        let leaks = self.ledger.leaks();
        if !leaks.is_empty() {
            warn!("device destroyed with live handles: {leaks:?}");
        }
        unsafe { self.raw.destroy_device(None) };
    }
}

pub fn find_memory_type_index(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..mem.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0 && mem.memory_types[i as usize].property_flags.contains(req)
    })
}

impl Device {
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        req: vk::MemoryPropertyFlags,
    ) -> RenderResult<u32> {
        find_memory_type_index(&self.mem_props, type_bits, req)
            .ok_or(RenderError::NoMemoryType(req))
    }

    pub fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.phys, format)
                .optimal_tiling_features
        }
    }

    pub fn max_anisotropy(&self) -> Option<f32> {
        self.anisotropy
            .then_some(self.props.limits.max_sampler_anisotropy)
    }

    pub fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let s = unsafe {
            self.raw
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .ctx("create_semaphore")?
        };
        self.ledger.created(HandleKind::Semaphore);
        Ok(s)
    }

    pub fn destroy_semaphore(&self, s: vk::Semaphore) {
        unsafe { self.raw.destroy_semaphore(s, None) };
        self.ledger.destroyed(HandleKind::Semaphore);
    }

    pub fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let ci = vk::FenceCreateInfo {
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        let f = unsafe { self.raw.create_fence(&ci, None).ctx("create_fence")? };
        self.ledger.created(HandleKind::Fence);
        Ok(f)
    }

    pub fn destroy_fence(&self, f: vk::Fence) {
        unsafe { self.raw.destroy_fence(f, None) };
        self.ledger.destroyed(HandleKind::Fence);
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.raw.device_wait_idle().ctx("device_wait_idle") }
    }
}

unsafe fn create_device(
    ictx: Arc<InstanceContext>,
    cfg: &EngineConfig,
) -> RenderResult<Device> {
    let required = to_cstrings(&cfg.required_device_extensions)?;
    let instance = &ictx.instance;

    let candidates = instance
        .enumerate_physical_devices()
        .map_err(|r| RenderError::Init(format!("enumerate_physical_devices: {r:?}")))?;
    let mut chosen = None;
    for phys in candidates {
        let props = instance.get_physical_device_properties(phys);
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let report = inspect_device(&ictx, phys, &required);
        if report.is_suitable() {
            info!("GPU: {name}");
            chosen = report.families.map(|f| (phys, f, props));
            break;
        }
        debug!("skipping {name}: {report:?}");
    }
    let (phys, families, props) = chosen.ok_or_else(|| {
        RenderError::Init("no GPU supports graphics, present and the required extensions".into())
    })?;

    let supported = instance.get_physical_device_features(phys);
    let anisotropy = supported.sampler_anisotropy == vk::TRUE;
    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: supported.sampler_anisotropy,
        ..Default::default()
    };

    let priorities = [1.0_f32];
    let qinfos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();
    let ext_ptrs: Vec<*const c_char> = required.iter().map(|e| e.as_ptr()).collect();
    let dinfo = vk::DeviceCreateInfo {
        queue_create_info_count: qinfos.len() as u32,
        p_queue_create_infos: qinfos.as_ptr(),
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    let raw = instance
        .create_device(phys, &dinfo, None)
        .map_err(|r| RenderError::Init(format!("create_device: {r:?}")))?;

    let queues = Queues {
        graphics: raw.get_device_queue(families.graphics, 0),
        present: raw.get_device_queue(families.present, 0),
    };
    let swapchain_loader = swapchain::Device::new(instance, &raw);
    let mem_props = instance.get_physical_device_memory_properties(phys);
    if !anisotropy {
        warn!("samplerAnisotropy unsupported, samplers fall back to isotropic filtering");
    }

    Ok(Device {
        phys,
        raw,
        families,
        queues,
        props,
        mem_props,
        anisotropy,
        swapchain_loader,
        ledger: HandleLedger::default(),
        instance: ictx,
    })
}

fn hex_bytes(b: &[u8]) -> String {
    let mut s = String::with_capacity(b.len() * 2);
    for x in b {
        use std::fmt::Write as _;
        let _ = write!(&mut s, "{:02x}", x);
    }
    s
}

pub fn pipeline_cache_file(props: &vk::PhysicalDeviceProperties) -> PathBuf {
    PathBuf::from(format!(
        "vk_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id,
        props.device_id,
        props.driver_version,
        hex_bytes(&props.pipeline_cache_uuid)
    ))
}

unsafe fn create_pipeline_cache(
    device: &ash::Device,
    path: Option<&Path>,
) -> RenderResult<vk::PipelineCache> {
    let data = path.and_then(|p| fs::read(p).ok()).unwrap_or_default();
    if !data.is_empty() {
        debug!("pipeline cache: {} bytes loaded", data.len());
    }
    let ci = vk::PipelineCacheCreateInfo {
        initial_data_size: data.len(),
        p_initial_data: if data.is_empty() {
            ptr::null()
        } else {
            data.as_ptr() as *const c_void
        },
        ..Default::default()
    };
    device
        .create_pipeline_cache(&ci, None)
        .ctx("create_pipeline_cache")
}

/// Device, graphics command pool and pipeline cache.
pub struct DeviceContext {
    pub device: Arc<Device>,
    pub command_pool: vk::CommandPool,
    pub pipeline_cache: vk::PipelineCache,
    cache_path: Option<PathBuf>,
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        let d = &self.device.raw;
        unsafe {
            if let Some(path) = &self.cache_path {
                if let Ok(bytes) = d.get_pipeline_cache_data(self.pipeline_cache) {
                    if let Some(parent) = path.parent() {
                        let _ = fs::create_dir_all(parent);
                    }
                    if let Err(e) = fs::write(path, &bytes) {
                        warn!("pipeline cache not saved to {}: {e}", path.display());
                    }
                }
            }
            d.destroy_pipeline_cache(self.pipeline_cache, None);
            d.destroy_command_pool(self.command_pool, None);
        }
    }
}

impl DeviceContext {
    pub fn create(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        cfg: &EngineConfig,
    ) -> RenderResult<Self> {
        unsafe {
            let ictx = Arc::new(create_instance_context(window, display, cfg)?);
            let device = Arc::new(create_device(ictx, cfg)?);

            let pool_info = vk::CommandPoolCreateInfo {
                queue_family_index: device.families.graphics,
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                ..Default::default()
            };
            let command_pool = device
                .raw
                .create_command_pool(&pool_info, None)
                .ctx("create_command_pool")?;

            let cache_path = cfg
                .pipeline_cache_dir
                .as_ref()
                .map(|dir| dir.join(pipeline_cache_file(&device.props)));
            let pipeline_cache = match create_pipeline_cache(&device.raw, cache_path.as_deref()) {
                Ok(c) => c,
                Err(e) => {
                    device.raw.destroy_command_pool(command_pool, None);
                    return Err(e);
                }
            };

            Ok(DeviceContext {
                device,
                command_pool,
                pipeline_cache,
                cache_path,
            })
        }
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device.raw
    }

    pub fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        let ai = vk::CommandBufferAllocateInfo {
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe {
            self.raw()
                .allocate_command_buffers(&ai)
                .ctx("allocate_command_buffers")
        }
    }

    pub fn free_command_buffers(&self, bufs: &[vk::CommandBuffer]) {
        if !bufs.is_empty() {
            unsafe { self.raw().free_command_buffers(self.command_pool, bufs) };
        }
    }

    /// Records through `record`, submits to the graphics queue and blocks on a
    /// fresh fence until the GPU is done.
    pub fn one_shot<F>(&self, record: F) -> RenderResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> RenderResult<()>,
    {
        let cmd = self.allocate_command_buffers(1)?[0];
        let fence = match self.device.create_fence(false) {
            Ok(f) => f,
            Err(e) => {
                self.free_command_buffers(&[cmd]);
                return Err(e);
            }
        };
        let result = self.submit_and_wait(cmd, fence, record);
        self.device.destroy_fence(fence);
        self.free_command_buffers(&[cmd]);
        result
    }

    fn submit_and_wait<F>(&self, cmd: vk::CommandBuffer, fence: vk::Fence, record: F) -> RenderResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> RenderResult<()>,
    {
        let d = self.raw();
        unsafe {
            let bi = vk::CommandBufferBeginInfo {
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &bi).ctx("begin_command_buffer")?;
            record(d, cmd)?;
            d.end_command_buffer(cmd).ctx("end_command_buffer")?;

            let si = vk::SubmitInfo {
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            d.queue_submit(self.device.queues.graphics, std::slice::from_ref(&si), fence)
                .ctx("queue_submit")?;
            d.wait_for_fences(&[fence], true, u64::MAX)
                .ctx("wait_for_fences")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn shared_family_wins() {
        let props = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let f = find_queue_families(&props, |i| i != 1).unwrap();
        assert_eq!(f, QueueFamilies { graphics: 2, present: 2 });
        assert_eq!(f.unique(), vec![2]);
    }

    #[test]
    fn split_families_are_both_created() {
        let props = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let f = find_queue_families(&props, |i| i == 1).unwrap();
        assert_eq!(f, QueueFamilies { graphics: 0, present: 1 });
        assert_eq!(f.unique(), vec![0, 1]);
    }

    #[test]
    fn no_present_support_is_unsuitable() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(find_queue_families(&props, |_| false), None);
        let report = DeviceReport {
            families: None,
            surface_formats: 1,
            present_modes: 1,
            ..Default::default()
        };
        assert!(!report.is_suitable());
    }

    #[test]
    fn suitability_needs_formats_modes_and_extensions() {
        let families = Some(QueueFamilies { graphics: 0, present: 0 });
        let ok = DeviceReport {
            families,
            missing_extensions: vec![],
            surface_formats: 2,
            present_modes: 1,
        };
        assert!(ok.is_suitable());
        assert!(!DeviceReport { present_modes: 0, ..ok }.is_suitable());
        let missing = DeviceReport {
            families,
            missing_extensions: vec!["VK_KHR_swapchain".into()],
            surface_formats: 2,
            present_modes: 1,
        };
        assert!(!missing.is_suitable());
    }

    #[test]
    fn missing_names_lists_absent_entries() {
        let required = vec![c"VK_KHR_swapchain".to_owned(), c"VK_EXT_other".to_owned()];
        let available = [c"VK_KHR_swapchain"];
        assert_eq!(missing_names(&required, &available), vec!["VK_EXT_other"]);
    }

    #[test]
    fn memory_type_respects_bits_and_flags() {
        let mut mem = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        mem.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        mem.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        mem.memory_types[2].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL
            | vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type_index(&mem, 0b111, host), Some(1));
        assert_eq!(find_memory_type_index(&mem, 0b100, host), Some(2));
        assert_eq!(
            find_memory_type_index(&mem, 0b010, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }

    #[test]
    fn cache_file_name_encodes_device_identity() {
        let props = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2204,
            driver_version: 0x1,
            pipeline_cache_uuid: [0xab; vk::UUID_SIZE],
            ..Default::default()
        };
        let name = pipeline_cache_file(&props).to_string_lossy().into_owned();
        assert!(name.starts_with("vk_pipeline_cache_10de_2204_00000001_abab"));
        assert!(name.ends_with(".bin"));
    }
}
