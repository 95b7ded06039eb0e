use tch::Device;

#[cfg(any(target_os = "linux", target_os = "windows"))]
pub fn get_device() -> Device {
    Device::cuda_if_available()
}

#[cfg(target_os = "macos")]
pub fn get_device() -> Device {
    Device::Mps
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
pub fn get_device() -> Device {
    Device::Cpu
}

/// Short name for reports, e.g. `cuda:0`.
pub fn describe(device: Device) -> String {
    match device {
        Device::Cpu => "cpu".to_string(),
        Device::Cuda(index) => format!("cuda:{index}"),
        other => format!("{other:?}").to_lowercase(),
    }
}
