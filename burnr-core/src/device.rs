use std::fmt;
use std::path::PathBuf;

/// Describes a block device that can be written to.
///
/// Descriptors are produced by the discovery functions in [`crate::platform`]
/// and treated as read-only input by the rest of the library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// The kernel-provided name of the device (e.g., "sdb").
    pub id: String,
    /// The system path to the device (e.g., `/dev/sdb`).
    pub path: PathBuf,
    /// The total capacity of the device in bytes.
    pub size: u64,
    /// A human-readable label, usually the vendor model string.
    pub label: String,
    pub removable: bool,
    /// The primary mount point of the device or one of its partitions, if any.
    pub mount_point: Option<PathBuf>,
}

impl DeviceDescriptor {
    /// The node that grants direct, unbuffered access to the device.
    ///
    /// Linux block device nodes already bypass any character-device layer, so
    /// this is the device path itself.
    pub fn raw_path(&self) -> PathBuf {
        self.path.clone()
    }

    /// The device size formatted for display (e.g., "15.9 GB").
    pub fn formatted_size(&self) -> String {
        crate::progress::format_bytes(self.size)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.label.is_empty() {
            "Unknown"
        } else {
            &self.label
        };
        let mount_info = match &self.mount_point {
            Some(mp) => format!("[Mounted at {}]", mp.display()),
            None => "[Not mounted]".to_string(),
        };

        write!(
            f,
            "{:<15} {:<24} {:>9} {}",
            self.path.display(),
            label,
            self.formatted_size(),
            mount_info
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeviceDescriptor {
        DeviceDescriptor {
            id: "sdb".to_string(),
            path: PathBuf::from("/dev/sdb"),
            size: 15_931_539_456,
            label: "Ultra Fit".to_string(),
            removable: true,
            mount_point: None,
        }
    }

    #[test]
    fn test_display_includes_label_and_size() {
        let line = sample().to_string();
        assert!(line.starts_with("/dev/sdb"));
        assert!(line.contains("Ultra Fit"));
        assert!(line.contains("15.9 GB"));
        assert!(line.ends_with("[Not mounted]"));
    }

    #[test]
    fn test_display_unknown_label_and_mount() {
        let mut device = sample();
        device.label.clear();
        device.mount_point = Some(PathBuf::from("/media/usb"));
        let line = device.to_string();
        assert!(line.contains("Unknown"));
        assert!(line.ends_with("[Mounted at /media/usb]"));
    }
}
