use crate::device::DeviceDescriptor;
use crate::error::{FlashError, Result};
use crate::volume::{Completion, UnmountOptions, VolumeControl};
use nix::errno::Errno;
use nix::ioctl_read;
use nix::mount::{MntFlags, umount2};
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;

ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Helper to read a specific file from the /sys/block filesystem.
fn read_sys_file(device_name: &str, file: &str) -> io::Result<String> {
    let path = PathBuf::from("/sys/block").join(device_name).join(file);
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// The kernel name of a device node (e.g., `/dev/sdb1` -> `sdb1`).
fn kernel_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Whether `name` is a partition of the whole disk `disk` (e.g., `sdb1` of
/// `sdb`, `mmcblk0p2` of `mmcblk0`).
pub fn is_partition_of(name: &str, disk: &str) -> bool {
    let Some(rest) = name.strip_prefix(disk) else {
        return false;
    };
    // Disks whose name ends in a digit separate the partition number with 'p'.
    let number = if disk.ends_with(|c: char| c.is_ascii_digit()) {
        match rest.strip_prefix('p') {
            Some(number) => number,
            None => return false,
        }
    } else {
        rest
    };
    !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
}

/// Finds the whole disk a partition belongs to (e.g., `sda1` -> `sda`,
/// `nvme0n1p2` -> `nvme0n1`). Whole-disk names are returned unchanged.
pub fn parent_disk(name: &str) -> String {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if stem.len() == name.len() {
        return name.to_string();
    }
    if let Some(disk) = stem.strip_suffix('p') {
        if disk.ends_with(|c: char| c.is_ascii_digit()) {
            return disk.to_string();
        }
    }
    if ["sd", "vd", "hd", "xvd"].iter().any(|prefix| name.starts_with(prefix)) {
        return stem.to_string();
    }
    name.to_string()
}

/// A mounted filesystem as seen by `sysinfo`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Mount {
    source: String,
    point: PathBuf,
}

fn current_mounts() -> Vec<Mount> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .iter()
        .map(|disk| Mount {
            source: kernel_name(Path::new(disk.name())),
            point: disk.mount_point().to_path_buf(),
        })
        .filter(|mount| !mount.point.as_os_str().is_empty())
        .collect()
}

/// Mount points backed by `device_id` (and its partitions when `whole`),
/// deepest first so nested mounts come off before their parents.
fn mounts_to_release(mounts: &[Mount], device_id: &str, whole: bool) -> Vec<PathBuf> {
    let mut points: Vec<PathBuf> = mounts
        .iter()
        .filter(|m| m.source == device_id || (whole && is_partition_of(&m.source, device_id)))
        .map(|m| m.point.clone())
        .collect();
    points.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    points.dedup();
    points
}

fn primary_mount_point(mounts: &[Mount], device_id: &str) -> Option<PathBuf> {
    mounts
        .iter()
        .find(|m| m.source == device_id || is_partition_of(&m.source, device_id))
        .map(|m| m.point.clone())
}

/// Scans for all removable block devices on a Linux system.
///
/// Devices are discovered through `/sys/block`. Loop devices, the drive
/// holding `/`, anything not flagged removable and anything reporting a size
/// of zero (usually an empty card reader) are skipped.
pub fn removable_devices() -> Result<Vec<DeviceDescriptor>> {
    let mounts = current_mounts();
    let system_disk = mounts
        .iter()
        .find(|m| m.point == Path::new("/"))
        .map(|m| parent_disk(&m.source))
        .ok_or_else(|| io::Error::other("could not determine system drive"))?;

    let mut devices = Vec::new();
    for entry in fs::read_dir("/sys/block")?.filter_map(io::Result::ok) {
        let id = entry.file_name().to_string_lossy().to_string();

        if id.starts_with("loop") || id == system_disk {
            continue;
        }

        let removable = read_sys_file(&id, "removable")
            .map(|s| s == "1")
            .unwrap_or(false);
        if !removable {
            continue;
        }

        let size_sectors = read_sys_file(&id, "size")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        if size_sectors == 0 {
            continue;
        }

        devices.push(DeviceDescriptor {
            path: PathBuf::from("/dev").join(&id),
            size: size_sectors * 512,
            label: read_sys_file(&id, "device/model").unwrap_or_default(),
            removable,
            mount_point: primary_mount_point(&mounts, &id),
            id,
        });
    }

    devices.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::debug!(count = devices.len(), "removable devices found");
    Ok(devices)
}

/// Builds a descriptor for an explicit path.
///
/// Block devices are sized with `BLKGETSIZE64`; regular files (disk images
/// used as targets) use their length.
pub fn describe(path: &Path) -> Result<DeviceDescriptor> {
    let file = File::open(path).map_err(|e| {
        FlashError::Io(io::Error::new(
            e.kind(),
            format!("cannot open device {}: {e}", path.display()),
        ))
    })?;
    let metadata = file.metadata()?;

    let size = if metadata.file_type().is_block_device() {
        let mut size_bytes: u64 = 0;
        // SAFETY: BLKGETSIZE64 writes a single u64 through the pointer.
        unsafe { blkgetsize64(file.as_raw_fd(), &mut size_bytes) }.map_err(io::Error::from)?;
        size_bytes
    } else {
        metadata.len()
    };

    let id = kernel_name(path);
    let mounts = current_mounts();
    Ok(DeviceDescriptor {
        path: path.to_path_buf(),
        size,
        label: read_sys_file(&id, "device/model").unwrap_or_default(),
        removable: read_sys_file(&id, "removable").is_ok_and(|s| s == "1"),
        mount_point: primary_mount_point(&mounts, &id),
        id,
    })
}

fn release(points: &[PathBuf], force: bool) -> bool {
    let flags = if force {
        MntFlags::MNT_FORCE
    } else {
        MntFlags::empty()
    };
    let mut ok = true;
    for point in points {
        match umount2(point.as_path(), flags) {
            Ok(()) => tracing::info!(mount_point = %point.display(), "unmounted"),
            // Already gone.
            Err(Errno::EINVAL) | Err(Errno::ENOENT) => {}
            Err(e) => {
                tracing::warn!(mount_point = %point.display(), error = %e, "unmount failed");
                ok = false;
            }
        }
    }
    ok
}

/// Volume control backed by `umount2(2)` and the `eject` utility. Requests
/// run on their own threads and complete from there.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinuxVolumes;

impl VolumeControl for LinuxVolumes {
    fn unmount(&self, device_id: &str, options: UnmountOptions, done: Completion) {
        let points = mounts_to_release(&current_mounts(), device_id, options.whole);
        tracing::debug!(device = device_id, mounts = points.len(), "unmounting");
        let spawned = thread::Builder::new()
            .name("burnr-unmount".into())
            .spawn(move || done(release(&points, options.force)));
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "cannot start unmount thread");
        }
    }

    fn eject(&self, device_id: &str, done: Completion) {
        let node = PathBuf::from("/dev").join(device_id);
        let spawned = thread::Builder::new()
            .name("burnr-eject".into())
            .spawn(move || {
                let ok = match Command::new("eject").arg(&node).status() {
                    Ok(status) => status.success(),
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot run eject");
                        false
                    }
                };
                done(ok);
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "cannot start eject thread");
        }
    }
}
