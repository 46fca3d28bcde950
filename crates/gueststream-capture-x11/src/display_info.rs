//! Display topology: which device and output each stream is showing.
//!
//! The rich path pairs every connected RandR output with the PCI address of
//! the DRM card behind the X server. When any of that is unavailable the
//! core-protocol screens are reported instead, with an empty device address.

use std::fs;
use std::path::{Path, PathBuf};

use gueststream_core::{AgentError, DeviceDisplayInfo, ErrorKind};
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::randr::{self, ConnectionExt as _};

use crate::x11_err;

/// sysfs link to the device behind the first DRM card.
pub const DRM_DEVICE_LINK: &str = "/sys/class/drm/card0/device";

/// Minimum RandR version providing `GetScreenResourcesCurrent`.
const RANDR_MAJOR: u32 = 1;
const RANDR_MINOR: u32 = 3;

/// Describe the outputs of `conn`. Never fails: the rich path falls back to
/// the core screen list.
pub fn device_display_info(conn: &impl Connection, screen_num: usize) -> Vec<DeviceDisplayInfo> {
    match device_display_info_drm(conn, screen_num, Path::new(DRM_DEVICE_LINK)) {
        Ok(infos) => infos,
        Err(e) => {
            warn!("Failed to get device info using DRM: {}. Using no-DRM fallback.", e);
            device_display_info_no_drm(conn)
        }
    }
}

fn device_display_info_drm(
    conn: &impl Connection,
    screen_num: usize,
    drm_link: &Path,
) -> Result<Vec<DeviceDisplayInfo>, AgentError> {
    let address = pci_device_address(drm_link)?;
    let outputs = randr_outputs(conn, screen_num)?;
    if outputs.is_empty() {
        return Err(AgentError::new(ErrorKind::Io, "no connected RandR output"));
    }

    Ok(outputs
        .into_iter()
        .enumerate()
        .map(|(id, descriptor)| DeviceDisplayInfo {
            stream_id:         0,
            device_address:    address.clone(),
            device_display_id: id as u32,
            descriptor,
        })
        .collect())
}

/// One `DeviceDisplayInfo` per core-protocol screen.
pub fn device_display_info_no_drm(conn: &impl Connection) -> Vec<DeviceDisplayInfo> {
    conn.setup()
        .roots
        .iter()
        .enumerate()
        .map(|(n, screen)| DeviceDisplayInfo {
            stream_id:         0,
            device_address:    String::new(),
            device_display_id: n as u32,
            descriptor:        format!(
                "screen-{} {}x{}",
                n, screen.width_in_pixels, screen.height_in_pixels
            ),
        })
        .collect()
}

/// Descriptors `"<name> <w>x<h>+<x>+<y>"` of the connected outputs that are
/// driving a CRTC, in RandR order.
fn randr_outputs(conn: &impl Connection, screen_num: usize) -> Result<Vec<String>, AgentError> {
    let root = conn
        .setup()
        .roots
        .get(screen_num)
        .ok_or_else(|| AgentError::new(ErrorKind::Io, "Cannot get X11 screen"))?
        .root;

    let version = conn
        .randr_query_version(RANDR_MAJOR, RANDR_MINOR)
        .map_err(x11_err(ErrorKind::Io, "RandR"))?
        .reply()
        .map_err(x11_err(ErrorKind::Io, "RandR"))?;
    if (version.major_version, version.minor_version) < (RANDR_MAJOR, RANDR_MINOR) {
        return Err(AgentError::new(
            ErrorKind::Io,
            format!("RandR {}.{} is too old", version.major_version, version.minor_version),
        ));
    }

    let resources = conn
        .randr_get_screen_resources_current(root)
        .map_err(x11_err(ErrorKind::Io, "GetScreenResourcesCurrent"))?
        .reply()
        .map_err(x11_err(ErrorKind::Io, "GetScreenResourcesCurrent"))?;

    let mut descriptors = Vec::new();
    for &output in &resources.outputs {
        let info = conn
            .randr_get_output_info(output, resources.config_timestamp)
            .map_err(x11_err(ErrorKind::Io, "GetOutputInfo"))?
            .reply()
            .map_err(x11_err(ErrorKind::Io, "GetOutputInfo"))?;
        if info.connection != randr::Connection::CONNECTED || info.crtc == 0 {
            continue;
        }

        let crtc = conn
            .randr_get_crtc_info(info.crtc, resources.config_timestamp)
            .map_err(x11_err(ErrorKind::Io, "GetCrtcInfo"))?
            .reply()
            .map_err(x11_err(ErrorKind::Io, "GetCrtcInfo"))?;

        let name = String::from_utf8_lossy(&info.name);
        let descriptor = format!("{} {}x{}+{}+{}", name, crtc.width, crtc.height, crtc.x, crtc.y);
        debug!("RandR output {}", descriptor);
        descriptors.push(descriptor);
    }
    Ok(descriptors)
}

/// Resolve the sysfs device link of a DRM card into `pci/<domain>/<slot>.<fn>[/...]`.
pub fn pci_device_address(drm_link: &Path) -> Result<String, AgentError> {
    let device: PathBuf = fs::canonicalize(drm_link)
        .map_err(|e| AgentError::new(ErrorKind::Io, format!("{}: {e}", drm_link.display())))?;
    pci_address_from_sysfs(&device).ok_or_else(|| {
        AgentError::new(
            ErrorKind::Io,
            format!("{} is not a PCI device", device.display()),
        )
    })
}

/// `/sys/devices/pci0000:00/0000:00:1c.0/0000:01:00.0` → `pci/0000/1c.0/00.0`.
///
/// Every PCI hop on the way to the device contributes its `<slot>.<fn>`; the
/// domain is taken from the first one.
pub fn pci_address_from_sysfs(device: &Path) -> Option<String> {
    let mut domain = None;
    let mut hops = Vec::new();

    for component in device.iter().filter_map(|c| c.to_str()) {
        let Some((dom, slot_fn)) = split_pci_component(component) else {
            continue;
        };
        domain.get_or_insert(dom);
        hops.push(slot_fn);
    }

    let domain = domain?;
    Some(format!("pci/{}/{}", domain, hops.join("/")))
}

/// `0000:01:00.0` → `("0000", "00.0")`.
fn split_pci_component(component: &str) -> Option<(&str, &str)> {
    let mut parts = component.splitn(3, ':');
    let domain = parts.next()?;
    let bus = parts.next()?;
    let slot_fn = parts.next()?;

    let hex = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit());
    let (slot, function) = slot_fn.split_once('.')?;
    (domain.len() == 4 && hex(domain) && hex(bus) && slot.len() == 2 && hex(slot) && hex(function))
        .then_some((domain, slot_fn))
}
