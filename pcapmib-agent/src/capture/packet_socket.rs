//! Live capture on Linux `AF_PACKET` raw sockets
//!
//! One raw packet socket per handle, bound to the device's interface index
//! (or to every interface for [`ANY_DEVICE`]) and put in promiscuous mode.
//! Frames are read with `MSG_TRUNC` so only the head needed by the filter is
//! copied while the returned length is still the full frame length.

use super::{is_would_block, CaptureBackend, CaptureError, CaptureHandle, ANY_DEVICE};
use crate::filter::{Filter, FILTER_SNAP_LENGTH};
use log::{debug, warn};
use std::ffi::CString;
use std::fs;
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

const SYS_CLASS_NET: &str = "/sys/class/net";

// <linux/if_packet.h>
const SOL_PACKET: libc::c_int = 263;
const PACKET_ADD_MEMBERSHIP: libc::c_int = 1;
const PACKET_MR_PROMISC: libc::c_ushort = 1;

#[repr(C)]
struct PacketMreq {
    mr_ifindex: libc::c_int,
    mr_type: libc::c_ushort,
    mr_alen: libc::c_ushort,
    mr_address: [libc::c_uchar; 8],
}

/// Opens [`PacketSocket`]s; needs `CAP_NET_RAW`
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketSocketBackend;

impl CaptureBackend for PacketSocketBackend {
    type Handle = PacketSocket;

    /// First interface, by name, that is up and is not loopback
    fn default_device(&self) -> Result<String, CaptureError> {
        let entries = fs::read_dir(SYS_CLASS_NET)
            .map_err(|e| CaptureError::NoDefaultDevice(format!("{}: {}", SYS_CLASS_NET, e)))?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "lo")
            .collect();
        names.sort();

        names
            .into_iter()
            .find(|name| {
                fs::read_to_string(format!("{}/{}/operstate", SYS_CLASS_NET, name))
                    .map(|state| state.trim() == "up")
                    .unwrap_or(false)
            })
            .ok_or_else(|| CaptureError::NoDefaultDevice("no interface is up".to_string()))
    }

    fn open(&self, device: &str) -> Result<PacketSocket, CaptureError> {
        PacketSocket::open(device)
    }
}

/// Raw packet socket capturing on one device
pub struct PacketSocket {
    fd: OwnedFd,
    device: String,
    filter: Option<Filter>,
    buffer: [u8; FILTER_SNAP_LENGTH],
}

impl PacketSocket {
    fn open(device: &str) -> Result<Self, CaptureError> {
        let ifindex = if device == ANY_DEVICE {
            0
        } else {
            interface_index(device)?
        };
        let protocol = (libc::ETH_P_ALL as u16).to_be();

        let raw = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::c_int::from(protocol),
            )
        };
        if raw < 0 {
            return Err(CaptureError::last_os_error("socket(AF_PACKET)"));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = ifindex;

        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(CaptureError::last_os_error("bind"));
        }

        if ifindex != 0 {
            if let Err(e) = enable_promiscuous(&fd, ifindex) {
                warn!("Could not enable promiscuous mode on {}: {}", device, e);
            }
        }

        debug!("Opened packet socket on {} (ifindex {})", device, ifindex);

        Ok(Self {
            fd,
            device: device.to_string(),
            filter: None,
            buffer: [0u8; FILTER_SNAP_LENGTH],
        })
    }
}

fn interface_index(device: &str) -> Result<libc::c_int, CaptureError> {
    let name = CString::new(device).map_err(|_| CaptureError::UnknownDevice(device.to_string()))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(CaptureError::UnknownDevice(device.to_string()));
    }
    libc::c_int::try_from(index).map_err(|_| CaptureError::UnknownDevice(device.to_string()))
}

fn enable_promiscuous(fd: &OwnedFd, ifindex: libc::c_int) -> io::Result<()> {
    let mreq = PacketMreq {
        mr_ifindex: ifindex,
        mr_type: PACKET_MR_PROMISC,
        mr_alen: 0,
        mr_address: [0; 8],
    };

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_PACKET,
            PACKET_ADD_MEMBERSHIP,
            &mreq as *const PacketMreq as *const libc::c_void,
            mem::size_of::<PacketMreq>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl CaptureHandle for PacketSocket {
    fn attach_filter(&mut self, filter: Filter) -> Result<(), CaptureError> {
        debug!("Filter '{}' attached on {}", filter.as_str(), self.device);
        self.filter = Some(filter);
        Ok(())
    }

    fn set_nonblocking(&mut self) -> Result<(), CaptureError> {
        let fd = self.fd.as_raw_fd();
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 {
                return Err(CaptureError::last_os_error("fcntl(F_GETFL)"));
            }
            if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(CaptureError::last_os_error("fcntl(F_SETFL)"));
            }
        }
        Ok(())
    }

    fn selectable_fd(&self) -> Result<BorrowedFd<'_>, CaptureError> {
        Ok(self.fd.as_fd())
    }

    fn drain(&mut self, on_frame: &mut dyn FnMut(u32)) -> Result<usize, CaptureError> {
        let mut reported = 0;
        loop {
            let ret = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    self.buffer.as_mut_ptr() as *mut libc::c_void,
                    self.buffer.len(),
                    libc::MSG_TRUNC | libc::MSG_DONTWAIT,
                )
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if is_would_block(&err) {
                    return Ok(reported);
                }
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(CaptureError::io("recv", err));
            }

            let len = ret as usize;
            let head = &self.buffer[..len.min(self.buffer.len())];
            if self.filter.as_ref().is_some_and(|f| !f.matches(head)) {
                continue;
            }

            on_frame(u32::try_from(len).unwrap_or(u32::MAX));
            reported += 1;
        }
    }
}

impl Drop for PacketSocket {
    fn drop(&mut self) {
        debug!("Closing packet socket on {}", self.device);
    }
}
