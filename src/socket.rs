//! Raw SocketCAN socket layer.
//!
//! One [`CanSocket`] per captured interface: opened as a `PF_CAN`/`CAN_RAW`
//! socket, configured with the compiled filter set and the requested socket
//! options, then bound to the resolved interface index (or the wildcard
//! index 0 for the reserved `any` name). Receives go through `recvmsg(2)`
//! so the kernel's ancillary data — timestamps and the receive-queue
//! overflow counter — arrives with each frame; [`decode_ancillary`] is the
//! one place that has to match the host kernel's control-message layout.

use std::ffi::CString;
use std::io;
use std::mem::{size_of, zeroed};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tracing::{debug, warn};

use crate::error::{CaptureError, Result};
use crate::filter::FilterSet;
use crate::types::{ANY_INTERFACE, TimestampMode};

// Constants from <linux/can.h> and <linux/can/raw.h>.
const PF_CAN: libc::c_int = 29;
const AF_CAN: libc::c_int = 29;
const CAN_RAW: libc::c_int = 1;
const SOL_CAN_BASE: libc::c_int = 100;
const SOL_CAN_RAW: libc::c_int = SOL_CAN_BASE + CAN_RAW;

const CAN_RAW_FILTER: libc::c_int = 1;
const CAN_RAW_ERR_FILTER: libc::c_int = 2;
const CAN_RAW_FD_FRAMES: libc::c_int = 5;
const CAN_RAW_JOIN_FILTERS: libc::c_int = 6;

/// Classic CAN frame size on the wire.
pub(crate) const CAN_MTU: usize = 16;
/// CAN FD frame size on the wire.
pub(crate) const CANFD_MTU: usize = 72;
/// Classic CAN payload limit.
pub(crate) const CAN_MAX_DLEN: usize = 8;
/// CAN FD payload limit.
pub(crate) const CANFD_MAX_DLEN: usize = 64;

// From <linux/net_tstamp.h> - since Linux 2.6.30.
const SO_TIMESTAMPING: libc::c_int = 37;
const SOF_TIMESTAMPING_RX_SOFTWARE: libc::c_int = 1 << 3;
const SOF_TIMESTAMPING_SOFTWARE: libc::c_int = 1 << 4;
const SOF_TIMESTAMPING_RAW_HARDWARE: libc::c_int = 1 << 6;

/// `struct sockaddr_can`, with the protocol-specific address union folded
/// into its two fixed words.
#[repr(C)]
#[derive(Clone, Copy)]
struct CanAddr {
    can_family: libc::sa_family_t,
    can_ifindex: libc::c_int,
    _rx_id: u32,
    _tx_id: u32,
}

/// `struct canfd_frame`; a classic `can_frame` is a 16-byte prefix of this
/// layout, so a single receive buffer covers both MTUs.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RawCanFrame {
    pub can_id: u32,
    pub len: u8,
    _flags: u8,
    _res0: u8,
    _res1: u8,
    pub data: [u8; CANFD_MAX_DLEN],
}

/// `struct can_filter`.
#[repr(C)]
#[derive(Clone, Copy)]
struct RawCanFilter {
    can_id: u32,
    can_mask: u32,
}

/// Typed result of walking one receive's ancillary data.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AncillaryData {
    /// Receive timestamp in seconds, when timestamp delivery is enabled.
    pub timestamp: Option<f64>,
    /// Cumulative receive-queue overflow count, when drop monitoring is
    /// enabled.
    pub dropped: Option<u32>,
}

/// One received frame plus its metadata.
pub(crate) struct Received {
    pub nbytes: usize,
    pub frame: RawCanFrame,
    pub ifindex: u32,
    pub meta: AncillaryData,
}

// Room for a timeval, three timespecs and the overflow counter, plus
// headers.
const CMSG_BUF_LEN: usize = 256;

#[repr(align(8))]
struct CmsgBuffer([u8; CMSG_BUF_LEN]);

/// A bound raw CAN socket for one captured interface.
pub(crate) struct CanSocket {
    fd: OwnedFd,
    name: String,
    ifindex: u32,
}

impl CanSocket {
    /// Open a raw CAN socket and resolve `name` to its kernel index.
    ///
    /// The reserved name [`ANY_INTERFACE`] skips resolution and later binds
    /// with the wildcard index 0.
    pub fn open(name: &str) -> Result<Self> {
        let max = libc::IF_NAMESIZE - 1;
        if name.len() > max {
            return Err(CaptureError::InterfaceNameTooLong { name: name.to_string(), max });
        }

        let fd = unsafe { libc::socket(PF_CAN, libc::SOCK_RAW, CAN_RAW) };
        if fd < 0 {
            return Err(CaptureError::socket("socket", name, io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let ifindex = if name == ANY_INTERFACE {
            0
        } else {
            let c_name = CString::new(name)
                .map_err(|_| CaptureError::config(format!("invalid interface name '{name}'")))?;
            let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
            if index == 0 {
                return Err(CaptureError::socket(
                    "if_nametoindex",
                    name,
                    io::Error::last_os_error(),
                ));
            }
            index
        };

        Ok(Self { fd, name: name.to_string(), ifindex })
    }

    /// Interface name this socket was opened for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply a compiled filter set: error mask, join flag, accept rules.
    ///
    /// A join flag or inverted rule the running kernel rejects is a fatal
    /// configuration error, not a silent fallback.
    pub fn apply_filters(&self, set: &FilterSet) -> Result<()> {
        if set.err_mask != 0 {
            self.set_option(SOL_CAN_RAW, CAN_RAW_ERR_FILTER, &set.err_mask).map_err(|e| {
                CaptureError::socket("setsockopt CAN_RAW_ERR_FILTER", &self.name, e)
            })?;
        }

        if set.join {
            let join: libc::c_int = 1;
            self.set_option(SOL_CAN_RAW, CAN_RAW_JOIN_FILTERS, &join).map_err(|e| {
                CaptureError::UnsupportedFilter { feature: "CAN_RAW_JOIN_FILTERS", source: e }
            })?;
        }

        if !set.rules.is_empty() {
            let rules: Vec<RawCanFilter> = set
                .rules
                .iter()
                .map(|r| RawCanFilter { can_id: r.id, can_mask: r.mask })
                .collect();
            let ret = unsafe {
                libc::setsockopt(
                    self.fd.as_raw_fd(),
                    SOL_CAN_RAW,
                    CAN_RAW_FILTER,
                    rules.as_ptr().cast(),
                    std::mem::size_of_val(rules.as_slice()) as libc::socklen_t,
                )
            };
            if ret < 0 {
                let source = io::Error::last_os_error();
                return Err(if set.uses_inverted_rules() {
                    CaptureError::UnsupportedFilter { feature: "CAN_INV_FILTER", source }
                } else {
                    CaptureError::socket("setsockopt CAN_RAW_FILTER", &self.name, source)
                });
            }
        }

        Ok(())
    }

    /// Switch the socket into CAN FD mode so frames arrive at whichever MTU
    /// the peer provides. Pre-FD kernels reject the option and keep
    /// delivering classic frames only.
    pub fn enable_fd_frames(&self) {
        let on: libc::c_int = 1;
        if self.set_option(SOL_CAN_RAW, CAN_RAW_FD_FRAMES, &on).is_err() {
            debug!(interface = %self.name, "CAN_RAW_FD_FRAMES not supported, classic frames only");
        }
    }

    /// Request a non-default receive-buffer size.
    ///
    /// Tries the privileged `SO_RCVBUFFORCE` first, then falls back to
    /// `SO_RCVBUF`. A shrink below the OS-adjusted size triggers a one-time
    /// warning (`warn_adjusted` is set for the first socket only).
    pub fn set_rcvbuf(&self, size: usize, warn_adjusted: bool) -> Result<()> {
        let requested = size as libc::c_int;

        if self.set_option(libc::SOL_SOCKET, libc::SO_RCVBUFFORCE, &requested).is_ok() {
            return Ok(());
        }

        self.set_option(libc::SOL_SOCKET, libc::SO_RCVBUF, &requested)
            .map_err(|e| CaptureError::socket("setsockopt SO_RCVBUF", &self.name, e))?;

        let mut current: libc::c_int = 0;
        let mut len = size_of::<libc::c_int>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                (&mut current as *mut libc::c_int).cast(),
                &mut len,
            )
        };
        if ret < 0 {
            return Err(CaptureError::socket(
                "getsockopt SO_RCVBUF",
                &self.name,
                io::Error::last_os_error(),
            ));
        }

        // the kernel doubles the requested size for bookkeeping overhead
        if warn_adjusted && current < requested * 2 {
            warn!(
                requested = size,
                granted = current,
                "socket receive buffer size was adjusted due to /proc/sys/net/core/rmem_max"
            );
        }
        Ok(())
    }

    /// Enable receive-timestamp delivery for the given mode.
    pub fn enable_timestamps(&self, mode: TimestampMode) -> Result<()> {
        match mode {
            TimestampMode::None => Ok(()),
            TimestampMode::Software => {
                let on: libc::c_int = 1;
                self.set_option(libc::SOL_SOCKET, libc::SO_TIMESTAMP, &on)
                    .map_err(|e| CaptureError::socket("setsockopt SO_TIMESTAMP", &self.name, e))
            }
            TimestampMode::Hardware => {
                let flags: libc::c_int = SOF_TIMESTAMPING_SOFTWARE
                    | SOF_TIMESTAMPING_RX_SOFTWARE
                    | SOF_TIMESTAMPING_RAW_HARDWARE;
                self.set_option(libc::SOL_SOCKET, SO_TIMESTAMPING, &flags).map_err(|e| {
                    CaptureError::socket("setsockopt SO_TIMESTAMPING", &self.name, e)
                })
            }
        }
    }

    /// Enable kernel reporting of frames discarded on receive overflow.
    pub fn enable_drop_monitor(&self) -> Result<()> {
        let on: libc::c_int = 1;
        self.set_option(libc::SOL_SOCKET, libc::SO_RXQ_OVFL, &on)
            .map_err(|e| CaptureError::socket("setsockopt SO_RXQ_OVFL", &self.name, e))
    }

    /// Bind to the resolved interface index (0 binds to every interface).
    pub fn bind(&self) -> Result<()> {
        let mut addr: CanAddr = unsafe { zeroed() };
        addr.can_family = AF_CAN as libc::sa_family_t;
        addr.can_ifindex = self.ifindex as libc::c_int;

        let ret = unsafe {
            libc::bind(
                self.fd.as_raw_fd(),
                (&addr as *const CanAddr).cast(),
                size_of::<CanAddr>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(CaptureError::socket("bind", &self.name, io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Receive exactly one frame plus its ancillary control data.
    ///
    /// `hardware_stamps` selects which `SO_TIMESTAMPING` sample is
    /// authoritative: index 2 (raw hardware) when hardware timestamping was
    /// requested, index 0 (software) otherwise.
    pub fn recv(&self, hardware_stamps: bool) -> io::Result<Received> {
        let mut frame: RawCanFrame = unsafe { zeroed() };
        let mut addr: CanAddr = unsafe { zeroed() };
        let mut cmsg_buf = CmsgBuffer([0u8; CMSG_BUF_LEN]);

        let mut iov = libc::iovec {
            iov_base: (&mut frame as *mut RawCanFrame).cast(),
            iov_len: size_of::<RawCanFrame>(),
        };
        let mut msg: libc::msghdr = unsafe { zeroed() };
        msg.msg_name = (&mut addr as *mut CanAddr).cast();
        msg.msg_namelen = size_of::<CanAddr>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.0.as_mut_ptr().cast();
        msg.msg_controllen = CMSG_BUF_LEN as _;

        let nbytes = unsafe { libc::recvmsg(self.fd.as_raw_fd(), &mut msg, 0) };
        if nbytes < 0 {
            return Err(io::Error::last_os_error());
        }

        let meta = unsafe { decode_ancillary(&msg, hardware_stamps) };
        Ok(Received {
            nbytes: nbytes as usize,
            frame,
            ifindex: addr.can_ifindex as u32,
            meta,
        })
    }

    fn set_option<T>(&self, level: libc::c_int, option: libc::c_int, value: &T) -> io::Result<()> {
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                level,
                option,
                (value as *const T).cast(),
                size_of::<T>() as libc::socklen_t,
            )
        };
        if ret < 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
    }
}

impl AsRawFd for CanSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Walk the control messages of one receive into a typed result.
///
/// # Safety
///
/// `msg` must describe a control buffer filled in by a successful
/// `recvmsg(2)` call.
unsafe fn decode_ancillary(msg: &libc::msghdr, hardware_stamps: bool) -> AncillaryData {
    let mut out = AncillaryData::default();

    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(msg) };
    while !cmsg.is_null() {
        let hdr = unsafe { &*cmsg };
        if hdr.cmsg_level == libc::SOL_SOCKET {
            let data = unsafe { libc::CMSG_DATA(cmsg) };
            match hdr.cmsg_type {
                libc::SO_TIMESTAMP => {
                    let mut tv: libc::timeval = unsafe { zeroed() };
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            data,
                            (&mut tv as *mut libc::timeval).cast(),
                            size_of::<libc::timeval>(),
                        );
                    }
                    out.timestamp = Some(tv.tv_sec as f64 + tv.tv_usec as f64 / 1e6);
                }
                SO_TIMESTAMPING => {
                    // stamp[0] is the software timestamp, stamp[1] is
                    // deprecated, stamp[2] is the raw hardware timestamp
                    let mut stamps: [libc::timespec; 3] = unsafe { zeroed() };
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            data,
                            stamps.as_mut_ptr().cast(),
                            size_of::<[libc::timespec; 3]>(),
                        );
                    }
                    let stamp = if hardware_stamps { &stamps[2] } else { &stamps[0] };
                    out.timestamp = Some(stamp.tv_sec as f64 + stamp.tv_nsec as f64 / 1e9);
                }
                libc::SO_RXQ_OVFL => {
                    let mut count: u32 = 0;
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            data,
                            (&mut count as *mut u32).cast(),
                            size_of::<u32>(),
                        );
                    }
                    out.dropped = Some(count);
                }
                _ => {}
            }
        }
        cmsg = unsafe { libc::CMSG_NXTHDR(msg, cmsg) };
    }

    out
}
