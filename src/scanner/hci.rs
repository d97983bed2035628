//! Raw HCI socket backend for advertisement scanning.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::Advertisement;
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;
const HCI_DEV_ID: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

/// Passive scan, 10ms interval and window (0.625ms units), public own
/// address, accept all advertisers.
const SCAN_PARAMETERS: [u8; 7] = [0x00, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00];
/// Enable scanning without duplicate filtering.
const SCAN_ENABLE: [u8; 2] = [0x01, 0x00];

const AD_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Controllers report 127 when RSSI is unavailable.
const RSSI_UNAVAILABLE: i8 = 127;

/// Largest HCI event: header plus 255 parameter bytes.
const MAX_EVENT_SIZE: usize = 258;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// Kernel-side packet filter for raw HCI sockets.
#[repr(C)]
#[derive(Default)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    /// A filter passing only LE meta events.
    fn le_meta_events() -> Self {
        let mut filter = HciFilter::default();
        filter.type_mask |= 1 << u32::from(HCI_EVENT_PKT);
        let bit = usize::from(EVT_LE_META_EVENT);
        filter.event_mask[bit / 32] |= 1 << (bit % 32);
        filter
    }
}

fn os_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// A raw HCI socket bound to one controller.
struct HciSocket(OwnedFd);

impl HciSocket {
    /// Open a non-blocking raw socket and bind it to `dev_id`.
    fn bind(dev_id: u16) -> Result<Self, ScanError> {
        // SAFETY: plain socket(2) call; the result is checked before use.
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        if fd < 0 {
            return Err(os_error("Failed to create HCI socket"));
        }
        // SAFETY: fd is a freshly created descriptor owned by nobody else.
        let socket = HciSocket(unsafe { OwnedFd::from_raw_fd(fd) });

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        // SAFETY: addr outlives the call and the length matches its type.
        let ret = unsafe {
            libc::bind(
                socket.0.as_raw_fd(),
                &addr as *const SockaddrHci as *const sockaddr,
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to bind HCI socket"));
        }
        Ok(socket)
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), ScanError> {
        // SAFETY: filter outlives the call and the length matches its type.
        let ret = unsafe {
            libc::setsockopt(
                self.0.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to set HCI filter"));
        }
        Ok(())
    }

    fn send_command(&self, ogf: u16, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
        let packet = command_packet(ogf, ocf, params);
        // SAFETY: packet is a live buffer of the given length.
        let ret = unsafe {
            libc::write(
                self.0.as_raw_fd(),
                packet.as_ptr() as *const c_void,
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to send HCI command"));
        }
        Ok(())
    }
}

impl AsRawFd for HciSocket {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

/// Encode an HCI command packet.
fn command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Extract the first advertisement from an HCI LE advertising report event.
///
/// `event` is a full packet as read from the socket, starting with the packet
/// type byte. Returns `None` for other events and truncated reports.
fn parse_advertising_report(event: &[u8]) -> Option<Advertisement> {
    let [HCI_EVENT_PKT, EVT_LE_META_EVENT, _, EVT_LE_ADVERTISING_REPORT, report @ ..] = event
    else {
        return None;
    };

    // num_reports, event_type, addr_type, addr[6], data_len
    let (header, rest) = report.split_first_chunk::<10>()?;
    let &[num_reports, _, _, a0, a1, a2, a3, a4, a5, data_len] = header;
    if num_reports == 0 {
        return None;
    }
    let data_len = usize::from(data_len);
    let ad_data = rest.get(..data_len)?;
    let rssi = rest
        .get(data_len)
        .map(|&b| b as i8)
        .filter(|&r| r != RSSI_UNAVAILABLE)
        .map(i16::from);

    let mut adv = Advertisement {
        // HCI sends the address least significant byte first.
        address: MacAddress([a5, a4, a3, a2, a1, a0]),
        rssi,
        manufacturer_data: Vec::new(),
        local_name: None,
    };

    let mut fields = ad_data;
    while let [len, tail @ ..] = fields {
        let len = usize::from(*len);
        if len == 0 || len > tail.len() {
            break;
        }
        let (field, next) = tail.split_at(len);
        match field {
            [AD_TYPE_MANUFACTURER_DATA, data @ ..] if adv.manufacturer_data.is_empty() => {
                adv.manufacturer_data = data.to_vec();
            }
            [AD_TYPE_COMPLETE_LOCAL_NAME, name @ ..] => {
                adv.local_name = Some(String::from_utf8_lossy(name).into_owned());
            }
            [AD_TYPE_SHORT_LOCAL_NAME, name @ ..] if adv.local_name.is_none() => {
                adv.local_name = Some(String::from_utf8_lossy(name).into_owned());
            }
            _ => {}
        }
        fields = next;
    }

    Some(adv)
}

/// What the event loop does after a non-blocking read attempt.
#[derive(Debug, PartialEq, Eq)]
enum ReadStep {
    Packet(usize),
    Retry,
    Stop,
}

/// Classify a read that did not hit `WouldBlock`.
///
/// End of stream and hard errors stop the scan: the socket stays readable in
/// both cases, so waiting again would spin.
fn classify_read(result: io::Result<usize>) -> ReadStep {
    match result {
        Ok(0) => {
            error!("HCI socket closed");
            ReadStep::Stop
        }
        Ok(n) => ReadStep::Packet(n),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadStep::Retry,
        Err(e) => {
            error!(error = %e, "HCI read failed, stopping scan");
            ReadStep::Stop
        }
    }
}

/// Start scanning using raw HCI sockets.
///
/// Opens one socket for events and one for commands on `hci0`, enables
/// passive LE scanning and forwards every advertising report through the
/// returned channel.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan() -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let events = HciSocket::bind(HCI_DEV_ID)?;
    events.set_filter(&HciFilter::le_meta_events())?;

    let commands = HciSocket::bind(HCI_DEV_ID)?;
    commands.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &SCAN_PARAMETERS)?;
    commands.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &SCAN_ENABLE)?;

    let async_fd = AsyncFd::new(events)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        let _commands = commands;
        let mut buf = [0u8; MAX_EVENT_SIZE];

        'outer: loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(error = %e, "HCI socket no longer readable");
                    break;
                }
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    // SAFETY: buf is a live buffer of the given length.
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(result) => match classify_read(result) {
                        ReadStep::Packet(n) => n,
                        ReadStep::Retry => continue,
                        ReadStep::Stop => break 'outer,
                    },
                    Err(_would_block) => break,
                };

                match parse_advertising_report(&buf[..n]) {
                    Some(adv) => {
                        if tx.send(adv).await.is_err() {
                            break 'outer;
                        }
                    }
                    None => trace!(len = n, "skipping HCI event"),
                }
            }
        }
    });

    Ok(rx)
}
