//! AF_IUCV stream transport
//!
//! Opens one stream socket to a z/VM guest's IUCV application and exposes it
//! as `Read + Write`. Each `read` returns at most one message from the peer.

use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

/// Guest user id of the RACF service machine
pub const RACF_SERVER_ID: &str = "RACFVM";
/// IUCV application name the RACF server listens on
pub const RACF_SERVICE_NAME: &str = "RISERVER";

const FIELD_LEN: usize = 8;

/// Address family number of AF_IUCV on Linux
const AF_IUCV: libc::c_int = 32;

/// `struct sockaddr_iucv` from `<netiucv/iucv.h>`
#[repr(C)]
struct SockaddrIucv {
    siucv_family: libc::sa_family_t,
    siucv_port: libc::c_ushort,
    siucv_addr: libc::c_uint,
    siucv_nodeid: [u8; FIELD_LEN],
    siucv_user_id: [u8; FIELD_LEN],
    siucv_name: [u8; FIELD_LEN],
}

/// Errors building an endpoint from configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} {value:?} is longer than 8 characters")]
    TooLong { field: &'static str, value: String },
    #[error("{field} {value:?} must be plain ASCII")]
    NotAscii { field: &'static str, value: String },
}

/// Remote IUCV endpoint: guest user id plus application name, both
/// space-padded to eight bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    user_id: [u8; FIELD_LEN],
    name: [u8; FIELD_LEN],
}

impl Endpoint {
    pub fn new(user_id: &str, name: &str) -> Result<Self, EndpointError> {
        Ok(Self {
            user_id: pad_field("user_id", &user_id.to_ascii_uppercase())?,
            name: pad_field("service", name)?,
        })
    }

    /// The padded user id field as sent in the socket address
    pub fn user_id_field(&self) -> &[u8; FIELD_LEN] {
        &self.user_id
    }

    /// The padded application name field as sent in the socket address
    pub fn name_field(&self) -> &[u8; FIELD_LEN] {
        &self.name
    }

    fn sockaddr(&self) -> SockaddrIucv {
        SockaddrIucv {
            siucv_family: AF_IUCV as libc::sa_family_t,
            siucv_port: 0,
            siucv_addr: 0,
            siucv_nodeid: [0; FIELD_LEN],
            siucv_user_id: self.user_id,
            siucv_name: self.name,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        let mut user_id = [b' '; FIELD_LEN];
        user_id[..RACF_SERVER_ID.len()].copy_from_slice(RACF_SERVER_ID.as_bytes());
        let mut name = [b' '; FIELD_LEN];
        name[..RACF_SERVICE_NAME.len()].copy_from_slice(RACF_SERVICE_NAME.as_bytes());
        Self { user_id, name }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = String::from_utf8_lossy(&self.user_id);
        let name = String::from_utf8_lossy(&self.name);
        write!(f, "{}:{}", user.trim_end(), name.trim_end())
    }
}

fn pad_field(field: &'static str, value: &str) -> Result<[u8; FIELD_LEN], EndpointError> {
    if value.is_empty() {
        return Err(EndpointError::Empty { field });
    }
    if !value.is_ascii() {
        return Err(EndpointError::NotAscii {
            field,
            value: value.to_string(),
        });
    }
    if value.len() > FIELD_LEN {
        return Err(EndpointError::TooLong {
            field,
            value: value.to_string(),
        });
    }
    let mut out = [b' '; FIELD_LEN];
    out[..value.len()].copy_from_slice(value.as_bytes());
    Ok(out)
}

/// Errors establishing the IUCV connection
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unable to create socket ({endpoint}): {source}")]
    Socket { endpoint: String, source: io::Error },
    #[error("server ({endpoint}) might be up but not ready: {source}")]
    InProgress { endpoint: String, source: io::Error },
    #[error("server ({endpoint}) is down or not listening")]
    Refused { endpoint: String },
    #[error("error connecting to the server ({endpoint}): {source}")]
    Os { endpoint: String, source: io::Error },
}

impl ConnectError {
    /// Sort a failed `connect(2)` into the error kinds callers care about
    fn from_connect(endpoint: &Endpoint, source: io::Error) -> Self {
        let endpoint = endpoint.to_string();
        match source.raw_os_error() {
            Some(libc::EINPROGRESS) | Some(libc::EAGAIN) => {
                error!(code = "IUCVCLNT013", %endpoint, "Server might be up but not ready");
                ConnectError::InProgress { endpoint, source }
            }
            Some(libc::ECONNREFUSED) => {
                error!(code = "IUCVCLNT014", %endpoint, "Server is down or not listening");
                ConnectError::Refused { endpoint }
            }
            _ => {
                error!(code = "IUCVCLNT015", %endpoint, error = %source, "Failed to connect to the server");
                ConnectError::Os { endpoint, source }
            }
        }
    }
}

/// Connected AF_IUCV stream socket. Closed when dropped.
#[derive(Debug)]
pub struct IucvStream {
    fd: OwnedFd,
}

impl IucvStream {
    /// Open a blocking stream connection to `endpoint`
    pub fn connect(endpoint: &Endpoint) -> Result<Self, ConnectError> {
        // SAFETY: plain socket(2) call, no pointers involved.
        let raw = unsafe {
            libc::socket(AF_IUCV, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0)
        };
        if raw < 0 {
            let source = io::Error::last_os_error();
            error!(code = "IUCVCLNT010", %endpoint, error = %source, "Unable to create socket");
            return Err(ConnectError::Socket {
                endpoint: endpoint.to_string(),
                source,
            });
        }
        // SAFETY: `raw` is a freshly created descriptor that nothing else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        info!(code = "IUCVCLNT011", %endpoint, "Socket created");

        let addr = endpoint.sockaddr();
        // SAFETY: `addr` is a fully initialised sockaddr_iucv living for the
        // duration of the call and the length matches its size.
        let ret = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                &addr as *const SockaddrIucv as *const libc::sockaddr,
                mem::size_of::<SockaddrIucv>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            // `fd` is dropped (closed) on the way out
            return Err(ConnectError::from_connect(
                endpoint,
                io::Error::last_os_error(),
            ));
        }

        info!(code = "IUCVCLNT012", %endpoint, "Socket connection to the server is success");
        Ok(Self { fd })
    }

    /// Install the receive deadline applied to every subsequent `read`
    pub fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        let tv = receive_timeval(timeout)?;
        // SAFETY: `tv` outlives the call and the length matches its size.
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Convert a receive deadline into `SO_RCVTIMEO` form.
///
/// A zero `timeval` disables the deadline, so durations that round down to
/// zero are rejected along with those `time_t` cannot hold.
fn receive_timeval(timeout: Duration) -> io::Result<libc::timeval> {
    let tv_sec = libc::time_t::try_from(timeout.as_secs()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("receive timeout of {}s is too large", timeout.as_secs()),
        )
    })?;
    let tv_usec = timeout.subsec_micros() as libc::suseconds_t;
    if tv_sec == 0 && tv_usec == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "receive timeout must be at least one microsecond",
        ));
    }
    Ok(libc::timeval { tv_sec, tv_usec })
}

impl Read for IucvStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl Write for IucvStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
        let n = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_is_racf_server() {
        let ep = Endpoint::default();
        assert_eq!(ep.user_id_field(), b"RACFVM  ");
        assert_eq!(ep.name_field(), b"RISERVER");
        assert_eq!(ep.to_string(), "RACFVM:RISERVER");
        assert_eq!(Endpoint::new("RACFVM", "RISERVER").unwrap(), ep);
    }

    #[test]
    fn user_id_is_uppercased_and_padded() {
        let ep = Endpoint::new("racfvm2", "SVC").unwrap();
        assert_eq!(ep.user_id_field(), b"RACFVM2 ");
        assert_eq!(ep.name_field(), b"SVC     ");
    }

    #[test]
    fn endpoint_rejects_bad_fields() {
        assert_eq!(
            Endpoint::new("", "RISERVER"),
            Err(EndpointError::Empty { field: "user_id" })
        );
        assert!(matches!(
            Endpoint::new("RACFVM", "RISERVER9"),
            Err(EndpointError::TooLong { field: "service", .. })
        ));
        assert!(matches!(
            Endpoint::new("R\u{c5}CF", "RISERVER"),
            Err(EndpointError::NotAscii { .. })
        ));
    }

    #[test]
    fn sockaddr_layout() {
        assert_eq!(mem::size_of::<SockaddrIucv>(), 32);
        let addr = Endpoint::default().sockaddr();
        assert_eq!(addr.siucv_family as libc::c_int, AF_IUCV);
        assert_eq!(&addr.siucv_user_id, b"RACFVM  ");
        assert_eq!(&addr.siucv_name, b"RISERVER");
        assert_eq!(addr.siucv_nodeid, [0; FIELD_LEN]);
    }

    #[test]
    fn receive_timeval_rejects_disabling_values() {
        let tv = receive_timeval(Duration::from_secs(600)).unwrap();
        assert_eq!((tv.tv_sec, tv.tv_usec), (600, 0));

        let tv = receive_timeval(Duration::from_micros(1_500_000)).unwrap();
        assert_eq!((tv.tv_sec, tv.tv_usec), (1, 500_000));

        for bad in [Duration::ZERO, Duration::from_nanos(999), Duration::from_secs(u64::MAX)] {
            let err = receive_timeval(bad).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn connect_errors_are_classified() {
        let ep = Endpoint::default();
        let refused = ConnectError::from_connect(&ep, io::Error::from_raw_os_error(libc::ECONNREFUSED));
        assert!(matches!(refused, ConnectError::Refused { .. }));

        let busy = ConnectError::from_connect(&ep, io::Error::from_raw_os_error(libc::EINPROGRESS));
        assert!(matches!(busy, ConnectError::InProgress { .. }));
        let again = ConnectError::from_connect(&ep, io::Error::from_raw_os_error(libc::EAGAIN));
        assert!(matches!(again, ConnectError::InProgress { .. }));

        let other = ConnectError::from_connect(&ep, io::Error::from_raw_os_error(libc::EACCES));
        assert!(matches!(other, ConnectError::Os { .. }));
        assert!(other.to_string().contains("RACFVM:RISERVER"));
    }
}
