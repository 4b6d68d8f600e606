//! non blocking UDP endpoint for one of the session's two ports
//!
//! Built through socket2 so the low delay TOS bit gets set before the bind.
//! MIDI rides the same class of traffic as real time audio and wants the
//! same marking.
use log::error;
use socket2::{Domain, SockAddr, Socket, Type};
use std::fmt;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use crate::common::box_error::BoxError;

pub struct SessionSocket {
    sock: UdpSocket,
    port: u16,
}

impl SessionSocket {
    /// Bind to the given port on all interfaces.  Failures here surface to
    /// the caller; the participant must not start without both ports.
    pub fn build(port: u16) -> Result<SessionSocket, BoxError> {
        let raw_sock = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
        raw_sock.set_tos(0x10)?;
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
        raw_sock.bind(&SockAddr::from(addr))?;
        let sock = UdpSocket::from(raw_sock);
        sock.set_nonblocking(true)?;
        Ok(SessionSocket { sock, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Drain one datagram if one is waiting.  Ok(None) means nothing there;
    /// any real socket error propagates and kills the task.
    pub fn receive(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, BoxError> {
        match self.sock.recv_from(buf) {
            Ok((amt, src)) => Ok(Some((amt, src))),
            Err(e) => match e.kind() {
                ErrorKind::WouldBlock => Ok(None),
                _ => Err(e.into()),
            },
        }
    }

    /// Fire a datagram at the peer.  A failed or short send is logged and
    /// reported as false; it never takes the session down.
    pub fn send(&self, bytes: &[u8], dest: SocketAddr) -> bool {
        match self.sock.send_to(bytes, dest) {
            Ok(sent) => {
                if sent == bytes.len() {
                    true
                } else {
                    error!("short send, only {}/{} bytes to {}", sent, bytes.len(), dest);
                    false
                }
            }
            Err(e) => {
                error!("send to {} failed: {}", dest, e);
                false
            }
        }
    }
}

impl fmt::Display for SessionSocket {
    // This trait requires `fmt` with this exact signature.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{ port: {} }}", self.port)
    }
}

#[cfg(test)]
mod test_session_socket {
    use super::*;

    #[test]
    fn build_socket() {
        let sock = SessionSocket::build(46100).unwrap();
        println!("sock: {}", sock);
        assert_eq!(sock.port(), 46100);
    }

    #[test]
    fn empty_receive_is_not_an_error() {
        let sock = SessionSocket::build(46102).unwrap();
        let mut buf = [0u8; 64];
        assert!(sock.receive(&mut buf).unwrap().is_none());
    }

    #[test]
    fn send_and_receive() {
        let alice = SessionSocket::build(46104).unwrap();
        let bob = SessionSocket::build(46106).unwrap();
        let dest: SocketAddr = "127.0.0.1:46106".parse().unwrap();
        assert!(alice.send(&[1, 2, 3], dest));

        let mut buf = [0u8; 64];
        // non blocking read; give the loopback a moment
        let mut got = None;
        for _ in 0..50 {
            if let Some(r) = bob.receive(&mut buf).unwrap() {
                got = Some(r);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let (amt, src) = got.expect("datagram never arrived");
        assert_eq!(amt, 3);
        assert_eq!(&buf[..amt], &[1, 2, 3]);
        assert_eq!(src.port(), 46104);
    }
}
