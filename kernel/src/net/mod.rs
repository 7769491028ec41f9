//! Minimal networking surface backing the `net_*` driver-bridge syscalls.
//!
//! TCP/IP depth (sockets, IP/TCP/UDP layers) is explicitly out of scope --
//! this is a loopback-style bridge, not a network stack.

extern crate alloc;

use alloc::vec::Vec;

pub mod device;

/// MAC address (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: Self = Self([0xFF; 6]);
    pub const ZERO: Self = Self([0x00; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

/// A single network frame, as handed across `net_try_transmit`/`net_try_receive`.
#[derive(Clone)]
pub struct Packet {
    data: Vec<u8>,
    length: usize,
}

impl Packet {
    pub fn new(size: usize) -> Self {
        Self {
            data: alloc::vec![0u8; size],
            length: 0,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            length: bytes.len(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.length]
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn set_length(&mut self, len: usize) {
        self.length = len.min(self.data.len());
    }
}

pub fn init() {
    println!("[NET] Initializing network bridge...");
    device::init();
    println!("[NET] Network bridge initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_address_roundtrips_bytes() {
        let mac = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(mac.0[0], 0x00);
        assert_eq!(mac.0[5], 0x55);
    }

    #[test]
    fn packet_from_bytes_exposes_exact_data() {
        let data = b"hello";
        let pkt = Packet::from_bytes(data);
        assert_eq!(pkt.data(), data);
        assert_eq!(pkt.len(), 5);
    }
}
