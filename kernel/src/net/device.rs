//! Network device abstraction backing the `net_try_transmit` /
//! `net_try_receive` / `net_mac` driver-bridge syscalls.

extern crate alloc;

use alloc::{string::String, vec::Vec};

use spin::Mutex;

use super::{MacAddress, Packet};
use crate::sync::GlobalState;

/// Minimal NIC surface the driver-bridge syscalls need.
pub trait NetworkDevice: Send {
    fn name(&self) -> &str;
    fn mac_address(&self) -> MacAddress;
    /// Queue `packet` for transmission; `Err` signals back-pressure (queue
    /// full), not a hard failure.
    fn transmit(&mut self, packet: Packet) -> Result<(), ()>;
    /// Pop one received packet, if any is queued.
    fn receive(&mut self) -> Option<Packet>;
}

/// Loopback device: everything transmitted is immediately receivable.
/// The sole device registered at boot, standing in for a real NIC.
pub struct LoopbackDevice {
    name: String,
    mac: MacAddress,
    queue: Vec<Packet>,
}

impl LoopbackDevice {
    pub fn new() -> Self {
        Self {
            name: String::from("lo0"),
            mac: MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
            queue: Vec::new(),
        }
    }
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Bound on the loopback queue so a runaway sender can't exhaust the heap;
/// exceeding it is reported as back-pressure, not an error.
const MAX_QUEUE_LEN: usize = 64;

impl NetworkDevice for LoopbackDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn mac_address(&self) -> MacAddress {
        self.mac
    }

    fn transmit(&mut self, packet: Packet) -> Result<(), ()> {
        if self.queue.len() >= MAX_QUEUE_LEN {
            return Err(());
        }
        self.queue.push(packet);
        Ok(())
    }

    fn receive(&mut self) -> Option<Packet> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.queue.remove(0))
        }
    }
}

static DEVICE: GlobalState<Mutex<LoopbackDevice>> = GlobalState::new();

fn device() -> &'static Mutex<LoopbackDevice> {
    DEVICE.get_or_init(|| Mutex::new(LoopbackDevice::new()))
}

pub fn init() {
    device();
    println!("[NETDEV] loopback device ready");
}

pub fn transmit(packet: Packet) -> Result<(), ()> {
    device().lock().transmit(packet)
}

pub fn receive() -> Option<Packet> {
    device().lock().receive()
}

pub fn mac_address() -> MacAddress {
    device().lock().mac_address()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_receives_what_it_transmits() {
        let mut dev = LoopbackDevice::new();
        dev.transmit(Packet::from_bytes(&[1, 2, 3])).unwrap();
        let got = dev.receive().unwrap();
        assert_eq!(got.data(), &[1, 2, 3]);
        assert!(dev.receive().is_none());
    }

    #[test]
    fn transmit_backpressures_when_queue_full() {
        let mut dev = LoopbackDevice::new();
        for _ in 0..MAX_QUEUE_LEN {
            dev.transmit(Packet::from_bytes(&[0])).unwrap();
        }
        assert!(dev.transmit(Packet::from_bytes(&[0])).is_err());
    }
}
