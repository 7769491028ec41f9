//! Console Device Drivers
//!
//! Implements console drivers for VGA text mode and serial console, and the
//! `ConsoleDriver` collaborator behind the `cputs`/`cgetc` syscalls.

#![allow(dead_code)]

use alloc::{boxed::Box, format, string::String, vec::Vec};

use spin::Mutex;

/// Console colors (VGA text mode)
#[allow(dead_code)]
#[repr(u8)]
pub enum ConsoleColor {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

/// Console character with color attributes
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ConsoleChar {
    pub ascii: u8,
    pub color: u8,
}

impl ConsoleChar {
    pub fn new(ascii: u8, foreground: ConsoleColor, background: ConsoleColor) -> Self {
        Self {
            ascii,
            color: ((background as u8) << 4) | (foreground as u8),
        }
    }
}

/// Console device trait
pub trait ConsoleDevice: Send + Sync {
    fn name(&self) -> &str;
    fn dimensions(&self) -> (usize, usize);
    fn clear(&mut self) -> Result<(), &'static str>;
    fn write_char(&mut self, x: usize, y: usize, ch: ConsoleChar) -> Result<(), &'static str>;
    fn write_string(&mut self, x: usize, y: usize, s: &str, color: u8) -> Result<(), &'static str>;
    fn scroll_up(&mut self) -> Result<(), &'static str>;
    fn set_cursor(&mut self, x: usize, y: usize) -> Result<(), &'static str>;
    fn get_cursor(&self) -> (usize, usize);
    fn set_cursor_visible(&mut self, visible: bool) -> Result<(), &'static str>;
    /// Read one pending input byte, if any (non-blocking).
    fn read_byte(&mut self) -> Option<u8>;
}

/// VGA text mode console driver
pub struct VgaConsole {
    buffer: *mut ConsoleChar,
    width: usize,
    height: usize,
    cursor_x: usize,
    cursor_y: usize,
    cursor_visible: bool,
    default_color: u8,
}

// SAFETY: the buffer is a fixed hardware address; all mutation goes
// through &mut self.
unsafe impl Send for VgaConsole {}
// SAFETY: same as above; mutation is protected by &mut self.
unsafe impl Sync for VgaConsole {}

impl Default for VgaConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl VgaConsole {
    pub fn new() -> Self {
        Self {
            buffer: 0xB8000 as *mut ConsoleChar,
            width: 80,
            height: 25,
            cursor_x: 0,
            cursor_y: 0,
            cursor_visible: true,
            default_color: ((ConsoleColor::Black as u8) << 4) | (ConsoleColor::LightGray as u8),
        }
    }

    fn buffer_index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    fn update_cursor(&self) {
        let pos = self.cursor_y * self.width + self.cursor_x;

        // SAFETY: I/O port writes to the VGA CRT controller (0x3D4/0x3D5)
        // are standard cursor position updates; kernel mode has I/O
        // privilege and these ports are always safe to access.
        unsafe {
            crate::arch::outb(0x3D4, 0x0F);
            crate::arch::outb(0x3D5, (pos & 0xFF) as u8);
            crate::arch::outb(0x3D4, 0x0E);
            crate::arch::outb(0x3D5, ((pos >> 8) & 0xFF) as u8);
        }
    }
}

impl ConsoleDevice for VgaConsole {
    fn name(&self) -> &str {
        "vga"
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn clear(&mut self) -> Result<(), &'static str> {
        let blank = ConsoleChar::new(b' ', ConsoleColor::LightGray, ConsoleColor::Black);

        // SAFETY: buffer points to the 80x25 VGA text buffer at 0xB8000;
        // we write exactly width*height entries, staying in bounds.
        unsafe {
            for i in 0..(self.width * self.height) {
                *self.buffer.add(i) = blank;
            }
        }

        self.cursor_x = 0;
        self.cursor_y = 0;
        self.update_cursor();
        Ok(())
    }

    fn write_char(&mut self, x: usize, y: usize, ch: ConsoleChar) -> Result<(), &'static str> {
        if x >= self.width || y >= self.height {
            return Err("Position out of bounds");
        }
        let index = self.buffer_index(x, y);
        // SAFETY: bounds checked above, so index is within the VGA buffer.
        unsafe {
            *self.buffer.add(index) = ch;
        }
        Ok(())
    }

    fn write_string(&mut self, x: usize, y: usize, s: &str, color: u8) -> Result<(), &'static str> {
        let mut pos_x = x;
        let pos_y = y;
        if pos_y >= self.height {
            return Err("Y position out of bounds");
        }
        for byte in s.bytes() {
            if pos_x >= self.width {
                break;
            }
            self.write_char(pos_x, pos_y, ConsoleChar { ascii: byte, color })?;
            pos_x += 1;
        }
        Ok(())
    }

    fn scroll_up(&mut self) -> Result<(), &'static str> {
        // SAFETY: all indices come from buffer_index(x, y) with
        // x < width, y < height, staying within the 80x25 VGA buffer.
        unsafe {
            for y in 1..self.height {
                for x in 0..self.width {
                    let src = self.buffer_index(x, y);
                    let dst = self.buffer_index(x, y - 1);
                    *self.buffer.add(dst) = *self.buffer.add(src);
                }
            }
            let blank = ConsoleChar::new(b' ', ConsoleColor::LightGray, ConsoleColor::Black);
            for x in 0..self.width {
                let index = self.buffer_index(x, self.height - 1);
                *self.buffer.add(index) = blank;
            }
        }
        Ok(())
    }

    fn set_cursor(&mut self, x: usize, y: usize) -> Result<(), &'static str> {
        if x >= self.width || y >= self.height {
            return Err("Cursor position out of bounds");
        }
        self.cursor_x = x;
        self.cursor_y = y;
        self.update_cursor();
        Ok(())
    }

    fn get_cursor(&self) -> (usize, usize) {
        (self.cursor_x, self.cursor_y)
    }

    fn set_cursor_visible(&mut self, visible: bool) -> Result<(), &'static str> {
        self.cursor_visible = visible;
        // SAFETY: I/O port writes to the VGA CRT controller for cursor
        // shape control; standard register access.
        unsafe {
            crate::arch::outb(0x3D4, 0x0A);
            crate::arch::outb(0x3D5, if visible { 0x0E } else { 0x20 });
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Option<u8> {
        None
    }
}

/// Serial console driver
pub struct SerialConsole {
    port: u16,
    name: String,
    cursor_x: usize,
    cursor_y: usize,
    width: usize,
    height: usize,
}

impl SerialConsole {
    pub fn new(port: u16) -> Self {
        let mut console = Self {
            port,
            name: format!(
                "serial{}",
                match port {
                    0x3F8 => 0,
                    0x2F8 => 1,
                    0x3E8 => 2,
                    0x2E8 => 3,
                    _ => 9,
                }
            ),
            cursor_x: 0,
            cursor_y: 0,
            width: 80,
            height: 25,
        };
        console.init();
        console
    }

    fn init(&mut self) {
        // SAFETY: standard 16550 UART init sequence via I/O ports; the
        // base address is a valid COM port set at construction.
        unsafe {
            crate::arch::outb(self.port + 1, 0x00);
            crate::arch::outb(self.port + 3, 0x80);
            crate::arch::outb(self.port, 0x03);
            crate::arch::outb(self.port + 1, 0x00);
            crate::arch::outb(self.port + 3, 0x03);
            crate::arch::outb(self.port + 2, 0xC7);
            crate::arch::outb(self.port + 4, 0x0B);
        }
    }

    fn write_byte(&self, byte: u8) {
        // SAFETY: standard 16550 line-status/transmit register access.
        unsafe {
            while (crate::arch::inb(self.port + 5) & 0x20) == 0 {
                core::hint::spin_loop();
            }
            crate::arch::outb(self.port, byte);
        }
    }

    fn write_str(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

impl ConsoleDevice for SerialConsole {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn clear(&mut self) -> Result<(), &'static str> {
        self.write_str("\x1b[2J\x1b[H");
        self.cursor_x = 0;
        self.cursor_y = 0;
        Ok(())
    }

    fn write_char(&mut self, x: usize, y: usize, ch: ConsoleChar) -> Result<(), &'static str> {
        self.write_str(&format!("\x1b[{};{}H{}", y + 1, x + 1, ch.ascii as char));
        Ok(())
    }

    fn write_string(
        &mut self,
        x: usize,
        y: usize,
        s: &str,
        _color: u8,
    ) -> Result<(), &'static str> {
        self.write_str(&format!("\x1b[{};{}H{}", y + 1, x + 1, s));
        Ok(())
    }

    fn scroll_up(&mut self) -> Result<(), &'static str> {
        self.write_str("\x1b[S");
        Ok(())
    }

    fn set_cursor(&mut self, x: usize, y: usize) -> Result<(), &'static str> {
        if x >= self.width || y >= self.height {
            return Err("Cursor position out of bounds");
        }
        self.cursor_x = x;
        self.cursor_y = y;
        self.write_str(&format!("\x1b[{};{}H", y + 1, x + 1));
        Ok(())
    }

    fn get_cursor(&self) -> (usize, usize) {
        (self.cursor_x, self.cursor_y)
    }

    fn set_cursor_visible(&mut self, visible: bool) -> Result<(), &'static str> {
        self.write_str(if visible { "\x1b[?25h" } else { "\x1b[?25l" });
        Ok(())
    }

    fn read_byte(&mut self) -> Option<u8> {
        // SAFETY: standard 16550 line-status/receive register access.
        unsafe {
            if (crate::arch::inb(self.port + 5) & 0x01) != 0 {
                Some(crate::arch::inb(self.port))
            } else {
                None
            }
        }
    }
}

/// Console driver that fans writes out to every registered device and
/// reads from the first one with pending input.
pub struct ConsoleDriver {
    devices: Vec<Box<dyn ConsoleDevice>>,
    active_device: usize,
    name: String,
}

impl Default for ConsoleDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleDriver {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            active_device: 0,
            name: String::from("console"),
        }
    }

    pub fn add_device(&mut self, device: Box<dyn ConsoleDevice>) {
        crate::println!("[CONSOLE] Added console device: {}", device.name());
        self.devices.push(device);
    }

    pub fn set_active_device(&mut self, index: usize) -> Result<(), &'static str> {
        if index >= self.devices.len() {
            return Err("Invalid device index");
        }
        self.active_device = index;
        Ok(())
    }

    pub fn get_active_device(&mut self) -> Option<&mut (dyn ConsoleDevice + '_)> {
        match self.devices.get_mut(self.active_device) {
            Some(d) => Some(d.as_mut()),
            None => None,
        }
    }

    /// Write to every console device. Backs the `cputs` syscall.
    pub fn write_to_all(&mut self, s: &str) {
        for device in &mut self.devices {
            let (x, y) = device.get_cursor();
            device.write_string(x, y, s, 0x07).ok();
        }
    }

    /// Poll every device for one pending input byte. Backs `cgetc`.
    pub fn read_byte(&mut self) -> Option<u8> {
        self.devices.iter_mut().find_map(|d| d.read_byte())
    }
}

static CONSOLE_DRIVER: spin::Once<Mutex<ConsoleDriver>> = spin::Once::new();

pub fn init() {
    let mut console_driver = ConsoleDriver::new();
    console_driver.add_device(Box::new(VgaConsole::new()));
    console_driver.add_device(Box::new(SerialConsole::new(0x3F8)));

    if let Some(device) = console_driver.get_active_device() {
        device.clear().ok();
        device.set_cursor_visible(true).ok();
    }

    CONSOLE_DRIVER.call_once(|| Mutex::new(console_driver));
    crate::println!("[CONSOLE] Console subsystem initialized");
}

pub fn get_console_driver() -> &'static Mutex<ConsoleDriver> {
    CONSOLE_DRIVER.get().expect("Console driver not initialized")
}
